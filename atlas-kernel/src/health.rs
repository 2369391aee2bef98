use crate::cache::PassReport;
use crate::error::PassError;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub child_maps_configured: u32,
    pub passes_completed: u32,
    pub passes_failed: u32,
    pub last_error: Option<String>,
    pub last_pass: Option<PassReport>,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    passes_completed: Arc<AtomicU32>,
    passes_failed: Arc<AtomicU32>,
    last_error: Arc<Mutex<Option<String>>>,
    last_pass: Arc<Mutex<Option<PassReport>>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            passes_completed: Arc::new(AtomicU32::new(0)),
            passes_failed: Arc::new(AtomicU32::new(0)),
            last_error: Arc::new(Mutex::new(None)),
            last_pass: Arc::new(Mutex::new(None)),
        }
    }

    /// Une passe refusée car déjà en cours n'est comptée ni en succès ni en échec
    pub fn record_pass(&self, result: &Result<PassReport, PassError>) {
        match result {
            Ok(report) => {
                self.passes_completed.fetch_add(1, Ordering::Relaxed);
                *self.last_pass.lock() = Some(report.clone());
            }
            Err(PassError::AlreadyRunning) => {}
            Err(e) => {
                self.passes_failed.fetch_add(1, Ordering::Relaxed);
                *self.last_error.lock() = Some(e.to_string());
            }
        }
    }

    pub fn get_health(&self, child_maps: usize) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            child_maps_configured: child_maps as u32,
            passes_completed: self.passes_completed.load(Ordering::Relaxed),
            passes_failed: self.passes_failed.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
            last_pass: self.last_pass.lock().clone(),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}
