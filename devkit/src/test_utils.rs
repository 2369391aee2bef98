/*!
Test Harness pour le cache des cartes filles

Facilite l'écriture de tests de bout en bout avec:
- Store SQLite temporaire (supprimé à la fin du test)
- Client HTTP réel vers des StubChildMap
- Enregistrement des événements reportés pendant la passe
*/

use anyhow::Result;
use atlas_kernel::cache::{ChildMapCache, PassReport};
use atlas_kernel::fetcher::HttpRemoteClient;
use atlas_kernel::report::{FetchEvent, Reporter};
use atlas_kernel::store::{CacheStore, SqliteStore};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Reporter qui garde tous les événements pour assertions
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    events: Arc<Mutex<Vec<FetchEvent>>>,
}

impl Reporter for RecordingReporter {
    fn report(&self, event: FetchEvent) {
        tracing::debug!("[devkit] {event}");
        self.events.lock().push(event);
    }
}

impl RecordingReporter {
    pub fn events(&self) -> Vec<FetchEvent> {
        self.events.lock().clone()
    }

    /// Hostnames sautés (injoignables, payload invalide, erreur distante)
    pub fn skipped_hosts(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.is_skip())
            .map(|e| e.hostname().to_string())
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

/// Harness de test complet : store temporaire + reporter + client HTTP
pub struct TestHarness {
    _dir: TempDir,
    pub db_path: PathBuf,
    pub store: Arc<SqliteStore>,
    pub reporter: RecordingReporter,
    pub request_timeout: Duration,
}

impl TestHarness {
    pub fn new() -> Result<Self> {
        tracing_subscriber::fmt().with_test_writer().try_init().ok(); // Init logging pour tests

        let dir = TempDir::new()?;
        let db_path = dir.path().join("atlas-test.db");
        let store = Arc::new(SqliteStore::open(&db_path, false)?);

        Ok(Self {
            _dir: dir,
            db_path,
            store,
            reporter: RecordingReporter::default(),
            request_timeout: Duration::from_secs(5),
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// ChildMapCache réel branché sur le store et le reporter du harness
    pub fn cache_for(&self, child_maps: Vec<String>) -> Result<ChildMapCache> {
        let client = HttpRemoteClient::new("/api/all", self.request_timeout)?;
        let store: Arc<dyn CacheStore> = self.store.clone();
        Ok(ChildMapCache::new(
            store,
            Arc::new(client),
            Arc::new(self.reporter.clone()),
            child_maps,
        ))
    }

    /// Une passe complète sur `child_maps`
    pub async fn refresh(&self, child_maps: &[String]) -> Result<PassReport> {
        let cache = self.cache_for(child_maps.to_vec())?;
        Ok(cache.refresh().await?)
    }

    /// Nouvelle connexion sur le même fichier, pour vérifier la persistance
    pub fn reopen_store(&self) -> Result<SqliteStore> {
        Ok(SqliteStore::open(&self.db_path, false)?)
    }
}

/// Adresse locale sur laquelle plus rien n'écoute (connexion refusée)
pub async fn unreachable_hostname() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr.to_string())
}
