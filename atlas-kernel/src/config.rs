use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub listen: String,
    pub database: DatabaseConf,
    /// Hostnames des cartes filles à agréger
    pub child_maps: Vec<String>,
    pub cache: CacheConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConf {
    pub path: String,
    pub read_only: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConf {
    pub listing_path: String, // ex: "/api/all"
    pub request_timeout_secs: u64,
    /// 0 = pas de rafraîchissement périodique
    pub refresh_interval_secs: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8077".into(),
            database: DatabaseConf::default(),
            child_maps: Vec::new(),
            cache: CacheConf::default(),
        }
    }
}

impl Default for DatabaseConf {
    fn default() -> Self {
        Self {
            path: "./data/atlas.db".into(),
            read_only: false,
        }
    }
}

impl Default for CacheConf {
    fn default() -> Self {
        Self {
            listing_path: "/api/all".into(),
            request_timeout_secs: 10,
            refresh_interval_secs: 0,
        }
    }
}

impl CacheConf {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("ATLAS_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let mut cfg = load_config_from(&path).await;

    if std::env::var("ATLAS_READONLY").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true")) {
        cfg.database.read_only = true;
    }
    cfg
}

pub async fn load_config_from(path: &str) -> KernelConfig {
    if Path::new(path).exists() {
        let txt = fs::read_to_string(path).await.unwrap_or_default();
        if txt.trim().is_empty() { return KernelConfig::default(); }
        serde_yaml::from_str(&txt).unwrap_or_else(|e| {
            warn!("[kernel] config invalide: {e}");
            KernelConfig::default()
        })
    } else {
        warn!("[kernel] pas de {path}, usage config par défaut");
        KernelConfig::default()
    }
}
