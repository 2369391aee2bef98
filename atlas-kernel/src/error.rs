//! Erreurs du kernel.
//!
//! Seules `PassError::RegistryLoad` et `PassError::Commit` font échouer une passe
//! d'agrégation ; la persistance des nouvelles sources fait partie du commit.
//! Les `FetchError` restent confinées au fetcher et sont reportées.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store is read-only")]
    ReadOnly,
    #[error("invalid row: {0}")]
    InvalidRow(String),
    /// La tâche bloquante portant l'appel SQLite n'a pas abouti
    #[error("store task failed: {0}")]
    Blocking(String),
}

/// Échec de récupération d'une carte fille (jamais propagé hors de la passe)
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("remote error: {0}")]
    Remote(String),
}

#[derive(Debug, Error)]
pub enum PassError {
    #[error("could not load source registry: {0}")]
    RegistryLoad(#[source] StoreError),
    #[error("could not commit cached nodes: {0}")]
    Commit(#[source] StoreError),
    #[error("an aggregation pass is already running")]
    AlreadyRunning,
}
