//! NodeAtlas kernel : cache des cartes filles.
//!
//! Le cœur (`sources`, `fetcher`, `aggregator`, `committer`) est assemblé par
//! `cache::ChildMapCache` ; `store`, `http`, `config` et `health` sont la
//! plomberie du binaire.

pub mod aggregator;
pub mod cache;
pub mod committer;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod health;
pub mod http;
pub mod models;
pub mod report;
pub mod sources;
pub mod store;

pub use cache::{ChildMapCache, PassReport};
pub use error::{FetchError, PassError, StoreError};
pub use models::{Node, SourceId, Status};
pub use sources::SourceRegistry;
