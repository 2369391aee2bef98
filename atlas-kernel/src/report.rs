//! Diagnostics non fatals de la passe d'agrégation.
//!
//! Le cœur ne logge pas directement : il émet des `FetchEvent` vers un `Reporter`
//! fourni à la construction. `TracingReporter` est l'implémentation du binaire.

use crate::models::SourceId;
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum FetchEvent {
    /// Échec réseau, timeout ou statut HTTP non 2xx
    Unreachable { hostname: String, reason: String },
    DecodeFailed { hostname: String, reason: String },
    /// Le payload contenait un champ `error` non nul
    RemoteError { hostname: String, message: String },
    SourceDiscovered { hostname: String, origin: String, id: SourceId },
    /// Plus aucun id attribuable : les nœuds de cette origine sont écartés
    OriginRejected { hostname: String, origin: String, nodes: usize },
    Fetched { hostname: String, nodes: usize },
}

impl FetchEvent {
    /// Carte interrogée à l'origine de l'événement
    pub fn hostname(&self) -> &str {
        match self {
            FetchEvent::Unreachable { hostname, .. }
            | FetchEvent::DecodeFailed { hostname, .. }
            | FetchEvent::RemoteError { hostname, .. }
            | FetchEvent::SourceDiscovered { hostname, .. }
            | FetchEvent::OriginRejected { hostname, .. }
            | FetchEvent::Fetched { hostname, .. } => hostname,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            FetchEvent::Unreachable { .. } | FetchEvent::DecodeFailed { .. } | FetchEvent::RemoteError { .. }
        )
    }
}

impl fmt::Display for FetchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchEvent::Unreachable { hostname, reason } => write!(f, "caching {hostname:?} produced: {reason}"),
            FetchEvent::DecodeFailed { hostname, reason } => {
                write!(f, "caching {hostname:?} produced undecodable payload: {reason}")
            }
            FetchEvent::RemoteError { hostname, message } => {
                write!(f, "caching {hostname:?} produced remote error: {message}")
            }
            FetchEvent::SourceDiscovered { hostname, origin, id } => {
                write!(f, "discovered new source map {origin:?} via {hostname:?}, id {id}")
            }
            FetchEvent::OriginRejected { hostname, origin, nodes } => {
                write!(f, "dropped {nodes} nodes of {origin:?} via {hostname:?}: no source id left")
            }
            FetchEvent::Fetched { hostname, nodes } => write!(f, "fetched {nodes} nodes from {hostname:?}"),
        }
    }
}

pub trait Reporter: Send + Sync {
    fn report(&self, event: FetchEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, event: FetchEvent) {
        match &event {
            FetchEvent::SourceDiscovered { .. } => info!("[cache] {event}"),
            FetchEvent::Fetched { .. } => debug!("[cache] {event}"),
            _ => warn!("[cache] {event}"),
        }
    }
}
