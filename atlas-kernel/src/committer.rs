//! Commit de la collection fusionnée dans le store, en un seul batch.

use crate::error::StoreError;
use crate::models::Node;
use crate::store::CacheStore;
use time::OffsetDateTime;
use tracing::debug;

/// Horodate les nœuds sans `retrieved_at` puis les écrit en un batch.
/// Une erreur du store interrompt le commit et remonte telle quelle.
pub fn commit_nodes(store: &dyn CacheStore, mut nodes: Vec<Node>) -> Result<usize, StoreError> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    stamp_retrieved(&mut nodes, now);

    let written = store.cache_nodes(&nodes)?;
    debug!("[cache] committed {written} cached nodes");
    Ok(written)
}

pub fn stamp_retrieved(nodes: &mut [Node], now: i64) {
    for node in nodes.iter_mut().filter(|n| n.retrieved_at == 0) {
        node.retrieved_at = now;
    }
}
