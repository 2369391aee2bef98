/**
 * CHILD MAP CACHE - Passe d'agrégation complète
 *
 * RÔLE : Enchaîne chargement du registre des sources depuis le store,
 * agrégation concurrente des cartes filles, persistance des nouvelles sources
 * et commit du batch de nœuds.
 *
 * ERREURS : Seuls l'échec de chargement du registre et l'échec du commit font
 * échouer la passe. Le commit inclut l'enregistrement des nouvelles sources,
 * avant tout nœud. Une passe déjà en cours est refusée (AlreadyRunning).
 *
 * UTILISATION : Boucle périodique (spawn_refresh_loop) et route admin
 * POST /cache/refresh partagent la même instance.
 */

use crate::aggregator::aggregate;
use crate::committer::commit_nodes;
use crate::error::PassError;
use crate::fetcher::RemoteClient;
use crate::health::HealthTracker;
use crate::models::{Node, SourceId};
use crate::report::Reporter;
use crate::sources::SourceRegistry;
use crate::store::{run_blocking, CacheStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredSource {
    pub hostname: String,
    pub id: SourceId,
}

/// Bilan d'une passe réussie
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassReport {
    pub pass_id: Uuid,
    pub queried: usize,
    pub fetched: Vec<String>,
    pub skipped: Vec<String>,
    pub nodes_committed: usize,
    pub sources_known: usize,
    pub discovered: Vec<DiscoveredSource>,
    pub finished_at: String, // RFC3339
}

pub struct ChildMapCache {
    store: Arc<dyn CacheStore>,
    client: Arc<dyn RemoteClient>,
    reporter: Arc<dyn Reporter>,
    child_maps: Vec<String>,
    health: Option<HealthTracker>,
    running: AtomicBool,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ChildMapCache {
    pub fn new(
        store: Arc<dyn CacheStore>,
        client: Arc<dyn RemoteClient>,
        reporter: Arc<dyn Reporter>,
        child_maps: Vec<String>,
    ) -> Self {
        Self {
            store,
            client,
            reporter,
            child_maps,
            health: None,
            running: AtomicBool::new(false),
        }
    }

    pub fn with_health(mut self, health: HealthTracker) -> Self {
        self.health = Some(health);
        self
    }

    pub fn child_maps(&self) -> &[String] {
        &self.child_maps
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Exécute une passe d'agrégation complète
    pub async fn refresh(&self) -> Result<PassReport, PassError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(PassError::AlreadyRunning);
        }
        let _running = RunningGuard(&self.running);

        let result = self.run_pass().await;
        if let Some(health) = &self.health {
            health.record_pass(&result);
        }
        result
    }

    async fn run_pass(&self) -> Result<PassReport, PassError> {
        let pass_id = Uuid::new_v4();
        let seed = run_blocking(&self.store, |store| store.source_to_id())
            .await
            .map_err(PassError::RegistryLoad)?;
        let registry = Arc::new(SourceRegistry::seeded(seed));
        info!(
            "[cache] pass {pass_id}: querying {} child maps ({} known sources)",
            self.child_maps.len(),
            registry.len()
        );

        let aggregation = aggregate(
            &self.child_maps,
            Arc::clone(&self.client),
            Arc::clone(&registry),
            Arc::clone(&self.reporter),
        )
        .await;

        // aucun nœud n'est écrit avec un id que le store ne connaît pas :
        // sinon la passe suivante réattribuerait cet id à un autre hostname
        let discovered = registry.discovered();
        if !discovered.is_empty() {
            let sources = discovered.clone();
            run_blocking(&self.store, move |store| store.save_sources(&sources))
                .await
                .map_err(|e| {
                    warn!("[cache] pass {pass_id}: failed to persist {} new sources: {e}", discovered.len());
                    PassError::Commit(e)
                })?;
        }

        let nodes = aggregation.nodes;
        let nodes_committed = run_blocking(&self.store, move |store| commit_nodes(store, nodes))
            .await
            .map_err(PassError::Commit)?;

        let report = PassReport {
            pass_id,
            queried: self.child_maps.len(),
            fetched: aggregation.fetched,
            skipped: aggregation.skipped,
            nodes_committed,
            sources_known: registry.len(),
            discovered: discovered
                .into_iter()
                .map(|(hostname, id)| DiscoveredSource { hostname, id })
                .collect(),
            finished_at: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
        };
        info!(
            "[cache] pass {pass_id}: committed {} nodes from {}/{} child maps",
            report.nodes_committed,
            report.fetched.len(),
            report.queried
        );
        Ok(report)
    }
}

/// Regroupe des nœuds cachés par hostname source (id inconnu → "unknown:<id>")
pub fn group_by_source(nodes: Vec<Node>, sources: &HashMap<SourceId, String>) -> BTreeMap<String, Vec<Node>> {
    let mut grouped: BTreeMap<String, Vec<Node>> = BTreeMap::new();
    for node in nodes {
        let hostname = sources
            .get(&node.source_id)
            .cloned()
            .unwrap_or_else(|| format!("unknown:{}", node.source_id));
        grouped.entry(hostname).or_default().push(node);
    }
    grouped
}

/// Rafraîchit le cache à intervalle fixe ; la première passe part immédiatement
pub fn spawn_refresh_loop(cache: Arc<ChildMapCache>, every: Duration) -> JoinHandle<()> {
    info!("[cache] starting refresh loop (every {}s)", every.as_secs());

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match cache.refresh().await {
                Ok(_) => {}
                Err(PassError::AlreadyRunning) => warn!("[cache] previous pass still running, skipping tick"),
                Err(e) => error!("[cache] pass failed: {e}"),
            }
        }
    })
}
