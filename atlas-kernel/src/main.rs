/**
 * ATLAS KERNEL - Point d'entrée principal du serveur NodeAtlas
 *
 * RÔLE : Orchestration config, store SQLite, cache des cartes filles, API admin.
 * Bootstrap du système complet avec gestion d'erreurs et logging.
 */

use atlas_kernel::cache::{spawn_refresh_loop, ChildMapCache};
use atlas_kernel::config::{load_config, KernelConfig};
use atlas_kernel::fetcher::HttpRemoteClient;
use atlas_kernel::health::HealthTracker;
use atlas_kernel::http::{build_router, AppState};
use atlas_kernel::report::TracingReporter;
use atlas_kernel::store::{CacheStore, SqliteStore};

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("atlas_kernel=info")),
        )
        .init();

    let cfg: KernelConfig = load_config().await;
    info!("[kernel] starting NodeAtlas kernel {}", env!("CARGO_PKG_VERSION"));

    let store = SqliteStore::open(&cfg.database.path, cfg.database.read_only)
        .with_context(|| format!("could not open database {}", cfg.database.path))?;
    if store.is_read_only() {
        info!("[kernel] database is read only");
    }
    let store: Arc<dyn CacheStore> = Arc::new(store);
    info!(
        "[kernel] {} known sources, {} cached nodes",
        store.source_to_id().context("could not read source registry")?.len(),
        store.cached_nodes().context("could not read cached nodes")?.len()
    );

    let client = HttpRemoteClient::new(&cfg.cache.listing_path, cfg.cache.request_timeout())
        .context("could not build HTTP client")?;

    let health_tracker = HealthTracker::new();
    let cache = Arc::new(
        ChildMapCache::new(store, Arc::new(client), Arc::new(TracingReporter), cfg.child_maps.clone())
            .with_health(health_tracker.clone()),
    );

    // rafraîchissement périodique des cartes filles
    match cfg.cache.refresh_interval() {
        Some(every) if !cfg.child_maps.is_empty() => {
            spawn_refresh_loop(cache.clone(), every);
        }
        Some(_) => warn!("[kernel] refresh interval set but no child maps configured"),
        None => info!("[kernel] periodic refresh disabled"),
    }

    let app = build_router(AppState::new(cache, health_tracker));

    let listener = TcpListener::bind(&cfg.listen)
        .await
        .with_context(|| format!("could not bind {}", cfg.listen))?;
    info!("[kernel] listening on http://{}", cfg.listen);
    axum::serve(listener, app).await.context("HTTP server crashed")?;
    Ok(())
}
