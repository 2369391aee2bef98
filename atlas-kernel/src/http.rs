/**
 * API ADMIN NODEATLAS - Surface HTTP d'administration du cache
 *
 * RÔLE :
 * Inspection et pilotage du cache des cartes filles par un opérateur.
 * Ce n'est pas l'API de listing consommée par les autres cartes.
 *
 * ROUTES :
 * - GET    /health          : liveness, sans clé
 * - GET    /system/health   : compteurs de passes + dernier bilan
 * - GET    /sources         : registre hostname ↔ id persisté
 * - GET    /cache           : nœuds cachés groupés par hostname source
 * - POST   /cache/refresh   : lance une passe immédiatement
 * - DELETE /cache           : vide le cache
 *
 * SÉCURITÉ :
 * - Header x-api-key obligatoire sauf /health ; la clé (ATLAS_API_KEY) est lue
 *   une fois à la construction de l'AppState
 */

use crate::cache::{group_by_source, ChildMapCache, PassReport};
use crate::error::{PassError, StoreError};
use crate::health::{HealthTracker, KernelHealth};
use crate::models::Node;
use crate::store::run_blocking;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<ChildMapCache>,
    pub health_tracker: HealthTracker,
    /// Clé admin lue une fois à la construction ; `None` = API fermée
    api_key: Option<Arc<str>>,
}

impl AppState {
    /// Lit ATLAS_API_KEY depuis l'environnement
    pub fn new(cache: Arc<ChildMapCache>, health_tracker: HealthTracker) -> Self {
        let api_key = std::env::var("ATLAS_API_KEY").ok().filter(|k| !k.is_empty());
        Self::with_api_key(cache, health_tracker, api_key)
    }

    pub fn with_api_key(cache: Arc<ChildMapCache>, health_tracker: HealthTracker, api_key: Option<String>) -> Self {
        if api_key.is_none() {
            warn!("SECURITY: ATLAS_API_KEY not set - admin API access denied");
        }
        Self {
            cache,
            health_tracker,
            api_key: api_key.map(Arc::from),
        }
    }
}

#[derive(Debug, Serialize)]
struct SourceView {
    id: u32,
    hostname: String,
}

/// Comparaison en temps constant pour une longueur donnée
fn keys_match(expected: &str, provided: &str) -> bool {
    if expected.len() != provided.len() {
        return false;
    }
    expected
        .bytes()
        .zip(provided.bytes())
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let Some(expected) = app.api_key.as_deref() else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let authorized = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|key| keys_match(expected, key));

    if !authorized {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/sources", get(list_sources))
        .route("/cache", get(get_cache).delete(clear_cache))
        .route("/cache/refresh", post(refresh_cache))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

fn store_failure(e: StoreError) -> (StatusCode, String) {
    error!("[http] store error: {e}");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health_tracker.get_health(app.cache.child_maps().len()))
}

// GET /sources (triées par id)
async fn list_sources(State(app): State<AppState>) -> Result<Json<Vec<SourceView>>, (StatusCode, String)> {
    let mut sources: Vec<SourceView> = run_blocking(app.cache.store(), |store| store.id_to_source())
        .await
        .map_err(store_failure)?
        .into_iter()
        .map(|(id, hostname)| SourceView { id, hostname })
        .collect();
    sources.sort_by_key(|s| s.id);
    Ok(Json(sources))
}

// GET /cache
async fn get_cache(State(app): State<AppState>) -> Result<Json<BTreeMap<String, Vec<Node>>>, (StatusCode, String)> {
    let grouped = run_blocking(app.cache.store(), |store| {
        let sources = store.id_to_source()?;
        Ok(group_by_source(store.cached_nodes()?, &sources))
    })
    .await
    .map_err(store_failure)?;
    Ok(Json(grouped))
}

// POST /cache/refresh
async fn refresh_cache(State(app): State<AppState>) -> Result<Json<PassReport>, (StatusCode, String)> {
    match app.cache.refresh().await {
        Ok(report) => Ok(Json(report)),
        Err(PassError::AlreadyRunning) => Err((StatusCode::CONFLICT, PassError::AlreadyRunning.to_string())),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

// DELETE /cache
async fn clear_cache(State(app): State<AppState>) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    match run_blocking(app.cache.store(), |store| store.clear_cache()).await {
        Ok(removed) => Ok(Json(serde_json::json!({ "status": "cleared", "removed": removed }))),
        Err(StoreError::ReadOnly) => Err((StatusCode::FORBIDDEN, StoreError::ReadOnly.to_string())),
        Err(e) => Err(store_failure(e)),
    }
}
