/*!
Stub HTTP de carte fille pour tests sans réseau externe

Démarre un vrai serveur axum sur 127.0.0.1 (port éphémère) qui sert un
listing configurable, compte les requêtes reçues et peut simuler une
latence ou un statut d'erreur.
*/

use anyhow::Result;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub enum StubResponse {
    /// 200 + corps JSON
    Listing(Vec<u8>),
    /// Statut seul, corps vide
    Status(u16),
    /// Statut + corps arbitraire
    Raw(u16, String),
}

#[derive(Clone)]
struct StubState {
    hits: Arc<AtomicUsize>,
    response: Arc<Mutex<StubResponse>>,
    delay: Arc<Mutex<Duration>>,
}

pub struct StubChildMap {
    addr: SocketAddr,
    state: StubState,
    handle: JoinHandle<()>,
}

impl StubChildMap {
    /// Stub servant `response` sur /api/all
    pub async fn spawn(response: StubResponse) -> Result<Self> {
        Self::spawn_at("/api/all", response).await
    }

    pub async fn spawn_at(path: &str, response: StubResponse) -> Result<Self> {
        let state = StubState {
            hits: Arc::new(AtomicUsize::new(0)),
            response: Arc::new(Mutex::new(response)),
            delay: Arc::new(Mutex::new(Duration::ZERO)),
        };

        let app = Router::new()
            .route(path, get(serve_listing))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::warn!("[stub] child map {addr} stopped: {e}");
            }
        });

        tracing::debug!("[stub] child map listening on {addr}");
        Ok(Self { addr, state, handle })
    }

    /// Hostname à mettre dans la liste des cartes filles ("127.0.0.1:<port>")
    pub fn hostname(&self) -> String {
        self.addr.to_string()
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub fn set_response(&self, response: StubResponse) {
        *self.state.response.lock() = response;
    }

    /// Latence ajoutée avant chaque réponse
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock() = delay;
    }
}

impl Drop for StubChildMap {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_listing(State(state): State<StubState>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);

    let delay = *state.delay.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let response = state.response.lock().clone();
    match response {
        StubResponse::Listing(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        StubResponse::Status(code) => status_code(code).into_response(),
        StubResponse::Raw(code, body) => (status_code(code), body).into_response(),
    }
}

fn status_code(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}
