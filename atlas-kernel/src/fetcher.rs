/**
 * REMOTE FETCHER - Récupération du listing d'une carte fille
 *
 * RÔLE : Un aller-retour réseau vers une carte, décodage de `{data, error}`,
 * puis résolution de chaque origine dans le registre des sources partagé.
 *
 * FONCTIONNEMENT :
 * - RemoteClient trait = l'appel réseau seul (HttpRemoteClient en production)
 * - fetch_child_map = décodage + localisation ; tout échec est reporté et la
 *   carte est sautée pour cette passe (None), jamais propagé
 * - Le premier label "local" désigne les nœuds natifs de la carte interrogée :
 *   il est remplacé par le hostname interrogé avant résolution
 */

use crate::error::FetchError;
use crate::models::{Node, NodeDump, OriginListing, LOCAL_SOURCE};
use crate::report::{FetchEvent, Reporter};
use crate::sources::SourceRegistry;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub type ListingFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>, FetchError>> + Send + 'a>>;

/// Accès réseau à l'endpoint de listing d'une carte distante
pub trait RemoteClient: Send + Sync {
    /// Corps brut de la réponse ; statut non 2xx = erreur
    fn fetch_listing<'a>(&'a self, hostname: &'a str) -> ListingFuture<'a>;
}

pub struct HttpRemoteClient {
    client: reqwest::Client,
    listing_path: String,
}

impl HttpRemoteClient {
    pub fn new(listing_path: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("atlas-kernel/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let listing_path = if listing_path.starts_with('/') {
            listing_path.to_string()
        } else {
            format!("/{listing_path}")
        };

        Ok(Self { client, listing_path })
    }

    /// `http://<hostname><listing_path>` ; un schéma explicite est conservé
    pub fn listing_url(&self, hostname: &str) -> String {
        let base = hostname.trim_end_matches('/');
        if base.starts_with("http://") || base.starts_with("https://") {
            format!("{base}{}", self.listing_path)
        } else {
            format!("http://{base}{}", self.listing_path)
        }
    }
}

impl RemoteClient for HttpRemoteClient {
    fn fetch_listing<'a>(&'a self, hostname: &'a str) -> ListingFuture<'a> {
        Box::pin(async move {
            let url = self.listing_url(hostname);
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| FetchError::Transport(e.to_string()))?;

            if !response.status().is_success() {
                return Err(FetchError::Status(response.status().as_u16()));
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| FetchError::Transport(e.to_string()))?;
            Ok(body.to_vec())
        })
    }
}

/// Récupère et localise les nœuds d'une carte fille.
/// `None` si la carte doit être sautée (l'événement a déjà été reporté).
pub async fn fetch_child_map(
    client: &dyn RemoteClient,
    hostname: &str,
    registry: &SourceRegistry,
    reporter: &dyn Reporter,
) -> Option<Vec<Node>> {
    let body = match client.fetch_listing(hostname).await {
        Ok(body) => body,
        Err(e) => {
            reporter.report(FetchEvent::Unreachable {
                hostname: hostname.to_string(),
                reason: e.to_string(),
            });
            return None;
        }
    };

    let listing = match NodeDump::decode(&body).and_then(NodeDump::into_listing) {
        Ok(listing) => listing,
        Err(FetchError::Remote(message)) => {
            reporter.report(FetchEvent::RemoteError {
                hostname: hostname.to_string(),
                message,
            });
            return None;
        }
        Err(e) => {
            reporter.report(FetchEvent::DecodeFailed {
                hostname: hostname.to_string(),
                reason: e.to_string(),
            });
            return None;
        }
    };

    Some(localize_listing(hostname, listing, registry, reporter))
}

/// Remplace chaque origine par son id local et concatène les listes,
/// en conservant l'ordre du payload.
pub fn localize_listing(
    hostname: &str,
    listing: OriginListing,
    registry: &SourceRegistry,
    reporter: &dyn Reporter,
) -> Vec<Node> {
    let mut nodes = Vec::with_capacity(listing.node_count());
    let mut replaced_local = false;

    for (label, mut remote_nodes) in listing.0 {
        let origin = if !replaced_local && label == LOCAL_SOURCE {
            replaced_local = true;
            hostname.to_string()
        } else {
            label
        };

        let Some((id, discovered)) = registry.resolve_entry(&origin) else {
            reporter.report(FetchEvent::OriginRejected {
                hostname: hostname.to_string(),
                origin,
                nodes: remote_nodes.len(),
            });
            continue;
        };
        if discovered {
            reporter.report(FetchEvent::SourceDiscovered {
                hostname: hostname.to_string(),
                origin,
                id,
            });
        }

        for node in &mut remote_nodes {
            node.source_id = id;
        }
        nodes.append(&mut remote_nodes);
    }

    reporter.report(FetchEvent::Fetched {
        hostname: hostname.to_string(),
        nodes: nodes.len(),
    });
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceId;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct StaticClient {
        responses: HashMap<String, Result<Vec<u8>, FetchError>>,
    }

    impl RemoteClient for StaticClient {
        fn fetch_listing<'a>(&'a self, hostname: &'a str) -> ListingFuture<'a> {
            let response = self
                .responses
                .get(hostname)
                .cloned()
                .unwrap_or_else(|| Err(FetchError::Transport("connection refused".into())));
            Box::pin(async move { response })
        }
    }

    #[derive(Default)]
    struct Events(Mutex<Vec<FetchEvent>>);

    impl Reporter for Events {
        fn report(&self, event: FetchEvent) {
            self.0.lock().push(event);
        }
    }

    fn client(hostname: &str, body: &str) -> StaticClient {
        StaticClient {
            responses: HashMap::from([(hostname.to_string(), Ok(body.as_bytes().to_vec()))]),
        }
    }

    const NODE_A: &str = r#"{"address":"ff00::1","owner_name":"a","latitude":1.0,"longitude":2.0,"status":1}"#;
    const NODE_B: &str = r#"{"address":"ff00::2","owner_name":"b","latitude":3.0,"longitude":4.0,"status":0,"source_id":9}"#;

    #[test]
    fn test_listing_url() {
        let client = HttpRemoteClient::new("api/all", Duration::from_secs(1)).unwrap();
        assert_eq!(client.listing_url("map.example/"), "http://map.example/api/all");
        assert_eq!(client.listing_url("https://map.example"), "https://map.example/api/all");
        assert_eq!(client.listing_url("127.0.0.1:8077"), "http://127.0.0.1:8077/api/all");
    }

    #[tokio::test]
    async fn test_local_label_is_attributed_to_queried_host() {
        let body = format!(r#"{{"data":{{"local":[{NODE_A},{NODE_B}],"far.example":[{NODE_A}]}},"error":null}}"#);
        let client = client("a.example", &body);
        let registry = SourceRegistry::new();
        let events = Events::default();

        let nodes = fetch_child_map(&client, "a.example", &registry, &events).await.unwrap();

        let a_id = registry.lookup("a.example").unwrap();
        let far_id = registry.lookup("far.example").unwrap();
        assert_ne!(a_id, 0);
        assert_ne!(a_id, far_id);
        let ids: Vec<SourceId> = nodes.iter().map(|n| n.source_id).collect();
        assert_eq!(ids, vec![a_id, a_id, far_id]);
        // l'ordre du payload est conservé
        assert_eq!(nodes[0].owner_name, "a");
        assert_eq!(nodes[1].owner_name, "b");

        let events = events.0.lock();
        assert_eq!(events.iter().filter(|e| matches!(e, FetchEvent::SourceDiscovered { .. })).count(), 2);
        assert_eq!(events.last(), Some(&FetchEvent::Fetched { hostname: "a.example".into(), nodes: 3 }));
    }

    #[tokio::test]
    async fn test_only_first_local_label_is_substituted() {
        let body = format!(r#"{{"data":{{"local":[{NODE_A}],"local":[{NODE_B}]}},"error":null}}"#);
        let client = client("a.example", &body);
        let registry = SourceRegistry::new();

        let nodes = fetch_child_map(&client, "a.example", &registry, &Events::default())
            .await
            .unwrap();
        assert_eq!(nodes[0].source_id, registry.lookup("a.example").unwrap());
        assert_eq!(nodes[1].source_id, 0);
    }

    #[tokio::test]
    async fn test_known_origin_resolves_to_existing_id() {
        let registry = SourceRegistry::seeded(HashMap::from([("far.example".to_string(), 3)]));
        let body = format!(r#"{{"data":{{"far.example":[{NODE_A}]}},"error":null}}"#);
        let events = Events::default();

        let nodes = fetch_child_map(&client("a.example", &body), "a.example", &registry, &events)
            .await
            .unwrap();
        assert_eq!(nodes[0].source_id, 3);
        assert_eq!(registry.len(), 2);
        assert!(!events.0.lock().iter().any(|e| matches!(e, FetchEvent::SourceDiscovered { .. })));
    }

    #[tokio::test]
    async fn test_failures_are_reported_and_skipped() {
        let registry = SourceRegistry::new();
        let events = Events::default();
        let client = StaticClient {
            responses: HashMap::from([
                ("down.example".to_string(), Err(FetchError::Status(502))),
                ("garbage.example".to_string(), Ok(b"<html>".to_vec())),
                ("sad.example".to_string(), Ok(br#"{"data":null,"error":"no database"}"#.to_vec())),
            ]),
        };

        for hostname in ["down.example", "garbage.example", "sad.example", "unknown.example"] {
            assert!(fetch_child_map(&client, hostname, &registry, &events).await.is_none());
        }

        let events = events.0.lock();
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(FetchEvent::is_skip));
        assert!(matches!(&events[0], FetchEvent::Unreachable { reason, .. } if reason.contains("502")));
        assert!(matches!(&events[1], FetchEvent::DecodeFailed { reason, .. } if reason.starts_with("decode error")));
        assert_eq!(
            events[2],
            FetchEvent::RemoteError { hostname: "sad.example".into(), message: "no database".into() }
        );
        // aucune source découverte pour des cartes sautées
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_listing_is_a_success() {
        let registry = SourceRegistry::new();
        let nodes = fetch_child_map(&client("a.example", r#"{"data":{},"error":null}"#), "a.example", &registry, &Events::default())
            .await
            .unwrap();
        assert!(nodes.is_empty());
    }

    #[tokio::test]
    async fn test_origin_without_free_id_is_dropped() {
        let registry = SourceRegistry::seeded(HashMap::from([("a.example".to_string(), SourceId::MAX)]));
        let body = format!(r#"{{"data":{{"local":[{NODE_A}],"far.example":[{NODE_A},{NODE_B}]}},"error":null}}"#);
        let events = Events::default();

        let nodes = fetch_child_map(&client("a.example", &body), "a.example", &registry, &events)
            .await
            .unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].source_id, SourceId::MAX);
        assert_eq!(registry.lookup("far.example"), None);

        let events = events.0.lock();
        assert_eq!(
            events[0],
            FetchEvent::OriginRejected { hostname: "a.example".into(), origin: "far.example".into(), nodes: 2 }
        );
        assert_eq!(events.last(), Some(&FetchEvent::Fetched { hostname: "a.example".into(), nodes: 1 }));
    }
}
