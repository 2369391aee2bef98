/**
 * AGGREGATOR - Fan-out concurrent vers toutes les cartes filles
 *
 * RÔLE : Une tâche tokio par hostname configuré ; chaque tâche exécute le
 * fetcher puis ajoute son résultat partiel à la collection commune sous un
 * mutex dédié (distinct du verrou du registre des sources).
 *
 * FONCTIONNEMENT :
 * - Barrière de fin = canal mpsc borné de capacité n ; chaque tâche envoie
 *   exactement un signal, depuis un guard, même si elle ne récupère rien ou panique
 * - L'agrégateur attend n signaux puis rend la collection fusionnée
 * - Aucun échec individuel ne fait échouer la passe
 */

use crate::fetcher::{fetch_child_map, RemoteClient};
use crate::models::Node;
use crate::report::Reporter;
use crate::sources::SourceRegistry;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Résultat d'une fusion : nœuds dans l'ordre d'arrivée des cartes
#[derive(Debug, Default)]
pub struct Aggregation {
    pub nodes: Vec<Node>,
    /// Cartes dont le listing a été récupéré et localisé
    pub fetched: Vec<String>,
    /// Cartes sautées pour cette passe
    pub skipped: Vec<String>,
}

struct Completion {
    hostname: String,
    fetched: bool,
}

/// Envoie le signal de fin de sa tâche à la destruction, panic compris
struct CompletionSignal {
    tx: mpsc::Sender<Completion>,
    hostname: String,
    fetched: bool,
}

impl Drop for CompletionSignal {
    fn drop(&mut self) {
        // capacité du canal = nombre de tâches, try_send ne peut pas saturer
        let completion = Completion {
            hostname: std::mem::take(&mut self.hostname),
            fetched: self.fetched,
        };
        if self.tx.try_send(completion).is_err() {
            error!("[cache] completion signal lost");
        }
    }
}

pub async fn aggregate(
    hostnames: &[String],
    client: Arc<dyn RemoteClient>,
    registry: Arc<SourceRegistry>,
    reporter: Arc<dyn Reporter>,
) -> Aggregation {
    let mut aggregation = Aggregation::default();
    if hostnames.is_empty() {
        return aggregation;
    }

    let merged: Arc<Mutex<Vec<Node>>> = Arc::new(Mutex::new(Vec::new()));
    let (tx, mut rx) = mpsc::channel::<Completion>(hostnames.len());

    for hostname in hostnames {
        let signal = CompletionSignal {
            tx: tx.clone(),
            hostname: hostname.clone(),
            fetched: false,
        };
        let hostname = hostname.clone();
        let client = Arc::clone(&client);
        let registry = Arc::clone(&registry);
        let reporter = Arc::clone(&reporter);
        let merged = Arc::clone(&merged);

        tokio::spawn(async move {
            let mut signal = signal;
            if let Some(nodes) = fetch_child_map(client.as_ref(), &hostname, &registry, reporter.as_ref()).await {
                merged.lock().extend(nodes);
                signal.fetched = true;
            }
            drop(signal);
        });
    }
    drop(tx);

    debug!("[cache] waiting for {} child map fetches", hostnames.len());
    for _ in 0..hostnames.len() {
        let Some(completion) = rx.recv().await else {
            // tous les émetteurs sont détruits : plus aucun signal possible
            break;
        };
        if completion.fetched {
            aggregation.fetched.push(completion.hostname);
        } else {
            aggregation.skipped.push(completion.hostname);
        }
    }

    aggregation.nodes = std::mem::take(&mut *merged.lock());
    aggregation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::fetcher::ListingFuture;
    use crate::report::FetchEvent;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn listing(owner: &str) -> Vec<u8> {
        format!(
            r#"{{"data":{{"local":[{{"address":"10.0.0.1","owner_name":"{owner}","latitude":0.5,"longitude":0.5,"status":1}}]}},"error":null}}"#
        )
        .into_bytes()
    }

    /// Hostnames commençant par "down" échouent, "panic" panique, "slow" attend
    #[derive(Default)]
    struct ScriptedClient {
        calls: AtomicUsize,
    }

    impl RemoteClient for ScriptedClient {
        fn fetch_listing<'a>(&'a self, hostname: &'a str) -> ListingFuture<'a> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if hostname.starts_with("down") {
                    return Err(FetchError::Transport("connection refused".into()));
                }
                if hostname.starts_with("panic") {
                    panic!("client exploded");
                }
                if hostname.starts_with("slow") {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Ok(listing(hostname))
            })
        }
    }

    /// Ne répond que lorsque toutes les requêtes attendues sont en vol
    struct BarrierClient {
        barrier: tokio::sync::Barrier,
    }

    impl RemoteClient for BarrierClient {
        fn fetch_listing<'a>(&'a self, hostname: &'a str) -> ListingFuture<'a> {
            Box::pin(async move {
                self.barrier.wait().await;
                Ok(listing(hostname))
            })
        }
    }

    #[derive(Default)]
    struct Events(parking_lot::Mutex<Vec<FetchEvent>>);

    impl Reporter for Events {
        fn report(&self, event: FetchEvent) {
            self.0.lock().push(event);
        }
    }

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|h| h.to_string()).collect()
    }

    #[tokio::test]
    async fn test_two_remotes_round_trip() {
        let registry = Arc::new(SourceRegistry::new());
        let result = aggregate(
            &hosts(&["a.example", "b.example"]),
            Arc::new(ScriptedClient::default()),
            Arc::clone(&registry),
            Arc::new(Events::default()),
        )
        .await;

        assert_eq!(result.nodes.len(), 2);
        assert_eq!(registry.len(), 3);
        let a = registry.lookup("a.example").unwrap();
        let b = registry.lookup("b.example").unwrap();
        assert!(a > 0 && b > 0 && a != b);

        let by_owner: HashSet<(String, u32)> = result
            .nodes
            .iter()
            .map(|n| (n.owner_name.clone(), n.source_id))
            .collect();
        assert!(by_owner.contains(&("a.example".to_string(), a)));
        assert!(by_owner.contains(&("b.example".to_string(), b)));
    }

    #[tokio::test]
    async fn test_failures_do_not_block_the_pass() {
        let client = Arc::new(ScriptedClient::default());
        let events = Arc::new(Events::default());
        let names = hosts(&["a.example", "down1.example", "slow.example", "panic.example", "down2.example"]);

        let result = aggregate(&names, client.clone(), Arc::new(SourceRegistry::new()), events.clone()).await;

        assert_eq!(client.calls.load(Ordering::SeqCst), names.len());
        assert_eq!(result.fetched.len() + result.skipped.len(), names.len());
        let fetched: HashSet<&str> = result.fetched.iter().map(String::as_str).collect();
        assert_eq!(fetched, HashSet::from(["a.example", "slow.example"]));
        assert_eq!(result.nodes.len(), 2);
        assert_eq!(events.0.lock().iter().filter(|e| e.is_skip()).count(), 2);
    }

    #[tokio::test]
    async fn test_all_remotes_are_queried_concurrently() {
        let names: Vec<String> = (0..6).map(|i| format!("map{i}.example")).collect();
        let client = Arc::new(BarrierClient {
            barrier: tokio::sync::Barrier::new(names.len()),
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            aggregate(&names, client, Arc::new(SourceRegistry::new()), Arc::new(Events::default())),
        )
        .await
        .expect("fetches should run concurrently");
        assert_eq!(result.nodes.len(), names.len());
    }

    #[tokio::test]
    async fn test_same_origin_from_many_remotes_gets_one_id() {
        // chaque carte republie les nœuds de "shared.example"
        struct SharedClient;
        impl RemoteClient for SharedClient {
            fn fetch_listing<'a>(&'a self, _hostname: &'a str) -> ListingFuture<'a> {
                Box::pin(async move {
                    Ok(br#"{"data":{"shared.example":[{"address":"ff00::9","owner_name":"s","latitude":0,"longitude":0,"status":0}]},"error":null}"#.to_vec())
                })
            }
        }

        let registry = Arc::new(SourceRegistry::new());
        let names: Vec<String> = (0..10).map(|i| format!("map{i}.example")).collect();
        let result = aggregate(&names, Arc::new(SharedClient), Arc::clone(&registry), Arc::new(Events::default())).await;

        assert_eq!(result.nodes.len(), 10);
        assert!(result.nodes.iter().all(|n| n.source_id == 1));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_no_remotes() {
        let result = aggregate(
            &[],
            Arc::new(ScriptedClient::default()),
            Arc::new(SourceRegistry::new()),
            Arc::new(Events::default()),
        )
        .await;
        assert!(result.nodes.is_empty());
        assert!(result.fetched.is_empty() && result.skipped.is_empty());
    }
}
