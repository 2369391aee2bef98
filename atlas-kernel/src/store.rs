/**
 * STORE - Persistance SQLite du cache des cartes filles
 *
 * RÔLE :
 * - Table `cached_maps` : correspondance persistante hostname ↔ id des sources
 * - Table `nodes_cached` : nœuds récupérés des cartes filles, écrits par batch
 *
 * FONCTIONNEMENT :
 * - CacheStore trait = interface consommée par la passe d'agrégation et l'API admin
 * - SqliteStore = implémentation rusqlite (WAL, busy timeout, une connexion sous mutex)
 * - Un batch de cache est écrit dans une seule transaction : tout ou rien
 */

use crate::error::StoreError;
use crate::models::{Node, SourceId, Status, LOCAL_SOURCE, LOCAL_SOURCE_ID};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const CACHED_MAPS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cached_maps (
        id INTEGER PRIMARY KEY,
        hostname TEXT NOT NULL UNIQUE
    )
";

pub const NODES_CACHED_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS nodes_cached (
        address TEXT NOT NULL,
        owner TEXT NOT NULL,
        lat REAL NOT NULL,
        lon REAL NOT NULL,
        status INTEGER NOT NULL,
        source INTEGER NOT NULL,
        retrieved INTEGER NOT NULL
    )
";

pub const NODES_CACHED_SOURCE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_nodes_cached_source ON nodes_cached(source)";

/// Interface de stockage consommée par le cœur d'agrégation
pub trait CacheStore: Send + Sync {
    /// hostname → id, "local" → 0 inclus
    fn source_to_id(&self) -> Result<HashMap<String, SourceId>, StoreError>;

    /// id → hostname, 0 → "local" inclus
    fn id_to_source(&self) -> Result<HashMap<SourceId, String>, StoreError>;

    fn find_source(&self, id: SourceId) -> Result<Option<String>, StoreError>;

    /// Enregistre les correspondances absentes ; retourne le nombre de lignes ajoutées
    fn save_sources(&self, sources: &[(String, SourceId)]) -> Result<usize, StoreError>;

    /// Écrit un batch de nœuds en une fois ; retourne le nombre de lignes écrites
    fn cache_nodes(&self, nodes: &[Node]) -> Result<usize, StoreError>;

    fn cached_nodes(&self) -> Result<Vec<Node>, StoreError>;

    fn clear_cache(&self) -> Result<usize, StoreError>;

    fn is_read_only(&self) -> bool {
        false
    }
}

/// Exécute un appel au store sur le pool bloquant de tokio (rusqlite est synchrone
/// et peut attendre jusqu'au busy timeout).
pub async fn run_blocking<T, F>(store: &Arc<dyn CacheStore>, op: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&dyn CacheStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || op(store.as_ref()))
        .await
        .map_err(|e| StoreError::Blocking(e.to_string()))?
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
    read_only: bool,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P, read_only: bool) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(conn, read_only)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, false)
    }

    fn from_connection(conn: Connection, read_only: bool) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;

        let store = Self {
            conn: Mutex::new(conn),
            read_only,
        };
        store.initialize_tables()?;
        Ok(store)
    }

    fn initialize_tables(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(CACHED_MAPS_SCHEMA, [])?;
        conn.execute(NODES_CACHED_SCHEMA, [])?;
        conn.execute(NODES_CACHED_SOURCE_INDEX, [])?;
        debug!("initialized cache tables");
        Ok(())
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        if self.read_only {
            Err(StoreError::ReadOnly)
        } else {
            Ok(())
        }
    }
}

impl CacheStore for SqliteStore {
    fn source_to_id(&self) -> Result<HashMap<String, SourceId>, StoreError> {
        let mut sources = HashMap::from([(LOCAL_SOURCE.to_string(), LOCAL_SOURCE_ID)]);

        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT hostname, id FROM cached_maps")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, SourceId>(1)?)))?;
        for row in rows {
            let (hostname, id) = row?;
            sources.insert(hostname, id);
        }
        Ok(sources)
    }

    fn id_to_source(&self) -> Result<HashMap<SourceId, String>, StoreError> {
        let mut sources = HashMap::from([(LOCAL_SOURCE_ID, LOCAL_SOURCE.to_string())]);

        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, hostname FROM cached_maps")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, SourceId>(0)?, row.get::<_, String>(1)?)))?;
        for row in rows {
            let (id, hostname) = row?;
            sources.insert(id, hostname);
        }
        Ok(sources)
    }

    fn find_source(&self, id: SourceId) -> Result<Option<String>, StoreError> {
        if id == LOCAL_SOURCE_ID {
            return Ok(Some(LOCAL_SOURCE.to_string()));
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT hostname FROM cached_maps WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
        Ok(rows.next().transpose()?)
    }

    fn save_sources(&self, sources: &[(String, SourceId)]) -> Result<usize, StoreError> {
        self.ensure_writable()?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO cached_maps (id, hostname) VALUES (?1, ?2)")?;
            for (hostname, id) in sources {
                if *id == LOCAL_SOURCE_ID || hostname == LOCAL_SOURCE {
                    continue;
                }
                inserted += stmt.execute(params![id, hostname])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn cache_nodes(&self, nodes: &[Node]) -> Result<usize, StoreError> {
        self.ensure_writable()?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO nodes_cached (address, owner, lat, lon, status, source, retrieved)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for node in nodes {
                stmt.execute(params![
                    node.address.to_string(),
                    node.owner_name,
                    node.latitude,
                    node.longitude,
                    node.status.code(),
                    node.source_id,
                    node.retrieved_at,
                ])?;
            }
        }
        // sans commit, le drop de la transaction annule tout le batch
        tx.commit()?;
        Ok(nodes.len())
    }

    fn cached_nodes(&self) -> Result<Vec<Node>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT address, owner, lat, lon, status, source, retrieved
             FROM nodes_cached ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, u32>(4)?,
                row.get::<_, SourceId>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;

        let mut nodes = Vec::new();
        for row in rows {
            let (address, owner, lat, lon, status, source, retrieved) = row?;
            let address: IpAddr = address
                .parse()
                .map_err(|_| StoreError::InvalidRow(format!("bad address {address:?}")))?;
            nodes.push(Node {
                address,
                owner_name: owner,
                owner_email: String::new(),
                latitude: lat,
                longitude: lon,
                status: Status::from_code(status),
                source_id: source,
                retrieved_at: retrieved,
            });
        }
        Ok(nodes)
    }

    fn clear_cache(&self) -> Result<usize, StoreError> {
        self.ensure_writable()?;
        let conn = self.conn.lock();
        Ok(conn.execute("DELETE FROM nodes_cached", [])?)
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn node(address: &str, source_id: SourceId) -> Node {
        Node {
            address: address.parse().unwrap(),
            owner_name: "nodeatlas".into(),
            owner_email: "admin@example.org".into(),
            latitude: 80.0101,
            longitude: -80.10101,
            status: Status::Possible,
            source_id,
            retrieved_at: 1_400_000_000,
        }
    }

    #[test]
    fn test_empty_store_knows_local() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.source_to_id().unwrap(), HashMap::from([("local".to_string(), 0)]));
        assert_eq!(store.id_to_source().unwrap(), HashMap::from([(0, "local".to_string())]));
        assert_eq!(store.find_source(0).unwrap().as_deref(), Some("local"));
        assert_eq!(store.find_source(9).unwrap(), None);
    }

    #[test]
    fn test_sources_round_trip_and_skip_local() {
        let store = SqliteStore::open_in_memory().unwrap();
        let saved = store
            .save_sources(&[
                ("local".to_string(), 0),
                ("a.example".to_string(), 1),
                ("b.example".to_string(), 2),
            ])
            .unwrap();
        assert_eq!(saved, 2);
        // déjà présentes : ignorées
        assert_eq!(store.save_sources(&[("a.example".to_string(), 1)]).unwrap(), 0);

        let by_name = store.source_to_id().unwrap();
        assert_eq!(by_name.len(), 3);
        assert_eq!(by_name["b.example"], 2);
        assert_eq!(store.find_source(1).unwrap().as_deref(), Some("a.example"));
    }

    #[test]
    fn test_cache_nodes_batch() {
        let store = SqliteStore::open_in_memory().unwrap();
        let nodes = vec![node("ff00::1", 1), node("10.0.0.7", 2)];
        assert_eq!(store.cache_nodes(&nodes).unwrap(), 2);

        let cached = store.cached_nodes().unwrap();
        assert_eq!(cached.len(), 2);
        assert_eq!(cached[0].address, nodes[0].address);
        assert_eq!(cached[1].source_id, 2);
        assert_eq!(cached[1].retrieved_at, 1_400_000_000);

        assert_eq!(store.clear_cache().unwrap(), 2);
        assert!(store.cached_nodes().unwrap().is_empty());
    }

    #[test]
    fn test_read_only_store_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("atlas.db");
        SqliteStore::open(&path, false).unwrap();

        let store = SqliteStore::open(&path, true).unwrap();
        assert!(store.is_read_only());
        assert!(matches!(store.cache_nodes(&[node("ff00::1", 1)]), Err(StoreError::ReadOnly)));
        assert!(matches!(store.save_sources(&[("a.example".into(), 1)]), Err(StoreError::ReadOnly)));
        assert!(matches!(store.clear_cache(), Err(StoreError::ReadOnly)));
        assert!(store.source_to_id().is_ok());
    }

    #[test]
    fn test_store_persists_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("atlas.db");
        {
            let store = SqliteStore::open(&path, false).unwrap();
            store.save_sources(&[("a.example".to_string(), 1)]).unwrap();
            store.cache_nodes(&[node("ff00::1", 1)]).unwrap();
        }
        let reopened = SqliteStore::open(&path, false).unwrap();
        assert_eq!(reopened.source_to_id().unwrap()["a.example"], 1);
        assert_eq!(reopened.cached_nodes().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_blocking_goes_through_the_store() {
        let store: Arc<dyn CacheStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let saved = run_blocking(&store, |store| store.save_sources(&[("a.example".to_string(), 1)]))
            .await
            .unwrap();
        assert_eq!(saved, 1);

        let sources = run_blocking(&store, |store| store.id_to_source()).await.unwrap();
        assert_eq!(sources[&1], "a.example");

        let err = run_blocking(&store, |_| -> Result<(), StoreError> { panic!("sqlite thread died") })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Blocking(_)));
    }
}
