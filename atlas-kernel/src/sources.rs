/**
 * SOURCE REGISTRY - Table hostname ↔ id des cartes sources
 *
 * RÔLE : Attribue à chaque carte source découverte un petit entier stable.
 * L'id 0 est réservé aux nœuds natifs ("local") et n'est jamais réattribué.
 *
 * CONCURRENCE : Partagé par référence entre toutes les tâches fetcher d'une passe.
 * Lecture sous read lock ; en cas d'absence, write lock puis re-vérification
 * avant allocation pour qu'une même carte découverte par deux tâches n'obtienne
 * qu'un seul id.
 */

use crate::models::{SourceId, LOCAL_SOURCE, LOCAL_SOURCE_ID};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct SourceTable {
    by_name: HashMap<String, SourceId>,
    by_id: BTreeMap<SourceId, String>,
    /// Entrées allouées depuis le dernier seed, dans l'ordre d'allocation
    discovered: Vec<(String, SourceId)>,
}

impl SourceTable {
    fn insert(&mut self, hostname: String, id: SourceId) {
        self.by_name.insert(hostname.clone(), id);
        self.by_id.insert(id, hostname);
    }

    /// `None` une fois `SourceId::MAX` attribué : on ne revient jamais vers 0
    fn next_id(&self) -> Option<SourceId> {
        // by_id contient toujours 0, donc le résultat est >= 1
        self.by_id.keys().next_back().map_or(Some(1), |max| max.checked_add(1))
    }
}

#[derive(Debug)]
pub struct SourceRegistry {
    table: RwLock<SourceTable>,
}

impl SourceRegistry {
    /// Registre contenant uniquement "local" → 0
    pub fn new() -> Self {
        Self::seeded(HashMap::new())
    }

    pub fn seeded(initial: HashMap<String, SourceId>) -> Self {
        let mut registry = Self {
            table: RwLock::new(SourceTable::default()),
        };
        registry.seed(initial);
        registry
    }

    /// Installe la table de base (typiquement chargée depuis le store).
    /// `&mut self` : impossible pendant qu'une passe partage le registre.
    pub fn seed(&mut self, initial: HashMap<String, SourceId>) {
        let table = self.table.get_mut();
        *table = SourceTable::default();
        table.insert(LOCAL_SOURCE.to_string(), LOCAL_SOURCE_ID);

        let mut rows: Vec<(String, SourceId)> = initial.into_iter().collect();
        rows.sort_by_key(|(_, id)| *id);

        for (hostname, id) in rows {
            if hostname == LOCAL_SOURCE || id == LOCAL_SOURCE_ID {
                if hostname != LOCAL_SOURCE || id != LOCAL_SOURCE_ID {
                    warn!("ignoring reserved source mapping {hostname:?} -> {id}");
                }
                continue;
            }
            if let Some(owner) = table.by_id.get(&id) {
                warn!("ignoring source {hostname:?}: id {id} already belongs to {owner:?}");
                continue;
            }
            table.insert(hostname, id);
        }
    }

    /// Retourne l'id de `hostname`, en l'allouant s'il est inconnu.
    /// `None` si l'espace des ids est épuisé.
    pub fn resolve(&self, hostname: &str) -> Option<SourceId> {
        self.resolve_entry(hostname).map(|(id, _)| id)
    }

    /// Comme `resolve`, avec `true` si l'appel vient d'allouer l'id
    pub fn resolve_entry(&self, hostname: &str) -> Option<(SourceId, bool)> {
        if let Some(id) = self.table.read().by_name.get(hostname) {
            return Some((*id, false));
        }

        let mut table = self.table.write();
        // une autre tâche a pu allouer entre les deux verrous
        if let Some(id) = table.by_name.get(hostname) {
            return Some((*id, false));
        }

        let Some(id) = table.next_id() else {
            warn!("cannot allocate an id for {hostname:?}: id space exhausted");
            return None;
        };
        table.insert(hostname.to_string(), id);
        table.discovered.push((hostname.to_string(), id));
        debug!("discovered new source map {hostname:?}, id {id}");
        Some((id, true))
    }

    pub fn lookup(&self, hostname: &str) -> Option<SourceId> {
        self.table.read().by_name.get(hostname).copied()
    }

    pub fn hostname(&self, id: SourceId) -> Option<String> {
        self.table.read().by_id.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.table.read().by_id.len()
    }

    /// Jamais vide : "local" est toujours présent
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Toutes les entrées, triées par id
    pub fn snapshot(&self) -> Vec<(String, SourceId)> {
        self.table
            .read()
            .by_id
            .iter()
            .map(|(id, hostname)| (hostname.clone(), *id))
            .collect()
    }

    pub fn discovered(&self) -> Vec<(String, SourceId)> {
        self.table.read().discovered.clone()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
