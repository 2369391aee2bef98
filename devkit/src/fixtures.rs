/*!
Builders de payloads de listing pour les tests

Facilite la construction de réponses `/api/all`:
- Nœuds d'exemple valides
- Listings multi-origines dans un ordre contrôlé
- Réponses d'erreur distantes
*/

use anyhow::Result;
use atlas_kernel::models::{Node, NodeDump, OriginListing, Status, LOCAL_SOURCE};
use serde_json::Value;

/// Nœud valide, sans source ni horodatage
pub fn sample_node(address: &str, owner: &str) -> Node {
    Node {
        address: address.parse().expect("sample_node needs a valid IP address"),
        owner_name: owner.to_string(),
        owner_email: format!("{owner}@example.org"),
        latitude: 48.8566,
        longitude: 2.3522,
        status: Status::Active,
        source_id: 0,
        retrieved_at: 0,
    }
}

/// Construit une réponse `{ "data": {...}, "error": ... }`
#[derive(Debug, Clone, Default)]
pub struct ListingBuilder {
    origins: Vec<(String, Vec<Node>)>,
    error: Option<Value>,
}

impl ListingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nœuds natifs de la carte qui sert le listing
    pub fn local(self, nodes: Vec<Node>) -> Self {
        self.origin(LOCAL_SOURCE, nodes)
    }

    /// Nœuds que la carte a elle-même cachés depuis `label`
    pub fn origin(mut self, label: &str, nodes: Vec<Node>) -> Self {
        self.origins.push((label.to_string(), nodes));
        self
    }

    pub fn error(mut self, message: &str) -> Self {
        self.error = Some(Value::String(message.to_string()));
        self
    }

    pub fn build(&self) -> NodeDump {
        NodeDump {
            data: self.error.is_none().then(|| OriginListing(self.origins.clone())),
            error: self.error.clone(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.build())?)
    }
}
