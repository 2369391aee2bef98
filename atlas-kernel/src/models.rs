/**
 * MODELS - Format des nœuds échangés entre cartes NodeAtlas
 *
 * RÔLE : Node (adresse, propriétaire, coordonnées, statut, source) et
 * enveloppe `{ "data": {origine: [nœuds]}, "error": ... }` servie par /api/all.
 *
 * UTILITÉ : Format commun au fetcher (décodage), au store (colonnes) et à l'API admin.
 */

use crate::error::FetchError;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::IpAddr;

/// Identifiant local d'une carte source. 0 = nœuds natifs ("local").
pub type SourceId = u32;

/// Label réservé aux nœuds natifs de la carte qui publie le listing.
pub const LOCAL_SOURCE: &str = "local";
pub const LOCAL_SOURCE_ID: SourceId = 0;

/// État opérationnel d'un nœud, transporté tel quel par le cache.
/// Sur le fil : code entier ou nom en minuscules ; sérialisé en code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StatusRepr", into = "u32")]
pub enum Status {
    Possible,
    Active,
    Inactive,
    Other(u32),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StatusRepr {
    Code(u32),
    Name(String),
}

impl Status {
    pub fn code(self) -> u32 {
        match self {
            Status::Possible => 0,
            Status::Active => 1,
            Status::Inactive => 2,
            Status::Other(code) => code,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Status::Possible,
            1 => Status::Active,
            2 => Status::Inactive,
            other => Status::Other(other),
        }
    }
}

impl From<Status> for u32 {
    fn from(status: Status) -> Self {
        status.code()
    }
}

impl TryFrom<StatusRepr> for Status {
    type Error = String;

    fn try_from(repr: StatusRepr) -> Result<Self, Self::Error> {
        match repr {
            StatusRepr::Code(code) => Ok(Status::from_code(code)),
            StatusRepr::Name(name) => match name.as_str() {
                "possible" => Ok(Status::Possible),
                "active" => Ok(Status::Active),
                "inactive" => Ok(Status::Inactive),
                other => Err(format!("unknown node status {other:?}")),
            },
        }
    }
}

/// Un nœud géolocalisé. `address` est unique au sein de sa source seulement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub address: IpAddr,
    #[serde(alias = "owner")]
    pub owner_name: String,
    #[serde(default, alias = "contact")]
    pub owner_email: String,
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lon")]
    pub longitude: f64,
    pub status: Status,
    #[serde(default)]
    pub source_id: SourceId,
    /// Timestamp unix de récupération, 0 = absent
    #[serde(default, rename = "retrieved", alias = "retrieved_at")]
    pub retrieved_at: i64,
}

/// Listing d'une carte distante groupé par origine, dans l'ordre du payload.
/// Les labels dupliqués sont conservés tels quels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OriginListing(pub Vec<(String, Vec<Node>)>);

impl OriginListing {
    pub fn node_count(&self) -> usize {
        self.0.iter().map(|(_, nodes)| nodes.len()).sum()
    }
}

impl<'de> Deserialize<'de> for OriginListing {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ListingVisitor;

        impl<'de> Visitor<'de> for ListingVisitor {
            type Value = OriginListing;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of origin labels to node lists")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut origins = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((label, nodes)) = map.next_entry::<String, Vec<Node>>()? {
                    origins.push((label, nodes));
                }
                Ok(OriginListing(origins))
            }
        }

        deserializer.deserialize_map(ListingVisitor)
    }
}

impl Serialize for OriginListing {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, nodes) in &self.0 {
            map.serialize_entry(label, nodes)?;
        }
        map.end()
    }
}

/// Enveloppe de réponse de /api/all
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NodeDump {
    #[serde(default)]
    pub data: Option<OriginListing>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl NodeDump {
    /// Décode un corps de réponse `/api/all` brut
    pub fn decode(body: &[u8]) -> Result<Self, FetchError> {
        serde_json::from_slice(body).map_err(|e| FetchError::Decode(e.to_string()))
    }

    /// Extrait le listing, ou l'erreur signalée par la carte distante
    pub fn into_listing(self) -> Result<OriginListing, FetchError> {
        match self.error {
            Some(serde_json::Value::String(msg)) => Err(FetchError::Remote(msg)),
            Some(other) => Err(FetchError::Remote(other.to_string())),
            None => Ok(self.data.unwrap_or_default()),
        }
    }
}
