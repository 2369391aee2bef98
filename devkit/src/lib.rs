/*!
# NodeAtlas DevKit - Stubs et utilitaires pour tester le cache des cartes filles

Bibliothèque facilitant les tests du kernel avec:
- Stub HTTP de carte fille (listing /api/all configurable)
- Builders de payloads `{data, error}` et de nœuds
- Reporter qui enregistre les événements de la passe
- Harness complet : store SQLite temporaire + ChildMapCache réel
*/

pub mod fixtures;
pub mod map_stub;
pub mod test_utils;

pub use fixtures::{sample_node, ListingBuilder};
pub use map_stub::{StubChildMap, StubResponse};
pub use test_utils::{unreachable_hostname, RecordingReporter, TestHarness};
