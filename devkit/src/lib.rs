/*!
# ClusterDash DevKit - Doubles de test pour la couche de corrélation

Bibliothèque facilitant les tests de bout en bout de `clusterdash` sans gateway réelle:
- Gateway WebSocket simulée (trames sortantes enregistrées, réponses et broadcasts injectés)
- Fixtures JSON des messages de la gateway
- Fetchers de polling pilotés à la main pour rejouer les courses
*/

pub mod mock_gateway;
pub mod test_utils;

pub use mock_gateway::{GatewayMessageBuilder, MockGateway, RecordedFrame};
pub use test_utils::{ControlledFetcher, TestHarness};
