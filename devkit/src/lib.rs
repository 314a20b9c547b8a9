/*!
# Bridge DevKit - Doubles de test pour le bridge Memfault

Bibliothèque facilitant le test du pipeline de dispatch avec:
- Backend Memfault simulé (aucun appel réseau)
- Builders de batches hub (chunks, twin, non routables)
- Harness avec expectations sur les requêtes sortantes
*/

pub mod mock_backend;
pub mod batch_builders;
pub mod test_utils;

pub use mock_backend::MockBackend;
pub use batch_builders::{BatchBuilder, Responses};
pub use test_utils::TestHarness;
