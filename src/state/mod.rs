pub mod factory;
pub mod sled_store;
pub mod snapshot;
pub mod store;

pub use factory::{create_in_memory_store, create_store};
pub use sled_store::SledStore;
pub use snapshot::{ImportSummary, StoreSnapshot};
pub use store::{BucketFilter, InMemoryStore, SignatureStore};
