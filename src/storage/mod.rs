pub mod local_store;
pub mod resource_index;

pub use local_store::LocalStore;
pub use resource_index::{ClientRecord, ResourceIndex};
