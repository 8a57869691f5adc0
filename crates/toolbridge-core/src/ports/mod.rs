//! Port definitions for the stdio bridge.

mod error;
mod store;

pub use error::BridgeError;
pub use store::{ConfigurationStore, StoreError};
