//! Live server set shared between discovery and the stream clients.
mod instance;
mod store;

pub use instance::*;
pub use store::*;
