//! Event fan-out and row correlation.
//!
//! Every decoded [`DmlEvent`](crate::DmlEvent) is broadcast through the
//! [`ListenerRegistry`]. Row listeners count matching rows and resolve a
//! [`ListenFuture`] exactly once, either with the hit list or with a
//! [`ListenError`](crate::ListenError).
mod builder;
mod completion;
mod filters;
mod registry;
mod row_listener;

pub use builder::*;
pub use completion::*;
pub use filters::*;
pub use registry::*;
pub use row_listener::*;
