//! Client SDK for DTS change-data-capture event streams.
//!
//! The SDK discovers event servers, keeps one long-lived stream per server
//! and lets callers wait until specific rows were observed downstream:
//!
//! - [`DtsClient::listen_row`] and friends resolve once matching change
//!   events arrived, or fail with [`ListenError::Timeout`].
//! - [`RowFutureBuilder`] combines several row waits, possibly across
//!   tables, into one future.
//! - [`DtsClient::add_listener`] taps every event.

mod client;
mod config;
mod constants;
mod discovery;
mod errors;
mod event;
mod listener;
mod membership;
mod stream;
pub mod metrics;
pub mod utils;

pub use client::*;
pub use config::*;
pub use discovery::*;
pub use errors::*;
pub use event::*;
pub use listener::*;
pub use membership::*;
pub use stream::*;
pub use utils::IdGenerator;
pub use utils::Scheduler;
pub use utils::TimerHandle;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;
