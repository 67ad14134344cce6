//! One long-lived event stream per server.
mod client;
mod codec;
mod transport;

pub use client::*;
pub use codec::*;
pub use transport::*;

#[cfg(test)]
mod stream_test;
