//! Shared fixtures for unit tests: change record builders and in-memory
//! stand-ins for the network collaborators.
mod common;
mod mock;

pub(crate) use common::*;
pub(crate) use mock::*;
