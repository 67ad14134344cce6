//! Change records carried by the event stream and the line protocol that
//! frames them.
mod dml;
mod parser;

pub use dml::*;
pub(crate) use parser::*;
