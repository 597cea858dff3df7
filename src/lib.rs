pub use crate::errors::{print_error, CompatError, Result};

pub mod catalog;
pub mod cli;
pub mod engines;
pub mod errors;
pub mod graph;
pub mod normalize;
pub mod runtime;
pub mod stats;
pub mod store;
pub mod support;
