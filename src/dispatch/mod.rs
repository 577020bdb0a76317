//! Batch dispatch of units of work through an admission gate.

mod runner;

pub use runner::{DispatchReport, Dispatcher};
