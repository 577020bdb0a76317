//! Sluice - Sliding-Window Admission Control
//!
//! This crate implements an admission controller that lets at most N callers
//! through per rolling time window. Callers that arrive while the window is
//! full wait in strict arrival order and are released by a background pump as
//! earlier grants age out.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod ratelimit;
