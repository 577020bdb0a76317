//! Sliding-window admission control.

mod backend;
mod limiter;
mod waiter;
mod window;

pub use backend::Admission;
pub use limiter::WindowLimiter;
