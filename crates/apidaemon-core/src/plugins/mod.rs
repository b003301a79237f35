//! Built-in plugins.
//!
//! - `math`: synchronous arithmetic
//! - `system`: liveness, time, echo and a cooperative async sleep
//! - `alerts`: lets clients send notifications (needs `use_notify`)

pub mod alerts;
pub mod math;
pub mod system;
