//! Network protection module
//!
//! Guards the node against abusive remote hosts.

pub mod throttle;

pub use throttle::{BoundedHostSet, HostThrottle};
