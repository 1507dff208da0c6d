//! Access control and rate limiting for plugin-based chat bots.
//!
//! Warden decides, for every inbound event, whether the targeted
//! handler may run. The decision combines subject-scoped enable/disable
//! state, weighted roles, allow-policies, and per-scope rate limiters,
//! evaluated concurrently by the [`controller::Controller`] pipeline.

pub mod access;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod limiter;
pub mod registry;
pub mod store;
pub mod subject;

pub use controller::{Controller, Verdict};
pub use error::{Result, WardenError};
