//! Callbridge API Library Crate
//!
//! Everything the `callbridge` binary serves: configuration, shared state,
//! the HTTP handlers and router, and the realtime voice relay under `ws`.
//! The binary itself only wires these together.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
