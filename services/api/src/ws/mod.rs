//! Realtime voice relay.
//!
//! - `protocol`: wire formats of the call leg, the model and the observer.
//! - `connection`: per-socket handles and writer tasks.
//! - `session` / `manager`: the session state and the actor that owns it.
//! - `relay`: audio forwarding and barge-in.
//! - `function_call`: model function calls, run off the actor.
//! - `provider`: the outbound link to the speech model.
//! - `telephony` / `observer`: the two inbound WebSocket endpoints.

pub mod connection;
pub mod function_call;
pub mod manager;
pub mod observer;
pub mod protocol;
pub mod provider;
pub mod relay;
pub mod session;
pub mod telephony;

pub use manager::{SessionHandle, SessionManager};
pub use observer::observer_handler;
pub use telephony::call_handler;
