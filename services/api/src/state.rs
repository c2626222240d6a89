//! Shared Application State
//!
//! Created once at startup and handed to every handler.

use crate::{config::Config, ws::SessionHandle};
use callbridge_core::FunctionDispatcher;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// Address of the session actor that owns the current call.
    pub session: SessionHandle,
    pub dispatcher: Arc<dyn FunctionDispatcher>,
    pub config: Arc<Config>,
}
