//! Runs model-requested function calls off the session actor.

use super::{connection::ConnId, manager::SessionHandle, protocol::FunctionCall};
use callbridge_core::{FunctionDispatcher, dispatch_to_json, error_json};
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span};

/// Dispatches `call` on its own task and hands the JSON result back to the
/// session, tagged with the model link that asked for it.
pub fn spawn(
    dispatcher: Arc<dyn FunctionDispatcher>,
    model_conn: ConnId,
    call: FunctionCall,
    session: SessionHandle,
) {
    let span = info_span!("function_call", function = %call.name, call_id = %call.call_id);
    tokio::spawn(
        async move {
            info!("Dispatching function call");
            let output = run_contained(dispatcher, call.name, call.arguments).await;
            session.function_output(model_conn, call.call_id, output).await;
        }
        .instrument(span),
    );
}

/// Runs the dispatcher on a nested task so a panicking tool yields an
/// error result instead of a lost call.
pub async fn run_contained(
    dispatcher: Arc<dyn FunctionDispatcher>,
    name: String,
    arguments: String,
) -> String {
    let task = tokio::spawn(
        async move { dispatch_to_json(dispatcher.as_ref(), &name, &arguments).await }
            .in_current_span(),
    );
    match task.await {
        Ok(output) => output,
        Err(e) => {
            error!(error = %e, "Function call task failed");
            error_json(&format!("Function call failed: {}", e))
        }
    }
}
