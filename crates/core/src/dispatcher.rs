//! Function Dispatcher Contract
//!
//! The relay only knows a function by its name and a JSON-encoded argument
//! string. Whatever sits behind [`FunctionDispatcher`] maps that pair to a
//! JSON result string.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

/// Describes one callable function the way the model expects to see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSchema {
    pub name: String,
    pub description: String,
    /// JSON schema of the argument object.
    pub parameters: Value,
}

/// Everything that can go wrong between receiving a function call and
/// producing its result.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No handler found for function: {0}")]
    UnknownFunction(String),
    #[error("Invalid JSON arguments for function call: {0}")]
    InvalidArguments(#[source] serde_json::Error),
    #[error("Error running function {name}: {message}")]
    Failed { name: String, message: String },
    #[error("Tool transport failed: {0}")]
    Transport(String),
}

/// Maps a function name plus JSON arguments to a JSON result.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FunctionDispatcher: Send + Sync {
    /// Runs the named function. `arguments` is the raw JSON text the model sent.
    async fn dispatch(&self, name: &str, arguments: &str) -> Result<String, DispatchError>;

    /// Lists the functions this dispatcher can run.
    async fn schemas(&self) -> Result<Vec<FunctionSchema>, DispatchError>;
}

/// Runs a dispatch and always yields a JSON string.
///
/// Failures are rendered as `{"error": "<message>"}` so that a broken tool
/// still produces something the model can read and respond to.
pub async fn dispatch_to_json(
    dispatcher: &dyn FunctionDispatcher,
    name: &str,
    arguments: &str,
) -> String {
    match dispatcher.dispatch(name, arguments).await {
        Ok(result) => result,
        Err(e) => {
            warn!(function = %name, error = %e, "Function dispatch failed");
            error_json(&e.to_string())
        }
    }
}

/// Builds the error-shaped result delivered in place of a tool's output.
pub fn error_json(message: &str) -> String {
    json!({ "error": message }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_to_json_passes_result_through() {
        let mut mock = MockFunctionDispatcher::new();
        mock.expect_dispatch()
            .withf(|name, args| name == "get_weather" && args == r#"{"latitude":1.0}"#)
            .times(1)
            .returning(|_, _| Ok(r#"{"temp":21.5}"#.to_string()));

        let out = dispatch_to_json(&mock, "get_weather", r#"{"latitude":1.0}"#).await;
        assert_eq!(out, r#"{"temp":21.5}"#);
    }

    #[tokio::test]
    async fn test_dispatch_to_json_renders_errors() {
        let mut mock = MockFunctionDispatcher::new();
        mock.expect_dispatch()
            .returning(|name, _| Err(DispatchError::UnknownFunction(name.to_string())));

        let out = dispatch_to_json(&mock, "teleport", "{}").await;
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(
            parsed["error"],
            "No handler found for function: teleport".to_string()
        );
    }

    #[test]
    fn test_dispatch_error_display() {
        let failed = DispatchError::Failed {
            name: "lookup".to_string(),
            message: "database offline".to_string(),
        };
        assert_eq!(
            failed.to_string(),
            "Error running function lookup: database offline"
        );

        let bad_args = serde_json::from_str::<Value>("{not json").unwrap_err();
        let invalid = DispatchError::InvalidArguments(bad_args);
        assert!(
            invalid
                .to_string()
                .starts_with("Invalid JSON arguments for function call")
        );
    }

    #[test]
    fn test_error_json_escapes_message() {
        let out = error_json("quote \" inside");
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["error"], "quote \" inside");
    }
}
