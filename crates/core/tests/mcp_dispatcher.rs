//! Drives `McpDispatcher` against an in-process MCP tool server over a duplex pipe.

use callbridge_core::{DispatchError, FunctionDispatcher, McpDispatcher, dispatch_to_json};
use rmcp::{
    ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::{ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Deserialize, JsonSchema, Debug)]
struct PatientLookupArgs {
    /// Full name of the patient.
    patient_name: String,
}

struct FrontDeskTools {
    tool_router: ToolRouter<Self>,
}

#[tool_handler]
impl ServerHandler for FrontDeskTools {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[tool_router]
impl FrontDeskTools {
    fn new() -> Self {
        Self {
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Get patient details by name.")]
    async fn get_patient_details(
        &self,
        args: Parameters<PatientLookupArgs>,
    ) -> Result<String, String> {
        if args.0.patient_name == "Nobody" {
            return Err(format!(
                "No patient found with name '{}'",
                args.0.patient_name
            ));
        }
        Ok(json!({ "name": args.0.patient_name, "allergies": ["penicillin"] }).to_string())
    }
}

async fn connect() -> McpDispatcher {
    let (server_transport, client_transport) = tokio::io::duplex(4096);
    tokio::spawn(async move {
        if let Ok(service) = FrontDeskTools::new().serve(server_transport).await {
            let _ = service.waiting().await;
        }
    });
    let client = ().serve(client_transport).await.unwrap();
    McpDispatcher::new(client)
}

#[tokio::test]
async fn test_mcp_dispatch_returns_tool_text() {
    let dispatcher = connect().await;
    let out = dispatcher
        .dispatch("get_patient_details", r#"{"patient_name":"Ada Lovelace"}"#)
        .await
        .unwrap();

    let parsed: Value = serde_json::from_str(&out).unwrap();
    assert_eq!(parsed["name"], "Ada Lovelace");
    assert_eq!(parsed["allergies"][0], "penicillin");
}

#[tokio::test]
async fn test_mcp_tool_error_becomes_failed() {
    let dispatcher = connect().await;
    let err = dispatcher
        .dispatch("get_patient_details", r#"{"patient_name":"Nobody"}"#)
        .await
        .unwrap_err();

    match err {
        DispatchError::Failed { name, message } => {
            assert_eq!(name, "get_patient_details");
            assert!(message.contains("No patient found"));
        }
        other => panic!("Expected Failed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_mcp_invalid_arguments_never_reach_server() {
    let dispatcher = connect().await;
    let err = dispatcher
        .dispatch("get_patient_details", "not json")
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidArguments(_)));
}

#[tokio::test]
async fn test_mcp_errors_render_as_error_json() {
    let dispatcher = connect().await;
    let out = dispatch_to_json(&dispatcher, "get_patient_details", r#"{"patient_name":"Nobody"}"#)
        .await;

    let parsed: Value = serde_json::from_str(&out).unwrap();
    assert!(parsed["error"].as_str().unwrap().contains("No patient found"));
}

#[tokio::test]
async fn test_mcp_schemas_list_server_tools() {
    let dispatcher = connect().await;
    let schemas = dispatcher.schemas().await.unwrap();

    assert_eq!(schemas.len(), 1);
    assert_eq!(schemas[0].name, "get_patient_details");
    assert_eq!(schemas[0].description, "Get patient details by name.");
    assert!(schemas[0].parameters["properties"]["patient_name"].is_object());
}
