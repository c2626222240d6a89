//! API Models
//!
//! Response bodies of the HTTP surface, documented with `utoipa`.

use callbridge_core::FunctionSchema;
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema, Debug)]
pub struct ErrorResponse {
    pub message: String,
}

#[derive(Serialize, ToSchema, Debug, PartialEq)]
pub struct PublicUrlResponse {
    #[serde(rename = "publicUrl")]
    #[schema(example = "https://example.ngrok.app")]
    pub public_url: String,
}

/// A function the model may call, in the shape the model's `tools` list uses.
#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    #[serde(rename = "type")]
    #[schema(example = "function")]
    pub kind: String,
    pub name: String,
    pub description: String,
    #[schema(value_type = Object)]
    pub parameters: Value,
}

impl From<FunctionSchema> for ToolDescriptor {
    fn from(schema: FunctionSchema) -> Self {
        Self {
            kind: "function".to_string(),
            name: schema.name,
            description: schema.description,
            parameters: schema.parameters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_public_url_serialization() {
        let body = PublicUrlResponse {
            public_url: "https://example.ngrok.app".to_string(),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"publicUrl":"https://example.ngrok.app"}"#);
    }

    #[test]
    fn test_tool_descriptor_from_schema() {
        let schema = FunctionSchema {
            name: "get_weather_from_coords".to_string(),
            description: "Get the current weather".to_string(),
            parameters: json!({"type": "object", "properties": {"latitude": {"type": "number"}}}),
        };
        let value = serde_json::to_value(ToolDescriptor::from(schema)).unwrap();
        assert_eq!(value["type"], "function");
        assert_eq!(value["name"], "get_weather_from_coords");
        assert_eq!(value["parameters"]["properties"]["latitude"]["type"], "number");
    }

    #[test]
    fn test_error_response_serialization() {
        let error = ErrorResponse {
            message: "Session actor is not running".to_string(),
        };
        let json = serde_json::to_string(&error).unwrap();
        assert_eq!(json, r#"{"message":"Session actor is not running"}"#);
    }
}
