//! In-process Function Registry
//!
//! A [`FunctionDispatcher`] backed by typed async closures. Each function
//! declares its argument type; the JSON schema advertised to the model is
//! generated from that type with `schemars`.

use crate::dispatcher::{DispatchError, FunctionDispatcher, FunctionSchema};
use async_trait::async_trait;
use futures::{FutureExt, future::BoxFuture};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::{collections::BTreeMap, future::Future};
use tracing::info;

type Handler = Box<dyn Fn(Value) -> BoxFuture<'static, Result<Value, DispatchError>> + Send + Sync>;

struct Registered {
    schema: FunctionSchema,
    handler: Handler,
}

/// A name-indexed set of functions the model may call.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, Registered>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, replacing any earlier function of
    /// the same name.
    ///
    /// Arguments arrive as JSON and are deserialized into `A` before the
    /// handler runs; a mismatch is reported as
    /// [`DispatchError::InvalidArguments`] without calling the handler.
    pub fn register<A, F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) -> &mut Self
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let name = name.into();
        let schema = FunctionSchema {
            name: name.clone(),
            description: description.into(),
            parameters: parameters_schema::<A>(),
        };

        let fn_name = name.clone();
        let handler: Handler = Box::new(move |args: Value| match serde_json::from_value::<A>(args) {
            Ok(args) => {
                let fut = handler(args);
                let name = fn_name.clone();
                async move {
                    fut.await.map_err(|e| DispatchError::Failed {
                        name,
                        message: e.to_string(),
                    })
                }
                .boxed()
            }
            Err(e) => futures::future::ready(Err(DispatchError::InvalidArguments(e))).boxed(),
        });

        self.functions
            .insert(name, Registered { schema, handler });
        self
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Generates the argument schema for `A`, minus the meta keys the model
/// does not accept.
fn parameters_schema<A: JsonSchema>() -> Value {
    match serde_json::to_value(schemars::schema_for!(A)) {
        Ok(Value::Object(mut map)) => {
            map.remove("$schema");
            map.remove("title");
            Value::Object(map)
        }
        _ => Value::Object(Map::new()),
    }
}

#[async_trait]
impl FunctionDispatcher for FunctionRegistry {
    async fn dispatch(&self, name: &str, arguments: &str) -> Result<String, DispatchError> {
        let registered = self
            .functions
            .get(name)
            .ok_or_else(|| DispatchError::UnknownFunction(name.to_string()))?;

        let args = if arguments.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str(arguments).map_err(DispatchError::InvalidArguments)?
        };

        info!(function = %name, "Executing function");
        let result = (registered.handler)(args).await?;
        Ok(result.to_string())
    }

    async fn schemas(&self) -> Result<Vec<FunctionSchema>, DispatchError> {
        Ok(self
            .functions
            .values()
            .map(|registered| registered.schema.clone())
            .collect())
    }
}
