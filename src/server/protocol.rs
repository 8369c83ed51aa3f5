use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::NexaError;

/// A call of `method` on the service registered as `service`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: Uuid,
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(service: &str, method: &str, params: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            service: service.to_string(),
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn ok(id: Uuid, result: Value) -> Self {
        Self { id, result: Some(result), error: None }
    }

    pub fn err(id: Uuid, error: impl Into<String>) -> Self {
        Self { id, result: None, error: Some(error.into()) }
    }

    pub fn into_result(self) -> Result<Value, NexaError> {
        match self.error {
            Some(error) => Err(NexaError::protocol(error)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}
