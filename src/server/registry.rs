use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::NexaError;

/// A service other nodes can invoke through the RPC runtime.
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn invoke(&self, method: &str, params: Value) -> Result<Value, NexaError>;
}

/// A started service instance, owned by the registry for the life of the process.
pub type ServiceHandle = Arc<dyn RemoteService>;

/// Registry of named services reachable over the RPC runtime
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: Arc<RwLock<HashMap<String, ServiceHandle>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service under `name`. Names are never reused.
    pub async fn register(&self, name: &str, handle: ServiceHandle) -> Result<(), NexaError> {
        let mut services = self.services.write().await;
        if services.contains_key(name) {
            return Err(NexaError::registration(name, "name already registered"));
        }
        services.insert(name.to_string(), handle);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<ServiceHandle> {
        self.services.read().await.get(name).cloned()
    }

    /// Registered names, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.services.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn dispatch(
        &self,
        service: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, NexaError> {
        let handle = self
            .get(service)
            .await
            .ok_or_else(|| NexaError::protocol(format!("service {} not registered", service)))?;
        handle.invoke(method, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl RemoteService for Echo {
        async fn invoke(&self, method: &str, params: Value) -> Result<Value, NexaError> {
            Ok(json!({ "method": method, "params": params }))
        }
    }

    #[tokio::test]
    async fn test_service_registration() {
        let registry = ServiceRegistry::new();
        assert!(registry.register("echo", Arc::new(Echo)).await.is_ok());
        assert_eq!(registry.names().await, vec!["echo".to_string()]);

        match registry.register("echo", Arc::new(Echo)).await {
            Err(NexaError::ServiceRegistration { name, .. }) => assert_eq!(name, "echo"),
            other => panic!("expected a registration error, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_dispatch() {
        let registry = ServiceRegistry::new();
        registry.register("echo", Arc::new(Echo)).await.unwrap();

        let value = registry.dispatch("echo", "ping", json!(1)).await.unwrap();
        assert_eq!(value, json!({ "method": "ping", "params": 1 }));

        assert!(matches!(
            registry.dispatch("missing", "ping", Value::Null).await,
            Err(NexaError::Protocol(_))
        ));
    }
}
