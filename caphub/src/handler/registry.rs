//! Handler catalog: insertion with duplicate rejection, lookup by operation.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{ErrorCode, HubError, HubResult};
use crate::handler::{HandlerMetadata, OperationKind, StepHandler};

/// Process-local handler catalog, keyed by `name@version`.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<DashMap<String, Arc<dyn StepHandler>>>,
}

fn key(meta: &HandlerMetadata) -> String {
    format!("{}@{}", meta.name, meta.version)
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a handler; duplicate `name + version` is rejected.
    pub fn register(&self, handler: Arc<dyn StepHandler>) -> HubResult<()> {
        let key = key(handler.metadata());
        match self.handlers.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(HubError::new(
                ErrorCode::HandlerConflict,
                format!("handler already registered: {key}"),
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                tracing::debug!(handler = %key, "handler registered");
                slot.insert(handler);
                Ok(())
            }
        }
    }

    /// All handlers advertising the given operation.
    pub fn by_operation(&self, operation: OperationKind) -> Vec<Arc<dyn StepHandler>> {
        self.handlers
            .iter()
            .filter(|h| h.metadata().operation == operation)
            .map(|h| h.clone())
            .collect()
    }

    pub fn list(&self) -> Vec<HandlerMetadata> {
        self.handlers.iter().map(|h| h.metadata().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerOutput;
    use crate::registry::Version;
    use crate::run::ExecutionContext;
    use async_trait::async_trait;

    pub(crate) struct StaticHandler {
        meta: HandlerMetadata,
    }

    impl StaticHandler {
        pub(crate) fn new(name: &str, version: &str, operation: OperationKind, priority: i32) -> Self {
            Self {
                meta: HandlerMetadata {
                    name: name.into(),
                    version: version.parse().unwrap(),
                    operation,
                    description: String::new(),
                    required_capabilities: Default::default(),
                    priority,
                },
            }
        }
    }

    #[async_trait]
    impl StepHandler for StaticHandler {
        fn metadata(&self) -> &HandlerMetadata {
            &self.meta
        }

        async fn execute(&self, _ctx: &ExecutionContext) -> crate::error::HubResult<HandlerOutput> {
            Ok(HandlerOutput::text("static"))
        }
    }

    #[test]
    fn register_and_lookup_by_operation() {
        let reg = HandlerRegistry::new();
        reg.register(Arc::new(StaticHandler::new("rag-a", "1.0.0", OperationKind::Rag, 50)))
            .unwrap();
        reg.register(Arc::new(StaticHandler::new(
            "think",
            "1.0.0",
            OperationKind::Reasoning,
            10,
        )))
        .unwrap();
        assert_eq!(reg.by_operation(OperationKind::Rag).len(), 1);
        assert_eq!(reg.by_operation(OperationKind::ToolCall).len(), 0);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn duplicate_name_version_rejected() {
        let reg = HandlerRegistry::new();
        reg.register(Arc::new(StaticHandler::new("rag-a", "1.0.0", OperationKind::Rag, 50)))
            .unwrap();
        let err = reg
            .register(Arc::new(StaticHandler::new("rag-a", "1.0.0", OperationKind::Rag, 60)))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::HandlerConflict);
        // same name, new version is fine
        reg.register(Arc::new(StaticHandler::new("rag-a", "1.1.0", OperationKind::Rag, 60)))
            .unwrap();
        assert_eq!(reg.len(), 2);

        let version_key = Version::new(1, 1, 0).to_string();
        assert!(reg.list().iter().any(|m| m.version.to_string() == version_key));
    }
}
