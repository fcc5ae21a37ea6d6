//! Routing: map a run's input to the most appropriate handler.
//!
//! Phases: explicit operation (confidence 1.0) → capability filter →
//! pattern detection over the input shape → selection by priority, version,
//! name. The reason string records the selecting phase for observability; it
//! is never used for control flow.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::handler::{HandlerRegistry, OperationKind, StepHandler};
use crate::registry::Agent;
use crate::run::RunInput;

#[derive(Clone, Copy, Debug)]
pub struct RouterConfig {
    /// Routing returns none below this confidence.
    pub min_confidence: f64,
    /// When set, drop candidates whose required capabilities the agent lacks.
    pub capability_routing: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            capability_routing: true,
        }
    }
}

/// The routing verdict: which handler, how confident, and why.
#[derive(Clone)]
pub struct RouteDecision {
    pub handler: Arc<dyn StepHandler>,
    pub operation: OperationKind,
    pub confidence: f64,
    pub reason: String,
}

impl std::fmt::Debug for RouteDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteDecision")
            .field("handler", &self.handler.metadata().name)
            .field("operation", &self.operation)
            .field("confidence", &self.confidence)
            .field("reason", &self.reason)
            .finish()
    }
}

#[derive(Clone)]
pub struct Router {
    registry: HandlerRegistry,
    config: RouterConfig,
}

/// Infer the operation from the input shape when no explicit operation is
/// present. Returns (operation, confidence).
fn detect(payload: &Map<String, Value>) -> Option<(OperationKind, f64)> {
    let has = |key: &str| payload.contains_key(key);
    if has("text") && has("categories") {
        return Some((OperationKind::Classification, 0.95));
    }
    if has("text") && has("schema") {
        return Some((OperationKind::Extraction, 0.95));
    }
    if (has("query") || has("question")) && has("context_ids") {
        return Some((OperationKind::Rag, 0.90));
    }
    if has("question") {
        return Some((OperationKind::Reasoning, 0.70));
    }
    if has("query") {
        return Some((OperationKind::Rag, 0.60));
    }
    if has("message") || has("request") {
        return Some((OperationKind::Generic, 0.50));
    }
    None
}

impl Router {
    pub fn new(registry: HandlerRegistry, config: RouterConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Returns the winning handler with confidence and reason, or `None`.
    pub fn route(&self, input: &RunInput, agent: &Agent) -> Option<RouteDecision> {
        let (operation, confidence, reason) = match input.operation {
            Some(op) => (op, 1.0, format!("explicit operation {op}")),
            None => {
                let (op, confidence) = detect(&input.payload)?;
                (op, confidence, format!("pattern {op} ({confidence:.2})"))
            }
        };
        if confidence < self.config.min_confidence {
            tracing::debug!(%operation, confidence, "routing below confidence floor");
            return None;
        }

        let mut candidates = self.registry.by_operation(operation);
        if self.config.capability_routing {
            let grants = agent.capabilities.grants();
            candidates.retain(|h| {
                h.metadata()
                    .required_capabilities
                    .iter()
                    .all(|cap| grants.contains(cap))
            });
        }
        candidates.sort_by(|a, b| {
            let (a, b) = (a.metadata(), b.metadata());
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.version.cmp(&a.version))
                .then_with(|| a.name.cmp(&b.name))
        });
        let handler = candidates.into_iter().next()?;
        Some(RouteDecision {
            handler,
            operation,
            confidence,
            reason,
        })
    }
}
