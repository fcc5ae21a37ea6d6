//! Write-through persistence seam for agent records.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::HubResult;
use crate::registry::types::Agent;

/// Backing store for agent records. Single-entity writes must be durable
/// before the call returns (the registry's write-through contract).
#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn put(&self, agent: &Agent) -> HubResult<()>;
    async fn delete(&self, agent_id: &str) -> HubResult<()>;
    async fn load_all(&self) -> HubResult<Vec<Agent>>;
}

/// In-memory store: the local-mode default and the test double.
#[derive(Default)]
pub struct MemoryAgentStore {
    agents: DashMap<String, Agent>,
}

impl MemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentStore for MemoryAgentStore {
    async fn put(&self, agent: &Agent) -> HubResult<()> {
        self.agents.insert(agent.agent_id.clone(), agent.clone());
        Ok(())
    }

    async fn delete(&self, agent_id: &str) -> HubResult<()> {
        self.agents.remove(agent_id);
        Ok(())
    }

    async fn load_all(&self) -> HubResult<Vec<Agent>> {
        Ok(self.agents.iter().map(|a| a.clone()).collect())
    }
}
