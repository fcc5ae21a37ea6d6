//! Agent record types: identity, capabilities, lifecycle, health.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HubError, HubResult};

/// Semantic version: major/minor/patch with optional pre-release and build.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub pre: Option<String>,
    pub build: Option<String>,
}

impl Version {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: None,
            build: None,
        }
    }
}

impl std::str::FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (rest, build) = match s.split_once('+') {
            Some((r, b)) => (r, Some(b.to_string())),
            None => (s, None),
        };
        let (core, pre) = match rest.split_once('-') {
            Some((c, p)) => (c, Some(p.to_string())),
            None => (rest, None),
        };
        let mut parts = core.splitn(3, '.');
        let mut next = |name: &str| -> Result<u32, String> {
            parts
                .next()
                .ok_or_else(|| format!("version missing {name}: {s}"))?
                .parse()
                .map_err(|_| format!("version has non-numeric {name}: {s}"))
        };
        Ok(Self {
            major: next("major")?,
            minor: next("minor")?,
            patch: next("patch")?,
            pre,
            build,
        })
    }
}

impl TryFrom<String> for Version {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{pre}")?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{build}")?;
        }
        Ok(())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Build metadata is ignored; release orders above its pre-releases.
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => std::cmp::Ordering::Equal,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (Some(_), None) => std::cmp::Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

/// Administrative status of an agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Inactive,
    Deprecated,
    Maintenance,
}

/// Position in the agent lifecycle cohort. Advances monotonically:
/// registered → initializing → ready → {idle ↔ running ↔ waiting} →
/// draining → stopped, with error/failed/maintenance as exits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Registered,
    Initializing,
    Ready,
    Idle,
    Running,
    Waiting,
    Interrupted,
    Draining,
    Stopped,
    Error,
    Failed,
    Maintenance,
}

impl LifecycleState {
    /// Runs may only be dispatched in these states.
    pub fn is_dispatchable(self) -> bool {
        matches!(
            self,
            LifecycleState::Ready | LifecycleState::Idle | LifecycleState::Running
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::Failed)
    }

    /// Legal forward transitions within the cohort.
    pub fn can_transition(self, to: LifecycleState) -> bool {
        use LifecycleState::*;
        if self == to {
            return true;
        }
        match self {
            Registered => matches!(to, Initializing | Error | Failed),
            Initializing => matches!(to, Ready | Error | Failed),
            Ready => matches!(to, Idle | Running | Waiting | Draining | Maintenance | Error | Failed),
            Idle => matches!(to, Running | Waiting | Draining | Maintenance | Error | Failed),
            Running => matches!(to, Idle | Waiting | Interrupted | Draining | Error | Failed),
            Waiting => matches!(to, Idle | Running | Draining | Error | Failed),
            Interrupted => matches!(to, Running | Idle | Draining | Error | Failed),
            Draining => matches!(to, Stopped | Error | Failed),
            Maintenance => matches!(to, Ready | Idle | Draining | Stopped | Error | Failed),
            Error => matches!(to, Ready | Draining | Stopped | Failed),
            Stopped | Failed => false,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleState::Registered => "registered",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Ready => "ready",
            LifecycleState::Idle => "idle",
            LifecycleState::Running => "running",
            LifecycleState::Waiting => "waiting",
            LifecycleState::Interrupted => "interrupted",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Error => "error",
            LifecycleState::Failed => "failed",
            LifecycleState::Maintenance => "maintenance",
        };
        f.write_str(s)
    }
}

/// Capability surface: domains, permitted skill actions, tool names.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub domains: BTreeSet<String>,
    #[serde(default)]
    pub actions: BTreeSet<String>,
    #[serde(default)]
    pub tools: BTreeSet<String>,
    #[serde(default)]
    pub parallel_tool_calls: bool,
    #[serde(default)]
    pub max_context_tokens: u32,
}

impl Capabilities {
    /// Union of tools and actions, the set routing capability filters check.
    pub fn grants(&self) -> BTreeSet<String> {
        self.tools.union(&self.actions).cloned().collect()
    }
}

/// What happens to a run whose interrupt expires unresolved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptTimeoutPolicy {
    /// Run fails with `CAP_INTERRUPT_EXPIRED`.
    #[default]
    Fail,
    /// Run resumes with a null response.
    ContinueWithout,
}

/// Feature flags and per-agent execution limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extensions {
    #[serde(default = "default_true")]
    pub supports_threads: bool,
    #[serde(default = "default_true")]
    pub supports_interrupts: bool,
    #[serde(default)]
    pub supports_streaming: bool,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_runs: u32,
    #[serde(default = "default_timeout")]
    pub default_timeout_ms: u64,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub on_interrupt_timeout: InterruptTimeoutPolicy,
}

fn default_true() -> bool {
    true
}
fn default_max_concurrent() -> u32 {
    4
}
fn default_timeout() -> u64 {
    60_000
}

impl Default for Extensions {
    fn default() -> Self {
        Self {
            supports_threads: true,
            supports_interrupts: true,
            supports_streaming: false,
            max_concurrent_runs: default_max_concurrent(),
            default_timeout_ms: default_timeout(),
            requires_approval: false,
            on_interrupt_timeout: InterruptTimeoutPolicy::Fail,
        }
    }
}

/// Composite health verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthState {
    /// Sort rank for discovery: healthy first.
    pub fn rank(self) -> u8 {
        match self {
            HealthState::Healthy => 0,
            HealthState::Unknown => 1,
            HealthState::Degraded => 2,
            HealthState::Unhealthy => 3,
        }
    }
}

/// One component-level check result inside a health snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub ok: bool,
    pub critical: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Health snapshot for one agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub avg_latency_ms: u64,
    pub success_rate: f64,
    pub active_runs: u32,
    pub queued_runs: u32,
    #[serde(default)]
    pub components: Vec<ComponentCheck>,
    pub checked_at: DateTime<Utc>,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            status: HealthState::Unknown,
            avg_latency_ms: 0,
            success_rate: 1.0,
            active_runs: 0,
            queued_runs: 0,
            components: Vec::new(),
            checked_at: Utc::now(),
        }
    }
}

/// Registration request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentSpec {
    pub agent_id: String,
    pub version: Version,
    #[serde(default = "default_system")]
    pub system: String,
    #[serde(default = "default_agent_type", rename = "type")]
    pub agent_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub extensions: Extensions,
}

fn default_system() -> String {
    "default".to_string()
}
fn default_agent_type() -> String {
    "generic".to_string()
}

impl AgentSpec {
    pub fn validate(&self) -> HubResult<()> {
        if self.agent_id.trim().is_empty() {
            return Err(HubError::invalid("agent_id must not be empty"));
        }
        if self
            .agent_id
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'))
        {
            return Err(HubError::invalid(format!(
                "agent_id has invalid characters: {}",
                self.agent_id
            )));
        }
        Ok(())
    }
}

/// Stored agent record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub version: Version,
    pub system: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: AgentStatus,
    pub lifecycle_state: LifecycleState,
    pub capabilities: Capabilities,
    pub extensions: Extensions,
    #[serde(default)]
    pub routing_weight: i32,
    #[serde(default)]
    pub health: HealthStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn from_spec(spec: AgentSpec) -> Self {
        let now = Utc::now();
        Self {
            agent_id: spec.agent_id,
            version: spec.version,
            system: spec.system,
            agent_type: spec.agent_type,
            description: spec.description,
            status: AgentStatus::Active,
            lifecycle_state: LifecycleState::Registered,
            capabilities: spec.capabilities,
            extensions: spec.extensions,
            routing_weight: 0,
            health: HealthStatus::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update applied by `AgentRegistry::update`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AgentPatch {
    pub status: Option<AgentStatus>,
    pub lifecycle_state: Option<LifecycleState>,
    pub description: Option<String>,
    pub capabilities: Option<Capabilities>,
    pub extensions: Option<Extensions>,
    pub routing_weight: Option<i32>,
}

impl AgentPatch {
    pub fn apply(&self, agent: &mut Agent) -> HubResult<()> {
        if let Some(state) = self.lifecycle_state {
            if !agent.lifecycle_state.can_transition(state) {
                return Err(HubError::invalid(format!(
                    "lifecycle cannot move {} -> {}",
                    agent.lifecycle_state, state
                )));
            }
            agent.lifecycle_state = state;
        }
        if let Some(status) = self.status {
            agent.status = status;
        }
        if let Some(description) = &self.description {
            agent.description = Some(description.clone());
        }
        if let Some(capabilities) = &self.capabilities {
            agent.capabilities = capabilities.clone();
        }
        if let Some(extensions) = &self.extensions {
            agent.extensions = extensions.clone();
        }
        if let Some(weight) = self.routing_weight {
            agent.routing_weight = weight;
        }
        Ok(())
    }
}

/// Discovery filter; all present fields must match.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DiscoverCriteria {
    pub system: Option<String>,
    #[serde(rename = "type")]
    pub agent_type: Option<String>,
    pub status: Option<AgentStatus>,
    pub domain: Option<String>,
    pub tool: Option<String>,
    pub supports_threads: Option<bool>,
    pub supports_interrupts: Option<bool>,
    pub supports_streaming: Option<bool>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl DiscoverCriteria {
    pub fn matches(&self, agent: &Agent) -> bool {
        if let Some(system) = &self.system {
            if &agent.system != system {
                return false;
            }
        }
        if let Some(agent_type) = &self.agent_type {
            if &agent.agent_type != agent_type {
                return false;
            }
        }
        if let Some(status) = self.status {
            if agent.status != status {
                return false;
            }
        }
        if let Some(domain) = &self.domain {
            if !agent.capabilities.domains.contains(domain) {
                return false;
            }
        }
        if let Some(tool) = &self.tool {
            if !agent.capabilities.tools.contains(tool) {
                return false;
            }
        }
        for (want, has) in [
            (self.supports_threads, agent.extensions.supports_threads),
            (self.supports_interrupts, agent.extensions.supports_interrupts),
            (self.supports_streaming, agent.extensions.supports_streaming),
        ] {
            if let Some(want) = want {
                if want != has {
                    return false;
                }
            }
        }
        true
    }
}
