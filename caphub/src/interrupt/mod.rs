//! Interrupt subsystem: suspension points awaiting a human decision.
//!
//! At most one interrupt per run is non-terminal at any time. Resolution,
//! expiry, and cancellation all signal the executor through the resume
//! channel handed out at creation.

mod service;

pub use service::{InterruptOutcome, InterruptService};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Why a run suspended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptKind {
    ApprovalRequired,
    ConfirmationRequired,
    InputRequired,
    ClarificationRequired,
    SelectionRequired,
    ConfidenceLow,
    ConflictDetected,
    ErrorOccurred,
    KnowledgeGap,
    HighRiskOperation,
    PolicyViolation,
    AnomalyDetected,
}

impl InterruptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InterruptKind::ApprovalRequired => "approval_required",
            InterruptKind::ConfirmationRequired => "confirmation_required",
            InterruptKind::InputRequired => "input_required",
            InterruptKind::ClarificationRequired => "clarification_required",
            InterruptKind::SelectionRequired => "selection_required",
            InterruptKind::ConfidenceLow => "confidence_low",
            InterruptKind::ConflictDetected => "conflict_detected",
            InterruptKind::ErrorOccurred => "error_occurred",
            InterruptKind::KnowledgeGap => "knowledge_gap",
            InterruptKind::HighRiskOperation => "high_risk_operation",
            InterruptKind::PolicyViolation => "policy_violation",
            InterruptKind::AnomalyDetected => "anomaly_detected",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl InterruptPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            InterruptPriority::Low => "low",
            InterruptPriority::Normal => "normal",
            InterruptPriority::High => "high",
            InterruptPriority::Urgent => "urgent",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptStatus {
    Pending,
    Notified,
    Viewed,
    Resolved,
    Expired,
    Cancelled,
}

impl InterruptStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InterruptStatus::Resolved | InterruptStatus::Expired | InterruptStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InterruptStatus::Pending => "pending",
            InterruptStatus::Notified => "notified",
            InterruptStatus::Viewed => "viewed",
            InterruptStatus::Resolved => "resolved",
            InterruptStatus::Expired => "expired",
            InterruptStatus::Cancelled => "cancelled",
        }
    }
}

/// What is shown to the human: message, choices, proposed action, detail bag.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InterruptPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_action: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub detail: BTreeMap<String, Value>,
}

/// Creation request from a handler.
#[derive(Clone, Debug)]
pub struct InterruptSpec {
    pub run_id: String,
    pub thread_id: Option<String>,
    pub agent_id: String,
    pub kind: InterruptKind,
    pub priority: InterruptPriority,
    pub payload: InterruptPayload,
    pub timeout_ms: u64,
}

/// Stored interrupt record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Interrupt {
    pub interrupt_id: String,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub agent_id: String,
    #[serde(rename = "type")]
    pub kind: InterruptKind,
    pub priority: InterruptPriority,
    pub status: InterruptStatus,
    pub payload: InterruptPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    pub timeout_ms: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Listing filter; all present fields must match.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct InterruptFilter {
    pub run_id: Option<String>,
    pub agent_id: Option<String>,
    pub status: Option<InterruptStatus>,
    #[serde(rename = "type")]
    pub kind: Option<InterruptKind>,
    pub limit: Option<usize>,
}

impl InterruptFilter {
    pub fn matches(&self, interrupt: &Interrupt) -> bool {
        self.run_id
            .as_ref()
            .map(|id| &interrupt.run_id == id)
            .unwrap_or(true)
            && self
                .agent_id
                .as_ref()
                .map(|id| &interrupt.agent_id == id)
                .unwrap_or(true)
            && self.status.map(|s| interrupt.status == s).unwrap_or(true)
            && self.kind.map(|k| interrupt.kind == k).unwrap_or(true)
    }
}
