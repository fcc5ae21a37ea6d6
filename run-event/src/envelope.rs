//! Envelope (run_id, seq) stamped on each run-scoped event.
//!
//! EnvelopeState hands out the per-run monotonic sequence so events for one
//! run are totally ordered on the wire regardless of which worker published.

use crate::event::RunEvent;
use serde_json::Value;

/// Envelope fields applied to each run-scoped event.
#[derive(Clone, Debug, Default)]
pub struct Envelope {
    /// Run this event belongs to; constant within a stream.
    pub run_id: Option<String>,
    /// Per-run sequence number; monotonically increasing within a run.
    pub seq: Option<u64>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_run_id(mut self, id: impl Into<String>) -> Self {
        self.run_id = Some(id.into());
        self
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Merges envelope fields into the given JSON object (top-level only).
    /// Does not overwrite existing keys.
    pub fn inject_into(&self, obj: &mut Value) {
        let Some(obj) = obj.as_object_mut() else {
            return;
        };
        if let Some(ref id) = self.run_id {
            obj.entry("run_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(seq) = self.seq {
            obj.entry("seq")
                .or_insert_with(|| Value::Number(serde_json::Number::from(seq)));
        }
    }
}

/// Envelope state for one run: run id plus the next sequence number.
#[derive(Debug)]
pub struct EnvelopeState {
    pub run_id: String,
    next_seq: u64,
}

impl EnvelopeState {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            next_seq: 1,
        }
    }

    /// Stamps the envelope into the event value and advances the sequence.
    pub fn inject_into(&mut self, value: &mut Value) {
        let env = Envelope::new()
            .with_run_id(&self.run_id)
            .with_seq(self.next_seq);
        self.next_seq += 1;
        env.inject_into(value);
    }

    /// Sequence number the next event will carry.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }
}

/// Converts an event to JSON and stamps the envelope using the given state.
pub fn to_json(event: &RunEvent, state: &mut EnvelopeState) -> Result<Value, serde_json::Error> {
    let mut value = event.to_value()?;
    state.inject_into(&mut value);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_inject_does_not_overwrite() {
        let mut obj = serde_json::json!({"type":"token","run_id":"run-orig"});
        let env = Envelope::new().with_run_id("run-other").with_seq(7);
        env.inject_into(&mut obj);
        assert_eq!(obj["run_id"], "run-orig");
        assert_eq!(obj["seq"], 7);
    }

    #[test]
    fn state_stamps_monotonic_seq() {
        let mut state = EnvelopeState::new("run-9");
        let ev = RunEvent::Token {
            run_id: "run-9".into(),
            content: "a".into(),
        };
        let v1 = to_json(&ev, &mut state).unwrap();
        let v2 = to_json(&ev, &mut state).unwrap();
        assert_eq!(v1["seq"], 1);
        assert_eq!(v2["seq"], 2);
        assert_eq!(v1["run_id"], "run-9");
    }
}
