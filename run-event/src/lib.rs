//! Run event protocol: typed lifecycle events, per-run envelope, SSE framing.
//!
//! Wire shape for one event is `type` + payload; the envelope (run_id, seq)
//! is applied separately so publishers stay free of sequencing state.

mod envelope;
mod event;
mod sse;

pub use envelope::{to_json, Envelope, EnvelopeState};
pub use event::RunEvent;
pub use sse::sse_line;
