//! SSE framing: `event: <name>\ndata: <json>\n\n`.

use crate::event::RunEvent;
use serde_json::Value;

/// Formats one event as an SSE frame. `value` should already carry the
/// envelope; `event.name()` becomes the SSE event name.
pub fn sse_line(event: &RunEvent, value: &Value) -> String {
    format!("event: {}\ndata: {}\n\n", event.name(), value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_frame_shape() {
        let ev = RunEvent::Token {
            run_id: "run-1".into(),
            content: "hi".into(),
        };
        let v = ev.to_value().unwrap();
        let line = sse_line(&ev, &v);
        assert!(line.starts_with("event: token\ndata: {"));
        assert!(line.ends_with("\n\n"));
    }
}
