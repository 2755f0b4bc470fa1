use anyhow::{Context, Result, bail};
use lib_realtime::OutboundFrame;
use serde_json::Value;

/// Parses one stdin line of the form `topic [json]`.
///
/// Blank lines and `#` comments yield `None`. A missing payload sends `null`;
/// a leading `!` on the topic marks the frame ephemeral (dropped while offline).
pub fn parse_line(line: &str) -> Result<Option<OutboundFrame>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (topic, payload) = match line.split_once(char::is_whitespace) {
        Some((topic, rest)) => (topic, rest.trim()),
        None => (line, ""),
    };
    let (topic, ephemeral) = match topic.strip_prefix('!') {
        Some(topic) => (topic, true),
        None => (topic, false),
    };
    if topic.is_empty() {
        bail!("missing topic in `{line}`");
    }

    let data = if payload.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(payload).with_context(|| format!("payload for `{topic}` is not JSON"))?
    };

    Ok(Some(if ephemeral {
        OutboundFrame::ephemeral(topic, data)
    } else {
        OutboundFrame::new(topic, data)
    }))
}
