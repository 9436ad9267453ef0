use serde_json::Value;

use super::types::CurrentAction;

/// Longest thinking snippet kept in an action summary, in characters.
pub const THINKING_PREVIEW_CHARS: usize = 200;
/// Longest string tool result kept in an action summary, in characters.
pub const RESULT_PREVIEW_CHARS: usize = 500;

/// Parse a single line as a structured agent record.
///
/// Only lines whose trimmed content starts with `{` are candidates. Anything
/// that fails to parse is treated as ordinary text and yields `None`; the
/// worker freely mixes prose with records, so this is a heuristic rather than
/// a framed protocol.
pub fn parse_record(line: &str) -> Option<Value> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// Decode every record embedded in a chunk of worker output, in line order.
pub fn decode_records(chunk: &str) -> Vec<Value> {
    chunk.split('\n').filter_map(parse_record).collect()
}

/// Derive the sidebar actions a record implies.
///
/// An assistant message yields one action per text or tool block, so the last
/// entry is the one that ends up as the session's current action. Each block
/// is looked at on its own; a block without a recognized `type` is skipped
/// and its siblings still count.
pub fn summarize(record: &Value) -> Vec<CurrentAction> {
    match record.get("type").and_then(Value::as_str) {
        Some("assistant") => record
            .get("message")
            .and_then(|message| message.get("content"))
            .and_then(Value::as_array)
            .map(|blocks| blocks.iter().filter_map(block_action).collect())
            .unwrap_or_default(),
        Some("content_block_start") => record
            .get("content_block")
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("tool_use"))
            .map(|block| CurrentAction::ToolStart {
                tool: field(block, "name"),
                id: field(block, "id"),
            })
            .into_iter()
            .collect(),
        Some("result") => vec![CurrentAction::ToolResult {
            subtype: field(record, "subtype"),
            tool: field(record, "tool"),
            input: field(record, "input"),
            result: field(record, "result").map(|value| match value {
                Value::String(s) => Value::String(truncate_chars(&s, RESULT_PREVIEW_CHARS)),
                other => other,
            }),
        }],
        _ => Vec::new(),
    }
}

fn block_action(block: &Value) -> Option<CurrentAction> {
    match block.get("type").and_then(Value::as_str)? {
        "tool_use" => Some(CurrentAction::Tool {
            tool: field(block, "name"),
            input: field(block, "input"),
        }),
        "text" => Some(CurrentAction::Thinking {
            text: block
                .get("text")
                .and_then(Value::as_str)
                .map(|text| truncate_chars(text, THINKING_PREVIEW_CHARS)),
        }),
        _ => None,
    }
}

/// A present, non-null field, cloned as is.
fn field(value: &Value, key: &str) -> Option<Value> {
    value.get(key).filter(|v| !v.is_null()).cloned()
}

/// Keep at most `max` characters of `text`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
