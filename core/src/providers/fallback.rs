//! Tool calls embedded as `<tool_call>{...}</tool_call>` blocks in plain text,
//! for models served without native function calling.

use crate::traits::ToolCallRequest;

const OPEN_TAG: &str = "<tool_call>";
const CLOSE_TAG: &str = "</tool_call>";

/// Splits `response` into the text outside tool call blocks and the calls
/// found inside them. Blocks that do not hold a `{"name", "arguments"}`
/// object are dropped.
pub fn parse_tagged_tool_calls(response: &str) -> (String, Vec<ToolCallRequest>) {
    let mut text_parts = Vec::new();
    let mut calls = Vec::new();
    let mut remaining = response;

    while let Some(start) = remaining.find(OPEN_TAG) {
        let before = &remaining[..start];
        if !before.trim().is_empty() {
            text_parts.push(before.trim().to_string());
        }

        let after_open = &remaining[start + OPEN_TAG.len()..];
        let Some(close_idx) = after_open.find(CLOSE_TAG) else {
            remaining = &remaining[start..];
            break;
        };

        for value in extract_json_objects(&after_open[..close_idx]) {
            if let Some(call) = tool_call_from_value(&value) {
                calls.push(call);
            }
        }
        remaining = &after_open[close_idx + CLOSE_TAG.len()..];
    }

    if !remaining.trim().is_empty() {
        text_parts.push(remaining.trim().to_string());
    }

    (text_parts.join("\n"), calls)
}

fn extract_json_objects(text: &str) -> Vec<serde_json::Value> {
    let mut values = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string && depth > 0 => {
                depth -= 1;
                if depth == 0
                    && let Some(s) = start.take()
                    && let Ok(value) = serde_json::from_str(&text[s..=i])
                {
                    values.push(value);
                }
            }
            _ => {}
        }
    }

    values
}

/// Tagged calls carry no id of their own. A fresh one per call keeps a
/// repeated call in a later turn from colliding with the earlier one.
fn tool_call_from_value(value: &serde_json::Value) -> Option<ToolCallRequest> {
    let name = value.get("name")?.as_str()?.to_string();
    let arguments = value
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));

    Some(ToolCallRequest {
        id: format!("call_{}", uuid::Uuid::new_v4().simple()),
        name,
        arguments,
    })
}
