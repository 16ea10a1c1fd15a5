//! Text and error extraction from upstream JSON bodies.
//!
//! Providers answer in several shapes (chat completions, the responses API,
//! wrapped `response` objects). Rather than deserialize each one, the body
//! is classified by its top-level key and then walked by a single collector.

use serde_json::Value;

use crate::value::is_truthy;

/// Nesting beyond this is ignored by the collector.
pub const MAX_COLLECT_DEPTH: usize = 32;

/// Known upstream body shapes, keyed by the first top-level field present.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpstreamBody<'a> {
    OutputText(&'a str),
    Output(&'a Value),
    Response(&'a Value),
    Choices(&'a Value),
    Unknown,
}

impl<'a> UpstreamBody<'a> {
    pub fn classify(data: &'a Value) -> Self {
        if let Some(text) = data
            .get("output_text")
            .and_then(Value::as_str)
            .filter(|t| !t.trim().is_empty())
        {
            return UpstreamBody::OutputText(text);
        }
        if let Some(v) = data.get("output").filter(|v| is_truthy(v)) {
            return UpstreamBody::Output(v);
        }
        if let Some(v) = data.get("response").filter(|v| is_truthy(v)) {
            return UpstreamBody::Response(v);
        }
        if let Some(v) = data.get("choices").filter(|v| is_truthy(v)) {
            return UpstreamBody::Choices(v);
        }
        UpstreamBody::Unknown
    }

    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamBody::OutputText(_) => "output_text",
            UpstreamBody::Output(_) => "output",
            UpstreamBody::Response(_) => "response",
            UpstreamBody::Choices(_) => "choices",
            UpstreamBody::Unknown => "unknown",
        }
    }
}

/// Collects the reply text from an upstream body.
///
/// A non-blank top-level `output_text` wins. Otherwise text is collected from
/// `output`, then `response`, then `choices`, stopping at the first that
/// yields anything. Chunks are trimmed, consecutive duplicates dropped, and
/// the result joined with newlines.
pub fn extract_response_text(data: &Value) -> String {
    if let UpstreamBody::OutputText(text) = UpstreamBody::classify(data) {
        return text.trim().to_string();
    }

    let mut chunks = Vec::new();
    for key in ["output", "response", "choices"] {
        if let Some(value) = data.get(key) {
            collect_text(value, &mut chunks, 0);
        }
        if !chunks.is_empty() {
            break;
        }
    }

    let mut deduped: Vec<&str> = Vec::with_capacity(chunks.len());
    for chunk in chunks.iter().map(|c| c.trim()).filter(|c| !c.is_empty()) {
        if deduped.last() != Some(&chunk) {
            deduped.push(chunk);
        }
    }

    collapse_blank_lines(&deduped.join("\n")).trim().to_string()
}

fn collect_text<'a>(value: &'a Value, bucket: &mut Vec<&'a str>, depth: usize) {
    if depth > MAX_COLLECT_DEPTH || !is_truthy(value) {
        return;
    }

    match value {
        Value::String(s) => bucket.push(s),
        Value::Array(items) => {
            for item in items {
                collect_text(item, bucket, depth + 1);
            }
        }
        Value::Object(map) => {
            if let Some(Value::String(s)) = map.get("text") {
                bucket.push(s);
            }
            if let Some(Value::String(s)) = map.get("output_text") {
                bucket.push(s);
            }
            for key in ["content", "message"] {
                match map.get(key) {
                    Some(Value::String(s)) => bucket.push(s),
                    Some(nested) => collect_text(nested, bucket, depth + 1),
                    None => {}
                }
            }
            if let Some(nested) = map.get("output") {
                collect_text(nested, bucket, depth + 1);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Runs of three or more newlines become a single blank line.
pub fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0;
    for ch in text.chars() {
        if ch == '\n' {
            newlines += 1;
            if newlines <= 2 {
                out.push(ch);
            }
        } else {
            newlines = 0;
            out.push(ch);
        }
    }
    out
}

/// Human-readable error message from an upstream error body.
pub fn extract_api_error(data: Option<&Value>) -> String {
    let Some(data) = data.filter(|d| is_truthy(d)) else {
        return "未知错误".to_string();
    };
    if let Some(s) = data.get("error").and_then(Value::as_str) {
        return s.to_string();
    }
    if let Some(s) = data.get("message").and_then(Value::as_str) {
        return s.to_string();
    }
    if let Some(s) = data
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
    {
        return s.to_string();
    }
    "服务端返回异常".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefers_top_level_output_text() {
        let data = json!({"output_text": "  hello  ", "choices": [{"message": {"content": "x"}}]});
        assert_eq!(UpstreamBody::classify(&data).kind(), "output_text");
        assert_eq!(extract_response_text(&data), "hello");
    }

    #[test]
    fn reads_chat_completion_choices() {
        let data = json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "0-3秒画面：推镜头\n\n\n\n3-6秒画面：拉镜头"},
                "finish_reason": "stop"
            }]
        });
        assert_eq!(UpstreamBody::classify(&data).kind(), "choices");
        assert_eq!(
            extract_response_text(&data),
            "0-3秒画面：推镜头\n\n3-6秒画面：拉镜头"
        );
    }

    #[test]
    fn reads_responses_api_output() {
        let data = json!({
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "first"},
                    {"type": "output_text", "text": "first"},
                    {"type": "output_text", "text": "second"}
                ]}
            ]
        });
        assert_eq!(extract_response_text(&data), "first\nsecond");
    }

    #[test]
    fn falls_through_empty_output_to_response() {
        let data = json!({"output": [], "response": {"message": "from response"}});
        assert_eq!(extract_response_text(&data), "from response");
        assert_eq!(extract_response_text(&json!({"unrelated": 1})), "");
    }

    #[test]
    fn depth_guard_stops_runaway_nesting() {
        let mut value = json!({"content": "deep"});
        for _ in 0..(MAX_COLLECT_DEPTH + 8) {
            value = json!({"content": [value]});
        }
        let data = json!({"output": [{"text": "shallow"}, value]});
        assert_eq!(extract_response_text(&data), "shallow");
    }

    #[test]
    fn api_error_lookup_order() {
        assert_eq!(extract_api_error(Some(&json!({"error": "bad"}))), "bad");
        assert_eq!(extract_api_error(Some(&json!({"message": "msg"}))), "msg");
        assert_eq!(
            extract_api_error(Some(&json!({"error": {"message": "nested", "code": "1002"}}))),
            "nested"
        );
        assert_eq!(extract_api_error(Some(&json!({"detail": 1}))), "服务端返回异常");
        assert_eq!(extract_api_error(None), "未知错误");
    }

    #[test]
    fn collapse_keeps_single_blank_line() {
        assert_eq!(collapse_blank_lines("a\n\n\n\nb\nc"), "a\n\nb\nc");
    }
}
