//! Normalization of provider poll/submit responses.
//!
//! Providers disagree on everything: nesting, status vocabulary, where
//! the image lives. The parsers here inspect keys, never whole-document
//! types, and reduce each reply to a [`NormalizedEnvelope`]. A shape no
//! parser recognizes is reported as unrecognized so the caller can keep
//! the task running and log the raw body.

use inkstone_core::TaskErrorKind;
use serde_json::Value;

/// Provider "task not found" sentinel used by the nested-envelope APIs.
pub const TASK_NOT_FOUND_CODE: i64 = -22;

/// A reference to one generated image.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageRef {
    /// Fetch by URL.
    Url(String),
    /// Base64 payload embedded in the response.
    Inline { data: String, mime: String },
}

/// Provider-independent view of a task's state.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedEnvelope {
    Running { progress: Option<f64> },
    Completed { refs: Vec<ImageRef> },
    Failed { kind: TaskErrorKind, message: String },
    /// Provider claims it has never seen the task.
    NotFound,
}

/// Nested envelope: `{code, data: {status, results: [{url}]}}`.
///
/// `code != 0` is a provider-side failure; the not-found sentinel gets
/// its own variant because its meaning depends on task age.
pub fn parse_nested(raw: &Value) -> Option<NormalizedEnvelope> {
    let code = raw.get("code")?.as_i64()?;
    if code == TASK_NOT_FOUND_CODE {
        return Some(NormalizedEnvelope::NotFound);
    }
    if code != 0 {
        return Some(NormalizedEnvelope::Failed {
            kind: TaskErrorKind::ProviderError,
            message: error_message(raw).unwrap_or_else(|| format!("provider code {code}")),
        });
    }
    let data = raw.get("data").unwrap_or(&Value::Null);
    Some(status_envelope(data))
}

/// Root-level envelope: `{status, results: [{url}]}`.
pub fn parse_root(raw: &Value) -> Option<NormalizedEnvelope> {
    raw.get("status")?.as_str()?;
    Some(status_envelope(raw))
}

/// Candidate envelope: `{candidates: [{content: {parts: [{inlineData}]}}]}`.
pub fn parse_candidates(raw: &Value) -> Option<NormalizedEnvelope> {
    let candidates = raw.get("candidates")?.as_array()?;
    let mut refs = Vec::new();
    for candidate in candidates {
        let parts = candidate
            .pointer("/content/parts")
            .and_then(Value::as_array);
        for part in parts.into_iter().flatten() {
            if let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) {
                if let Some(data) = inline.get("data").and_then(Value::as_str) {
                    let mime = inline
                        .get("mimeType")
                        .or_else(|| inline.get("mime_type"))
                        .and_then(Value::as_str)
                        .unwrap_or("image/png");
                    refs.push(ImageRef::Inline {
                        data: data.to_string(),
                        mime: mime.to_string(),
                    });
                }
            }
        }
    }
    if refs.is_empty() {
        // Candidates present but no image part yet: still generating.
        return Some(NormalizedEnvelope::Running { progress: None });
    }
    Some(NormalizedEnvelope::Completed { refs })
}

/// Flat envelope: `{status: "succeeded", url}`.
pub fn parse_flat(raw: &Value) -> Option<NormalizedEnvelope> {
    let status = raw.get("status")?.as_str()?;
    if is_completed_status(status) {
        let mut refs = collect_refs(raw);
        if let Some(url) = raw.get("url").and_then(Value::as_str) {
            if refs.is_empty() {
                refs.push(ImageRef::Url(url.to_string()));
            }
        }
        return Some(NormalizedEnvelope::Completed { refs });
    }
    Some(status_envelope(raw))
}

/// Interpret `status` / `progress` / `results` keys of one object.
fn status_envelope(value: &Value) -> NormalizedEnvelope {
    let status = value
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if is_completed_status(status) {
        NormalizedEnvelope::Completed {
            refs: collect_refs(value),
        }
    } else if is_failed_status(status) {
        NormalizedEnvelope::Failed {
            kind: TaskErrorKind::ProviderError,
            message: error_message(value).unwrap_or_else(|| status.to_string()),
        }
    } else {
        NormalizedEnvelope::Running {
            progress: value.get("progress").and_then(Value::as_f64),
        }
    }
}

fn is_completed_status(status: &str) -> bool {
    matches!(
        status.to_ascii_lowercase().as_str(),
        "succeeded" | "success" | "completed" | "done" | "finished"
    )
}

fn is_failed_status(status: &str) -> bool {
    matches!(
        status.to_ascii_lowercase().as_str(),
        "failed" | "failure" | "error" | "cancelled"
    )
}

/// Pull image URLs out of `results` (or `images`): entries may be plain
/// strings or `{url}` objects.
fn collect_refs(value: &Value) -> Vec<ImageRef> {
    let entries = value
        .get("results")
        .or_else(|| value.get("images"))
        .and_then(Value::as_array);
    entries
        .into_iter()
        .flatten()
        .filter_map(|entry| match entry {
            Value::String(url) => Some(ImageRef::Url(url.clone())),
            Value::Object(_) => entry
                .get("url")
                .and_then(Value::as_str)
                .map(|u| ImageRef::Url(u.to_string())),
            _ => None,
        })
        .collect()
}

fn error_message(value: &Value) -> Option<String> {
    for key in ["message", "msg", "error", "detail"] {
        if let Some(text) = value.get(key).and_then(Value::as_str) {
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
    }
    None
}

/// Extract a provider task id from a submit response. Providers place
/// it at the root or under `data`, with varying capitalization.
pub fn extract_task_id(raw: &Value) -> Option<String> {
    for scope in [raw, raw.get("data").unwrap_or(&Value::Null)] {
        for key in ["task_id", "taskId", "Id", "id"] {
            match scope.get(key) {
                Some(Value::String(id)) if !id.is_empty() => return Some(id.clone()),
                Some(Value::Number(n)) => return Some(n.to_string()),
                _ => {}
            }
        }
    }
    None
}

/// Extract immediately available image refs from a submit response
/// (synchronous providers, or async providers that short-circuit).
pub fn extract_submit_refs(raw: &Value) -> Vec<ImageRef> {
    if let Some(NormalizedEnvelope::Completed { refs }) = parse_candidates(raw) {
        return refs;
    }
    let mut refs = collect_refs(raw);
    if refs.is_empty() {
        if let Some(data) = raw.get("data") {
            refs = collect_refs(data);
            if refs.is_empty() {
                if let Some(url) = data.get("url").and_then(Value::as_str) {
                    refs.push(ImageRef::Url(url.to_string()));
                }
            }
        }
    }
    if refs.is_empty() {
        if let Some(url) = raw.get("url").and_then(Value::as_str) {
            refs.push(ImageRef::Url(url.to_string()));
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn nested_completed_with_results() {
        let raw = json!({
            "code": 0,
            "data": {"status": "succeeded", "results": [{"url": "https://cdn/a.png"}]}
        });
        assert_eq!(
            parse_nested(&raw),
            Some(NormalizedEnvelope::Completed {
                refs: vec![ImageRef::Url("https://cdn/a.png".into())]
            })
        );
    }

    #[test]
    fn nested_running_carries_progress() {
        let raw = json!({"code": 0, "data": {"status": "processing", "progress": 0.4}});
        assert_eq!(
            parse_nested(&raw),
            Some(NormalizedEnvelope::Running {
                progress: Some(0.4)
            })
        );
    }

    #[test]
    fn nested_not_found_sentinel() {
        let raw = json!({"code": -22, "message": "task not exist"});
        assert_eq!(parse_nested(&raw), Some(NormalizedEnvelope::NotFound));
    }

    #[test]
    fn nested_nonzero_code_is_failure() {
        let raw = json!({"code": 500, "message": "quota exceeded"});
        assert_matches!(
            parse_nested(&raw),
            Some(NormalizedEnvelope::Failed { message, .. }) if message == "quota exceeded"
        );
    }

    #[test]
    fn nested_requires_code_key() {
        assert_eq!(parse_nested(&json!({"status": "done"})), None);
    }

    #[test]
    fn root_level_envelope() {
        let raw = json!({"status": "completed", "results": ["https://cdn/b.jpg"]});
        assert_eq!(
            parse_root(&raw),
            Some(NormalizedEnvelope::Completed {
                refs: vec![ImageRef::Url("https://cdn/b.jpg".into())]
            })
        );
    }

    #[test]
    fn root_failed_with_message() {
        let raw = json!({"status": "failed", "error": "nsfw rejected"});
        assert_matches!(
            parse_root(&raw),
            Some(NormalizedEnvelope::Failed { message, .. }) if message == "nsfw rejected"
        );
    }

    #[test]
    fn candidates_inline_data() {
        let raw = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "here you go"},
                    {"inlineData": {"data": "aGVsbG8=", "mimeType": "image/jpeg"}}
                ]}
            }]
        });
        assert_eq!(
            parse_candidates(&raw),
            Some(NormalizedEnvelope::Completed {
                refs: vec![ImageRef::Inline {
                    data: "aGVsbG8=".into(),
                    mime: "image/jpeg".into()
                }]
            })
        );
    }

    #[test]
    fn candidates_without_image_still_running() {
        let raw = json!({"candidates": [{"content": {"parts": [{"text": "thinking"}]}}]});
        assert_eq!(
            parse_candidates(&raw),
            Some(NormalizedEnvelope::Running { progress: None })
        );
    }

    #[test]
    fn flat_succeeded_url() {
        let raw = json!({"status": "succeeded", "url": "https://cdn/c.png"});
        assert_eq!(
            parse_flat(&raw),
            Some(NormalizedEnvelope::Completed {
                refs: vec![ImageRef::Url("https://cdn/c.png".into())]
            })
        );
    }

    #[test]
    fn unknown_shape_is_unrecognized() {
        assert_eq!(parse_nested(&json!({"weird": true})), None);
        assert_eq!(parse_root(&json!({"weird": true})), None);
        assert_eq!(parse_candidates(&json!({"weird": true})), None);
        assert_eq!(parse_flat(&json!({"weird": true})), None);
    }

    #[test]
    fn task_id_key_variants() {
        assert_eq!(
            extract_task_id(&json!({"data": {"Id": "abc"}})),
            Some("abc".into())
        );
        assert_eq!(
            extract_task_id(&json!({"task_id": 42})),
            Some("42".into())
        );
        assert_eq!(extract_task_id(&json!({"data": {}})), None);
    }

    #[test]
    fn submit_refs_from_data_url() {
        let raw = json!({"code": 0, "data": {"url": "https://cdn/sync.png"}});
        assert_eq!(
            extract_submit_refs(&raw),
            vec![ImageRef::Url("https://cdn/sync.png".into())]
        );
    }

    #[test]
    fn results_entries_may_be_strings_or_objects() {
        let raw = json!({"status": "done", "results": ["https://a", {"url": "https://b"}, 7]});
        assert_eq!(
            parse_root(&raw),
            Some(NormalizedEnvelope::Completed {
                refs: vec![
                    ImageRef::Url("https://a".into()),
                    ImageRef::Url("https://b".into())
                ]
            })
        );
    }
}
