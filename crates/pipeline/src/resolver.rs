//! Template resolution: turn an [`ApiTemplate`] plus the order's input
//! refs into the concrete `request_params` blob a provider accepts.
//!
//! Pure transformation. Placeholders in the template's `workflow_params`
//! strings are substituted:
//!
//! - `{image}` / `{image_N}` — the first / N-th (1-based) input ref
//! - `{prompt}` / `{prompt_N}` — the first / N-th prompt string
//!
//! A placeholder pointing past the available inputs is a hard error;
//! the task must not be dispatched with a half-filled request.

use serde_json::Value;

use inkstone_core::CoreError;
use inkstone_db::models::template::ApiTemplate;

/// The dispatch-ready form of a template.
#[derive(Debug, Clone)]
pub struct ResolvedRequest {
    pub request_params: Value,
    pub expected_output_count: i32,
    pub watermark_required: bool,
}

/// Render `template` against the ordered input refs.
pub fn resolve(template: &ApiTemplate, input_refs: &[String]) -> Result<ResolvedRequest, CoreError> {
    let prompts = template.prompt_list();
    let request_params = substitute_value(&template.workflow_params, input_refs, &prompts)?;
    Ok(ResolvedRequest {
        request_params,
        expected_output_count: template.expected_output_count,
        watermark_required: template.watermark_required,
    })
}

fn substitute_value(
    value: &Value,
    refs: &[String],
    prompts: &[String],
) -> Result<Value, CoreError> {
    match value {
        Value::String(text) => Ok(Value::String(substitute_str(text, refs, prompts)?)),
        Value::Array(items) => items
            .iter()
            .map(|item| substitute_value(item, refs, prompts))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(key, item)| Ok((key.clone(), substitute_value(item, refs, prompts)?)))
            .collect::<Result<serde_json::Map<_, _>, CoreError>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

fn substitute_str(text: &str, refs: &[String], prompts: &[String]) -> Result<String, CoreError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let Some(close) = tail.find('}') else {
            out.push_str(tail);
            return Ok(out);
        };
        let token = &tail[1..close];
        match lookup(token, refs, prompts) {
            Lookup::Found(replacement) => out.push_str(replacement),
            Lookup::Missing => {
                return Err(CoreError::TemplateInputsIncomplete(token.to_string()))
            }
            Lookup::NotAPlaceholder => out.push_str(&tail[..=close]),
        }
        rest = &tail[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

enum Lookup<'a> {
    Found(&'a str),
    Missing,
    NotAPlaceholder,
}

fn lookup<'a>(token: &str, refs: &'a [String], prompts: &'a [String]) -> Lookup<'a> {
    let (list, index) = if token == "image" {
        (refs, 0)
    } else if token == "prompt" {
        (prompts, 0)
    } else if let Some(n) = token.strip_prefix("image_") {
        match n.parse::<usize>() {
            Ok(n) if n >= 1 => (refs, n - 1),
            _ => return Lookup::NotAPlaceholder,
        }
    } else if let Some(n) = token.strip_prefix("prompt_") {
        match n.parse::<usize>() {
            Ok(n) if n >= 1 => (prompts, n - 1),
            _ => return Lookup::NotAPlaceholder,
        }
    } else {
        return Lookup::NotAPlaceholder;
    };
    match list.get(index) {
        Some(entry) => Lookup::Found(entry),
        None => Lookup::Missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn template(workflow: Value, prompts: Value) -> ApiTemplate {
        let now = Utc::now();
        ApiTemplate {
            id: 1,
            product_id: 10,
            style_id: None,
            provider_config_id: None,
            provider_kind_required: None,
            prompts,
            workflow_params: workflow,
            expected_output_count: 1,
            watermark_required: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn refs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn substitutes_image_and_prompt() {
        let t = template(
            json!({"prompt": "{prompt}", "init_image": "{image}"}),
            json!(["a cat wearing a crown"]),
        );
        let resolved = resolve(&t, &refs(&["https://cdn/in.jpg"])).unwrap();
        assert_eq!(
            resolved.request_params,
            json!({"prompt": "a cat wearing a crown", "init_image": "https://cdn/in.jpg"})
        );
    }

    #[test]
    fn numbered_placeholders_are_one_based() {
        let t = template(json!({"a": "{image_1}", "b": "{image_2}"}), json!([]));
        let resolved = resolve(&t, &refs(&["first", "second"])).unwrap();
        assert_eq!(resolved.request_params, json!({"a": "first", "b": "second"}));
    }

    #[test]
    fn substitutes_inside_nested_structures() {
        let t = template(
            json!({"nodes": [{"inputs": {"image": "{image}"}}]}),
            json!([]),
        );
        let resolved = resolve(&t, &refs(&["x.png"])).unwrap();
        assert_eq!(
            resolved.request_params,
            json!({"nodes": [{"inputs": {"image": "x.png"}}]})
        );
    }

    #[test]
    fn missing_input_is_a_hard_error() {
        let t = template(json!({"b": "{image_2}"}), json!([]));
        let err = resolve(&t, &refs(&["only-one"])).unwrap_err();
        assert!(matches!(
            err,
            CoreError::TemplateInputsIncomplete(placeholder) if placeholder == "image_2"
        ));
    }

    #[test]
    fn missing_prompt_is_a_hard_error() {
        let t = template(json!({"p": "{prompt}"}), json!([]));
        assert!(resolve(&t, &refs(&["img"])).is_err());
    }

    #[test]
    fn unrelated_braces_pass_through() {
        let t = template(json!({"style": "{vivid}", "size": "{image}"}), json!([]));
        let resolved = resolve(&t, &refs(&["in.jpg"])).unwrap();
        assert_eq!(
            resolved.request_params,
            json!({"style": "{vivid}", "size": "in.jpg"})
        );
    }

    #[test]
    fn non_string_leaves_are_untouched() {
        let t = template(json!({"steps": 30, "cfg": 7.5, "img": "{image}"}), json!([]));
        let resolved = resolve(&t, &refs(&["in.jpg"])).unwrap();
        assert_eq!(resolved.request_params["steps"], 30);
        assert_eq!(resolved.request_params["cfg"], 7.5);
    }
}
