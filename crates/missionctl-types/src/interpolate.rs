//! Mission-input interpolation (spec §6 "Mission inputs").
//!
//! Objectives may reference `${inputs.<key>}`, `${item.<field>}` (inside an
//! iterated task) and `${tasks.<name>.summary}` (or any dotted path into
//! that task's structured output). Per spec §9 "Open questions", a
//! reference to an *iterated* ancestor task resolves against its
//! aggregated array output, never a single index -- per-index access is
//! only available through `query_task_output`.

use std::collections::HashMap;

use serde_json::Value;

pub struct InterpolationContext<'a> {
    pub inputs: &'a HashMap<String, String>,
    pub item: Option<&'a Value>,
    /// task name -> (summary, aggregated output)
    pub tasks: &'a HashMap<String, (String, Value)>,
}

/// Replaces every `${...}` marker in `template` using `ctx`. Unresolvable
/// references are left in place verbatim -- the Scheduler validates all
/// references before a mission starts (`unknown_field`/`config_error`
/// territory, not something to silently swallow here).
pub fn interpolate(template: &str, ctx: &InterpolationContext) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            if let Some(end) = template[i + 2..].find('}') {
                let expr = &template[i + 2..i + 2 + end];
                match resolve(expr, ctx) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push_str("${");
                        out.push_str(expr);
                        out.push('}');
                    }
                }
                i += 2 + end + 1;
                continue;
            }
        }
        let ch = template[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn resolve(expr: &str, ctx: &InterpolationContext) -> Option<String> {
    let mut parts = expr.splitn(2, '.');
    let head = parts.next()?;
    let rest = parts.next().unwrap_or("");

    match head {
        "inputs" => ctx.inputs.get(rest).cloned(),
        "item" => ctx.item.and_then(|item| dotted_lookup(item, rest)),
        "tasks" => {
            let mut seg = rest.splitn(2, '.');
            let task_name = seg.next()?;
            let field_path = seg.next().unwrap_or("summary");
            let (summary, output) = ctx.tasks.get(task_name)?;
            if field_path == "summary" {
                Some(summary.clone())
            } else {
                dotted_lookup(output, field_path)
            }
        }
        _ => None,
    }
}

fn dotted_lookup(root: &Value, path: &str) -> Option<String> {
    if path.is_empty() {
        return value_to_string(root);
    }
    let mut current = root;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    value_to_string(current)
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_inputs_and_item() {
        let mut inputs = HashMap::new();
        inputs.insert("topic".to_string(), "rust".to_string());
        let item = serde_json::json!({"n": 3});
        let tasks = HashMap::new();
        let ctx = InterpolationContext {
            inputs: &inputs,
            item: Some(&item),
            tasks: &tasks,
        };
        let out = interpolate("topic=${inputs.topic} n=${item.n}", &ctx);
        assert_eq!(out, "topic=rust n=3");
    }

    #[test]
    fn leaves_unknown_markers_verbatim() {
        let inputs = HashMap::new();
        let tasks = HashMap::new();
        let ctx = InterpolationContext {
            inputs: &inputs,
            item: None,
            tasks: &tasks,
        };
        assert_eq!(interpolate("x=${inputs.missing}", &ctx), "x=${inputs.missing}");
    }
}
