//! JSON workflow document → validated `Workflow`.
//!
//! ```json
//! { "name": "...", "tasks": [
//!   { "id": "...", "fn": "...", "args": [...], "deps": [...]?,
//!     "retries": 0?, "timeout": 30.0?, "tags": [...]?, "cacheable": true? }
//! ]}
//! ```
//! Defaults: `deps=[]`, `retries=0`, `timeout=null`, `tags=[]`,
//! `cacheable=true`. Every violation is collected before returning rather
//! than failing on the first one found.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::error::SchemaError;
use crate::types::{TaskSpec, Workflow};
use crate::value::Value;

pub fn parse_workflow(json: &serde_json::Value) -> Result<Workflow, Vec<SchemaError>> {
    let mut errors = Vec::new();

    let name = json
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    if name.is_none() {
        errors.push(invalid("name", "missing or not a string"));
    }

    let raw_tasks = json.get("tasks").and_then(|v| v.as_array());
    if raw_tasks.is_none() {
        errors.push(invalid("tasks", "missing or not an array"));
    }

    let (name, raw_tasks) = match (name, raw_tasks) {
        (Some(n), Some(t)) => (n, t),
        _ => return Err(errors),
    };

    if raw_tasks.is_empty() {
        errors.push(invalid("tasks", "must contain at least one task"));
    }

    let mut specs: Vec<TaskSpec> = Vec::with_capacity(raw_tasks.len());
    let mut seen_ids: BTreeSet<String> = BTreeSet::new();

    for (i, raw) in raw_tasks.iter().enumerate() {
        let path = format!("tasks[{i}]");
        match parse_task(&path, raw, &mut errors) {
            Some(spec) => {
                if !seen_ids.insert(spec.id.clone()) {
                    errors.push(invalid(
                        &format!("{path}.id"),
                        format!("duplicate task id '{}'", spec.id),
                    ));
                }
                specs.push(spec);
            }
            None => continue,
        }
    }

    let all_ids: BTreeSet<String> = specs.iter().map(|s| s.id.clone()).collect();
    for (i, spec) in specs.iter().enumerate() {
        for dep in &spec.deps {
            if !all_ids.contains(dep) {
                errors.push(invalid(
                    &format!("tasks[{i}].deps"),
                    format!("task '{}' depends on unknown task '{}'", spec.id, dep),
                ));
            }
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let tasks: BTreeMap<String, TaskSpec> =
        specs.into_iter().map(|s| (s.id.clone(), s)).collect();

    Ok(Workflow { name, tasks })
}

fn parse_task(path: &str, raw: &serde_json::Value, errors: &mut Vec<SchemaError>) -> Option<TaskSpec> {
    let obj = raw.as_object();
    if obj.is_none() {
        errors.push(invalid(path, "task must be an object"));
        return None;
    }

    let id = raw.get("id").and_then(|v| v.as_str()).filter(|s| !s.is_empty());
    if id.is_none() {
        errors.push(invalid(&format!("{path}.id"), "missing or empty"));
    }

    let function_ref = raw.get("fn").and_then(|v| v.as_str()).filter(|s| !s.is_empty());
    if function_ref.is_none() {
        errors.push(invalid(&format!("{path}.fn"), "missing or empty"));
    }

    let args = match raw.get("args") {
        None => Some(Vec::new()),
        Some(serde_json::Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            let mut ok = true;
            for (j, item) in items.iter().enumerate() {
                match Value::from_json(item) {
                    Ok(v) => out.push(v),
                    Err(e) => {
                        errors.push(invalid(&format!("{path}.args[{j}]"), e.0));
                        ok = false;
                    }
                }
            }
            ok.then_some(out)
        }
        Some(_) => {
            errors.push(invalid(&format!("{path}.args"), "must be an array"));
            None
        }
    };

    let deps = match raw.get("deps") {
        None => Some(BTreeSet::new()),
        Some(serde_json::Value::Array(items)) => {
            let mut out = BTreeSet::new();
            let mut ok = true;
            for (j, item) in items.iter().enumerate() {
                match item.as_str() {
                    Some(s) => {
                        out.insert(s.to_string());
                    }
                    None => {
                        errors.push(invalid(&format!("{path}.deps[{j}]"), "must be a string"));
                        ok = false;
                    }
                }
            }
            ok.then_some(out)
        }
        Some(_) => {
            errors.push(invalid(&format!("{path}.deps"), "must be an array of strings"));
            None
        }
    };

    let retries = match raw.get("retries") {
        None => Some(0u32),
        Some(v) => match v.as_u64() {
            Some(n) => Some(n as u32),
            None => {
                errors.push(invalid(&format!("{path}.retries"), "must be a non-negative integer"));
                None
            }
        },
    };

    let timeout = match raw.get("timeout") {
        None | Some(serde_json::Value::Null) => Some(None),
        Some(v) => match v.as_f64() {
            Some(n) if n > 0.0 => Some(Some(Duration::from_secs_f64(n))),
            _ => {
                errors.push(invalid(&format!("{path}.timeout"), "must be a positive number"));
                None
            }
        },
    };

    let tags = match raw.get("tags") {
        None => Some(BTreeSet::new()),
        Some(serde_json::Value::Array(items)) => {
            let mut out = BTreeSet::new();
            let mut ok = true;
            for (j, item) in items.iter().enumerate() {
                match item.as_str() {
                    Some(s) => {
                        out.insert(s.to_string());
                    }
                    None => {
                        errors.push(invalid(&format!("{path}.tags[{j}]"), "must be a string"));
                        ok = false;
                    }
                }
            }
            ok.then_some(out)
        }
        Some(_) => {
            errors.push(invalid(&format!("{path}.tags"), "must be an array of strings"));
            None
        }
    };

    let cacheable = match raw.get("cacheable") {
        None => Some(true),
        Some(serde_json::Value::Bool(b)) => Some(*b),
        Some(_) => {
            errors.push(invalid(&format!("{path}.cacheable"), "must be a boolean"));
            None
        }
    };

    Some(TaskSpec {
        id: id?.to_string(),
        function_ref: function_ref?.to_string(),
        args: args?,
        deps: deps?,
        retries: retries?,
        timeout: timeout?,
        tags: tags?,
        cacheable: cacheable?,
    })
}

fn invalid(path: &str, message: impl Into<String>) -> SchemaError {
    SchemaError::Invalid {
        path: path.to_string(),
        message: message.into(),
    }
}
