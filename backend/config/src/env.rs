//! Environment variable substitution for config values.
//!
//! `${VAR_NAME}` in any string value is replaced at load time. Only
//! uppercase `[A-Z_][A-Z0-9_]*` names are matched. `$${VAR}` escapes to a
//! literal `${VAR}`.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;

/// Matches an escaped `$${VAR}` or a plain `${VAR}`; group 1 is the escape.
static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\$?)\$\{([A-Z_][A-Z0-9_]*)\}").unwrap());

/// Error returned for missing env vars.
#[derive(Debug, thiserror::Error)]
#[error("Missing env var \"{var_name}\" referenced at config path: {config_path}")]
pub struct MissingEnvVarError {
    pub var_name: String,
    pub config_path: String,
}

/// Substitute `${VAR}` references in a config JSON value tree using the
/// process environment.
pub fn resolve_env_vars(value: &Value) -> Result<Value> {
    resolve_env_vars_with(value, &std::env::vars().collect())
}

/// Substitute env vars using a provided map.
pub fn resolve_env_vars_with(value: &Value, env: &HashMap<String, String>) -> Result<Value> {
    Ok(substitute_value(value, env, "")?)
}

fn substitute_value(
    value: &Value,
    env: &HashMap<String, String>,
    path: &str,
) -> Result<Value, MissingEnvVarError> {
    match value {
        Value::String(s) => Ok(Value::String(substitute_string(s, env, path)?)),
        Value::Array(arr) => arr
            .iter()
            .enumerate()
            .map(|(i, v)| substitute_value(v, env, &format!("{path}[{i}]")))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut result = serde_json::Map::new();
            for (k, v) in map {
                let child_path = if path.is_empty() { k.clone() } else { format!("{path}.{k}") };
                result.insert(k.clone(), substitute_value(v, env, &child_path)?);
            }
            Ok(Value::Object(result))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_string(
    s: &str,
    env: &HashMap<String, String>,
    path: &str,
) -> Result<String, MissingEnvVarError> {
    if !s.contains('$') {
        return Ok(s.to_string());
    }

    let mut missing: Option<MissingEnvVarError> = None;
    let replaced = ENV_VAR_PATTERN.replace_all(s, |caps: &Captures| {
        let var_name = &caps[2];
        if !caps[1].is_empty() {
            return format!("${{{var_name}}}");
        }
        match env.get(var_name) {
            Some(val) if !val.is_empty() => val.clone(),
            _ => {
                missing.get_or_insert_with(|| MissingEnvVarError {
                    var_name: var_name.to_string(),
                    config_path: path.to_string(),
                });
                String::new()
            }
        }
    });

    match missing {
        Some(err) => Err(err),
        None => Ok(replaced.into_owned()),
    }
}
