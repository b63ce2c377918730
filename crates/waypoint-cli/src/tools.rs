//! Demo tools registered by the CLI.
//!
//! - `echo`: returns its params
//! - `read_file`: reads `path` as UTF-8 (category `io`)
//! - `write_file`: writes `content` to `path` (not idempotent)
//! - `sleep`: waits `ms` milliseconds, stopping early at the call deadline

use std::io::ErrorKind;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use waypoint_core::{Tool, ToolError, ToolRegistry, ToolSpec};

/// The registry every CLI command runs against.
pub fn registry() -> Result<ToolRegistry> {
    Ok(ToolRegistry::builder()
        .register(Echo)
        .register(ReadFile)
        .register(WriteFile)
        .register(Sleep)
        .build()?)
}

fn required_str<'a>(params: &'a Map<String, Value>, key: &str) -> Result<&'a str, String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("'{key}' must be a string"))
}

fn io_error(path: &str, error: &std::io::Error) -> ToolError {
    let message = format!("{path}: {error}");
    match error.kind() {
        ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::InvalidData => {
            ToolError::permanent(message)
        }
        _ => ToolError::transient(message),
    }
}

struct Echo;

#[async_trait]
impl Tool for Echo {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new("echo")
    }

    async fn execute(
        &self,
        params: Map<String, Value>,
        _deadline: Instant,
    ) -> std::result::Result<Value, ToolError> {
        Ok(Value::Object(params))
    }
}

struct ReadFile;

#[async_trait]
impl Tool for ReadFile {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new("read_file").with_category("io")
    }

    fn validate(&self, params: &Map<String, Value>) -> std::result::Result<(), String> {
        required_str(params, "path").map(|_| ())
    }

    async fn execute(
        &self,
        params: Map<String, Value>,
        _deadline: Instant,
    ) -> std::result::Result<Value, ToolError> {
        let path = required_str(&params, "path").map_err(ToolError::permanent)?;
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| io_error(path, &e))?;
        Ok(json!({ "path": path, "content": content }))
    }
}

struct WriteFile;

#[async_trait]
impl Tool for WriteFile {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new("write_file")
            .with_category("io")
            .non_idempotent()
    }

    fn validate(&self, params: &Map<String, Value>) -> std::result::Result<(), String> {
        required_str(params, "path")?;
        required_str(params, "content").map(|_| ())
    }

    async fn execute(
        &self,
        params: Map<String, Value>,
        _deadline: Instant,
    ) -> std::result::Result<Value, ToolError> {
        let path = required_str(&params, "path").map_err(ToolError::permanent)?;
        let content = required_str(&params, "content").map_err(ToolError::permanent)?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| io_error(path, &e))?;
        Ok(json!({ "path": path, "bytes": content.len() }))
    }
}

struct Sleep;

#[async_trait]
impl Tool for Sleep {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new("sleep")
    }

    fn validate(&self, params: &Map<String, Value>) -> std::result::Result<(), String> {
        match params.get("ms").and_then(Value::as_u64) {
            Some(_) => Ok(()),
            None => Err("'ms' must be a non-negative integer".to_string()),
        }
    }

    async fn execute(
        &self,
        params: Map<String, Value>,
        deadline: Instant,
    ) -> std::result::Result<Value, ToolError> {
        let ms = params.get("ms").and_then(Value::as_u64).unwrap_or(0);
        let wake = Instant::now() + Duration::from_millis(ms);
        tokio::time::sleep_until(wake.min(deadline)).await;
        Ok(json!({ "slept_ms": ms }))
    }
}
