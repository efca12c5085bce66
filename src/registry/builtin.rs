//! Example task functions behind a handful of `function_ref` names, so a
//! workflow document has something real to run.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::{FunctionRegistry, TaskFn};
use crate::value::Value;

pub fn register_all(registry: &mut FunctionRegistry) {
    registry.register("echo", Arc::new(Echo));
    registry.register("sleep", Arc::new(Sleep));
    registry.register("sum", Arc::new(Sum));
    registry.register("shell", Arc::new(Shell));
    registry.register("http_get", Arc::new(HttpGet));
}

/// Returns its single argument unchanged.
struct Echo;

#[async_trait]
impl TaskFn for Echo {
    async fn call(&self, args: &[Value]) -> Result<Value, String> {
        Ok(args.first().cloned().unwrap_or(Value::Null))
    }
}

/// Sleeps for the given number of seconds.
struct Sleep;

#[async_trait]
impl TaskFn for Sleep {
    async fn call(&self, args: &[Value]) -> Result<Value, String> {
        let seconds = match args.first() {
            Some(Value::Float(f)) => *f,
            Some(Value::Int(i)) => *i as f64,
            _ => return Err("sleep requires a numeric first argument".into()),
        };
        tokio::time::sleep(std::time::Duration::from_secs_f64(seconds)).await;
        Ok(Value::Null)
    }
}

/// Sums a sequence of numbers. A plain, cacheable, CPU-bound example.
struct Sum;

#[async_trait]
impl TaskFn for Sum {
    async fn call(&self, args: &[Value]) -> Result<Value, String> {
        let mut total = 0.0;
        let mut all_int = true;
        for arg in args {
            match arg {
                Value::Int(i) => total += *i as f64,
                Value::Float(f) => {
                    all_int = false;
                    total += f;
                }
                other => return Err(format!("sum requires numeric arguments, got {other:?}")),
            }
        }
        if all_int {
            Ok(Value::Int(total as i64))
        } else {
            Ok(Value::Float(total))
        }
    }
}

/// Runs a shell command, capturing stdout. Timeouts are handled uniformly
/// by the executor pool rather than by this function.
struct Shell;

#[async_trait]
impl TaskFn for Shell {
    async fn call(&self, args: &[Value]) -> Result<Value, String> {
        let Some(Value::String(cmd)) = args.first() else {
            return Err("shell requires a command string argument".into());
        };
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .output()
            .await
            .map_err(|e| format!("failed to spawn '{cmd}': {e}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "command exited with {}: {}",
                output.status, stderr
            ));
        }
        Ok(Value::String(
            String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
        ))
    }
}

/// Fetches a URL, returning its body. A representative I/O-bound
/// example function.
struct HttpGet;

#[async_trait]
impl TaskFn for HttpGet {
    async fn call(&self, args: &[Value]) -> Result<Value, String> {
        let Some(Value::String(url)) = args.first() else {
            return Err("http_get requires a URL string argument".into());
        };
        let body = reqwest::get(url)
            .await
            .map_err(|e| format!("request to '{url}' failed: {e}"))?
            .text()
            .await
            .map_err(|e| format!("reading response body from '{url}' failed: {e}"))?;
        Ok(Value::String(body))
    }
}

/// Test fixture: fails on its first `n` invocations, then succeeds.
pub struct FailNTimes {
    remaining_failures: AtomicU32,
}

impl FailNTimes {
    pub fn new(failures: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl TaskFn for FailNTimes {
    async fn call(&self, args: &[Value]) -> Result<Value, String> {
        let remaining = self.remaining_failures.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |n| if n > 0 { Some(n - 1) } else { Some(0) },
        );
        match remaining {
            Ok(n) if n > 0 => Err(format!("synthetic failure, {} remaining", n - 1)),
            _ => Ok(args.first().cloned().unwrap_or(Value::Null)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_returns_its_argument() {
        let out = Echo.call(&[Value::Int(9)]).await.unwrap();
        assert_eq!(out, Value::Int(9));
    }

    #[tokio::test]
    async fn sum_adds_integers() {
        let out = Sum.call(&[Value::Int(1), Value::Int(2), Value::Int(3)])
            .await
            .unwrap();
        assert_eq!(out, Value::Int(6));
    }

    #[tokio::test]
    async fn fail_n_times_then_succeeds() {
        let f = FailNTimes::new(2);
        assert!(f.call(&[]).await.is_err());
        assert!(f.call(&[]).await.is_err());
        assert!(f.call(&[Value::Int(1)]).await.is_ok());
    }
}
