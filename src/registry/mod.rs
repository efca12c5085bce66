//! Function registry: resolves a `function_ref` string to a callable
//! unit of work. Every registered function takes and returns the
//! canonical `Value` form so the same callable can run behind either
//! executor pool.

pub mod builtin;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::value::Value;

/// A registered task implementation. `call` takes and returns the
/// canonical `Value` form so arguments/results can cross the
/// `IsolatedPool`'s thread/serialization boundary unchanged.
#[async_trait]
pub trait TaskFn: Send + Sync {
    async fn call(&self, args: &[Value]) -> Result<Value, String>;
}

#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn TaskFn>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the example task functions already registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    pub fn register(&mut self, function_ref: &str, function: Arc<dyn TaskFn>) {
        self.functions.insert(function_ref.to_string(), function);
    }

    pub fn get(&self, function_ref: &str) -> Option<Arc<dyn TaskFn>> {
        self.functions.get(function_ref).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}
