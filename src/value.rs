//! Canonical argument/result representation.
//!
//! `Value` is the tagged variant every task argument, task result, and
//! cache payload is expressed in. `Map` is a `BTreeMap` rather than a
//! `HashMap` so that lexicographic key ordering falls out of the type
//! instead of being reimplemented at the call site of every serializer.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::FingerprintError;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Seq(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Convert from a parsed JSON value. Integral JSON numbers become
    /// `Value::Int`; everything else with a fractional/exponent form
    /// becomes `Value::Float` — this is what lets the cache distinguish
    /// `1` from `1.0`.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, FingerprintError> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float(f))
                } else {
                    Err(FingerprintError(format!("number out of range: {n}")))
                }
            }
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            serde_json::Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(Value::from_json(item)?);
                }
                Ok(Value::Seq(out))
            }
            serde_json::Value::Object(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(k.clone(), Value::from_json(v)?);
                }
                Ok(Value::Map(out))
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Seq(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Append this value's canonical byte representation to `out`. No
    /// insignificant whitespace, map keys already sorted (`BTreeMap`
    /// iterates in key order), integers and floats tagged distinctly so
    /// `1` and `1.0` never collide.
    pub fn write_canonical(&self, out: &mut String) {
        match self {
            Value::Null => out.push_str("n:"),
            Value::Bool(b) => {
                out.push_str("b:");
                out.push(if *b { 't' } else { 'f' });
            }
            Value::Int(i) => {
                let _ = write!(out, "i:{i}");
            }
            Value::Float(f) => {
                // %.17e keeps round-trip precision while staying free of
                // platform-dependent `Display` rounding behavior.
                let _ = write!(out, "f:{:e}", f);
            }
            Value::String(s) => {
                let _ = write!(out, "s:{}:", s.len());
                out.push_str(s);
            }
            Value::Seq(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_canonical(out);
                }
                out.push(']');
            }
            Value::Map(map) => {
                out.push('{');
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    let _ = write!(out, "{}:{}=", k.len(), k);
                    v.write_canonical(out);
                }
                out.push('}');
            }
        }
    }

    pub fn canonical_string(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_and_float_produce_distinct_canonical_forms() {
        let one_int = Value::Int(1);
        let one_float = Value::Float(1.0);
        assert_ne!(one_int.canonical_string(), one_float.canonical_string());
    }

    #[test]
    fn map_keys_canonicalize_in_sorted_order_regardless_of_insertion() {
        let json_a = serde_json::json!({"b": 1, "a": 2});
        let json_b = serde_json::json!({"a": 2, "b": 1});
        let a = Value::from_json(&json_a).unwrap();
        let b = Value::from_json(&json_b).unwrap();
        assert_eq!(a.canonical_string(), b.canonical_string());
    }

    #[test]
    fn string_length_prefix_prevents_ambiguous_concatenation() {
        let a = Value::Seq(vec![Value::String("ab".into()), Value::String("c".into())]);
        let b = Value::Seq(vec![Value::String("a".into()), Value::String("bc".into())]);
        assert_ne!(a.canonical_string(), b.canonical_string());
    }
}
