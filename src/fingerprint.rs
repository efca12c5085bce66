//! Deterministic content-addressed key derivation from a function
//! reference and its arguments.

use sha2::{Digest, Sha256};

use crate::error::FingerprintError;
use crate::value::Value;

/// Version byte mixed into every fingerprint. Bumping this invalidates
/// every entry in an existing cache directory without needing to touch
/// the directory itself.
const FINGERPRINT_VERSION: u8 = 1;

/// Derive a deterministic, opaque key from `(function_ref, args)`. Equal
/// inputs (by canonical form) always produce equal keys.
pub fn fingerprint(function_ref: &str, args: &[Value]) -> Result<String, FingerprintError> {
    let mut canonical = String::new();
    canonical.push_str("fn:");
    let _ = std::fmt::Write::write_fmt(
        &mut canonical,
        format_args!("{}:{}:", function_ref.len(), function_ref),
    );

    canonical.push_str("args:[");
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            canonical.push(',');
        }
        arg.write_canonical(&mut canonical);
    }
    canonical.push(']');

    let mut hasher = Sha256::new();
    hasher.update([FINGERPRINT_VERSION]);
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_inputs_fingerprint_equal() {
        let args = vec![Value::Int(1), Value::String("x".into())];
        let a = fingerprint("task.a", &args).unwrap();
        let b = fingerprint("task.a", &args).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_function_ref_changes_fingerprint() {
        let args = vec![Value::Int(1)];
        let a = fingerprint("task.a", &args).unwrap();
        let b = fingerprint("task.b", &args).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn int_vs_float_argument_changes_fingerprint() {
        let a = fingerprint("task.a", &[Value::Int(1)]).unwrap();
        let b = fingerprint("task.a", &[Value::Float(1.0)]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn argument_order_changes_fingerprint() {
        let a = fingerprint("task.a", &[Value::Int(1), Value::Int(2)]).unwrap();
        let b = fingerprint("task.a", &[Value::Int(2), Value::Int(1)]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn output_is_hex_sha256_length() {
        let a = fingerprint("task.a", &[]).unwrap();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
