//! Call key model
//!
//! Turns a function identity plus its positional and keyword arguments into a
//! deterministic [`CacheKey`]. Positional arguments are bound to the declared
//! parameter names first, so `f(1, 2)` and `f(a = 1, b = 2)` produce the same
//! key. Object keys are sorted during canonicalization.

use crate::error::{StowageError, StowageResult};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// Declared identity of a cached function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    name: String,
    params: Vec<String>,
}

impl FunctionSignature {
    /// Create a signature from a function name and its parameter names in order
    pub fn new(name: impl Into<String>, params: &[&str]) -> Self {
        Self {
            name: name.into(),
            params: params.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Function name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameter names
    pub fn params(&self) -> &[String] {
        &self.params
    }
}

/// Arguments of a single call, serialized eagerly
///
/// Serialization failures are remembered and reported by [`make_key`] so the
/// builder stays chainable.
#[derive(Debug, Default)]
pub struct CallArgs {
    positional: Vec<Result<Value, String>>,
    keyword: Vec<(String, Result<Value, String>)>,
}

impl CallArgs {
    /// Start an empty argument list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument
    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.positional.push(to_canonical_value(value));
        self
    }

    /// Add a keyword argument
    pub fn kwarg<T: Serialize + ?Sized>(mut self, name: &str, value: &T) -> Self {
        self.keyword.push((name.to_string(), to_canonical_value(value)));
        self
    }
}

/// Opaque, deterministic key of a cached call
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    canonical: String,
}

impl CacheKey {
    /// Build a key directly from any serializable value
    pub fn from_value<T: Serialize + ?Sized>(value: &T) -> StowageResult<Self> {
        let canonical = canonical_json(value)?;
        Ok(Self { canonical })
    }

    /// Rebuild a key from its canonical text (as stored by the disk store)
    pub(crate) fn from_canonical(canonical: String) -> Self {
        Self { canonical }
    }

    /// Canonical JSON text of the key
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// SHA-256 hex digest of the canonical text
    pub fn digest(&self) -> String {
        sha256_hex(self.canonical.as_bytes())
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self {
            canonical: Value::String(key.to_string()).to_string(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

/// Compute the key of a call
///
/// Positional arguments bind to parameters in declaration order; keyword
/// arguments bind by name. The key lists `(name, value)` pairs in declaration
/// order, so argument form does not matter.
pub fn make_key(signature: &FunctionSignature, args: CallArgs) -> StowageResult<CacheKey> {
    let invalid = |reason: String| StowageError::InvalidCall {
        function: signature.name.clone(),
        reason,
    };

    if args.positional.len() > signature.params.len() {
        return Err(invalid(format!(
            "takes {} arguments but {} were given",
            signature.params.len(),
            args.positional.len()
        )));
    }

    let mut bound: Vec<Option<Value>> = vec![None; signature.params.len()];

    for (slot, value) in bound.iter_mut().zip(args.positional) {
        *slot = Some(value.map_err(|reason| unhashable(signature, "positional", reason))?);
    }

    for (name, value) in args.keyword {
        let index = signature
            .params
            .iter()
            .position(|p| *p == name)
            .ok_or_else(|| invalid(format!("unexpected keyword argument `{}`", name)))?;
        if bound[index].is_some() {
            return Err(invalid(format!("multiple values for argument `{}`", name)));
        }
        bound[index] = Some(value.map_err(|reason| unhashable(signature, &name, reason))?);
    }

    let pairs: Vec<Value> = signature
        .params
        .iter()
        .zip(bound)
        .filter_map(|(name, value)| value.map(|v| Value::Array(vec![Value::String(name.clone()), v])))
        .collect();

    let key = Value::Array(vec![Value::String(signature.name.clone()), Value::Array(pairs)]);
    Ok(CacheKey::from_canonical(key.to_string()))
}

fn unhashable(signature: &FunctionSignature, argument: &str, reason: String) -> StowageError {
    StowageError::UnhashableArgument {
        function: signature.name.clone(),
        argument: argument.to_string(),
        reason,
    }
}

fn to_canonical_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, String> {
    serde_json::to_value(value)
        .map(sort_objects)
        .map_err(|e| e.to_string())
}

/// Rebuild every object with its keys in sorted order
fn sort_objects(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let sorted: Map<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k, sort_objects(v)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_objects).collect()),
        other => other,
    }
}

/// Serialize a value to compact JSON with sorted object keys
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> StowageResult<String> {
    let value = serde_json::to_value(value)?;
    Ok(sort_objects(value).to_string())
}

/// Stable content hash: SHA-256 hex of the canonical JSON
pub fn stable_hash<T: Serialize + ?Sized>(value: &T) -> StowageResult<String> {
    Ok(sha256_hex(canonical_json(value)?.as_bytes()))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
