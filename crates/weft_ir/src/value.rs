//! Runtime values for template expressions.
//!
//! Values follow the host-language semantics the template grammar promises:
//! `undefined` and `null` are distinct, numbers are f64, objects are ordered
//! string maps, and host callables are first-class.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Signature of a host-provided callable reachable from expressions.
///
/// Host failures surface as plain strings; the evaluator attaches the call
/// span and a stable error code.
pub type HostFn = Rc<dyn Fn(&[Value]) -> Result<Value, String>>;

/// A named host callable.
///
/// Equality is pointer identity: two callables are the same value only if
/// they share the same function object.
#[derive(Clone)]
pub struct Callable {
    name: String,
    func: HostFn,
}

impl Callable {
    pub fn new(name: impl Into<String>, func: HostFn) -> Self {
        Callable {
            name: name.into(),
            func,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the underlying host function.
    pub fn call(&self, args: &[Value]) -> Result<Value, String> {
        (self.func)(args)
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable({})", self.name)
    }
}

/// A template expression value.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Callable(Callable),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn number(n: impl Into<f64>) -> Self {
        Value::Number(n.into())
    }

    pub fn array(items: impl Into<Vec<Value>>) -> Self {
        Value::Array(items.into())
    }

    pub fn callable(name: impl Into<String>, func: HostFn) -> Self {
        Value::Callable(Callable::new(name, func))
    }

    /// Name of the value's runtime type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Callable(_) => "function",
        }
    }

    /// The `typeof` operator result, which folds null/arrays/objects together.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Null | Value::Array(_) | Value::Object(_) => "object",
            Value::Callable(_) => "function",
        }
    }

    /// Truthiness: everything except `undefined`, `null`, `false`, `0`,
    /// `NaN`, and the empty string.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) | Value::Callable(_) => true,
        }
    }

    /// Numeric coercion: `null` is 0, booleans are 0/1, strings parse
    /// (empty string is 0), everything else is NaN.
    pub fn as_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            Value::Array(_) | Value::Object(_) | Value::Callable(_) => f64::NAN,
        }
    }

    /// Text form used when a value is interpolated into prompt text.
    ///
    /// `undefined` renders as nothing; arrays and objects render as JSON so
    /// their structure stays visible in the prompt.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Undefined => String::new(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Array(_) | Value::Object(_) => {
                serde_json::to_string(&self.to_json()).unwrap_or_default()
            }
            Value::Callable(c) => format!("[function {}]", c.name()),
        }
    }

    /// Convert to a JSON value. Callables become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null | Value::Callable(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Convert from a JSON value.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        // Numbers are f64 by design; precision loss past 2^53 is accepted.
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Format a number the way the template language prints it: integral values
/// without a trailing `.0`.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_matches_host_semantics() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::Number(f64::NAN).is_truthy());
        assert!(!Value::string("").is_truthy());
        assert!(Value::string("x").is_truthy());
        assert!(Value::Array(vec![]).is_truthy());
        assert!(Value::Object(BTreeMap::new()).is_truthy());
    }

    #[test]
    fn number_coercion() {
        assert_eq!(Value::Null.as_number(), 0.0);
        assert_eq!(Value::Bool(true).as_number(), 1.0);
        assert_eq!(Value::string(" 42 ").as_number(), 42.0);
        assert_eq!(Value::string("").as_number(), 0.0);
        assert!(Value::string("nope").as_number().is_nan());
        assert!(Value::Undefined.as_number().is_nan());
    }

    #[test]
    fn display_formatting() {
        assert_eq!(Value::Number(3.0).to_display_string(), "3");
        assert_eq!(Value::Number(3.5).to_display_string(), "3.5");
        assert_eq!(Value::Undefined.to_display_string(), "");
        assert_eq!(
            Value::Array(vec![Value::Number(1.0), Value::string("a")]).to_display_string(),
            r#"[1.0,"a"]"#
        );
    }

    #[test]
    fn callable_equality_is_identity() {
        let f: HostFn = Rc::new(|_| Ok(Value::Null));
        let a = Value::callable("f", f.clone());
        let b = Value::callable("g", f);
        let c = Value::callable("f", Rc::new(|_| Ok(Value::Null)));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
