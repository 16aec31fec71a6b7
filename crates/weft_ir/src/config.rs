//! Prompt configuration objects.
//!
//! The global config is parsed once from the leading `---` fenced YAML block;
//! step-level attributes overlay it per turn without mutating the global
//! value.

use std::collections::BTreeMap;

use crate::Value;

/// A key-value configuration object.
#[derive(Clone, Debug, PartialEq, Default, serde::Serialize)]
pub struct Config(BTreeMap<String, Value>);

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    /// Parse the YAML text of a config block.
    ///
    /// An empty or whitespace-only block is an empty config; anything that
    /// parses to a non-mapping is rejected.
    pub fn from_yaml(raw: &str) -> Result<Config, String> {
        if raw.trim().is_empty() {
            return Ok(Config::new());
        }
        let parsed: serde_yaml::Value =
            serde_yaml::from_str(raw).map_err(|e| format!("invalid YAML: {e}"))?;
        match parsed {
            serde_yaml::Value::Mapping(mapping) => {
                let mut map = BTreeMap::new();
                for (key, value) in mapping {
                    let key = yaml_key_to_string(&key)?;
                    map.insert(key, yaml_to_value(&value));
                }
                Ok(Config(map))
            }
            serde_yaml::Value::Null => Ok(Config::new()),
            other => Err(format!(
                "config must be a mapping, found {}",
                yaml_type_name(&other)
            )),
        }
    }

    /// Serialize back to YAML, for config replacement in source text.
    pub fn to_yaml(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let mapping: serde_yaml::Mapping = self
            .0
            .iter()
            .map(|(k, v)| (serde_yaml::Value::String(k.clone()), value_to_yaml(v)))
            .collect();
        serde_yaml::to_string(&serde_yaml::Value::Mapping(mapping)).unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Overlay `overlay` on top of `self`: overlay keys win, other keys are
    /// kept. Neither input is mutated.
    pub fn merged(&self, overlay: &Config) -> Config {
        let mut out = self.0.clone();
        for (k, v) in &overlay.0 {
            out.insert(k.clone(), v.clone());
        }
        Config(out)
    }

    /// True if the config carries a truthy flag under `key`.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(Value::is_truthy)
    }
}

impl FromIterator<(String, Value)> for Config {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Config(iter.into_iter().collect())
    }
}

fn yaml_key_to_string(key: &serde_yaml::Value) -> Result<String, String> {
    match key {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!(
            "config keys must be scalars, found {}",
            yaml_type_name(other)
        )),
    }
}

fn yaml_type_name(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "boolean",
        serde_yaml::Value::Number(_) => "number",
        serde_yaml::Value::String(_) => "string",
        serde_yaml::Value::Sequence(_) => "sequence",
        serde_yaml::Value::Mapping(_) => "mapping",
        serde_yaml::Value::Tagged(_) => "tagged value",
    }
}

/// Convert a YAML value into a template value.
pub fn yaml_to_value(value: &serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(*b),
        serde_yaml::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_yaml::Value::String(s) => Value::String(s.clone()),
        serde_yaml::Value::Sequence(items) => {
            Value::Array(items.iter().map(yaml_to_value).collect())
        }
        serde_yaml::Value::Mapping(mapping) => Value::Object(
            mapping
                .iter()
                .map(|(k, v)| {
                    let key = yaml_key_to_string(k).unwrap_or_default();
                    (key, yaml_to_value(v))
                })
                .collect(),
        ),
        serde_yaml::Value::Tagged(tagged) => yaml_to_value(&tagged.value),
    }
}

/// Convert a template value into a YAML value. Callables become null.
pub fn value_to_yaml(value: &Value) -> serde_yaml::Value {
    match value {
        Value::Undefined | Value::Null | Value::Callable(_) => serde_yaml::Value::Null,
        Value::Bool(b) => serde_yaml::Value::Bool(*b),
        Value::Number(n) => {
            if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
                serde_yaml::Value::Number(serde_yaml::Number::from(*n as i64))
            } else {
                serde_yaml::Value::Number(serde_yaml::Number::from(*n))
            }
        }
        Value::String(s) => serde_yaml::Value::String(s.clone()),
        Value::Array(items) => {
            serde_yaml::Value::Sequence(items.iter().map(value_to_yaml).collect())
        }
        Value::Object(map) => serde_yaml::Value::Mapping(
            map.iter()
                .map(|(k, v)| (serde_yaml::Value::String(k.clone()), value_to_yaml(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_a_mapping() {
        let config = Config::from_yaml("model: gpt-4o\ntemperature: 0.3\n").unwrap();
        assert_eq!(config.get("model"), Some(&Value::string("gpt-4o")));
        assert_eq!(config.get("temperature"), Some(&Value::Number(0.3)));
    }

    #[test]
    fn empty_block_is_empty_config() {
        assert!(Config::from_yaml("   \n").unwrap().is_empty());
    }

    #[test]
    fn non_mapping_is_rejected() {
        assert!(Config::from_yaml("- a\n- b\n").is_err());
    }

    #[test]
    fn merged_overlay_wins() {
        let base = Config::from_yaml("model: a\ntemperature: 0\n").unwrap();
        let overlay: Config = [("model".to_string(), Value::string("b"))]
            .into_iter()
            .collect();
        let merged = base.merged(&overlay);
        assert_eq!(merged.get("model"), Some(&Value::string("b")));
        assert_eq!(merged.get("temperature"), Some(&Value::Number(0.0)));
    }

    #[test]
    fn yaml_round_trip_preserves_values() {
        let config = Config::from_yaml("model: m\nmax_tokens: 100\nnested:\n  a: true\n").unwrap();
        let reparsed = Config::from_yaml(&config.to_yaml()).unwrap();
        assert_eq!(reparsed, config);
    }
}
