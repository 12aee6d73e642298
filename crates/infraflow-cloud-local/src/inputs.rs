//! Typed access to the resolved JSON inputs of a request

use crate::error::{LocalCloudError, Result};
use serde_json::Value;

#[derive(Debug, Clone, Copy)]
pub struct Inputs<'a> {
    value: &'a Value,
}

impl<'a> Inputs<'a> {
    pub fn new(value: &'a Value) -> Self {
        Self { value }
    }

    fn field(&self, name: &str) -> Option<&'a Value> {
        match self.value.get(name) {
            None | Some(Value::Null) => None,
            Some(v) => Some(v),
        }
    }

    pub fn str(&self, name: &str) -> Result<&'a str> {
        self.opt_str(name)?
            .ok_or_else(|| LocalCloudError::invalid(name, "is required"))
    }

    pub fn opt_str(&self, name: &str) -> Result<Option<&'a str>> {
        match self.field(name) {
            None => Ok(None),
            Some(Value::String(s)) if s.is_empty() => {
                Err(LocalCloudError::invalid(name, "must not be empty"))
            }
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(LocalCloudError::invalid(
                name,
                format!("expected a string, got {}", other),
            )),
        }
    }

    /// Integers may also be written as numeric strings
    pub fn opt_i64(&self, name: &str) -> Result<Option<i64>> {
        match self.field(name) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| LocalCloudError::invalid(name, "expected an integer")),
            Some(Value::String(s)) => s
                .trim()
                .trim_end_matches('s')
                .parse::<i64>()
                .map(Some)
                .map_err(|_| LocalCloudError::invalid(name, format!("expected an integer, got '{}'", s))),
            Some(other) => Err(LocalCloudError::invalid(
                name,
                format!("expected an integer, got {}", other),
            )),
        }
    }

    /// A single string or a list of strings
    pub fn strings(&self, name: &str) -> Result<Vec<&'a str>> {
        match self.field(name) {
            None => Ok(Vec::new()),
            Some(Value::String(s)) => Ok(vec![s.as_str()]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().ok_or_else(|| {
                        LocalCloudError::invalid(name, format!("expected strings, got {}", item))
                    })
                })
                .collect(),
            Some(other) => Err(LocalCloudError::invalid(
                name,
                format!("expected a string list, got {}", other),
            )),
        }
    }

    /// Repeated nested blocks such as `grant` or `secret`
    pub fn blocks(&self, name: &str) -> Result<Vec<Inputs<'a>>> {
        match self.field(name) {
            None => Ok(Vec::new()),
            Some(v @ Value::Object(_)) => Ok(vec![Inputs::new(v)]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    if item.is_object() {
                        Ok(Inputs::new(item))
                    } else {
                        Err(LocalCloudError::invalid(
                            name,
                            format!("expected a block, got {}", item),
                        ))
                    }
                })
                .collect(),
            Some(other) => Err(LocalCloudError::invalid(
                name,
                format!("expected a block, got {}", other),
            )),
        }
    }

    /// A block that may appear at most once
    pub fn block(&self, name: &str) -> Result<Option<Inputs<'a>>> {
        let mut blocks = self.blocks(name)?;
        match blocks.len() {
            0 => Ok(None),
            1 => Ok(blocks.pop()),
            n => Err(LocalCloudError::invalid(
                name,
                format!("may be given once, got {} blocks", n),
            )),
        }
    }

    /// Flat string map of a block such as `environment`
    pub fn string_map(&self) -> Result<Vec<(&'a str, &'a str)>> {
        let Some(map) = self.value.as_object() else {
            return Ok(Vec::new());
        };
        map.iter()
            .map(|(k, v)| match v {
                Value::String(s) => Ok((k.as_str(), s.as_str())),
                other => Err(LocalCloudError::invalid(
                    k,
                    format!("expected a string, got {}", other),
                )),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars() {
        let value = json!({"name": "forms", "memory": 128, "timeout": "10s", "empty": ""});
        let inputs = Inputs::new(&value);

        assert_eq!(inputs.str("name").unwrap(), "forms");
        assert!(inputs.str("missing").is_err());
        assert!(inputs.opt_str("empty").is_err());
        assert_eq!(inputs.opt_i64("memory").unwrap(), Some(128));
        assert_eq!(inputs.opt_i64("timeout").unwrap(), Some(10));
        assert!(inputs.opt_i64("name").is_err());
    }

    #[test]
    fn test_strings_accepts_scalar_or_list() {
        let value = json!({"one": "a", "many": ["a", "b"], "bad": [1]});
        let inputs = Inputs::new(&value);

        assert_eq!(inputs.strings("one").unwrap(), vec!["a"]);
        assert_eq!(inputs.strings("many").unwrap(), vec!["a", "b"]);
        assert!(inputs.strings("missing").unwrap().is_empty());
        assert!(inputs.strings("bad").is_err());
    }

    #[test]
    fn test_blocks() {
        let value = json!({
            "grant": [{"id": "a"}, {"id": "b"}],
            "mount": {"bucket": "forms"},
        });
        let inputs = Inputs::new(&value);

        let grants = inputs.blocks("grant").unwrap();
        assert_eq!(grants.len(), 2);
        assert_eq!(grants[1].str("id").unwrap(), "b");
        assert!(inputs.block("grant").is_err());
        assert_eq!(
            inputs.block("mount").unwrap().unwrap().str("bucket").unwrap(),
            "forms"
        );
    }
}
