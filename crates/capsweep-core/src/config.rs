//! Hierarchical typed key-value tree backing every capsweep configuration file.
//!
//! Paths are `.` or `/` separated (`uq.param_0.name` and `uq/param_0/name` are
//! the same key). Every accessor fails with [`CapError::Config`] naming the
//! full path when the key is missing or holds the wrong type; the
//! `*_with_default` variants only fall back when the key is absent.

use std::fs;
use std::path::Path;

use serde_yaml::{Mapping, Value};

use crate::errors::{CapError, ErrorInfo};

/// Read-mostly view over a YAML document.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyTree {
    root: Value,
    prefix: String,
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split(['.', '/']).filter(|segment| !segment.is_empty())
}

fn missing_key(path: &str) -> CapError {
    CapError::Config(
        ErrorInfo::new("config.missing_key", "key does not exist").with_context("path", path),
    )
}

fn type_mismatch(path: &str, expected: &str) -> CapError {
    CapError::Config(
        ErrorInfo::new("config.type_mismatch", format!("expected {expected}"))
            .with_context("path", path),
    )
}

impl Default for PropertyTree {
    fn default() -> Self {
        Self {
            root: Value::Mapping(Mapping::new()),
            prefix: String::new(),
        }
    }
}

impl PropertyTree {
    /// Wraps an already parsed YAML value.
    pub fn from_value(root: Value) -> Self {
        Self {
            root,
            prefix: String::new(),
        }
    }

    /// Parses a YAML document held in memory.
    pub fn parse_str(text: &str) -> Result<Self, CapError> {
        let root: Value = serde_yaml::from_str(text).map_err(|err| {
            CapError::Config(ErrorInfo::new("config.parse", err.to_string()))
        })?;
        Ok(Self::from_value(root))
    }

    /// Reads and parses a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CapError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| CapError::io("config.read", path.display(), err))?;
        Self::parse_str(&text).map_err(|err| match err {
            CapError::Config(info) => {
                CapError::Config(info.with_context("file", path.display().to_string()))
            }
            other => other,
        })
    }

    fn full_path(&self, path: &str) -> String {
        match (self.prefix.is_empty(), path.is_empty()) {
            (true, _) => path.to_string(),
            (false, true) => self.prefix.clone(),
            (false, false) => format!("{}.{}", self.prefix, path),
        }
    }

    fn lookup(&self, path: &str) -> Option<&Value> {
        let mut node = &self.root;
        for segment in split_path(path) {
            node = node.as_mapping()?.get(segment)?;
        }
        Some(node)
    }

    fn require(&self, path: &str) -> Result<&Value, CapError> {
        self.lookup(path)
            .ok_or_else(|| missing_key(&self.full_path(path)))
    }

    /// Returns true when `path` resolves to a value.
    pub fn contains(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    /// Returns the subtree rooted at `path`.
    pub fn get_child(&self, path: &str) -> Result<PropertyTree, CapError> {
        let value = self.require(path)?;
        Ok(Self {
            root: value.clone(),
            prefix: self.full_path(path),
        })
    }

    /// Reads an integer.
    pub fn get_int(&self, path: &str) -> Result<i64, CapError> {
        let value = self.require(path)?;
        match value {
            Value::Number(number) => number
                .as_i64()
                .ok_or_else(|| type_mismatch(&self.full_path(path), "integer")),
            Value::String(text) => text
                .trim()
                .parse()
                .map_err(|_| type_mismatch(&self.full_path(path), "integer")),
            _ => Err(type_mismatch(&self.full_path(path), "integer")),
        }
    }

    /// Reads a floating point number.
    pub fn get_double(&self, path: &str) -> Result<f64, CapError> {
        let value = self.require(path)?;
        as_double(value).ok_or_else(|| type_mismatch(&self.full_path(path), "number"))
    }

    /// Reads a string; scalar numbers and booleans are rendered as text.
    pub fn get_string(&self, path: &str) -> Result<String, CapError> {
        let value = self.require(path)?;
        match value {
            Value::String(text) => Ok(text.clone()),
            Value::Number(number) => Ok(number.to_string()),
            Value::Bool(flag) => Ok(flag.to_string()),
            _ => Err(type_mismatch(&self.full_path(path), "string")),
        }
    }

    /// Reads an array of numbers, given either as a sequence or as a
    /// comma-separated string.
    pub fn get_array_double(&self, path: &str) -> Result<Vec<f64>, CapError> {
        let value = self.require(path)?;
        let mismatch = || type_mismatch(&self.full_path(path), "array of numbers");
        match value {
            Value::Sequence(items) => items.iter().map(|item| as_double(item).ok_or_else(mismatch)).collect(),
            Value::String(text) => text
                .split(',')
                .map(|item| item.trim().parse::<f64>().map_err(|_| mismatch()))
                .collect(),
            _ => Err(mismatch()),
        }
    }

    /// Reads an integer, falling back to `default` when the key is absent.
    pub fn get_int_with_default_value(&self, path: &str, default: i64) -> Result<i64, CapError> {
        if self.contains(path) {
            self.get_int(path)
        } else {
            Ok(default)
        }
    }

    /// Reads a number, falling back to `default` when the key is absent.
    pub fn get_double_with_default_value(&self, path: &str, default: f64) -> Result<f64, CapError> {
        if self.contains(path) {
            self.get_double(path)
        } else {
            Ok(default)
        }
    }

    /// Reads a string, falling back to `default` when the key is absent.
    pub fn get_string_with_default_value(
        &self,
        path: &str,
        default: &str,
    ) -> Result<String, CapError> {
        if self.contains(path) {
            self.get_string(path)
        } else {
            Ok(default.to_string())
        }
    }

    /// Reads a list of strings given as a sequence or as a comma/space separated
    /// string. Absent keys yield an empty list.
    pub fn get_string_list_with_default(&self, path: &str) -> Result<Vec<String>, CapError> {
        let Some(value) = self.lookup(path) else {
            return Ok(Vec::new());
        };
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Sequence(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(text) => Ok(text.clone()),
                    _ => Err(type_mismatch(&self.full_path(path), "list of strings")),
                })
                .collect(),
            Value::String(text) => Ok(text
                .split([',', ' '])
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()),
            _ => Err(type_mismatch(&self.full_path(path), "list of strings")),
        }
    }

    /// Overwrites (or creates) a numeric leaf, creating intermediate maps.
    pub fn put_double(&mut self, path: &str, value: f64) -> Result<(), CapError> {
        let full = self.full_path(path);
        let segments: Vec<&str> = split_path(path).collect();
        let Some((leaf, parents)) = segments.split_last() else {
            return Err(missing_key(&full));
        };
        let mut node = &mut self.root;
        for segment in parents {
            let map = node
                .as_mapping_mut()
                .ok_or_else(|| type_mismatch(&full, "mapping"))?;
            node = map
                .entry(Value::String((*segment).to_string()))
                .or_insert_with(|| Value::Mapping(Mapping::new()));
        }
        let map = node
            .as_mapping_mut()
            .ok_or_else(|| type_mismatch(&full, "mapping"))?;
        map.insert(Value::String((*leaf).to_string()), Value::from(value));
        Ok(())
    }
}

fn as_double(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
