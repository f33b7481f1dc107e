use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::delta::Delta;
use crate::error::{Error, Result};

/// Dimensions and sorted type chain of one registered type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeSchema {
    pub dims: BTreeSet<String>,
    pub chain: Vec<String>,
}

/// Types a repository stores. Fixed for the repository's lifetime.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Schema {
    types: BTreeMap<String, TypeSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `type_name`. An empty `chain` means the type is its own only member.
    pub fn with_type<D, C>(mut self, type_name: impl Into<String>, dims: D, chain: C) -> Self
    where
        D: IntoIterator,
        D::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        let type_name = type_name.into();
        let mut chain: Vec<String> = chain.into_iter().map(Into::into).collect();
        if chain.is_empty() {
            chain.push(type_name.clone());
        }
        chain.sort();
        chain.dedup();
        self.types.insert(
            type_name,
            TypeSchema {
                dims: dims.into_iter().map(Into::into).collect(),
                chain,
            },
        );
        self
    }

    /// Parses the `{type: [[dims...], [chain...]]}` shape peers exchange on connect.
    pub fn from_type_info(info: &Value) -> Result<Self> {
        let entries = info
            .as_object()
            .ok_or_else(|| Error::Config("type info must be an object".into()))?;
        let mut schema = Schema::new();
        for (type_name, entry) in entries {
            let pair = entry
                .as_array()
                .filter(|pair| pair.len() == 2)
                .ok_or_else(|| {
                    Error::Config(format!("type info for {type_name} must be [dims, chain]"))
                })?;
            let dims = string_list(type_name, &pair[0])?;
            let chain = string_list(type_name, &pair[1])?;
            schema = schema.with_type(type_name.clone(), dims, chain);
        }
        Ok(schema)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub fn dims(&self, type_name: &str) -> Option<&BTreeSet<String>> {
        self.types.get(type_name).map(|schema| &schema.dims)
    }

    pub fn type_chain(&self, type_name: &str) -> Option<&[String]> {
        self.types.get(type_name).map(|schema| schema.chain.as_slice())
    }

    /// Drops every type this schema does not store.
    pub fn filter_delta(&self, mut delta: Delta) -> Delta {
        delta.retain_types(|type_name| self.contains(type_name));
        delta
    }

    /// Maps a requester's `{type: chain}` onto the types stored here. Each entry resolves to
    /// the first member of its sorted chain that this schema knows; unmatched entries are
    /// skipped.
    pub fn resolve_requested(&self, requested: &BTreeMap<String, Vec<String>>) -> BTreeSet<String> {
        requested
            .values()
            .filter_map(|chain| {
                let mut sorted: Vec<&String> = chain.iter().collect();
                sorted.sort();
                sorted.into_iter().find(|name| self.contains(name)).cloned()
            })
            .collect()
    }

    /// The `{type: [[dims...], [chain...]]}` form of this schema.
    pub fn to_type_info(&self) -> Value {
        let entries = self
            .types
            .iter()
            .map(|(name, schema)| {
                let dims: Vec<Value> = schema.dims.iter().cloned().map(Value::String).collect();
                let chain: Vec<Value> = schema.chain.iter().cloned().map(Value::String).collect();
                (name.clone(), Value::Array(vec![Value::Array(dims), Value::Array(chain)]))
            })
            .collect();
        Value::Object(entries)
    }
}

fn string_list(type_name: &str, value: &Value) -> Result<Vec<String>> {
    value
        .as_array()
        .ok_or_else(|| Error::Config(format!("type info for {type_name} must list strings")))?
        .iter()
        .map(|item| {
            item.as_str().map(str::to_string).ok_or_else(|| {
                Error::Config(format!("type info for {type_name} contains a non-string"))
            })
        })
        .collect()
}
