use std::collections::btree_map;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Dimension name to value.
pub type DimMap = BTreeMap<String, Value>;
/// Type name to the event the object saw for that type.
pub type TypeMarkers = BTreeMap<String, Event>;
/// Object id to its change record.
pub type ObjectList = BTreeMap<String, ObjectChange>;

/// What happened to an object with respect to one type of its type chain.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Event {
    New = 0,
    Modification = 1,
    Delete = 2,
}

impl TryFrom<u8> for Event {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Event::New),
            1 => Ok(Event::Modification),
            2 => Ok(Event::Delete),
            other => Err(Error::MalformedRequest(format!("unknown event code {other}"))),
        }
    }
}

impl From<Event> for u8 {
    fn from(event: Event) -> u8 {
        event as u8
    }
}

/// Change record of a single object inside a [`Delta`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectChange {
    #[serde(default)]
    pub dims: DimMap,
    #[serde(default)]
    pub types: TypeMarkers,
    /// Set on a creation that stands for a delete followed by a recreation, so the object
    /// existed before the change began. A later delete of such a record is kept.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub replaces: bool,
}

impl ObjectChange {
    /// Record carrying `event` for its own type and no dimensions yet.
    pub fn new(type_name: impl Into<String>, event: Event) -> Self {
        let mut types = TypeMarkers::new();
        types.insert(type_name.into(), event);
        Self {
            dims: DimMap::new(),
            types,
            replaces: false,
        }
    }

    pub fn with_dim(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.dims.insert(name.into(), value.into());
        self
    }

    pub fn with_marker(mut self, type_name: impl Into<String>, event: Event) -> Self {
        self.types.insert(type_name.into(), event);
        self
    }

    pub fn marker(&self, type_name: &str) -> Option<Event> {
        self.types.get(type_name).copied()
    }

    /// Event this record carries for `type_name`, the type it is filed under.
    pub fn event(&self, type_name: &str, oid: &str) -> Result<Event> {
        self.marker(type_name).ok_or_else(|| Error::MissingEvent {
            type_name: type_name.to_string(),
            oid: oid.to_string(),
        })
    }

    /// JSON encoding handed to custom merge strategies.
    pub fn raw(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Type name to object id to change record. Keys stay sorted so the merge
/// algorithms can run as merge-joins.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Delta(BTreeMap<String, ObjectList>);

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|objects| objects.is_empty())
    }

    pub fn object_count(&self) -> usize {
        self.0.values().map(|objects| objects.len()).sum()
    }

    pub fn objects(&self, type_name: &str) -> Option<&ObjectList> {
        self.0.get(type_name)
    }

    pub fn object(&self, type_name: &str, oid: &str) -> Option<&ObjectChange> {
        self.0.get(type_name).and_then(|objects| objects.get(oid))
    }

    /// Inserts or replaces the record of `type_name/oid`.
    pub fn insert(
        &mut self,
        type_name: impl Into<String>,
        oid: impl Into<String>,
        change: ObjectChange,
    ) -> Option<ObjectChange> {
        self.0
            .entry(type_name.into())
            .or_default()
            .insert(oid.into(), change)
    }

    pub fn with_object(
        mut self,
        type_name: impl Into<String>,
        oid: impl Into<String>,
        change: ObjectChange,
    ) -> Self {
        self.insert(type_name, oid, change);
        self
    }

    pub(crate) fn insert_objects(&mut self, type_name: String, objects: ObjectList) {
        if !objects.is_empty() {
            self.0.insert(type_name, objects);
        }
    }

    /// Checks that every record carries an event for the type it is filed under.
    pub fn validate(&self) -> Result<()> {
        for (type_name, objects) in &self.0 {
            for (oid, change) in objects {
                change.event(type_name, oid)?;
            }
        }
        Ok(())
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, ObjectList> {
        self.0.iter()
    }

    /// Keeps only the types for which `keep` returns true.
    pub fn retain_types(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.0.retain(|type_name, _| keep(type_name));
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl IntoIterator for Delta {
    type Item = (String, ObjectList);
    type IntoIter = btree_map::IntoIter<String, ObjectList>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Delta {
    type Item = (&'a String, &'a ObjectList);
    type IntoIter = btree_map::Iter<'a, String, ObjectList>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<(String, ObjectList)> for Delta {
    fn from_iter<I: IntoIterator<Item = (String, ObjectList)>>(iter: I) -> Self {
        let mut delta = Delta::new();
        for (type_name, objects) in iter {
            delta.insert_objects(type_name, objects);
        }
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_as_integer_codes() {
        let change = ObjectChange::new("Car", Event::Modification).with_dim("xvel", 1);
        let encoded = serde_json::to_value(&change).unwrap();
        assert_eq!(encoded, json!({"dims": {"xvel": 1}, "types": {"Car": 1}}));
    }

    #[test]
    fn unknown_event_code_is_rejected() {
        let err = serde_json::from_value::<ObjectChange>(json!({"types": {"Car": 7}}));
        assert!(err.is_err());
    }

    #[test]
    fn dims_default_to_empty() {
        let change: ObjectChange = serde_json::from_value(json!({"types": {"Car": 2}})).unwrap();
        assert!(change.dims.is_empty());
        assert_eq!(change.event("Car", "0").unwrap(), Event::Delete);
        assert!(matches!(
            change.event("Vehicle", "0"),
            Err(Error::MissingEvent { .. })
        ));
    }

    #[test]
    fn replacement_flag_is_only_encoded_when_set() {
        let mut change = ObjectChange::new("Car", Event::New);
        assert_eq!(
            serde_json::to_value(&change).unwrap(),
            json!({"dims": {}, "types": {"Car": 0}})
        );
        change.replaces = true;
        let encoded = serde_json::to_value(&change).unwrap();
        assert_eq!(encoded["replaces"], json!(true));
        assert_eq!(serde_json::from_value::<ObjectChange>(encoded).unwrap(), change);
    }

    #[test]
    fn validate_reports_unmarked_records() {
        let delta = Delta::new()
            .with_object("Car", "0", ObjectChange::new("Car", Event::New))
            .with_object("Car", "1", ObjectChange::new("Vehicle", Event::New));
        assert!(matches!(
            delta.validate(),
            Err(Error::MissingEvent { ref oid, .. }) if oid == "1"
        ));
    }

    #[test]
    fn empty_object_lists_do_not_count() {
        let delta: Delta = vec![("Car".to_string(), ObjectList::new())]
            .into_iter()
            .collect();
        assert!(delta.is_empty());
        assert_eq!(delta.type_names().count(), 0);
    }

    #[test]
    fn delta_json_shape_is_type_then_oid() {
        let delta = Delta::new().with_object(
            "Car",
            "0",
            ObjectChange::new("Car", Event::New).with_dim("oid", 0),
        );
        let bytes = delta.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            json!({"Car": {"0": {"dims": {"oid": 0}, "types": {"Car": 0}}}})
        );
        assert_eq!(Delta::from_json(&bytes).unwrap(), delta);
    }
}
