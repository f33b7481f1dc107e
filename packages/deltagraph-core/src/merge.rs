//! Sequential composition of deltas.
//!
//! `merge_delta(older, newer)` produces the single delta equivalent to applying `older` and
//! then `newer`. Composition is associative, which is what lets the version graph elide
//! pass-through nodes without changing what any reader observes.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::delta::{Delta, DimMap, Event, ObjectChange, ObjectList, TypeMarkers};
use crate::error::Result;

/// Composes two sequential deltas.
///
/// With `drop_ephemeral` set, a delete in `newer` removes the object from the result even
/// when `older` did not create it, and deletes of objects `older` never mentioned are
/// suppressed. Used when the composed window is known to start from the object's absence.
pub fn merge_delta(older: Delta, newer: Delta, drop_ephemeral: bool) -> Result<Delta> {
    if newer.is_empty() {
        return Ok(older);
    }
    if older.is_empty() && !drop_ephemeral {
        return Ok(newer);
    }
    let mut merged: BTreeMap<String, ObjectList> = older.into_iter().collect();
    for (type_name, newer_objects) in newer {
        match merged.entry(type_name) {
            Entry::Vacant(slot) => {
                let type_name = slot.key().clone();
                let objects = merge_object_lists(
                    &type_name,
                    ObjectList::new(),
                    newer_objects,
                    drop_ephemeral,
                )?;
                slot.insert(objects);
            }
            Entry::Occupied(mut slot) => {
                let older_objects = std::mem::take(slot.get_mut());
                let objects =
                    merge_object_lists(slot.key(), older_objects, newer_objects, drop_ephemeral)?;
                *slot.get_mut() = objects;
            }
        }
    }
    Ok(merged.into_iter().collect())
}

/// Composes the object lists of one type.
pub fn merge_object_lists(
    type_name: &str,
    mut older: ObjectList,
    newer: ObjectList,
    drop_ephemeral: bool,
) -> Result<ObjectList> {
    for (oid, newer_change) in newer {
        let newer_event = newer_change.event(type_name, &oid)?;
        match older.entry(oid) {
            Entry::Vacant(slot) => {
                if !(drop_ephemeral && newer_event == Event::Delete) {
                    slot.insert(newer_change);
                }
            }
            Entry::Occupied(mut slot) => {
                let older_event = slot.get().event(type_name, slot.key())?;
                let created_within = older_event == Event::New && !slot.get().replaces;
                if newer_event == Event::Delete && (created_within || drop_ephemeral) {
                    slot.remove();
                    continue;
                }
                let older_change = std::mem::take(slot.get_mut());
                let merged = merge_object(
                    type_name,
                    slot.key(),
                    Some(older_change),
                    newer_change,
                )?;
                *slot.get_mut() = merged;
            }
        }
    }
    Ok(older)
}

/// Composes two sequential records of the same object.
///
/// A creation after any other record is a recreation and replaces it wholesale. It keeps
/// track of whether the object existed before `older` began: only a creation made from
/// absence may vanish when a delete follows.
pub fn merge_object(
    type_name: &str,
    oid: &str,
    older: Option<ObjectChange>,
    mut newer: ObjectChange,
) -> Result<ObjectChange> {
    let Some(mut older) = older else {
        return Ok(newer);
    };
    let older_event = older.event(type_name, oid)?;
    let newer_event = newer.event(type_name, oid)?;

    match (older_event, newer_event) {
        (_, Event::Delete) => Ok(newer),
        (Event::Delete, Event::Modification) => Ok(older),
        (older_event, Event::New) => {
            newer.replaces = older_event != Event::New || older.replaces;
            Ok(newer)
        }
        (Event::New | Event::Modification, Event::Modification) => {
            merge_markers(&mut older.types, newer.types);
            update_dims(&mut older.dims, newer.dims);
            Ok(older)
        }
    }
}

/// Creation markers survive anything but a delete.
fn merge_markers(older: &mut TypeMarkers, newer: TypeMarkers) {
    for (type_name, event) in newer {
        match older.entry(type_name) {
            Entry::Vacant(slot) => {
                slot.insert(event);
            }
            Entry::Occupied(mut slot) => {
                if event == Event::Delete || *slot.get() != Event::New {
                    slot.insert(event);
                }
            }
        }
    }
}

/// Last write wins per dimension.
pub(crate) fn update_dims(older: &mut DimMap, newer: DimMap) {
    older.extend(newer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;

    fn car(oid: &str, change: ObjectChange) -> Delta {
        Delta::new().with_object("Car", oid, change)
    }

    #[test]
    fn disjoint_objects_are_unioned() {
        let older = car("0", ObjectChange::new("Car", Event::New).with_dim("xvel", 0));
        let newer = car("1", ObjectChange::new("Car", Event::New).with_dim("xvel", 5));
        let merged = merge_delta(older, newer, false).unwrap();
        assert_eq!(merged.object_count(), 2);
    }

    #[test]
    fn modification_keeps_creation_marker() {
        let older = car(
            "0",
            ObjectChange::new("Car", Event::New)
                .with_dim("xvel", 0)
                .with_dim("yvel", 0),
        );
        let newer = car("0", ObjectChange::new("Car", Event::Modification).with_dim("xvel", 1));
        let merged = merge_delta(older, newer, false).unwrap();
        let obj = merged.object("Car", "0").unwrap();
        assert_eq!(obj.marker("Car"), Some(Event::New));
        assert_eq!(obj.dims.get("xvel"), Some(&json!(1)));
        assert_eq!(obj.dims.get("yvel"), Some(&json!(0)));
    }

    #[test]
    fn created_then_deleted_object_vanishes() {
        let older = car("0", ObjectChange::new("Car", Event::New).with_dim("xvel", 0));
        let newer = car("0", ObjectChange::new("Car", Event::Delete));
        let merged = merge_delta(older, newer, false).unwrap();
        assert!(merged.is_empty());
        assert_eq!(merged.type_names().count(), 0);
    }

    #[test]
    fn delete_of_older_object_is_preserved_without_drop_ephemeral() {
        let older = car("0", ObjectChange::new("Car", Event::Modification).with_dim("xvel", 3));
        let newer = car("0", ObjectChange::new("Car", Event::Delete));
        let merged = merge_delta(older.clone(), newer.clone(), false).unwrap();
        assert_eq!(
            merged.object("Car", "0").unwrap().marker("Car"),
            Some(Event::Delete)
        );

        let dropped = merge_delta(older, newer, true).unwrap();
        assert!(dropped.is_empty());
    }

    #[test]
    fn drop_ephemeral_suppresses_unmatched_delete() {
        let older = car("0", ObjectChange::new("Car", Event::New));
        let newer = car("1", ObjectChange::new("Car", Event::Delete));
        let merged = merge_delta(older, newer, true).unwrap();
        assert!(merged.object("Car", "1").is_none());
        assert!(merged.object("Car", "0").is_some());
    }

    #[test]
    fn modification_after_delete_is_ignored() {
        let older = car("0", ObjectChange::new("Car", Event::Delete));
        let newer = car("0", ObjectChange::new("Car", Event::Modification).with_dim("xvel", 9));
        let merged = merge_delta(older.clone(), newer, false).unwrap();
        assert_eq!(merged, older);
    }

    #[test]
    fn recreation_after_delete_takes_newer() {
        let older = car("0", ObjectChange::new("Car", Event::Delete));
        let newer = car("0", ObjectChange::new("Car", Event::New).with_dim("xvel", 2));
        let merged = merge_delta(older, newer, false).unwrap();
        let obj = merged.object("Car", "0").unwrap();
        assert_eq!(obj.marker("Car"), Some(Event::New));
        assert_eq!(obj.dims.get("xvel"), Some(&json!(2)));
        assert!(obj.replaces);
    }

    #[test]
    fn recreation_replaces_an_earlier_modification() {
        let older = car("0", ObjectChange::new("Car", Event::Modification).with_dim("yvel", 4));
        let newer = car("0", ObjectChange::new("Car", Event::New).with_dim("xvel", 2));
        let merged = merge_delta(older, newer, false).unwrap();
        let obj = merged.object("Car", "0").unwrap();
        assert_eq!(obj.marker("Car"), Some(Event::New));
        assert!(!obj.dims.contains_key("yvel"));
        assert!(obj.replaces);
    }

    #[test]
    fn recreation_inherits_where_the_object_came_from() {
        let created = ObjectChange::new("Car", Event::New);
        let mut recreated = ObjectChange::new("Car", Event::New).with_dim("xvel", 1);
        recreated.replaces = true;
        let merged = merge_object("Car", "0", Some(created), recreated).unwrap();
        assert!(!merged.replaces);
    }

    #[test]
    fn deleting_a_replacement_keeps_the_delete() {
        let mut recreated = ObjectChange::new("Car", Event::New);
        recreated.replaces = true;
        let merged = merge_delta(
            car("0", recreated),
            car("0", ObjectChange::new("Car", Event::Delete)),
            false,
        )
        .unwrap();
        assert_eq!(
            merged.object("Car", "0").unwrap().marker("Car"),
            Some(Event::Delete)
        );
    }

    #[test]
    fn missing_own_marker_is_reported() {
        let older = car("0", ObjectChange::new("Car", Event::New));
        let newer = car("0", ObjectChange::new("Vehicle", Event::Modification));
        let err = merge_delta(older, newer, false).unwrap_err();
        assert!(matches!(err, Error::MissingEvent { .. }));
    }

    #[test]
    fn ancillary_markers_follow_creation_rule() {
        let mut older = TypeMarkers::new();
        older.insert("Car".into(), Event::New);
        older.insert("Vehicle".into(), Event::Modification);
        let mut newer = TypeMarkers::new();
        newer.insert("Car".into(), Event::Modification);
        newer.insert("Vehicle".into(), Event::New);
        newer.insert("Thing".into(), Event::Modification);
        merge_markers(&mut older, newer);
        assert_eq!(older.get("Car"), Some(&Event::New));
        assert_eq!(older.get("Vehicle"), Some(&Event::New));
        assert_eq!(older.get("Thing"), Some(&Event::Modification));
    }
}
