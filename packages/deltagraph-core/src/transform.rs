//! Operational transform of two concurrent deltas rooted at the same version.
//!
//! Given the delta a peer pushed and the delta the mainline committed since the same base,
//! produces `(patch_pushed, patch_concurrent)` such that
//! `head ∘ patch_pushed == end ∘ patch_concurrent`. `patch_pushed` carries the pushed
//! side's effects onto the mainline head; `patch_concurrent` carries the mainline's effects
//! onto the pushed end. The mainline wins every same-field conflict.

use crate::delta::{Delta, DimMap, Event, ObjectChange, ObjectList, TypeMarkers};
use crate::error::{Error, Result};
use crate::traits::{Conflict, ConflictHook, Resolution};

pub fn operational_transform<H>(
    pushed: &Delta,
    concurrent: &Delta,
    hook: &H,
) -> Result<(Delta, Delta)>
where
    H: ConflictHook + ?Sized,
{
    let mut patch_pushed = Delta::new();
    let mut patch_concurrent = Delta::new();

    for (type_name, pushed_objects) in pushed {
        match concurrent.objects(type_name) {
            None => patch_pushed.insert_objects(type_name.clone(), pushed_objects.clone()),
            Some(concurrent_objects) => {
                let (to_head, to_end) =
                    transform_type(type_name, pushed_objects, concurrent_objects, hook)?;
                patch_pushed.insert_objects(type_name.clone(), to_head);
                patch_concurrent.insert_objects(type_name.clone(), to_end);
            }
        }
    }
    for (type_name, concurrent_objects) in concurrent {
        if pushed.objects(type_name).is_none() {
            patch_concurrent.insert_objects(type_name.clone(), concurrent_objects.clone());
        }
    }

    Ok((patch_pushed, patch_concurrent))
}

fn transform_type<H>(
    type_name: &str,
    pushed: &ObjectList,
    concurrent: &ObjectList,
    hook: &H,
) -> Result<(ObjectList, ObjectList)>
where
    H: ConflictHook + ?Sized,
{
    let mut to_head = ObjectList::new();
    let mut to_end = ObjectList::new();

    for (oid, pushed_change) in pushed {
        match concurrent.get(oid) {
            None => {
                to_head.insert(oid.clone(), pushed_change.clone());
            }
            Some(concurrent_change) => {
                let conflict = Conflict {
                    type_name,
                    oid,
                    pushed: pushed_change,
                    concurrent: concurrent_change,
                };
                let resolution = transform_object(conflict, hook)?;
                if let Some(change) = resolution.pushed {
                    to_head.insert(oid.clone(), change);
                }
                if let Some(change) = resolution.concurrent {
                    to_end.insert(oid.clone(), change);
                }
            }
        }
    }
    for (oid, concurrent_change) in concurrent {
        if !pushed.contains_key(oid) {
            to_end.insert(oid.clone(), concurrent_change.clone());
        }
    }

    Ok((to_head, to_end))
}

fn transform_object<H>(conflict: Conflict<'_>, hook: &H) -> Result<Resolution>
where
    H: ConflictHook + ?Sized,
{
    let Conflict {
        type_name,
        oid,
        pushed,
        concurrent,
    } = conflict;
    let pushed_event = pushed.event(type_name, oid)?;
    let concurrent_event = concurrent.event(type_name, oid)?;
    let custom = hook.handles(type_name);

    match (pushed_event, concurrent_event) {
        (Event::Delete, Event::Delete) => Ok(Resolution::default()),
        (Event::New, Event::New) if custom => hook.resolve(conflict),
        (Event::New, Event::New) => Ok(resolve_creation(type_name, pushed, concurrent)),
        (Event::Modification, Event::Modification) if custom => hook.resolve(conflict),
        (Event::Modification, Event::Modification) => {
            Ok(resolve_modification(type_name, pushed, concurrent))
        }
        (Event::Modification, Event::Delete) | (Event::Delete, Event::Modification) if custom => {
            hook.resolve(conflict)
        }
        (Event::Modification, Event::Delete) => Ok(Resolution {
            pushed: None,
            concurrent: Some(concurrent.clone()),
        }),
        (Event::Delete, Event::Modification) => Ok(Resolution {
            pushed: Some(pushed.clone()),
            concurrent: None,
        }),
        (pushed_event, concurrent_event) => Err(Error::invariant(
            type_name,
            oid,
            divergence_reason(pushed_event, concurrent_event),
        )),
    }
}

fn divergence_reason(pushed: Event, concurrent: Event) -> String {
    match (pushed, concurrent) {
        (Event::New, Event::Modification) => {
            "divergent creation of an object the mainline modified".to_string()
        }
        (Event::New, Event::Delete) => {
            "divergent creation of an object the mainline deleted".to_string()
        }
        (Event::Modification, Event::New) => {
            "divergent modification of an object the mainline created".to_string()
        }
        (Event::Delete, Event::New) => {
            "divergent deletion of an object the mainline created".to_string()
        }
        (pushed, concurrent) => format!("no resolution for {pushed:?} against {concurrent:?}"),
    }
}

/// Both sides created the object. The mainline's values replace the pushed ones; dims only
/// the pushed side set are forwarded onto the head.
fn resolve_creation(type_name: &str, pushed: &ObjectChange, concurrent: &ObjectChange) -> Resolution {
    let pushed_only: DimMap = pushed
        .dims
        .iter()
        .filter(|(name, _)| !concurrent.dims.contains_key(*name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    let mainline_differs: DimMap = concurrent
        .dims
        .iter()
        .filter(|(name, value)| pushed.dims.get(*name) != Some(*value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    let pushed_markers: TypeMarkers = pushed
        .types
        .iter()
        .filter(|(name, _)| !concurrent.types.contains_key(*name))
        .map(|(name, event)| (name.clone(), *event))
        .collect();
    let markers_differ = concurrent
        .types
        .iter()
        .any(|(name, event)| name != type_name && pushed.types.get(name) != Some(event));

    let to_head = (!pushed_only.is_empty() || !pushed_markers.is_empty()).then(|| {
        let mut types = pushed_markers;
        types.insert(type_name.to_string(), Event::Modification);
        ObjectChange {
            dims: pushed_only,
            types,
            replaces: false,
        }
    });
    // A modification, so the pushed end keeps its own creation record underneath.
    let to_end = (!mainline_differs.is_empty() || markers_differ).then(|| {
        let mut types = concurrent.types.clone();
        types.insert(type_name.to_string(), Event::Modification);
        ObjectChange {
            dims: mainline_differs,
            types,
            replaces: false,
        }
    });

    Resolution {
        pushed: to_head,
        concurrent: to_end,
    }
}

/// Both sides modified the object: dimension-level three-way split, mainline wins on
/// overlap. Markers one side lacks are copied to both patches; shared markers keep the
/// destination side's value.
fn resolve_modification(
    type_name: &str,
    pushed: &ObjectChange,
    concurrent: &ObjectChange,
) -> Resolution {
    let mut to_head_dims = DimMap::new();
    let mut to_end_dims = DimMap::new();
    for (name, value) in &pushed.dims {
        if !concurrent.dims.contains_key(name) {
            to_head_dims.insert(name.clone(), value.clone());
        }
    }
    for (name, value) in &concurrent.dims {
        if pushed.dims.get(name) != Some(value) {
            to_end_dims.insert(name.clone(), value.clone());
        }
    }

    let (mut to_head_types, mut to_end_types) = cherry_pick_markers(&concurrent.types, &pushed.types);
    to_head_types.insert(type_name.to_string(), Event::Modification);
    to_end_types.insert(type_name.to_string(), Event::Modification);

    Resolution {
        pushed: Some(ObjectChange {
            dims: to_head_dims,
            types: to_head_types,
            replaces: false,
        }),
        concurrent: Some(ObjectChange {
            dims: to_end_dims,
            types: to_end_types,
            replaces: false,
        }),
    }
}

/// Union of both marker sets, once with `head`'s values winning and once with `end`'s.
fn cherry_pick_markers(head: &TypeMarkers, end: &TypeMarkers) -> (TypeMarkers, TypeMarkers) {
    let mut head_view = end.clone();
    head_view.extend(head.iter().map(|(name, event)| (name.clone(), *event)));
    let mut end_view = head.clone();
    end_view.extend(end.iter().map(|(name, event)| (name.clone(), *event)));
    (head_view, end_view)
}
