use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::delta::{Delta, DimMap, Event, ObjectChange};
use crate::error::{Error, Result};
use crate::graph::{lock, VersionGraph};
use crate::ids::fresh_merge_tag;
use crate::merge::merge_delta;
use crate::schema::Schema;
use crate::traits::{Conflict, ConflictHook, MergeInput, MergeStrategy, Resolution};
use crate::transform::operational_transform;

/// Custom merge strategies keyed by the type they handle.
pub type Strategies = HashMap<String, Arc<dyn MergeStrategy>>;

/// Result of a read: everything between `start` and `end`, squashed into one delta.
#[derive(Clone, Debug, PartialEq)]
pub struct Retrieved {
    pub delta: Delta,
    pub start: String,
    pub end: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct GraphState {
    head: String,
    live: bool,
}

/// Serializes writers against one [`VersionGraph`] and resolves divergent pushes.
///
/// Reads never take the write lock; they only pin the nodes they walk over.
pub struct VersionManager {
    app_name: String,
    graph: VersionGraph,
    schema: Schema,
    strategies: Strategies,
    write_lock: Mutex<()>,
    changes: watch::Sender<GraphState>,
}

impl VersionManager {
    pub fn new(app_name: impl Into<String>, schema: Schema, strategies: Strategies) -> Self {
        let graph = VersionGraph::new();
        let (changes, _) = watch::channel(GraphState {
            head: graph.head_tag(),
            live: true,
        });
        Self {
            app_name: app_name.into(),
            graph,
            schema,
            strategies,
            write_lock: Mutex::new(()),
            changes,
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn graph(&self) -> &VersionGraph {
        &self.graph
    }

    pub fn head_tag(&self) -> String {
        self.graph.head_tag()
    }

    /// Commits the change `start -> end` pushed by `app`.
    ///
    /// Types outside the schema are dropped. If the head moved past `start` in the meantime
    /// the push is transformed against what was committed since and joined to the mainline
    /// under a fresh merge tag. Nothing is committed when resolution fails.
    #[instrument(skip(self, delta))]
    pub fn receive_data(
        &self,
        app: &str,
        start: &str,
        end: &str,
        delta: Delta,
        from_external: bool,
    ) -> Result<()> {
        if start == end {
            return Ok(());
        }
        if !self.graph.is_live() {
            return Err(Error::TornDown);
        }
        let package = self.schema.filter_delta(delta);
        let collected = {
            let _guard = lock(&self.write_lock);
            if !self.graph.contains(start) {
                return Err(Error::UnknownVersion(start.to_string()));
            }
            if self.graph.contains(end) {
                debug!("version already committed, treating push as a retransmission");
            } else if let Err(e) = package
                .validate()
                .and_then(|()| self.resolve_conflict(start, end, package, from_external))
            {
                warn!(error = %e, "rejected push");
                return Err(e);
            }
            self.graph.update_app_ref(app, end)?;
            self.graph.clear_disposal()
        };
        self.notify();
        collected
    }

    fn resolve_conflict(&self, start: &str, end: &str, package: Delta, from_external: bool) -> Result<()> {
        let (concurrent, head) = self.collect(start, None, None)?;
        if head == start {
            return self.graph.continue_chain(start, end, package, false);
        }

        let hook = StrategyHook {
            manager: self,
            start,
            from_external,
        };
        let (patch_pushed, patch_concurrent) = operational_transform(&package, &concurrent, &hook)?;
        let merge_tag = fresh_merge_tag();

        self.graph.continue_chain(start, end, package, false)?;
        self.graph.continue_chain(&head, &merge_tag, patch_pushed, false)?;
        self.graph.continue_chain(end, &merge_tag, patch_concurrent, false)?;
        info!(start, end, head = %head, merge = %merge_tag, "merged divergent push");
        Ok(())
    }

    /// Squashes every delta from `from` to the current head and marks the head as sent to
    /// `app`. `requested` maps the reader's types to their type chains; `None` reads every
    /// stored type.
    #[instrument(skip(self, requested))]
    pub fn retrieve_data(
        &self,
        app: &str,
        from: &str,
        requested: Option<&BTreeMap<String, Vec<String>>>,
    ) -> Result<Retrieved> {
        let types = requested.map(|requested| self.schema.resolve_requested(requested));
        let (delta, end) = self.collect(from, types.as_ref(), Some(app))?;
        Ok(Retrieved {
            delta,
            start: from.to_string(),
            end,
        })
    }

    /// Squashes `from` up to the head. With `sent_to` set, the reached version is marked as
    /// sent to that app while the cursor still holds it.
    fn collect(
        &self,
        from: &str,
        types: Option<&BTreeSet<String>>,
        sent_to: Option<&str>,
    ) -> Result<(Delta, String)> {
        let mut merged = Delta::new();
        let mut end = from.to_string();
        let mut cursor = self.graph.cursor(from)?;
        for step in cursor.by_ref() {
            let mut package = step.edge.delta().clone();
            if let Some(types) = types {
                package.retain_types(|type_name| types.contains(type_name));
            }
            merged = merge_delta(merged, package, false)?;
            end = step.tag;
        }
        if let Some(app) = sent_to {
            self.graph.mark_app_ref_await(app, &end)?;
        }
        drop(cursor);
        Ok((merged, end))
    }

    /// Acknowledges that `app` received everything up to `end`.
    pub fn data_sent_confirmed(&self, app: &str, start: &str, end: &str) -> Result<()> {
        if start == end {
            return Ok(());
        }
        self.graph.update_app_ref(app, end)
    }

    /// Resolves once the head is no longer `version` or the graph is torn down.
    pub async fn wait_graph_change(&self, version: &str) {
        let mut changes = self.changes.subscribe();
        loop {
            {
                let state = changes.borrow_and_update();
                if !state.live || state.head != version {
                    return;
                }
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    }

    /// Like [`wait_graph_change`](Self::wait_graph_change) but gives up after `timeout`.
    /// Returns whether a change was observed.
    pub async fn wait_graph_change_for(&self, version: &str, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_graph_change(version))
            .await
            .is_ok()
    }

    /// Tears the graph down and wakes every waiter.
    pub fn teardown(&self) {
        {
            let _guard = lock(&self.write_lock);
            self.graph.teardown();
        }
        self.notify();
    }

    fn notify(&self) {
        self.changes.send_replace(GraphState {
            head: self.graph.head_tag(),
            live: self.graph.is_live(),
        });
    }

    fn run_custom_merge(
        &self,
        start: &str,
        conflict: Conflict<'_>,
        from_external: bool,
    ) -> Result<Resolution> {
        let Conflict {
            type_name,
            oid,
            pushed,
            concurrent,
        } = conflict;
        let custom_error = |reason: &str| Error::CustomMerge {
            type_name: type_name.to_string(),
            oid: oid.to_string(),
            reason: reason.to_string(),
        };
        let strategy = self
            .strategies
            .get(type_name)
            .ok_or_else(|| custom_error("no strategy registered"))?;
        let empty = BTreeSet::new();
        let dims = self.schema.dims(type_name).unwrap_or(&empty);

        let pushed_event = pushed.event(type_name, oid)?;
        let concurrent_event = concurrent.event(type_name, oid)?;
        let mut original =
            (!(pushed_event == Event::New && concurrent_event == Event::New)).then(DimMap::new);
        let mut pushed_dims = side_dims(pushed, pushed_event, dims);
        let mut concurrent_dims = side_dims(concurrent, concurrent_event, dims);
        self.complete_from_history(
            start,
            type_name,
            oid,
            dims,
            [&mut original, &mut pushed_dims, &mut concurrent_dims],
        )?;

        let pushed_raw = pushed.raw()?;
        let concurrent_raw = concurrent.raw()?;
        let (local, remote, local_raw, remote_raw) = if from_external {
            (concurrent_dims, pushed_dims, concurrent_raw, pushed_raw)
        } else {
            (pushed_dims, concurrent_dims, pushed_raw, concurrent_raw)
        };
        let output = strategy.merge(MergeInput {
            type_name: type_name.to_string(),
            oid: oid.to_string(),
            original,
            local,
            remote,
            local_raw,
            remote_raw,
        })?;
        for patch in [&output.local, &output.remote].into_iter().flatten() {
            if patch.marker(type_name).is_none() {
                return Err(custom_error("patch carries no event for its own type"));
            }
        }

        // `local` lands on the local side's state. For an external push the local side is
        // the mainline, so its patch becomes the head -> merge edge.
        Ok(if from_external {
            Resolution {
                pushed: output.local,
                concurrent: output.remote,
            }
        } else {
            Resolution {
                pushed: output.remote,
                concurrent: output.local,
            }
        })
    }

    /// Fills the missing schema dims of each present side with the most recent value found
    /// walking back from `start`.
    fn complete_from_history(
        &self,
        start: &str,
        type_name: &str,
        oid: &str,
        dims: &BTreeSet<String>,
        mut sides: [&mut Option<DimMap>; 3],
    ) -> Result<()> {
        let complete = |sides: &[&mut Option<DimMap>; 3]| {
            sides.iter().all(|side| match &**side {
                Some(map) => map.len() >= dims.len(),
                None => true,
            })
        };
        if complete(&sides) {
            return Ok(());
        }
        for step in self.graph.reverse_cursor(start)? {
            let Some(change) = step.edge.delta().object(type_name, oid) else {
                continue;
            };
            for (name, value) in &change.dims {
                if !dims.contains(name) {
                    continue;
                }
                for side in sides.iter_mut() {
                    if let Some(map) = &mut **side {
                        map.entry(name.clone()).or_insert_with(|| value.clone());
                    }
                }
            }
            if complete(&sides) {
                break;
            }
        }
        Ok(())
    }
}

fn side_dims(change: &ObjectChange, event: Event, dims: &BTreeSet<String>) -> Option<DimMap> {
    (event != Event::Delete).then(|| {
        change
            .dims
            .iter()
            .filter(|(name, _)| dims.contains(*name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    })
}

struct StrategyHook<'a> {
    manager: &'a VersionManager,
    start: &'a str,
    from_external: bool,
}

impl ConflictHook for StrategyHook<'_> {
    fn handles(&self, type_name: &str) -> bool {
        self.manager.strategies.contains_key(type_name)
    }

    fn resolve(&self, conflict: Conflict<'_>) -> Result<Resolution> {
        self.manager
            .run_custom_merge(self.start, conflict, self.from_external)
    }
}
