//! Concurrent version graph.
//!
//! Nodes live in an arena addressed by [`NodeId`] and carry an explicit holder count. The
//! head, the ROOT tail, every app pin and every open cursor is a holder. When the count of a
//! node drops to zero the node is queued for disposal; [`VersionGraph::clear_disposal`] then
//! elides it by splicing its two edges into one whose delta is their sequential composition.
//!
//! Lock order: arena, node links, head, then any of the small registries (disposal,
//! split/merge points, pin tables). No path acquires them in another order.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use crate::cursor::{Cursor, Direction};
use crate::delta::Delta;
use crate::error::{Error, Result};
use crate::ids::{NodeId, ROOT_TAG};
use crate::merge::merge_delta;

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Directed edge owning the delta that turns the state at `from` into the state at `to`.
#[derive(Debug)]
pub struct Edge {
    from: NodeId,
    to: NodeId,
    delta: Delta,
}

impl Edge {
    pub fn from(&self) -> NodeId {
        self.from
    }

    pub fn to(&self) -> NodeId {
        self.to
    }

    pub fn delta(&self) -> &Delta {
        &self.delta
    }
}

/// Canonical edge slots plus the number of extra edges seen on each side.
#[derive(Debug, Default)]
pub(crate) struct Links {
    pub(crate) prev: Option<Arc<Edge>>,
    pub(crate) next: Option<Arc<Edge>>,
    pub(crate) prev_count: usize,
    pub(crate) next_count: usize,
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) id: NodeId,
    pub(crate) tag: String,
    pub(crate) is_master: bool,
    holders: AtomicUsize,
    pub(crate) links: RwLock<Links>,
}

impl Node {
    fn new(id: NodeId, tag: String, is_master: bool) -> Self {
        Self {
            id,
            tag,
            is_master,
            holders: AtomicUsize::new(0),
            links: RwLock::new(Links::default()),
        }
    }

    pub(crate) fn holders(&self) -> usize {
        self.holders.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Arena {
    pub(crate) by_id: HashMap<NodeId, Arc<Node>>,
    by_tag: HashMap<String, NodeId>,
}

impl Arena {
    pub(crate) fn get(&self, id: NodeId) -> Option<&Arc<Node>> {
        self.by_id.get(&id)
    }

    fn by_tag(&self, tag: &str) -> Option<&Arc<Node>> {
        self.by_tag.get(tag).and_then(|id| self.by_id.get(id))
    }

    fn insert(&mut self, node: Arc<Node>) {
        self.by_tag.insert(node.tag.clone(), node.id);
        self.by_id.insert(node.id, node);
    }

    fn remove(&mut self, node: &Node) {
        self.by_tag.remove(&node.tag);
        self.by_id.remove(&node.id);
    }
}

#[derive(Clone, Debug)]
struct HeadRef {
    id: NodeId,
    tag: String,
}

/// Snapshot of one node, for diagnostics and tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    pub tag: String,
    pub is_master: bool,
    pub prev: Option<String>,
    pub next: Option<String>,
    pub prev_count: usize,
    pub next_count: usize,
    pub holders: usize,
}

pub struct VersionGraph {
    arena: RwLock<Arena>,
    next_id: AtomicU64,
    head: RwLock<HeadRef>,
    disposal: Mutex<BTreeSet<NodeId>>,
    split_points: Mutex<BTreeSet<NodeId>>,
    merge_points: Mutex<BTreeSet<NodeId>>,
    external_refs: Mutex<HashMap<String, Arc<Node>>>,
    external_refs_await: Mutex<HashMap<String, Arc<Node>>>,
    live: AtomicBool,
}

impl Default for VersionGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionGraph {
    pub fn new() -> Self {
        let root = Arc::new(Node::new(NodeId::ROOT, ROOT_TAG.to_string(), true));
        // One hold for the tail, one for the head.
        root.holders.store(2, Ordering::Release);
        let mut arena = Arena::default();
        arena.insert(root);
        Self {
            arena: RwLock::new(arena),
            next_id: AtomicU64::new(NodeId::ROOT.0 + 1),
            head: RwLock::new(HeadRef {
                id: NodeId::ROOT,
                tag: ROOT_TAG.to_string(),
            }),
            disposal: Mutex::new(BTreeSet::new()),
            split_points: Mutex::new(BTreeSet::new()),
            merge_points: Mutex::new(BTreeSet::new()),
            external_refs: Mutex::new(HashMap::new()),
            external_refs_await: Mutex::new(HashMap::new()),
            live: AtomicBool::new(true),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_live() {
            Ok(())
        } else {
            Err(Error::TornDown)
        }
    }

    pub fn head_tag(&self) -> String {
        read(&self.head).tag.clone()
    }

    pub fn contains(&self, tag: &str) -> bool {
        read(&self.arena).by_tag.contains_key(tag)
    }

    /// Adds the edge `from -> to` carrying `delta`, creating either node if needed.
    ///
    /// The edge takes each endpoint's canonical slot when it is free; otherwise the endpoint
    /// becomes a split (outgoing) or merge (incoming) point. Head moves to `to` when `from`
    /// is the head and `force_branch` is unset.
    pub fn continue_chain(&self, from: &str, to: &str, delta: Delta, force_branch: bool) -> Result<()> {
        self.ensure_live()?;
        if from == to {
            return Ok(());
        }
        let mut arena = write(&self.arena);
        let head_id = read(&self.head).id;

        let (from_node, from_created) = self.resolve_node(&mut arena, from, |id| id == head_id);
        let from_is_head = from_node.id == head_id;
        let (to_node, to_created) =
            self.resolve_node(&mut arena, to, |_| !force_branch && from_is_head);

        let edge = Arc::new(Edge {
            from: from_node.id,
            to: to_node.id,
            delta,
        });
        {
            let mut from_links = write(&from_node.links);
            if from_links.next.is_none() {
                from_links.next = Some(Arc::clone(&edge));
            } else {
                from_links.next_count += 1;
                if from_links.next_count == 1 {
                    lock(&self.split_points).insert(from_node.id);
                }
            }
        }
        {
            let mut to_links = write(&to_node.links);
            if to_links.prev.is_none() {
                to_links.prev = Some(Arc::clone(&edge));
            } else {
                to_links.prev_count += 1;
                if to_links.prev_count == 1 {
                    lock(&self.merge_points).insert(to_node.id);
                }
            }
        }
        debug!(from, to, objects = edge.delta.object_count(), "added edge");

        if from_is_head && !force_branch {
            to_node.holders.fetch_add(1, Ordering::AcqRel);
            let old = {
                let mut head = write(&self.head);
                std::mem::replace(
                    &mut *head,
                    HeadRef {
                        id: to_node.id,
                        tag: to_node.tag.clone(),
                    },
                )
            };
            if let Some(old_node) = arena.get(old.id).cloned() {
                self.release(&old_node);
            }
        }

        let mut disposal = lock(&self.disposal);
        if from_created {
            disposal.insert(from_node.id);
        }
        if to_created {
            disposal.insert(to_node.id);
        }
        Ok(())
    }

    fn resolve_node(
        &self,
        arena: &mut Arena,
        tag: &str,
        is_master: impl FnOnce(NodeId) -> bool,
    ) -> (Arc<Node>, bool) {
        if let Some(node) = arena.by_tag(tag) {
            return (Arc::clone(node), false);
        }
        let id = NodeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let node = Arc::new(Node::new(id, tag.to_string(), is_master(id)));
        arena.insert(Arc::clone(&node));
        (node, true)
    }

    /// Takes a hold on the node tagged `tag`, if any.
    fn pin_tag(&self, tag: &str) -> Option<Arc<Node>> {
        let arena = read(&self.arena);
        let node = arena.by_tag(tag)?;
        node.holders.fetch_add(1, Ordering::AcqRel);
        Some(Arc::clone(node))
    }

    pub(crate) fn pin_in(arena: &Arena, id: NodeId) -> Option<Arc<Node>> {
        let node = arena.get(id)?;
        node.holders.fetch_add(1, Ordering::AcqRel);
        Some(Arc::clone(node))
    }

    /// Drops a hold. The last release queues the node for disposal.
    pub(crate) fn release(&self, node: &Node) {
        if node.holders.fetch_sub(1, Ordering::AcqRel) == 1 && self.is_live() {
            lock(&self.disposal).insert(node.id);
        }
    }

    /// Opens a cursor walking from `tag` to the head as it is right now.
    pub fn cursor(&self, tag: &str) -> Result<Cursor<'_>> {
        self.ensure_live()?;
        let arena = read(&self.arena);
        let start = arena
            .by_tag(tag)
            .cloned()
            .ok_or_else(|| Error::UnknownVersion(tag.to_string()))?;
        let end_id = read(&self.head).id;
        let end = Self::pin_in(&arena, end_id);
        start.holders.fetch_add(1, Ordering::AcqRel);
        Ok(Cursor::new(self, start, end, Direction::Forward))
    }

    /// Opens a cursor walking from `tag` back toward ROOT.
    pub fn reverse_cursor(&self, tag: &str) -> Result<Cursor<'_>> {
        self.ensure_live()?;
        let start = self
            .pin_tag(tag)
            .ok_or_else(|| Error::UnknownVersion(tag.to_string()))?;
        Ok(Cursor::new(self, start, None, Direction::Backward))
    }

    pub(crate) fn arena(&self) -> RwLockReadGuard<'_, Arena> {
        read(&self.arena)
    }

    /// Moves `app`'s durable pin to `version`, releasing the previous one. A tentative pin on
    /// the same version is promoted.
    pub fn update_app_ref(&self, app: &str, version: &str) -> Result<()> {
        self.ensure_live()?;
        let mut pinned = None;
        let stale = {
            let mut awaits = lock(&self.external_refs_await);
            match awaits.remove(app) {
                Some(node) if node.tag == version => {
                    pinned = Some(node);
                    None
                }
                other => other,
            }
        };
        if let Some(node) = stale {
            self.release(&node);
        }
        let pinned = match pinned {
            Some(node) => Some(node),
            None => self.pin_tag(version),
        };
        if let Some(node) = pinned {
            let previous = lock(&self.external_refs).insert(app.to_string(), node);
            if let Some(previous) = previous {
                self.release(&previous);
            }
        }
        Ok(())
    }

    /// Records that `version` was sent to `app` but not yet acknowledged. The durable pin
    /// stays where it is.
    pub fn mark_app_ref_await(&self, app: &str, version: &str) -> Result<()> {
        self.ensure_live()?;
        if let Some(node) = self.pin_tag(version) {
            let previous = lock(&self.external_refs_await).insert(app.to_string(), node);
            if let Some(previous) = previous {
                self.release(&previous);
            }
        }
        Ok(())
    }

    pub fn app_ref(&self, app: &str) -> Option<String> {
        lock(&self.external_refs).get(app).map(|node| node.tag.clone())
    }

    pub fn app_ref_await(&self, app: &str) -> Option<String> {
        lock(&self.external_refs_await)
            .get(app)
            .map(|node| node.tag.clone())
    }

    /// Elides every queued node that is still unheld. Must not run concurrently with
    /// [`continue_chain`](Self::continue_chain) from another writer.
    ///
    /// Fails when two stored edges do not compose. That node is left in place and the rest
    /// of the queue is kept for the next drain.
    pub fn clear_disposal(&self) -> Result<()> {
        loop {
            let Some(id) = lock(&self.disposal).pop_first() else {
                return Ok(());
            };
            if !self.is_live() {
                return Ok(());
            }
            let collapsed = {
                let mut arena = write(&self.arena);
                self.try_collapse(&mut arena, id)
            };
            let requeue = collapsed?;
            if !requeue.is_empty() {
                lock(&self.disposal).extend(requeue);
            }
        }
    }

    /// Removes `id` if nothing holds it and it is neither a split nor a merge point. Returns
    /// neighbours whose shape changed and that may now be collapsible themselves.
    fn try_collapse(&self, arena: &mut Arena, id: NodeId) -> Result<Vec<NodeId>> {
        let Some(node) = arena.get(id).cloned() else {
            return Ok(Vec::new());
        };
        if node.holders() > 0 {
            return Ok(Vec::new());
        }
        let mut links = write(&node.links);
        if links.prev_count > 0 || links.next_count > 0 {
            return Ok(Vec::new());
        }

        let mut requeue = Vec::new();
        match (links.prev.clone(), links.next.clone()) {
            (Some(prev_edge), Some(next_edge)) => {
                let (Some(prev), Some(next)) = (
                    arena.get(prev_edge.from).cloned(),
                    arena.get(next_edge.to).cloned(),
                ) else {
                    return Ok(Vec::new());
                };
                let mut prev_links = write(&prev.links);
                let mut next_links = write(&next.links);
                let prev_canonical = is_same(&prev_links.next, &prev_edge);
                let next_canonical = is_same(&next_links.prev, &next_edge);

                if prev_canonical || next_canonical {
                    let delta = merge_delta(
                        prev_edge.delta.clone(),
                        next_edge.delta.clone(),
                        false,
                    )
                    .map_err(|e| {
                        warn!(tag = %node.tag, error = %e, "cannot compose edges, keeping node");
                        e
                    })?;
                    let spliced = Arc::new(Edge {
                        from: prev.id,
                        to: next.id,
                        delta,
                    });
                    if prev_canonical {
                        prev_links.next = Some(Arc::clone(&spliced));
                    }
                    if next_canonical {
                        next_links.prev = Some(spliced);
                    }
                } else {
                    if self.drop_extra_next(&prev, &mut prev_links) {
                        requeue.push(prev.id);
                    }
                    if self.drop_extra_prev(&next, &mut next_links) {
                        requeue.push(next.id);
                    }
                }
                debug!(tag = %node.tag, from = %prev.tag, to = %next.tag, "elided node");
            }
            (Some(prev_edge), None) => {
                if let Some(prev) = arena.get(prev_edge.from).cloned() {
                    let mut prev_links = write(&prev.links);
                    if is_same(&prev_links.next, &prev_edge) {
                        prev_links.next = None;
                        requeue.push(prev.id);
                    } else if self.drop_extra_next(&prev, &mut prev_links) {
                        requeue.push(prev.id);
                    }
                }
                debug!(tag = %node.tag, "detached tip");
            }
            (None, Some(next_edge)) => {
                if let Some(next) = arena.get(next_edge.to).cloned() {
                    let mut next_links = write(&next.links);
                    if is_same(&next_links.prev, &next_edge) {
                        next_links.prev = None;
                        requeue.push(next.id);
                    } else if self.drop_extra_prev(&next, &mut next_links) {
                        requeue.push(next.id);
                    }
                }
                debug!(tag = %node.tag, "detached orphan");
            }
            (None, None) => {}
        }

        links.prev = None;
        links.next = None;
        drop(links);
        arena.remove(&node);
        Ok(requeue)
    }

    /// Forgets one extra outgoing edge of `node`. True when it stops being a split point.
    fn drop_extra_next(&self, node: &Node, links: &mut Links) -> bool {
        if links.next_count == 0 {
            return false;
        }
        links.next_count -= 1;
        if links.next_count == 0 {
            lock(&self.split_points).remove(&node.id);
            return true;
        }
        false
    }

    /// Forgets one extra incoming edge of `node`. True when it stops being a merge point.
    fn drop_extra_prev(&self, node: &Node, links: &mut Links) -> bool {
        if links.prev_count == 0 {
            return false;
        }
        links.prev_count -= 1;
        if links.prev_count == 0 {
            lock(&self.merge_points).remove(&node.id);
            return true;
        }
        false
    }

    /// Drops every node and pin. Later operations fail with [`Error::TornDown`].
    pub fn teardown(&self) {
        if !self.live.swap(false, Ordering::AcqRel) {
            return;
        }
        lock(&self.external_refs).clear();
        lock(&self.external_refs_await).clear();
        lock(&self.disposal).clear();
        lock(&self.split_points).clear();
        lock(&self.merge_points).clear();
        let mut arena = write(&self.arena);
        for node in arena.by_id.values() {
            let mut links = write(&node.links);
            links.prev = None;
            links.next = None;
        }
        arena.by_id.clear();
        arena.by_tag.clear();
    }

    pub fn node_count(&self) -> usize {
        read(&self.arena).by_id.len()
    }

    /// Distinct edges reachable from any node's canonical slots.
    pub fn edge_count(&self) -> usize {
        let arena = read(&self.arena);
        let mut seen: Vec<*const Edge> = Vec::new();
        for node in arena.by_id.values() {
            let links = read(&node.links);
            for edge in [&links.prev, &links.next].into_iter().flatten() {
                let ptr = Arc::as_ptr(edge);
                if !seen.contains(&ptr) {
                    seen.push(ptr);
                }
            }
        }
        seen.len()
    }

    pub fn split_points(&self) -> BTreeSet<String> {
        let ids = lock(&self.split_points).clone();
        self.tags_of(&ids)
    }

    pub fn merge_points(&self) -> BTreeSet<String> {
        let ids = lock(&self.merge_points).clone();
        self.tags_of(&ids)
    }

    fn tags_of(&self, ids: &BTreeSet<NodeId>) -> BTreeSet<String> {
        let arena = read(&self.arena);
        ids.iter()
            .filter_map(|id| arena.get(*id).map(|node| node.tag.clone()))
            .collect()
    }

    pub fn node_info(&self, tag: &str) -> Option<NodeInfo> {
        let arena = read(&self.arena);
        let node = arena.by_tag(tag)?;
        let links = read(&node.links);
        let tag_of = |id: NodeId| arena.get(id).map(|node| node.tag.clone());
        Some(NodeInfo {
            tag: node.tag.clone(),
            is_master: node.is_master,
            prev: links.prev.as_ref().and_then(|edge| tag_of(edge.from)),
            next: links.next.as_ref().and_then(|edge| tag_of(edge.to)),
            prev_count: links.prev_count,
            next_count: links.next_count,
            holders: node.holders(),
        })
    }

    /// Delta of the edge `from -> to`, if that edge is still stored.
    pub fn edge_delta(&self, from: &str, to: &str) -> Option<Delta> {
        let arena = read(&self.arena);
        let from_node = arena.by_tag(from)?;
        let to_node = arena.by_tag(to)?;
        let from_links = read(&from_node.links);
        let to_links = read(&to_node.links);
        let found = [&from_links.next, &to_links.prev]
            .into_iter()
            .flatten()
            .find(|edge| edge.from == from_node.id && edge.to == to_node.id)
            .map(|edge| edge.delta.clone());
        found
    }
}

fn is_same(slot: &Option<Arc<Edge>>, edge: &Arc<Edge>) -> bool {
    slot.as_ref().is_some_and(|held| Arc::ptr_eq(held, edge))
}
