use std::sync::Arc;

use crate::graph::{read, Edge, Node, VersionGraph};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Direction {
    Forward,
    Backward,
}

/// One step of a walk: the tag reached and the edge crossed to reach it.
#[derive(Clone, Debug)]
pub struct Step {
    pub tag: String,
    pub edge: Arc<Edge>,
}

/// Walk along canonical edges.
///
/// A cursor holds the node it is positioned on so that node cannot be elided under it.
/// Nodes already passed are released and may be collected while the walk continues. A
/// forward cursor stops at the head observed when it was opened; commits made afterwards
/// are not visited.
pub struct Cursor<'g> {
    graph: &'g VersionGraph,
    current: Option<Arc<Node>>,
    end: Option<Arc<Node>>,
    direction: Direction,
}

impl<'g> Cursor<'g> {
    pub(crate) fn new(
        graph: &'g VersionGraph,
        start: Arc<Node>,
        end: Option<Arc<Node>>,
        direction: Direction,
    ) -> Self {
        Self {
            graph,
            current: Some(start),
            end,
            direction,
        }
    }

    /// Tag the cursor is positioned on, `None` once exhausted.
    pub fn position(&self) -> Option<&str> {
        self.current.as_ref().map(|node| node.tag.as_str())
    }

    fn finish(&mut self) {
        if let Some(node) = self.current.take() {
            self.graph.release(&node);
        }
    }
}

impl Iterator for Cursor<'_> {
    type Item = Step;

    fn next(&mut self) -> Option<Step> {
        let current = Arc::clone(self.current.as_ref()?);
        if !self.graph.is_live() {
            self.finish();
            return None;
        }
        if let Some(end) = &self.end {
            if end.id == current.id {
                self.finish();
                return None;
            }
        }

        let advanced = {
            let arena = self.graph.arena();
            let links = read(&current.links);
            let edge = match self.direction {
                Direction::Forward => links.next.clone(),
                Direction::Backward => links.prev.clone(),
            };
            drop(links);
            edge.and_then(|edge| {
                let target = match self.direction {
                    Direction::Forward => edge.to(),
                    Direction::Backward => edge.from(),
                };
                VersionGraph::pin_in(&arena, target).map(|node| (node, edge))
            })
        };

        match advanced {
            Some((node, edge)) => {
                let tag = node.tag.clone();
                if let Some(previous) = self.current.replace(node) {
                    self.graph.release(&previous);
                }
                Some(Step { tag, edge })
            }
            None => {
                self.finish();
                None
            }
        }
    }
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        self.finish();
        if let Some(end) = self.end.take() {
            self.graph.release(&end);
        }
    }
}
