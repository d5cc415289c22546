// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Hierarchical module composition.
//!
//! Nodes are source units and edges point from a parent to the children it
//! instantiates. [`CompositionGraph::resolve`] turns the part of the graph
//! reachable from a root into a compile order in which every node appears
//! once, after all of its dependencies.

use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use petgraph::graph::{DiGraph, NodeIndex};
use snafu::ensure;

use crate::error::{DependencyCycleError, DuplicateNodeSnafu, UsageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(NodeIndex);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionNode {
    name: String,
    source: Utf8PathBuf,
}

impl CompositionNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &Utf8Path {
        &self.source
    }
}

/// Shared by every module definition that refers into it, so build it once
/// and wrap it in an [`std::sync::Arc`].
#[derive(Debug, Default, Clone)]
pub struct CompositionGraph {
    graph: DiGraph<CompositionNode, ()>,
    by_name: HashMap<String, NodeId>,
}

#[derive(Clone, Copy)]
enum Mark {
    Visiting,
    Done,
}

struct Frame {
    node: NodeId,
    children: Vec<NodeId>,
    next: usize,
}

impl CompositionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        source: impl Into<Utf8PathBuf>,
    ) -> Result<NodeId, UsageError> {
        let name = name.into();
        ensure!(
            !self.by_name.contains_key(&name),
            DuplicateNodeSnafu { node: name }
        );
        let id = NodeId(self.graph.add_node(CompositionNode {
            name: name.clone(),
            source: source.into(),
        }));
        self.by_name.insert(name, id);
        Ok(id)
    }

    /// Records that `parent` instantiates `child`. Repeated edges are kept
    /// once, at their first position.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        if self.graph.find_edge(parent.0, child.0).is_none() {
            self.graph.add_edge(parent.0, child.0, ());
        }
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    /// # Panics
    ///
    /// If `id` was not created by this graph.
    pub fn node(&self, id: NodeId) -> &CompositionNode {
        &self.graph[id.0]
    }

    /// The children of `id` in the order they were added.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        // petgraph walks adjacency lists newest first
        let mut children =
            self.graph.neighbors(id.0).map(NodeId).collect::<Vec<_>>();
        children.reverse();
        children
    }

    /// Every node reachable from `root`, each exactly once and strictly after
    /// all of its dependencies. Children are visited in declaration order.
    pub fn resolve(
        &self,
        root: NodeId,
    ) -> Result<Vec<NodeId>, DependencyCycleError> {
        let mut marks = HashMap::new();
        let mut order = Vec::new();
        let mut stack = vec![Frame {
            node: root,
            children: self.children(root),
            next: 0,
        }];
        marks.insert(root, Mark::Visiting);

        while let Some(frame) = stack.last_mut() {
            let Some(child) = frame.children.get(frame.next).copied() else {
                let node = frame.node;
                stack.pop();
                marks.insert(node, Mark::Done);
                order.push(node);
                continue;
            };
            frame.next += 1;

            match marks.get(&child).copied() {
                Some(Mark::Done) => {}
                Some(Mark::Visiting) => {
                    let start = stack
                        .iter()
                        .position(|frame| frame.node == child)
                        .unwrap_or_default();
                    let mut path = stack[start..]
                        .iter()
                        .map(|frame| self.node(frame.node).name.clone())
                        .collect::<Vec<_>>();
                    path.push(self.node(child).name.clone());
                    return Err(DependencyCycleError {
                        root: self.node(root).name.clone(),
                        path,
                    });
                }
                None => {
                    marks.insert(child, Mark::Visiting);
                    stack.push(Frame {
                        node: child,
                        children: self.children(child),
                        next: 0,
                    });
                }
            }
        }

        Ok(order)
    }

    /// The sources of [`CompositionGraph::resolve`], in the same order.
    pub fn sources(
        &self,
        root: NodeId,
    ) -> Result<Vec<Utf8PathBuf>, DependencyCycleError> {
        Ok(self
            .resolve(root)?
            .into_iter()
            .map(|id| self.node(id).source.clone())
            .collect())
    }
}
