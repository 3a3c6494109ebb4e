// src/node/registry.rs

//! Node factory registry.
//!
//! The graph definition names a node *kind* (e.g. `"queue-reader"`); the
//! registry turns `(kind, params)` into a live [`Node`] when a loop is built.
//! Every loop gets its own instances, so a node is never shared between
//! loops even when two producers reach the same graph node.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::node::builtin;
use crate::node::{Node, NodeId, NodeVariant};
use crate::queue::QueueManager;

/// Everything a factory may use to construct a node.
#[derive(Clone)]
pub struct NodeContext {
    pub id: NodeId,
    pub variant: NodeVariant,
    /// Immutable config blob from the graph definition.
    pub params: toml::Table,
    /// Shared queue store, for nodes that hand data across loops.
    pub queues: Arc<dyn QueueManager>,
}

impl fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeContext")
            .field("id", &self.id)
            .field("variant", &self.variant)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl NodeContext {
    /// Deserialize the params table into a typed struct.
    pub fn params<T: DeserializeOwned>(&self) -> Result<T, NodeBuildError> {
        toml::Value::Table(self.params.clone())
            .try_into()
            .map_err(|e| NodeBuildError::InvalidParams {
                node: self.id.clone(),
                message: e.to_string(),
            })
    }

    /// Fail construction unless the node was declared with one of `allowed`.
    pub fn require_variant(
        &self,
        kind: &str,
        allowed: &[NodeVariant],
    ) -> Result<(), NodeBuildError> {
        if allowed.contains(&self.variant) {
            Ok(())
        } else {
            Err(NodeBuildError::UnsupportedVariant {
                node: self.id.clone(),
                kind: kind.to_string(),
                variant: self.variant,
            })
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeBuildError {
    #[error("unknown node kind '{kind}' for node '{node}'")]
    UnknownKind { node: NodeId, kind: String },

    #[error("invalid params for node '{node}': {message}")]
    InvalidParams { node: NodeId, message: String },

    #[error("node '{node}' of kind '{kind}' cannot be used as a {variant} node")]
    UnsupportedVariant {
        node: NodeId,
        kind: String,
        variant: NodeVariant,
    },
}

/// Constructor for one node kind.
pub type NodeFactory =
    Arc<dyn Fn(&NodeContext) -> Result<Box<dyn Node>, NodeBuildError> + Send + Sync>;

/// Kind name → factory.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    factories: BTreeMap<String, NodeFactory>,
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("kinds", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl NodeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in node kinds.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    /// Register (or replace) the factory for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&NodeContext) -> Result<Box<dyn Node>, NodeBuildError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(|k| k.as_str())
    }

    /// Construct a node of `kind` for the given context.
    pub fn build(&self, kind: &str, ctx: &NodeContext) -> Result<Box<dyn Node>, NodeBuildError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| NodeBuildError::UnknownKind {
                node: ctx.id.clone(),
                kind: kind.to_string(),
            })?;
        factory(ctx)
    }
}
