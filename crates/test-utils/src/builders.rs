#![allow(dead_code)]

use flowloop::config::{ConfigFile, EdgeConfig, LoopConfig, NodeConfig, RawConfigFile};
use flowloop::types::{ExecutionPool, NodeVariant};

/// Builder for `ConfigFile` to simplify test setup.
pub struct GraphConfigBuilder {
    config: RawConfigFile,
}

impl GraphConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn with_node(mut self, id: &str, node: NodeConfig) -> Self {
        self.config.node.insert(id.to_string(), node);
        self
    }

    pub fn edge(mut self, from: &str, to: &str) -> Self {
        self.config.edge.push(EdgeConfig {
            from: from.to_string(),
            to: to.to_string(),
            label: None,
        });
        self
    }

    pub fn branch(mut self, from: &str, label: &str, to: &str) -> Self {
        self.config.edge.push(EdgeConfig {
            from: from.to_string(),
            to: to.to_string(),
            label: Some(label.to_string()),
        });
        self
    }

    /// Connect `ids` in order with unlabelled edges.
    pub fn chain(mut self, ids: &[&str]) -> Self {
        for pair in ids.windows(2) {
            self = self.edge(pair[0], pair[1]);
        }
        self
    }

    pub fn idle_backoff_ms(mut self, ms: u64) -> Self {
        self.config.config.idle_backoff_ms = ms;
        self
    }

    pub fn unmapped_branch_limit(mut self, limit: u32) -> Self {
        self.config.config.unmapped_branch_limit = limit;
        self
    }

    pub fn default_pool(mut self, pool: ExecutionPool) -> Self {
        self.config.config.default_pool = pool;
        self
    }

    pub fn loop_pool(mut self, producer: &str, pool: ExecutionPool) -> Self {
        self.config
            .loops
            .entry(producer.to_string())
            .or_default()
            .pool = Some(pool);
        self
    }

    pub fn loop_autostart(mut self, producer: &str, autostart: bool) -> Self {
        self.config
            .loops
            .entry(producer.to_string())
            .or_insert_with(LoopConfig::default)
            .autostart = autostart;
        self
    }

    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for GraphConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `NodeConfig`.
pub struct NodeConfigBuilder {
    node: NodeConfig,
}

impl NodeConfigBuilder {
    pub fn new(variant: NodeVariant, kind: &str) -> Self {
        Self {
            node: NodeConfig {
                variant,
                kind: kind.to_string(),
                pool: None,
                params: toml::Table::new(),
            },
        }
    }

    pub fn producer(kind: &str) -> Self {
        Self::new(NodeVariant::Producer, kind)
    }

    pub fn blocking(kind: &str) -> Self {
        Self::new(NodeVariant::Blocking, kind)
    }

    pub fn non_blocking(kind: &str) -> Self {
        Self::new(NodeVariant::NonBlocking, kind)
    }

    pub fn conditional(kind: &str) -> Self {
        Self::new(NodeVariant::ConditionalBlocking, kind)
    }

    pub fn param(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.node.params.insert(key.to_string(), value.into());
        self
    }

    pub fn pool(mut self, pool: ExecutionPool) -> Self {
        self.node.pool = Some(pool);
        self
    }

    pub fn build(self) -> NodeConfig {
        self.node
    }
}
