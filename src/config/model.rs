// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::{DeadLetterBackend, ExecutionPool, NodeVariant, QueueBackend};

/// Graph definition exactly as read from TOML, before validation.
///
/// ```toml
/// [config]
/// idle_backoff_ms = 200
///
/// [node.source]
/// variant = "producer"
/// kind = "queue-reader"
/// params = { queue = "q1" }
///
/// [node.store]
/// variant = "non-blocking"
/// kind = "queue-writer"
/// params = { queue = "q2" }
///
/// [[edge]]
/// from = "source"
/// to = "store"
/// ```
///
/// All sections are optional and have reasonable defaults; semantic checks
/// happen in `TryFrom<RawConfigFile> for ConfigFile`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub queue: QueueSection,

    #[serde(default)]
    pub dead_letter: DeadLetterSection,

    /// All nodes from `[node.<id>]`, keyed by node id.
    #[serde(default)]
    pub node: BTreeMap<String, NodeConfig>,

    /// All edges from `[[edge]]`.
    #[serde(default)]
    pub edge: Vec<EdgeConfig>,

    /// Per-loop overrides from `[loop.<producer-id>]`.
    #[serde(default, rename = "loop")]
    pub loops: BTreeMap<String, LoopConfig>,
}

/// Validated graph definition.
///
/// Only obtainable through `ConfigFile::try_from(raw)` (or the loader), so
/// holders can rely on edge endpoints existing and labels being consistent.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub queue: QueueSection,
    pub dead_letter: DeadLetterSection,
    pub node: BTreeMap<String, NodeConfig>,
    pub edge: Vec<EdgeConfig>,
    pub loops: BTreeMap<String, LoopConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            config: raw.config,
            queue: raw.queue,
            dead_letter: raw.dead_letter,
            node: raw.node,
            edge: raw.edge,
            loops: raw.loops,
        }
    }

    /// Ids of every producer node, in id order.
    pub fn producers(&self) -> impl Iterator<Item = &str> {
        self.node
            .iter()
            .filter(|(_, n)| n.variant == NodeVariant::Producer)
            .map(|(id, _)| id.as_str())
    }

    /// Override section for the loop rooted at `producer`, if any.
    pub fn loop_config(&self, producer: &str) -> Option<&LoopConfig> {
        self.loops.get(producer)
    }
}

/// `[config]` section: scheduler behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Sleep after a producer reports "no work", and between dead-letter
    /// submission attempts.
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,

    /// Consecutive unmapped-branch failures after which a loop is put into
    /// the error state.
    #[serde(default = "default_unmapped_branch_limit")]
    pub unmapped_branch_limit: u32,

    /// Execution context for loops that neither override it nor contain a
    /// node with a preference.
    #[serde(default)]
    pub default_pool: ExecutionPool,
}

fn default_idle_backoff_ms() -> u64 {
    200
}

fn default_unmapped_branch_limit() -> u32 {
    3
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            idle_backoff_ms: default_idle_backoff_ms(),
            unmapped_branch_limit: default_unmapped_branch_limit(),
            default_pool: ExecutionPool::default(),
        }
    }
}

impl ConfigSection {
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

/// `[queue]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSection {
    #[serde(default)]
    pub backend: QueueBackend,

    /// Root directory of the spool backend.
    #[serde(default = "default_spool_dir")]
    pub spool_dir: PathBuf,

    /// How often a blocked spool `pop` rescans its directory.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_spool_dir() -> PathBuf {
    PathBuf::from(".flowloop/queues")
}

fn default_poll_interval_ms() -> u64 {
    50
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            spool_dir: default_spool_dir(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// `[dead_letter]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DeadLetterSection {
    #[serde(default)]
    pub backend: DeadLetterBackend,

    /// File used by the `jsonl` backend.
    #[serde(default = "default_dead_letter_path")]
    pub path: PathBuf,
}

fn default_dead_letter_path() -> PathBuf {
    PathBuf::from(".flowloop/dead_letters.jsonl")
}

impl Default for DeadLetterSection {
    fn default() -> Self {
        Self {
            backend: DeadLetterBackend::default(),
            path: default_dead_letter_path(),
        }
    }
}

/// `[node.<id>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Scheduling behaviour (`producer`, `blocking`, `non-blocking`,
    /// `conditional`).
    pub variant: NodeVariant,

    /// Implementation to instantiate, looked up in the node registry.
    pub kind: String,

    /// Optional execution-context preference for the loop owning this node.
    #[serde(default)]
    pub pool: Option<ExecutionPool>,

    /// Kind-specific configuration, handed to the node factory untouched.
    #[serde(default)]
    pub params: toml::Table,
}

/// `[[edge]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EdgeConfig {
    pub from: String,
    pub to: String,

    /// Branch label; required on edges leaving a conditional node and
    /// forbidden elsewhere.
    #[serde(default)]
    pub label: Option<String>,
}

/// `[loop.<producer-id>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct LoopConfig {
    /// Execution context for this loop, overriding node preferences.
    #[serde(default)]
    pub pool: Option<ExecutionPool>,

    /// Whether `flowloop` starts this loop on launch.
    #[serde(default = "default_autostart")]
    pub autostart: bool,
}

fn default_autostart() -> bool {
    true
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            pool: None,
            autostart: default_autostart(),
        }
    }
}
