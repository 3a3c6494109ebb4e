// src/config/validate.rs

use std::collections::{BTreeMap, HashSet};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{FlowloopError, Result};
use crate::types::NodeVariant;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::FlowloopError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

/// Graph-wide checks.
///
/// Cycles are deliberately *not* checked here: a cycle only breaks the loop
/// whose chain contains it, so it is detected per loop when the graph is
/// resolved.
pub fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_nodes(cfg)?;
    validate_global_config(cfg)?;
    validate_nodes(cfg)?;
    validate_edges(cfg)?;
    validate_successors(cfg)?;
    validate_loop_overrides(cfg)?;
    Ok(())
}

fn config_error(msg: impl Into<String>) -> FlowloopError {
    FlowloopError::ConfigError(msg.into())
}

fn ensure_has_nodes(cfg: &RawConfigFile) -> Result<()> {
    if cfg.node.is_empty() {
        return Err(config_error(
            "config must contain at least one [node.<id>] section",
        ));
    }
    if !cfg.node.values().any(|n| n.variant == NodeVariant::Producer) {
        return Err(config_error(
            "config must contain at least one node with variant = \"producer\"",
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.unmapped_branch_limit == 0 {
        return Err(config_error(
            "[config].unmapped_branch_limit must be >= 1 (got 0)",
        ));
    }
    if cfg.config.idle_backoff_ms == 0 {
        return Err(config_error("[config].idle_backoff_ms must be >= 1 (got 0)"));
    }
    if cfg.queue.poll_interval_ms == 0 {
        return Err(config_error("[queue].poll_interval_ms must be >= 1 (got 0)"));
    }
    Ok(())
}

fn validate_nodes(cfg: &RawConfigFile) -> Result<()> {
    for (id, node) in cfg.node.iter() {
        if node.kind.trim().is_empty() {
            return Err(config_error(format!("node '{id}' has an empty `kind`")));
        }
    }
    Ok(())
}

fn validate_edges(cfg: &RawConfigFile) -> Result<()> {
    let mut seen_pairs: HashSet<(&str, &str)> = HashSet::new();

    for edge in cfg.edge.iter() {
        let from = cfg.node.get(&edge.from).ok_or_else(|| {
            config_error(format!(
                "edge '{}' -> '{}' starts at unknown node '{}'",
                edge.from, edge.to, edge.from
            ))
        })?;
        let to = cfg.node.get(&edge.to).ok_or_else(|| {
            config_error(format!(
                "edge '{}' -> '{}' points at unknown node '{}'",
                edge.from, edge.to, edge.to
            ))
        })?;

        if edge.from == edge.to {
            return Err(config_error(format!(
                "node '{}' cannot have an edge to itself",
                edge.from
            )));
        }

        if to.variant == NodeVariant::Producer {
            return Err(config_error(format!(
                "edge '{}' -> '{}' points into producer '{}'; producers start loops and have no upstream",
                edge.from, edge.to, edge.to
            )));
        }

        match (from.variant, edge.label.as_deref()) {
            (NodeVariant::ConditionalBlocking, None) => {
                return Err(config_error(format!(
                    "edge '{}' -> '{}' leaves conditional node '{}' and needs a `label`",
                    edge.from, edge.to, edge.from
                )));
            }
            (NodeVariant::ConditionalBlocking, Some(label)) if label.trim().is_empty() => {
                return Err(config_error(format!(
                    "edge '{}' -> '{}' has an empty `label`",
                    edge.from, edge.to
                )));
            }
            (NodeVariant::ConditionalBlocking, Some(_)) => {}
            (variant, Some(label)) => {
                return Err(config_error(format!(
                    "edge '{}' -> '{}' has label '{}' but '{}' is a {} node; only conditional edges are labelled",
                    edge.from, edge.to, label, edge.from, variant
                )));
            }
            (_, None) => {}
        }

        if !seen_pairs.insert((edge.from.as_str(), edge.to.as_str())) {
            return Err(config_error(format!(
                "duplicate edge '{}' -> '{}'",
                edge.from, edge.to
            )));
        }
    }

    Ok(())
}

/// One iteration follows a single path: only conditional nodes may have
/// more than one successor, and their labels must be unique.
fn validate_successors(cfg: &RawConfigFile) -> Result<()> {
    let mut outgoing: BTreeMap<&str, Vec<Option<&str>>> = BTreeMap::new();
    for edge in cfg.edge.iter() {
        outgoing
            .entry(edge.from.as_str())
            .or_default()
            .push(edge.label.as_deref());
    }

    for (from, labels) in outgoing {
        let Some(node) = cfg.node.get(from) else {
            continue;
        };

        if node.variant == NodeVariant::ConditionalBlocking {
            let mut seen = HashSet::new();
            for label in labels.iter().flatten() {
                if !seen.insert(*label) {
                    return Err(config_error(format!(
                        "conditional node '{from}' has more than one edge labelled '{label}'"
                    )));
                }
            }
        } else if labels.len() > 1 {
            return Err(config_error(format!(
                "{} node '{}' has {} outgoing edges; only conditional nodes may branch",
                node.variant,
                from,
                labels.len()
            )));
        }
    }

    Ok(())
}

fn validate_loop_overrides(cfg: &RawConfigFile) -> Result<()> {
    for id in cfg.loops.keys() {
        match cfg.node.get(id) {
            Some(node) if node.variant == NodeVariant::Producer => {}
            Some(node) => {
                return Err(config_error(format!(
                    "[loop.{id}] refers to a {} node; loops are keyed by their producer id",
                    node.variant
                )));
            }
            None => {
                return Err(config_error(format!("[loop.{id}] refers to unknown node '{id}'")));
            }
        }
    }
    Ok(())
}
