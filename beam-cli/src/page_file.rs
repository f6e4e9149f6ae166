use anyhow::Context;
use beam_common::StoreConfig;
use beam_store::{leaf_put, new_leaf, save_data, Node, NodeType};
use colored::*;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Serialize)]
pub struct PageSummary {
    pub node_type: NodeType,
    pub keys: u16,
    pub used_bytes: usize,
    pub entries: Vec<EntrySummary>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct EntrySummary {
    pub pointer: u64,
    pub key: String,
    pub value: String,
}

/// Parses `KEY=VALUE`; only the first `=` separates.
pub fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

/// Reads and verifies the page at `path`. `None` if the file does not exist.
pub fn load(config: &StoreConfig, path: &Path) -> anyhow::Result<Option<Node>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if bytes.len() != config.page_size {
        anyhow::bail!(
            "{} holds {} bytes, expected a {} byte page",
            path.display(),
            bytes.len(),
            config.page_size
        );
    }
    let node = Node::from_buf(bytes)?;
    node.verify()
        .with_context(|| format!("{} is not a valid node page", path.display()))?;
    Ok(Some(node))
}

/// Applies every pair to the leaf at `path` (or an empty leaf) and saves
/// the result atomically.
pub fn put_pairs(
    config: &StoreConfig,
    path: &Path,
    pairs: &[(String, String)],
) -> anyhow::Result<Node> {
    let mut node = match load(config, path)? {
        Some(node) => node,
        None => new_leaf::<&[u8], &[u8]>(config, &[])?,
    };
    for (key, value) in pairs {
        node = leaf_put(config, &node, key.as_bytes(), value.as_bytes())
            .with_context(|| format!("cannot put key '{}'", key))?;
    }
    save_data(path, node.as_bytes())?;
    debug!(path = %path.display(), keys = node.key_count(), "page saved");
    Ok(node)
}

pub fn summarize<B: AsRef<[u8]>>(node: &Node<B>) -> anyhow::Result<PageSummary> {
    let mut entries = Vec::with_capacity(node.key_count() as usize);
    for i in 0..node.key_count() {
        entries.push(EntrySummary {
            pointer: node.pointer(i)?,
            key: String::from_utf8_lossy(node.key(i)?).into_owned(),
            value: String::from_utf8_lossy(node.value(i)?).into_owned(),
        });
    }
    Ok(PageSummary {
        node_type: node.node_type()?,
        keys: node.key_count(),
        used_bytes: node.used_bytes()?,
        entries,
    })
}

pub fn print_summary(summary: &PageSummary) {
    println!(
        "{} {:?}  {} {}  {} {}",
        "type:".blue().bold(),
        summary.node_type,
        "keys:".blue().bold(),
        summary.keys,
        "used:".blue().bold(),
        summary.used_bytes
    );
    for (i, entry) in summary.entries.iter().enumerate() {
        if summary.node_type == NodeType::Internal {
            println!("  [{}] {} -> page {}", i, entry.key.yellow(), entry.pointer);
        } else {
            println!("  [{}] {} = {}", i, entry.key.yellow(), entry.value);
        }
    }
}
