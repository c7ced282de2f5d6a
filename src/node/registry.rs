use std::collections::HashSet;
use std::path::Path;

use reqwest::Url;
use thiserror::Error;
use tracing::info;

use super::node::NodeConfig;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse node list: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("group {0:?} not found in node list")]
    MissingGroup(String),
    #[error("entry {0:?} is not a group of `name = \"url\"` entries")]
    NotAGroup(String),
    #[error("url for node {0:?} must be a string")]
    NotAString(String),
    #[error("node name must not be empty")]
    EmptyName,
    #[error("invalid url {url:?} for node {name:?}: {reason}")]
    InvalidUrl {
        name: String,
        url: String,
        reason: String,
    },
    #[error("node {0:?} is listed more than once")]
    Duplicate(String),
    #[error("node list is empty")]
    Empty,
}

type Result<T> = std::result::Result<T, RegistryError>;

/// The fixed, ordered set of nodes to monitor.
///
/// Built once at startup and only read afterwards. Iteration order is the
/// order in which the nodes were listed, which is also the order of every
/// pushed snapshot.
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    nodes: Vec<NodeConfig>,
}

impl NodeRegistry {
    pub fn from_nodes(nodes: Vec<NodeConfig>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(RegistryError::Empty);
        }
        let mut seen = HashSet::new();
        for node in &nodes {
            if node.name.is_empty() {
                return Err(RegistryError::EmptyName);
            }
            if !seen.insert(node.name.as_str()) {
                return Err(RegistryError::Duplicate(node.name.clone()));
            }
        }
        Ok(NodeRegistry { nodes })
    }

    /// Loads the node list from a TOML file made of groups of
    /// `name = "url"` entries:
    ///
    /// ```toml
    /// [nodes]
    /// n1 = "http://10.0.0.1:8080/status"
    /// n2 = "http://10.0.0.2:8080/status"
    /// ```
    ///
    /// With `group` set only that group is read, otherwise every group is
    /// read in file order.
    pub fn load(path: &Path, group: Option<&str>) -> Result<Self> {
        info!("Configuration file: {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text, group)
    }

    pub fn parse(text: &str, group: Option<&str>) -> Result<Self> {
        let doc: toml::Table = toml::from_str(text)?;

        let groups: Vec<(&str, &toml::Value)> = match group {
            Some(g) => {
                let value = doc
                    .get(g)
                    .ok_or_else(|| RegistryError::MissingGroup(g.to_string()))?;
                vec![(g, value)]
            }
            None => doc.iter().map(|(k, v)| (k.as_str(), v)).collect(),
        };

        let mut nodes = Vec::new();
        for (group_name, entries) in groups {
            let entries = entries
                .as_table()
                .ok_or_else(|| RegistryError::NotAGroup(group_name.to_string()))?;
            for (name, url) in entries {
                let url = url
                    .as_str()
                    .ok_or_else(|| RegistryError::NotAString(name.clone()))?;
                nodes.push(NodeConfig::new(name, parse_url(name, url)?));
            }
        }

        let registry = Self::from_nodes(nodes)?;
        info!("Loaded {} nodes", registry.len());
        Ok(registry)
    }

    pub fn nodes(&self) -> &[NodeConfig] {
        &self.nodes
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeConfig> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn parse_url(name: &str, raw: &str) -> Result<Url> {
    let invalid = |reason: String| RegistryError::InvalidUrl {
        name: name.to_string(),
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme {other}"))),
    }
}
