//! Plugin names
//!
//! A plugin is published under a lookup key (the discovery file name). A
//! name may address a sub-type served by that plugin: `group/workers`
//! resolves to the plugin published as `group`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name a plugin is published or looked up under
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginName(String);

impl PluginName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Key the plugin is discovered under
    pub fn lookup(&self) -> &str {
        match self.0.split_once('/') {
            Some((lookup, _)) => lookup,
            None => &self.0,
        }
    }

    /// Sub-type after the slash, if any
    pub fn type_name(&self) -> Option<&str> {
        self.0
            .split_once('/')
            .map(|(_, t)| t)
            .filter(|t| !t.is_empty())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PluginName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PluginName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PluginName {
    fn from(s: String) -> Self {
        Self(s)
    }
}
