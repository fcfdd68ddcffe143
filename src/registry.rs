//! Tool registry: canonical and external names, both directions.
//!
//! Populated while the server is assembled and read-only afterwards, so lookups take no
//! locks.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::mcp::ToolDescriptor;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool '{name}' is already registered (conflicts with '{conflicts_with}')")]
    DuplicateTool {
        name: String,
        conflicts_with: String,
    },

    #[error("invalid tool name '{0}': names may only contain letters, digits, '_', '.' and '-'")]
    InvalidName(String),
}

/// A named group of tools. A disabled toolset contributes nothing.
pub trait Toolset: Send + Sync {
    fn name(&self) -> &str;

    fn enabled(&self) -> bool;

    /// Every tool the toolset can offer given the capabilities it detected.
    fn descriptors(&self) -> Vec<ToolDescriptor>;

    fn tools(&self) -> Vec<ToolDescriptor> {
        if self.enabled() {
            self.descriptors()
        } else {
            Vec::new()
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegisteredTool {
    pub canonical: String,
    pub external: String,
    pub toolset: String,
    pub descriptor: Arc<ToolDescriptor>,
}

#[derive(Debug, Default)]
pub struct ToolRegistry {
    normalize: bool,
    tools: Vec<RegisteredTool>,
    by_external: HashMap<String, usize>,
    canonical_to_external: HashMap<String, String>,
}

/// Replace every `.` with `_`.
pub fn normalize_name(canonical: &str) -> String {
    canonical.replace('.', "_")
}

pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

impl ToolRegistry {
    pub fn new(normalize: bool) -> Self {
        Self {
            normalize,
            ..Default::default()
        }
    }

    pub fn normalizes(&self) -> bool {
        self.normalize
    }

    /// Register every tool of `source`. The whole batch is validated first, so a
    /// collision leaves the registry unchanged.
    pub fn register(&mut self, source: &dyn Toolset) -> Result<usize, RegistryError> {
        let descriptors = source.tools();
        let mut staged: Vec<(String, ToolDescriptor)> = Vec::with_capacity(descriptors.len());
        let mut staged_names: HashMap<String, String> = HashMap::new();

        for descriptor in descriptors {
            if !is_valid_name(&descriptor.name) {
                return Err(RegistryError::InvalidName(descriptor.name));
            }
            if self.canonical_to_external.contains_key(&descriptor.name)
                || staged.iter().any(|(_, d)| d.name == descriptor.name)
            {
                return Err(RegistryError::DuplicateTool {
                    name: descriptor.name.clone(),
                    conflicts_with: descriptor.name,
                });
            }

            let external = if self.normalize {
                normalize_name(&descriptor.name)
            } else {
                descriptor.name.clone()
            };
            let existing = self
                .by_external
                .get(&external)
                .map(|&index| self.tools[index].canonical.clone())
                .or_else(|| staged_names.get(&external).cloned());
            if let Some(conflicts_with) = existing {
                return Err(RegistryError::DuplicateTool {
                    name: descriptor.name,
                    conflicts_with,
                });
            }

            staged_names.insert(external.clone(), descriptor.name.clone());
            staged.push((external, descriptor));
        }

        let count = staged.len();
        for (external, descriptor) in staged {
            self.by_external.insert(external.clone(), self.tools.len());
            self.canonical_to_external
                .insert(descriptor.name.clone(), external.clone());
            self.tools.push(RegisteredTool {
                canonical: descriptor.name.clone(),
                external,
                toolset: source.name().to_string(),
                descriptor: Arc::new(descriptor),
            });
        }

        tracing::debug!(toolset = source.name(), tools = count, "registered toolset");
        Ok(count)
    }

    /// Registered tools in registration order.
    pub fn list(&self) -> &[RegisteredTool] {
        &self.tools
    }

    pub fn lookup(&self, external: &str) -> Option<&RegisteredTool> {
        self.by_external.get(external).map(|&index| &self.tools[index])
    }

    pub fn external_name(&self, canonical: &str) -> Option<&str> {
        self.canonical_to_external.get(canonical).map(String::as_str)
    }

    pub fn canonical_name(&self, external: &str) -> Option<&str> {
        self.lookup(external).map(|tool| tool.canonical.as_str())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_replaces_dots() {
        assert_eq!(normalize_name("autoscaling.hpa_explain"), "autoscaling_hpa_explain");
        assert_eq!(normalize_name("plain"), "plain");
    }

    #[test]
    fn names_are_restricted_to_safe_characters() {
        assert!(is_valid_name("backup.backups_list"));
        assert!(is_valid_name("a-b_c.d9"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("has space"));
        assert!(!is_valid_name("slash/name"));
    }
}
