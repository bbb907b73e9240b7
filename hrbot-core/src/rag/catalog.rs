//! The ordered policy catalog the router chooses from.

use serde::Serialize;
use std::collections::HashSet;
use tracing::warn;

use crate::config::CatalogEntry;

/// Ordered mapping of document name to description. Order matters: when the
/// router output mentions several names, the earliest entry wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyCatalog {
    entries: Vec<CatalogEntry>,
}

/// Differences between the catalog and the documents actually available.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogReconciliation {
    /// Documents present but not described, invisible to the router.
    pub undescribed: Vec<String>,
    /// Catalog entries with no document behind them.
    pub missing: Vec<String>,
}

impl CatalogReconciliation {
    pub fn is_clean(&self) -> bool {
        self.undescribed.is_empty() && self.missing.is_empty()
    }

    pub fn log_warnings(&self, context: &str) {
        for name in &self.undescribed {
            warn!(document = %name, context, "Document has no catalog description and can never be routed to");
        }
        for name in &self.missing {
            warn!(document = %name, context, "Catalog entry has no matching document");
        }
    }
}

impl PolicyCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        // first description wins for a repeated name
        let mut seen = HashSet::new();
        let entries = entries
            .into_iter()
            .filter(|e| seen.insert(e.name.clone()))
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Bulleted `- name: description` list for the router prompt.
    pub fn format_for_prompt(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("- {}: {}", e.name, e.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Compare against the document names that actually exist.
    pub fn reconcile(&self, available: &[String]) -> CatalogReconciliation {
        let available_set: HashSet<&str> = available.iter().map(String::as_str).collect();
        let mut undescribed: Vec<String> = available
            .iter()
            .filter(|name| !self.contains(name))
            .cloned()
            .collect();
        undescribed.sort();
        undescribed.dedup();
        let missing = self
            .entries
            .iter()
            .filter(|e| !available_set.contains(e.name.as_str()))
            .map(|e| e.name.clone())
            .collect();
        CatalogReconciliation {
            undescribed,
            missing,
        }
    }
}

impl From<Vec<CatalogEntry>> for PolicyCatalog {
    fn from(entries: Vec<CatalogEntry>) -> Self {
        Self::new(entries)
    }
}
