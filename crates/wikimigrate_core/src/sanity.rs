use std::collections::{BTreeMap, BTreeSet};

use crate::crawl_log::{CrawlEntry, NodeKind};
use crate::error::MigrationError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanityReport {
    pub miscellaneous: BTreeSet<String>,
    pub duplicates: BTreeSet<String>,
}

impl SanityReport {
    pub fn is_fatal(&self) -> bool {
        !self.duplicates.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.miscellaneous.is_empty() && self.duplicates.is_empty()
    }

    pub fn ensure_no_duplicates(&self) -> Result<(), MigrationError> {
        if !self.is_fatal() {
            return Ok(());
        }
        Err(MigrationError::structural(format!(
            "{} page id(s) referenced more than once in the crawl log: {}",
            self.duplicates.len(),
            self.duplicates
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }
}

pub fn check_sanity(entries: &[CrawlEntry], cached_ids: &BTreeSet<String>) -> SanityReport {
    let mut references: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in entries.iter().filter(|entry| entry.kind == NodeKind::Page) {
        *references.entry(entry.id.as_str()).or_insert(0) += 1;
    }

    let duplicates = references
        .iter()
        .filter(|(_, count)| **count > 1)
        .map(|(id, _)| (*id).to_string())
        .collect();
    let miscellaneous = cached_ids
        .iter()
        .filter(|id| !references.contains_key(id.as_str()))
        .cloned()
        .collect();

    let report = SanityReport {
        miscellaneous,
        duplicates,
    };
    if report.is_clean() {
        tracing::info!("sanity check => OK");
    } else {
        tracing::warn!(
            miscellaneous = report.miscellaneous.len(),
            duplicates = report.duplicates.len(),
            "sanity check => NOK"
        );
    }
    report
}
