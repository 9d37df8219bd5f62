use std::collections::{BTreeSet, HashSet};
use std::fmt::Write as _;

use crate::crawl_log::{CrawlEntry, NodeKind, offset_segments};
use crate::error::MigrationError;

pub const MISCELLANEOUS_NAME: &str = "Miscellaneous";
pub const MISCELLANEOUS_ID: &str = "miscellaneous";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub offset: String,
    pub kind: NodeKind,
    pub name: String,
    pub id: String,
    pub url: String,
    pub folders: Vec<TreeNode>,
    pub pages: Vec<TreeNode>,
}

impl TreeNode {
    fn from_entry(entry: &CrawlEntry) -> Self {
        Self {
            offset: entry.offset.clone(),
            kind: entry.kind,
            name: entry.name.clone(),
            id: entry.id.clone(),
            url: entry.url.clone(),
            folders: Vec::new(),
            pages: Vec::new(),
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.kind == NodeKind::Category && self.id == MISCELLANEOUS_ID && self.url.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.offset.split('-').count()
    }

    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a TreeNode)) {
        visit(self);
        for folder in &self.folders {
            folder.walk(visit);
        }
        for page in &self.pages {
            page.walk(visit);
        }
    }

    fn attach(&mut self, child: TreeNode) -> Result<(), MigrationError> {
        match child.kind {
            NodeKind::Folder => self.folders.push(child),
            NodeKind::Page => self.pages.push(child),
            NodeKind::Category => {
                return Err(MigrationError::structural(format!(
                    "category '{}' at offset {} must be top-level",
                    child.name, child.offset
                )));
            }
        }
        Ok(())
    }
}

pub fn preorder(forest: &[TreeNode]) -> Vec<&TreeNode> {
    let mut nodes = Vec::new();
    for root in forest {
        root.walk(&mut |node| nodes.push(node));
    }
    nodes
}

pub fn build_category_tree(entries: &[CrawlEntry]) -> Result<Vec<TreeNode>, MigrationError> {
    let mut forest: Vec<TreeNode> = Vec::new();
    let mut seen_offsets = HashSet::new();

    for entry in entries {
        let segments = offset_segments(&entry.offset).map_err(MigrationError::Structural)?;
        if segments.len() > 3 {
            tracing::warn!(
                offset = %entry.offset,
                name = %entry.name,
                "tree depth {} is not supported, skipping entry",
                segments.len()
            );
            continue;
        }
        if !seen_offsets.insert(entry.offset.clone()) {
            return Err(MigrationError::structural(format!(
                "offset {} is declared twice ('{}')",
                entry.offset, entry.name
            )));
        }

        let node = TreeNode::from_entry(entry);
        if segments.len() == 1 {
            if entry.kind != NodeKind::Category {
                return Err(MigrationError::structural(format!(
                    "top-level entry '{}' at offset {} must be a category, found {}",
                    entry.name, entry.offset, entry.kind
                )));
            }
            forest.push(node);
            continue;
        }

        let category_offset = segments[0].to_string();
        let category = forest
            .iter_mut()
            .find(|candidate| candidate.offset == category_offset)
            .ok_or_else(|| {
                MigrationError::structural(format!(
                    "unknown category {category_offset} for '{}' at offset {}",
                    entry.name, entry.offset
                ))
            })?;

        if segments.len() == 2 {
            category.attach(node)?;
            continue;
        }

        let folder_offset = format!("{}-{}", segments[0], segments[1]);
        let folder = category
            .folders
            .iter_mut()
            .find(|candidate| candidate.offset == folder_offset)
            .ok_or_else(|| {
                MigrationError::structural(format!(
                    "unknown folder {folder_offset} for '{}' at offset {}",
                    entry.name, entry.offset
                ))
            })?;
        folder.attach(node)?;
    }

    Ok(forest)
}

pub fn miscellaneous_category(
    forest: &[TreeNode],
    page_ids: &BTreeSet<String>,
) -> Result<TreeNode, MigrationError> {
    let next = match forest
        .iter()
        .filter_map(|category| category.offset.parse::<u32>().ok())
        .max()
    {
        Some(max) => max.checked_add(1).ok_or_else(|| {
            MigrationError::structural(format!(
                "no offset left after top-level offset {max} for the miscellaneous category"
            ))
        })?,
        None => 0,
    };
    let offset = next.to_string();

    let pages = page_ids
        .iter()
        .enumerate()
        .map(|(index, id)| TreeNode {
            offset: format!("{offset}-{index}"),
            kind: NodeKind::Page,
            name: id.clone(),
            id: id.clone(),
            url: String::new(),
            folders: Vec::new(),
            pages: Vec::new(),
        })
        .collect();

    Ok(TreeNode {
        offset,
        kind: NodeKind::Category,
        name: MISCELLANEOUS_NAME.to_string(),
        id: MISCELLANEOUS_ID.to_string(),
        url: String::new(),
        folders: Vec::new(),
        pages,
    })
}

pub fn render_tree(forest: &[TreeNode]) -> String {
    let mut output = String::new();
    for node in preorder(forest) {
        let indent = "  ".repeat(node.depth() - 1);
        let _ = write!(
            output,
            "{indent}{} {} '{}' {} {}",
            node.offset, node.kind, node.name, node.id, node.url
        );
        if node.kind != NodeKind::Page {
            let _ = write!(
                output,
                " folders: {}, pages: {}",
                node.folders.len(),
                node.pages.len()
            );
        }
        output.push('\n');
    }
    output
}
