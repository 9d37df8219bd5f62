use std::collections::BTreeMap;

use crate::crawl_log::offset_segments;
use crate::error::MigrationError;
use crate::tree::TreeNode;

#[derive(Debug, Default)]
pub struct OffsetIndex<'a> {
    nodes: BTreeMap<String, &'a TreeNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentLookup<'a> {
    Root,
    Found(&'a TreeNode),
    Missing,
}

impl<'a> OffsetIndex<'a> {
    pub fn build(forest: &'a [TreeNode]) -> Result<Self, MigrationError> {
        let mut index = Self::default();
        for root in forest {
            index.insert_subtree(root)?;
        }
        Ok(index)
    }

    fn insert_subtree(&mut self, node: &'a TreeNode) -> Result<(), MigrationError> {
        if self.nodes.insert(node.offset.clone(), node).is_some() {
            return Err(MigrationError::structural(format!(
                "offset {} appears twice in the tree",
                node.offset
            )));
        }
        for folder in &node.folders {
            self.insert_subtree(folder)?;
        }
        for page in &node.pages {
            self.insert_subtree(page)?;
        }
        Ok(())
    }

    pub fn get(&self, offset: &str) -> Option<&'a TreeNode> {
        self.nodes.get(offset).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get_parent(&self, offset: &str) -> Result<ParentLookup<'a>, MigrationError> {
        offset_segments(offset).map_err(MigrationError::InvalidInput)?;
        let Some((parent_offset, _)) = offset.rsplit_once('-') else {
            return Ok(ParentLookup::Root);
        };
        Ok(match self.get(parent_offset) {
            Some(parent) => ParentLookup::Found(parent),
            None => ParentLookup::Missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{OffsetIndex, ParentLookup};
    use crate::crawl_log::parse_crawl_log;
    use crate::tree::{TreeNode, build_category_tree};

    const LOG: &str = "offset|type|name|id|url
0|category|Docs|docs|u0
0-0|page|Intro|intro|u1
0-1|folder|Guides|guides|u2
0-1-0|page|Setup|setup|u3
";

    #[test]
    fn indexes_every_node() {
        let forest = build_category_tree(&parse_crawl_log(LOG).expect("parse")).expect("build");
        let index = OffsetIndex::build(&forest).expect("index");
        assert_eq!(index.len(), 4);
        assert_eq!(index.get("0-1-0").map(|node| node.id.as_str()), Some("setup"));
    }

    #[test]
    fn resolves_parents_by_prefix() {
        let forest = build_category_tree(&parse_crawl_log(LOG).expect("parse")).expect("build");
        let index = OffsetIndex::build(&forest).expect("index");

        assert_eq!(index.get_parent("0").expect("root"), ParentLookup::Root);
        match index.get_parent("0-1-0").expect("lookup") {
            ParentLookup::Found(parent) => assert_eq!(parent.name, "Guides"),
            other => panic!("unexpected lookup {other:?}"),
        }
        match index.get_parent("0-0").expect("lookup") {
            ParentLookup::Found(parent) => assert_eq!(parent.name, "Docs"),
            other => panic!("unexpected lookup {other:?}"),
        }
        assert_eq!(
            index.get_parent("7-0").expect("lookup"),
            ParentLookup::Missing
        );
    }

    #[test]
    fn rejects_empty_and_malformed_offsets() {
        let forest: Vec<TreeNode> = Vec::new();
        let index = OffsetIndex::build(&forest).expect("index");
        assert!(index.get_parent("").expect_err("empty").is_fatal());
        assert!(index.get_parent("0-x").is_err());
    }
}
