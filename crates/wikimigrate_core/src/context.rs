use anyhow::{Context, Result, bail};

use crate::api::{ContentApi, Space};
use crate::config::{MigrationConfig, load_config};
use crate::crawl_log::{CrawlEntry, load_crawl_log};
use crate::document::DocumentCache;
use crate::error::MigrationError;
use crate::links::LinkMatcher;
use crate::runtime::{PathOverrides, ResolutionContext, ResolvedPaths, resolve_paths};
use crate::tree::{TreeNode, build_category_tree};

#[derive(Debug, Clone)]
pub struct MigrationContext {
    pub config: MigrationConfig,
    pub paths: ResolvedPaths,
}

impl MigrationContext {
    pub fn resolve(overrides: &PathOverrides) -> Result<Self> {
        let resolution = ResolutionContext::from_process()?;
        let paths = resolve_paths(&resolution, overrides)?;
        Self::from_paths(paths)
    }

    pub fn from_paths(paths: ResolvedPaths) -> Result<Self> {
        let config = load_config(&paths.config_path)?;
        Ok(Self { config, paths })
    }

    pub fn document_cache(&self) -> DocumentCache {
        DocumentCache::new(&self.paths.data_dir)
    }

    pub fn link_matcher(&self) -> Result<LinkMatcher> {
        let source = self.config.source_settings();
        LinkMatcher::new(&source.storage_host, &source.app_host, &source.company)
    }

    pub fn load_crawl_entries(&self) -> Result<Vec<CrawlEntry>> {
        load_crawl_log(&self.paths.crawl_log)
    }

    pub fn load_tree(&self) -> Result<(Vec<CrawlEntry>, Vec<TreeNode>)> {
        let entries = self.load_crawl_entries()?;
        let forest = build_category_tree(&entries).with_context(|| {
            format!(
                "failed to build category tree from {}",
                self.paths.crawl_log.display()
            )
        })?;
        Ok((entries, forest))
    }

    pub fn space_name(&self) -> Result<String> {
        match self.config.destination_settings().space {
            Some(space) => Ok(space),
            None => bail!("destination space is not configured (set CONFLUENCE_SPACE or [destination].space)"),
        }
    }
}

pub fn resolve_space<A: ContentApi>(api: &mut A, name: &str) -> Result<Space> {
    let space = api
        .find_space(name)
        .with_context(|| format!("failed to look up space '{name}'"))?;
    match space {
        Some(space) => {
            tracing::info!(key = %space.key, id = %space.id, "resolved space '{name}'");
            Ok(space)
        }
        None => Err(MigrationError::structural(format!("space '{name}' not found")).into()),
    }
}
