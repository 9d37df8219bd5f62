use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use walkdir::WalkDir;

use crate::error::MigrationError;

pub const DOCUMENT_EXTENSION: &str = ".html";
pub const FIXED_SUFFIX: &str = ".fixed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDocument {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct DocumentCache {
    dir: PathBuf,
}

impl DocumentCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn document_path(&self, page_id: &str) -> PathBuf {
        self.dir.join(document_filename(page_id))
    }

    pub fn fixed_path(&self, page_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}{FIXED_SUFFIX}", document_filename(page_id)))
    }

    /// Page ids of every `<id>.html` file directly inside the cache directory.
    pub fn list_page_ids(&self) -> Result<BTreeSet<String>> {
        let mut ids = BTreeSet::new();
        if !self.dir.exists() {
            return Ok(ids);
        }
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry
                .with_context(|| format!("failed to list {}", self.dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if let Some(id) = name.strip_suffix(DOCUMENT_EXTENSION)
                && !id.is_empty()
            {
                ids.insert(id.to_string());
            }
        }
        Ok(ids)
    }

    pub fn read(&self, page_id: &str) -> Result<String> {
        let path = self.document_path(page_id);
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))
    }

    /// Read the rewritten copy when one exists, otherwise the original. The flag reports which
    /// one was returned.
    pub fn read_preferring_fixed(&self, page_id: &str) -> Result<(String, bool)> {
        let fixed = self.fixed_path(page_id);
        if fixed.exists() {
            let content = fs::read_to_string(&fixed)
                .with_context(|| format!("failed to read {}", fixed.display()))?;
            return Ok((content, true));
        }
        Ok((self.read(page_id)?, false))
    }

    pub fn write_fixed(&self, page_id: &str, content: &str) -> Result<PathBuf> {
        let path = self.fixed_path(page_id);
        fs::write(&path, content).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

pub fn document_filename(page_id: &str) -> String {
    format!("{page_id}{DOCUMENT_EXTENSION}")
}

/// Strip any directory prefix and the document extension(s) from a cached filename.
pub fn page_id_from_filename(filename: &str) -> &str {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let base = base.strip_suffix(FIXED_SUFFIX).unwrap_or(base);
    base.strip_suffix(DOCUMENT_EXTENSION).unwrap_or(base)
}

fn envelope_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)\A<html><head><title>(.*?)</title></head><body>(.*)</body></html>\z")
            .expect("envelope pattern is valid")
    })
}

/// Split a cached document into its title and body. Both must be present and non-empty.
pub fn parse_document(filename: &str, content: &str) -> Result<PageDocument, MigrationError> {
    let parse_error = |reason: &str| MigrationError::ContentParse {
        filename: filename.to_string(),
        reason: reason.to_string(),
    };

    let captures = envelope_pattern()
        .captures(content.trim_end_matches(['\r', '\n']))
        .ok_or_else(|| parse_error("document does not match the html/head/title/body envelope"))?;
    let title = captures.get(1).map_or("", |m| m.as_str());
    let body = captures.get(2).map_or("", |m| m.as_str());
    if title.trim().is_empty() {
        return Err(parse_error("title is empty"));
    }
    if body.trim().is_empty() {
        return Err(parse_error("body is empty"));
    }

    Ok(PageDocument {
        title: title.to_string(),
        body: body.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{DocumentCache, page_id_from_filename, parse_document};

    #[test]
    fn parses_title_and_body() {
        let document = parse_document(
            "intro.html",
            "<html><head><title>Intro</title></head><body><p>Hello</p></body></html>\n",
        )
        .expect("parse");
        assert_eq!(document.title, "Intro");
        assert_eq!(document.body, "<p>Hello</p>");
    }

    #[test]
    fn rejects_documents_outside_the_envelope() {
        let error = parse_document("x.html", "<p>no envelope</p>").expect_err("must fail");
        assert!(!error.is_fatal());
        assert!(error.to_string().contains("x.html"));
    }

    #[test]
    fn rejects_empty_title_or_body() {
        let empty_title =
            parse_document("a.html", "<html><head><title></title></head><body>b</body></html>");
        assert!(empty_title.is_err());
        let empty_body =
            parse_document("a.html", "<html><head><title>A</title></head><body></body></html>");
        assert!(empty_body.is_err());
    }

    #[test]
    fn lists_ids_and_prefers_fixed_copies() {
        let temp = tempdir().expect("tempdir");
        let cache = DocumentCache::new(temp.path());
        fs::write(cache.document_path("alpha"), "original").expect("write alpha");
        fs::write(cache.document_path("beta"), "original").expect("write beta");
        fs::write(temp.path().join("notes.txt"), "ignored").expect("write notes");
        cache.write_fixed("alpha", "fixed").expect("write fixed");

        let ids = cache.list_page_ids().expect("list");
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["alpha", "beta"]);

        let (content, fixed) = cache.read_preferring_fixed("alpha").expect("read alpha");
        assert_eq!((content.as_str(), fixed), ("fixed", true));
        let (content, fixed) = cache.read_preferring_fixed("beta").expect("read beta");
        assert_eq!((content.as_str(), fixed), ("original", false));
    }

    #[test]
    fn page_id_strips_directory_and_extensions() {
        assert_eq!(page_id_from_filename("data/intro.html"), "intro");
        assert_eq!(page_id_from_filename("intro.html.fixed"), "intro");
        assert_eq!(page_id_from_filename("intro"), "intro");
    }
}
