use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::error::MigrationError;

pub const CRAWL_LOG_COLUMNS: [&str; 5] = ["offset", "type", "name", "id", "url"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Category,
    Folder,
    Page,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::Folder => "folder",
            Self::Page => "page",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "category" => Some(Self::Category),
            "folder" => Some(Self::Folder),
            "page" => Some(Self::Page),
            _ => None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlEntry {
    pub offset: String,
    pub kind: NodeKind,
    pub name: String,
    pub id: String,
    pub url: String,
}

pub fn load_crawl_log(path: &Path) -> Result<Vec<CrawlEntry>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read crawl log {}", path.display()))?;
    let entries = parse_crawl_log(&content)
        .with_context(|| format!("malformed crawl log {}", path.display()))?;
    Ok(entries)
}

pub fn parse_crawl_log(content: &str) -> Result<Vec<CrawlEntry>, MigrationError> {
    let mut lines = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let Some((_, header)) = lines.next() else {
        return Err(MigrationError::structural("crawl log is empty"));
    };
    let header = header.trim_start_matches('\u{feff}');
    let columns = header
        .split('|')
        .map(|column| column.trim().to_ascii_lowercase())
        .collect::<Vec<_>>();
    if columns != CRAWL_LOG_COLUMNS {
        return Err(MigrationError::structural(format!(
            "crawl log header must be '{}', found '{header}'",
            CRAWL_LOG_COLUMNS.join("|")
        )));
    }

    lines
        .map(|(index, line)| parse_line(index + 1, line))
        .collect()
}

fn parse_line(line_number: usize, line: &str) -> Result<CrawlEntry, MigrationError> {
    let fields = line.split('|').collect::<Vec<_>>();
    if fields.len() < CRAWL_LOG_COLUMNS.len() {
        return Err(MigrationError::structural(format!(
            "line {line_number}: expected {} fields, found {}",
            CRAWL_LOG_COLUMNS.len(),
            fields.len()
        )));
    }

    // The crawler writes names unescaped, so a '|' inside a name yields extra fields.
    let last = fields.len() - 1;
    let offset = fields[0].trim();
    let raw_kind = fields[1].trim();
    let name = fields[2..last - 1].join("|");
    let id = fields[last - 1].trim();
    let url = fields[last].trim();

    let kind = NodeKind::parse(raw_kind).ok_or_else(|| {
        MigrationError::structural(format!(
            "line {line_number}: unknown type '{raw_kind}', must be 'category', 'folder' or 'page'"
        ))
    })?;
    validate_offset(offset).map_err(|reason| {
        MigrationError::structural(format!("line {line_number}: {reason}"))
    })?;

    Ok(CrawlEntry {
        offset: offset.to_string(),
        kind,
        name: name.trim().to_string(),
        id: id.to_string(),
        url: url.to_string(),
    })
}

pub fn offset_segments(offset: &str) -> Result<Vec<u32>, String> {
    if offset.is_empty() {
        return Err("empty offset".to_string());
    }
    offset
        .split('-')
        .map(|segment| {
            segment
                .parse::<u32>()
                .map_err(|_| format!("malformed offset '{offset}'"))
        })
        .collect()
}

fn validate_offset(offset: &str) -> Result<(), String> {
    offset_segments(offset).map(|_| ())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{NodeKind, load_crawl_log, offset_segments, parse_crawl_log};

    const LOG: &str = "offset|type|name|id|url
0|category|Engineering|eng|https://app.tettra.co/teams/acme/categories/eng
0-0|folder|Runbooks|runbooks|https://app.tettra.co/teams/acme/folders/runbooks
0-0-0|page|Deploys|deploys|https://app.tettra.co/teams/acme/pages/deploys
";

    #[test]
    fn parses_rows_in_log_order() {
        let entries = parse_crawl_log(LOG).expect("parse");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].kind, NodeKind::Category);
        assert_eq!(entries[1].offset, "0-0");
        assert_eq!(entries[2].id, "deploys");
        assert_eq!(
            entries[2].url,
            "https://app.tettra.co/teams/acme/pages/deploys"
        );
    }

    #[test]
    fn names_containing_pipes_are_recovered() {
        let log = "offset|type|name|id|url\n0|category|Ops | Infra|ops|https://x/ops\n";
        let entries = parse_crawl_log(log).expect("parse");
        assert_eq!(entries[0].name, "Ops | Infra");
        assert_eq!(entries[0].id, "ops");
    }

    #[test]
    fn unknown_type_is_structural() {
        let log = "offset|type|name|id|url\n0|section|Ops|ops|https://x/ops\n";
        let error = parse_crawl_log(log).expect_err("must fail");
        assert!(error.is_fatal());
        assert!(error.to_string().contains("unknown type 'section'"));
    }

    #[test]
    fn missing_header_is_structural() {
        let error = parse_crawl_log("0|category|Ops|ops|https://x/ops\n").expect_err("must fail");
        assert!(error.to_string().contains("header"));
    }

    #[test]
    fn malformed_offset_is_structural() {
        let log = "offset|type|name|id|url\n0-a|page|Ops|ops|https://x/ops\n";
        let error = parse_crawl_log(log).expect_err("must fail");
        assert!(error.to_string().contains("malformed offset '0-a'"));
    }

    #[test]
    fn offset_segments_decode_depth() {
        assert_eq!(offset_segments("2-1-0").expect("segments"), vec![2, 1, 0]);
        assert!(offset_segments("").is_err());
        assert!(offset_segments("1--2").is_err());
    }

    #[test]
    fn load_reads_from_disk() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("crawl.log");
        fs::write(&path, LOG).expect("write log");
        let entries = load_crawl_log(&path).expect("load");
        assert_eq!(entries.len(), 3);
    }
}
