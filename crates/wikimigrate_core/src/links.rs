use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result, bail};
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::document::{DocumentCache, document_filename, parse_document};
use crate::tabular::{COMMA, Row, read_records, row_value, write_records};

pub const LINK_INVENTORY_COLUMNS: [&str; 6] = ["counter", "filename", "title", "tag", "page", "value"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    Image,
    Anchor { target_page_id: String },
}

impl LinkKind {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Anchor { .. } => "anchor",
        }
    }

    pub fn target_page_id(&self) -> &str {
        match self {
            Self::Image => "",
            Self::Anchor { target_page_id } => target_page_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    pub sequence: usize,
    pub filename: String,
    pub title: String,
    pub kind: LinkKind,
    pub raw_url: String,
}

impl LinkRecord {
    pub fn is_image(&self) -> bool {
        self.kind == LinkKind::Image
    }

    fn to_row(&self) -> Row {
        let values = [
            self.sequence.to_string(),
            self.filename.clone(),
            self.title.clone(),
            self.kind.tag().to_string(),
            self.kind.target_page_id().to_string(),
            self.raw_url.clone(),
        ];
        LINK_INVENTORY_COLUMNS
            .iter()
            .map(|column| column.to_string())
            .zip(values)
            .collect()
    }

    fn from_row(row: &Row) -> Result<Self> {
        let field = |key: &str| row_value(row, key).unwrap_or("").trim().to_string();
        let counter = field("counter");
        let sequence = counter
            .parse::<usize>()
            .with_context(|| format!("invalid link counter '{counter}'"))?;
        let kind = match field("tag").as_str() {
            "image" => LinkKind::Image,
            "anchor" => LinkKind::Anchor {
                target_page_id: field("page"),
            },
            other => bail!("unknown link tag '{other}'"),
        };
        Ok(Self {
            sequence,
            filename: field("filename"),
            title: field("title"),
            kind,
            raw_url: field("value"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct LinkMatcher {
    image: Regex,
    anchor: Regex,
}

impl LinkMatcher {
    pub fn new(storage_host: &str, app_host: &str, company: &str) -> Result<Self> {
        if company.trim().is_empty() {
            bail!("source company is not configured (set TETTRA_COMPANY or [source].company)");
        }
        let image = Regex::new(&format!(r"^https?://{}", regex::escape(storage_host.trim())))
            .context("failed to compile image url pattern")?;
        let anchor = Regex::new(&format!(
            r"^https?://{}/teams/{}/pages/([^/?#]+)$",
            regex::escape(app_host.trim()),
            regex::escape(company.trim())
        ))
        .context("failed to compile page url pattern")?;
        Ok(Self { image, anchor })
    }

    pub fn is_image(&self, url: &str) -> bool {
        self.image.is_match(url)
    }

    pub fn anchor_target<'u>(&self, url: &'u str) -> Option<&'u str> {
        self.anchor
            .captures(url)
            .and_then(|captures| captures.get(1))
            .map(|target| target.as_str())
    }
}

fn markup_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)<img\b[^>]*?\bsrc\s*=\s*"([^"]*)"|<a\b[^>]*?\bhref\s*=\s*"([^"]*)""#)
            .expect("link markup pattern is valid")
    })
}

pub fn extract_links(
    matcher: &LinkMatcher,
    filename: &str,
    title: &str,
    body: &str,
) -> Vec<LinkRecord> {
    let mut records = Vec::new();
    for captures in markup_pattern().captures_iter(body) {
        let (kind, url) = if let Some(src) = captures.get(1) {
            if !matcher.is_image(src.as_str()) {
                continue;
            }
            (LinkKind::Image, src.as_str())
        } else if let Some(href) = captures.get(2) {
            let Some(target) = matcher.anchor_target(href.as_str()) else {
                continue;
            };
            (
                LinkKind::Anchor {
                    target_page_id: target.to_string(),
                },
                href.as_str(),
            )
        } else {
            continue;
        };

        records.push(LinkRecord {
            sequence: records.len() + 1,
            filename: filename.to_string(),
            title: title.to_string(),
            kind,
            raw_url: url.to_string(),
        });
    }
    records
}

#[derive(Debug, Clone, Default)]
pub struct ExtractReport {
    pub documents_scanned: usize,
    pub records: Vec<LinkRecord>,
    pub skipped: Vec<(String, String)>,
}

impl ExtractReport {
    pub fn image_count(&self) -> usize {
        self.records.iter().filter(|record| record.is_image()).count()
    }

    pub fn anchor_count(&self) -> usize {
        self.records.len() - self.image_count()
    }
}

pub fn extract_inventory(
    cache: &DocumentCache,
    page_ids: &BTreeSet<String>,
    matcher: &LinkMatcher,
) -> Result<ExtractReport> {
    let mut report = ExtractReport::default();
    for page_id in page_ids {
        let filename = document_filename(page_id);
        let content = cache.read(page_id)?;
        report.documents_scanned += 1;
        let document = match parse_document(&filename, &content) {
            Ok(document) => document,
            Err(error) => {
                tracing::warn!(%filename, "{error}");
                report.skipped.push((filename, error.to_string()));
                continue;
            }
        };
        let records = extract_links(matcher, &filename, &document.title, &document.body);
        tracing::debug!(%filename, links = records.len(), "scanned document");
        report.records.extend(records);
    }
    Ok(report)
}

pub fn save_inventory(path: &Path, records: &[LinkRecord]) -> Result<()> {
    let rows = records.iter().map(LinkRecord::to_row).collect::<Vec<_>>();
    write_records(path, &rows, COMMA)
}

pub fn load_inventory(path: &Path) -> Result<Vec<LinkRecord>> {
    if !path.exists() {
        bail!(
            "link inventory {} not found (run `wikimigrate links` first)",
            path.display()
        );
    }
    read_records(path, COMMA)?
        .iter()
        .enumerate()
        .map(|(index, row)| {
            LinkRecord::from_row(row).with_context(|| {
                format!("invalid row {} in {}", index + 2, path.display())
            })
        })
        .collect()
}

/// Local and attachment file name per image URL. URLs sharing a basename each get a name
/// suffixed with a digest of the full URL, so distinct images never land on the same file.
pub fn image_filenames(records: &[LinkRecord]) -> BTreeMap<String, String> {
    let mut urls_by_name: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for record in records.iter().filter(|record| record.is_image()) {
        urls_by_name
            .entry(url_basename(&record.raw_url))
            .or_default()
            .insert(record.raw_url.as_str());
    }

    let mut names = BTreeMap::new();
    for (basename, urls) in urls_by_name {
        let shared = urls.len() > 1 && !basename.is_empty();
        if shared {
            tracing::warn!(%basename, urls = urls.len(), "image name is shared, adding url digest");
        }
        for url in urls {
            let name = if shared {
                disambiguated_name(basename, url)
            } else {
                basename.to_string()
            };
            names.insert(url.to_string(), name);
        }
    }
    names
}

fn disambiguated_name(basename: &str, url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let mut suffix = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        suffix.push_str(&format!("{byte:02x}"));
    }
    match basename.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => format!("{stem}-{suffix}.{extension}"),
        _ => format!("{basename}-{suffix}"),
    }
}

pub fn url_basename(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let path = &url[..end];
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}
