use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::crawl_log::NodeKind;
use crate::document::{document_filename, page_id_from_filename};
use crate::tabular::{COMMA, Row, read_records, row_value, write_records};
use crate::tree::TreeNode;

pub const CREATED_PAGES_FILE: &str = "created-pages.csv";
pub const UPLOADED_IMAGES_FILE: &str = "uploaded-images.csv";
pub const UPDATED_PAGES_FILE: &str = "updated-pages.csv";
pub const DOWNLOADED_IMAGES_FILE: &str = "downloaded-images.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Nok,
    Skip,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Nok => "NOK",
            Self::Skip => "SKIP",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "OK" => Some(Self::Ok),
            "NOK" => Some(Self::Nok),
            "SKIP" => Some(Self::Skip),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait LedgerRow: Sized {
    fn to_row(&self) -> Row;
    fn from_row(row: &Row) -> Result<Self>;
    fn outcome(&self) -> Outcome;
}

#[derive(Debug, Clone)]
pub struct Ledger<T> {
    path: PathBuf,
    rows: Vec<T>,
}

impl<T: LedgerRow> Ledger<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rows: Vec::new(),
        }
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let rows = read_records(&path, COMMA)?
            .iter()
            .enumerate()
            .map(|(index, row)| {
                T::from_row(row)
                    .with_context(|| format!("invalid row {} in {}", index + 2, path.display()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { path, rows })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> &[T] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push(&mut self, row: T) {
        self.rows.push(row);
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.rows.iter().filter(|row| row.outcome() == outcome).count()
    }

    pub fn save(&self) -> Result<()> {
        let rows = self.rows.iter().map(LedgerRow::to_row).collect::<Vec<_>>();
        write_records(&self.path, &rows, COMMA)
    }
}

fn build_row(pairs: &[(&str, &str)]) -> Row {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect()
}

fn field(row: &Row, key: &str) -> String {
    row_value(row, key).unwrap_or("").trim().to_string()
}

fn outcome_field(row: &Row) -> Result<Outcome> {
    let value = field(row, "result");
    match Outcome::parse(&value) {
        Some(outcome) => Ok(outcome),
        None => bail!("unknown result '{value}'"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPage {
    pub result: Outcome,
    pub id: String,
    pub offset: String,
    pub title: String,
    pub filename: String,
}

impl LedgerRow for CreatedPage {
    fn to_row(&self) -> Row {
        build_row(&[
            ("result", self.result.as_str()),
            ("id", self.id.as_str()),
            ("offset", self.offset.as_str()),
            ("title", self.title.as_str()),
            ("filename", self.filename.as_str()),
        ])
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            result: outcome_field(row)?,
            id: field(row, "id"),
            offset: field(row, "offset"),
            title: field(row, "title"),
            filename: field(row, "filename"),
        })
    }

    fn outcome(&self) -> Outcome {
        self.result
    }
}

impl Ledger<CreatedPage> {
    /// Destination id of the most recent OK row for `node`. Pages match on their source filename
    /// so a moved offset never re-creates them. Containers match on offset and title, except the
    /// miscellaneous category, which matches on title alone since its offset follows the crawl.
    pub fn destination_for(&self, node: &TreeNode) -> Option<&str> {
        let filename = match node.kind {
            NodeKind::Page => document_filename(&node.id),
            NodeKind::Category | NodeKind::Folder => String::new(),
        };
        self.rows
            .iter()
            .rev()
            .filter(|row| row.result == Outcome::Ok && !row.id.is_empty())
            .find(|row| {
                if row.filename != filename {
                    return false;
                }
                match node.kind {
                    NodeKind::Page => true,
                    _ if node.is_synthetic() => row.title == node.name,
                    _ => row.offset == node.offset && row.title == node.name,
                }
            })
            .map(|row| row.id.as_str())
    }

    pub fn destination_ids_by_page(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        for row in &self.rows {
            if row.result != Outcome::Ok || row.filename.is_empty() || row.id.is_empty() {
                continue;
            }
            map.insert(
                page_id_from_filename(&row.filename).to_string(),
                row.id.clone(),
            );
        }
        map
    }

    pub fn title_for_page(&self, page_id: &str) -> Option<&str> {
        self.rows
            .iter()
            .rev()
            .find(|row| {
                row.result == Outcome::Ok
                    && !row.filename.is_empty()
                    && page_id_from_filename(&row.filename) == page_id
            })
            .map(|row| row.title.as_str())
    }

    pub fn published_documents(&self) -> Vec<&CreatedPage> {
        let mut latest: BTreeMap<&str, usize> = BTreeMap::new();
        for (index, row) in self.rows.iter().enumerate() {
            if row.result == Outcome::Ok && !row.filename.is_empty() && !row.id.is_empty() {
                latest.insert(row.id.as_str(), index);
            }
        }
        let mut indexes = latest.into_values().collect::<Vec<_>>();
        indexes.sort_unstable();
        indexes.into_iter().map(|index| &self.rows[index]).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    pub result: Outcome,
    pub id: String,
    pub page_id: String,
    pub filename: String,
    pub reason: String,
}

impl LedgerRow for UploadedImage {
    fn to_row(&self) -> Row {
        build_row(&[
            ("result", self.result.as_str()),
            ("id", self.id.as_str()),
            ("page_id", self.page_id.as_str()),
            ("filename", self.filename.as_str()),
            ("reason", self.reason.as_str()),
        ])
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            result: outcome_field(row)?,
            id: field(row, "id"),
            page_id: field(row, "page_id"),
            filename: field(row, "filename"),
            reason: field(row, "reason"),
        })
    }

    fn outcome(&self) -> Outcome {
        self.result
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatedPage {
    pub result: Outcome,
    pub id: String,
    pub title: String,
    pub reason: String,
}

impl LedgerRow for UpdatedPage {
    fn to_row(&self) -> Row {
        build_row(&[
            ("result", self.result.as_str()),
            ("id", self.id.as_str()),
            ("title", self.title.as_str()),
            ("reason", self.reason.as_str()),
        ])
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            result: outcome_field(row)?,
            id: field(row, "id"),
            title: field(row, "title"),
            reason: field(row, "reason"),
        })
    }

    fn outcome(&self) -> Outcome {
        self.result
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedImage {
    pub result: Outcome,
    pub filename: String,
    pub url: String,
    pub reason: String,
}

impl LedgerRow for DownloadedImage {
    fn to_row(&self) -> Row {
        build_row(&[
            ("result", self.result.as_str()),
            ("filename", self.filename.as_str()),
            ("url", self.url.as_str()),
            ("reason", self.reason.as_str()),
        ])
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            result: outcome_field(row)?,
            filename: field(row, "filename"),
            url: field(row, "url"),
            reason: field(row, "reason"),
        })
    }

    fn outcome(&self) -> Outcome {
        self.result
    }
}
