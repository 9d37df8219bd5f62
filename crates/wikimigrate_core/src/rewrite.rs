use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::Result;
use regex::{Regex, RegexBuilder};

use crate::context::MigrationContext;
use crate::document::{DocumentCache, page_id_from_filename};
use crate::error::MigrationError;
use crate::ledger::{CreatedPage, Ledger};
use crate::links::{LinkKind, LinkRecord, image_filenames, load_inventory};

pub fn attachment_tag(filename: &str) -> String {
    format!(
        r#"<ac:image><ri:attachment ri:filename="{}" /></ac:image>"#,
        escape_attribute(filename)
    )
}

pub fn page_link_tag(title: &str) -> String {
    format!(
        r#"<ac:link><ri:page ri:content-title="{}" /></ac:link>"#,
        escape_attribute(title)
    )
}

#[derive(Debug, Clone, Default)]
pub struct RewriteReport {
    pub documents: usize,
    pub images_rewritten: usize,
    pub anchors_rewritten: usize,
    pub not_found: Vec<MigrationError>,
    pub skipped_documents: Vec<(String, String)>,
    pub written: Vec<PathBuf>,
}

pub fn rewrite(context: &MigrationContext) -> Result<RewriteReport> {
    let records = load_inventory(&context.paths.links_path())?;
    let ledger = Ledger::<CreatedPage>::load(context.paths.created_pages_path())?;
    rewrite_documents(&context.document_cache(), &records, &ledger)
}

pub fn rewrite_documents(
    cache: &DocumentCache,
    records: &[LinkRecord],
    ledger: &Ledger<CreatedPage>,
) -> Result<RewriteReport> {
    let names = image_filenames(records);
    let mut report = RewriteReport::default();
    for (filename, links) in group_by_document(records) {
        let page_id = page_id_from_filename(filename);
        let mut content = match cache.read_preferring_fixed(page_id) {
            Ok((content, _)) => content,
            Err(error) => {
                tracing::warn!(%filename, "skipping document: {error:#}");
                report
                    .skipped_documents
                    .push((filename.to_string(), format!("{error:#}")));
                continue;
            }
        };
        report.documents += 1;

        for link in links {
            match rewrite_link(&mut content, link, &names, ledger) {
                Ok(()) if link.is_image() => report.images_rewritten += 1,
                Ok(()) => report.anchors_rewritten += 1,
                Err(error) => {
                    tracing::warn!(sequence = link.sequence, "{error}");
                    report.not_found.push(error);
                }
            }
        }

        let path = cache.write_fixed(page_id, &content)?;
        tracing::debug!(path = %path.display(), "wrote fixed document");
        report.written.push(path);
    }
    Ok(report)
}

fn group_by_document(records: &[LinkRecord]) -> Vec<(&str, Vec<&LinkRecord>)> {
    let mut groups: Vec<(&str, Vec<&LinkRecord>)> = Vec::new();
    for record in records {
        match groups
            .iter_mut()
            .find(|(filename, _)| *filename == record.filename)
        {
            Some((_, links)) => links.push(record),
            None => groups.push((record.filename.as_str(), vec![record])),
        }
    }
    groups
}

fn rewrite_link(
    content: &mut String,
    link: &LinkRecord,
    names: &BTreeMap<String, String>,
    ledger: &Ledger<CreatedPage>,
) -> Result<(), MigrationError> {
    let not_found = || MigrationError::LinkNotFound {
        filename: link.filename.clone(),
        url: link.raw_url.clone(),
    };
    let escaped = regex::escape(&link.raw_url);

    match &link.kind {
        LinkKind::Image => {
            let pattern = markup_regex(&format!(r#"<img\b[^>]*?\bsrc\s*=\s*"{escaped}"[^>]*>"#))
                .map_err(|_| not_found())?;
            let found = pattern.find(content).ok_or_else(not_found)?;
            let name = names.get(&link.raw_url).ok_or_else(not_found)?;
            let range = found.range();
            content.replace_range(range, &attachment_tag(name));
        }
        LinkKind::Anchor { target_page_id } => {
            let pattern = markup_regex(&format!(
                r#"<a\b[^>]*?\bhref\s*=\s*"{escaped}"[^>]*>(.*?)</a>"#
            ))
            .map_err(|_| not_found())?;
            let captures = pattern.captures(content).ok_or_else(not_found)?;
            let text = captures
                .get(1)
                .map(|inner| visible_text(inner.as_str()))
                .unwrap_or_default();
            let title = if text.is_empty() {
                ledger
                    .title_for_page(target_page_id)
                    .unwrap_or(target_page_id)
                    .to_string()
            } else {
                text
            };
            let range = captures.get(0).ok_or_else(not_found)?.range();
            content.replace_range(range, &page_link_tag(&title));
        }
    }
    Ok(())
}

fn markup_regex(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"))
}

fn visible_text(markup: &str) -> String {
    tag_pattern()
        .replace_all(markup, "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
