use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;

use crate::api::{ConfluenceClient, ContentApi};
use crate::context::MigrationContext;
use crate::document::page_id_from_filename;
use crate::ledger::{CreatedPage, Ledger, Outcome, UploadedImage};
use crate::links::{LinkRecord, image_filenames, load_inventory};

#[derive(Debug, Clone, Default)]
pub struct UploadReport {
    pub images: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub already_uploaded: usize,
    pub request_count: usize,
}

pub fn upload(context: &MigrationContext) -> Result<UploadReport> {
    let records = load_inventory(&context.paths.links_path())?;
    let created = Ledger::<CreatedPage>::load(context.paths.created_pages_path())?;
    let mut ledger = Ledger::load(context.paths.uploaded_images_path())?;
    let mut api = ConfluenceClient::from_config(&context.config)?;
    upload_with_api(
        &mut api,
        &records,
        &created,
        &context.paths.images_dir,
        &mut ledger,
    )
}

pub fn upload_with_api<A: ContentApi>(
    api: &mut A,
    records: &[LinkRecord],
    created: &Ledger<CreatedPage>,
    images_dir: &Path,
    ledger: &mut Ledger<UploadedImage>,
) -> Result<UploadReport> {
    let destinations: BTreeMap<String, String> = created.destination_ids_by_page();
    let names = image_filenames(records);
    let mut report = UploadReport::default();

    for record in records.iter().filter(|record| record.is_image()) {
        report.images += 1;
        let filename = names.get(&record.raw_url).cloned().unwrap_or_default();
        let source_page = page_id_from_filename(&record.filename);

        let Some(page_id) = destinations.get(source_page) else {
            tracing::warn!(%filename, "page {source_page} was not published, skipping image");
            report.failed += 1;
            ledger.push(UploadedImage {
                result: Outcome::Nok,
                id: String::new(),
                page_id: String::new(),
                filename,
                reason: format!("page {source_page} has no destination id"),
            });
            continue;
        };

        if already_attached(ledger, page_id, &filename) {
            report.already_uploaded += 1;
            continue;
        }

        let path = images_dir.join(&filename);
        if !path.is_file() {
            tracing::warn!(path = %path.display(), "image not downloaded");
            report.failed += 1;
            ledger.push(UploadedImage {
                result: Outcome::Nok,
                id: String::new(),
                page_id: page_id.clone(),
                filename,
                reason: format!("missing local file {}", path.display()),
            });
            continue;
        }

        match api.create_attachment(page_id, &path) {
            Ok(id) => {
                tracing::info!(%page_id, %id, "attached {filename}");
                report.uploaded += 1;
                ledger.push(UploadedImage {
                    result: Outcome::Ok,
                    id,
                    page_id: page_id.clone(),
                    filename,
                    reason: String::new(),
                });
            }
            Err(error) => {
                tracing::warn!(%page_id, "failed to attach {filename}: {error:#}");
                report.failed += 1;
                ledger.push(UploadedImage {
                    result: Outcome::Nok,
                    id: String::new(),
                    page_id: page_id.clone(),
                    filename,
                    reason: format!("{error:#}"),
                });
            }
        }
    }

    ledger.save()?;
    report.request_count = api.request_count();
    Ok(report)
}

fn already_attached(ledger: &Ledger<UploadedImage>, page_id: &str, filename: &str) -> bool {
    ledger.rows().iter().any(|row| {
        row.result == Outcome::Ok && row.page_id == page_id && row.filename == filename
    })
}
