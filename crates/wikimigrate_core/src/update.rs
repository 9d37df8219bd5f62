use anyhow::Result;

use crate::api::{ConfluenceClient, ContentApi, Space};
use crate::context::{MigrationContext, resolve_space};
use crate::document::{DocumentCache, page_id_from_filename, parse_document};
use crate::ledger::{CreatedPage, Ledger, Outcome, UpdatedPage};

#[derive(Debug, Clone, Default)]
pub struct UpdateReport {
    pub pages: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub request_count: usize,
}

pub fn update(context: &MigrationContext) -> Result<UpdateReport> {
    let created = Ledger::<CreatedPage>::load(context.paths.created_pages_path())?;
    let mut api = ConfluenceClient::from_config(&context.config)?;
    let space = resolve_space(&mut api, &context.space_name()?)?;
    let mut ledger = Ledger::new(context.paths.updated_pages_path());
    update_with_api(
        &mut api,
        &space,
        &context.document_cache(),
        &created,
        &mut ledger,
    )
}

pub fn update_with_api<A: ContentApi>(
    api: &mut A,
    space: &Space,
    cache: &DocumentCache,
    created: &Ledger<CreatedPage>,
    ledger: &mut Ledger<UpdatedPage>,
) -> Result<UpdateReport> {
    let mut report = UpdateReport::default();
    for page in created.published_documents() {
        report.pages += 1;
        let (result, title, reason) = update_page(api, space, cache, page);
        match result {
            Outcome::Ok => report.updated += 1,
            Outcome::Skip => report.unchanged += 1,
            Outcome::Nok => report.failed += 1,
        }
        ledger.push(UpdatedPage {
            result,
            id: page.id.clone(),
            title,
            reason,
        });
    }
    ledger.save()?;
    report.request_count = api.request_count();
    Ok(report)
}

fn update_page<A: ContentApi>(
    api: &mut A,
    space: &Space,
    cache: &DocumentCache,
    page: &CreatedPage,
) -> (Outcome, String, String) {
    let page_id = page_id_from_filename(&page.filename);
    let document = cache
        .read_preferring_fixed(page_id)
        .and_then(|(content, _)| {
            parse_document(&page.filename, &content).map_err(anyhow::Error::from)
        });
    let document = match document {
        Ok(document) => document,
        Err(error) => {
            tracing::warn!(id = %page.id, "skipping update: {error:#}");
            return (Outcome::Nok, page.title.clone(), format!("{error:#}"));
        }
    };

    let pushed = api.get_content(&page.id).and_then(|current| {
        if current.body == document.body {
            return Ok(false);
        }
        let version = api.get_version(&page.id)?;
        api.update_page(
            &space.key,
            &page.id,
            &document.title,
            &document.body,
            version + 1,
        )?;
        Ok(true)
    });
    match pushed {
        Ok(true) => {
            tracing::info!(id = %page.id, "updated '{}'", document.title);
            (Outcome::Ok, document.title, String::new())
        }
        Ok(false) => {
            tracing::debug!(id = %page.id, "unchanged '{}'", document.title);
            (Outcome::Skip, document.title, "body unchanged".to_string())
        }
        Err(error) => {
            tracing::warn!(id = %page.id, "failed to update '{}': {error:#}", document.title);
            (Outcome::Nok, document.title, format!("{error:#}"))
        }
    }
}
