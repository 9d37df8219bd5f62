use std::collections::BTreeSet;

use anyhow::Result;

use crate::api::{ConfluenceClient, ContentApi, Space};
use crate::context::{MigrationContext, resolve_space};
use crate::crawl_log::{CrawlEntry, NodeKind};
use crate::document::{DocumentCache, document_filename, parse_document};
use crate::error::MigrationError;
use crate::ledger::{CreatedPage, Ledger, Outcome};
use crate::offset_index::{OffsetIndex, ParentLookup};
use crate::sanity::{SanityReport, check_sanity};
use crate::tree::{TreeNode, miscellaneous_category, preorder};

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub include_miscellaneous: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PublishReport {
    pub nodes_visited: usize,
    pub created: usize,
    pub failed: usize,
    pub resumed: usize,
    pub skipped_documents: Vec<String>,
    pub miscellaneous: usize,
    pub request_count: usize,
}

pub fn publish(context: &MigrationContext, options: &PublishOptions) -> Result<PublishReport> {
    let (entries, forest) = context.load_tree()?;
    let cache = context.document_cache();
    let cached_ids = cache.list_page_ids()?;
    let (forest, sanity) = prepare_forest(&entries, forest, &cached_ids, options)?;

    let mut api = ConfluenceClient::from_config(&context.config)?;
    let space = resolve_space(&mut api, &context.space_name()?)?;
    let mut ledger = Ledger::load(context.paths.created_pages_path())?;

    let mut report = publish_with_api(&mut api, &space, &forest, &cache, &mut ledger)?;
    if options.include_miscellaneous {
        report.miscellaneous = sanity.miscellaneous.len();
    }
    Ok(report)
}

pub fn prepare_forest(
    entries: &[CrawlEntry],
    mut forest: Vec<TreeNode>,
    cached_ids: &BTreeSet<String>,
    options: &PublishOptions,
) -> Result<(Vec<TreeNode>, SanityReport)> {
    let sanity = check_sanity(entries, cached_ids);
    sanity.ensure_no_duplicates()?;
    if !sanity.miscellaneous.is_empty() {
        if options.include_miscellaneous {
            let misc = miscellaneous_category(&forest, &sanity.miscellaneous)?;
            forest.push(misc);
        } else {
            tracing::warn!(
                count = sanity.miscellaneous.len(),
                "cached pages missing from the crawl log are not published (use --include-miscellaneous)"
            );
        }
    }
    Ok((forest, sanity))
}

pub fn publish_with_api<A: ContentApi>(
    api: &mut A,
    space: &Space,
    forest: &[TreeNode],
    cache: &DocumentCache,
    ledger: &mut Ledger<CreatedPage>,
) -> Result<PublishReport> {
    let index = OffsetIndex::build(forest)?;
    let mut report = PublishReport::default();

    let mut walk = Ok(());
    for node in preorder(forest) {
        if let Err(error) = publish_node(api, space, &index, cache, ledger, node, &mut report) {
            walk = Err(error);
            break;
        }
    }
    ledger.save()?;
    walk?;

    report.request_count = api.request_count();
    Ok(report)
}

fn publish_node<A: ContentApi>(
    api: &mut A,
    space: &Space,
    index: &OffsetIndex<'_>,
    cache: &DocumentCache,
    ledger: &mut Ledger<CreatedPage>,
    node: &TreeNode,
    report: &mut PublishReport,
) -> Result<()> {
    report.nodes_visited += 1;
    if ledger.destination_for(node).is_some() {
        tracing::debug!(offset = %node.offset, "already published, skipping");
        report.resumed += 1;
        return Ok(());
    }

    let parent_id = match index.get_parent(&node.offset)? {
        ParentLookup::Root => None,
        ParentLookup::Found(parent) => {
            let id = ledger.destination_for(parent).map(str::to_string);
            if id.is_none() {
                tracing::warn!(
                    offset = %node.offset,
                    parent = %parent.offset,
                    "parent has no destination id, creating '{}' without a parent",
                    node.name
                );
            }
            id
        }
        ParentLookup::Missing => {
            return Err(MigrationError::structural(format!(
                "parent of offset {} ('{}') is not in the tree",
                node.offset, node.name
            ))
            .into());
        }
    };

    let (title, body, filename) = match node.kind {
        NodeKind::Category | NodeKind::Folder => (node.name.clone(), String::new(), String::new()),
        NodeKind::Page => {
            let filename = document_filename(&node.id);
            let document = cache.read_preferring_fixed(&node.id).and_then(|(content, _)| {
                parse_document(&filename, &content).map_err(anyhow::Error::from)
            });
            match document {
                Ok(document) => (document.title, document.body, filename),
                Err(error) => {
                    tracing::warn!(offset = %node.offset, "skipping page: {error:#}");
                    report.skipped_documents.push(filename);
                    return Ok(());
                }
            }
        }
    };

    match api.create_page(&space.key, &title, &body, parent_id.as_deref()) {
        Ok(id) => {
            tracing::info!(offset = %node.offset, %id, "created {} '{title}'", node.kind);
            report.created += 1;
            ledger.push(CreatedPage {
                result: Outcome::Ok,
                id,
                offset: node.offset.clone(),
                title,
                filename,
            });
        }
        Err(error) => {
            tracing::warn!(offset = %node.offset, "failed to create '{title}': {error:#}");
            report.failed += 1;
            ledger.push(CreatedPage {
                result: Outcome::Nok,
                id: String::new(),
                offset: node.offset.clone(),
                title,
                filename,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::{PublishOptions, prepare_forest, publish_with_api};
    use crate::api::Space;
    use crate::api::mock::MockApi;
    use crate::crawl_log::{NodeKind, parse_crawl_log};
    use crate::document::DocumentCache;
    use crate::error::MigrationError;
    use crate::ledger::{CreatedPage, Ledger, Outcome};
    use crate::tree::{MISCELLANEOUS_NAME, TreeNode, build_category_tree};

    const LOG: &str = "offset|type|name|id|url
0|category|Docs|docs|u0
0-0|page|Intro|intro|u1
0-1|folder|Guides|guides|u2
0-1-0|page|Setup|setup|u3
";

    fn space() -> Space {
        Space {
            id: "1".to_string(),
            key: "ENG".to_string(),
            name: "Engineering".to_string(),
        }
    }

    fn write_document(dir: &Path, id: &str, title: &str) {
        fs::write(
            dir.join(format!("{id}.html")),
            format!("<html><head><title>{title}</title></head><body><p>{title} body</p></body></html>"),
        )
        .expect("write document");
    }

    fn forest(log: &str) -> Vec<TreeNode> {
        build_category_tree(&parse_crawl_log(log).expect("parse")).expect("build")
    }

    fn id_at(ledger: &Ledger<CreatedPage>, offset: &str) -> String {
        ledger
            .rows()
            .iter()
            .find(|row| row.result == Outcome::Ok && row.offset == offset)
            .map(|row| row.id.clone())
            .unwrap_or_else(|| panic!("no OK row at offset {offset}"))
    }

    fn with_miscellaneous(cache: &DocumentCache) -> Vec<TreeNode> {
        let entries = parse_crawl_log(LOG).expect("parse");
        let built = build_category_tree(&entries).expect("build");
        let cached = cache.list_page_ids().expect("list");
        let options = PublishOptions {
            include_miscellaneous: true,
        };
        prepare_forest(&entries, built, &cached, &options)
            .expect("prepare")
            .0
    }

    #[test]
    fn children_are_created_under_their_parents_destination_id() {
        let temp = tempdir().expect("tempdir");
        write_document(temp.path(), "intro", "Intro");
        write_document(temp.path(), "setup", "Setup");
        let cache = DocumentCache::new(temp.path());
        let mut ledger = Ledger::new(temp.path().join("created-pages.csv"));
        let mut api = MockApi::with_space("ENG", "Engineering");

        let report =
            publish_with_api(&mut api, &space(), &forest(LOG), &cache, &mut ledger).expect("publish");
        assert_eq!(report.created, 4);
        assert_eq!(report.failed, 0);

        let docs_id = id_at(&ledger, "0");
        let guides_id = id_at(&ledger, "0-1");
        assert_eq!(api.created[0].title, "Docs");
        assert_eq!(api.created[0].parent_id, None);
        assert_eq!(api.created[0].body, "");
        let intro = api
            .created
            .iter()
            .find(|call| call.title == "Intro")
            .expect("intro call");
        assert_eq!(intro.parent_id.as_deref(), Some(docs_id.as_str()));
        assert_eq!(intro.body, "<p>Intro body</p>");
        let setup = api
            .created
            .iter()
            .find(|call| call.title == "Setup")
            .expect("setup call");
        assert_eq!(setup.parent_id.as_deref(), Some(guides_id.as_str()));
        assert!(ledger.path().exists());
    }

    #[test]
    fn failures_are_recorded_and_the_walk_continues() {
        let temp = tempdir().expect("tempdir");
        write_document(temp.path(), "intro", "Intro");
        write_document(temp.path(), "setup", "Setup");
        let cache = DocumentCache::new(temp.path());
        let mut ledger = Ledger::new(temp.path().join("created-pages.csv"));
        let mut api = MockApi::with_space("ENG", "Engineering");
        api.failing_titles.insert("Guides".to_string());

        let report =
            publish_with_api(&mut api, &space(), &forest(LOG), &cache, &mut ledger).expect("publish");
        assert_eq!(report.failed, 1);
        assert_eq!(report.created, 3);
        let nok = ledger
            .rows()
            .iter()
            .find(|row| row.result == Outcome::Nok)
            .expect("nok row");
        assert_eq!(nok.offset, "0-1");
        assert!(nok.id.is_empty());

        let setup = api
            .created
            .iter()
            .find(|call| call.title == "Setup")
            .expect("setup call");
        assert_eq!(setup.parent_id, None);
    }

    #[test]
    fn unparseable_documents_are_skipped_without_a_row() {
        let temp = tempdir().expect("tempdir");
        write_document(temp.path(), "setup", "Setup");
        fs::write(temp.path().join("intro.html"), "<p>not wrapped</p>").expect("write intro");
        let cache = DocumentCache::new(temp.path());
        let mut ledger = Ledger::new(temp.path().join("created-pages.csv"));
        let mut api = MockApi::default();

        let report =
            publish_with_api(&mut api, &space(), &forest(LOG), &cache, &mut ledger).expect("publish");
        assert_eq!(report.skipped_documents, vec!["intro.html".to_string()]);
        assert_eq!(ledger.len(), 3);
        assert!(ledger.rows().iter().all(|row| row.offset != "0-0"));
    }

    #[test]
    fn rerun_resumes_from_ledger() {
        let temp = tempdir().expect("tempdir");
        write_document(temp.path(), "intro", "Intro");
        write_document(temp.path(), "setup", "Setup");
        let cache = DocumentCache::new(temp.path());
        let ledger_path = temp.path().join("created-pages.csv");

        let mut previous = Ledger::new(&ledger_path);
        previous.push(CreatedPage {
            result: Outcome::Ok,
            id: "555".to_string(),
            offset: "0".to_string(),
            title: "Docs".to_string(),
            filename: String::new(),
        });
        previous.save().expect("save previous");

        let mut ledger = Ledger::<CreatedPage>::load(&ledger_path).expect("load");
        let mut api = MockApi::default();
        let report =
            publish_with_api(&mut api, &space(), &forest(LOG), &cache, &mut ledger).expect("publish");
        assert_eq!(report.resumed, 1);
        assert_eq!(report.created, 3);
        assert!(api.created.iter().all(|call| call.title != "Docs"));
        let intro = api
            .created
            .iter()
            .find(|call| call.title == "Intro")
            .expect("intro call");
        assert_eq!(intro.parent_id.as_deref(), Some("555"));

        let reloaded = Ledger::<CreatedPage>::load(&ledger_path).expect("reload");
        assert_eq!(reloaded.len(), 4);
    }

    #[test]
    fn new_miscellaneous_page_is_created_once_on_rerun() {
        let temp = tempdir().expect("tempdir");
        for (id, title) in [("intro", "Intro"), ("setup", "Setup"), ("bravo", "Bravo")] {
            write_document(temp.path(), id, title);
        }
        let cache = DocumentCache::new(temp.path());
        let ledger_path = temp.path().join("created-pages.csv");
        let mut api = MockApi::default();

        let mut ledger = Ledger::new(&ledger_path);
        publish_with_api(&mut api, &space(), &with_miscellaneous(&cache), &cache, &mut ledger)
            .expect("first publish");
        let misc_id = id_at(&ledger, "1");
        assert_eq!(id_at(&ledger, "1-0"), ledger.destination_ids_by_page()["bravo"]);

        write_document(temp.path(), "alpha", "Alpha");
        let first_run = api.created.len();
        let mut ledger = Ledger::<CreatedPage>::load(&ledger_path).expect("load");
        let report =
            publish_with_api(&mut api, &space(), &with_miscellaneous(&cache), &cache, &mut ledger)
                .expect("second publish");

        let titles = api.created[first_run..]
            .iter()
            .map(|call| call.title.as_str())
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["Alpha"]);
        assert_eq!(api.created[first_run].parent_id.as_deref(), Some(misc_id.as_str()));
        assert_eq!(report.resumed, 6);
        assert!(ledger.destination_ids_by_page().contains_key("alpha"));
    }

    #[test]
    fn republishing_prefers_the_fixed_document() {
        let temp = tempdir().expect("tempdir");
        write_document(temp.path(), "intro", "Intro");
        write_document(temp.path(), "setup", "Setup");
        let cache = DocumentCache::new(temp.path());
        cache
            .write_fixed(
                "intro",
                "<html><head><title>Intro</title></head><body><p>FIXED</p></body></html>",
            )
            .expect("write fixed");
        let mut ledger = Ledger::new(temp.path().join("created-pages.csv"));
        let mut api = MockApi::default();

        publish_with_api(&mut api, &space(), &forest(LOG), &cache, &mut ledger).expect("publish");
        let intro = api
            .created
            .iter()
            .find(|call| call.title == "Intro")
            .expect("intro call");
        assert_eq!(intro.body, "<p>FIXED</p>");
        assert_eq!(
            ledger.rows().iter().find(|row| row.offset == "0-0").map(|row| row.filename.as_str()),
            Some("intro.html")
        );
    }

    #[test]
    fn missing_parent_is_fatal_and_ledger_is_still_saved() {
        let temp = tempdir().expect("tempdir");
        let cache = DocumentCache::new(temp.path());
        let ledger_path = temp.path().join("created-pages.csv");
        let mut ledger = Ledger::new(&ledger_path);
        let node = |offset: &str, kind: NodeKind, name: &str| TreeNode {
            offset: offset.to_string(),
            kind,
            name: name.to_string(),
            id: name.to_lowercase(),
            url: String::new(),
            folders: Vec::new(),
            pages: Vec::new(),
        };
        let mut root = node("0", NodeKind::Category, "Docs");
        root.folders.push(node("4-0", NodeKind::Folder, "Orphan"));
        let mut api = MockApi::default();

        let error = publish_with_api(&mut api, &space(), &[root], &cache, &mut ledger)
            .expect_err("must fail");
        let migration = error
            .downcast_ref::<MigrationError>()
            .expect("migration error");
        assert!(migration.is_fatal());
        assert_eq!(api.created.len(), 1);
        assert!(ledger_path.exists());
    }

    #[test]
    fn miscellaneous_pages_get_a_synthetic_category() {
        let entries = parse_crawl_log(LOG).expect("parse");
        let built = build_category_tree(&entries).expect("build");
        let cached = BTreeSet::from([
            "intro".to_string(),
            "setup".to_string(),
            "stray".to_string(),
        ]);

        let (plain, sanity) =
            prepare_forest(&entries, built.clone(), &cached, &PublishOptions::default())
                .expect("prepare");
        assert_eq!(plain.len(), 1);
        assert_eq!(sanity.miscellaneous.len(), 1);

        let (with_misc, _) = prepare_forest(
            &entries,
            built,
            &cached,
            &PublishOptions {
                include_miscellaneous: true,
            },
        )
        .expect("prepare");
        let misc = with_misc.last().expect("misc category");
        assert_eq!(misc.name, MISCELLANEOUS_NAME);
        assert_eq!(misc.offset, "1");
        assert_eq!(misc.pages[0].id, "stray");
    }

    #[test]
    fn duplicate_page_ids_abort_before_publishing() {
        let log = "offset|type|name|id|url\n0|category|Docs|docs|u\n0-0|page|A|a|u\n0-1|page|A again|a|u\n";
        let entries = parse_crawl_log(log).expect("parse");
        let built = build_category_tree(&entries).expect("build");
        let cached = BTreeSet::from(["a".to_string()]);
        assert!(prepare_forest(&entries, built, &cached, &PublishOptions::default()).is_err());
    }
}
