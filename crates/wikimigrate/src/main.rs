use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use wikimigrate_core::attachments::upload;
use wikimigrate_core::context::MigrationContext;
use wikimigrate_core::download::download;
use wikimigrate_core::links::{extract_inventory, save_inventory};
use wikimigrate_core::logging;
use wikimigrate_core::publish::{PublishOptions, publish};
use wikimigrate_core::rewrite::rewrite;
use wikimigrate_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, init_layout, inspect_runtime,
    normalize_for_display, resolve_paths,
};
use wikimigrate_core::sanity::check_sanity;
use wikimigrate_core::tree::render_tree;
use wikimigrate_core::update::update;

#[derive(Debug, Parser)]
#[command(
    name = "wikimigrate",
    version,
    about = "Migrate a crawled Tettra knowledge base into a Confluence space"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH", help = "Directory of cached <id>.html documents")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH", help = "Directory of downloaded images")]
    images_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH", help = "Pipe-delimited crawl log")]
    crawl_log: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    overrides: PathOverrides,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            overrides: PathOverrides {
                project_root: cli.project_root.clone(),
                config: cli.config.clone(),
                data_dir: cli.data_dir.clone(),
                images_dir: cli.images_dir.clone(),
                crawl_log: cli.crawl_log.clone(),
            },
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create .wikimigrate/, the data and images directories, and a config file")]
    Init(InitArgs),
    #[command(about = "Print the category tree rebuilt from the crawl log")]
    Tree,
    #[command(about = "Compare the crawl log with the document cache")]
    Check,
    #[command(about = "Inventory image and page links found in cached documents")]
    Links,
    #[command(about = "Download every inventoried image into the images directory")]
    Download,
    #[command(about = "Create destination pages for the tree in pre-order")]
    Publish(PublishArgs),
    #[command(about = "Rewrite inventoried links into destination reference tags")]
    Rewrite,
    #[command(about = "Attach downloaded images to their destination pages")]
    Upload,
    #[command(about = "Push rewritten bodies to the destination pages")]
    Update,
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing .wikimigrate/config.toml")]
    force: bool,
}

#[derive(Debug, Args)]
struct PublishArgs {
    #[arg(
        long,
        help = "Publish cached pages missing from the crawl log under a Miscellaneous category"
    )]
    include_miscellaneous: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    let Some(command) = cli.command else {
        let mut command = Cli::command();
        command.print_help()?;
        println!();
        return Ok(());
    };

    logging::init()?;
    match command {
        Commands::Init(args) => run_init(&runtime, args),
        Commands::Tree => run_tree(&runtime),
        Commands::Check => run_check(&runtime),
        Commands::Links => run_links(&runtime),
        Commands::Download => run_download(&runtime),
        Commands::Publish(args) => run_publish(&runtime, args),
        Commands::Rewrite => run_rewrite(&runtime),
        Commands::Upload => run_upload(&runtime),
        Commands::Update => run_update(&runtime),
    }
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(&paths, &InitOptions { force: args.force })?;

    println!("Initialized wikimigrate runtime layout");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("state_dir: {}", normalize_path(&paths.state_dir));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("data_dir: {}", normalize_path(&paths.data_dir));
    println!("images_dir: {}", normalize_path(&paths.images_dir));
    println!("crawl_log: {}", normalize_path(&paths.crawl_log));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", format_flag(report.wrote_config));
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_tree(runtime: &RuntimeOptions) -> Result<()> {
    let context = load_context(runtime)?;
    let (entries, forest) = context.load_tree()?;

    print!("{}", render_tree(&forest));
    println!("entries: {}", entries.len());
    println!("top_level: {}", forest.len());
    print_diagnostics(runtime, &context.paths);
    Ok(())
}

fn run_check(runtime: &RuntimeOptions) -> Result<()> {
    let context = load_context(runtime)?;
    let entries = context.load_crawl_entries()?;
    let cached_ids = context.document_cache().list_page_ids()?;
    let report = check_sanity(&entries, &cached_ids);

    println!("sanity check");
    println!("entries: {}", entries.len());
    println!("cached_documents: {}", cached_ids.len());
    println!("miscellaneous: {}", report.miscellaneous.len());
    for id in &report.miscellaneous {
        println!("  - {id}");
    }
    println!("duplicates: {}", report.duplicates.len());
    for id in &report.duplicates {
        println!("  - {id}");
    }
    print_diagnostics(runtime, &context.paths);

    report.ensure_no_duplicates()?;
    Ok(())
}

fn run_links(runtime: &RuntimeOptions) -> Result<()> {
    let context = load_context(runtime)?;
    let matcher = context.link_matcher()?;
    let cache = context.document_cache();
    let page_ids = cache.list_page_ids()?;
    let report = extract_inventory(&cache, &page_ids, &matcher)?;
    let path = context.paths.links_path();
    save_inventory(&path, &report.records)?;

    println!("link inventory");
    println!("documents_scanned: {}", report.documents_scanned);
    println!("images: {}", report.image_count());
    println!("anchors: {}", report.anchor_count());
    println!("skipped_documents: {}", report.skipped.len());
    for (filename, reason) in &report.skipped {
        println!("  - {filename}: {reason}");
    }
    println!("written: {}", normalize_path(&path));
    print_diagnostics(runtime, &context.paths);
    Ok(())
}

fn run_download(runtime: &RuntimeOptions) -> Result<()> {
    let context = load_context(runtime)?;
    let report = download(&context)?;

    println!("image download");
    println!("images: {}", report.images);
    println!("downloaded: {}", report.downloaded);
    println!("skipped: {}", report.skipped);
    println!("failed: {}", report.failed);
    println!(
        "ledger: {}",
        normalize_path(&context.paths.downloaded_images_path())
    );
    print_diagnostics(runtime, &context.paths);
    Ok(())
}

fn run_publish(runtime: &RuntimeOptions, args: PublishArgs) -> Result<()> {
    let context = load_context(runtime)?;
    let report = publish(
        &context,
        &PublishOptions {
            include_miscellaneous: args.include_miscellaneous,
        },
    )?;

    println!("publish");
    println!("nodes_visited: {}", report.nodes_visited);
    println!("created: {}", report.created);
    println!("failed: {}", report.failed);
    println!("resumed: {}", report.resumed);
    println!("miscellaneous: {}", report.miscellaneous);
    println!("skipped_documents: {}", report.skipped_documents.len());
    for filename in &report.skipped_documents {
        println!("  - {filename}");
    }
    println!("requests: {}", report.request_count);
    println!(
        "ledger: {}",
        normalize_path(&context.paths.created_pages_path())
    );
    print_diagnostics(runtime, &context.paths);
    Ok(())
}

fn run_rewrite(runtime: &RuntimeOptions) -> Result<()> {
    let context = load_context(runtime)?;
    let report = rewrite(&context)?;

    println!("link rewrite");
    println!("documents: {}", report.documents);
    println!("images_rewritten: {}", report.images_rewritten);
    println!("anchors_rewritten: {}", report.anchors_rewritten);
    println!("not_found: {}", report.not_found.len());
    for error in &report.not_found {
        println!("  - {error}");
    }
    println!("skipped_documents: {}", report.skipped_documents.len());
    for (filename, reason) in &report.skipped_documents {
        println!("  - {filename}: {reason}");
    }
    println!("written: {}", report.written.len());
    print_diagnostics(runtime, &context.paths);
    Ok(())
}

fn run_upload(runtime: &RuntimeOptions) -> Result<()> {
    let context = load_context(runtime)?;
    let report = upload(&context)?;

    println!("attachment upload");
    println!("images: {}", report.images);
    println!("uploaded: {}", report.uploaded);
    println!("already_uploaded: {}", report.already_uploaded);
    println!("failed: {}", report.failed);
    println!("requests: {}", report.request_count);
    println!(
        "ledger: {}",
        normalize_path(&context.paths.uploaded_images_path())
    );
    print_diagnostics(runtime, &context.paths);
    Ok(())
}

fn run_update(runtime: &RuntimeOptions) -> Result<()> {
    let context = load_context(runtime)?;
    let report = update(&context)?;

    println!("page update");
    println!("pages: {}", report.pages);
    println!("updated: {}", report.updated);
    println!("unchanged: {}", report.unchanged);
    println!("failed: {}", report.failed);
    println!("requests: {}", report.request_count);
    println!(
        "ledger: {}",
        normalize_path(&context.paths.updated_pages_path())
    );
    print_diagnostics(runtime, &context.paths);
    Ok(())
}

fn load_context(runtime: &RuntimeOptions) -> Result<MigrationContext> {
    let paths = resolve_runtime_paths(runtime)?;
    MigrationContext::from_paths(paths)
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let initial = resolve_paths(&context, &runtime.overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &runtime.overrides)
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if !runtime.diagnostics {
        return;
    }
    println!("\n[diagnostics]\n{}", paths.diagnostics());
    let status = inspect_runtime(paths);
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
}

fn normalize_path(path: &Path) -> String {
    normalize_for_display(path)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
