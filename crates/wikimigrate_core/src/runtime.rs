use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::load_config;
use crate::ledger::{
    CREATED_PAGES_FILE, DOWNLOADED_IMAGES_FILE, UPDATED_PAGES_FILE, UPLOADED_IMAGES_FILE,
};

pub const STATE_DIR_NAME: &str = ".wikimigrate";
pub const LINKS_FILE: &str = "links.csv";
pub const DEFAULT_CRAWL_LOG: &str = "crawl.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub images_dir: Option<PathBuf>,
    pub crawl_log: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub data_dir: PathBuf,
    pub images_dir: PathBuf,
    pub crawl_log: PathBuf,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
    pub data_source: ValueSource,
    pub images_source: ValueSource,
    pub crawl_log_source: ValueSource,
}

impl ResolvedPaths {
    pub fn links_path(&self) -> PathBuf {
        self.state_dir.join(LINKS_FILE)
    }

    pub fn created_pages_path(&self) -> PathBuf {
        self.state_dir.join(CREATED_PAGES_FILE)
    }

    pub fn uploaded_images_path(&self) -> PathBuf {
        self.state_dir.join(UPLOADED_IMAGES_FILE)
    }

    pub fn updated_pages_path(&self) -> PathBuf {
        self.state_dir.join(UPDATED_PAGES_FILE)
    }

    pub fn downloaded_images_path(&self) -> PathBuf {
        self.state_dir.join(DOWNLOADED_IMAGES_FILE)
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nstate_dir={}\nconfig_path={} ({})\ndata_dir={} ({})\nimages_dir={} ({})\ncrawl_log={} ({})",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            normalize_for_display(&self.data_dir),
            self.data_source.as_str(),
            normalize_for_display(&self.images_dir),
            self.images_source.as_str(),
            normalize_for_display(&self.crawl_log),
            self.crawl_log_source.as_str(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub state_dir_exists: bool,
    pub config_exists: bool,
    pub data_dir_exists: bool,
    pub images_dir_exists: bool,
    pub crawl_log_exists: bool,
    pub warnings: Vec<String>,
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> RuntimeStatus {
    let state_dir_exists = paths.state_dir.exists();
    let config_exists = paths.config_path.exists();
    let data_dir_exists = paths.data_dir.exists();
    let images_dir_exists = paths.images_dir.exists();
    let crawl_log_exists = paths.crawl_log.exists();

    let mut warnings = Vec::new();
    if !state_dir_exists {
        warnings.push(format!(
            "{STATE_DIR_NAME}/ is missing; run `wikimigrate init` to create the layout"
        ));
    }
    if !data_dir_exists {
        warnings.push(format!(
            "document cache {} is missing",
            normalize_for_display(&paths.data_dir)
        ));
    }
    if !crawl_log_exists {
        warnings.push(format!(
            "crawl log {} is missing (set TETTRA_LOGFILE or [source].crawl_log)",
            normalize_for_display(&paths.crawl_log)
        ));
    }

    RuntimeStatus {
        state_dir_exists,
        config_exists,
        data_dir_exists,
        images_dir_exists,
        crawl_log_exists,
        warnings,
    }
}

#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

pub(crate) fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup_env);
    let state_dir = project_root.join(STATE_DIR_NAME);

    let (config_path, config_source) = resolve_path(
        overrides.config.as_deref(),
        lookup_env("WIKIMIGRATE_CONFIG"),
        None,
        &project_root,
        state_dir.join("config.toml"),
    );
    let config = load_config(&config_path).context("failed to load path settings")?;

    let (data_dir, data_source) = resolve_path(
        overrides.data_dir.as_deref(),
        lookup_env("WIKIMIGRATE_DATA_DIR"),
        config.paths.data_dir.as_deref(),
        &project_root,
        project_root.join("data"),
    );
    let (images_dir, images_source) = resolve_path(
        overrides.images_dir.as_deref(),
        lookup_env("WIKIMIGRATE_IMAGES_DIR"),
        config.paths.images_dir.as_deref(),
        &project_root,
        project_root.join("images"),
    );
    let (crawl_log, crawl_log_source) = resolve_path(
        overrides.crawl_log.as_deref(),
        lookup_env("TETTRA_LOGFILE"),
        config.source.crawl_log.as_deref(),
        &project_root,
        project_root.join(DEFAULT_CRAWL_LOG),
    );

    Ok(ResolvedPaths {
        project_root,
        state_dir,
        config_path,
        data_dir,
        images_dir,
        crawl_log,
        root_source,
        config_source,
        data_source,
        images_source,
        crawl_log_source,
    })
}

fn resolve_path(
    flag: Option<&Path>,
    env_value: Option<String>,
    configured: Option<&str>,
    project_root: &Path,
    default: PathBuf,
) -> (PathBuf, ValueSource) {
    if let Some(path) = flag {
        return (absolutize(path, project_root), ValueSource::Flag);
    }
    if let Some(value) = env_value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        return (absolutize(Path::new(value), project_root), ValueSource::Env);
    }
    if let Some(value) = configured.map(str::trim).filter(|v| !v.is_empty()) {
        return (absolutize(Path::new(value), project_root), ValueSource::Config);
    }
    (default, ValueSource::Default)
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let mut created_dirs = Vec::new();
    for dir in [&paths.state_dir, &paths.data_dir, &paths.images_dir] {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            created_dirs.push(dir.clone());
        }
    }

    let wrote_config = write_text_file(
        &paths.config_path,
        &render_materialized_config(paths),
        options.force,
    )?;

    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

pub fn render_materialized_config(paths: &ResolvedPaths) -> String {
    let data_dir = normalize_for_display(&paths.data_dir);
    let images_dir = normalize_for_display(&paths.images_dir);
    let crawl_log = normalize_for_display(&paths.crawl_log);

    format!(
        "# wikimigrate configuration (materialized by `wikimigrate init`)\n# Credentials are read from CONFLUENCE_EMAIL and CONFLUENCE_PASSWORD only.\n\n[source]\n# app_host = \"app.tettra.co\"\n# company = \"your-team\"\n# storage_host = \"tettra-production.s3\"\ncrawl_log = \"{crawl_log}\"\n\n[destination]\n# api_url = \"https://your-site.atlassian.net/wiki/rest/api\"\n# space = \"Your Space\"\n# user_agent = \"wikimigrate/0.1\"\n# timeout_ms = 30000\n\n[paths]\ndata_dir = \"{data_dir}\"\nimages_dir = \"{images_dir}\"\n",
    )
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }

    if let Some(value) = lookup_env("WIKIMIGRATE_PROJECT_ROOT")
        && !value.trim().is_empty()
    {
        return (
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        );
    }

    detect_project_root_heuristic(&context.cwd)
}

fn detect_project_root_heuristic(cwd: &Path) -> (PathBuf, ValueSource) {
    let mut seen = HashSet::new();
    for candidate in cwd.ancestors() {
        if !seen.insert(normalize_for_display(candidate)) {
            continue;
        }
        if candidate.join(STATE_DIR_NAME).is_dir() {
            return (candidate.to_path_buf(), ValueSource::Heuristic);
        }
    }
    (cwd.to_path_buf(), ValueSource::Default)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }

    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
