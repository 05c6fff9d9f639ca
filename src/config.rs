use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::scanner::WorkerConfig;
use crate::watcher::WatcherSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    pub max_depth: usize,
    pub debounce_ms: u64,
    pub event_buffer: usize,
    pub exclude_markers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SidecarConfig {
    pub save_queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompanyServiceConfig {
    pub enabled: bool,
    pub folder: String,
    pub sidecar_filename: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectServiceConfig {
    pub enabled: bool,
    pub folder: String,
    pub sidecar_filename: String,
    pub managed_file_fallback: String,
    pub managed_file_extensions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub root: String,
    pub workers: WorkerConfig,
    pub watcher: WatcherConfig,
    pub sidecar: SidecarConfig,
    pub companies: CompanyServiceConfig,
    pub projects: ProjectServiceConfig,
}

const DEFAULTS: &str = include_str!("../config/default.toml");

impl Default for AppConfig {
    fn default() -> Self {
        // Fallback: parse the embedded default TOML
        match from_toml_str(DEFAULTS) {
            Ok(app_cfg) => app_cfg,
            Err(e) => {
                eprintln!("FATAL: Failed to parse default config: {}", e);
                panic!("Failed to parse default config: {}", e);
            }
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        // Mirror defaults from config/default.toml
        Self { min_workers: 2, max_workers: 16, cpu_multiplier: 2 }
    }
}

impl AppConfig {
    /// Resolved companies folder (`{ROOT}` and `~/` expanded).
    pub fn companies_folder(&self) -> PathBuf {
        resolve_folder(&self.companies.folder, &self.root)
    }

    /// Resolved projects folder (`{ROOT}` and `~/` expanded).
    pub fn projects_folder(&self) -> PathBuf {
        resolve_folder(&self.projects.folder, &self.root)
    }

    pub fn watcher_settings(&self) -> WatcherSettings {
        WatcherSettings {
            max_depth: self.watcher.max_depth,
            debounce: Duration::from_millis(self.watcher.debounce_ms),
            event_buffer: self.watcher.event_buffer,
            exclude_markers: self.watcher.exclude_markers.clone(),
            ignored_names: Vec::new(),
        }
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();

    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
        // Optional local file: folderbound.toml (in CWD)
        .add_source(::config::File::with_name("folderbound").required(false));

    if let Ok(custom_path) = std::env::var("FOLDERBOUND_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    // Environment variables last to have highest precedence
    builder = builder.add_source(
        ::config::Environment::with_prefix("FOLDERBOUND")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("watcher.exclude_markers")
            .with_list_parse_key("projects.managed_file_extensions")
            .try_parsing(true),
    );

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

/// Parses a complete configuration from TOML text layered over the embedded defaults.
pub fn from_toml_str(content: &str) -> anyhow::Result<AppConfig> {
    let cfg = ::config::Config::builder()
        .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
        .add_source(::config::File::from_str(content, ::config::FileFormat::Toml))
        .build()?;
    Ok(cfg.try_deserialize()?)
}

pub fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    // Workers
    if cfg.workers.min_workers == 0 {
        return Err(anyhow::anyhow!("workers.min_workers must be > 0"));
    }
    if cfg.workers.min_workers > cfg.workers.max_workers {
        return Err(anyhow::anyhow!(
            "workers.min_workers ({}) must be <= workers.max_workers ({})",
            cfg.workers.min_workers,
            cfg.workers.max_workers
        ));
    }
    if cfg.workers.cpu_multiplier == 0 {
        return Err(anyhow::anyhow!("workers.cpu_multiplier must be > 0"));
    }

    // Watcher
    if cfg.watcher.debounce_ms < 2 {
        return Err(anyhow::anyhow!("watcher.debounce_ms must be >= 2"));
    }
    if cfg.watcher.event_buffer == 0 {
        return Err(anyhow::anyhow!("watcher.event_buffer must be > 0"));
    }
    if cfg.watcher.max_depth > 16 {
        tracing::warn!("watcher.max_depth {} is unusually deep", cfg.watcher.max_depth);
    }

    // Sidecar
    if cfg.sidecar.save_queue_capacity == 0 {
        return Err(anyhow::anyhow!("sidecar.save_queue_capacity must be > 0"));
    }

    // Services
    if cfg.companies.sidecar_filename.trim().is_empty() {
        return Err(anyhow::anyhow!("companies.sidecar_filename must not be empty"));
    }
    if cfg.projects.sidecar_filename.trim().is_empty() {
        return Err(anyhow::anyhow!("projects.sidecar_filename must not be empty"));
    }
    if cfg.projects.managed_file_extensions.is_empty() {
        return Err(anyhow::anyhow!("projects.managed_file_extensions must not be empty"));
    }

    Ok(())
}

/// Expands `{ROOT}` and a leading `~/` in a configured folder.
pub fn resolve_folder(template: &str, root: &str) -> PathBuf {
    let replaced = template.replace("{ROOT}", root);
    expand_home(&replaced)
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
        tracing::warn!("Home directory unknown, keeping literal path {}", path);
    }
    Path::new(path).to_path_buf()
}
