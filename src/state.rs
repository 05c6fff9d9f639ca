use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::error::EngineResult;
use crate::metrics::Metrics;
use crate::model::{Company, Project, ProjectSettings};
use crate::reconciler::{Reconciler, ReconcilerSettings, WatchHandle};
use crate::types::EngineEvent;

/// The engines a process runs, as selected by the configuration.
///
/// Calling layers (HTTP handlers, CLIs) hold a clone of this and read from
/// the reconcilers directly.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<AppConfig>,
    pub metrics: Metrics,
    /// `None` when `companies.enabled` is off.
    pub companies: Option<Arc<Reconciler<Company>>>,
    /// `None` when `projects.enabled` is off.
    pub projects: Option<Arc<Reconciler<Project>>>,
}

pub fn company_settings(config: &AppConfig) -> ReconcilerSettings<Company> {
    ReconcilerSettings {
        root: config.companies_folder(),
        sidecar_filename: config.companies.sidecar_filename.clone(),
        entity: (),
        workers: config.workers.clone(),
        watcher: config.watcher_settings(),
        save_queue_capacity: config.sidecar.save_queue_capacity,
    }
}

pub fn project_settings(config: &AppConfig) -> ReconcilerSettings<Project> {
    ReconcilerSettings {
        root: config.projects_folder(),
        sidecar_filename: config.projects.sidecar_filename.clone(),
        entity: ProjectSettings {
            managed_file_fallback: config.projects.managed_file_fallback.clone(),
            managed_file_extensions: config.projects.managed_file_extensions.clone(),
        },
        workers: config.workers.clone(),
        watcher: config.watcher_settings(),
        save_queue_capacity: config.sidecar.save_queue_capacity,
    }
}

impl Services {
    /// Opens every enabled reconciler and runs its first pass. Blocking.
    pub fn open(config: AppConfig) -> EngineResult<Self> {
        let metrics = Metrics::new();
        let companies = if config.companies.enabled {
            Some(Reconciler::open(company_settings(&config), metrics.clone())?)
        } else {
            None
        };
        let projects = if config.projects.enabled {
            Some(Reconciler::open(project_settings(&config), metrics.clone())?)
        } else {
            None
        };
        Ok(Self { config: Arc::new(config), metrics, companies, projects })
    }

    /// Starts the watchers of all open reconcilers.
    pub fn start_watching(&self) -> EngineResult<Vec<WatchHandle>> {
        let mut handles = Vec::new();
        if let Some(companies) = &self.companies {
            handles.push(companies.start_watching()?);
        }
        if let Some(projects) = &self.projects {
            handles.push(projects.start_watching()?);
        }
        Ok(handles)
    }

    pub fn subscribe(&self) -> Vec<broadcast::Receiver<EngineEvent>> {
        let mut receivers = Vec::new();
        if let Some(companies) = &self.companies {
            receivers.push(companies.subscribe());
        }
        if let Some(projects) = &self.projects {
            receivers.push(projects.subscribe());
        }
        receivers
    }

    /// Waits for pending sidecar writes of every reconciler.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let companies_idle = self.companies.as_ref().map_or(true, |c| c.wait_idle(timeout));
        let projects_idle = self.projects.as_ref().map_or(true, |p| p.wait_idle(timeout));
        companies_idle && projects_idle
    }
}
