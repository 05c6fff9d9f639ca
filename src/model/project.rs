use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Local, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::entity::{base_name, derive_entity_id, EntityKind, FolderEntity};
use crate::error::ParseError;
use crate::model::timestamp::{format_folder_date, format_rfc3339, rfc3339_opt, split_leading_date};

lazy_static::lazy_static! {
    // managed spreadsheets are named after their project folder, e.g. "2025-0618 ..."
    static ref MANAGED_FILE_DATE: Regex = Regex::new(r"^20\d{2}-\d{4}").expect("managed file pattern is valid");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Scheduled,
    InProgress,
    Completed,
}

impl ProjectStatus {
    /// Status on `today` for a project running over `[start, end)`.
    ///
    /// Without an end date a started project stays in progress.
    pub fn on(today: NaiveDate, start: NaiveDate, end: Option<NaiveDate>) -> Self {
        if today < start {
            ProjectStatus::Scheduled
        } else if end.is_some_and(|end| today >= end) {
            ProjectStatus::Completed
        } else {
            ProjectStatus::InProgress
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ProjectStatus::Scheduled => "scheduled",
            ProjectStatus::InProgress => "in progress",
            ProjectStatus::Completed => "completed",
        }
    }
}

/// The spreadsheet that belongs to a project folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagedFile {
    /// File currently acting as the managed file, if any.
    pub current: Option<PathBuf>,
    /// Name the managed file should carry: `<folder name>.<ext>`.
    pub standard: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSettings {
    /// Stem accepted as managed file besides date-prefixed names.
    pub managed_file_fallback: String,
    /// Spreadsheet extensions, without dot; the first is used for new files.
    pub managed_file_extensions: Vec<String>,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            managed_file_fallback: "project".to_string(),
            managed_file_extensions: vec!["xlsx".to_string(), "xls".to_string()],
        }
    }
}

/// Fields recomputed from a `"<date> <company> <location>"` folder name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectDerived {
    pub start: DateTime<FixedOffset>,
    pub company_name: String,
    pub location_name: String,
    pub status: ProjectStatus,
    pub managed_file: ManagedFile,
}

/// Business data that only lives in `@koji.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectPersisted {
    #[serde(with = "rfc3339_opt")]
    pub end: Option<DateTime<FixedOffset>>,
    pub description: String,
    pub tags: Vec<String>,
    pub address: String,
    pub contact: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectMirror {
    pub start: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Project {
    pub id: String,
    pub folder: PathBuf,
    pub derived: ProjectDerived,
    pub persisted: ProjectPersisted,
}

/// Name parts of a project folder: start, company and location.
pub fn parse_project_name(folder_name: &str) -> Result<(DateTime<FixedOffset>, String, String), ParseError> {
    let (start, rest) =
        split_leading_date(folder_name).ok_or_else(|| ParseError::MissingDate(folder_name.to_string()))?;
    if rest.is_empty() {
        return Err(ParseError::MissingName(folder_name.to_string()));
    }
    let (company, location) = match rest.split_once(' ') {
        Some((company, location)) => (company, location.trim()),
        None => (rest, ""),
    };
    Ok((start, company.to_string(), location.to_string()))
}

/// Locates the managed spreadsheet inside a project folder.
///
/// Candidates carry one of the configured extensions and either a
/// `20YY-MMDD` date prefix or the fallback stem; the alphabetically first
/// candidate wins.
pub fn find_managed_file(folder: &Path, folder_name: &str, settings: &ProjectSettings) -> ManagedFile {
    let default_ext = settings
        .managed_file_extensions
        .first()
        .map(String::as_str)
        .unwrap_or("xlsx");

    let mut candidates: Vec<(PathBuf, String)> = Vec::new();
    match fs::read_dir(folder) {
        Ok(rd) => {
            for entry in rd.flatten() {
                let path = entry.path();
                let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                    continue;
                };
                let ext = ext.to_ascii_lowercase();
                if !settings.managed_file_extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                if MANAGED_FILE_DATE.is_match(stem) || stem == settings.managed_file_fallback {
                    candidates.push((path, ext));
                }
            }
        }
        Err(e) => {
            tracing::debug!("Cannot list project folder {}: {}", folder.display(), e);
        }
    }
    candidates.sort();

    match candidates.into_iter().next() {
        Some((current, ext)) => ManagedFile {
            standard: folder.join(format!("{}.{}", folder_name, ext)),
            current: Some(current),
        },
        None => ManagedFile { current: None, standard: folder.join(format!("{}.{}", folder_name, default_ext)) },
    }
}

impl Project {
    pub fn status_on(&self, today: NaiveDate) -> ProjectStatus {
        ProjectStatus::on(
            today,
            self.derived.start.date_naive(),
            self.persisted.end.as_ref().map(|end| end.date_naive()),
        )
    }
}

impl FolderEntity for Project {
    type Derived = ProjectDerived;
    type Persisted = ProjectPersisted;
    type Mirror = ProjectMirror;
    type Settings = ProjectSettings;

    const KIND: EntityKind = EntityKind::Project;

    fn parse(folder: &Path, settings: &ProjectSettings) -> Result<Self, ParseError> {
        let name = base_name(folder)?;
        let (start, company_name, location_name) = parse_project_name(name)?;
        let persisted = ProjectPersisted::default();
        let status = ProjectStatus::on(Local::now().date_naive(), start.date_naive(), None);
        Ok(Project {
            id: derive_entity_id(Self::KIND, name),
            folder: folder.to_path_buf(),
            derived: ProjectDerived {
                start,
                company_name,
                location_name,
                status,
                managed_file: find_managed_file(folder, name, settings),
            },
            persisted,
        })
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn folder(&self) -> &Path {
        &self.folder
    }

    fn derived_of(&self) -> &ProjectDerived {
        &self.derived
    }

    fn persisted_of(&self) -> &ProjectPersisted {
        &self.persisted
    }

    fn persisted_mut(&mut self) -> &mut ProjectPersisted {
        &mut self.persisted
    }

    fn mirror(&self) -> ProjectMirror {
        ProjectMirror {
            start: format_rfc3339(&self.derived.start),
            status: self.derived.status.label().to_string(),
        }
    }

    fn conventional_name(&self) -> Result<String, ParseError> {
        let d = &self.derived;
        let company = d.company_name.trim();
        if company.is_empty() {
            return Err(ParseError::MissingName(company.to_string()));
        }
        // the first space separates company from location
        if company.contains(char::is_whitespace) {
            return Err(ParseError::InvalidName(company.to_string()));
        }
        let location = d.location_name.trim();
        let mut name = format!("{} {}", format_folder_date(&d.start), company);
        if !location.is_empty() {
            name.push(' ');
            name.push_str(location);
        }
        Ok(name)
    }

    fn refresh_derived(&mut self) {
        self.derived.status = self.status_on(Local::now().date_naive());
    }

    fn publish_order(&self, other: &Self) -> Ordering {
        other
            .derived
            .start
            .cmp(&self.derived.start)
            .then_with(|| self.folder_name().cmp(other.folder_name()))
    }
}
