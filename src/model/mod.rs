//! Entity kinds and the folder-name conventions they are parsed from.

pub mod category;
pub mod company;
pub mod project;
pub mod timestamp;

pub use category::{categories, Category, CATEGORIES};
pub use company::{Company, CompanyDerived, CompanyMirror, CompanyPersisted};
pub use project::{ManagedFile, Project, ProjectDerived, ProjectMirror, ProjectPersisted, ProjectSettings, ProjectStatus};
