use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::entity::{base_name, derive_entity_id, EntityKind, FolderEntity};
use crate::error::ParseError;
use crate::model::category::category_label;

/// Fields recomputed from a `"<digit> <name>[-<relation>]"` folder name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompanyDerived {
    pub category_index: u8,
    pub category_label: String,
    pub short_name: String,
    pub relation_tag: Option<String>,
}

/// Business data that only lives in `@company.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanyPersisted {
    pub legal_name: String,
    pub postal_code: String,
    pub address: String,
    pub phone: String,
    pub email: String,
    pub website: String,
    pub tags: Vec<String>,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanyMirror {
    pub short_name: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Company {
    pub id: String,
    pub folder: PathBuf,
    pub derived: CompanyDerived,
    pub persisted: CompanyPersisted,
}

/// Splits a company folder name into its derived fields.
pub fn parse_company_name(folder_name: &str) -> Result<CompanyDerived, ParseError> {
    let invalid = || ParseError::InvalidCategory(folder_name.to_string());

    let mut chars = folder_name.chars();
    let digit = chars.next().ok_or_else(invalid)?;
    if chars.next() != Some(' ') {
        return Err(invalid());
    }
    let index = digit.to_digit(10).ok_or_else(invalid)? as u8;
    let label = category_label(index).ok_or_else(invalid)?;

    // digit and space are both one byte here
    let name = folder_name[2..].trim();
    if name.is_empty() {
        return Err(ParseError::MissingName(folder_name.to_string()));
    }

    let (short_name, relation_tag) = match name.split_once('-') {
        Some((short, relation)) => {
            let relation = relation.trim();
            (short.trim(), (!relation.is_empty()).then(|| relation.to_string()))
        }
        None => (name, None),
    };
    if short_name.is_empty() {
        return Err(ParseError::MissingName(folder_name.to_string()));
    }

    Ok(CompanyDerived {
        category_index: index,
        category_label: label.to_string(),
        short_name: short_name.to_string(),
        relation_tag,
    })
}

impl FolderEntity for Company {
    type Derived = CompanyDerived;
    type Persisted = CompanyPersisted;
    type Mirror = CompanyMirror;
    type Settings = ();

    const KIND: EntityKind = EntityKind::Company;

    fn parse(folder: &Path, _settings: &()) -> Result<Self, ParseError> {
        let name = base_name(folder)?;
        let derived = parse_company_name(name)?;
        Ok(Company {
            id: derive_entity_id(Self::KIND, name),
            folder: folder.to_path_buf(),
            derived,
            persisted: CompanyPersisted::default(),
        })
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn folder(&self) -> &Path {
        &self.folder
    }

    fn derived_of(&self) -> &CompanyDerived {
        &self.derived
    }

    fn persisted_of(&self) -> &CompanyPersisted {
        &self.persisted
    }

    fn persisted_mut(&mut self) -> &mut CompanyPersisted {
        &mut self.persisted
    }

    fn mirror(&self) -> CompanyMirror {
        CompanyMirror {
            short_name: self.derived.short_name.clone(),
            category: self.derived.category_label.clone(),
        }
    }

    fn conventional_name(&self) -> Result<String, ParseError> {
        let d = &self.derived;
        let mut name = format!("{} {}", d.category_index, d.short_name.trim());
        if let Some(relation) = d.relation_tag.as_deref().filter(|r| !r.trim().is_empty()) {
            name.push('-');
            name.push_str(relation.trim());
        }
        // must survive a round trip through the parser
        parse_company_name(&name)?;
        Ok(name)
    }

    fn publish_order(&self, other: &Self) -> Ordering {
        self.derived
            .category_index
            .cmp(&other.derived.category_index)
            .then_with(|| self.folder_name().cmp(other.folder_name()))
    }
}
