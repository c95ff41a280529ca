//! Catalog of categories, prompts and ground-truth products.
//!
//! The catalog is a read-only file loaded at startup. YAML and JSON are
//! both accepted; the format is picked from the file extension.

use crate::error::{Result, SpecGenieError};
use crate::record::GroundTruthRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Who a prompt is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptRole {
    Maker,
    Judge,
    Copywriter,
}

impl fmt::Display for PromptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PromptRole::Maker => "Maker",
            PromptRole::Judge => "Judge",
            PromptRole::Copywriter => "Copywriter",
        };
        f.write_str(name)
    }
}

impl FromStr for PromptRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "maker" => Ok(PromptRole::Maker),
            "judge" => Ok(PromptRole::Judge),
            "copywriter" => Ok(PromptRole::Copywriter),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Prompt language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptLang {
    #[default]
    En,
    Es,
}

impl fmt::Display for PromptLang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptLang::En => f.write_str("en"),
            PromptLang::Es => f.write_str("es"),
        }
    }
}

impl FromStr for PromptLang {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "en" => Ok(PromptLang::En),
            "es" => Ok(PromptLang::Es),
            other => Err(format!("unknown language '{}'", other)),
        }
    }
}

/// A product category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: u32,
    pub name: String,
}

/// A prompt as listed to clients; `category` is the category name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptDescriptor {
    pub category: String,
    pub lang: PromptLang,
    pub number: u32,
    pub version: u32,
    pub content: String,
}

/// Read access to categories, prompts and ground truth.
pub trait SpecStore: Send + Sync {
    fn list_categories(&self) -> Vec<Category>;

    /// Content of the prompt matching every key; `NotFound` otherwise.
    fn get_prompt(
        &self,
        role: PromptRole,
        category: u32,
        number: u32,
        version: u32,
        lang: PromptLang,
    ) -> Result<String>;

    fn list_prompts(&self, role: PromptRole) -> Vec<PromptDescriptor>;

    /// `(display name, record)` for every product in the category.
    fn get_ground_truth(&self, category: u32) -> Result<Vec<(String, GroundTruthRecord)>>;
}

#[derive(Debug, Clone, Deserialize)]
struct PromptEntry {
    category: u32,
    role: PromptRole,
    #[serde(default)]
    lang: PromptLang,
    number: u32,
    version: u32,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ProductEntry {
    category: u32,
    name: String,
    brand: String,
    part_number: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

impl ProductEntry {
    fn display_name(&self) -> String {
        format!("{} {}", self.brand, self.part_number)
    }

    fn to_record(&self) -> GroundTruthRecord {
        let mut attributes = self.attributes.clone();
        attributes.insert("brand".to_string(), self.brand.clone());
        attributes.insert("part_number".to_string(), self.part_number.clone());
        GroundTruthRecord {
            name: self.name.clone(),
            description: self.description.clone(),
            attributes,
        }
    }
}

/// Catalog file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogStore {
    #[serde(default)]
    categories: Vec<Category>,
    #[serde(default)]
    prompts: Vec<PromptEntry>,
    #[serde(default)]
    products: Vec<ProductEntry>,
}

impl CatalogStore {
    /// Load a catalog file; `.json` is parsed as JSON, anything else as YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| SpecGenieError::io(path, e))?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| SpecGenieError::Serialization(format!("{}: {}", path.display(), e))),
            _ => Self::from_yaml(&content),
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| SpecGenieError::Serialization(format!("Failed to parse catalog: {}", e)))
    }

    fn category(&self, id: u32) -> Result<&Category> {
        self.categories
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| SpecGenieError::NotFound(format!("category {}", id)))
    }

    fn category_name(&self, id: u32) -> String {
        self.category(id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|_| id.to_string())
    }
}

impl SpecStore for CatalogStore {
    fn list_categories(&self) -> Vec<Category> {
        self.categories.clone()
    }

    fn get_prompt(
        &self,
        role: PromptRole,
        category: u32,
        number: u32,
        version: u32,
        lang: PromptLang,
    ) -> Result<String> {
        self.category(category)?;

        self.prompts
            .iter()
            .find(|p| {
                p.category == category
                    && p.role == role
                    && p.lang == lang
                    && p.number == number
                    && p.version == version
            })
            .map(|p| p.content.clone())
            .ok_or_else(|| {
                SpecGenieError::NotFound(format!(
                    "{} prompt {} version {} ({}) for category {}",
                    role, number, version, lang, category
                ))
            })
    }

    fn list_prompts(&self, role: PromptRole) -> Vec<PromptDescriptor> {
        self.prompts
            .iter()
            .filter(|p| p.role == role)
            .map(|p| PromptDescriptor {
                category: self.category_name(p.category),
                lang: p.lang,
                number: p.number,
                version: p.version,
                content: p.content.clone(),
            })
            .collect()
    }

    fn get_ground_truth(&self, category: u32) -> Result<Vec<(String, GroundTruthRecord)>> {
        self.category(category)?;

        Ok(self
            .products
            .iter()
            .filter(|p| p.category == category)
            .map(|p| (p.display_name(), p.to_record()))
            .collect())
    }
}
