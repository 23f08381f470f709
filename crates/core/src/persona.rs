//! Persona catalogue: named domain profiles with schema context.
//!
//! Personas are typed descriptors registered at startup, either built in
//! code or read from a TOML catalogue:
//!
//! ```toml
//! [[persona]]
//! name = "product_planning"
//! description = "Product master data and component relationships"
//! tables = ["product_master", "part_master"]
//! content = "..."
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tables: Vec<String>,
    /// Schema notes and example queries injected into prompts.
    #[serde(default)]
    pub content: String,
    /// Appended to composed answers for this persona.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<String>,
}

#[derive(Debug, Error)]
pub enum PersonaError {
    #[error("persona `{0}` is not registered")]
    NotFound(String),
    #[error("could not read persona catalogue `{path}`: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("could not parse persona catalogue: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid persona catalogue: {0}")]
    Invalid(String),
}

pub trait PersonaProvider: Send + Sync {
    /// Persona name to short description.
    fn list_personas(&self) -> BTreeMap<String, String>;
    /// Full prompt context for one persona.
    fn load(&self, name: &str) -> Result<String, PersonaError>;
    fn tables(&self, name: &str) -> Vec<String>;
    fn suggestions(&self, name: &str) -> Option<String>;
}

#[derive(Debug, Deserialize)]
struct Catalogue {
    #[serde(default)]
    persona: Vec<PersonaDescriptor>,
}

/// Immutable after construction; safe to share across requests.
#[derive(Clone, Debug, Default)]
pub struct PersonaRegistry {
    personas: BTreeMap<String, PersonaDescriptor>,
}

impl PersonaRegistry {
    pub fn new(
        descriptors: impl IntoIterator<Item = PersonaDescriptor>,
    ) -> Result<Self, PersonaError> {
        let mut personas = BTreeMap::new();
        for descriptor in descriptors {
            let name = descriptor.name.trim().to_string();
            if name.is_empty() {
                return Err(PersonaError::Invalid("persona name must not be empty".to_string()));
            }
            if personas.insert(name.clone(), descriptor).is_some() {
                return Err(PersonaError::Invalid(format!("persona `{name}` is defined twice")));
            }
        }
        Ok(Self { personas })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, PersonaError> {
        let catalogue: Catalogue = toml::from_str(raw)?;
        Self::new(catalogue.persona)
    }

    pub fn load_file(path: &Path) -> Result<Self, PersonaError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| PersonaError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&raw)
    }

    /// Two generic personas so a fresh install can answer questions before a
    /// catalogue is configured.
    pub fn builtin() -> Self {
        let personas = [
            PersonaDescriptor {
                name: "product_planning".to_string(),
                description: "Product master data, specifications and part relationships"
                    .to_string(),
                tables: vec!["product_master".to_string(), "part_master".to_string()],
                content: "Tables:\n- product_master(product_id, product_name_en, \
                          product_name_jp, specifications, category)\n- part_master(part_id, \
                          product_id, part_name, quantity)"
                    .to_string(),
                suggestions: Some(
                    "You can also ask about product comparisons, specifications, or part \
                     number relationships."
                        .to_string(),
                ),
            },
            PersonaDescriptor {
                name: "sales_rep".to_string(),
                description: "Sales pricing, competitor equivalents and product code lookups"
                    .to_string(),
                tables: vec!["competitor_mapping".to_string(), "product_master".to_string()],
                content: "Tables:\n- competitor_mapping(product_id, competitor_product_code)\n\
                          - product_master(product_id, product_name_en, product_name_jp, \
                          specifications, category)"
                    .to_string(),
                suggestions: None,
            },
        ];
        Self {
            personas: personas.into_iter().map(|persona| (persona.name.clone(), persona)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&PersonaDescriptor> {
        self.personas.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.personas.contains_key(name)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &PersonaDescriptor> {
        self.personas.values()
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }
}

impl PersonaProvider for PersonaRegistry {
    fn list_personas(&self) -> BTreeMap<String, String> {
        self.personas
            .iter()
            .map(|(name, persona)| (name.clone(), persona.description.clone()))
            .collect()
    }

    fn load(&self, name: &str) -> Result<String, PersonaError> {
        self.get(name)
            .map(|persona| persona.content.clone())
            .ok_or_else(|| PersonaError::NotFound(name.to_string()))
    }

    fn tables(&self, name: &str) -> Vec<String> {
        self.get(name).map(|persona| persona.tables.clone()).unwrap_or_default()
    }

    fn suggestions(&self, name: &str) -> Option<String> {
        self.get(name).and_then(|persona| persona.suggestions.clone())
    }
}
