//! Game reference data shared by every request.
//!
//! A [`ReferenceData`] snapshot is assembled once before serving starts
//! and handed to the bridge behind an `Arc`. Nothing mutates it afterwards,
//! so concurrent readers need no locking.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeErrorKind};

/// A character vocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocation {
    /// Numeric identifier
    pub id: i64,
    /// Unique name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Vocation this one derives from; equal to `id` for base vocations
    #[serde(rename = "fromvoc")]
    pub from_voc: i64,
}

impl Vocation {
    /// A base vocation derives from itself.
    pub fn is_base(&self) -> bool {
        self.from_voc == self.id
    }
}

/// A town of the game map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Town {
    /// Numeric identifier
    pub id: u32,
    /// Unique name
    pub name: String,
}

#[derive(Deserialize)]
struct VocationDocument {
    vocations: Vec<Vocation>,
}

#[derive(Deserialize)]
struct TownDocument {
    towns: Vec<Town>,
}

/// Immutable vocation and town lookup tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceData {
    vocations: Vec<Vocation>,
    towns: Vec<Town>,
}

impl ReferenceData {
    /// Builds a snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Config` when two vocations or two towns share a name.
    pub fn new(vocations: Vec<Vocation>, towns: Vec<Town>) -> Result<Self, BridgeError> {
        ensure_unique("vocation", vocations.iter().map(|v| v.name.as_str()))?;
        ensure_unique("town", towns.iter().map(|t| t.name.as_str()))?;
        Ok(Self { vocations, towns })
    }

    /// All vocations in load order.
    pub fn vocations(&self) -> &[Vocation] {
        &self.vocations
    }

    /// All towns in load order.
    pub fn towns(&self) -> &[Town] {
        &self.towns
    }

    /// Looks up a vocation by id.
    pub fn vocation_by_id(&self, id: i64) -> Option<&Vocation> {
        self.vocations.iter().find(|v| v.id == id)
    }

    /// Looks up a vocation by exact name.
    pub fn vocation_by_name(&self, name: &str) -> Option<&Vocation> {
        self.vocations.iter().find(|v| v.name == name)
    }

    /// Looks up a town by id.
    pub fn town_by_id(&self, id: u32) -> Option<&Town> {
        self.towns.iter().find(|t| t.id == id)
    }

    /// Looks up a town by exact name.
    pub fn town_by_name(&self, name: &str) -> Option<&Town> {
        self.towns.iter().find(|t| t.name == name)
    }
}

fn ensure_unique<'n>(
    what: &str,
    names: impl Iterator<Item = &'n str>,
) -> Result<(), BridgeError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(BridgeError::new(
                BridgeErrorKind::Config,
                format!("duplicate {} name '{}'", what, name),
            ));
        }
    }
    Ok(())
}

/// Parses a `{"vocations": [...]}` document.
///
/// # Errors
///
/// Returns `Config` for malformed JSON or duplicate names.
pub fn parse_vocations(json: &str) -> Result<Vec<Vocation>, BridgeError> {
    let doc: VocationDocument = serde_json::from_str(json)
        .map_err(|e| BridgeError::new(BridgeErrorKind::Config, format!("vocations: {}", e)))?;
    ensure_unique("vocation", doc.vocations.iter().map(|v| v.name.as_str()))?;
    Ok(doc.vocations)
}

/// Parses a `{"towns": [...]}` document.
///
/// # Errors
///
/// Returns `Config` for malformed JSON or duplicate names.
pub fn parse_towns(json: &str) -> Result<Vec<Town>, BridgeError> {
    let doc: TownDocument = serde_json::from_str(json)
        .map_err(|e| BridgeError::new(BridgeErrorKind::Config, format!("towns: {}", e)))?;
    ensure_unique("town", doc.towns.iter().map(|t| t.name.as_str()))?;
    Ok(doc.towns)
}

/// Loads vocations from a JSON file.
///
/// # Errors
///
/// Returns `Config` when the file cannot be read or parsed.
pub fn load_vocations(path: &Path) -> Result<Vec<Vocation>, BridgeError> {
    parse_vocations(&read(path)?)
}

/// Loads towns from a JSON file.
///
/// # Errors
///
/// Returns `Config` when the file cannot be read or parsed.
pub fn load_towns(path: &Path) -> Result<Vec<Town>, BridgeError> {
    parse_towns(&read(path)?)
}

fn read(path: &Path) -> Result<String, BridgeError> {
    fs::read_to_string(path).map_err(|e| {
        BridgeError::new(
            BridgeErrorKind::Config,
            format!("cannot read {}: {}", path.display(), e),
        )
    })
}
