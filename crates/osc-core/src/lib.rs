//! Core domain model, name normalization and encoding repair for the OSC pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod normalize;
pub mod repair;

pub use normalize::normalize_key;
pub use repair::{ColumnAudit, EncodingRepair, TableCell, TextTable};

pub const CRATE_NAME: &str = "osc-core";

/// Stable catalog identifier of one organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidEntityId(pub String);

impl fmt::Display for InvalidEntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid entity id {:?}", self.0)
    }
}

impl std::error::Error for InvalidEntityId {}

impl FromStr for EntityId {
    type Err = InvalidEntityId;

    /// Accepts plain integers and the `123.0` form spreadsheet exports produce.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_suffix(".0")
            .unwrap_or(trimmed);
        digits
            .parse::<u64>()
            .map(EntityId)
            .map_err(|_| InvalidEntityId(s.to_string()))
    }
}

/// One harvested organization. Blank strings mean "not found on the page".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub legal_nature: String,
    pub registration_status: String,
    #[serde(default)]
    pub raw_municipality_name: String,
}

impl EntityRecord {
    pub fn blank(id: EntityId) -> Self {
        Self {
            id,
            name: String::new(),
            email: String::new(),
            phone: String::new(),
            address: String::new(),
            legal_nature: String::new(),
            registration_status: String::new(),
            raw_municipality_name: String::new(),
        }
    }

    /// True when none of the harvested fields carry a value.
    pub fn is_blank(&self) -> bool {
        self.name.is_empty()
            && self.email.is_empty()
            && self.phone.is_empty()
            && self.address.is_empty()
            && self.legal_nature.is_empty()
            && self.registration_status.is_empty()
    }

    /// Runs every text field through the repair filter. Returns how many fields changed.
    pub fn repair_text(&mut self, repair: &EncodingRepair) -> usize {
        let mut changed = 0;
        for field in [
            &mut self.name,
            &mut self.email,
            &mut self.phone,
            &mut self.address,
            &mut self.legal_nature,
            &mut self.registration_status,
            &mut self.raw_municipality_name,
        ] {
            let fixed = repair.repair(field);
            if fixed != *field {
                *field = fixed;
                changed += 1;
            }
        }
        changed
    }
}

/// One municipality of the boundary dataset. Read-only input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryRecord {
    pub municipality_name: String,
    pub geometry_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Containment,
    TokenOverlap,
    None,
}

/// Outcome of reconciling one source name against a candidate set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub source_name: String,
    pub matched_name: Option<String>,
    pub score: f64,
    pub kind: MatchKind,
    #[serde(default)]
    pub via_override: bool,
}

impl MatchResult {
    pub fn no_match(source_name: impl Into<String>, best_score: f64) -> Self {
        Self {
            source_name: source_name.into(),
            matched_name: None,
            score: best_score,
            kind: MatchKind::None,
            via_override: false,
        }
    }

    pub fn is_match(&self) -> bool {
        self.matched_name.is_some()
    }
}
