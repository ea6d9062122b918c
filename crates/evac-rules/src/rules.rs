//! Danger rules
//!
//! Rules are read from a YAML table keyed by hazard-event type:
//!
//! ```yaml
//! emergencies:
//!   Fire:
//!     type: all
//!     safe_node_type: outdoor
//!   Flood:
//!     type: floor
//!     danger_floors: [0]
//!     safe_node_type: stairs
//!   GasLeak:
//!     type: zone
//!     danger_zone: { x1: 0, x2: 50, y1: 0, y2: 20, z1: 1, z2: 1 }
//! ```
//!
//! An entry that does not describe a valid rule is kept as
//! [`RuleEntry::Rejected`] so the rest of the table still loads.

use crate::error::{RulesError, RulesResult};
use evac_types::{BoundingBox, FloorLevel};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{error, info, warn};

/// Danger rectangle plus the floor range it applies to
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct DangerZone {
    pub x1: f64,
    pub x2: f64,
    pub y1: f64,
    pub y2: f64,
    pub z1: FloorLevel,
    pub z2: FloorLevel,
}

impl DangerZone {
    /// 2-D area of the zone
    pub fn area(&self) -> BoundingBox {
        BoundingBox::flat(self.x1, self.x2, self.y1, self.y2)
    }
}

/// Which nodes a hazard affects
#[derive(Debug, Clone, PartialEq)]
pub enum RuleScope {
    /// Every node
    All,
    /// Every node on any listed floor
    FloorSet(Vec<FloorLevel>),
    /// Nodes whose centroid lies in the zone on a floor in its range
    Zone(DangerZone),
}

/// Mapping from a hazard type to affected nodes and an optional exempt type
#[derive(Debug, Clone, PartialEq)]
pub struct DangerRule {
    pub scope: RuleScope,
    pub safe_node_type: Option<String>,
}

/// One entry of the rule table
#[derive(Debug, Clone, PartialEq)]
pub enum RuleEntry {
    Valid(DangerRule),
    /// Entry that failed to parse; applying it mutates nothing
    Rejected(String),
}

#[derive(Debug, Deserialize)]
struct RawRule {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    danger_floors: Option<Vec<FloorLevel>>,
    #[serde(default)]
    danger_zone: Option<DangerZone>,
    #[serde(default)]
    safe_node_type: Option<String>,
}

impl TryFrom<RawRule> for DangerRule {
    type Error = String;

    fn try_from(raw: RawRule) -> Result<Self, String> {
        let scope = match raw.kind.as_deref() {
            Some("all") => RuleScope::All,
            Some("floor") => RuleScope::FloorSet(raw.danger_floors.unwrap_or_default()),
            Some("zone") => RuleScope::Zone(raw.danger_zone.unwrap_or_default()),
            Some(other) => return Err(format!("unknown rule type '{}'", other)),
            None => return Err("missing rule type".to_string()),
        };
        let safe_node_type = raw.safe_node_type.filter(|t| !t.is_empty());
        Ok(DangerRule {
            scope,
            safe_node_type,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct RuleFile {
    #[serde(default)]
    emergencies: BTreeMap<String, serde_yaml::Value>,
}

/// Rule table keyed by hazard-event type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleBook {
    rules: BTreeMap<String, RuleEntry>,
}

impl RuleBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a YAML rule table
    pub fn from_yaml_str(yaml: &str) -> RulesResult<Self> {
        let file: Option<RuleFile> =
            serde_yaml::from_str(yaml).map_err(|e| RulesError::Parse(e.to_string()))?;
        let file = file.unwrap_or_default();

        let mut rules = BTreeMap::new();
        for (event, value) in file.emergencies {
            let entry = serde_yaml::from_value::<RawRule>(value)
                .map_err(|e| e.to_string())
                .and_then(DangerRule::try_from);
            match entry {
                Ok(rule) => {
                    rules.insert(event, RuleEntry::Valid(rule));
                }
                Err(reason) => {
                    warn!(event_type = %event, %reason, "Rejected danger rule");
                    rules.insert(event, RuleEntry::Rejected(reason));
                }
            }
        }
        Ok(Self { rules })
    }

    /// Read a YAML rule file
    pub fn load(path: impl AsRef<Path>) -> RulesResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| RulesError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let book = Self::from_yaml_str(&raw)?;
        info!(path = %path.display(), rules = book.len(), "Loaded danger rules");
        Ok(book)
    }

    /// Read a YAML rule file, falling back to an empty table on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(book) => book,
            Err(e) => {
                error!(error = %e, "Using empty rule table; unknown events get the default policy");
                Self::default()
            }
        }
    }

    pub fn insert(&mut self, event: impl Into<String>, rule: DangerRule) {
        self.rules.insert(event.into(), RuleEntry::Valid(rule));
    }

    pub fn get(&self, event: &str) -> Option<&RuleEntry> {
        self.rules.get(event)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
