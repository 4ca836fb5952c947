//! # Configuration
//!
//! `tq-hub.toml`, every field optional:
//!
//! ```toml
//! [search]
//! max_rows = 10000
//! max_hits = 1000
//! retention_days = 90
//!
//! [features]
//! enabled = ["organizations:inbox"]
//!
//! [features.organizations]
//! "1" = ["organizations:global-views"]
//!
//! [server]
//! audit_capacity = 1000
//! ```

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use tq_core::model::OrganizationId;

#[derive(Deserialize, Default, Clone, Debug)]
pub struct Config {
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Deserialize, Clone, Debug)]
pub struct SearchConfig {
    /// Row budget for one event store query.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    /// Relational candidate ids handed to the event store before the
    /// restriction is dropped.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    #[serde(default = "default_max_hits")]
    pub max_hits: u64,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Event id lookups over at most this many projects use point lookups.
    #[serde(default = "default_point_lookup_limit")]
    pub point_lookup_limit: usize,
    /// Members see every project of their organization.
    #[serde(default = "default_open_membership")]
    pub open_membership: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_rows: default_max_rows(),
            max_candidates: default_max_candidates(),
            max_hits: default_max_hits(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            retention_days: default_retention_days(),
            point_lookup_limit: default_point_lookup_limit(),
            open_membership: default_open_membership(),
        }
    }
}

#[derive(Deserialize, Default, Clone, Debug)]
pub struct FeatureConfig {
    /// Enabled for every organization.
    #[serde(default)]
    pub enabled: Vec<String>,
    /// Per-organization grants, keyed by organization id.
    #[serde(default)]
    pub organizations: HashMap<String, Vec<String>>,
}

impl FeatureConfig {
    /// Grants keyed by numeric organization id. Keys that are not ids are
    /// skipped with a warning.
    pub fn organization_grants(&self) -> HashMap<OrganizationId, Vec<String>> {
        self.organizations
            .iter()
            .filter_map(|(key, features)| match key.parse() {
                Ok(id) => Some((id, features.clone())),
                Err(_) => {
                    tracing::warn!("Ignoring feature grants for non-numeric organization '{}'", key);
                    None
                }
            })
            .collect()
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,
    /// Organization the startup root key acts in.
    #[serde(default = "default_organization_id")]
    pub organization_id: OrganizationId,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            audit_capacity: default_audit_capacity(),
            organization_id: default_organization_id(),
        }
    }
}

fn default_max_rows() -> usize {
    10_000
}
fn default_max_candidates() -> usize {
    5_000
}
fn default_max_hits() -> u64 {
    1_000
}
fn default_limit() -> usize {
    25
}
fn default_max_limit() -> usize {
    100
}
fn default_retention_days() -> u32 {
    90
}
fn default_point_lookup_limit() -> usize {
    10
}
fn default_open_membership() -> bool {
    true
}
fn default_audit_capacity() -> usize {
    1_000
}
fn default_organization_id() -> OrganizationId {
    1
}

impl Config {
    /// Read `path` if it exists. A malformed file is reported and replaced
    /// by defaults.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::error!("Failed to read config {:?}: {}", path, e);
                return Self::default();
            }
        };
        toml::from_str::<Self>(&content)
            .unwrap_or_else(|e| {
                tracing::error!("Invalid config {:?}: {}", path, e);
                Self::default()
            })
            .validated()
    }

    /// Raise limits that would leave no valid page size.
    fn validated(mut self) -> Self {
        if self.search.max_limit == 0 {
            tracing::warn!("search.max_limit must be at least 1, using 1");
            self.search.max_limit = 1;
        }
        if self.search.default_limit == 0 {
            tracing::warn!("search.default_limit must be at least 1, using 1");
            self.search.default_limit = 1;
        }
        self
    }
}
