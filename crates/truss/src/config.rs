//! Engine configuration.
//!
//! Analysis options (decay factors, thresholds, tie-break rules) are explicit
//! structs with named, validated fields and documented defaults rather than
//! loose JSON-shaped maps. Configuration can be constructed in code or loaded
//! from a YAML file.

use crate::analysis::conflict::ConflictKind;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// Default prefix for generated edge IDs
pub const DEFAULT_EDGE_PREFIX: &str = "dep";

/// Default per-hop impact decay factor
pub const DEFAULT_DECAY_FACTOR: f64 = 0.7;

/// Default impact score threshold below which propagation stops
pub const DEFAULT_SCORE_THRESHOLD: f64 = 0.05;

/// Default maximum impact propagation depth
pub const DEFAULT_MAX_DEPTH: usize = 50;

/// Default capacity for each resource tag
pub const DEFAULT_RESOURCE_CAPACITY: u32 = 1;

/// Default tolerance when comparing floating-point slack values
pub const DEFAULT_EPSILON: f64 = 1e-9;

/// Minimum edge prefix length
pub const MIN_PREFIX_LENGTH: usize = 2;

/// Maximum edge prefix length
pub const MAX_PREFIX_LENGTH: usize = 20;

/// Tie-break rule when multiple critical paths exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Prefer the lexicographically lowest task id (default)
    LowestTaskId,

    /// Prefer the lexicographically highest task id
    HighestTaskId,
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Prefix for generated edge IDs (e.g., "dep" for "dep-a3f8")
    #[serde(rename = "edge-prefix", default = "default_edge_prefix")]
    pub edge_prefix: String,

    /// Impact analyzer options
    #[serde(default)]
    pub impact: ImpactConfig,

    /// Conflict resolver options
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Critical path analyzer options
    #[serde(default)]
    pub critical_path: CriticalPathConfig,
}

/// Impact analyzer options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactConfig {
    /// Per-hop score decay factor, in `(0, 1]`
    #[serde(default = "default_decay_factor")]
    pub decay_factor: f64,

    /// Propagation stops when the accumulated score falls below this, in `(0, 1]`
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,

    /// Hard cap on propagation depth
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

/// Conflict resolver options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Order in which equal-severity conflicts are attempted by `AutoResolve`.
    /// Must name each conflict kind exactly once.
    #[serde(default = "default_kind_precedence")]
    pub kind_precedence: Vec<ConflictKind>,

    /// Override flag allowing resolutions that demote critical-path edges
    #[serde(default)]
    pub allow_critical_path_changes: bool,

    /// Concurrent capacity assumed for each resource tag
    #[serde(default = "default_resource_capacity")]
    pub default_resource_capacity: u32,
}

/// Critical path analyzer options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalPathConfig {
    /// Tolerance when comparing slack values to zero
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,

    /// Tie-break rule when multiple critical paths exist
    #[serde(default = "default_tie_break")]
    pub tie_break: TieBreak,
}

fn default_edge_prefix() -> String {
    DEFAULT_EDGE_PREFIX.to_string()
}

fn default_decay_factor() -> f64 {
    DEFAULT_DECAY_FACTOR
}

fn default_score_threshold() -> f64 {
    DEFAULT_SCORE_THRESHOLD
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_kind_precedence() -> Vec<ConflictKind> {
    vec![
        ConflictKind::Dependency,
        ConflictKind::Scheduling,
        ConflictKind::Resource,
        ConflictKind::Priority,
    ]
}

fn default_resource_capacity() -> u32 {
    DEFAULT_RESOURCE_CAPACITY
}

fn default_epsilon() -> f64 {
    DEFAULT_EPSILON
}

fn default_tie_break() -> TieBreak {
    TieBreak::LowestTaskId
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            edge_prefix: default_edge_prefix(),
            impact: ImpactConfig::default(),
            resolver: ResolverConfig::default(),
            critical_path: CriticalPathConfig::default(),
        }
    }
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            decay_factor: DEFAULT_DECAY_FACTOR,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            kind_precedence: default_kind_precedence(),
            allow_critical_path_changes: false,
            default_resource_capacity: DEFAULT_RESOURCE_CAPACITY,
        }
    }
}

impl Default for CriticalPathConfig {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            tie_break: TieBreak::LowestTaskId,
        }
    }
}

impl EngineConfig {
    /// Validate every field, including nested sections.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid field found.
    pub fn validate(&self) -> Result<()> {
        validate_edge_prefix(&self.edge_prefix)?;

        let impact = &self.impact;
        if !impact.decay_factor.is_finite()
            || impact.decay_factor <= 0.0
            || impact.decay_factor > 1.0
        {
            return Err(Error::Config(format!(
                "impact.decay_factor must be in (0, 1], got {}",
                impact.decay_factor
            )));
        }
        if !impact.score_threshold.is_finite()
            || impact.score_threshold <= 0.0
            || impact.score_threshold > 1.0
        {
            return Err(Error::Config(format!(
                "impact.score_threshold must be in (0, 1], got {}",
                impact.score_threshold
            )));
        }
        if impact.max_depth == 0 {
            return Err(Error::Config(
                "impact.max_depth must be at least 1".to_string(),
            ));
        }

        let resolver = &self.resolver;
        for kind in ConflictKind::ALL {
            let count = resolver
                .kind_precedence
                .iter()
                .filter(|k| **k == kind)
                .count();
            if count != 1 {
                return Err(Error::Config(format!(
                    "resolver.kind_precedence must name {} exactly once, found {} occurrence(s)",
                    kind, count
                )));
            }
        }
        if resolver.default_resource_capacity == 0 {
            return Err(Error::Config(
                "resolver.default_resource_capacity must be at least 1".to_string(),
            ));
        }

        let critical_path = &self.critical_path;
        if !critical_path.epsilon.is_finite() || critical_path.epsilon <= 0.0 {
            return Err(Error::Config(format!(
                "critical_path.epsilon must be a positive number, got {}",
                critical_path.epsilon
            )));
        }

        Ok(())
    }

    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read, `Error::Config` if it
    /// cannot be parsed or fails validation.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let config: Self =
            serde_yaml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` on serialization failure, `Error::Io` on write failure.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_yaml::to_string(self).map_err(|e| Error::Config(format!("YAML error: {}", e)))?;
        fs::write(path, content).await?;
        Ok(())
    }
}

/// Validate edge ID prefix format.
///
/// Requirements:
/// - 2-20 characters
/// - Alphanumeric only (letters and digits)
///
/// # Errors
///
/// Returns `Error::Config` describing the violated requirement.
pub fn validate_edge_prefix(prefix: &str) -> Result<()> {
    if prefix.len() < MIN_PREFIX_LENGTH {
        return Err(Error::Config(format!(
            "Edge prefix must be at least {} characters",
            MIN_PREFIX_LENGTH
        )));
    }

    if prefix.len() > MAX_PREFIX_LENGTH {
        return Err(Error::Config(format!(
            "Edge prefix must be at most {} characters",
            MAX_PREFIX_LENGTH
        )));
    }

    if !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::Config(
            "Edge prefix must contain only letters and digits".to_string(),
        ));
    }

    Ok(())
}
