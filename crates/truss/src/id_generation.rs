//! Hash-based edge ID generation.
//!
//! Dependency edges are addressable by id (`RemoveDependency`,
//! `UpdateDependency`), so each committed edge gets a collision-resistant
//! identifier derived from SHA256 and base36 encoding.
//!
//! # Features
//!
//! - **Adaptive length**: ID length grows with graph size (4-6 characters)
//! - **Collision resistant**: SHA256 hashing with nonce retry
//! - **Format**: `{prefix}-{hash}` (e.g., "dep-a3f8")
//!
//! # Example
//!
//! ```
//! use truss::domain::{DependencyType, TaskId};
//! use truss::id_generation::{EdgeIdGenerator, EdgeIdGeneratorConfig};
//!
//! let config = EdgeIdGeneratorConfig {
//!     prefix: "dep".to_string(),
//!     graph_size: 100,
//! };
//!
//! let mut generator = EdgeIdGenerator::new(config);
//!
//! let id = generator.generate(
//!     &TaskId::new("design"),
//!     &TaskId::new("build"),
//!     DependencyType::DependsOn,
//! ).unwrap();
//!
//! assert!(id.starts_with("dep-"));
//! ```

use crate::domain::{DependencyType, TaskId};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

const BASE36_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const MAX_NONCE: u32 = 100;

/// Errors that can occur during edge ID generation
#[derive(Debug, Error)]
pub enum EdgeIdError {
    /// Unable to generate a unique ID after exhausting all nonces and length increases
    #[error("Unable to generate unique edge ID after {attempts} attempts")]
    CollisionExhausted {
        /// Number of nonces tried
        attempts: u32,
    },

    /// Base36 encoding failed
    #[error("Base36 encoding failed: {0}")]
    EncodingFailed(String),

    /// Invalid length parameter
    #[error("Length must be greater than 0")]
    InvalidLength,
}

/// Configuration for edge ID generation
#[derive(Debug, Clone)]
pub struct EdgeIdGeneratorConfig {
    /// Prefix for all IDs (e.g., "dep")
    pub prefix: String,

    /// Current number of edges in the graph (affects adaptive length)
    pub graph_size: usize,
}

/// Hash-based edge ID generator with collision detection.
///
/// The generator tracks every ID it has handed out (or been told about via
/// [`register_id`](Self::register_id)) so regenerated hashes never collide
/// within one graph. Graphs recreate the generator when crossing the length
/// thresholds, re-registering their existing edge IDs.
#[derive(Debug, Clone)]
pub struct EdgeIdGenerator {
    config: EdgeIdGeneratorConfig,
    existing_ids: HashSet<String>,
}

impl EdgeIdGenerator {
    /// Create a new ID generator with the given configuration
    #[must_use]
    pub fn new(config: EdgeIdGeneratorConfig) -> Self {
        Self {
            config,
            existing_ids: HashSet::new(),
        }
    }

    /// Register an existing ID to prevent collisions
    pub fn register_id(&mut self, id: String) {
        self.existing_ids.insert(id);
    }

    /// The graph size the generator was configured with
    #[must_use]
    pub fn graph_size(&self) -> usize {
        self.config.graph_size
    }

    /// Generate a new unique edge ID.
    ///
    /// # Errors
    ///
    /// Returns an error if unable to generate a unique ID after trying all
    /// nonces at the maximum length.
    pub fn generate(
        &mut self,
        from: &TaskId,
        to: &TaskId,
        dep_type: DependencyType,
    ) -> Result<String, EdgeIdError> {
        let id_length = self.adaptive_length();

        // Try generating with different nonces
        for nonce in 0..MAX_NONCE {
            let id = self.generate_hash_id(from, to, dep_type, nonce, id_length)?;

            if !self.existing_ids.contains(&id) {
                if nonce > 0 {
                    debug!(
                        nonce,
                        id_length, "Generated unique edge ID after {} collision retries", nonce
                    );
                }
                self.existing_ids.insert(id.clone());
                return Ok(id);
            }
        }

        // If all nonces collide, try with increased length
        if id_length < 6 {
            warn!(
                id_length,
                max_nonce = MAX_NONCE,
                "All nonces exhausted, increasing edge ID length to {}",
                id_length + 1
            );
            let longer_id = self.generate_hash_id(from, to, dep_type, 0, id_length + 1)?;
            self.existing_ids.insert(longer_id.clone());
            return Ok(longer_id);
        }

        Err(EdgeIdError::CollisionExhausted {
            attempts: MAX_NONCE,
        })
    }

    /// Generate a hash-based ID with the given parameters
    fn generate_hash_id(
        &self,
        from: &TaskId,
        to: &TaskId,
        dep_type: DependencyType,
        nonce: u32,
        length: usize,
    ) -> Result<String, EdgeIdError> {
        // Combine inputs for hashing
        let timestamp = Utc::now().timestamp();
        let content = format!("{}|{}|{}|{}|{}", from, to, dep_type, timestamp, nonce);

        // SHA256 hash
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let hash_bytes = hasher.finalize();

        // Base36 encode to desired length
        let hash_str = encode_base36(&hash_bytes[..8], length)?;

        // Format: {prefix}-{hash}
        Ok(format!("{}-{}", self.config.prefix, hash_str))
    }

    /// Determine ID length based on graph size
    ///
    /// - 0-500 edges: 4 chars
    /// - 500-1,500: 5 chars
    /// - 1,500+: 6 chars
    fn adaptive_length(&self) -> usize {
        match self.config.graph_size {
            0..=500 => 4,
            501..=1500 => 5,
            _ => 6,
        }
    }
}

/// Encode bytes as base36 string
///
/// # Bounds Checking
///
/// This function uses wrapping arithmetic (`wrapping_shl`, `wrapping_add`) to
/// handle the conversion of bytes to a u64. The input is limited to the first
/// 8 bytes of the SHA256 hash to fit within u64 bounds. Wrapping behavior is
/// intentional and safe here:
/// - We only process 8 bytes maximum (enforced by caller passing `&hash_bytes[..8]`)
/// - Wrapping creates a deterministic output even if overflow occurs
/// - The base36 encoding step normalizes the output to the requested length
///
/// # Errors
///
/// Returns an error if length is 0 or if UTF-8 conversion fails.
pub(crate) fn encode_base36(bytes: &[u8], length: usize) -> Result<String, EdgeIdError> {
    if length == 0 {
        return Err(EdgeIdError::InvalidLength);
    }

    // Convert bytes to a large number (limited to 8 bytes by caller)
    let mut num: u64 = 0;
    for &byte in bytes {
        num = num.wrapping_shl(8).wrapping_add(u64::from(byte));
    }

    // Convert to base36
    let mut result = Vec::new();
    let mut n = num;

    while result.len() < length {
        let remainder = (n % 36) as usize;
        result.push(BASE36_CHARS[remainder]);
        n /= 36;
    }

    result.reverse();

    String::from_utf8(result)
        .map_err(|e| EdgeIdError::EncodingFailed(format!("UTF-8 conversion failed: {}", e)))
}

/// Validate edge ID format: `{prefix}-{hash}` with a 4-6 char alphanumeric hash
#[must_use]
pub fn validate_edge_id(id: &str, prefix: &str) -> bool {
    let Some(hash) = id.strip_prefix(&format!("{}-", prefix)) else {
        return false;
    };

    if hash.len() < 4 || hash.len() > 6 {
        return false;
    }

    hash.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(graph_size: usize) -> EdgeIdGenerator {
        EdgeIdGenerator::new(EdgeIdGeneratorConfig {
            prefix: "dep".to_string(),
            graph_size,
        })
    }

    #[test]
    fn test_base36_encoding() {
        let bytes = &[0x12, 0x34, 0x56, 0x78];
        let result = encode_base36(bytes, 4).unwrap();
        assert_eq!(result.len(), 4);
        assert!(result.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_adaptive_length() {
        assert_eq!(generator(100).adaptive_length(), 4);
        assert_eq!(generator(800).adaptive_length(), 5);
        assert_eq!(generator(2000).adaptive_length(), 6);
    }

    #[test]
    fn test_id_generation() {
        let mut generator = generator(100);

        let id = generator
            .generate(
                &TaskId::new("design"),
                &TaskId::new("build"),
                DependencyType::DependsOn,
            )
            .unwrap();

        assert!(id.starts_with("dep-"));
        assert!(validate_edge_id(&id, "dep"));
    }

    #[test]
    fn test_collision_handling() {
        let mut generator = generator(100);

        // Same endpoints and type - collision detection must still yield unique IDs
        let id1 = generator
            .generate(&TaskId::new("a"), &TaskId::new("b"), DependencyType::Blocks)
            .unwrap();
        let id2 = generator
            .generate(&TaskId::new("a"), &TaskId::new("b"), DependencyType::Blocks)
            .unwrap();

        assert_ne!(id1, id2);
    }

    #[test]
    fn test_register_existing_ids() {
        let mut generator = generator(100);

        generator.register_id("dep-a3f8".to_string());
        generator.register_id("dep-b4g9".to_string());

        let new_id = generator
            .generate(
                &TaskId::new("a"),
                &TaskId::new("b"),
                DependencyType::DependsOn,
            )
            .unwrap();
        assert_ne!(new_id, "dep-a3f8");
        assert_ne!(new_id, "dep-b4g9");
    }

    #[test]
    fn test_id_validation() {
        assert!(validate_edge_id("dep-a3f8", "dep"));
        assert!(validate_edge_id("dep-abc123", "dep"));

        assert!(!validate_edge_id("invalid", "dep"));
        assert!(!validate_edge_id("dep-", "dep"));
        assert!(!validate_edge_id("dep-ab", "dep")); // Too short
        assert!(!validate_edge_id("dep-abcdefg", "dep")); // Too long
        assert!(!validate_edge_id("dep-a3f8.1", "dep")); // No hierarchical ids for edges
        assert!(!validate_edge_id("wrong-a3f8", "dep")); // Wrong prefix
    }
}
