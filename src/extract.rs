//! Metadata-extraction collaborator seam
//!
//! Reading instrument file formats is outside this crate. Callers supply a
//! [`MetadataExtractor`] that flattens a file's native metadata into a
//! string-keyed mapping, flags untrustworthy keys, and optionally points at a
//! rendered preview artifact.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Flattened file metadata: string keys to scalar or string values
pub type MetadataMap = HashMap<String, serde_json::Value>;

/// Result of extracting one file's metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Extraction {
    /// Flattened metadata mapping; `None` signals an extraction failure
    pub metadata: Option<MetadataMap>,
    /// Metadata-key names whose values may be untrustworthy
    pub warnings: Vec<String>,
    /// Path to a rendered preview artifact, if one was produced
    pub preview: Option<PathBuf>,
}

/// Trait for metadata-extraction collaborators
pub trait MetadataExtractor {
    /// Extract flattened metadata (and an opportunistic preview) for one file
    fn extract(&self, path: &Path) -> Extraction;
}
