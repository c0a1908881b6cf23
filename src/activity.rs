//! Acquisition activities and metadata partitioning
//!
//! An [`AcquisitionActivity`] is a contiguous group of data files attributed
//! to one physical step of an instrument session. Files accumulate one at a
//! time; their metadata is then partitioned into activity-wide setup
//! parameters (identical across every file) and per-file unique metadata
//! (everything else).

use crate::error::CatalogError;
use crate::extract::{MetadataExtractor, MetadataMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Reserved metadata key identifying a file's dataset type
pub const DATASET_TYPE_KEY: &str = "DatasetType";

/// Reserved metadata key carrying raw extractor warnings
pub const WARNINGS_KEY: &str = "warnings";

/// A collection of files and metadata attributed to one acquisition activity.
///
/// The per-file state is held as parallel sequences (`files`, `meta`,
/// `warnings`, `previews`, and after partitioning `unique_meta`), which must
/// have identical lengths at all times; [`AcquisitionActivity::add_file`]
/// either appends to all of them or to none.
///
/// `setup_params` and `unique_meta` are not kept in sync automatically: they
/// are cleared whenever the file set changes and recomputed on demand by
/// `store_setup_params` / `store_unique_metadata` once all files are known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionActivity {
    /// Start of this activity's temporal window
    pub start: DateTime<Utc>,
    /// End of this activity's temporal window
    pub end: DateTime<Utc>,
    /// Acquisition mode label (e.g. "IMAGING", "DIFFRACTION")
    pub mode: String,
    /// Files belonging to this activity, in insertion order
    pub files: Vec<PathBuf>,
    /// Flattened metadata mapping per file
    pub meta: Vec<MetadataMap>,
    /// Flagged metadata-key names per file
    pub warnings: Vec<Vec<String>>,
    /// Preview artifact path per file
    pub previews: Vec<PathBuf>,
    /// Activity-wide metadata, once computed by `store_setup_params`
    pub setup_params: Option<MetadataMap>,
    /// Per-file metadata left over after removing setup parameters,
    /// once computed by `store_unique_metadata`
    pub unique_meta: Option<Vec<MetadataMap>>,
}

impl fmt::Display for AcquisitionActivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} AcquisitionActivity {}",
            self.start.to_rfc3339(),
            self.mode
        )
    }
}

impl AcquisitionActivity {
    /// Create an empty activity covering `[start, end)` with the given mode
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, mode: impl Into<String>) -> Self {
        Self {
            start,
            end,
            mode: mode.into(),
            files: Vec::new(),
            meta: Vec::new(),
            warnings: Vec::new(),
            previews: Vec::new(),
            setup_params: None,
            unique_meta: None,
        }
    }

    /// Append one file to this activity.
    ///
    /// The path must reference an existing file, otherwise
    /// [`CatalogError::FileNotFound`] is returned and the activity is left
    /// untouched. When the extractor yields no metadata the file is skipped
    /// with a warning and `Ok(false)` is returned; nothing is appended to any
    /// of the parallel sequences. On success the stored partition
    /// (`setup_params` / `unique_meta`) is cleared, since it no longer
    /// reflects the file set.
    pub fn add_file(
        &mut self,
        path: &Path,
        extractor: &dyn MetadataExtractor,
    ) -> Result<bool, CatalogError> {
        if !path.exists() {
            return Err(CatalogError::FileNotFound(path.to_path_buf()));
        }
        let extraction = extractor.extract(path);
        let Some(metadata) = extraction.metadata else {
            warn!(path = %path.display(), "could not extract metadata; skipping file");
            return Ok(false);
        };

        self.files.push(path.to_path_buf());
        self.meta.push(metadata);
        self.warnings.push(extraction.warnings);
        // without a rendered preview, the file's own path stands in so the
        // emitted preview location degrades to <file>.thumb.png
        self.previews
            .push(extraction.preview.unwrap_or_else(|| path.to_path_buf()));

        self.setup_params = None;
        self.unique_meta = None;
        debug!(path = %path.display(), files = self.files.len(), "file appended to activity");
        Ok(true)
    }

    /// Union of all metadata keys across the files of this activity
    pub fn unique_params(&self) -> BTreeSet<String> {
        let mut params = BTreeSet::new();
        for m in &self.meta {
            params.extend(m.keys().cloned());
        }
        params
    }

    /// Whether `key` is flagged as untrustworthy for the file at `file_index`
    pub fn key_flagged(&self, file_index: usize, key: &str) -> bool {
        self.warnings
            .get(file_index)
            .is_some_and(|w| w.iter().any(|flagged| flagged == key))
    }

    /// Partition metadata into activity-wide setup parameters.
    ///
    /// A key qualifies as a setup parameter iff it is present, with an
    /// identical value, in every file's metadata. The candidate set defaults
    /// to the union of all keys across all files; the reserved
    /// [`DATASET_TYPE_KEY`] and [`WARNINGS_KEY`] are never considered. A
    /// single-file activity gets an empty setup mapping, since all of its
    /// metadata is inherently per-file.
    pub fn store_setup_params(&mut self, candidates: Option<BTreeSet<String>>) {
        if self.files.len() == 1 {
            info!("single file in activity; leaving metadata attached to the file");
            self.setup_params = Some(MetadataMap::new());
            return;
        }

        let candidates = candidates.unwrap_or_else(|| self.unique_params());
        let mut alive: BTreeSet<String> = candidates
            .into_iter()
            .filter(|key| key.as_str() != DATASET_TYPE_KEY && key.as_str() != WARNINGS_KEY)
            .collect();

        // One pass over the files: seed values from the first file, then drop
        // any key that is missing from, or disagrees with, a later file.
        let mut setup = MetadataMap::new();
        for (i, m) in self.meta.iter().enumerate() {
            alive.retain(|key| match m.get(key) {
                None => false,
                Some(value) => i == 0 || setup.get(key) == Some(value),
            });
            if i == 0 {
                for key in &alive {
                    if let Some(value) = m.get(key) {
                        setup.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        setup.retain(|key, _| alive.contains(key));
        debug!(params = setup.len(), "setup parameters stored");
        self.setup_params = Some(setup);
    }

    /// Compute each file's unique metadata: its full mapping minus the setup
    /// parameters and the two reserved keys.
    ///
    /// Fails with [`CatalogError::SetupParamsNotComputed`] when called before
    /// `store_setup_params`.
    pub fn store_unique_metadata(&mut self) -> Result<(), CatalogError> {
        let setup = self
            .setup_params
            .as_ref()
            .ok_or(CatalogError::SetupParamsNotComputed)?;
        let unique = self
            .meta
            .iter()
            .map(|m| {
                m.iter()
                    .filter(|(key, _)| {
                        !setup.contains_key(key.as_str())
                            && key.as_str() != DATASET_TYPE_KEY
                            && key.as_str() != WARNINGS_KEY
                    })
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .collect();
        self.unique_meta = Some(unique);
        Ok(())
    }

    /// Load an activity checkpoint from JSON
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize this activity to JSON
    pub fn to_json(&self) -> Result<String, CatalogError> {
        Ok(serde_json::to_string(self)?)
    }
}
