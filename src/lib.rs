//! Acq Catalog - cataloging engine for instrument-session acquisition activities
//!
//! This crate groups the files produced during an instrument session into
//! discrete acquisition activities and emits a canonical structured record of
//! each one through a deterministic pipeline: boundary detection over file
//! modification times → per-activity metadata partitioning → XML record
//! encoding.
//!
//! ## Modules
//!
//! - **cluster**: KDE-based detection of activity boundaries from file mtimes
//! - **activity**: acquisition activities and setup/unique metadata partitioning
//! - **encoder**: XML record fragments for the session-level document
//! - **extract**: the metadata-extraction collaborator seam

pub mod activity;
pub mod cluster;
pub mod encoder;
pub mod error;
pub mod extract;

pub use activity::{AcquisitionActivity, DATASET_TYPE_KEY, WARNINGS_KEY};
pub use cluster::{cluster_filelist_mtimes, cluster_mtimes};
pub use encoder::{XmlEncoder, DATASET_ROLE, PREVIEW_SUFFIX};
pub use error::CatalogError;
pub use extract::{Extraction, MetadataExtractor, MetadataMap};
