//! Notebook bundles.
//!
//! A bundle is the portable form of a notebook: a metadata envelope plus the
//! selected records grouped by kind. Bundles are written as pretty JSON,
//! optionally gzip-compressed; readers detect compression from the magic
//! bytes.

pub mod filter;

pub use filter::{DateRange, ExportFilterOptions, export_bundle, export_from_stores};

use crate::error::BundleError;
use crate::types::EntityCollection;
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Bundle format version (semver).
pub const BUNDLE_VERSION: &str = "1.0.0";

/// Major format version this build can read.
pub const SUPPORTED_MAJOR_VERSION: u64 = 1;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Metadata envelope of a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMetadata {
    /// Bundle format version (semver)
    pub version: String,
    pub exported_at: DateTime<Utc>,
    /// Owner of the exported notebook
    pub user_id: String,
    pub total_items: usize,
    /// Record counts keyed by collection name (`tasks`, `focusSessions`...)
    #[serde(default)]
    pub entity_counts: BTreeMap<String, usize>,
    /// Tool name and version that created this bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_by: Option<String>,
}

/// An exported notebook. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedBundle {
    metadata: BundleMetadata,
    data: EntityCollection,
}

impl ExportedBundle {
    /// Wrap a collection, computing counts from what it holds.
    pub fn new(user_id: impl Into<String>, data: EntityCollection) -> Self {
        let metadata = BundleMetadata {
            version: BUNDLE_VERSION.to_string(),
            exported_at: Utc::now(),
            user_id: user_id.into(),
            total_items: data.len(),
            entity_counts: data.counts(),
            exported_by: Some(format!("notebook-transfer v{}", env!("CARGO_PKG_VERSION"))),
        };
        Self { metadata, data }
    }

    pub fn metadata(&self) -> &BundleMetadata {
        &self.metadata
    }

    pub fn data(&self) -> &EntityCollection {
        &self.data
    }

    pub fn into_data(self) -> EntityCollection {
        self.data
    }

    /// Load a bundle from JSON text.
    pub fn from_json(json: &str) -> Result<Self, BundleError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a bundle from a file (supports both plain JSON and gzip).
    pub fn from_file(path: &Path) -> Result<Self, BundleError> {
        Ok(serde_json::from_value(read_bundle_value(path)?)?)
    }

    pub fn to_value(&self) -> Result<Value, BundleError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Serialize to JSON with pretty formatting.
    pub fn to_json_pretty(&self) -> Result<String, BundleError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write to `path`, gzip-compressed when `gzip` is set.
    pub fn write_to(&self, path: &Path, gzip: bool) -> Result<(), BundleError> {
        self.write_json(BufWriter::new(File::create(path)?), gzip)
    }

    /// Write pretty JSON to `writer` and flush it.
    pub fn write_json<W: Write>(&self, writer: W, gzip: bool) -> Result<(), BundleError> {
        let json = self.to_json_pretty()?;
        if gzip {
            let mut encoder = GzEncoder::new(writer, Compression::default());
            encoder.write_all(json.as_bytes())?;
            encoder.finish()?.flush()?;
        } else {
            let mut writer = writer;
            writer.write_all(json.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        Ok(())
    }
}

/// Read a bundle file as untyped JSON (plain or gzip).
///
/// The importer validates records one by one, so it starts from the raw
/// value rather than the typed bundle.
pub fn read_bundle_value(path: &Path) -> Result<Value, BundleError> {
    let mut bytes = Vec::new();
    BufReader::new(File::open(path)?).read_to_end(&mut bytes)?;

    if is_gzipped(&bytes) {
        let decoder = GzDecoder::new(bytes.as_slice());
        Ok(serde_json::from_reader(decoder)?)
    } else {
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Check for the gzip magic bytes.
pub fn is_gzipped(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[..2] == GZIP_MAGIC
}

/// Major component of a semver-like version string.
pub fn major_version(version: &str) -> Option<u64> {
    version.trim().trim_start_matches('v').split('.').next()?.parse().ok()
}

/// Whether this build can interpret a bundle of the given version.
pub fn is_supported_version(version: &str) -> bool {
    major_version(version) == Some(SUPPORTED_MAJOR_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Entity, Mood};
    use tempfile::TempDir;

    fn sample() -> ExportedBundle {
        let mood = Entity::Mood(Mood {
            id: "m1".into(),
            rating: 4,
            note: Some("good run".into()),
            recorded_at: Utc::now(),
            thought_ids: vec![],
            created_at: Utc::now(),
            updated_at: None,
            version: None,
        });
        ExportedBundle::new("user-1", EntityCollection::from_entities(vec![mood]))
    }

    #[test]
    fn test_bundle_metadata_counts() {
        let bundle = sample();
        assert_eq!(bundle.metadata().version, BUNDLE_VERSION);
        assert_eq!(bundle.metadata().total_items, 1);
        assert_eq!(bundle.metadata().entity_counts.get("moods"), Some(&1));
        assert_eq!(bundle.metadata().entity_counts.get("tasks"), Some(&0));
    }

    #[test]
    fn test_bundle_envelope_shape() {
        let value = sample().to_value().unwrap();
        assert_eq!(value["metadata"]["userId"], "user-1");
        assert_eq!(value["metadata"]["totalItems"], 1);
        assert!(value["metadata"]["exportedAt"].is_string());
        assert_eq!(value["data"]["moods"][0]["id"], "m1");
        assert!(value["data"]["focusSessions"].is_array());
    }

    #[test]
    fn test_write_and_read_plain_and_gzip() {
        let dir = TempDir::new().unwrap();
        let bundle = sample();

        let plain = dir.path().join("bundle.json");
        bundle.write_to(&plain, false).unwrap();
        let loaded = ExportedBundle::from_file(&plain).unwrap();
        assert_eq!(loaded, bundle);

        let gz = dir.path().join("bundle.json.gz");
        bundle.write_to(&gz, true).unwrap();
        let raw = std::fs::read(&gz).unwrap();
        assert!(is_gzipped(&raw));
        let loaded = ExportedBundle::from_file(&gz).unwrap();
        assert_eq!(loaded, bundle);
    }

    #[test]
    fn test_write_json_flushes_through_buffer() {
        let bundle = sample();
        let mut out = Vec::new();
        bundle
            .write_json(BufWriter::with_capacity(1 << 20, &mut out), true)
            .unwrap();
        assert!(is_gzipped(&out));
        let decoded: ExportedBundle = serde_json::from_reader(GzDecoder::new(out.as_slice())).unwrap();
        assert_eq!(decoded, bundle);

        let mut out = Vec::new();
        bundle
            .write_json(BufWriter::with_capacity(1 << 20, &mut out), false)
            .unwrap();
        assert!(out.ends_with(b"}\n"));
        assert_eq!(ExportedBundle::from_json(std::str::from_utf8(&out).unwrap()).unwrap(), bundle);
    }

    #[test]
    fn test_read_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            read_bundle_value(&path),
            Err(BundleError::Json(_))
        ));
    }

    #[test]
    fn test_version_support() {
        assert_eq!(major_version("1.4.2"), Some(1));
        assert_eq!(major_version("v2.0"), Some(2));
        assert_eq!(major_version("banana"), None);
        assert!(is_supported_version("1.0.0"));
        assert!(!is_supported_version("2.0.0"));
    }
}
