//! The `<label>.json` trace description read by replay harnesses.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::binary::{BinaryFileIndexInfo, Compression};
use crate::error::Result;
use crate::handle::ResourceKind;
use crate::index::ResourceIndexTracker;

/// Revision stamped into captures made by this crate.
pub const CAPTURE_REVISION: &str = env!("CARGO_PKG_VERSION");

pub fn metadata_file_name(label: &str) -> String {
    format!("{label}.json")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TraceJson {
    pub trace_metadata: TraceMetadata,
    pub binary_metadata: BinaryMetadata,
    /// Number of map slots each resource kind needs, keyed by map name.
    #[serde(default)]
    pub resource_capacities: BTreeMap<String, usize>,
    #[serde(default)]
    pub trace_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TraceMetadata {
    pub capture_revision: String,
    pub frame_start: u32,
    /// Last frame that was actually captured, which may precede the configured end.
    pub frame_end: u32,
    pub is_binary_data_compressed: bool,
    #[serde(rename = "IsOpenCL")]
    pub is_opencl: bool,
}

/// Block layout of the binary data file. Sizes are written as strings so JSON readers with
/// 53-bit numbers do not lose precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BinaryMetadata {
    pub version: u32,
    pub block_count: u64,
    #[serde(serialize_with = "serialize_u64_str", deserialize_with = "deserialize_u64_str")]
    pub block_size: u64,
    #[serde(serialize_with = "serialize_u64_str", deserialize_with = "deserialize_u64_str")]
    pub resident_size: u64,
    #[serde(serialize_with = "serialize_u64_str", deserialize_with = "deserialize_u64_str")]
    pub index_offset: u64,
}

fn serialize_u64_str<S>(value: &u64, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&value.to_string())
}

fn deserialize_u64_str<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse()
        .map_err(|_| serde::de::Error::custom(format!("expected an unsigned integer string, got '{s}'")))
}

impl From<BinaryFileIndexInfo> for BinaryMetadata {
    fn from(info: BinaryFileIndexInfo) -> Self {
        Self {
            version: info.version,
            block_count: info.block_count,
            block_size: info.block_size,
            resident_size: info.resident_size,
            index_offset: info.index_offset,
        }
    }
}

impl From<BinaryMetadata> for BinaryFileIndexInfo {
    fn from(meta: BinaryMetadata) -> Self {
        Self {
            version: meta.version,
            block_count: meta.block_count,
            block_size: meta.block_size,
            resident_size: meta.resident_size,
            index_offset: meta.index_offset,
        }
    }
}

impl TraceJson {
    pub fn new(
        frame_start: u32,
        frame_end: u32,
        compression: Compression,
        index: BinaryFileIndexInfo,
        tracker: &ResourceIndexTracker,
        trace_files: Vec<String>,
    ) -> Self {
        let resource_capacities = ResourceKind::ALL
            .iter()
            .map(|&kind| (kind.map_name().to_owned(), tracker.capacity(kind)))
            .collect();
        Self {
            trace_metadata: TraceMetadata {
                capture_revision: CAPTURE_REVISION.to_owned(),
                frame_start,
                frame_end,
                is_binary_data_compressed: compression.is_compressed(),
                is_opencl: true,
            },
            binary_metadata: index.into(),
            resource_capacities,
            trace_files,
        }
    }

    pub fn compression(&self) -> Compression {
        if self.trace_metadata.is_binary_data_compressed {
            Compression::Lz4
        } else {
            Compression::None
        }
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        tracing::info!(path = %path.as_ref().display(), "wrote trace metadata");
        Ok(())
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
