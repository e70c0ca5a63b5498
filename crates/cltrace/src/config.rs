use std::env;
use std::path::PathBuf;

use crate::binary::{BinaryStoreOptions, Compression, DEFAULT_BLOCK_SIZE, DEFAULT_RESIDENT_SIZE};
use crate::error::{CaptureError, Result};
use crate::prune::PruneMode;

/// Settings of one capture session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Directory the replay sources and side files are written to.
    ///
    /// Environment variable: `CLTRACE_OUT_DIR`.
    pub out_dir: PathBuf,
    /// First captured frame, counted from 1.
    ///
    /// Environment variable: `CLTRACE_FRAME_START`.
    pub frame_start: u32,
    /// Last captured frame. Calls after it are not recorded.
    ///
    /// Environment variable: `CLTRACE_FRAME_END`.
    pub frame_end: u32,
    /// Prefix of every output file.
    ///
    /// Environment variable: `CLTRACE_LABEL`.
    pub label: String,
    /// Environment variable: `CLTRACE_COMPRESSION` (`lz4`/`1`/`true` or `none`/`0`/`false`).
    pub compression: Compression,
    /// Drop calls of objects that died before the window. `None` keeps every call.
    ///
    /// Environment variable: `CLTRACE_PRUNE` (`remove`/`1`/`true`, `deactivate`, or
    /// `off`/`0`/`false`).
    pub prune: Option<PruneMode>,
    /// Write deactivated setup calls into `SetupFirstFrameInactive`.
    ///
    /// Environment variable: `CLTRACE_EMIT_INACTIVE`.
    pub emit_inactive: bool,
    /// Calls per generated function before it is split into parts.
    ///
    /// Environment variable: `CLTRACE_FUNCTION_SIZE_LIMIT`.
    pub function_size_limit: usize,
    /// Environment variable: `CLTRACE_BLOCK_SIZE`.
    pub block_size: usize,
    /// Environment variable: `CLTRACE_RESIDENT_SIZE`.
    pub resident_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("."),
            frame_start: 1,
            frame_end: 10,
            label: "cltrace".to_owned(),
            compression: Compression::Lz4,
            prune: Some(PruneMode::Remove),
            emit_inactive: false,
            function_size_limit: 5000,
            block_size: DEFAULT_BLOCK_SIZE,
            resident_size: DEFAULT_RESIDENT_SIZE,
        }
    }
}

impl CaptureConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from `CLTRACE_*` variables resolved through `lookup`. Unparseable values
    /// are logged and the default is kept.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        if let Some(dir) = get("CLTRACE_OUT_DIR") {
            config.out_dir = PathBuf::from(dir);
        }
        if let Some(label) = get("CLTRACE_LABEL") {
            config.label = label;
        }
        parse_into(&get, "CLTRACE_FRAME_START", &mut config.frame_start, |v| v.parse().ok());
        parse_into(&get, "CLTRACE_FRAME_END", &mut config.frame_end, |v| v.parse().ok());
        parse_into(&get, "CLTRACE_COMPRESSION", &mut config.compression, |v| {
            match v.to_ascii_lowercase().as_str() {
                "lz4" => Some(Compression::Lz4),
                "none" => Some(Compression::None),
                other => parse_bool(other).map(|on| if on { Compression::Lz4 } else { Compression::None }),
            }
        });
        parse_into(&get, "CLTRACE_PRUNE", &mut config.prune, |v| {
            match v.to_ascii_lowercase().as_str() {
                "remove" => Some(Some(PruneMode::Remove)),
                "deactivate" => Some(Some(PruneMode::Deactivate)),
                other => parse_bool(other).map(|on| on.then_some(PruneMode::Remove)),
            }
        });
        parse_into(&get, "CLTRACE_EMIT_INACTIVE", &mut config.emit_inactive, parse_bool);
        parse_into(&get, "CLTRACE_FUNCTION_SIZE_LIMIT", &mut config.function_size_limit, |v| {
            v.parse().ok().filter(|&n: &usize| n > 0)
        });
        parse_into(&get, "CLTRACE_BLOCK_SIZE", &mut config.block_size, |v| v.parse().ok());
        parse_into(&get, "CLTRACE_RESIDENT_SIZE", &mut config.resident_size, |v| v.parse().ok());

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_start == 0 || self.frame_end < self.frame_start {
            return Err(CaptureError::InvalidFrameRange {
                start: self.frame_start,
                end: self.frame_end,
            });
        }
        self.store_options().validate()
    }

    pub fn store_options(&self) -> BinaryStoreOptions {
        BinaryStoreOptions {
            compression: self.compression,
            block_size: self.block_size,
            resident_size: self.resident_size,
        }
    }

    /// Binary data file name as the replay refers to it.
    pub fn binary_file_name(&self) -> String {
        format!("{}{}", self.label, self.compression.file_suffix())
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

fn parse_into<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
    parse: impl Fn(&str) -> Option<T>,
) {
    let Some(raw) = get(key) else {
        return;
    };
    match parse(&raw) {
        Some(value) => *slot = value,
        None => tracing::warn!(key, value = %raw, "ignoring unparseable setting"),
    }
}
