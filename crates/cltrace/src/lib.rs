//! Capture of OpenCL API calls into compilable C++ replays.
//!
//! An interception layer describes every call it forwards as a [`CallCapture`] (the
//! [`capture`] module has one builder per entry point) and hands it to a [`CaptureSession`]
//! together with a [`ClHost`], the session's view of the live implementation. For a
//! configured frame window the session writes:
//!
//! - `SetupFirstFrame`: the calls made before the window that still matter, plus writes
//!   restoring memory those calls left behind
//! - one `ReplayFrameN` function per captured frame
//! - `InitReplay`/`ResetReplay` and the resource maps in `<label>.h`/`<label>.cpp`
//! - the binary data file every large argument lives in ([`binary`])
//! - `<label>.json` ([`metadata`]) and `<label>_OpenCL_info.json` ([`info`])
//!
//! A frame ends at each kernel launch.

pub mod binary;
pub mod call;
pub mod capture;
pub mod cl;
mod config;
pub mod entry_point;
mod error;
mod graph;
mod handle;
pub mod host;
mod index;
pub mod info;
pub mod metadata;
pub mod param;
pub mod prune;
pub mod replay;
mod session;
pub mod snapshot;

pub use binary::{BinaryDataLoader, BinaryDataStore, BinaryFileIndexInfo, BinaryStoreOptions, Compression};
pub use call::{CallCapture, CallTarget};
pub use config::CaptureConfig;
pub use entry_point::EntryPoint;
pub use error::{CaptureError, Result};
pub use graph::{ProgramRelease, ResourceGraph};
pub use handle::{Handle, ResourceKind};
pub use host::{ClHost, ExecutionBackend, HostError, ImageInfo, MemInfo, ObjectModel};
pub use index::{ResourceIndexTracker, INDEX_NOT_PRESENT};
pub use metadata::TraceJson;
pub use prune::PruneMode;
pub use replay::ReplayWriter;
pub use session::{CaptureSession, UPDATE_CONTEXT_PROPS_NO_PLATFORM, UPDATE_CONTEXT_PROPS_WITH_PLATFORM};
pub use snapshot::SnapshotEngine;
