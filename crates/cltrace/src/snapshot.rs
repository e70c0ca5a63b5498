//! Dirty-memory tracking and the synthetic calls that restore device memory at replay time.
//!
//! Commands issued before the capture window are not replayed, so the bytes they left in
//! buffers, images and SVM allocations are read back during capture and written again by
//! synthetic calls. During the window the same mechanism covers host writes through mapped
//! pointers, which no captured command describes.

use std::collections::{BTreeSet, HashMap};

use crate::call::CallCapture;
use crate::capture;
use crate::cl::{MapFlags, CL_SUCCESS};
use crate::error::{CaptureError, Result};
use crate::handle::{Handle, ResourceKind};
use crate::host::{ClHost, ImagePitches, MemInfo};

/// Host region a map call exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapRegion {
    Buffer {
        offset: usize,
        size: usize,
    },
    Image {
        origin: [usize; 3],
        region: [usize; 3],
        row_pitch: usize,
        slice_pitch: usize,
    },
}

/// A live mapping, keyed by the pointer the map call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapRecord {
    pub queue: Handle,
    pub mem: Handle,
    pub flags: MapFlags,
    pub region: MapRegion,
}

/// Synthetic calls produced by one snapshot pass.
#[derive(Debug, Default)]
pub struct Snapshot {
    /// Calls that must run before the call that triggered the pass.
    pub before: Vec<CallCapture>,
    /// Calls appended after it.
    pub after: Vec<CallCapture>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }
}

/// The unmap currently being captured, when that is what triggered the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnmapTrigger {
    pub mem: Handle,
    pub mapped_ptr: u64,
}

#[derive(Debug, Default)]
pub struct SnapshotEngine {
    dirty_mems: Vec<Handle>,
    dirty_svm: Vec<u64>,
    svm_sizes: HashMap<u64, usize>,
    maps: HashMap<u64, MapRecord>,
    implicit_retains: BTreeSet<Handle>,
    queue: Option<Handle>,
}

impl SnapshotEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_mem_dirty(&mut self, mem: Handle) {
        if !self.dirty_mems.contains(&mem) {
            self.dirty_mems.push(mem);
        }
    }

    pub fn clear_mem(&mut self, mem: Handle) {
        self.dirty_mems.retain(|&m| m != mem);
    }

    pub fn is_mem_dirty(&self, mem: Handle) -> bool {
        self.dirty_mems.contains(&mem)
    }

    pub fn dirty_mems(&self) -> &[Handle] {
        &self.dirty_mems
    }

    pub fn mark_svm_dirty(&mut self, ptr: u64) {
        if !self.dirty_svm.contains(&ptr) {
            self.dirty_svm.push(ptr);
        }
    }

    pub fn clear_svm(&mut self, ptr: u64) {
        self.dirty_svm.retain(|&p| p != ptr);
    }

    pub fn dirty_svm(&self) -> &[u64] {
        &self.dirty_svm
    }

    pub fn record_svm_alloc(&mut self, ptr: u64, size: usize) {
        self.svm_sizes.insert(ptr, size);
    }

    pub fn forget_svm(&mut self, ptr: u64) {
        self.clear_svm(ptr);
        self.svm_sizes.remove(&ptr);
    }

    pub fn svm_size(&self, ptr: u64) -> Option<usize> {
        self.svm_sizes.get(&ptr).copied()
    }

    pub fn record_map(&mut self, mapped_ptr: u64, record: MapRecord) {
        self.maps.insert(mapped_ptr, record);
    }

    pub fn map_record(&self, mapped_ptr: u64) -> Option<&MapRecord> {
        self.maps.get(&mapped_ptr)
    }

    pub fn take_map(&mut self, mapped_ptr: u64) -> Option<MapRecord> {
        self.maps.remove(&mapped_ptr)
    }

    /// Queue the snapshot reads are issued on; the most recent queue the application used.
    pub fn set_queue(&mut self, queue: Handle) {
        self.queue = Some(queue);
    }

    pub fn queue(&self) -> Option<Handle> {
        self.queue
    }

    /// Takes the extra reference that keeps a pre-window memory object readable until its
    /// contents are snapshotted.
    pub fn retain_implicitly<H: ClHost + ?Sized>(&mut self, host: &mut H, mem: Handle) -> Result<()> {
        if self.implicit_retains.insert(mem) {
            host.retain(ResourceKind::Mem, mem)?;
        }
        Ok(())
    }

    pub fn holds_implicit_retain(&self, mem: Handle) -> bool {
        self.implicit_retains.contains(&mem)
    }

    /// Drops the implicit reference on `mem`, if one is held.
    pub fn release_implicit<H: ClHost + ?Sized>(&mut self, host: &mut H, mem: Handle) -> Result<bool> {
        if self.implicit_retains.remove(&mem) {
            host.release(ResourceKind::Mem, mem)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Releases every implicit reference still held.
    pub fn release_all_implicit<H: ClHost + ?Sized>(&mut self, host: &mut H) -> Result<()> {
        for mem in std::mem::take(&mut self.implicit_retains) {
            host.release(ResourceKind::Mem, mem)?;
        }
        Ok(())
    }

    /// Reads every dirty object back and synthesizes the calls that restore it, then clears
    /// the dirty set.
    ///
    /// When `trigger` names an unmap, the object it unmaps is restored through a `memcpy`
    /// into the mapped pointer ahead of the unmap, limited to the mapped region.
    pub fn synthesize<H: ClHost + ?Sized>(
        &mut self,
        host: &mut H,
        trigger: Option<UnmapTrigger>,
    ) -> Result<Snapshot> {
        let mut snapshot = Snapshot::default();
        if self.dirty_mems.is_empty() && self.dirty_svm.is_empty() {
            return Ok(snapshot);
        }
        let Some(queue) = self.queue else {
            // Nothing was ever enqueued, so device memory still holds what the creates set.
            tracing::debug!(
                mems = self.dirty_mems.len(),
                svm = self.dirty_svm.len(),
                "no command queue seen yet; skipping snapshot"
            );
            self.dirty_mems.clear();
            self.dirty_svm.clear();
            return Ok(snapshot);
        };

        for mem in std::mem::take(&mut self.dirty_mems) {
            match trigger {
                Some(t) if t.mem == mem => {
                    let record = self
                        .maps
                        .get(&t.mapped_ptr)
                        .copied()
                        .ok_or(CaptureError::MissingMapCall(Handle(t.mapped_ptr)))?;
                    if let Some(call) = mapped_copy(host, queue, &record, t.mapped_ptr)? {
                        snapshot.before.push(call);
                    }
                }
                _ => {
                    if let Some(call) = full_write(host, queue, mem)? {
                        snapshot.after.push(call);
                    }
                    self.release_implicit(host, mem)?;
                }
            }
        }

        for ptr in std::mem::take(&mut self.dirty_svm) {
            let Some(size) = self.svm_sizes.get(&ptr).copied() else {
                tracing::warn!(ptr = %Handle(ptr), "dirty SVM pointer without a recorded allocation size");
                continue;
            };
            let bytes = host.read_svm(queue, ptr, size)?;
            check_len("clEnqueueSVMMemcpy", "src_ptr", size, bytes.len())?;
            snapshot.after.push(capture::enqueue_svm_memcpy(
                queue,
                true,
                ptr,
                &bytes,
                &[],
                None,
                CL_SUCCESS,
            ));
        }

        tracing::debug!(
            before = snapshot.before.len(),
            after = snapshot.after.len(),
            "synthesized memory snapshot"
        );
        Ok(snapshot)
    }
}

fn check_len(entry_point: &'static str, name: &'static str, expected: usize, found: usize) -> Result<()> {
    if found < expected {
        return Err(CaptureError::PayloadTooShort {
            entry_point,
            name,
            expected,
            found,
        });
    }
    Ok(())
}

/// Whole-object restore: `clEnqueueWriteBuffer` or `clEnqueueWriteImage` of everything the
/// object holds right now.
fn full_write<H: ClHost + ?Sized>(host: &mut H, queue: Handle, mem: Handle) -> Result<Option<CallCapture>> {
    match host.mem_info(mem)? {
        MemInfo::Buffer { size } => {
            let mut bytes = host.read_buffer(queue, mem, 0, size)?;
            check_len("clEnqueueWriteBuffer", "ptr", size, bytes.len())?;
            bytes.truncate(size);
            Ok(Some(capture::enqueue_write_buffer(
                queue, mem, true, 0, &bytes, &[], None, CL_SUCCESS,
            )))
        }
        MemInfo::Image(info) => {
            let region = info.full_region();
            let ImagePitches {
                row_pitch,
                slice_pitch,
                size,
            } = info.pitches(region, info.row_pitch, info.slice_pitch);
            let mut bytes = host.read_image(queue, mem, [0; 3], region, row_pitch, slice_pitch)?;
            check_len("clEnqueueWriteImage", "ptr", size, bytes.len())?;
            bytes.truncate(size);
            Ok(Some(capture::enqueue_write_image(
                queue,
                mem,
                true,
                [0; 3],
                region,
                row_pitch,
                slice_pitch,
                &bytes,
                &[],
                None,
                CL_SUCCESS,
            )))
        }
        MemInfo::Pipe => {
            tracing::warn!(%mem, "pipe contents cannot be snapshotted; skipping");
            Ok(None)
        }
    }
}

/// `std::memcpy(mapped_ptr, bytes, size)` of the mapped region's current contents.
fn mapped_copy<H: ClHost + ?Sized>(
    host: &mut H,
    queue: Handle,
    record: &MapRecord,
    mapped_ptr: u64,
) -> Result<Option<CallCapture>> {
    let bytes = match record.region {
        MapRegion::Buffer { offset, size } => {
            let mut bytes = host.read_buffer(queue, record.mem, offset, size)?;
            check_len("std::memcpy", "src", size, bytes.len())?;
            bytes.truncate(size);
            bytes
        }
        MapRegion::Image {
            origin,
            region,
            row_pitch,
            slice_pitch,
        } => {
            let info = match host.mem_info(record.mem)? {
                MemInfo::Image(info) => info,
                _ => {
                    return Err(CaptureError::ParamTypeMismatch {
                        entry_point: "clEnqueueMapImage",
                        name: "image",
                    })
                }
            };
            let pitches = info.pitches(region, row_pitch, slice_pitch);
            let mut bytes = host.read_image(
                queue,
                record.mem,
                origin,
                region,
                pitches.row_pitch,
                pitches.slice_pitch,
            )?;
            check_len("std::memcpy", "src", pitches.size, bytes.len())?;
            bytes.truncate(pitches.size);
            bytes
        }
    };
    if bytes.is_empty() {
        return Ok(None);
    }
    Ok(Some(memcpy_call(mapped_ptr, &bytes)))
}

pub const MEMCPY: &str = "std::memcpy";

pub fn memcpy_call(dst: u64, bytes: &[u8]) -> CallCapture {
    CallCapture::custom(MEMCPY)
        .pointer("dst", dst)
        .bytes("src", Some(bytes))
        .size("n", bytes.len())
}
