//! Interfaces to the OpenCL implementation being traced.
//!
//! The tracer observes the object model and, when it needs the current contents of device
//! memory, asks the execution backend for a blocking read. Both are implemented by the host
//! driver; tests use in-memory fakes.

use thiserror::Error;

use crate::cl::MemObjectType;
use crate::handle::{Handle, ResourceKind};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("{kind:?} {handle} is not a valid object")]
    InvalidObject { kind: ResourceKind, handle: Handle },

    #[error("query on {handle} failed with status {status}")]
    QueryFailed { handle: Handle, status: i32 },

    #[error("blocking read of {len} bytes from {handle} failed with status {status}")]
    ReadFailed {
        handle: Handle,
        len: usize,
        status: i32,
    },
}

/// Geometry of an image object as reported by the object model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub ty: MemObjectType,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub array_size: usize,
    pub element_size: usize,
    pub row_pitch: usize,
    pub slice_pitch: usize,
}

impl ImageInfo {
    /// Region covering the whole image, in the `{x, y, z}` form image commands take. Array
    /// layers occupy the axis after the last spatial one.
    pub fn full_region(&self) -> [usize; 3] {
        match self.ty {
            MemObjectType::Image1D | MemObjectType::Image1DBuffer => [self.width, 1, 1],
            MemObjectType::Image1DArray => [self.width, self.array_size.max(1), 1],
            MemObjectType::Image2D => [self.width, self.height.max(1), 1],
            MemObjectType::Image2DArray => {
                [self.width, self.height.max(1), self.array_size.max(1)]
            }
            _ => [self.width, self.height.max(1), self.depth.max(1)],
        }
    }

    /// Pitches for a read or write of `region` using the requested pitches.
    pub fn pitches(&self, region: [usize; 3], row_pitch: usize, slice_pitch: usize) -> ImagePitches {
        image_pitches(self.ty, region, self.element_size, row_pitch, slice_pitch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemInfo {
    Buffer { size: usize },
    Image(ImageInfo),
    Pipe,
}

/// Row/slice pitch after applying OpenCL's zero-means-packed defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagePitches {
    pub row_pitch: usize,
    pub slice_pitch: usize,
    /// Bytes spanned by `region` with these pitches.
    pub size: usize,
}

/// Resolves the pitches a host-side image transfer uses.
///
/// A zero `row_pitch` means rows are packed (`region[0] * element_size`). Only 3D and array
/// images have slices; for them a zero `slice_pitch` means `row_pitch * region[1]`, for every
/// other type the slice pitch is 0.
pub fn image_pitches(
    ty: MemObjectType,
    region: [usize; 3],
    element_size: usize,
    row_pitch: usize,
    slice_pitch: usize,
) -> ImagePitches {
    let row_pitch = if row_pitch != 0 {
        row_pitch
    } else {
        region[0] * element_size
    };
    let slice_pitch = if !ty.has_slices() {
        0
    } else if slice_pitch != 0 {
        slice_pitch
    } else {
        row_pitch * region[1]
    };
    ImagePitches {
        row_pitch,
        slice_pitch,
        size: region_size(region, element_size, row_pitch, slice_pitch),
    }
}

/// Bytes spanned by a region: every full slice and row before the last one, then the last row.
pub fn region_size(
    region: [usize; 3],
    element_size: usize,
    row_pitch: usize,
    slice_pitch: usize,
) -> usize {
    if region.contains(&0) {
        return 0;
    }
    (region[2] - 1) * slice_pitch + (region[1] - 1) * row_pitch + region[0] * element_size
}

/// Queries the tracer needs from the OpenCL object model.
pub trait ObjectModel {
    /// Current reference count, or `None` if the handle no longer names a live object.
    fn ref_count(&self, kind: ResourceKind, handle: Handle) -> Option<u32>;

    fn is_valid(&self, kind: ResourceKind, handle: Handle) -> bool {
        self.ref_count(kind, handle).is_some()
    }

    fn retain(&mut self, kind: ResourceKind, handle: Handle) -> Result<(), HostError>;

    fn release(&mut self, kind: ResourceKind, handle: Handle) -> Result<(), HostError>;

    /// Context a command queue was created on.
    fn queue_context(&self, queue: Handle) -> Option<Handle>;

    fn mem_info(&self, mem: Handle) -> Result<MemInfo, HostError>;
}

/// Blocking commands the tracer issues against live resources to read their contents.
pub trait ExecutionBackend {
    fn read_buffer(
        &mut self,
        queue: Handle,
        mem: Handle,
        offset: usize,
        size: usize,
    ) -> Result<Vec<u8>, HostError>;

    fn read_image(
        &mut self,
        queue: Handle,
        image: Handle,
        origin: [usize; 3],
        region: [usize; 3],
        row_pitch: usize,
        slice_pitch: usize,
    ) -> Result<Vec<u8>, HostError>;

    /// Maps `size` bytes at `ptr` for reading, copies them out and unmaps.
    fn read_svm(&mut self, queue: Handle, ptr: u64, size: usize) -> Result<Vec<u8>, HostError>;
}

/// Everything the capture session needs from the traced implementation.
pub trait ClHost: ObjectModel + ExecutionBackend {}

impl<T: ObjectModel + ExecutionBackend + ?Sized> ClHost for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_2d_image_has_no_slice_pitch() {
        let p = image_pitches(MemObjectType::Image2D, [4, 2, 1], 4, 0, 0);
        assert_eq!(
            p,
            ImagePitches {
                row_pitch: 16,
                slice_pitch: 0,
                size: 32
            }
        );
    }

    #[test]
    fn explicit_pitches_are_kept_for_3d_images() {
        let p = image_pitches(MemObjectType::Image3D, [4, 2, 3], 4, 32, 100);
        assert_eq!(p.row_pitch, 32);
        assert_eq!(p.slice_pitch, 100);
        assert_eq!(p.size, 2 * 100 + 32 + 16);
    }

    #[test]
    fn array_slice_pitch_defaults_to_rows_times_height() {
        let p = image_pitches(MemObjectType::Image2DArray, [8, 4, 2], 2, 0, 0);
        assert_eq!(p.row_pitch, 16);
        assert_eq!(p.slice_pitch, 64);
        assert_eq!(p.size, 64 + 3 * 16 + 16);
    }

    #[test]
    fn slice_pitch_is_ignored_for_2d_images() {
        let p = image_pitches(MemObjectType::Image2D, [4, 2, 1], 4, 0, 999);
        assert_eq!(p.slice_pitch, 0);
    }

    #[test]
    fn full_region_puts_array_layers_last() {
        let info = ImageInfo {
            ty: MemObjectType::Image1DArray,
            width: 16,
            height: 0,
            depth: 0,
            array_size: 3,
            element_size: 4,
            row_pitch: 64,
            slice_pitch: 64,
        };
        assert_eq!(info.full_region(), [16, 3, 1]);
    }
}
