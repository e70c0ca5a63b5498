//! OpenCL constants the tracer needs to interpret captured arguments.

use bitflags::bitflags;

pub const CL_SUCCESS: i32 = 0;
pub const CL_COMPLETE: i32 = 0;
pub const CL_TRUE: u32 = 1;
pub const CL_FALSE: u32 = 0;

pub const CL_CONTEXT_PLATFORM: u64 = 0x1084;

bitflags! {
    /// `cl_map_flags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MapFlags: u64 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const WRITE_INVALIDATE_REGION = 1 << 2;
    }
}

impl MapFlags {
    /// Whether an unmap of a pointer mapped with these flags may have changed device memory.
    pub fn writes(self) -> bool {
        self.intersects(MapFlags::WRITE | MapFlags::WRITE_INVALIDATE_REGION)
    }
}

bitflags! {
    /// `cl_mem_flags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemFlags: u64 {
        const READ_WRITE = 1 << 0;
        const WRITE_ONLY = 1 << 1;
        const READ_ONLY = 1 << 2;
        const USE_HOST_PTR = 1 << 3;
        const ALLOC_HOST_PTR = 1 << 4;
        const COPY_HOST_PTR = 1 << 5;
        const HOST_WRITE_ONLY = 1 << 7;
        const HOST_READ_ONLY = 1 << 8;
        const HOST_NO_ACCESS = 1 << 9;
        const SVM_FINE_GRAIN_BUFFER = 1 << 10;
        const SVM_ATOMICS = 1 << 11;
        const KERNEL_READ_AND_WRITE = 1 << 12;
    }
}

impl MemFlags {
    /// Whether creating a memory object with these flags reads `host_ptr`.
    pub fn reads_host_ptr(self) -> bool {
        self.intersects(MemFlags::USE_HOST_PTR | MemFlags::COPY_HOST_PTR)
    }
}

/// `cl_mem_object_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemObjectType {
    Buffer,
    Image2D,
    Image3D,
    Image2DArray,
    Image1D,
    Image1DArray,
    Image1DBuffer,
    Pipe,
}

impl MemObjectType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0x10F0 => MemObjectType::Buffer,
            0x10F1 => MemObjectType::Image2D,
            0x10F2 => MemObjectType::Image3D,
            0x10F3 => MemObjectType::Image2DArray,
            0x10F4 => MemObjectType::Image1D,
            0x10F5 => MemObjectType::Image1DArray,
            0x10F6 => MemObjectType::Image1DBuffer,
            0x10F7 => MemObjectType::Pipe,
            _ => return None,
        })
    }

    pub fn raw(self) -> u32 {
        match self {
            MemObjectType::Buffer => 0x10F0,
            MemObjectType::Image2D => 0x10F1,
            MemObjectType::Image3D => 0x10F2,
            MemObjectType::Image2DArray => 0x10F3,
            MemObjectType::Image1D => 0x10F4,
            MemObjectType::Image1DArray => 0x10F5,
            MemObjectType::Image1DBuffer => 0x10F6,
            MemObjectType::Pipe => 0x10F7,
        }
    }

    pub fn is_image(self) -> bool {
        !matches!(self, MemObjectType::Buffer | MemObjectType::Pipe)
    }

    /// Image types whose layout has a meaningful slice pitch.
    pub fn has_slices(self) -> bool {
        matches!(
            self,
            MemObjectType::Image3D | MemObjectType::Image2DArray | MemObjectType::Image1DArray
        )
    }
}

/// `cl_image_format`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFormat {
    pub channel_order: u32,
    pub channel_data_type: u32,
}

impl ImageFormat {
    pub fn to_bytes(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.channel_order.to_le_bytes());
        out[4..].copy_from_slice(&self.channel_data_type.to_le_bytes());
        out
    }
}

/// `cl_image_desc`, laid out as on a 64-bit host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub image_type: MemObjectType,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub array_size: usize,
    pub row_pitch: usize,
    pub slice_pitch: usize,
    pub num_mip_levels: u32,
    pub num_samples: u32,
    /// `buffer`/`mem_object` member; null when the image is not backed by another object.
    pub mem_object: crate::handle::Handle,
}

impl ImageDesc {
    pub const SIZE: usize = 72;

    /// Byte offset of `mem_object` within the structure.
    pub const MEM_OBJECT_OFFSET: usize = 64;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.image_type.raw().to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);
        for v in [
            self.width,
            self.height,
            self.depth,
            self.array_size,
            self.row_pitch,
            self.slice_pitch,
        ] {
            out.extend_from_slice(&(v as u64).to_le_bytes());
        }
        out.extend_from_slice(&self.num_mip_levels.to_le_bytes());
        out.extend_from_slice(&self.num_samples.to_le_bytes());
        out.extend_from_slice(&self.mem_object.0.to_le_bytes());
        out
    }
}

/// `cl_buffer_region`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRegion {
    pub origin: usize,
    pub size: usize,
}

impl BufferRegion {
    pub fn to_bytes(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&(self.origin as u64).to_le_bytes());
        out[8..].copy_from_slice(&(self.size as u64).to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_map_flags_are_detected() {
        assert!(!MapFlags::READ.writes());
        assert!(MapFlags::WRITE.writes());
        assert!((MapFlags::READ | MapFlags::WRITE_INVALIDATE_REGION).writes());
    }

    #[test]
    fn only_3d_and_array_images_have_slices() {
        assert!(MemObjectType::Image3D.has_slices());
        assert!(MemObjectType::Image1DArray.has_slices());
        assert!(!MemObjectType::Image2D.has_slices());
        assert!(!MemObjectType::Image1DBuffer.has_slices());
        assert_eq!(MemObjectType::from_raw(0x10F3), Some(MemObjectType::Image2DArray));
    }

    #[test]
    fn image_desc_layout_puts_mem_object_last() {
        let desc = ImageDesc {
            image_type: MemObjectType::Image1DBuffer,
            width: 64,
            height: 0,
            depth: 0,
            array_size: 0,
            row_pitch: 0,
            slice_pitch: 0,
            num_mip_levels: 0,
            num_samples: 0,
            mem_object: crate::handle::Handle(0xabcd),
        };
        let bytes = desc.to_bytes();
        assert_eq!(bytes.len(), ImageDesc::SIZE);
        assert_eq!(&bytes[..4], &0x10F6u32.to_le_bytes());
        assert_eq!(
            &bytes[ImageDesc::MEM_OBJECT_OFFSET..],
            &0xabcdu64.to_le_bytes()
        );
    }
}
