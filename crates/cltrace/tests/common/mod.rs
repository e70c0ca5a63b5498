#![allow(dead_code)]

use std::collections::HashMap;

use cltrace::host::region_size;
use cltrace::{CaptureConfig, ExecutionBackend, Handle, HostError, ImageInfo, MemInfo, ObjectModel, ResourceKind};

pub const PLATFORM: Handle = Handle(0x10);
pub const DEVICE: Handle = Handle(0x20);
pub const CONTEXT: Handle = Handle(0x30);

struct MockMem {
    info: MemInfo,
    data: Vec<u8>,
    /// Parent buffer and origin of a sub-buffer.
    parent: Option<(Handle, usize)>,
}

/// In-memory stand-in for an OpenCL implementation.
///
/// Objects are plain reference counts. A sub-buffer holds a reference on its parent until it
/// is destroyed, the way conformant implementations behave.
#[derive(Default)]
pub struct MockCl {
    next: u64,
    refs: HashMap<Handle, u32>,
    mems: HashMap<Handle, MockMem>,
    queues: HashMap<Handle, Handle>,
    pub reads: usize,
}

impl MockCl {
    pub fn new() -> Self {
        Self {
            next: 0x1000,
            ..Self::default()
        }
    }

    /// A fresh object with one reference.
    pub fn create(&mut self) -> Handle {
        self.next += 0x10;
        let h = Handle(self.next);
        self.refs.insert(h, 1);
        h
    }

    pub fn create_queue(&mut self, context: Handle) -> Handle {
        let q = self.create();
        self.queues.insert(q, context);
        q
    }

    pub fn create_buffer(&mut self, data: Vec<u8>) -> Handle {
        let h = self.create();
        self.mems.insert(
            h,
            MockMem {
                info: MemInfo::Buffer { size: data.len() },
                data,
                parent: None,
            },
        );
        h
    }

    pub fn create_sub_buffer(&mut self, parent: Handle, origin: usize, size: usize) -> Handle {
        let h = self.create();
        *self.refs.get_mut(&parent).unwrap() += 1;
        self.mems.insert(
            h,
            MockMem {
                info: MemInfo::Buffer { size },
                data: Vec::new(),
                parent: Some((parent, origin)),
            },
        );
        h
    }

    pub fn create_image(&mut self, info: ImageInfo, data: Vec<u8>) -> Handle {
        let h = self.create();
        self.mems.insert(
            h,
            MockMem {
                info: MemInfo::Image(info),
                data,
                parent: None,
            },
        );
        h
    }

    /// What a kernel or a write would do to the device copy.
    pub fn write(&mut self, mem: Handle, offset: usize, bytes: &[u8]) {
        let (target, base) = self.storage(mem);
        let data = &mut self.mems.get_mut(&target).unwrap().data;
        data[base + offset..base + offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn refs(&self, h: Handle) -> u32 {
        self.refs.get(&h).copied().unwrap_or(0)
    }

    pub fn is_alive(&self, h: Handle) -> bool {
        self.refs.contains_key(&h)
    }

    /// The application's own `clRelease*`.
    pub fn app_release(&mut self, h: Handle) {
        self.drop_ref(h);
    }

    fn drop_ref(&mut self, h: Handle) {
        let Some(count) = self.refs.get_mut(&h) else {
            return;
        };
        *count -= 1;
        if *count > 0 {
            return;
        }
        self.refs.remove(&h);
        self.queues.remove(&h);
        if let Some(MockMem {
            parent: Some((parent, _)),
            ..
        }) = self.mems.remove(&h)
        {
            self.drop_ref(parent);
        }
    }

    fn storage(&self, mem: Handle) -> (Handle, usize) {
        match self.mems.get(&mem).and_then(|m| m.parent) {
            Some((parent, origin)) => (parent, origin),
            None => (mem, 0),
        }
    }
}

impl ObjectModel for MockCl {
    fn ref_count(&self, _kind: ResourceKind, handle: Handle) -> Option<u32> {
        self.refs.get(&handle).copied()
    }

    fn retain(&mut self, kind: ResourceKind, handle: Handle) -> Result<(), HostError> {
        match self.refs.get_mut(&handle) {
            Some(count) => {
                *count += 1;
                Ok(())
            }
            None => Err(HostError::InvalidObject { kind, handle }),
        }
    }

    fn release(&mut self, kind: ResourceKind, handle: Handle) -> Result<(), HostError> {
        if !self.refs.contains_key(&handle) {
            return Err(HostError::InvalidObject { kind, handle });
        }
        self.drop_ref(handle);
        Ok(())
    }

    fn queue_context(&self, queue: Handle) -> Option<Handle> {
        self.queues.get(&queue).copied()
    }

    fn mem_info(&self, mem: Handle) -> Result<MemInfo, HostError> {
        self.mems.get(&mem).map(|m| m.info).ok_or(HostError::InvalidObject {
            kind: ResourceKind::Mem,
            handle: mem,
        })
    }
}

impl ExecutionBackend for MockCl {
    fn read_buffer(&mut self, _queue: Handle, mem: Handle, offset: usize, size: usize) -> Result<Vec<u8>, HostError> {
        self.reads += 1;
        let (target, base) = self.storage(mem);
        let data = &self.mems[&target].data;
        Ok(data[base + offset..base + offset + size].to_vec())
    }

    fn read_image(
        &mut self,
        _queue: Handle,
        image: Handle,
        _origin: [usize; 3],
        region: [usize; 3],
        row_pitch: usize,
        slice_pitch: usize,
    ) -> Result<Vec<u8>, HostError> {
        self.reads += 1;
        let mem = &self.mems[&image];
        let elem = match mem.info {
            MemInfo::Image(info) => info.element_size,
            _ => 1,
        };
        let size = region_size(region, elem, row_pitch, slice_pitch);
        Ok(mem.data[..size].to_vec())
    }

    fn read_svm(&mut self, _queue: Handle, _ptr: u64, size: usize) -> Result<Vec<u8>, HostError> {
        self.reads += 1;
        Ok(vec![0; size])
    }
}

pub fn config(dir: &tempfile::TempDir, frame_start: u32, frame_end: u32) -> CaptureConfig {
    CaptureConfig {
        out_dir: dir.path().to_path_buf(),
        frame_start,
        frame_end,
        label: "app".into(),
        block_size: 1 << 12,
        resident_size: 1 << 14,
        ..CaptureConfig::default()
    }
}

pub fn names(calls: &[cltrace::CallCapture]) -> Vec<&str> {
    calls.iter().map(|c| c.name()).collect()
}
