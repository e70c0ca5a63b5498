//! Typed storage for captured API arguments and return values.

use crate::handle::{Handle, ResourceKind};

/// Identity of one captured parameter occurrence.
///
/// Ids are handed out by the capture session when a call enters it and stay attached to the
/// parameter for its whole life, so caches keyed by id survive the call being moved between
/// the frame and setup lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ParamId(pub u64);

/// Which kind of property list a properties parameter holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertiesKind {
    Context,
    Queue,
    Mem,
    Sampler,
    Pipe,
    DevicePartition,
}

impl PropertiesKind {
    pub fn c_type(self) -> &'static str {
        match self {
            PropertiesKind::Context => "cl_context_properties",
            PropertiesKind::Queue => "cl_queue_properties",
            PropertiesKind::Mem => "cl_mem_properties",
            PropertiesKind::Sampler => "cl_sampler_properties",
            PropertiesKind::Pipe => "cl_pipe_properties",
            PropertiesKind::DevicePartition => "cl_device_partition_property",
        }
    }
}

/// C-level type of a parameter, which decides how the writer renders it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    UInt,
    Int,
    Bool,
    /// `cl_bitfield` derived flags, rendered in hex.
    Bitfield,
    /// `cl_uint` enumerant, rendered in hex.
    Enum,
    SizeT,
    ULong,
    /// A single handle passed by value.
    Handle(ResourceKind),
    /// Pointer to a handle the call writes (e.g. `cl_event *event`).
    HandleOut(ResourceKind),
    /// Input array of handles (wait lists, device lists, mem lists).
    HandleArray(ResourceKind),
    /// Output array of handles filled by the call (`clGetDeviceIDs` and friends).
    HandleArrayOut(ResourceKind),
    /// `const size_t *` with a small fixed element count (origins, regions, work sizes).
    SizeTArray,
    /// `const void *` whose bytes must be preserved.
    ConstVoidPointer,
    /// `void *` destination or mapped/SVM address, kept as a raw address.
    VoidPointer,
    /// Array of SVM pointers.
    VoidPointerArray,
    /// Byte offsets into another argument (`args_mem_loc` of native kernels).
    OffsetArray,
    /// `const char *`
    String,
    /// `const char **` program sources.
    StringArray,
    /// `const unsigned char **` program binaries.
    BinaryArray,
    Properties(PropertiesKind),
    ImageFormat,
    ImageDesc,
    /// `const void *buffer_create_info` of `clCreateSubBuffer`.
    BufferRegion,
    /// Function pointer callbacks, never replayed.
    Callback,
    /// Opaque user data handed to callbacks.
    UserData,
    /// `cl_int *errcode_ret` and other scalar out-pointers the replay ignores.
    ScalarOut,
    /// `void *param_value` of info queries.
    InfoOut,
    /// `clSetKernelArg` value that holds a handle of a captured object, rendered as the address
    /// of its map slot.
    ArgHandle(ResourceKind),
}

impl ParamType {
    /// Spelling of the type in generated C++.
    pub fn c_type(self) -> &'static str {
        match self {
            ParamType::UInt => "cl_uint",
            ParamType::Int => "cl_int",
            ParamType::Bool => "cl_bool",
            ParamType::Bitfield => "cl_bitfield",
            ParamType::Enum => "cl_uint",
            ParamType::SizeT => "size_t",
            ParamType::ULong => "cl_ulong",
            ParamType::Handle(kind) => kind.c_type(),
            ParamType::HandleOut(_) | ParamType::HandleArrayOut(_) => "void *",
            ParamType::HandleArray(_) => "const void *",
            ParamType::SizeTArray | ParamType::OffsetArray => "const size_t *",
            ParamType::ConstVoidPointer | ParamType::BufferRegion => "const void *",
            ParamType::VoidPointer | ParamType::UserData | ParamType::InfoOut => "void *",
            ParamType::VoidPointerArray => "void **",
            ParamType::String => "const char *",
            ParamType::StringArray => "const char **",
            ParamType::BinaryArray => "const unsigned char **",
            ParamType::Properties(kind) => kind.c_type(),
            ParamType::ImageFormat => "const cl_image_format *",
            ParamType::ImageDesc => "const cl_image_desc *",
            ParamType::Callback => "void *",
            ParamType::ScalarOut => "void *",
            ParamType::ArgHandle(_) => "const void *",
        }
    }

    /// Resource kind named by handle-typed parameters.
    pub fn resource_kind(self) -> Option<ResourceKind> {
        match self {
            ParamType::Handle(kind)
            | ParamType::HandleOut(kind)
            | ParamType::HandleArray(kind)
            | ParamType::HandleArrayOut(kind)
            | ParamType::ArgHandle(kind) => Some(kind),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Null,
    U32(u32),
    I32(i32),
    U64(u64),
    Bool(bool),
    Handle(Handle),
    Handles(Vec<Handle>),
    Pointer(u64),
    Pointers(Vec<u64>),
    Offsets(Vec<usize>),
    Str(String),
    Strings(Vec<String>),
    Blobs(Vec<Box<[u8]>>),
}

impl ParamValue {
    pub fn is_null(&self) -> bool {
        match self {
            ParamValue::Null => true,
            ParamValue::Handle(h) => h.is_null(),
            ParamValue::Pointer(p) => *p == 0,
            _ => false,
        }
    }
}

/// One captured argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamCapture {
    pub id: ParamId,
    pub name: &'static str,
    pub ty: ParamType,
    pub value: ParamValue,
    /// Bytes the argument pointed at. `None` means the pointer was `NULL` (or the argument is
    /// not a pointer); `Some` of an empty slice means a non-null pointer to zero bytes.
    pub payload: Option<Box<[u8]>>,
}

impl ParamCapture {
    pub fn new(name: &'static str, ty: ParamType, value: ParamValue) -> Self {
        Self {
            id: ParamId::default(),
            name,
            ty,
            value,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Option<&[u8]>) -> Self {
        self.payload = payload.map(Box::from);
        self
    }

    pub fn handle(&self) -> Option<Handle> {
        match self.value {
            ParamValue::Handle(h) if !h.is_null() => Some(h),
            _ => None,
        }
    }

    pub fn handles(&self) -> &[Handle] {
        match &self.value {
            ParamValue::Handles(v) => v,
            _ => &[],
        }
    }

    pub fn pointer(&self) -> Option<u64> {
        match self.value {
            ParamValue::Pointer(p) if p != 0 => Some(p),
            _ => None,
        }
    }

    /// Integer view of scalar values.
    pub fn as_u64(&self) -> Option<u64> {
        match self.value {
            ParamValue::U32(v) => Some(u64::from(v)),
            ParamValue::I32(v) => u64::try_from(v).ok(),
            ParamValue::U64(v) => Some(v),
            ParamValue::Bool(v) => Some(u64::from(v)),
            _ => None,
        }
    }

    pub fn as_usize(&self) -> Option<usize> {
        self.as_u64().and_then(|v| usize::try_from(v).ok())
    }

    /// Reads the payload as a list of native-endian `size_t` values.
    pub fn size_t_values(&self) -> Vec<usize> {
        self.payload
            .as_deref()
            .map(|bytes| {
                bytes
                    .chunks_exact(std::mem::size_of::<u64>())
                    .filter_map(|c| c.try_into().ok().map(u64::from_le_bytes))
                    .filter_map(|v| usize::try_from(v).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Number of elements of a zero-terminated key/value property list to capture, terminator
/// included. Lists missing their terminator are captured whole.
pub fn properties_len(props: &[u64]) -> usize {
    let mut i = 0;
    while i < props.len() {
        if props[i] == 0 {
            return i + 1;
        }
        i += 2;
    }
    props.len()
}

/// Serializes `u64` elements (property lists, `size_t` arrays) into a payload.
pub fn u64_payload(values: &[u64]) -> Box<[u8]> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Serializes `size_t` elements into a payload.
pub fn usize_payload(values: &[usize]) -> Box<[u8]> {
    values.iter().flat_map(|v| (*v as u64).to_le_bytes()).collect()
}

/// Decodes a payload written by [`u64_payload`].
pub fn payload_u64s(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks_exact(8)
        .filter_map(|c| c.try_into().ok().map(u64::from_le_bytes))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_scan_stops_at_key_terminator() {
        // A zero value must not be mistaken for the terminator.
        let props = [0x1084, 0, 0x2000, 5, 0, 99, 99];
        assert_eq!(properties_len(&props), 5);
        assert_eq!(properties_len(&[]), 0);
        assert_eq!(properties_len(&[0]), 1);
        assert_eq!(properties_len(&[7, 8]), 2);
    }

    #[test]
    fn null_pointer_is_distinct_from_empty_payload() {
        let null = ParamCapture::new("host_ptr", ParamType::ConstVoidPointer, ParamValue::Null)
            .with_payload(None);
        let empty =
            ParamCapture::new("host_ptr", ParamType::ConstVoidPointer, ParamValue::Pointer(8))
                .with_payload(Some(&[][..]));
        assert!(null.payload.is_none());
        assert_eq!(empty.payload.as_deref(), Some(&[][..]));
    }

    #[test]
    fn size_t_payload_decodes() {
        let p = ParamCapture::new("region", ParamType::SizeTArray, ParamValue::Pointer(1))
            .with_payload(Some(&usize_payload(&[4, 2, 1])[..]));
        assert_eq!(p.size_t_values(), vec![4, 2, 1]);
    }
}
