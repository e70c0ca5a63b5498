//! One intercepted API invocation (or synthetic call) and the builder used to assemble it.

use crate::cl::{BufferRegion, ImageDesc, ImageFormat};
use crate::entry_point::EntryPoint;
use crate::error::{CaptureError, Result};
use crate::handle::{Handle, ResourceKind};
use crate::param::{
    properties_len, u64_payload, usize_payload, ParamCapture, ParamType, ParamValue,
    PropertiesKind,
};

/// What a call record invokes at replay time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    Api(EntryPoint),
    /// Fixture helpers and raw statements such as `std::memcpy`.
    Custom(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallCapture {
    pub target: CallTarget,
    pub params: Vec<ParamCapture>,
    pub return_value: Option<ParamCapture>,
    /// Inactive calls were neutralized by pruning and are only emitted to the inactive setup
    /// function.
    pub is_active: bool,
    /// Replaces the rendered call name, used for extension function lookups assigned into a
    /// static function pointer.
    pub assign_to: Option<String>,
}

impl CallCapture {
    pub fn new(entry_point: EntryPoint) -> Self {
        Self {
            target: CallTarget::Api(entry_point),
            params: Vec::new(),
            return_value: None,
            is_active: true,
            assign_to: None,
        }
    }

    pub fn custom(name: impl Into<String>) -> Self {
        Self {
            target: CallTarget::Custom(name.into()),
            params: Vec::new(),
            return_value: None,
            is_active: true,
            assign_to: None,
        }
    }

    pub fn name(&self) -> &str {
        match &self.target {
            CallTarget::Api(ep) => ep.name(),
            CallTarget::Custom(name) => name,
        }
    }

    pub fn entry_point(&self) -> Option<EntryPoint> {
        match self.target {
            CallTarget::Api(ep) => Some(ep),
            CallTarget::Custom(_) => None,
        }
    }

    fn entry_point_name(&self) -> &'static str {
        self.entry_point().map(EntryPoint::name).unwrap_or("custom call")
    }

    /// Looks a parameter up by name, checking the expected position first.
    pub fn param(&self, name: &'static str, index: usize) -> Result<&ParamCapture> {
        match self.params.get(index) {
            Some(p) if p.name == name => Ok(p),
            _ => self
                .params
                .iter()
                .find(|p| p.name == name)
                .ok_or(CaptureError::MissingParam {
                    entry_point: self.entry_point_name(),
                    name,
                    index,
                }),
        }
    }

    pub fn param_mut(&mut self, name: &'static str, index: usize) -> Result<&mut ParamCapture> {
        let entry_point = self.entry_point_name();
        let pos = match self.params.get(index) {
            Some(p) if p.name == name => Some(index),
            _ => self.params.iter().position(|p| p.name == name),
        };
        match pos {
            Some(pos) => Ok(&mut self.params[pos]),
            None => Err(CaptureError::MissingParam {
                entry_point,
                name,
                index,
            }),
        }
    }

    pub fn find(&self, name: &str) -> Option<&ParamCapture> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn handle_param(&self, name: &'static str, index: usize) -> Result<Handle> {
        let param = self.param(name, index)?;
        match param.value {
            ParamValue::Handle(h) => Ok(h),
            _ => Err(CaptureError::ParamTypeMismatch {
                entry_point: self.entry_point_name(),
                name,
            }),
        }
    }

    pub fn scalar_param(&self, name: &'static str, index: usize) -> Result<u64> {
        let param = self.param(name, index)?;
        param.as_u64().ok_or(CaptureError::ParamTypeMismatch {
            entry_point: self.entry_point_name(),
            name,
        })
    }

    /// Handle produced through the return value, if any.
    pub fn returned_handle(&self) -> Option<Handle> {
        self.return_value.as_ref().and_then(ParamCapture::handle)
    }

    pub fn returned_pointer(&self) -> Option<u64> {
        self.return_value.as_ref().and_then(ParamCapture::pointer)
    }

    fn push(mut self, param: ParamCapture) -> Self {
        self.params.push(param);
        self
    }

    pub fn uint(self, name: &'static str, v: u32) -> Self {
        self.push(ParamCapture::new(name, ParamType::UInt, ParamValue::U32(v)))
    }

    pub fn int(self, name: &'static str, v: i32) -> Self {
        self.push(ParamCapture::new(name, ParamType::Int, ParamValue::I32(v)))
    }

    pub fn boolean(self, name: &'static str, v: bool) -> Self {
        self.push(ParamCapture::new(name, ParamType::Bool, ParamValue::Bool(v)))
    }

    pub fn bitfield(self, name: &'static str, v: u64) -> Self {
        self.push(ParamCapture::new(name, ParamType::Bitfield, ParamValue::U64(v)))
    }

    pub fn enumerant(self, name: &'static str, v: u32) -> Self {
        self.push(ParamCapture::new(name, ParamType::Enum, ParamValue::U32(v)))
    }

    pub fn size(self, name: &'static str, v: usize) -> Self {
        self.push(ParamCapture::new(
            name,
            ParamType::SizeT,
            ParamValue::U64(v as u64),
        ))
    }

    pub fn ulong(self, name: &'static str, v: u64) -> Self {
        self.push(ParamCapture::new(name, ParamType::ULong, ParamValue::U64(v)))
    }

    pub fn handle(self, name: &'static str, kind: ResourceKind, h: Handle) -> Self {
        self.push(ParamCapture::new(
            name,
            ParamType::Handle(kind),
            ParamValue::Handle(h),
        ))
    }

    /// Out-pointer to a single handle; `None` when the application passed `NULL`.
    pub fn handle_out(self, name: &'static str, kind: ResourceKind, h: Option<Handle>) -> Self {
        let value = h.map(ParamValue::Handle).unwrap_or(ParamValue::Null);
        self.push(ParamCapture::new(name, ParamType::HandleOut(kind), value))
    }

    pub fn handle_array(
        self,
        name: &'static str,
        kind: ResourceKind,
        hs: Option<&[Handle]>,
    ) -> Self {
        let value = hs
            .map(|hs| ParamValue::Handles(hs.to_vec()))
            .unwrap_or(ParamValue::Null);
        self.push(ParamCapture::new(name, ParamType::HandleArray(kind), value))
    }

    pub fn handle_array_out(
        self,
        name: &'static str,
        kind: ResourceKind,
        hs: Option<&[Handle]>,
    ) -> Self {
        let value = hs
            .map(|hs| ParamValue::Handles(hs.to_vec()))
            .unwrap_or(ParamValue::Null);
        self.push(ParamCapture::new(name, ParamType::HandleArrayOut(kind), value))
    }

    pub fn size_array(self, name: &'static str, v: Option<&[usize]>) -> Self {
        let value = if v.is_some() {
            ParamValue::Pointer(1)
        } else {
            ParamValue::Null
        };
        let payload = v.map(usize_payload);
        let mut p = ParamCapture::new(name, ParamType::SizeTArray, value);
        p.payload = payload;
        self.push(p)
    }

    /// `const void *` argument whose pointed-to bytes are preserved.
    pub fn bytes(self, name: &'static str, data: Option<&[u8]>) -> Self {
        let value = if data.is_some() {
            ParamValue::Pointer(1)
        } else {
            ParamValue::Null
        };
        self.push(ParamCapture::new(name, ParamType::ConstVoidPointer, value).with_payload(data))
    }

    /// Raw address argument (read destinations, mapped or SVM pointers).
    pub fn pointer(self, name: &'static str, ptr: u64) -> Self {
        let value = if ptr == 0 {
            ParamValue::Null
        } else {
            ParamValue::Pointer(ptr)
        };
        self.push(ParamCapture::new(name, ParamType::VoidPointer, value))
    }

    pub fn pointers(self, name: &'static str, ptrs: Option<&[u64]>) -> Self {
        let value = ptrs
            .map(|p| ParamValue::Pointers(p.to_vec()))
            .unwrap_or(ParamValue::Null);
        self.push(ParamCapture::new(name, ParamType::VoidPointerArray, value))
    }

    pub fn offsets(self, name: &'static str, offsets: Option<&[usize]>) -> Self {
        let value = offsets
            .map(|o| ParamValue::Offsets(o.to_vec()))
            .unwrap_or(ParamValue::Null);
        self.push(ParamCapture::new(name, ParamType::OffsetArray, value))
    }

    pub fn string(self, name: &'static str, s: Option<&str>) -> Self {
        let value = s
            .map(|s| ParamValue::Str(s.to_owned()))
            .unwrap_or(ParamValue::Null);
        self.push(ParamCapture::new(name, ParamType::String, value))
    }

    pub fn strings(self, name: &'static str, s: Option<&[&str]>) -> Self {
        let value = s
            .map(|s| ParamValue::Strings(s.iter().map(|s| (*s).to_owned()).collect()))
            .unwrap_or(ParamValue::Null);
        self.push(ParamCapture::new(name, ParamType::StringArray, value))
    }

    pub fn binaries(self, name: &'static str, b: Option<&[&[u8]]>) -> Self {
        let value = b
            .map(|b| ParamValue::Blobs(b.iter().map(|b| Box::from(*b)).collect()))
            .unwrap_or(ParamValue::Null);
        self.push(ParamCapture::new(name, ParamType::BinaryArray, value))
    }

    /// Zero-terminated property list, captured up to and including the terminator.
    pub fn properties(
        self,
        name: &'static str,
        kind: PropertiesKind,
        props: Option<&[u64]>,
    ) -> Self {
        let mut p = ParamCapture::new(
            name,
            ParamType::Properties(kind),
            if props.is_some() {
                ParamValue::Pointer(1)
            } else {
                ParamValue::Null
            },
        );
        p.payload = props.map(|props| u64_payload(&props[..properties_len(props)]));
        self.push(p)
    }

    pub fn image_format(self, name: &'static str, format: Option<ImageFormat>) -> Self {
        let bytes = format.map(ImageFormat::to_bytes);
        let value = if format.is_some() {
            ParamValue::Pointer(1)
        } else {
            ParamValue::Null
        };
        self.push(
            ParamCapture::new(name, ParamType::ImageFormat, value)
                .with_payload(bytes.as_ref().map(|b| &b[..])),
        )
    }

    pub fn image_desc(self, name: &'static str, desc: Option<&ImageDesc>) -> Self {
        let value = desc
            .map(|d| ParamValue::Handle(d.mem_object))
            .unwrap_or(ParamValue::Null);
        let bytes = desc.map(ImageDesc::to_bytes);
        self.push(ParamCapture::new(name, ParamType::ImageDesc, value).with_payload(bytes.as_deref()))
    }

    pub fn buffer_region(self, name: &'static str, region: Option<BufferRegion>) -> Self {
        let bytes = region.map(BufferRegion::to_bytes);
        let value = if region.is_some() {
            ParamValue::Pointer(1)
        } else {
            ParamValue::Null
        };
        self.push(
            ParamCapture::new(name, ParamType::BufferRegion, value)
                .with_payload(bytes.as_ref().map(|b| &b[..])),
        )
    }

    pub fn callback(self, name: &'static str, ptr: u64) -> Self {
        self.push(ParamCapture::new(
            name,
            ParamType::Callback,
            ParamValue::Pointer(ptr),
        ))
    }

    pub fn user_data(self, name: &'static str, ptr: u64) -> Self {
        self.push(ParamCapture::new(
            name,
            ParamType::UserData,
            ParamValue::Pointer(ptr),
        ))
    }

    pub fn scalar_out(self, name: &'static str, ptr: u64) -> Self {
        self.push(ParamCapture::new(
            name,
            ParamType::ScalarOut,
            ParamValue::Pointer(ptr),
        ))
    }

    /// Result buffer of an info query, holding the bytes the implementation wrote.
    pub fn info_out(self, name: &'static str, written: Option<&[u8]>) -> Self {
        let value = if written.is_some() {
            ParamValue::Pointer(1)
        } else {
            ParamValue::Null
        };
        self.push(ParamCapture::new(name, ParamType::InfoOut, value).with_payload(written))
    }

    pub fn returns_status(mut self, status: i32) -> Self {
        self.return_value = Some(ParamCapture::new(
            "returnValue",
            ParamType::Int,
            ParamValue::I32(status),
        ));
        self
    }

    pub fn returns_handle(mut self, kind: ResourceKind, h: Handle) -> Self {
        self.return_value = Some(ParamCapture::new(
            "returnValue",
            ParamType::Handle(kind),
            ParamValue::Handle(h),
        ));
        self
    }

    pub fn returns_pointer(mut self, ptr: u64) -> Self {
        self.return_value = Some(ParamCapture::new(
            "returnValue",
            ParamType::VoidPointer,
            if ptr == 0 {
                ParamValue::Null
            } else {
                ParamValue::Pointer(ptr)
            },
        ));
        self
    }
}
