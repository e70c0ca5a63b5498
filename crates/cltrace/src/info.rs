//! Decoding of informational queries into `<label>_OpenCL_info.json`.
//!
//! `clGet*Info` calls are not replayed. Their results are kept here so a replay can be checked
//! against the platform it was captured on. Values the table does not know how to decode are
//! left out of the entry.

use std::fs;
use std::path::Path;

use serde_json::{json, Map, Value};

use crate::call::CallCapture;
use crate::capture::info_object;
use crate::entry_point::EntryPoint;
use crate::error::Result;

pub fn info_file_name(label: &str) -> String {
    format!("{label}_OpenCL_info.json")
}

/// How the bytes of a `param_value` are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoValue {
    /// Zero-terminated `char[]`.
    Str,
    U32,
    I32,
    /// `cl_ulong` or `cl_bitfield`.
    U64,
    Size,
    SizeArray,
    /// Object handle or host pointer, written as hex.
    Handle,
    HandleArray,
    /// Property list.
    U64Array,
}

macro_rules! info_params {
    ($($name:ident = $value:literal => $kind:ident,)*) => {
        const INFO_PARAMS: &[(u32, &str, InfoValue)] = &[
            $(($value, stringify!($name), InfoValue::$kind),)*
        ];
    };
}

info_params! {
    CL_PLATFORM_PROFILE = 0x0900 => Str,
    CL_PLATFORM_VERSION = 0x0901 => Str,
    CL_PLATFORM_NAME = 0x0902 => Str,
    CL_PLATFORM_VENDOR = 0x0903 => Str,
    CL_PLATFORM_EXTENSIONS = 0x0904 => Str,
    CL_PLATFORM_HOST_TIMER_RESOLUTION = 0x0905 => U64,
    CL_PLATFORM_NUMERIC_VERSION = 0x0906 => U32,
    CL_PLATFORM_ICD_SUFFIX_KHR = 0x0920 => Str,

    CL_DEVICE_TYPE = 0x1000 => U64,
    CL_DEVICE_VENDOR_ID = 0x1001 => U32,
    CL_DEVICE_MAX_COMPUTE_UNITS = 0x1002 => U32,
    CL_DEVICE_MAX_WORK_ITEM_DIMENSIONS = 0x1003 => U32,
    CL_DEVICE_MAX_WORK_GROUP_SIZE = 0x1004 => Size,
    CL_DEVICE_MAX_WORK_ITEM_SIZES = 0x1005 => SizeArray,
    CL_DEVICE_MAX_CLOCK_FREQUENCY = 0x100C => U32,
    CL_DEVICE_ADDRESS_BITS = 0x100D => U32,
    CL_DEVICE_MAX_MEM_ALLOC_SIZE = 0x1010 => U64,
    CL_DEVICE_IMAGE_SUPPORT = 0x1016 => U32,
    CL_DEVICE_MAX_PARAMETER_SIZE = 0x1017 => Size,
    CL_DEVICE_GLOBAL_MEM_CACHELINE_SIZE = 0x101D => U32,
    CL_DEVICE_GLOBAL_MEM_CACHE_SIZE = 0x101E => U64,
    CL_DEVICE_GLOBAL_MEM_SIZE = 0x101F => U64,
    CL_DEVICE_MAX_CONSTANT_BUFFER_SIZE = 0x1020 => U64,
    CL_DEVICE_LOCAL_MEM_SIZE = 0x1023 => U64,
    CL_DEVICE_ERROR_CORRECTION_SUPPORT = 0x1024 => U32,
    CL_DEVICE_PROFILING_TIMER_RESOLUTION = 0x1025 => Size,
    CL_DEVICE_ENDIAN_LITTLE = 0x1026 => U32,
    CL_DEVICE_AVAILABLE = 0x1027 => U32,
    CL_DEVICE_COMPILER_AVAILABLE = 0x1028 => U32,
    CL_DEVICE_NAME = 0x102B => Str,
    CL_DEVICE_VENDOR = 0x102C => Str,
    CL_DRIVER_VERSION = 0x102D => Str,
    CL_DEVICE_PROFILE = 0x102E => Str,
    CL_DEVICE_VERSION = 0x102F => Str,
    CL_DEVICE_EXTENSIONS = 0x1030 => Str,
    CL_DEVICE_PLATFORM = 0x1031 => Handle,
    CL_DEVICE_DOUBLE_FP_CONFIG = 0x1032 => U64,
    CL_DEVICE_HOST_UNIFIED_MEMORY = 0x1035 => U32,
    CL_DEVICE_OPENCL_C_VERSION = 0x103D => Str,
    CL_DEVICE_LINKER_AVAILABLE = 0x103E => U32,
    CL_DEVICE_BUILT_IN_KERNELS = 0x103F => Str,
    CL_DEVICE_REFERENCE_COUNT = 0x1047 => U32,
    CL_DEVICE_SVM_CAPABILITIES = 0x1053 => U64,
    CL_DEVICE_IL_VERSION = 0x105B => Str,
    CL_DEVICE_NUMERIC_VERSION = 0x105E => U32,

    CL_CONTEXT_REFERENCE_COUNT = 0x1080 => U32,
    CL_CONTEXT_DEVICES = 0x1081 => HandleArray,
    CL_CONTEXT_PROPERTIES = 0x1082 => U64Array,
    CL_CONTEXT_NUM_DEVICES = 0x1083 => U32,

    CL_QUEUE_CONTEXT = 0x1090 => Handle,
    CL_QUEUE_DEVICE = 0x1091 => Handle,
    CL_QUEUE_REFERENCE_COUNT = 0x1092 => U32,
    CL_QUEUE_PROPERTIES = 0x1093 => U64,
    CL_QUEUE_SIZE = 0x1094 => U32,

    CL_MEM_TYPE = 0x1100 => U32,
    CL_MEM_FLAGS = 0x1101 => U64,
    CL_MEM_SIZE = 0x1102 => Size,
    CL_MEM_HOST_PTR = 0x1103 => Handle,
    CL_MEM_MAP_COUNT = 0x1104 => U32,
    CL_MEM_REFERENCE_COUNT = 0x1105 => U32,
    CL_MEM_CONTEXT = 0x1106 => Handle,
    CL_MEM_ASSOCIATED_MEMOBJECT = 0x1107 => Handle,
    CL_MEM_OFFSET = 0x1108 => Size,
    CL_MEM_USES_SVM_POINTER = 0x1109 => U32,

    CL_IMAGE_ELEMENT_SIZE = 0x1111 => Size,
    CL_IMAGE_ROW_PITCH = 0x1112 => Size,
    CL_IMAGE_SLICE_PITCH = 0x1113 => Size,
    CL_IMAGE_WIDTH = 0x1114 => Size,
    CL_IMAGE_HEIGHT = 0x1115 => Size,
    CL_IMAGE_DEPTH = 0x1116 => Size,
    CL_IMAGE_ARRAY_SIZE = 0x1117 => Size,
    CL_IMAGE_BUFFER = 0x1118 => Handle,
    CL_IMAGE_NUM_MIP_LEVELS = 0x1119 => U32,
    CL_IMAGE_NUM_SAMPLES = 0x111A => U32,

    CL_PIPE_PACKET_SIZE = 0x1120 => U32,
    CL_PIPE_MAX_PACKETS = 0x1121 => U32,

    CL_SAMPLER_REFERENCE_COUNT = 0x1150 => U32,
    CL_SAMPLER_CONTEXT = 0x1151 => Handle,
    CL_SAMPLER_NORMALIZED_COORDS = 0x1152 => U32,
    CL_SAMPLER_ADDRESSING_MODE = 0x1153 => U32,
    CL_SAMPLER_FILTER_MODE = 0x1154 => U32,
    CL_SAMPLER_PROPERTIES = 0x1158 => U64Array,

    CL_PROGRAM_REFERENCE_COUNT = 0x1160 => U32,
    CL_PROGRAM_CONTEXT = 0x1161 => Handle,
    CL_PROGRAM_NUM_DEVICES = 0x1162 => U32,
    CL_PROGRAM_DEVICES = 0x1163 => HandleArray,
    CL_PROGRAM_SOURCE = 0x1164 => Str,
    CL_PROGRAM_BINARY_SIZES = 0x1165 => SizeArray,
    CL_PROGRAM_NUM_KERNELS = 0x1167 => Size,
    CL_PROGRAM_KERNEL_NAMES = 0x1168 => Str,

    CL_PROGRAM_BUILD_STATUS = 0x1181 => I32,
    CL_PROGRAM_BUILD_OPTIONS = 0x1182 => Str,
    CL_PROGRAM_BUILD_LOG = 0x1183 => Str,
    CL_PROGRAM_BINARY_TYPE = 0x1184 => U32,
    CL_PROGRAM_BUILD_GLOBAL_VARIABLE_TOTAL_SIZE = 0x1185 => Size,

    CL_KERNEL_FUNCTION_NAME = 0x1190 => Str,
    CL_KERNEL_NUM_ARGS = 0x1191 => U32,
    CL_KERNEL_REFERENCE_COUNT = 0x1192 => U32,
    CL_KERNEL_CONTEXT = 0x1193 => Handle,
    CL_KERNEL_PROGRAM = 0x1194 => Handle,
    CL_KERNEL_ATTRIBUTES = 0x1195 => Str,
    CL_KERNEL_ARG_ADDRESS_QUALIFIER = 0x1196 => U32,
    CL_KERNEL_ARG_ACCESS_QUALIFIER = 0x1197 => U32,
    CL_KERNEL_ARG_TYPE_NAME = 0x1198 => Str,
    CL_KERNEL_ARG_TYPE_QUALIFIER = 0x1199 => U64,
    CL_KERNEL_ARG_NAME = 0x119A => Str,

    CL_KERNEL_WORK_GROUP_SIZE = 0x11B0 => Size,
    CL_KERNEL_COMPILE_WORK_GROUP_SIZE = 0x11B1 => SizeArray,
    CL_KERNEL_LOCAL_MEM_SIZE = 0x11B2 => U64,
    CL_KERNEL_PREFERRED_WORK_GROUP_SIZE_MULTIPLE = 0x11B3 => Size,
    CL_KERNEL_PRIVATE_MEM_SIZE = 0x11B4 => U64,
    CL_KERNEL_GLOBAL_WORK_SIZE = 0x11B5 => SizeArray,

    CL_EVENT_COMMAND_QUEUE = 0x11D0 => Handle,
    CL_EVENT_COMMAND_TYPE = 0x11D1 => U32,
    CL_EVENT_REFERENCE_COUNT = 0x11D2 => U32,
    CL_EVENT_COMMAND_EXECUTION_STATUS = 0x11D3 => I32,
    CL_EVENT_CONTEXT = 0x11D4 => Handle,

    CL_PROFILING_COMMAND_QUEUED = 0x1280 => U64,
    CL_PROFILING_COMMAND_SUBMIT = 0x1281 => U64,
    CL_PROFILING_COMMAND_START = 0x1282 => U64,
    CL_PROFILING_COMMAND_END = 0x1283 => U64,
    CL_PROFILING_COMMAND_COMPLETE = 0x1284 => U64,
}

/// Name and layout of an info enumerant.
pub fn info_param(value: u32) -> Option<(&'static str, InfoValue)> {
    INFO_PARAMS
        .iter()
        .find(|(v, _, _)| *v == value)
        .map(|&(_, name, kind)| (name, kind))
}

fn image_type_name(raw: u32) -> Option<&'static str> {
    Some(match raw {
        0x10F1 => "CL_MEM_OBJECT_IMAGE2D",
        0x10F2 => "CL_MEM_OBJECT_IMAGE3D",
        0x10F3 => "CL_MEM_OBJECT_IMAGE2D_ARRAY",
        0x10F4 => "CL_MEM_OBJECT_IMAGE1D",
        0x10F5 => "CL_MEM_OBJECT_IMAGE1D_ARRAY",
        0x10F6 => "CL_MEM_OBJECT_IMAGE1D_BUFFER",
        _ => return None,
    })
}

fn hex(v: u64) -> Value {
    Value::String(format!("{v:#x}"))
}

fn words<const N: usize>(bytes: &[u8]) -> impl Iterator<Item = [u8; N]> + '_ {
    bytes.chunks_exact(N).filter_map(|c| c.try_into().ok())
}

/// Decodes `bytes` as `kind`, or `None` when they are too short for it.
pub fn decode(kind: InfoValue, bytes: &[u8]) -> Option<Value> {
    let first_u64 = || words::<8>(bytes).next().map(u64::from_le_bytes);
    Some(match kind {
        InfoValue::Str => {
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            Value::String(String::from_utf8_lossy(&bytes[..end]).into_owned())
        }
        InfoValue::U32 => json!(words::<4>(bytes).next().map(u32::from_le_bytes)?),
        InfoValue::I32 => json!(words::<4>(bytes).next().map(i32::from_le_bytes)?),
        InfoValue::U64 | InfoValue::Size => json!(first_u64()?),
        InfoValue::Handle => hex(first_u64()?),
        InfoValue::SizeArray | InfoValue::U64Array => {
            Value::Array(words::<8>(bytes).map(|w| json!(u64::from_le_bytes(w))).collect())
        }
        InfoValue::HandleArray => Value::Array(words::<8>(bytes).map(|w| hex(u64::from_le_bytes(w))).collect()),
    })
}

/// Accumulates decoded query results for the info JSON.
#[derive(Debug, Default)]
pub struct InfoLog {
    entries: Vec<Value>,
}

impl InfoLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Value] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records an informational query. Queries that returned no data are ignored.
    pub fn record(&mut self, call: &CallCapture) {
        let Some(ep) = call.entry_point() else {
            return;
        };
        let entry = if ep == EntryPoint::GetSupportedImageFormats {
            image_formats_entry(call)
        } else {
            info_entry(ep, call)
        };
        if let Some(fields) = entry {
            let mut group = Map::new();
            group.insert(call.name().to_owned(), Value::Object(fields));
            self.entries.push(Value::Object(group));
        }
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.entries)?;
        fs::write(path.as_ref(), json)?;
        tracing::info!(path = %path.as_ref().display(), entries = self.entries.len(), "wrote info json");
        Ok(())
    }
}

fn info_entry(ep: EntryPoint, call: &CallCapture) -> Option<Map<String, Value>> {
    let (object_name, _) = info_object(ep)?;
    let bytes = call.find("param_value")?.payload.as_deref()?;
    let mut fields = Map::new();
    let object = call.find(object_name).and_then(|p| p.handle()).map_or(0, |h| h.0);
    fields.insert(object_name.to_owned(), hex(object));
    if let Some(device) = call.find("device").and_then(|p| p.handle()) {
        fields.insert("device".to_owned(), hex(device.0));
    }
    if let Some(arg_index) = call.find("arg_index").and_then(|p| p.as_u64()) {
        fields.insert("arg_index".to_owned(), json!(arg_index));
    }

    let param_name = call.find("param_name").and_then(|p| p.as_u64())?;
    let decoded = u32::try_from(param_name)
        .ok()
        .and_then(info_param)
        .and_then(|(name, kind)| Some((name, decode(kind, bytes)?)));
    match decoded {
        Some((name, value)) => {
            fields.insert(name.to_owned(), value);
        }
        None => tracing::debug!(call = call.name(), param_name, "info value not decoded"),
    }
    Some(fields)
}

fn image_formats_entry(call: &CallCapture) -> Option<Map<String, Value>> {
    let bytes = call.find("image_formats")?.payload.as_deref()?;
    let mut fields = Map::new();
    let context = call.find("context").and_then(|p| p.handle()).map_or(0, |h| h.0);
    fields.insert("context".to_owned(), hex(context));
    if let Some(flags) = call.find("flags").and_then(|p| p.as_u64()) {
        fields.insert("flags".to_owned(), json!(flags));
    }

    let mut formats = Map::new();
    for (i, format) in words::<8>(bytes).enumerate() {
        let [o0, o1, o2, o3, t0, t1, t2, t3] = format;
        formats.insert(
            format!("image_channel_order{}", i + 1),
            json!(u32::from_le_bytes([o0, o1, o2, o3])),
        );
        formats.insert(
            format!("image_channel_data_type{}", i + 1),
            json!(u32::from_le_bytes([t0, t1, t2, t3])),
        );
    }
    let image_type = call
        .find("image_type")
        .and_then(|p| p.as_u64())
        .and_then(|v| u32::try_from(v).ok())
        .and_then(image_type_name)
        .unwrap_or("image_formats");
    fields.insert(image_type.to_owned(), Value::Object(formats));
    Some(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{get_info, get_supported_image_formats};
    use crate::cl::{ImageFormat, MemFlags};
    use crate::handle::Handle;

    #[test]
    fn device_name_is_decoded() {
        let call = get_info(EntryPoint::GetDeviceInfo, Handle(0xd0), None, None, 0x102B, Some(&b"Fake GPU\0"[..]), 0).unwrap();
        let mut log = InfoLog::new();
        log.record(&call);
        assert_eq!(
            log.entries()[0],
            json!({"clGetDeviceInfo": {"device": "0xd0", "CL_DEVICE_NAME": "Fake GPU"}})
        );
    }

    #[test]
    fn build_log_keeps_the_device() {
        let call = get_info(
            EntryPoint::GetProgramBuildInfo,
            Handle(0x70),
            Some(Handle(0xd0)),
            None,
            0x1183,
            Some(&b"ok\0"[..]),
            0,
        )
        .unwrap();
        let mut log = InfoLog::new();
        log.record(&call);
        let entry = &log.entries()[0]["clGetProgramBuildInfo"];
        assert_eq!(entry["program"], "0x70");
        assert_eq!(entry["device"], "0xd0");
        assert_eq!(entry["CL_PROGRAM_BUILD_LOG"], "ok");
    }

    #[test]
    fn unknown_and_short_values_are_left_out() {
        let mut log = InfoLog::new();
        log.record(&get_info(EntryPoint::GetMemObjectInfo, Handle(0xb), None, None, 0x7777, Some(&[1u8, 2, 3, 4][..]), 0).unwrap());
        log.record(&get_info(EntryPoint::GetMemObjectInfo, Handle(0xb), None, None, 0x1102, Some(&[1u8, 2][..]), 0).unwrap());
        log.record(&get_info(EntryPoint::GetMemObjectInfo, Handle(0xb), None, None, 0x1102, None, 0).unwrap());
        assert_eq!(log.entries().len(), 2);
        for entry in log.entries() {
            assert_eq!(entry["clGetMemObjectInfo"].as_object().unwrap().len(), 1);
        }
    }

    #[test]
    fn arrays_decode_elementwise() {
        let bytes: Vec<u8> = [0xa0u64, 0xa1].iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_eq!(decode(InfoValue::HandleArray, &bytes), Some(json!(["0xa0", "0xa1"])));
        assert_eq!(decode(InfoValue::SizeArray, &bytes), Some(json!([160, 161])));
        assert_eq!(decode(InfoValue::U32, &[7, 0, 0]), None);
    }

    #[test]
    fn image_formats_are_numbered() {
        let formats = [
            ImageFormat { channel_order: 0x10B5, channel_data_type: 0x10D2 },
            ImageFormat { channel_order: 0x10B0, channel_data_type: 0x10DE },
        ];
        let call = get_supported_image_formats(Handle(0xc), MemFlags::READ_WRITE, 0x10F1, 2, Some(&formats[..]), 0);
        let mut log = InfoLog::new();
        log.record(&call);
        let entry = &log.entries()[0]["clGetSupportedImageFormats"];
        assert_eq!(entry["context"], "0xc");
        assert_eq!(entry["flags"], 1);
        assert_eq!(entry["CL_MEM_OBJECT_IMAGE2D"]["image_channel_order2"], 0x10B0);
        assert_eq!(entry["CL_MEM_OBJECT_IMAGE2D"]["image_channel_data_type1"], 0x10D2);
    }
}
