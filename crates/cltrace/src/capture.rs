//! Per-entry-point constructors for [`CallCapture`] records.
//!
//! The interception layer calls these with the arguments it saw (already copied out of
//! application memory) and the result the implementation produced. Parameter names follow the
//! OpenCL headers; the pruning tables and snapshot engine look parameters up by these names.
//!
//! Pointer arguments that the replay needs the contents of are taken as byte slices sized by
//! the caller per the call contract. `None` always means the application passed `NULL`.

use crate::call::CallCapture;
use crate::cl::{BufferRegion, ImageDesc, ImageFormat, MapFlags, MemFlags};
use crate::entry_point::EntryPoint;
use crate::handle::{Handle, ResourceKind};
use crate::param::{usize_payload, ParamCapture, ParamType, ParamValue, PropertiesKind};

use crate::handle::ResourceKind::{CommandQueue, Context, Device, Event, Kernel, Mem, Platform, Program, Sampler};

fn non_empty<T>(items: &[T]) -> Option<&[T]> {
    (!items.is_empty()).then_some(items)
}

impl CallCapture {
    /// Trailing `num_events_in_wait_list, event_wait_list, event` of enqueued commands.
    pub fn wait_list(self, waits: &[Handle], event: Option<Handle>) -> Self {
        self.uint("num_events_in_wait_list", waits.len() as u32)
            .handle_array("event_wait_list", Event, non_empty(waits))
            .handle_out("event", Event, event)
    }

    fn errcode(self) -> Self {
        self.scalar_out("errcode_ret", 0)
    }

    /// `size_t *` out-parameter whose returned value the replay has to hand back to the call.
    fn size_out(mut self, name: &'static str, value: usize) -> Self {
        self.params.push(
            ParamCapture::new(name, ParamType::ScalarOut, ParamValue::Pointer(1))
                .with_payload(Some(&usize_payload(&[value])[..])),
        );
        self
    }
}

// Platforms and devices

pub fn get_platform_ids(num_entries: u32, platforms: Option<&[Handle]>, status: i32) -> CallCapture {
    CallCapture::new(EntryPoint::GetPlatformIDs)
        .uint("num_entries", num_entries)
        .handle_array_out("platforms", Platform, platforms)
        .scalar_out("num_platforms", 0)
        .returns_status(status)
}

pub fn get_device_ids(
    platform: Handle,
    device_type: u64,
    num_entries: u32,
    devices: Option<&[Handle]>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::GetDeviceIDs)
        .handle("platform", Platform, platform)
        .bitfield("device_type", device_type)
        .uint("num_entries", num_entries)
        .handle_array_out("devices", Device, devices)
        .scalar_out("num_devices", 0)
        .returns_status(status)
}

pub fn create_sub_devices(
    in_device: Handle,
    properties: Option<&[u64]>,
    num_devices: u32,
    out_devices: Option<&[Handle]>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::CreateSubDevices)
        .handle("in_device", Device, in_device)
        .properties("properties", PropertiesKind::DevicePartition, properties)
        .uint("num_devices", num_devices)
        .handle_array_out("out_devices", Device, out_devices)
        .scalar_out("num_devices_ret", 0)
        .returns_status(status)
}

pub fn get_host_timer(device: Handle, status: i32) -> CallCapture {
    CallCapture::new(EntryPoint::GetHostTimer)
        .handle("device", Device, device)
        .scalar_out("host_timestamp", 0)
        .returns_status(status)
}

/// `clRetain*` for any reference counted kind.
pub fn retain(kind: ResourceKind, handle: Handle, status: i32) -> Option<CallCapture> {
    let (ep, name) = match kind {
        Device => (EntryPoint::RetainDevice, "device"),
        Context => (EntryPoint::RetainContext, "context"),
        CommandQueue => (EntryPoint::RetainCommandQueue, "command_queue"),
        Mem => (EntryPoint::RetainMemObject, "memobj"),
        Sampler => (EntryPoint::RetainSampler, "sampler"),
        Program => (EntryPoint::RetainProgram, "program"),
        Kernel => (EntryPoint::RetainKernel, "kernel"),
        Event => (EntryPoint::RetainEvent, "event"),
        Platform | ResourceKind::Void => return None,
    };
    Some(CallCapture::new(ep).handle(name, kind, handle).returns_status(status))
}

/// `clRelease*` for any reference counted kind.
pub fn release(kind: ResourceKind, handle: Handle, status: i32) -> Option<CallCapture> {
    let (ep, name) = match kind {
        Device => (EntryPoint::ReleaseDevice, "device"),
        Context => (EntryPoint::ReleaseContext, "context"),
        CommandQueue => (EntryPoint::ReleaseCommandQueue, "command_queue"),
        Mem => (EntryPoint::ReleaseMemObject, "memobj"),
        Sampler => (EntryPoint::ReleaseSampler, "sampler"),
        Program => (EntryPoint::ReleaseProgram, "program"),
        Kernel => (EntryPoint::ReleaseKernel, "kernel"),
        Event => (EntryPoint::ReleaseEvent, "event"),
        Platform | ResourceKind::Void => return None,
    };
    Some(CallCapture::new(ep).handle(name, kind, handle).returns_status(status))
}

// Informational queries

/// Name and kind of the object parameter of each `clGet*Info` query.
pub fn info_object(ep: EntryPoint) -> Option<(&'static str, ResourceKind)> {
    use EntryPoint::*;
    Some(match ep {
        GetPlatformInfo => ("platform", Platform),
        GetDeviceInfo => ("device", Device),
        GetContextInfo | GetSupportedImageFormats => ("context", Context),
        GetCommandQueueInfo => ("command_queue", CommandQueue),
        GetMemObjectInfo => ("memobj", Mem),
        GetImageInfo => ("image", Mem),
        GetPipeInfo => ("pipe", Mem),
        GetSamplerInfo => ("sampler", Sampler),
        GetProgramInfo | GetProgramBuildInfo => ("program", Program),
        GetKernelInfo | GetKernelArgInfo | GetKernelWorkGroupInfo | GetKernelSubGroupInfo => {
            ("kernel", Kernel)
        }
        GetEventInfo | GetEventProfilingInfo => ("event", Event),
        _ => return None,
    })
}

/// `clGet*Info(object, param_name, param_value_size, param_value, param_value_size_ret)`.
///
/// `value` holds the bytes the implementation wrote. Queries scoped to a device
/// (`clGetProgramBuildInfo`, `clGetKernelWorkGroupInfo`) get it through `device`;
/// `clGetKernelArgInfo` through `arg_index`.
pub fn get_info(
    ep: EntryPoint,
    object: Handle,
    device: Option<Handle>,
    arg_index: Option<u32>,
    param_name: u32,
    value: Option<&[u8]>,
    status: i32,
) -> Option<CallCapture> {
    let (object_name, kind) = info_object(ep)?;
    if ep == EntryPoint::GetSupportedImageFormats {
        return None;
    }
    let mut call = CallCapture::new(ep).handle(object_name, kind, object);
    if let Some(device) = device {
        call = call.handle("device", Device, device);
    }
    if let Some(arg_index) = arg_index {
        call = call.uint("arg_index", arg_index);
    }
    Some(
        call.enumerant("param_name", param_name)
            .size("param_value_size", value.map_or(0, <[u8]>::len))
            .info_out("param_value", value)
            .scalar_out("param_value_size_ret", 0)
            .returns_status(status),
    )
}

/// `formats` holds the returned `cl_image_format` array.
pub fn get_supported_image_formats(
    context: Handle,
    flags: MemFlags,
    image_type: u32,
    num_entries: u32,
    formats: Option<&[ImageFormat]>,
    status: i32,
) -> CallCapture {
    let bytes: Option<Vec<u8>> = formats.map(|f| f.iter().flat_map(|f| f.to_bytes()).collect());
    CallCapture::new(EntryPoint::GetSupportedImageFormats)
        .handle("context", Context, context)
        .bitfield("flags", flags.bits())
        .enumerant("image_type", image_type)
        .uint("num_entries", num_entries)
        .info_out("image_formats", bytes.as_deref())
        .scalar_out("num_image_formats", 0)
        .returns_status(status)
}

// Contexts

pub fn create_context(
    properties: Option<&[u64]>,
    devices: &[Handle],
    pfn_notify: u64,
    user_data: u64,
    ret: Handle,
) -> CallCapture {
    CallCapture::new(EntryPoint::CreateContext)
        .properties("properties", PropertiesKind::Context, properties)
        .uint("num_devices", devices.len() as u32)
        .handle_array("devices", Device, non_empty(devices))
        .callback("pfn_notify", pfn_notify)
        .user_data("user_data", user_data)
        .errcode()
        .returns_handle(Context, ret)
}

pub fn create_context_from_type(
    properties: Option<&[u64]>,
    device_type: u64,
    pfn_notify: u64,
    user_data: u64,
    ret: Handle,
) -> CallCapture {
    CallCapture::new(EntryPoint::CreateContextFromType)
        .properties("properties", PropertiesKind::Context, properties)
        .bitfield("device_type", device_type)
        .callback("pfn_notify", pfn_notify)
        .user_data("user_data", user_data)
        .errcode()
        .returns_handle(Context, ret)
}

pub fn set_context_destructor_callback(context: Handle, pfn_notify: u64, user_data: u64, status: i32) -> CallCapture {
    CallCapture::new(EntryPoint::SetContextDestructorCallback)
        .handle("context", Context, context)
        .callback("pfn_notify", pfn_notify)
        .user_data("user_data", user_data)
        .returns_status(status)
}

// Command queues

pub fn create_command_queue(context: Handle, device: Handle, properties: u64, ret: Handle) -> CallCapture {
    CallCapture::new(EntryPoint::CreateCommandQueue)
        .handle("context", Context, context)
        .handle("device", Device, device)
        .bitfield("properties", properties)
        .errcode()
        .returns_handle(CommandQueue, ret)
}

pub fn create_command_queue_with_properties(
    context: Handle,
    device: Handle,
    properties: Option<&[u64]>,
    ret: Handle,
) -> CallCapture {
    CallCapture::new(EntryPoint::CreateCommandQueueWithProperties)
        .handle("context", Context, context)
        .handle("device", Device, device)
        .properties("properties", PropertiesKind::Queue, properties)
        .errcode()
        .returns_handle(CommandQueue, ret)
}

pub fn set_default_device_command_queue(context: Handle, device: Handle, queue: Handle, status: i32) -> CallCapture {
    CallCapture::new(EntryPoint::SetDefaultDeviceCommandQueue)
        .handle("context", Context, context)
        .handle("device", Device, device)
        .handle("command_queue", CommandQueue, queue)
        .returns_status(status)
}

pub fn flush(queue: Handle, status: i32) -> CallCapture {
    CallCapture::new(EntryPoint::Flush)
        .handle("command_queue", CommandQueue, queue)
        .returns_status(status)
}

pub fn finish(queue: Handle, status: i32) -> CallCapture {
    CallCapture::new(EntryPoint::Finish)
        .handle("command_queue", CommandQueue, queue)
        .returns_status(status)
}

// Memory objects

fn host_ptr(flags: MemFlags, data: Option<&[u8]>) -> Option<&[u8]> {
    if flags.reads_host_ptr() {
        data
    } else {
        None
    }
}

pub fn create_buffer(context: Handle, flags: MemFlags, size: usize, data: Option<&[u8]>, ret: Handle) -> CallCapture {
    CallCapture::new(EntryPoint::CreateBuffer)
        .handle("context", Context, context)
        .bitfield("flags", flags.bits())
        .size("size", size)
        .bytes("host_ptr", host_ptr(flags, data))
        .errcode()
        .returns_handle(Mem, ret)
}

pub fn create_buffer_with_properties(
    context: Handle,
    properties: Option<&[u64]>,
    flags: MemFlags,
    size: usize,
    data: Option<&[u8]>,
    ret: Handle,
) -> CallCapture {
    CallCapture::new(EntryPoint::CreateBufferWithProperties)
        .handle("context", Context, context)
        .properties("properties", PropertiesKind::Mem, properties)
        .bitfield("flags", flags.bits())
        .size("size", size)
        .bytes("host_ptr", host_ptr(flags, data))
        .errcode()
        .returns_handle(Mem, ret)
}

pub const CL_BUFFER_CREATE_TYPE_REGION: u32 = 0x1220;

pub fn create_sub_buffer(buffer: Handle, flags: MemFlags, region: BufferRegion, ret: Handle) -> CallCapture {
    CallCapture::new(EntryPoint::CreateSubBuffer)
        .handle("buffer", Mem, buffer)
        .bitfield("flags", flags.bits())
        .enumerant("buffer_create_type", CL_BUFFER_CREATE_TYPE_REGION)
        .buffer_region("buffer_create_info", Some(region))
        .errcode()
        .returns_handle(Mem, ret)
}

pub fn create_image(
    context: Handle,
    flags: MemFlags,
    format: ImageFormat,
    desc: &ImageDesc,
    data: Option<&[u8]>,
    ret: Handle,
) -> CallCapture {
    CallCapture::new(EntryPoint::CreateImage)
        .handle("context", Context, context)
        .bitfield("flags", flags.bits())
        .image_format("image_format", Some(format))
        .image_desc("image_desc", Some(desc))
        .bytes("host_ptr", host_ptr(flags, data))
        .errcode()
        .returns_handle(Mem, ret)
}

pub fn create_image_with_properties(
    context: Handle,
    properties: Option<&[u64]>,
    flags: MemFlags,
    format: ImageFormat,
    desc: &ImageDesc,
    data: Option<&[u8]>,
    ret: Handle,
) -> CallCapture {
    CallCapture::new(EntryPoint::CreateImageWithProperties)
        .handle("context", Context, context)
        .properties("properties", PropertiesKind::Mem, properties)
        .bitfield("flags", flags.bits())
        .image_format("image_format", Some(format))
        .image_desc("image_desc", Some(desc))
        .bytes("host_ptr", host_ptr(flags, data))
        .errcode()
        .returns_handle(Mem, ret)
}

#[allow(clippy::too_many_arguments)]
pub fn create_image_2d(
    context: Handle,
    flags: MemFlags,
    format: ImageFormat,
    width: usize,
    height: usize,
    row_pitch: usize,
    data: Option<&[u8]>,
    ret: Handle,
) -> CallCapture {
    CallCapture::new(EntryPoint::CreateImage2D)
        .handle("context", Context, context)
        .bitfield("flags", flags.bits())
        .image_format("image_format", Some(format))
        .size("image_width", width)
        .size("image_height", height)
        .size("image_row_pitch", row_pitch)
        .bytes("host_ptr", host_ptr(flags, data))
        .errcode()
        .returns_handle(Mem, ret)
}

#[allow(clippy::too_many_arguments)]
pub fn create_image_3d(
    context: Handle,
    flags: MemFlags,
    format: ImageFormat,
    dims: [usize; 3],
    row_pitch: usize,
    slice_pitch: usize,
    data: Option<&[u8]>,
    ret: Handle,
) -> CallCapture {
    CallCapture::new(EntryPoint::CreateImage3D)
        .handle("context", Context, context)
        .bitfield("flags", flags.bits())
        .image_format("image_format", Some(format))
        .size("image_width", dims[0])
        .size("image_height", dims[1])
        .size("image_depth", dims[2])
        .size("image_row_pitch", row_pitch)
        .size("image_slice_pitch", slice_pitch)
        .bytes("host_ptr", host_ptr(flags, data))
        .errcode()
        .returns_handle(Mem, ret)
}

pub fn create_pipe(
    context: Handle,
    flags: MemFlags,
    packet_size: u32,
    max_packets: u32,
    properties: Option<&[u64]>,
    ret: Handle,
) -> CallCapture {
    CallCapture::new(EntryPoint::CreatePipe)
        .handle("context", Context, context)
        .bitfield("flags", flags.bits())
        .uint("pipe_packet_size", packet_size)
        .uint("pipe_max_packets", max_packets)
        .properties("properties", PropertiesKind::Pipe, properties)
        .errcode()
        .returns_handle(Mem, ret)
}

pub fn set_mem_object_destructor_callback(memobj: Handle, pfn_notify: u64, user_data: u64, status: i32) -> CallCapture {
    CallCapture::new(EntryPoint::SetMemObjectDestructorCallback)
        .handle("memobj", Mem, memobj)
        .callback("pfn_notify", pfn_notify)
        .user_data("user_data", user_data)
        .returns_status(status)
}

// Shared virtual memory

pub fn svm_alloc(context: Handle, flags: MemFlags, size: usize, alignment: u32, ret: u64) -> CallCapture {
    CallCapture::new(EntryPoint::SVMAlloc)
        .handle("context", Context, context)
        .bitfield("flags", flags.bits())
        .size("size", size)
        .uint("alignment", alignment)
        .returns_pointer(ret)
}

pub fn svm_free(context: Handle, svm_pointer: u64) -> CallCapture {
    CallCapture::new(EntryPoint::SVMFree)
        .handle("context", Context, context)
        .pointer("svm_pointer", svm_pointer)
}

// Samplers

pub fn create_sampler(
    context: Handle,
    normalized_coords: bool,
    addressing_mode: u32,
    filter_mode: u32,
    ret: Handle,
) -> CallCapture {
    CallCapture::new(EntryPoint::CreateSampler)
        .handle("context", Context, context)
        .boolean("normalized_coords", normalized_coords)
        .enumerant("addressing_mode", addressing_mode)
        .enumerant("filter_mode", filter_mode)
        .errcode()
        .returns_handle(Sampler, ret)
}

pub fn create_sampler_with_properties(context: Handle, properties: Option<&[u64]>, ret: Handle) -> CallCapture {
    CallCapture::new(EntryPoint::CreateSamplerWithProperties)
        .handle("context", Context, context)
        .properties("sampler_properties", PropertiesKind::Sampler, properties)
        .errcode()
        .returns_handle(Sampler, ret)
}

// Programs

pub fn create_program_with_source(context: Handle, strings: &[&str], ret: Handle) -> CallCapture {
    CallCapture::new(EntryPoint::CreateProgramWithSource)
        .handle("context", Context, context)
        .uint("count", strings.len() as u32)
        .strings("strings", Some(strings))
        .size_array("lengths", None)
        .errcode()
        .returns_handle(Program, ret)
}

pub fn create_program_with_binary(
    context: Handle,
    devices: &[Handle],
    binaries: &[&[u8]],
    ret: Handle,
) -> CallCapture {
    let lengths: Vec<usize> = binaries.iter().map(|b| b.len()).collect();
    CallCapture::new(EntryPoint::CreateProgramWithBinary)
        .handle("context", Context, context)
        .uint("num_devices", devices.len() as u32)
        .handle_array("device_list", Device, non_empty(devices))
        .size_array("lengths", Some(&lengths[..]))
        .binaries("binaries", Some(binaries))
        .scalar_out("binary_status", 0)
        .errcode()
        .returns_handle(Program, ret)
}

pub fn create_program_with_built_in_kernels(
    context: Handle,
    devices: &[Handle],
    kernel_names: &str,
    ret: Handle,
) -> CallCapture {
    CallCapture::new(EntryPoint::CreateProgramWithBuiltInKernels)
        .handle("context", Context, context)
        .uint("num_devices", devices.len() as u32)
        .handle_array("device_list", Device, non_empty(devices))
        .string("kernel_names", Some(kernel_names))
        .errcode()
        .returns_handle(Program, ret)
}

pub fn create_program_with_il(context: Handle, il: &[u8], ret: Handle) -> CallCapture {
    CallCapture::new(EntryPoint::CreateProgramWithIL)
        .handle("context", Context, context)
        .bytes("il", Some(il))
        .size("length", il.len())
        .errcode()
        .returns_handle(Program, ret)
}

pub fn build_program(
    program: Handle,
    devices: &[Handle],
    options: Option<&str>,
    pfn_notify: u64,
    user_data: u64,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::BuildProgram)
        .handle("program", Program, program)
        .uint("num_devices", devices.len() as u32)
        .handle_array("device_list", Device, non_empty(devices))
        .string("options", options)
        .callback("pfn_notify", pfn_notify)
        .user_data("user_data", user_data)
        .returns_status(status)
}

#[allow(clippy::too_many_arguments)]
pub fn compile_program(
    program: Handle,
    devices: &[Handle],
    options: Option<&str>,
    headers: &[Handle],
    header_names: &[&str],
    pfn_notify: u64,
    user_data: u64,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::CompileProgram)
        .handle("program", Program, program)
        .uint("num_devices", devices.len() as u32)
        .handle_array("device_list", Device, non_empty(devices))
        .string("options", options)
        .uint("num_input_headers", headers.len() as u32)
        .handle_array("input_headers", Program, non_empty(headers))
        .strings("header_include_names", non_empty(header_names))
        .callback("pfn_notify", pfn_notify)
        .user_data("user_data", user_data)
        .returns_status(status)
}

#[allow(clippy::too_many_arguments)]
pub fn link_program(
    context: Handle,
    devices: &[Handle],
    options: Option<&str>,
    inputs: &[Handle],
    pfn_notify: u64,
    user_data: u64,
    ret: Handle,
) -> CallCapture {
    CallCapture::new(EntryPoint::LinkProgram)
        .handle("context", Context, context)
        .uint("num_devices", devices.len() as u32)
        .handle_array("device_list", Device, non_empty(devices))
        .string("options", options)
        .uint("num_input_programs", inputs.len() as u32)
        .handle_array("input_programs", Program, non_empty(inputs))
        .callback("pfn_notify", pfn_notify)
        .user_data("user_data", user_data)
        .errcode()
        .returns_handle(Program, ret)
}

pub fn set_program_specialization_constant(program: Handle, spec_id: u32, value: &[u8], status: i32) -> CallCapture {
    CallCapture::new(EntryPoint::SetProgramSpecializationConstant)
        .handle("program", Program, program)
        .uint("spec_id", spec_id)
        .size("spec_size", value.len())
        .bytes("spec_value", Some(value))
        .returns_status(status)
}

pub fn unload_platform_compiler(platform: Handle, status: i32) -> CallCapture {
    CallCapture::new(EntryPoint::UnloadPlatformCompiler)
        .handle("platform", Platform, platform)
        .returns_status(status)
}

pub fn unload_compiler(status: i32) -> CallCapture {
    CallCapture::new(EntryPoint::UnloadCompiler).returns_status(status)
}

// Kernels

pub fn create_kernel(program: Handle, kernel_name: &str, ret: Handle) -> CallCapture {
    CallCapture::new(EntryPoint::CreateKernel)
        .handle("program", Program, program)
        .string("kernel_name", Some(kernel_name))
        .errcode()
        .returns_handle(Kernel, ret)
}

pub fn create_kernels_in_program(
    program: Handle,
    num_kernels: u32,
    kernels: Option<&[Handle]>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::CreateKernelsInProgram)
        .handle("program", Program, program)
        .uint("num_kernels", num_kernels)
        .handle_array_out("kernels", Kernel, kernels)
        .scalar_out("num_kernels_ret", 0)
        .returns_status(status)
}

pub fn clone_kernel(source_kernel: Handle, ret: Handle) -> CallCapture {
    CallCapture::new(EntryPoint::CloneKernel)
        .handle("source_kernel", Kernel, source_kernel)
        .errcode()
        .returns_handle(Kernel, ret)
}

/// `arg_value` holds `arg_size` bytes; for a memory object, sampler or queue argument those
/// bytes are the handle, which the session rewrites into a map lookup.
pub fn set_kernel_arg(kernel: Handle, arg_index: u32, arg_size: usize, arg_value: Option<&[u8]>, status: i32) -> CallCapture {
    CallCapture::new(EntryPoint::SetKernelArg)
        .handle("kernel", Kernel, kernel)
        .uint("arg_index", arg_index)
        .size("arg_size", arg_size)
        .bytes("arg_value", arg_value)
        .returns_status(status)
}

pub fn set_kernel_arg_svm_pointer(kernel: Handle, arg_index: u32, arg_value: u64, status: i32) -> CallCapture {
    CallCapture::new(EntryPoint::SetKernelArgSVMPointer)
        .handle("kernel", Kernel, kernel)
        .uint("arg_index", arg_index)
        .pointer("arg_value", arg_value)
        .returns_status(status)
}

pub fn set_kernel_exec_info(kernel: Handle, param_name: u32, value: &[u8], status: i32) -> CallCapture {
    CallCapture::new(EntryPoint::SetKernelExecInfo)
        .handle("kernel", Kernel, kernel)
        .enumerant("param_name", param_name)
        .size("param_value_size", value.len())
        .bytes("param_value", Some(value))
        .returns_status(status)
}

// Events

pub fn wait_for_events(events: &[Handle], status: i32) -> CallCapture {
    CallCapture::new(EntryPoint::WaitForEvents)
        .uint("num_events", events.len() as u32)
        .handle_array("event_list", Event, non_empty(events))
        .returns_status(status)
}

pub fn create_user_event(context: Handle, ret: Handle) -> CallCapture {
    CallCapture::new(EntryPoint::CreateUserEvent)
        .handle("context", Context, context)
        .errcode()
        .returns_handle(Event, ret)
}

pub fn set_user_event_status(event: Handle, execution_status: i32, status: i32) -> CallCapture {
    CallCapture::new(EntryPoint::SetUserEventStatus)
        .handle("event", Event, event)
        .int("execution_status", execution_status)
        .returns_status(status)
}

pub fn set_event_callback(event: Handle, callback_type: i32, pfn_notify: u64, user_data: u64, status: i32) -> CallCapture {
    CallCapture::new(EntryPoint::SetEventCallback)
        .handle("event", Event, event)
        .int("command_exec_callback_type", callback_type)
        .callback("pfn_notify", pfn_notify)
        .user_data("user_data", user_data)
        .returns_status(status)
}

// Buffer commands

#[allow(clippy::too_many_arguments)]
pub fn enqueue_read_buffer(
    queue: Handle,
    buffer: Handle,
    blocking: bool,
    offset: usize,
    size: usize,
    ptr: u64,
    waits: &[Handle],
    event: Option<Handle>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueReadBuffer)
        .handle("command_queue", CommandQueue, queue)
        .handle("buffer", Mem, buffer)
        .boolean("blocking_read", blocking)
        .size("offset", offset)
        .size("size", size)
        .pointer("ptr", ptr)
        .wait_list(waits, event)
        .returns_status(status)
}

#[allow(clippy::too_many_arguments)]
pub fn enqueue_write_buffer(
    queue: Handle,
    buffer: Handle,
    blocking: bool,
    offset: usize,
    data: &[u8],
    waits: &[Handle],
    event: Option<Handle>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueWriteBuffer)
        .handle("command_queue", CommandQueue, queue)
        .handle("buffer", Mem, buffer)
        .boolean("blocking_write", blocking)
        .size("offset", offset)
        .size("size", data.len())
        .bytes("ptr", Some(data))
        .wait_list(waits, event)
        .returns_status(status)
}

/// Geometry shared by the rectangular buffer transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferRect {
    pub buffer_origin: [usize; 3],
    pub host_origin: [usize; 3],
    pub region: [usize; 3],
    pub buffer_row_pitch: usize,
    pub buffer_slice_pitch: usize,
    pub host_row_pitch: usize,
    pub host_slice_pitch: usize,
}

impl CallCapture {
    fn buffer_rect(self, rect: &BufferRect) -> Self {
        self.size_array("buffer_origin", Some(&rect.buffer_origin[..]))
            .size_array("host_origin", Some(&rect.host_origin[..]))
            .size_array("region", Some(&rect.region[..]))
            .size("buffer_row_pitch", rect.buffer_row_pitch)
            .size("buffer_slice_pitch", rect.buffer_slice_pitch)
            .size("host_row_pitch", rect.host_row_pitch)
            .size("host_slice_pitch", rect.host_slice_pitch)
    }
}

#[allow(clippy::too_many_arguments)]
pub fn enqueue_read_buffer_rect(
    queue: Handle,
    buffer: Handle,
    blocking: bool,
    rect: &BufferRect,
    ptr: u64,
    waits: &[Handle],
    event: Option<Handle>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueReadBufferRect)
        .handle("command_queue", CommandQueue, queue)
        .handle("buffer", Mem, buffer)
        .boolean("blocking_read", blocking)
        .buffer_rect(rect)
        .pointer("ptr", ptr)
        .wait_list(waits, event)
        .returns_status(status)
}

/// `data` is the host memory the rectangle is read from, sized by the host pitches.
#[allow(clippy::too_many_arguments)]
pub fn enqueue_write_buffer_rect(
    queue: Handle,
    buffer: Handle,
    blocking: bool,
    rect: &BufferRect,
    data: &[u8],
    waits: &[Handle],
    event: Option<Handle>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueWriteBufferRect)
        .handle("command_queue", CommandQueue, queue)
        .handle("buffer", Mem, buffer)
        .boolean("blocking_write", blocking)
        .buffer_rect(rect)
        .bytes("ptr", Some(data))
        .wait_list(waits, event)
        .returns_status(status)
}

#[allow(clippy::too_many_arguments)]
pub fn enqueue_fill_buffer(
    queue: Handle,
    buffer: Handle,
    pattern: &[u8],
    offset: usize,
    size: usize,
    waits: &[Handle],
    event: Option<Handle>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueFillBuffer)
        .handle("command_queue", CommandQueue, queue)
        .handle("buffer", Mem, buffer)
        .bytes("pattern", Some(pattern))
        .size("pattern_size", pattern.len())
        .size("offset", offset)
        .size("size", size)
        .wait_list(waits, event)
        .returns_status(status)
}

#[allow(clippy::too_many_arguments)]
pub fn enqueue_copy_buffer(
    queue: Handle,
    src_buffer: Handle,
    dst_buffer: Handle,
    src_offset: usize,
    dst_offset: usize,
    size: usize,
    waits: &[Handle],
    event: Option<Handle>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueCopyBuffer)
        .handle("command_queue", CommandQueue, queue)
        .handle("src_buffer", Mem, src_buffer)
        .handle("dst_buffer", Mem, dst_buffer)
        .size("src_offset", src_offset)
        .size("dst_offset", dst_offset)
        .size("size", size)
        .wait_list(waits, event)
        .returns_status(status)
}

/// `rect` uses buffer fields for the source and host fields for the destination.
#[allow(clippy::too_many_arguments)]
pub fn enqueue_copy_buffer_rect(
    queue: Handle,
    src_buffer: Handle,
    dst_buffer: Handle,
    rect: &BufferRect,
    waits: &[Handle],
    event: Option<Handle>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueCopyBufferRect)
        .handle("command_queue", CommandQueue, queue)
        .handle("src_buffer", Mem, src_buffer)
        .handle("dst_buffer", Mem, dst_buffer)
        .size_array("src_origin", Some(&rect.buffer_origin[..]))
        .size_array("dst_origin", Some(&rect.host_origin[..]))
        .size_array("region", Some(&rect.region[..]))
        .size("src_row_pitch", rect.buffer_row_pitch)
        .size("src_slice_pitch", rect.buffer_slice_pitch)
        .size("dst_row_pitch", rect.host_row_pitch)
        .size("dst_slice_pitch", rect.host_slice_pitch)
        .wait_list(waits, event)
        .returns_status(status)
}

// Image commands

#[allow(clippy::too_many_arguments)]
pub fn enqueue_read_image(
    queue: Handle,
    image: Handle,
    blocking: bool,
    origin: [usize; 3],
    region: [usize; 3],
    row_pitch: usize,
    slice_pitch: usize,
    ptr: u64,
    waits: &[Handle],
    event: Option<Handle>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueReadImage)
        .handle("command_queue", CommandQueue, queue)
        .handle("image", Mem, image)
        .boolean("blocking_read", blocking)
        .size_array("origin", Some(&origin[..]))
        .size_array("region", Some(&region[..]))
        .size("row_pitch", row_pitch)
        .size("slice_pitch", slice_pitch)
        .pointer("ptr", ptr)
        .wait_list(waits, event)
        .returns_status(status)
}

/// `data` is sized by [`crate::host::image_pitches`] for the region and pitches.
#[allow(clippy::too_many_arguments)]
pub fn enqueue_write_image(
    queue: Handle,
    image: Handle,
    blocking: bool,
    origin: [usize; 3],
    region: [usize; 3],
    input_row_pitch: usize,
    input_slice_pitch: usize,
    data: &[u8],
    waits: &[Handle],
    event: Option<Handle>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueWriteImage)
        .handle("command_queue", CommandQueue, queue)
        .handle("image", Mem, image)
        .boolean("blocking_write", blocking)
        .size_array("origin", Some(&origin[..]))
        .size_array("region", Some(&region[..]))
        .size("input_row_pitch", input_row_pitch)
        .size("input_slice_pitch", input_slice_pitch)
        .bytes("ptr", Some(data))
        .wait_list(waits, event)
        .returns_status(status)
}

#[allow(clippy::too_many_arguments)]
pub fn enqueue_fill_image(
    queue: Handle,
    image: Handle,
    fill_color: &[u8; 16],
    origin: [usize; 3],
    region: [usize; 3],
    waits: &[Handle],
    event: Option<Handle>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueFillImage)
        .handle("command_queue", CommandQueue, queue)
        .handle("image", Mem, image)
        .bytes("fill_color", Some(&fill_color[..]))
        .size_array("origin", Some(&origin[..]))
        .size_array("region", Some(&region[..]))
        .wait_list(waits, event)
        .returns_status(status)
}

#[allow(clippy::too_many_arguments)]
pub fn enqueue_copy_image(
    queue: Handle,
    src_image: Handle,
    dst_image: Handle,
    src_origin: [usize; 3],
    dst_origin: [usize; 3],
    region: [usize; 3],
    waits: &[Handle],
    event: Option<Handle>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueCopyImage)
        .handle("command_queue", CommandQueue, queue)
        .handle("src_image", Mem, src_image)
        .handle("dst_image", Mem, dst_image)
        .size_array("src_origin", Some(&src_origin[..]))
        .size_array("dst_origin", Some(&dst_origin[..]))
        .size_array("region", Some(&region[..]))
        .wait_list(waits, event)
        .returns_status(status)
}

#[allow(clippy::too_many_arguments)]
pub fn enqueue_copy_image_to_buffer(
    queue: Handle,
    src_image: Handle,
    dst_buffer: Handle,
    src_origin: [usize; 3],
    region: [usize; 3],
    dst_offset: usize,
    waits: &[Handle],
    event: Option<Handle>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueCopyImageToBuffer)
        .handle("command_queue", CommandQueue, queue)
        .handle("src_image", Mem, src_image)
        .handle("dst_buffer", Mem, dst_buffer)
        .size_array("src_origin", Some(&src_origin[..]))
        .size_array("region", Some(&region[..]))
        .size("dst_offset", dst_offset)
        .wait_list(waits, event)
        .returns_status(status)
}

#[allow(clippy::too_many_arguments)]
pub fn enqueue_copy_buffer_to_image(
    queue: Handle,
    src_buffer: Handle,
    dst_image: Handle,
    src_offset: usize,
    dst_origin: [usize; 3],
    region: [usize; 3],
    waits: &[Handle],
    event: Option<Handle>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueCopyBufferToImage)
        .handle("command_queue", CommandQueue, queue)
        .handle("src_buffer", Mem, src_buffer)
        .handle("dst_image", Mem, dst_image)
        .size("src_offset", src_offset)
        .size_array("dst_origin", Some(&dst_origin[..]))
        .size_array("region", Some(&region[..]))
        .wait_list(waits, event)
        .returns_status(status)
}

// Mapping

#[allow(clippy::too_many_arguments)]
pub fn enqueue_map_buffer(
    queue: Handle,
    buffer: Handle,
    blocking: bool,
    flags: MapFlags,
    offset: usize,
    size: usize,
    waits: &[Handle],
    event: Option<Handle>,
    ret: u64,
) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueMapBuffer)
        .handle("command_queue", CommandQueue, queue)
        .handle("buffer", Mem, buffer)
        .boolean("blocking_map", blocking)
        .bitfield("map_flags", flags.bits())
        .size("offset", offset)
        .size("size", size)
        .wait_list(waits, event)
        .errcode()
        .returns_pointer(ret)
}

/// `pitches` are the row and slice pitch the implementation returned for the mapping.
#[allow(clippy::too_many_arguments)]
pub fn enqueue_map_image(
    queue: Handle,
    image: Handle,
    blocking: bool,
    flags: MapFlags,
    origin: [usize; 3],
    region: [usize; 3],
    pitches: (usize, usize),
    waits: &[Handle],
    event: Option<Handle>,
    ret: u64,
) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueMapImage)
        .handle("command_queue", CommandQueue, queue)
        .handle("image", Mem, image)
        .boolean("blocking_map", blocking)
        .bitfield("map_flags", flags.bits())
        .size_array("origin", Some(&origin[..]))
        .size_array("region", Some(&region[..]))
        .size_out("image_row_pitch", pitches.0)
        .size_out("image_slice_pitch", pitches.1)
        .wait_list(waits, event)
        .errcode()
        .returns_pointer(ret)
}

pub fn enqueue_unmap_mem_object(
    queue: Handle,
    memobj: Handle,
    mapped_ptr: u64,
    waits: &[Handle],
    event: Option<Handle>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueUnmapMemObject)
        .handle("command_queue", CommandQueue, queue)
        .handle("memobj", Mem, memobj)
        .pointer("mapped_ptr", mapped_ptr)
        .wait_list(waits, event)
        .returns_status(status)
}

pub fn enqueue_migrate_mem_objects(
    queue: Handle,
    mem_objects: &[Handle],
    flags: u64,
    waits: &[Handle],
    event: Option<Handle>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueMigrateMemObjects)
        .handle("command_queue", CommandQueue, queue)
        .uint("num_mem_objects", mem_objects.len() as u32)
        .handle_array("mem_objects", Mem, non_empty(mem_objects))
        .bitfield("flags", flags)
        .wait_list(waits, event)
        .returns_status(status)
}

// Kernel execution

#[allow(clippy::too_many_arguments)]
pub fn enqueue_nd_range_kernel(
    queue: Handle,
    kernel: Handle,
    global_work_offset: Option<&[usize]>,
    global_work_size: &[usize],
    local_work_size: Option<&[usize]>,
    waits: &[Handle],
    event: Option<Handle>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueNDRangeKernel)
        .handle("command_queue", CommandQueue, queue)
        .handle("kernel", Kernel, kernel)
        .uint("work_dim", global_work_size.len() as u32)
        .size_array("global_work_offset", global_work_offset)
        .size_array("global_work_size", Some(global_work_size))
        .size_array("local_work_size", local_work_size)
        .wait_list(waits, event)
        .returns_status(status)
}

pub fn enqueue_task(queue: Handle, kernel: Handle, waits: &[Handle], event: Option<Handle>, status: i32) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueTask)
        .handle("command_queue", CommandQueue, queue)
        .handle("kernel", Kernel, kernel)
        .wait_list(waits, event)
        .returns_status(status)
}

/// `args_mem_loc` are byte offsets into `args` where the replay stores the mem handles.
#[allow(clippy::too_many_arguments)]
pub fn enqueue_native_kernel(
    queue: Handle,
    user_func: u64,
    args: &[u8],
    mem_list: &[Handle],
    args_mem_loc: &[usize],
    waits: &[Handle],
    event: Option<Handle>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueNativeKernel)
        .handle("command_queue", CommandQueue, queue)
        .callback("user_func", user_func)
        .bytes("args", Some(args))
        .size("cb_args", args.len())
        .uint("num_mem_objects", mem_list.len() as u32)
        .handle_array("mem_list", Mem, non_empty(mem_list))
        .offsets("args_mem_loc", non_empty(args_mem_loc))
        .wait_list(waits, event)
        .returns_status(status)
}

// Synchronization

pub fn enqueue_marker(queue: Handle, event: Option<Handle>, status: i32) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueMarker)
        .handle("command_queue", CommandQueue, queue)
        .handle_out("event", Event, event)
        .returns_status(status)
}

pub fn enqueue_marker_with_wait_list(queue: Handle, waits: &[Handle], event: Option<Handle>, status: i32) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueMarkerWithWaitList)
        .handle("command_queue", CommandQueue, queue)
        .wait_list(waits, event)
        .returns_status(status)
}

pub fn enqueue_wait_for_events(queue: Handle, events: &[Handle], status: i32) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueWaitForEvents)
        .handle("command_queue", CommandQueue, queue)
        .uint("num_events", events.len() as u32)
        .handle_array("event_list", Event, non_empty(events))
        .returns_status(status)
}

pub fn enqueue_barrier(queue: Handle, status: i32) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueBarrier)
        .handle("command_queue", CommandQueue, queue)
        .returns_status(status)
}

pub fn enqueue_barrier_with_wait_list(queue: Handle, waits: &[Handle], event: Option<Handle>, status: i32) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueBarrierWithWaitList)
        .handle("command_queue", CommandQueue, queue)
        .wait_list(waits, event)
        .returns_status(status)
}

// SVM commands

#[allow(clippy::too_many_arguments)]
pub fn enqueue_svm_free(
    queue: Handle,
    svm_pointers: &[u64],
    pfn_free_func: u64,
    user_data: u64,
    waits: &[Handle],
    event: Option<Handle>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueSVMFree)
        .handle("command_queue", CommandQueue, queue)
        .uint("num_svm_pointers", svm_pointers.len() as u32)
        .pointers("svm_pointers", non_empty(svm_pointers))
        .callback("pfn_free_func", pfn_free_func)
        .user_data("user_data", user_data)
        .wait_list(waits, event)
        .returns_status(status)
}

/// `src` holds the `size` bytes read from the source pointer at call time.
#[allow(clippy::too_many_arguments)]
pub fn enqueue_svm_memcpy(
    queue: Handle,
    blocking: bool,
    dst_ptr: u64,
    src: &[u8],
    waits: &[Handle],
    event: Option<Handle>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueSVMMemcpy)
        .handle("command_queue", CommandQueue, queue)
        .boolean("blocking_copy", blocking)
        .pointer("dst_ptr", dst_ptr)
        .bytes("src_ptr", Some(src))
        .size("size", src.len())
        .wait_list(waits, event)
        .returns_status(status)
}

#[allow(clippy::too_many_arguments)]
pub fn enqueue_svm_mem_fill(
    queue: Handle,
    svm_ptr: u64,
    pattern: &[u8],
    size: usize,
    waits: &[Handle],
    event: Option<Handle>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueSVMMemFill)
        .handle("command_queue", CommandQueue, queue)
        .pointer("svm_ptr", svm_ptr)
        .bytes("pattern", Some(pattern))
        .size("pattern_size", pattern.len())
        .size("size", size)
        .wait_list(waits, event)
        .returns_status(status)
}

#[allow(clippy::too_many_arguments)]
pub fn enqueue_svm_map(
    queue: Handle,
    blocking: bool,
    flags: MapFlags,
    svm_ptr: u64,
    size: usize,
    waits: &[Handle],
    event: Option<Handle>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueSVMMap)
        .handle("command_queue", CommandQueue, queue)
        .boolean("blocking_map", blocking)
        .bitfield("flags", flags.bits())
        .pointer("svm_ptr", svm_ptr)
        .size("size", size)
        .wait_list(waits, event)
        .returns_status(status)
}

pub fn enqueue_svm_unmap(queue: Handle, svm_ptr: u64, waits: &[Handle], event: Option<Handle>, status: i32) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueSVMUnmap)
        .handle("command_queue", CommandQueue, queue)
        .pointer("svm_ptr", svm_ptr)
        .wait_list(waits, event)
        .returns_status(status)
}

#[allow(clippy::too_many_arguments)]
pub fn enqueue_svm_migrate_mem(
    queue: Handle,
    svm_pointers: &[u64],
    sizes: Option<&[usize]>,
    flags: u64,
    waits: &[Handle],
    event: Option<Handle>,
    status: i32,
) -> CallCapture {
    CallCapture::new(EntryPoint::EnqueueSVMMigrateMem)
        .handle("command_queue", CommandQueue, queue)
        .uint("num_svm_pointers", svm_pointers.len() as u32)
        .pointers("svm_pointers", non_empty(svm_pointers))
        .size_array("sizes", sizes)
        .bitfield("flags", flags)
        .wait_list(waits, event)
        .returns_status(status)
}

// Extensions

pub fn get_extension_function_address(func_name: &str, ret: u64) -> CallCapture {
    CallCapture::new(EntryPoint::GetExtensionFunctionAddress)
        .string("func_name", Some(func_name))
        .returns_pointer(ret)
}

pub fn get_extension_function_address_for_platform(platform: Handle, func_name: &str, ret: u64) -> CallCapture {
    CallCapture::new(EntryPoint::GetExtensionFunctionAddressForPlatform)
        .handle("platform", Platform, platform)
        .string("func_name", Some(func_name))
        .returns_pointer(ret)
}
