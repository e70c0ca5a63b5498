//! The closed set of intercepted OpenCL entry points and the per-entry-point tables the
//! capture session consults.

use crate::handle::ResourceKind;

macro_rules! entry_points {
    ($($variant:ident),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum EntryPoint {
            $($variant,)*
        }

        impl EntryPoint {
            pub const ALL: &'static [EntryPoint] = &[$(EntryPoint::$variant,)*];

            /// The OpenCL function name, e.g. `clCreateBuffer`.
            pub fn name(self) -> &'static str {
                match self {
                    $(EntryPoint::$variant => concat!("cl", stringify!($variant)),)*
                }
            }
        }
    };
}

entry_points! {
    // Platforms and devices
    GetPlatformIDs,
    GetPlatformInfo,
    GetDeviceIDs,
    GetDeviceInfo,
    CreateSubDevices,
    RetainDevice,
    ReleaseDevice,
    GetHostTimer,
    // Contexts
    CreateContext,
    CreateContextFromType,
    RetainContext,
    ReleaseContext,
    GetContextInfo,
    SetContextDestructorCallback,
    // Command queues
    CreateCommandQueue,
    CreateCommandQueueWithProperties,
    RetainCommandQueue,
    ReleaseCommandQueue,
    GetCommandQueueInfo,
    SetDefaultDeviceCommandQueue,
    Flush,
    Finish,
    // Memory objects
    CreateBuffer,
    CreateBufferWithProperties,
    CreateSubBuffer,
    CreateImage,
    CreateImageWithProperties,
    CreateImage2D,
    CreateImage3D,
    CreatePipe,
    RetainMemObject,
    ReleaseMemObject,
    GetSupportedImageFormats,
    GetMemObjectInfo,
    GetImageInfo,
    GetPipeInfo,
    SetMemObjectDestructorCallback,
    // Shared virtual memory
    SVMAlloc,
    SVMFree,
    // Samplers
    CreateSampler,
    CreateSamplerWithProperties,
    RetainSampler,
    ReleaseSampler,
    GetSamplerInfo,
    // Programs
    CreateProgramWithSource,
    CreateProgramWithBinary,
    CreateProgramWithBuiltInKernels,
    CreateProgramWithIL,
    RetainProgram,
    ReleaseProgram,
    BuildProgram,
    CompileProgram,
    LinkProgram,
    SetProgramSpecializationConstant,
    UnloadPlatformCompiler,
    UnloadCompiler,
    GetProgramInfo,
    GetProgramBuildInfo,
    // Kernels
    CreateKernel,
    CreateKernelsInProgram,
    CloneKernel,
    RetainKernel,
    ReleaseKernel,
    SetKernelArg,
    SetKernelArgSVMPointer,
    SetKernelExecInfo,
    GetKernelInfo,
    GetKernelArgInfo,
    GetKernelWorkGroupInfo,
    GetKernelSubGroupInfo,
    // Events
    WaitForEvents,
    GetEventInfo,
    CreateUserEvent,
    RetainEvent,
    ReleaseEvent,
    SetUserEventStatus,
    SetEventCallback,
    GetEventProfilingInfo,
    // Enqueued commands
    EnqueueReadBuffer,
    EnqueueReadBufferRect,
    EnqueueWriteBuffer,
    EnqueueWriteBufferRect,
    EnqueueFillBuffer,
    EnqueueCopyBuffer,
    EnqueueCopyBufferRect,
    EnqueueReadImage,
    EnqueueWriteImage,
    EnqueueFillImage,
    EnqueueCopyImage,
    EnqueueCopyImageToBuffer,
    EnqueueCopyBufferToImage,
    EnqueueMapBuffer,
    EnqueueMapImage,
    EnqueueUnmapMemObject,
    EnqueueMigrateMemObjects,
    EnqueueNDRangeKernel,
    EnqueueTask,
    EnqueueNativeKernel,
    EnqueueMarker,
    EnqueueMarkerWithWaitList,
    EnqueueWaitForEvents,
    EnqueueBarrier,
    EnqueueBarrierWithWaitList,
    EnqueueSVMFree,
    EnqueueSVMMemcpy,
    EnqueueSVMMemFill,
    EnqueueSVMMap,
    EnqueueSVMUnmap,
    EnqueueSVMMigrateMem,
    // Extensions
    GetExtensionFunctionAddress,
    GetExtensionFunctionAddressForPlatform,
}

impl EntryPoint {
    /// Calls that close a frame of replay work.
    pub fn is_frame_end(self) -> bool {
        matches!(
            self,
            EntryPoint::EnqueueNDRangeKernel | EntryPoint::EnqueueNativeKernel | EntryPoint::EnqueueTask
        )
    }

    /// Informational queries that are recorded to the info JSON instead of being replayed.
    pub fn is_info_query(self) -> bool {
        matches!(
            self,
            EntryPoint::GetPlatformInfo
                | EntryPoint::GetDeviceInfo
                | EntryPoint::GetContextInfo
                | EntryPoint::GetCommandQueueInfo
                | EntryPoint::GetProgramInfo
                | EntryPoint::GetProgramBuildInfo
                | EntryPoint::GetKernelInfo
                | EntryPoint::GetKernelArgInfo
                | EntryPoint::GetKernelWorkGroupInfo
                | EntryPoint::GetKernelSubGroupInfo
                | EntryPoint::GetEventInfo
                | EntryPoint::GetEventProfilingInfo
                | EntryPoint::GetMemObjectInfo
                | EntryPoint::GetImageInfo
                | EntryPoint::GetPipeInfo
                | EntryPoint::GetSamplerInfo
                | EntryPoint::GetSupportedImageFormats
        )
    }

    /// Enqueued commands that are dropped when captured before the window, since the snapshot
    /// restores whatever they did to memory. Map/unmap and SVM free stay so later unmaps and
    /// frees still pair up.
    pub fn is_prewindow_removable(self) -> bool {
        use EntryPoint::*;
        matches!(
            self,
            EnqueueNDRangeKernel
                | EnqueueNativeKernel
                | EnqueueTask
                | EnqueueReadBuffer
                | EnqueueWriteBuffer
                | EnqueueReadBufferRect
                | EnqueueWriteBufferRect
                | EnqueueReadImage
                | EnqueueWriteImage
                | EnqueueCopyBuffer
                | EnqueueCopyBufferRect
                | EnqueueCopyImage
                | EnqueueCopyBufferToImage
                | EnqueueCopyImageToBuffer
                | EnqueueFillBuffer
                | EnqueueFillImage
                | WaitForEvents
                | EnqueueWaitForEvents
                | EnqueueMarkerWithWaitList
                | EnqueueBarrierWithWaitList
                | EnqueueBarrier
                | EnqueueMarker
                | EnqueueMigrateMemObjects
                | EnqueueSVMMemcpy
                | EnqueueSVMMemFill
                | EnqueueSVMMigrateMem
        )
    }

    /// Commands submitted to a command queue.
    pub fn is_enqueue(self) -> bool {
        self.name().starts_with("clEnqueue")
    }

    /// Kind of object this call returns, for calls that create one through their return value.
    pub fn created_kind(self) -> Option<ResourceKind> {
        use EntryPoint::*;
        Some(match self {
            CreateContext | CreateContextFromType => ResourceKind::Context,
            CreateCommandQueue | CreateCommandQueueWithProperties => ResourceKind::CommandQueue,
            CreateBuffer | CreateBufferWithProperties | CreateSubBuffer | CreateImage
            | CreateImageWithProperties | CreateImage2D | CreateImage3D | CreatePipe => {
                ResourceKind::Mem
            }
            CreateSampler | CreateSamplerWithProperties => ResourceKind::Sampler,
            CreateProgramWithSource
            | CreateProgramWithBinary
            | CreateProgramWithBuiltInKernels
            | CreateProgramWithIL
            | LinkProgram => ResourceKind::Program,
            CreateKernel | CloneKernel => ResourceKind::Kernel,
            CreateUserEvent => ResourceKind::Event,
            SVMAlloc | EnqueueMapBuffer | EnqueueMapImage => ResourceKind::Void,
            _ => return None,
        })
    }

    /// Kind of object whose reference count this call decrements.
    pub fn released_kind(self) -> Option<ResourceKind> {
        use EntryPoint::*;
        Some(match self {
            ReleaseDevice => ResourceKind::Device,
            ReleaseContext => ResourceKind::Context,
            ReleaseCommandQueue => ResourceKind::CommandQueue,
            ReleaseMemObject => ResourceKind::Mem,
            ReleaseSampler => ResourceKind::Sampler,
            ReleaseProgram => ResourceKind::Program,
            ReleaseKernel => ResourceKind::Kernel,
            ReleaseEvent => ResourceKind::Event,
            _ => return None,
        })
    }

    pub fn is_image_create(self) -> bool {
        matches!(
            self,
            EntryPoint::CreateImage
                | EntryPoint::CreateImageWithProperties
                | EntryPoint::CreateImage2D
                | EntryPoint::CreateImage3D
        )
    }

    pub fn is_mem_create(self) -> bool {
        self.created_kind() == Some(ResourceKind::Mem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_carry_the_cl_prefix() {
        assert_eq!(EntryPoint::CreateBuffer.name(), "clCreateBuffer");
        assert_eq!(EntryPoint::SVMAlloc.name(), "clSVMAlloc");
        assert_eq!(EntryPoint::CreateProgramWithIL.name(), "clCreateProgramWithIL");
        assert!(EntryPoint::ALL.iter().all(|ep| ep.name().starts_with("cl")));
    }

    #[test]
    fn frame_end_and_info_sets_are_disjoint() {
        for ep in EntryPoint::ALL {
            assert!(!(ep.is_frame_end() && ep.is_info_query()), "{}", ep.name());
        }
        assert!(EntryPoint::EnqueueTask.is_frame_end());
        assert!(EntryPoint::GetDeviceInfo.is_info_query());
        assert!(!EntryPoint::GetDeviceIDs.is_info_query());
    }

    #[test]
    fn maps_survive_the_pre_window_sweep() {
        assert!(EntryPoint::EnqueueWriteBuffer.is_prewindow_removable());
        assert!(EntryPoint::WaitForEvents.is_prewindow_removable());
        assert!(!EntryPoint::EnqueueMapBuffer.is_prewindow_removable());
        assert!(!EntryPoint::EnqueueUnmapMemObject.is_prewindow_removable());
        assert!(!EntryPoint::EnqueueSVMFree.is_prewindow_removable());
    }
}
