use std::fmt;

/// Opaque native object handle as seen by the application.
///
/// The tracer never dereferences or owns the object behind a handle; it only uses the value as
/// a key and, for SVM/mapped pointers, as an address to hand back to the execution backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u64);

impl Handle {
    pub const NULL: Handle = Handle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for Handle {
    fn from(value: u64) -> Self {
        Handle(value)
    }
}

/// Kinds of resources that get their own index map in the replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Platform,
    Device,
    Context,
    CommandQueue,
    Mem,
    Event,
    Program,
    Kernel,
    Sampler,
    Void,
}

impl ResourceKind {
    /// Order of the capacities passed to `InitializeReplayCL2`.
    pub const ALL: [ResourceKind; 10] = [
        ResourceKind::Platform,
        ResourceKind::Device,
        ResourceKind::Context,
        ResourceKind::CommandQueue,
        ResourceKind::Mem,
        ResourceKind::Event,
        ResourceKind::Program,
        ResourceKind::Kernel,
        ResourceKind::Sampler,
        ResourceKind::Void,
    ];

    /// Name of the global array the replay fixture keeps for this kind.
    pub fn map_name(self) -> &'static str {
        match self {
            ResourceKind::Platform => "clPlatformsMap",
            ResourceKind::Device => "clDevicesMap",
            ResourceKind::Context => "clContextsMap",
            ResourceKind::CommandQueue => "clCommandQueuesMap",
            ResourceKind::Mem => "clMemMap",
            ResourceKind::Event => "clEventsMap",
            ResourceKind::Program => "clProgramsMap",
            ResourceKind::Kernel => "clKernelsMap",
            ResourceKind::Sampler => "clSamplerMap",
            ResourceKind::Void => "clVoidMap",
        }
    }

    /// OpenCL function releasing one reference of this kind, if the kind is reference counted.
    pub fn release_fn(self) -> Option<&'static str> {
        match self {
            ResourceKind::Device => Some("clReleaseDevice"),
            ResourceKind::Context => Some("clReleaseContext"),
            ResourceKind::CommandQueue => Some("clReleaseCommandQueue"),
            ResourceKind::Mem => Some("clReleaseMemObject"),
            ResourceKind::Event => Some("clReleaseEvent"),
            ResourceKind::Program => Some("clReleaseProgram"),
            ResourceKind::Kernel => Some("clReleaseKernel"),
            ResourceKind::Sampler => Some("clReleaseSampler"),
            ResourceKind::Platform | ResourceKind::Void => None,
        }
    }

    /// Element type used for `temporary*List` vectors in generated code.
    pub fn c_type(self) -> &'static str {
        match self {
            ResourceKind::Platform => "cl_platform_id",
            ResourceKind::Device => "cl_device_id",
            ResourceKind::Context => "cl_context",
            ResourceKind::CommandQueue => "cl_command_queue",
            ResourceKind::Mem => "cl_mem",
            ResourceKind::Event => "cl_event",
            ResourceKind::Program => "cl_program",
            ResourceKind::Kernel => "cl_kernel",
            ResourceKind::Sampler => "cl_sampler",
            ResourceKind::Void => "void *",
        }
    }

    /// Name of the fixture scratch vector used to pass arrays of this kind.
    pub fn temporary_list(self) -> &'static str {
        match self {
            ResourceKind::Platform => "temporaryPlatformsList",
            ResourceKind::Device => "temporaryDevicesList",
            ResourceKind::Context => "temporaryContextsList",
            ResourceKind::CommandQueue => "temporaryCommandQueuesList",
            ResourceKind::Mem => "temporaryBuffersList",
            ResourceKind::Event => "temporaryEventsList",
            ResourceKind::Program => "temporaryProgramsList",
            ResourceKind::Kernel => "temporaryKernelsList",
            ResourceKind::Sampler => "temporarySamplersList",
            ResourceKind::Void => "temporaryVoidPtrList",
        }
    }
}
