//! The capture session: the state machine every intercepted call goes through.
//!
//! Frames are counted from 1 and end at each kernel launch. Calls made before the capture
//! window accumulate into the setup list, where enqueued commands are dropped right away and
//! calls on objects that die are pruned. Memory those dropped commands touched is read back
//! when the window opens and restored by synthetic writes. Inside the window every frame is
//! written out as soon as it ends, and the index files, metadata and info JSON follow the last
//! one.

use std::fs;

use crate::binary::BinaryDataStore;
use crate::call::CallCapture;
use crate::capture;
use crate::cl::{MapFlags, CL_CONTEXT_PLATFORM};
use crate::config::CaptureConfig;
use crate::entry_point::EntryPoint;
use crate::error::{CaptureError, Result};
use crate::graph::ResourceGraph;
use crate::handle::{Handle, ResourceKind};
use crate::host::{region_size, ClHost, MemInfo};
use crate::index::ResourceIndexTracker;
use crate::info::{info_file_name, InfoLog};
use crate::metadata::{metadata_file_name, TraceJson};
use crate::param::{payload_u64s, ParamType, ParamValue, PropertiesKind};
use crate::prune;
use crate::replay::{frame_file_name, header_file_name, source_file_name, ReplayWriter};
use crate::snapshot::{MapRecord, MapRegion, SnapshotEngine, UnmapTrigger};

/// Fixture helper that copies captured context properties into `temporaryContextProps`.
pub const UPDATE_CONTEXT_PROPS_WITH_PLATFORM: &str = "UpdateCLContextPropertiesWithPlatform";
pub const UPDATE_CONTEXT_PROPS_NO_PLATFORM: &str = "UpdateCLContextPropertiesNoPlatform";

/// Kernel argument values that name one of these kinds are replayed as map lookups.
const ARG_HANDLE_KINDS: [ResourceKind; 3] = [
    ResourceKind::Mem,
    ResourceKind::Sampler,
    ResourceKind::CommandQueue,
];

#[derive(Debug)]
pub struct CaptureSession {
    config: CaptureConfig,
    frame: u32,
    frame_calls: Vec<CallCapture>,
    setup_calls: Vec<CallCapture>,
    tracker: ResourceIndexTracker,
    graph: ResourceGraph,
    snapshot: SnapshotEngine,
    writer: ReplayWriter,
    store: Option<BinaryDataStore>,
    info: InfoLog,
    reset: Vec<(ResourceKind, Handle)>,
    poisoned: bool,
    finished: bool,
}

impl CaptureSession {
    /// Creates the output directory and the binary data file.
    pub fn new(config: CaptureConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.out_dir)?;
        let store = BinaryDataStore::create(
            config.out_dir.join(config.binary_file_name()),
            config.store_options(),
        )?;
        let writer = ReplayWriter::new(
            config.out_dir.clone(),
            config.label.clone(),
            config.function_size_limit,
        );
        tracing::info!(
            out_dir = %config.out_dir.display(),
            frame_start = config.frame_start,
            frame_end = config.frame_end,
            "opened capture session"
        );
        Ok(Self {
            config,
            frame: 1,
            frame_calls: Vec::new(),
            setup_calls: Vec::new(),
            tracker: ResourceIndexTracker::new(),
            graph: ResourceGraph::new(),
            snapshot: SnapshotEngine::new(),
            writer,
            store: Some(store),
            info: InfoLog::new(),
            reset: Vec::new(),
            poisoned: false,
            finished: false,
        })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Application frame the next call belongs to.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Whether the trace has been written and further calls are ignored.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn frame_calls(&self) -> &[CallCapture] {
        &self.frame_calls
    }

    pub fn setup_calls(&self) -> &[CallCapture] {
        &self.setup_calls
    }

    pub fn tracker(&self) -> &ResourceIndexTracker {
        &self.tracker
    }

    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    pub fn snapshot(&self) -> &SnapshotEngine {
        &self.snapshot
    }

    pub fn info(&self) -> &InfoLog {
        &self.info
    }

    /// Objects created before the window that `ResetReplay` will release.
    pub fn reset_objects(&self) -> &[(ResourceKind, Handle)] {
        &self.reset
    }

    fn in_window(&self) -> bool {
        self.frame >= self.config.frame_start
    }

    fn replay_frame(&self) -> u32 {
        self.frame - self.config.frame_start + 1
    }

    /// Records one intercepted call. Must be called after the implementation ran it, with the
    /// results it produced.
    ///
    /// An error poisons the session: it is logged, implicit retains are dropped and every
    /// later call is ignored. The application's own call is unaffected either way.
    pub fn capture_call<H: ClHost + ?Sized>(&mut self, host: &mut H, call: CallCapture) -> Result<()> {
        if self.poisoned || self.finished {
            return Ok(());
        }
        let name = call.name().to_owned();
        match self.capture(host, call) {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::error!(call = %name, frame = self.frame, error = %err, "capture failed; no trace will be written");
                self.poisoned = true;
                if let Err(release_err) = self.snapshot.release_all_implicit(host) {
                    tracing::warn!(error = %release_err, "failed to drop implicit retains");
                }
                Err(err)
            }
        }
    }

    fn capture<H: ClHost + ?Sized>(&mut self, host: &mut H, mut call: CallCapture) -> Result<()> {
        if self.frame > self.config.frame_end {
            self.finished = true;
            return Ok(());
        }
        let ep = call.entry_point();
        if ep.is_some_and(EntryPoint::is_info_query) {
            self.info.record(&call);
            return Ok(());
        }

        if let Some(ep) = ep {
            if let Some(props_call) = self.pre_call_updates(host, ep, &mut call) {
                self.push(props_call);
            }
        }
        self.tracker.register_call(&mut call);
        if let Some(ep) = ep {
            self.update_reset_list(ep, &call);
        }

        let frame_end = ep.is_some_and(EntryPoint::is_frame_end);
        self.frame_calls.push(call);

        let trigger = match ep {
            Some(ep) => self.post_call_updates(host, ep)?,
            None => None,
        };
        if self.in_window() || (frame_end && self.frame + 1 == self.config.frame_start) {
            self.take_snapshot(host, trigger)?;
        }
        if let Some(t) = trigger {
            self.snapshot.take_map(t.mapped_ptr);
        }

        if frame_end && self.in_window() {
            self.write_frame()?;
            if self.frame == self.config.frame_end {
                self.write_trace(self.frame)?;
                self.snapshot.release_all_implicit(host)?;
                self.finished = true;
            }
        }
        if frame_end {
            if self.frame + 1 == self.config.frame_start {
                self.open_window()?;
            }
            self.frame += 1;
            tracing::debug!(frame = self.frame, "frame started");
        }
        Ok(())
    }

    fn push(&mut self, mut call: CallCapture) {
        self.tracker.register_call(&mut call);
        self.frame_calls.push(call);
    }

    /// Rewrites arguments before indices are assigned. Returns a synthetic call that must
    /// precede `call`.
    fn pre_call_updates<H: ClHost + ?Sized>(
        &mut self,
        host: &mut H,
        ep: EntryPoint,
        call: &mut CallCapture,
    ) -> Option<CallCapture> {
        match ep {
            EntryPoint::GetExtensionFunctionAddress
            | EntryPoint::GetExtensionFunctionAddressForPlatform => {
                let name = match call.find("func_name").map(|p| &p.value) {
                    Some(ParamValue::Str(name)) => Some(name.clone()),
                    _ => None,
                };
                if let Some(name) = name {
                    self.writer.note_extension_function(&name);
                    call.assign_to = Some(name);
                }
                None
            }
            EntryPoint::CreateContext | EntryPoint::CreateContextFromType => {
                self.context_properties_call(call)
            }
            EntryPoint::SetKernelArg => {
                self.kernel_arg_handle(call);
                None
            }
            EntryPoint::EnqueueReadBuffer => {
                if let Some(size) = call.find("size").and_then(|p| p.as_usize()) {
                    self.writer.note_read_size(size);
                }
                None
            }
            EntryPoint::EnqueueReadBufferRect => {
                let region = array3(call.find("region").map(|p| p.size_t_values()), 1);
                let row = call.find("host_row_pitch").and_then(|p| p.as_usize()).unwrap_or(0);
                let slice = call.find("host_slice_pitch").and_then(|p| p.as_usize()).unwrap_or(0);
                let row = if row != 0 { row } else { region[0] };
                let slice = if slice != 0 { slice } else { row * region[1] };
                self.writer.note_read_size(region_size(region, 1, row, slice));
                None
            }
            EntryPoint::EnqueueReadImage => {
                let image = call.find("image").and_then(|p| p.handle());
                if let Some(Ok(MemInfo::Image(info))) = image.map(|i| host.mem_info(i)) {
                    let region = array3(call.find("region").map(|p| p.size_t_values()), 1);
                    let row = call.find("row_pitch").and_then(|p| p.as_usize()).unwrap_or(0);
                    let slice = call.find("slice_pitch").and_then(|p| p.as_usize()).unwrap_or(0);
                    self.writer.note_read_size(info.pitches(region, row, slice).size);
                }
                None
            }
            _ => None,
        }
    }

    /// Moves the property list of a context create into an `UpdateCLContextProperties*` call,
    /// so the replay can patch in the platform it runs on.
    fn context_properties_call(&self, call: &mut CallCapture) -> Option<CallCapture> {
        let param = call.params.iter_mut().find(|p| {
            p.name == "properties" && p.ty == ParamType::Properties(PropertiesKind::Context)
        })?;
        let bytes = param.payload.take()?;
        let props = payload_u64s(&bytes);

        let mut platform_at = None;
        let mut i = 0;
        while i + 1 < props.len() && props[i] != 0 {
            if props[i] == CL_CONTEXT_PLATFORM {
                platform_at = Some(i + 1);
            }
            i += 2;
        }

        let update = match platform_at {
            None => CallCapture::custom(UPDATE_CONTEXT_PROPS_NO_PLATFORM)
                .size("propSize", props.len())
                .bytes("propData", Some(&bytes[..])),
            Some(at) => CallCapture::custom(UPDATE_CONTEXT_PROPS_WITH_PLATFORM)
                .size("propSize", props.len())
                .bytes("propData", Some(&bytes[..]))
                .size("platformIdxInProps", at)
                .size(
                    "platformIdxInMap",
                    self.tracker.index_of(ResourceKind::Platform, Handle(props[at])),
                ),
        };
        Some(update)
    }

    /// A `clSetKernelArg` value that holds the handle of a captured object becomes a lookup of
    /// that object's map slot.
    fn kernel_arg_handle(&self, call: &mut CallCapture) {
        let Ok(param) = call.param_mut("arg_value", 3) else {
            return;
        };
        let Some(raw) = param
            .payload
            .as_deref()
            .and_then(|b| <[u8; 8]>::try_from(b).ok())
        else {
            return;
        };
        let handle = Handle(u64::from_le_bytes(raw));
        if handle.is_null() {
            return;
        }
        if let Some(kind) = ARG_HANDLE_KINDS
            .into_iter()
            .find(|&kind| self.tracker.contains(kind, handle))
        {
            param.ty = ParamType::ArgHandle(kind);
            param.value = ParamValue::Handle(handle);
        }
    }

    /// Objects created before the window are released by `ResetReplay` unless the
    /// application releases them itself.
    fn update_reset_list(&mut self, ep: EntryPoint, call: &CallCapture) {
        if let Some(kind) = ep.released_kind() {
            if let Some(handle) = call.params.first().and_then(|p| p.handle()) {
                if let Some(pos) = self.reset.iter().position(|&r| r == (kind, handle)) {
                    self.reset.remove(pos);
                }
            }
            return;
        }
        if self.in_window() {
            return;
        }
        let mut created: Vec<(ResourceKind, Handle)> = Vec::new();
        match ep {
            EntryPoint::CreateSubDevices => {
                if let Some(p) = call.find("out_devices") {
                    created.extend(p.handles().iter().map(|&h| (ResourceKind::Device, h)));
                }
            }
            EntryPoint::CreateKernelsInProgram => {
                if let Some(p) = call.find("kernels") {
                    created.extend(p.handles().iter().map(|&h| (ResourceKind::Kernel, h)));
                }
            }
            _ => {
                if let (Some(kind), Some(handle)) = (ep.created_kind(), call.returned_handle()) {
                    if kind.release_fn().is_some() {
                        created.push((kind, handle));
                    }
                }
            }
        }
        for entry in created {
            if !self.reset.contains(&entry) {
                self.reset.push(entry);
            }
        }
    }

    /// Bookkeeping that depends on what the call returned. Returns the unmap that the snapshot
    /// has to serve, if this call is one.
    fn post_call_updates<H: ClHost + ?Sized>(
        &mut self,
        host: &mut H,
        ep: EntryPoint,
    ) -> Result<Option<UnmapTrigger>> {
        let Some(call) = self.frame_calls.last() else {
            return Ok(None);
        };
        let mut trigger = None;
        match ep {
            EntryPoint::CreateCommandQueue | EntryPoint::CreateCommandQueueWithProperties => {
                if let Some(queue) = call.returned_handle() {
                    self.snapshot.set_queue(queue);
                }
            }
            EntryPoint::EnqueueMapBuffer | EntryPoint::EnqueueMapImage => {
                if let Some(ptr) = call.returned_pointer() {
                    let record = map_record(ep, call)?;
                    self.snapshot.record_map(ptr, record);
                }
            }
            EntryPoint::EnqueueUnmapMemObject => {
                let queue = call.handle_param("command_queue", 0)?;
                let mem = call.handle_param("memobj", 1)?;
                let mapped_ptr = call.param("mapped_ptr", 2)?.pointer().unwrap_or(0);
                self.snapshot.set_queue(queue);
                if self.in_window() {
                    let record = self
                        .snapshot
                        .map_record(mapped_ptr)
                        .ok_or(CaptureError::MissingMapCall(Handle(mapped_ptr)))?;
                    if record.flags.writes() {
                        self.snapshot.mark_mem_dirty(mem);
                    }
                    trigger = Some(UnmapTrigger { mem, mapped_ptr });
                } else {
                    self.snapshot.take_map(mapped_ptr);
                }
            }
            EntryPoint::SVMAlloc => {
                if let (Some(ptr), Some(size)) = (
                    call.returned_pointer(),
                    call.find("size").and_then(|p| p.as_usize()),
                ) {
                    self.snapshot.record_svm_alloc(ptr, size);
                    if !self.in_window() {
                        self.snapshot.mark_svm_dirty(ptr);
                    }
                }
            }
            EntryPoint::SVMFree => {
                if let Some(ptr) = call.find("svm_pointer").and_then(|p| p.pointer()) {
                    self.snapshot.forget_svm(ptr);
                }
            }
            EntryPoint::EnqueueSVMFree => {
                let ptrs: Vec<u64> = match call.find("svm_pointers").map(|p| &p.value) {
                    Some(ParamValue::Pointers(ptrs)) => ptrs.clone(),
                    _ => Vec::new(),
                };
                for ptr in ptrs {
                    self.snapshot.forget_svm(ptr);
                }
            }
            EntryPoint::EnqueueSVMUnmap => {
                let queue = call.handle_param("command_queue", 0)?;
                if let Some(ptr) = call.find("svm_ptr").and_then(|p| p.pointer()) {
                    self.snapshot.set_queue(queue);
                    self.snapshot.mark_svm_dirty(ptr);
                }
            }
            _ => {}
        }

        if !self.in_window() {
            self.pre_window_updates(host, ep)?;
        }
        Ok(trigger)
    }

    fn pre_window_updates<H: ClHost + ?Sized>(&mut self, host: &mut H, ep: EntryPoint) -> Result<()> {
        if ep.is_prewindow_removable() {
            return self.drop_last_command(host);
        }
        let Some(call) = self.frame_calls.last() else {
            return Ok(());
        };
        match ep {
            _ if ep.is_mem_create() => {
                let Some(mem) = call.returned_handle() else {
                    return Ok(());
                };
                let index = self.tracker.assign_or_lookup(ResourceKind::Mem, mem);
                self.graph.add_mem(index);
                if ep == EntryPoint::CreateSubBuffer {
                    let parent = call.handle_param("buffer", 0)?;
                    let parent = self.tracker.lookup(ResourceKind::Mem, parent).ok_or(
                        CaptureError::UnknownResource {
                            kind: ResourceKind::Mem,
                            handle: parent,
                        },
                    )?;
                    self.graph.add_sub_buffer(index, parent);
                }
                self.snapshot.retain_implicitly(host, mem)?;
                self.snapshot.mark_mem_dirty(mem);
            }
            EntryPoint::ReleaseMemObject => {
                let mem = call.handle_param("memobj", 0)?;
                self.release_mem(host, mem)?;
            }
            EntryPoint::CreateProgramWithSource
            | EntryPoint::CreateProgramWithBinary
            | EntryPoint::CreateProgramWithBuiltInKernels
            | EntryPoint::CreateProgramWithIL => {
                if let Some(program) = call.returned_handle() {
                    let index = self.tracker.assign_or_lookup(ResourceKind::Program, program);
                    self.graph.add_program(index);
                }
            }
            EntryPoint::LinkProgram => {
                if let Some(program) = call.returned_handle() {
                    let inputs = self.program_indices(call.find("input_programs").map_or(&[][..], |p| p.handles()));
                    let index = self.tracker.assign_or_lookup(ResourceKind::Program, program);
                    self.graph.add_program(index);
                    self.graph.link_program(index, &inputs);
                }
            }
            EntryPoint::CompileProgram => {
                let program = call.handle_param("program", 0)?;
                let headers = self.program_indices(call.find("input_headers").map_or(&[][..], |p| p.handles()));
                if let (Some(index), false) = (self.tracker.lookup(ResourceKind::Program, program), headers.is_empty()) {
                    self.graph.link_program(index, &headers);
                }
            }
            EntryPoint::RetainProgram => {
                let program = call.handle_param("program", 0)?;
                if let Some(index) = self.tracker.lookup(ResourceKind::Program, program) {
                    self.graph.retain_program(index);
                }
            }
            EntryPoint::ReleaseProgram => {
                let program = call.handle_param("program", 0)?;
                if let Some(index) = self.tracker.lookup(ResourceKind::Program, program) {
                    let release = self.graph.release_program(index);
                    for dead in release.dead_programs {
                        self.program_died(host, dead);
                    }
                }
            }
            EntryPoint::CreateKernel => {
                let program = call.handle_param("program", 0)?;
                if let Some(kernel) = call.returned_handle() {
                    self.add_kernels(program, &[kernel]);
                }
            }
            EntryPoint::CreateKernelsInProgram => {
                let program = call.handle_param("program", 0)?;
                let kernels = call.find("kernels").map(|p| p.handles().to_vec()).unwrap_or_default();
                self.add_kernels(program, &kernels);
            }
            EntryPoint::CloneKernel => {
                let source = call.handle_param("source_kernel", 0)?;
                let program = self
                    .tracker
                    .lookup(ResourceKind::Kernel, source)
                    .and_then(|k| self.graph.program_of(k))
                    .and_then(|p| self.tracker.handle_of(ResourceKind::Program, p));
                if let (Some(program), Some(kernel)) = (program, call.returned_handle()) {
                    self.add_kernels(program, &[kernel]);
                }
            }
            EntryPoint::ReleaseKernel => {
                let kernel = call.handle_param("kernel", 0)?;
                if host.ref_count(ResourceKind::Kernel, kernel).unwrap_or(0) == 0 {
                    self.prune(host, ResourceKind::Kernel, kernel);
                    let index = self.tracker.retire(ResourceKind::Kernel, kernel);
                    if let Some(program) = index.and_then(|k| self.graph.kill_kernel(k)) {
                        self.program_died(host, program);
                    }
                }
            }
            EntryPoint::ReleaseEvent => {
                let event = call.handle_param("event", 0)?;
                if host.ref_count(ResourceKind::Event, event).unwrap_or(0) == 0 {
                    self.prune(host, ResourceKind::Event, event);
                    self.tracker.retire(ResourceKind::Event, event);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn program_indices(&self, programs: &[Handle]) -> Vec<usize> {
        programs
            .iter()
            .filter_map(|&p| self.tracker.lookup(ResourceKind::Program, p))
            .collect()
    }

    fn add_kernels(&mut self, program: Handle, kernels: &[Handle]) {
        let Some(program) = self.tracker.lookup(ResourceKind::Program, program) else {
            return;
        };
        for &kernel in kernels {
            let index = self.tracker.assign_or_lookup(ResourceKind::Kernel, kernel);
            self.graph.add_kernel(index, program);
        }
    }

    /// Removes an enqueued command captured before the window. An event it produced is
    /// replaced by a completed user event so later waits still resolve.
    fn drop_last_command<H: ClHost + ?Sized>(&mut self, host: &mut H) -> Result<()> {
        let Some(call) = self.frame_calls.pop() else {
            return Ok(());
        };
        if let Some(event) = prune::produced_event(&call) {
            match prune::event_context(&call, &|q| host.queue_context(q)) {
                Some(context) => {
                    for injected in prune::completed_user_event(context, event) {
                        self.push(injected);
                    }
                }
                None => tracing::warn!(call = call.name(), %event, "no context for replacement user event"),
            }
        }
        tracing::trace!(call = call.name(), "dropped command enqueued before the capture window");
        Ok(())
    }

    /// Handles the application releasing a memory object before the window. Once only the
    /// implicit retain is left (and no sub-buffer still derives from it) the object is dead:
    /// its calls are pruned and the parent of a dead sub-buffer is re-checked.
    fn release_mem<H: ClHost + ?Sized>(&mut self, host: &mut H, mem: Handle) -> Result<()> {
        let mut next = Some(mem);
        while let Some(mem) = next.take() {
            let index = self.tracker.lookup(ResourceKind::Mem, mem);
            if index.is_some_and(|i| !self.graph.live_children(i).is_empty()) {
                break;
            }
            let implicit = u32::from(self.snapshot.holds_implicit_retain(mem));
            if host.ref_count(ResourceKind::Mem, mem).unwrap_or(0) > implicit {
                break;
            }

            self.snapshot.clear_mem(mem);
            self.prune(host, ResourceKind::Mem, mem);
            let parent = index.and_then(|i| self.graph.remove_mem(i));
            let parent = parent.and_then(|p| self.tracker.handle_of(ResourceKind::Mem, p));
            self.snapshot.release_implicit(host, mem)?;
            self.tracker.retire(ResourceKind::Mem, mem);
            tracing::debug!(%mem, "memory object died before the capture window");
            next = parent;
        }
        Ok(())
    }

    fn program_died<H: ClHost + ?Sized>(&mut self, host: &H, program: usize) {
        let Some(handle) = self.tracker.handle_of(ResourceKind::Program, program) else {
            return;
        };
        for kernel in self.graph.kernels_of(program).to_vec() {
            if let Some(kernel) = self.tracker.handle_of(ResourceKind::Kernel, kernel) {
                self.prune(host, ResourceKind::Kernel, kernel);
                self.tracker.retire(ResourceKind::Kernel, kernel);
            }
        }
        self.prune(host, ResourceKind::Program, handle);
        self.tracker.retire(ResourceKind::Program, handle);
        tracing::debug!(program = %handle, "program died before the capture window");
    }

    fn prune<H: ClHost + ?Sized>(&mut self, host: &H, kind: ResourceKind, handle: Handle) {
        let Some(mode) = self.config.prune else {
            return;
        };
        prune::prune_resource(
            &mut self.frame_calls,
            kind,
            handle,
            mode,
            &mut self.tracker,
            &|q| host.queue_context(q),
        );
    }

    fn take_snapshot<H: ClHost + ?Sized>(&mut self, host: &mut H, trigger: Option<UnmapTrigger>) -> Result<()> {
        let snapshot = self.snapshot.synthesize(host, trigger)?;
        if snapshot.is_empty() {
            return Ok(());
        }
        let last = self.frame_calls.len().saturating_sub(1);
        for (k, mut call) in snapshot.before.into_iter().enumerate() {
            self.tracker.register_call(&mut call);
            self.frame_calls.insert(last + k, call);
        }
        for call in snapshot.after {
            self.push(call);
        }
        Ok(())
    }

    /// The frame before the window ended: what was captured so far becomes the setup.
    fn open_window(&mut self) -> Result<()> {
        self.setup_calls = std::mem::take(&mut self.frame_calls);
        let store = self.store.as_mut().ok_or(CaptureError::Poisoned)?;
        self.writer
            .set_setup_calls(&self.setup_calls, self.config.emit_inactive, &self.tracker, store)?;
        tracing::info!(
            calls = self.setup_calls.len(),
            reset = self.reset.len(),
            "capture window opened"
        );
        Ok(())
    }

    fn write_frame(&mut self) -> Result<()> {
        let frame = self.replay_frame();
        let store = self.store.as_mut().ok_or(CaptureError::Poisoned)?;
        self.writer.write_frame(frame, &self.frame_calls, &self.tracker, store)?;
        self.frame_calls.clear();
        Ok(())
    }

    /// Writes the index files, closes the binary store and writes both JSON files.
    fn write_trace(&mut self, last_frame: u32) -> Result<()> {
        let binary_file_name = self.config.binary_file_name();
        self.writer.write_index(&self.tracker, &self.reset, &binary_file_name)?;
        let store = self.store.take().ok_or(CaptureError::Poisoned)?;
        let index = store.close()?;

        let label = &self.config.label;
        let mut trace_files: Vec<String> = self
            .writer
            .frames()
            .iter()
            .map(|&f| frame_file_name(label, f))
            .collect();
        trace_files.push(header_file_name(label));
        trace_files.push(source_file_name(label));

        let meta = TraceJson::new(
            self.config.frame_start,
            last_frame,
            self.config.compression,
            index,
            &self.tracker,
            trace_files,
        );
        meta.write(self.config.out_dir.join(metadata_file_name(label)))?;
        self.info.write(self.config.out_dir.join(info_file_name(label)))?;
        tracing::info!(
            frames = self.writer.frames().len(),
            last_frame,
            "capture finished"
        );
        Ok(())
    }

    /// Ends the capture early, as when the application exits inside the window. The frame in
    /// progress is written as the last one. Before the window nothing is written.
    pub fn end_capture<H: ClHost + ?Sized>(&mut self, host: &mut H) -> Result<()> {
        if self.poisoned {
            return Err(CaptureError::Poisoned);
        }
        if self.finished {
            return Ok(());
        }
        let result = self.finish_partial();
        self.finished = true;
        self.snapshot.release_all_implicit(host)?;
        result
    }

    fn finish_partial(&mut self) -> Result<()> {
        if !self.in_window() || self.frame > self.config.frame_end {
            tracing::warn!(
                frame = self.frame,
                frame_start = self.config.frame_start,
                "capture ended before the window; nothing written"
            );
            return Ok(());
        }
        self.write_frame()?;
        self.write_trace(self.frame)
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.poisoned || self.finished {
            return;
        }
        self.finished = true;
        if let Err(err) = self.finish_partial() {
            tracing::error!(error = %err, "failed to write trace at shutdown");
        }
    }
}

/// First three values of an origin or region array; missing ones take `fill`.
fn array3(values: Option<Vec<usize>>, fill: usize) -> [usize; 3] {
    let mut out = [fill; 3];
    for (slot, v) in out.iter_mut().zip(values.unwrap_or_default()) {
        *slot = v;
    }
    out
}

/// Map record for a `clEnqueueMapBuffer`/`clEnqueueMapImage` call.
fn map_record(ep: EntryPoint, call: &CallCapture) -> Result<MapRecord> {
    let queue = call.handle_param("command_queue", 0)?;
    let mem = call.handle_param("buffer", 1).or_else(|_| call.handle_param("image", 1))?;
    let flags = MapFlags::from_bits_truncate(call.scalar_param("map_flags", 3)?);
    let region = if ep == EntryPoint::EnqueueMapImage {
        let pitch = |name: &str| {
            call.find(name)
                .and_then(|p| p.size_t_values().first().copied())
                .unwrap_or(0)
        };
        MapRegion::Image {
            origin: array3(call.find("origin").map(|p| p.size_t_values()), 0),
            region: array3(call.find("region").map(|p| p.size_t_values()), 1),
            row_pitch: pitch("image_row_pitch"),
            slice_pitch: pitch("image_slice_pitch"),
        }
    } else {
        let offset = call.scalar_param("offset", 4)? as usize;
        let size = call.scalar_param("size", 5)? as usize;
        MapRegion::Buffer { offset, size }
    };
    Ok(MapRecord {
        queue,
        mem,
        flags,
        region,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::cl::MemFlags;
    use crate::host::{ExecutionBackend, HostError, ObjectModel};

    const PLATFORM: Handle = Handle(0x1);
    const DEVICE: Handle = Handle(0x2);
    const CTX: Handle = Handle(0xc0);
    const QUEUE: Handle = Handle(0x900);

    #[derive(Default)]
    struct Fake {
        refs: HashMap<Handle, u32>,
        buffers: HashMap<Handle, usize>,
    }

    impl ObjectModel for Fake {
        fn ref_count(&self, _kind: ResourceKind, handle: Handle) -> Option<u32> {
            self.refs.get(&handle).copied()
        }
        fn retain(&mut self, _kind: ResourceKind, handle: Handle) -> std::result::Result<(), HostError> {
            *self.refs.entry(handle).or_default() += 1;
            Ok(())
        }
        fn release(&mut self, _kind: ResourceKind, handle: Handle) -> std::result::Result<(), HostError> {
            *self.refs.entry(handle).or_default() -= 1;
            Ok(())
        }
        fn queue_context(&self, _queue: Handle) -> Option<Handle> {
            Some(CTX)
        }
        fn mem_info(&self, mem: Handle) -> std::result::Result<MemInfo, HostError> {
            self.buffers
                .get(&mem)
                .map(|&size| MemInfo::Buffer { size })
                .ok_or(HostError::InvalidObject {
                    kind: ResourceKind::Mem,
                    handle: mem,
                })
        }
    }

    impl ExecutionBackend for Fake {
        fn read_buffer(&mut self, _q: Handle, _mem: Handle, _offset: usize, size: usize) -> std::result::Result<Vec<u8>, HostError> {
            Ok(vec![0x5a; size])
        }
        fn read_image(
            &mut self,
            _q: Handle,
            _image: Handle,
            _origin: [usize; 3],
            _region: [usize; 3],
            _row_pitch: usize,
            _slice_pitch: usize,
        ) -> std::result::Result<Vec<u8>, HostError> {
            Ok(Vec::new())
        }
        fn read_svm(&mut self, _q: Handle, _ptr: u64, size: usize) -> std::result::Result<Vec<u8>, HostError> {
            Ok(vec![0; size])
        }
    }

    fn session(dir: &tempfile::TempDir, start: u32, end: u32) -> CaptureSession {
        CaptureSession::new(CaptureConfig {
            out_dir: dir.path().to_path_buf(),
            frame_start: start,
            frame_end: end,
            label: "t".into(),
            ..CaptureConfig::default()
        })
        .unwrap()
    }

    fn names(calls: &[CallCapture]) -> Vec<&str> {
        calls.iter().map(CallCapture::name).collect()
    }

    #[test]
    fn context_platform_is_patched_through_a_helper_call() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = Fake::default();
        let mut s = session(&dir, 1, 1);
        s.capture_call(&mut host, capture::get_platform_ids(1, Some(&[PLATFORM][..]), 0)).unwrap();
        let props = [CL_CONTEXT_PLATFORM, PLATFORM.0, 0];
        s.capture_call(&mut host, capture::create_context(Some(&props[..]), &[DEVICE], 0, 0, CTX))
            .unwrap();

        let calls = s.frame_calls();
        assert_eq!(
            names(calls),
            ["clGetPlatformIDs", UPDATE_CONTEXT_PROPS_WITH_PLATFORM, "clCreateContext"]
        );
        let update = &calls[1];
        assert_eq!(update.scalar_param("propSize", 0).unwrap(), 3);
        assert_eq!(update.scalar_param("platformIdxInProps", 2).unwrap(), 1);
        assert_eq!(update.scalar_param("platformIdxInMap", 3).unwrap(), 0);
        let create_props = calls[2].param("properties", 0).unwrap();
        assert!(create_props.payload.is_none());
        assert!(!create_props.value.is_null());
    }

    #[test]
    fn properties_without_platform_use_the_plain_helper() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = Fake::default();
        let mut s = session(&dir, 1, 1);
        let props = [0x1088_u64, 1, 0];
        s.capture_call(&mut host, capture::create_context_from_type(Some(&props[..]), 4, 0, 0, CTX))
            .unwrap();
        assert_eq!(
            names(s.frame_calls()),
            [UPDATE_CONTEXT_PROPS_NO_PLATFORM, "clCreateContextFromType"]
        );
    }

    #[test]
    fn extension_lookups_assign_to_a_named_static() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = Fake::default();
        let mut s = session(&dir, 1, 1);
        s.capture_call(&mut host, capture::get_extension_function_address("clFooKHR", 0xf00))
            .unwrap();
        let call = &s.frame_calls()[0];
        assert_eq!(call.assign_to.as_deref(), Some("clFooKHR"));
        assert_eq!(s.tracker().capacity(ResourceKind::Void), 0);
    }

    #[test]
    fn info_queries_are_logged_not_replayed() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = Fake::default();
        let mut s = session(&dir, 1, 1);
        let query = capture::get_info(
            EntryPoint::GetDeviceInfo,
            DEVICE,
            None,
            None,
            0x102B,
            Some(&b"gpu\0"[..]),
            0,
        )
        .unwrap();
        s.capture_call(&mut host, query).unwrap();
        assert!(s.frame_calls().is_empty());
        assert_eq!(s.tracker().capacity(ResourceKind::Device), 0);
    }

    #[test]
    fn enqueues_before_the_window_become_completed_user_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = Fake::default();
        let mut s = session(&dir, 2, 2);
        let buf = Handle(0xb0);
        let event = Handle(0xe0);
        host.refs.insert(buf, 1);
        host.buffers.insert(buf, 4);

        s.capture_call(&mut host, capture::create_command_queue(CTX, DEVICE, 0, QUEUE)).unwrap();
        s.capture_call(&mut host, capture::create_buffer(CTX, MemFlags::READ_WRITE, 4, None, buf))
            .unwrap();
        s.capture_call(
            &mut host,
            capture::enqueue_write_buffer(QUEUE, buf, false, 0, &[1, 2, 3, 4], &[], Some(event), 0),
        )
        .unwrap();

        assert_eq!(
            names(s.frame_calls()),
            ["clCreateCommandQueue", "clCreateBuffer", "clCreateUserEvent", "clSetUserEventStatus"]
        );
        assert_eq!(s.frame_calls()[2].handle_param("context", 0).unwrap(), CTX);
        assert!(s.snapshot().is_mem_dirty(buf));
        // The session holds one reference of its own until the snapshot is taken.
        assert_eq!(host.refs[&buf], 2);
    }

    #[test]
    fn the_frame_before_the_window_becomes_the_setup() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = Fake::default();
        let mut s = session(&dir, 2, 2);
        let buf = Handle(0xb0);
        let kernel = Handle(0x4e);
        host.refs.insert(buf, 1);
        host.buffers.insert(buf, 4);

        s.capture_call(&mut host, capture::create_command_queue(CTX, DEVICE, 0, QUEUE)).unwrap();
        s.capture_call(&mut host, capture::create_buffer(CTX, MemFlags::READ_WRITE, 4, None, buf))
            .unwrap();
        s.capture_call(
            &mut host,
            capture::enqueue_nd_range_kernel(QUEUE, kernel, None, &[4], None, &[], None, 0),
        )
        .unwrap();

        assert_eq!(s.frame(), 2);
        assert!(s.frame_calls().is_empty());
        let setup = names(s.setup_calls());
        assert_eq!(setup, ["clCreateCommandQueue", "clCreateBuffer", "clEnqueueWriteBuffer"]);
        assert_eq!(host.refs[&buf], 1);
        assert_eq!(
            s.reset_objects(),
            [(ResourceKind::CommandQueue, QUEUE), (ResourceKind::Mem, buf)]
        );
    }

    #[test]
    fn buffer_handles_in_kernel_args_become_map_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = Fake::default();
        let mut s = session(&dir, 1, 1);
        let buf = Handle(0xb0);
        host.buffers.insert(buf, 4);
        s.capture_call(&mut host, capture::create_buffer(CTX, MemFlags::READ_WRITE, 4, None, buf))
            .unwrap();
        let value = buf.0.to_le_bytes();
        s.capture_call(&mut host, capture::set_kernel_arg(Handle(0x4e), 0, 8, Some(&value[..]), 0))
            .unwrap();
        s.capture_call(&mut host, capture::set_kernel_arg(Handle(0x4e), 1, 4, Some(&[7, 0, 0, 0][..]), 0))
            .unwrap();

        let arg = s.frame_calls()[1].param("arg_value", 3).unwrap();
        assert_eq!(arg.ty, ParamType::ArgHandle(ResourceKind::Mem));
        assert_eq!(s.tracker().param_index(arg), Some(0));
        let plain = s.frame_calls()[2].param("arg_value", 3).unwrap();
        assert_eq!(plain.ty, ParamType::ConstVoidPointer);
    }

    #[test]
    fn unmap_without_a_map_poisons_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = Fake::default();
        let mut s = session(&dir, 1, 1);
        let err = s
            .capture_call(
                &mut host,
                capture::enqueue_unmap_mem_object(QUEUE, Handle(0xb0), 0x5000, &[], None, 0),
            )
            .unwrap_err();
        assert!(matches!(err, CaptureError::MissingMapCall(Handle(0x5000))));
        assert!(s.is_poisoned());
        s.capture_call(&mut host, capture::finish(QUEUE, 0)).unwrap();
        assert!(matches!(s.end_capture(&mut host), Err(CaptureError::Poisoned)));
        assert!(!dir.path().join("t.json").exists());
    }
}
