//! Removal of captured calls that reference resources which died before the capture window.
//!
//! Pruning runs in two steps. [`decide`] looks at each call on its own and returns what to do
//! with it; [`materialize`] then rebuilds the list in a single pass, splicing in completed
//! user events where a dropped call produced an event that a kept call still waits on.

use std::collections::HashSet;

use crate::call::CallCapture;
use crate::capture;
use crate::cl::{CL_COMPLETE, CL_SUCCESS};
use crate::entry_point::EntryPoint;
use crate::handle::{Handle, ResourceKind};
use crate::index::ResourceIndexTracker;
use crate::param::{ParamType, ParamValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PruneMode {
    /// Matched calls are deleted.
    #[default]
    Remove,
    /// Matched calls stay in the list, marked inactive.
    Deactivate,
}

/// A handle list parameter that may lose elements instead of taking the whole call with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ListRule {
    list: &'static str,
    count: &'static str,
    /// Whether a call whose list becomes empty is meaningless and goes too.
    drop_when_empty: bool,
}

const WAIT_LIST: ListRule = ListRule {
    list: "event_wait_list",
    count: "num_events_in_wait_list",
    drop_when_empty: false,
};

/// Single-handle parameters through which `ep` references an object of `kind`.
fn match_params(ep: EntryPoint, kind: ResourceKind) -> &'static [&'static str] {
    use EntryPoint::*;
    match kind {
        ResourceKind::Mem => match ep {
            CreateSubBuffer
            | EnqueueReadBuffer
            | EnqueueWriteBuffer
            | EnqueueReadBufferRect
            | EnqueueWriteBufferRect
            | EnqueueFillBuffer
            | EnqueueMapBuffer => &["buffer"],
            EnqueueReadImage | EnqueueWriteImage | EnqueueFillImage | EnqueueMapImage
            | GetImageInfo => &["image"],
            GetPipeInfo => &["pipe"],
            CreateImage | CreateImageWithProperties => &["image_desc"],
            EnqueueCopyBuffer | EnqueueCopyBufferRect => &["src_buffer", "dst_buffer"],
            EnqueueCopyImage => &["src_image", "dst_image"],
            EnqueueCopyImageToBuffer => &["src_image", "dst_buffer"],
            EnqueueCopyBufferToImage => &["src_buffer", "dst_image"],
            RetainMemObject | ReleaseMemObject | GetMemObjectInfo
            | SetMemObjectDestructorCallback | EnqueueUnmapMemObject => &["memobj"],
            SetKernelArg => &["arg_value"],
            _ => &[],
        },
        ResourceKind::Kernel => match ep {
            CloneKernel => &["source_kernel"],
            RetainKernel | ReleaseKernel | SetKernelArg | SetKernelArgSVMPointer
            | SetKernelExecInfo | GetKernelInfo | GetKernelArgInfo | GetKernelWorkGroupInfo
            | GetKernelSubGroupInfo | EnqueueNDRangeKernel | EnqueueTask => &["kernel"],
            _ => &[],
        },
        ResourceKind::Program => match ep {
            RetainProgram | ReleaseProgram | BuildProgram | CompileProgram | GetProgramInfo
            | GetProgramBuildInfo | SetProgramSpecializationConstant | CreateKernel
            | CreateKernelsInProgram => &["program"],
            _ => &[],
        },
        ResourceKind::Event => match ep {
            RetainEvent | ReleaseEvent | SetUserEventStatus | SetEventCallback | GetEventInfo
            | GetEventProfilingInfo => &["event"],
            _ => &[],
        },
        _ => &[],
    }
}

/// Handle lists through which `ep` references objects of `kind`.
fn list_rule(ep: EntryPoint, kind: ResourceKind) -> Option<ListRule> {
    use EntryPoint::*;
    match (kind, ep) {
        (ResourceKind::Mem, EnqueueMigrateMemObjects) => Some(ListRule {
            list: "mem_objects",
            count: "num_mem_objects",
            drop_when_empty: true,
        }),
        (ResourceKind::Event, WaitForEvents | EnqueueWaitForEvents) => Some(ListRule {
            list: "event_list",
            count: "num_events",
            drop_when_empty: true,
        }),
        (ResourceKind::Event, _) if ep.is_enqueue() => Some(WAIT_LIST),
        _ => None,
    }
}

/// Lists whose positions are meaningful to other arguments; a match drops the whole call.
fn whole_list_params(ep: EntryPoint, kind: ResourceKind) -> &'static [&'static str] {
    match (kind, ep) {
        (ResourceKind::Mem, EntryPoint::EnqueueNativeKernel) => &["mem_list"],
        _ => &[],
    }
}

/// What happens to one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Keep,
    Drop,
    /// Remove the masked-out elements of a handle list and rewrite its count.
    Shrink {
        list: &'static str,
        count: &'static str,
        keep: Vec<bool>,
    },
    /// The call only produces the dead event; stop it from writing the event handle.
    ClearEventOut,
}

fn param_handle(call: &CallCapture, name: &str) -> Option<Handle> {
    call.find(name).and_then(|p| match p.value {
        ParamValue::Handle(h) if !h.is_null() => Some(h),
        _ => None,
    })
}

/// Pure decision for one call against one dead resource.
pub fn decide(call: &CallCapture, kind: ResourceKind, handle: Handle) -> Decision {
    if !call.is_active {
        return Decision::Keep;
    }
    let Some(ep) = call.entry_point() else {
        return Decision::Keep;
    };

    if ep.created_kind() == Some(kind) && call.returned_handle() == Some(handle) {
        return Decision::Drop;
    }
    if match_params(ep, kind)
        .iter()
        .any(|name| param_handle(call, name) == Some(handle))
    {
        return Decision::Drop;
    }
    if whole_list_params(ep, kind)
        .iter()
        .any(|name| call.find(name).is_some_and(|p| p.handles().contains(&handle)))
    {
        return Decision::Drop;
    }
    if let Some(rule) = list_rule(ep, kind) {
        if let Some(p) = call.find(rule.list) {
            let handles = p.handles();
            if handles.contains(&handle) {
                let keep: Vec<bool> = handles.iter().map(|&h| h != handle).collect();
                if rule.drop_when_empty && !keep.contains(&true) {
                    return Decision::Drop;
                }
                return Decision::Shrink {
                    list: rule.list,
                    count: rule.count,
                    keep,
                };
            }
        }
    }
    if kind == ResourceKind::Event
        && call
            .params
            .iter()
            .any(|p| p.ty == ParamType::HandleOut(ResourceKind::Event) && p.handle() == Some(handle))
    {
        return Decision::ClearEventOut;
    }
    Decision::Keep
}

/// Event a call produced through an out-parameter or its return value.
pub fn produced_event(call: &CallCapture) -> Option<Handle> {
    call.params
        .iter()
        .find(|p| p.ty == ParamType::HandleOut(ResourceKind::Event))
        .and_then(|p| p.handle())
        .or_else(|| {
            call.return_value
                .as_ref()
                .filter(|r| r.ty == ParamType::Handle(ResourceKind::Event))
                .and_then(|r| r.handle())
        })
}

/// Events a call consumes as inputs.
fn referenced_events(call: &CallCapture, out: &mut HashSet<Handle>) {
    for p in &call.params {
        match (p.ty, &p.value) {
            (ParamType::Handle(ResourceKind::Event), ParamValue::Handle(h)) if !h.is_null() => {
                out.insert(*h);
            }
            (ParamType::HandleArray(ResourceKind::Event), ParamValue::Handles(hs)) => {
                out.extend(hs.iter().copied());
            }
            _ => {}
        }
    }
}

/// Completed user event standing in for `event`, which a dropped call used to produce.
pub fn completed_user_event(context: Handle, event: Handle) -> [CallCapture; 2] {
    [
        capture::create_user_event(context, event),
        capture::set_user_event_status(event, CL_COMPLETE, CL_SUCCESS),
    ]
}

/// Context the user event replacing `call`'s event is created on.
pub fn event_context(call: &CallCapture, queue_context: &dyn Fn(Handle) -> Option<Handle>) -> Option<Handle> {
    param_handle(call, "context").or_else(|| param_handle(call, "command_queue").and_then(queue_context))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneStats {
    pub dropped: usize,
    pub deactivated: usize,
    pub shrunk: usize,
    pub injected: usize,
}

impl PruneStats {
    pub fn changed(&self) -> bool {
        *self != PruneStats::default()
    }
}

/// Applies `decisions` to `calls` in one pass.
pub fn materialize(
    calls: Vec<CallCapture>,
    decisions: &[Decision],
    mode: PruneMode,
    tracker: &mut ResourceIndexTracker,
    queue_context: &dyn Fn(Handle) -> Option<Handle>,
) -> (Vec<CallCapture>, PruneStats) {
    let mut stats = PruneStats::default();

    // Events still waited on once the decisions apply.
    let mut still_referenced = HashSet::new();
    for (call, decision) in calls.iter().zip(decisions) {
        match decision {
            Decision::Keep | Decision::ClearEventOut if call.is_active => {
                referenced_events(call, &mut still_referenced)
            }
            Decision::Shrink { list, keep, .. } => {
                referenced_events(call, &mut still_referenced);
                if let Some(p) = call.find(list) {
                    for (h, k) in p.handles().iter().zip(keep) {
                        if !k && p.ty == ParamType::HandleArray(ResourceKind::Event) {
                            still_referenced.remove(h);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    let mut out = Vec::with_capacity(calls.len());
    for (mut call, decision) in calls.into_iter().zip(decisions) {
        match decision {
            Decision::Keep => out.push(call),
            Decision::Drop => {
                if let Some(event) = produced_event(&call).filter(|e| still_referenced.contains(e)) {
                    match event_context(&call, queue_context) {
                        Some(context) => {
                            for mut injected in completed_user_event(context, event) {
                                tracker.register_call(&mut injected);
                                out.push(injected);
                            }
                            stats.injected += 1;
                        }
                        None => tracing::warn!(
                            call = call.name(),
                            %event,
                            "no context for replacement user event"
                        ),
                    }
                }
                match mode {
                    PruneMode::Remove => stats.dropped += 1,
                    PruneMode::Deactivate => {
                        call.is_active = false;
                        stats.deactivated += 1;
                        out.push(call);
                    }
                }
            }
            Decision::Shrink { list, count, keep } => {
                shrink_list(&mut call, tracker, list, count, keep);
                stats.shrunk += 1;
                out.push(call);
            }
            Decision::ClearEventOut => {
                for p in call.params.iter_mut() {
                    if p.ty == ParamType::HandleOut(ResourceKind::Event) {
                        p.value = ParamValue::Null;
                        tracker.remove_vector(p.id);
                    }
                }
                stats.shrunk += 1;
                out.push(call);
            }
        }
    }
    (out, stats)
}

/// Filters a handle list and its cached indices in lockstep and rewrites the count.
fn shrink_list(
    call: &mut CallCapture,
    tracker: &mut ResourceIndexTracker,
    list: &str,
    count: &str,
    keep: &[bool],
) {
    let mut remaining = 0;
    if let Some(p) = call.params.iter_mut().find(|p| p.name == list) {
        let handles: Vec<Handle> = p
            .handles()
            .iter()
            .zip(keep)
            .filter_map(|(&h, &k)| k.then_some(h))
            .collect();
        if let Some(indices) = tracker.vector(p.id) {
            let indices: Vec<usize> = indices
                .iter()
                .zip(keep)
                .filter_map(|(&i, &k)| k.then_some(i))
                .collect();
            tracker.set_vector(p.id, indices);
        }
        remaining = handles.len();
        p.value = if handles.is_empty() {
            ParamValue::Null
        } else {
            ParamValue::Handles(handles)
        };
    }
    if let Some(c) = call.params.iter_mut().find(|p| p.name == count) {
        c.value = ParamValue::U32(remaining as u32);
    }
}

/// Prunes every call referencing the dead `handle` of `kind`.
pub fn prune_resource(
    calls: &mut Vec<CallCapture>,
    kind: ResourceKind,
    handle: Handle,
    mode: PruneMode,
    tracker: &mut ResourceIndexTracker,
    queue_context: &dyn Fn(Handle) -> Option<Handle>,
) -> PruneStats {
    let decisions: Vec<Decision> = calls.iter().map(|c| decide(c, kind, handle)).collect();
    if decisions.iter().all(|d| *d == Decision::Keep) {
        return PruneStats::default();
    }
    let (pruned, stats) = materialize(std::mem::take(calls), &decisions, mode, tracker, queue_context);
    *calls = pruned;
    tracing::debug!(?kind, %handle, ?stats, "pruned calls for dead resource");
    stats
}
