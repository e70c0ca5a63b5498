//! Handle to replay-index bookkeeping.
//!
//! Replay code cannot name the capturing process's handles, so every handle is rewritten to
//! a position in a per-kind array (`clMemMap[3]`) that the replay fills in as it runs.

use std::collections::HashMap;

use crate::call::CallCapture;
use crate::handle::{Handle, ResourceKind};
use crate::param::{ParamCapture, ParamId, ParamType, ParamValue};

/// Returned by [`ResourceIndexTracker::index_of`] for handles that were never captured, which
/// callers read as "outside the replay window".
pub const INDEX_NOT_PRESENT: usize = usize::MAX;

#[derive(Debug, Default, Clone)]
struct IndexMap {
    indices: HashMap<Handle, usize>,
    next: usize,
}

#[derive(Debug, Default, Clone)]
pub struct ResourceIndexTracker {
    maps: HashMap<ResourceKind, IndexMap>,
    vectors: HashMap<ParamId, Vec<usize>>,
    last_param_id: u64,
}

impl ResourceIndexTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index of `handle`, assigning the next free one on first use.
    pub fn assign_or_lookup(&mut self, kind: ResourceKind, handle: Handle) -> usize {
        let map = self.maps.entry(kind).or_default();
        if let Some(&index) = map.indices.get(&handle) {
            return index;
        }
        let index = map.next;
        map.next += 1;
        map.indices.insert(handle, index);
        tracing::trace!(?kind, %handle, index, "assigned resource index");
        index
    }

    pub fn lookup(&self, kind: ResourceKind, handle: Handle) -> Option<usize> {
        self.maps
            .get(&kind)
            .and_then(|map| map.indices.get(&handle).copied())
    }

    pub fn index_of(&self, kind: ResourceKind, handle: Handle) -> usize {
        self.lookup(kind, handle).unwrap_or(INDEX_NOT_PRESENT)
    }

    pub fn contains(&self, kind: ResourceKind, handle: Handle) -> bool {
        self.lookup(kind, handle).is_some()
    }

    /// Forgets a dead handle so that a recycled native value gets a fresh index. The retired
    /// index itself is never handed out again.
    pub fn retire(&mut self, kind: ResourceKind, handle: Handle) -> Option<usize> {
        self.maps
            .get_mut(&kind)
            .and_then(|map| map.indices.remove(&handle))
    }

    /// Live handle currently holding `index`.
    pub fn handle_of(&self, kind: ResourceKind, index: usize) -> Option<Handle> {
        self.maps
            .get(&kind)?
            .indices
            .iter()
            .find(|(_, &i)| i == index)
            .map(|(&h, _)| h)
    }

    /// Number of slots the replay needs for `kind`.
    pub fn capacity(&self, kind: ResourceKind) -> usize {
        self.maps.get(&kind).map(|map| map.next).unwrap_or(0)
    }

    /// Assigns indices to every handle of an array parameter and caches the result.
    pub fn assign_vector(&mut self, id: ParamId, kind: ResourceKind, handles: &[Handle]) -> &[usize] {
        let indices = handles
            .iter()
            .map(|&h| self.assign_or_lookup(kind, h))
            .collect();
        self.vectors.insert(id, indices);
        &self.vectors[&id]
    }

    /// Caches the indices of an input array parameter without assigning new ones; unknown
    /// handles are stored as [`INDEX_NOT_PRESENT`].
    pub fn lookup_vector(&mut self, id: ParamId, kind: ResourceKind, handles: &[Handle]) -> &[usize] {
        let indices = handles.iter().map(|&h| self.index_of(kind, h)).collect();
        self.vectors.insert(id, indices);
        &self.vectors[&id]
    }

    pub fn vector(&self, id: ParamId) -> Option<&[usize]> {
        self.vectors.get(&id).map(Vec::as_slice)
    }

    pub fn set_vector(&mut self, id: ParamId, indices: Vec<usize>) {
        self.vectors.insert(id, indices);
    }

    pub fn remove_vector(&mut self, id: ParamId) {
        self.vectors.remove(&id);
    }

    /// Gives every parameter of `call` an id and caches the indices of its handle-typed
    /// parameters.
    ///
    /// Handles the call produces (return values, out-pointers, out-arrays) are assigned;
    /// handles it consumes are only looked up. The writer renders from this cache, so handles
    /// retired later still print the index they had when the call was made.
    pub fn register_call(&mut self, call: &mut CallCapture) {
        for param in call.params.iter_mut() {
            self.register_param(param, false);
        }
        // Extension lookups store their result in a named static, not a map slot.
        let produces = call.assign_to.is_none();
        if let Some(ret) = call.return_value.as_mut() {
            self.register_param(ret, produces);
        }
    }

    fn register_param(&mut self, param: &mut ParamCapture, is_return: bool) {
        if param.id == ParamId::default() {
            self.last_param_id += 1;
            param.id = ParamId(self.last_param_id);
        }
        let id = param.id;
        match (param.ty, &param.value) {
            (ParamType::Handle(kind), ParamValue::Handle(h)) if !h.is_null() => {
                let index = if is_return {
                    self.assign_or_lookup(kind, *h)
                } else {
                    self.index_of(kind, *h)
                };
                self.vectors.insert(id, vec![index]);
            }
            (ParamType::HandleOut(kind), ParamValue::Handle(h)) if !h.is_null() => {
                self.assign_vector(id, kind, &[*h]);
            }
            (ParamType::HandleArrayOut(kind), ParamValue::Handles(hs)) => {
                self.assign_vector(id, kind, hs);
            }
            (ParamType::HandleArray(kind), ParamValue::Handles(hs)) => {
                self.lookup_vector(id, kind, hs);
            }
            (ParamType::ArgHandle(kind), ParamValue::Handle(h)) => {
                let index = self.index_of(kind, *h);
                self.vectors.insert(id, vec![index]);
            }
            (ParamType::ImageDesc, ParamValue::Handle(h)) if !h.is_null() => {
                let index = self.index_of(ResourceKind::Mem, *h);
                self.vectors.insert(id, vec![index]);
            }
            (ParamType::VoidPointer, ParamValue::Pointer(p)) => {
                let h = Handle(*p);
                if is_return {
                    let index = self.assign_or_lookup(ResourceKind::Void, h);
                    self.vectors.insert(id, vec![index]);
                } else if let Some(index) = self.lookup(ResourceKind::Void, h) {
                    self.vectors.insert(id, vec![index]);
                }
            }
            (ParamType::VoidPointerArray, ParamValue::Pointers(ps)) => {
                let hs: Vec<Handle> = ps.iter().map(|&p| Handle(p)).collect();
                self.lookup_vector(id, ResourceKind::Void, &hs);
            }
            _ => {}
        }
    }

    /// Index a registered single-handle parameter was given, if it names a captured object.
    pub fn param_index(&self, param: &ParamCapture) -> Option<usize> {
        self.vector(param.id)
            .and_then(|v| v.first().copied())
            .filter(|&i| i != INDEX_NOT_PRESENT)
    }
}
