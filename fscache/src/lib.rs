//! Function service cache: the bidirectional index between specialized pods
//! and their function-service bindings.
//!
//! Two independent indices, pod key and function key. A binding is live only
//! while both indices point at it; eviction is two-phase and callers are
//! expected to invoke both deletions. Removing only one side is a recognized
//! transitional state, never a terminal one.

use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use data_model::{FuncSvc, FunctionRef};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum FsCacheError {
    /// The pod already has a live binding. Callers must not overwrite it;
    /// hitting this means a racing or buggy specialization path.
    #[error("pod {pod_key} is already bound to function {function}")]
    AlreadyBound { pod_key: String, function: String },
}

#[derive(Default)]
pub struct FunctionServiceCache {
    pod_to_fsvc: DashMap<String, Arc<FuncSvc>>,
    fsvc_by_function: DashMap<String, Arc<FuncSvc>>,
}

impl FunctionServiceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup_by_pod(&self, pod_key: &str) -> Option<Arc<FuncSvc>> {
        self.pod_to_fsvc.get(pod_key).map(|e| e.value().clone())
    }

    pub fn lookup_by_function(&self, function: &FunctionRef) -> Option<Arc<FuncSvc>> {
        self.fsvc_by_function
            .get(&function.key())
            .map(|e| e.value().clone())
    }

    /// Registers a binding in both indices. Fails with `AlreadyBound` if the
    /// pod key is already live, leaving the existing binding untouched.
    pub fn insert(&self, fsvc: FuncSvc) -> Result<Arc<FuncSvc>, FsCacheError> {
        let fsvc = Arc::new(fsvc);
        match self.pod_to_fsvc.entry(fsvc.pod_key.clone()) {
            Entry::Occupied(existing) => {
                return Err(FsCacheError::AlreadyBound {
                    pod_key: fsvc.pod_key.clone(),
                    function: existing.get().function.to_string(),
                });
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fsvc.clone());
            }
        }
        self.fsvc_by_function
            .insert(fsvc.function.key(), fsvc.clone());
        Ok(fsvc)
    }

    /// Removes the function-keyed entry for this binding. Returns whether an
    /// entry was removed; a miss, or an entry that meanwhile points at a
    /// different pod, is left alone and reported as `false`.
    pub fn delete_function_entry(&self, fsvc: &FuncSvc) -> bool {
        let removed = self
            .fsvc_by_function
            .remove_if(&fsvc.function.key(), |_, existing| {
                existing.pod_key == fsvc.pod_key
            })
            .is_some();
        if !removed {
            debug!(
                function = %fsvc.function,
                pod_key = fsvc.pod_key,
                "no matching function entry to remove"
            );
        }
        removed
    }

    /// Removes the pod-keyed entry for this binding. Same contract as
    /// `delete_function_entry`; together they complete an eviction.
    pub fn delete_by_pod(&self, fsvc: &FuncSvc) -> bool {
        let removed = self
            .pod_to_fsvc
            .remove_if(&fsvc.pod_key, |_, existing| {
                existing.function == fsvc.function
            })
            .is_some();
        if !removed {
            debug!(
                function = %fsvc.function,
                pod_key = fsvc.pod_key,
                "no matching pod entry to remove"
            );
        }
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.pod_to_fsvc.is_empty() && self.fsvc_by_function.is_empty()
    }
}
