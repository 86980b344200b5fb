//! In-process provider.
//!
//! Holds resources and bindings in memory, records every call, and stamps
//! each created resource with a monotonically increasing sequence number.
//! Creating a resource whose dependency is missing fails with `NotFound`,
//! as the real control plane does.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::CloudProvider;
use crate::error::ProviderError;
use crate::resource::{BindingSpec, ResourceRef, ResourceSpec};

/// A recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ProjectNumber(String),
    Exists(ResourceRef),
    Create(ResourceRef),
    Grant(BindingSpec),
}

#[derive(Default)]
struct State {
    resources: HashMap<ResourceRef, u64>,
    bindings: HashSet<(String, String, String)>,
    calls: Vec<Call>,
    next_seq: u64,
    failures: HashMap<String, ProviderError>,
    create_failures: HashMap<String, ProviderError>,
}

pub struct MemoryProvider {
    project_number: String,
    state: Mutex<State>,
}

impl MemoryProvider {
    pub fn new(project_number: impl Into<String>) -> Self {
        Self {
            project_number: project_number.into(),
            state: Mutex::new(State {
                next_seq: 1,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed a resource as already present.
    pub fn with_existing(self, spec: &ResourceSpec) -> Self {
        {
            let mut state = self.state();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.resources.insert(spec.reference(), seq);
        }
        self
    }

    /// Make every call touching the named resource fail with `err`.
    pub fn fail_on(self, name: impl Into<String>, err: ProviderError) -> Self {
        self.state().failures.insert(name.into(), err);
        self
    }

    /// Make only `create` of the named resource fail with `err`.
    ///
    /// An injected `AlreadyExists` also leaves the resource present, as if
    /// another caller created it between the existence check and the create.
    pub fn fail_create_on(self, name: impl Into<String>, err: ProviderError) -> Self {
        self.state().create_failures.insert(name.into(), err);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Number of calls whose subject is the named resource.
    pub fn calls_for(&self, name: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| match c {
                Call::Exists(r) | Call::Create(r) => r.name == name,
                _ => false,
            })
            .count()
    }

    /// Creation sequence number of a resource, if it exists.
    pub fn created_at(&self, reference: &ResourceRef) -> Option<u64> {
        self.state().resources.get(reference).copied()
    }

    pub fn resource_count(&self) -> usize {
        self.state().resources.len()
    }

    pub fn is_granted(&self, binding: &BindingSpec) -> bool {
        self.state().bindings.contains(&binding_key(binding))
    }

    pub fn binding_count(&self) -> usize {
        self.state().bindings.len()
    }
}

fn binding_key(binding: &BindingSpec) -> (String, String, String) {
    (
        binding.target.to_string(),
        binding.member.to_string(),
        binding.role.clone(),
    )
}

#[async_trait]
impl CloudProvider for MemoryProvider {
    async fn project_number(&self, project_id: &str) -> Result<String, ProviderError> {
        self.state()
            .calls
            .push(Call::ProjectNumber(project_id.to_string()));
        Ok(self.project_number.clone())
    }

    async fn exists(&self, spec: &ResourceSpec) -> Result<bool, ProviderError> {
        let mut state = self.state();
        let reference = spec.reference();
        state.calls.push(Call::Exists(reference.clone()));
        if let Some(err) = state.failures.get(&spec.name) {
            return Err(err.clone());
        }
        Ok(state.resources.contains_key(&reference))
    }

    async fn create(&self, spec: &ResourceSpec) -> Result<(), ProviderError> {
        let mut state = self.state();
        let reference = spec.reference();
        state.calls.push(Call::Create(reference.clone()));
        if let Some(err) = state.failures.get(&spec.name) {
            return Err(err.clone());
        }
        if let Some(err) = state.create_failures.get(&spec.name).cloned() {
            if matches!(err, ProviderError::AlreadyExists(_)) {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.resources.entry(reference).or_insert(seq);
            }
            return Err(err);
        }
        if state.resources.contains_key(&reference) {
            return Err(ProviderError::AlreadyExists(reference.to_string()));
        }
        if let Some(missing) = spec
            .dependencies()
            .into_iter()
            .find(|d| !state.resources.contains_key(d))
        {
            return Err(ProviderError::NotFound(missing.to_string()));
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.resources.insert(reference, seq);
        Ok(())
    }

    async fn grant(&self, binding: &BindingSpec) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.calls.push(Call::Grant(binding.clone()));
        if let Some(target) = binding.target.resource() {
            if !state.resources.contains_key(&target) {
                return Err(ProviderError::NotFound(target.to_string()));
            }
        }
        state.bindings.insert(binding_key(binding));
        Ok(())
    }
}
