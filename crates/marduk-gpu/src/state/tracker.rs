use std::collections::HashMap;

use crate::native::{Barrier, CommandStream, NativeCommand, ResourceId, ResourceStates};

use super::LocalResourceState;

/// Per-command-list resource state tracking.
///
/// Transitions on (sub)resources this list already touched get an exact
/// "before" state and go straight into the barrier buffer. A first-use
/// transition cannot know its "before" state while recording (another list
/// may change it first), so it is parked in the pending buffer and resolved
/// against the committed global state at submission time. Transitioning one
/// subresource does not make the others known.
///
/// Not synchronized: owned by exactly one command list.
#[derive(Debug, Default)]
pub struct ResourceStateTracker {
    barriers: Vec<Barrier>,
    pending: Vec<Barrier>,
    final_states: HashMap<ResourceId, LocalResourceState>,
}

impl ResourceStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a barrier, synthesizing the "before" state of transitions from
    /// what this list already knows.
    pub fn resource_barrier(&mut self, barrier: Barrier) {
        let Barrier::Transition {
            resource,
            subresource,
            after,
            ..
        } = barrier
        else {
            self.barriers.push(barrier);
            return;
        };

        let local = self.final_states.entry(resource).or_default();
        if !local.transitions_to(resource, subresource, after, &mut self.barriers) {
            self.pending.push(barrier);
        }
        local.set_subresource_state(subresource, after);
    }

    /// Shorthand for a transition whose "before" state is derived.
    pub fn transition_resource(
        &mut self,
        resource: ResourceId,
        after: ResourceStates,
        subresource: u32,
    ) {
        self.resource_barrier(Barrier::transition(
            resource,
            ResourceStates::COMMON,
            after,
            subresource,
        ));
    }

    pub fn uav_barrier(&mut self, resource: Option<ResourceId>) {
        self.resource_barrier(Barrier::Uav { resource });
    }

    pub fn aliasing_barrier(&mut self, before: Option<ResourceId>, after: Option<ResourceId>) {
        self.resource_barrier(Barrier::Aliasing { before, after });
    }

    /// Records the buffered barriers into `stream` and clears the buffer.
    pub fn flush_resource_barriers(&mut self, stream: &mut CommandStream) {
        if !self.barriers.is_empty() {
            stream.record(NativeCommand::ResourceBarriers(std::mem::take(&mut self.barriers)));
        }
    }

    #[inline]
    pub fn barriers(&self) -> &[Barrier] {
        &self.barriers
    }

    #[inline]
    pub fn pending_barriers(&self) -> &[Barrier] {
        &self.pending
    }

    pub(crate) fn take_pending(&mut self) -> Vec<Barrier> {
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn take_final_states(&mut self) -> HashMap<ResourceId, LocalResourceState> {
        std::mem::take(&mut self.final_states)
    }

    /// State `resource` will be in once this list's barriers have executed.
    pub fn final_state(&self, resource: ResourceId) -> Option<&LocalResourceState> {
        self.final_states.get(&resource)
    }

    /// Final state of a whole resource, if known and uniform.
    pub fn final_whole_state(&self, resource: ResourceId) -> Option<ResourceStates> {
        self.final_state(resource)
            .filter(|s| !s.is_split())
            .and_then(|s| s.whole)
    }

    pub fn reset(&mut self) {
        self.barriers.clear();
        self.pending.clear();
        self.final_states.clear();
    }
}
