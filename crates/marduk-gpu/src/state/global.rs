use std::collections::HashMap;
use std::collections::hash_map::Entry;

use parking_lot::{Mutex, MutexGuard};

use crate::native::{ALL_SUBRESOURCES, Barrier, CommandStream, NativeCommand, ResourceId, ResourceStates};

use super::{LocalResourceState, ResourceState, ResourceStateTracker};

/// Committed resource states, shared by every queue of a device.
///
/// The map is only reachable through a [`CommitEpoch`], which holds the lock
/// for the whole close, resolve, submit, commit sequence of one `execute`.
#[derive(Default)]
pub struct GlobalResourceState {
    states: Mutex<HashMap<ResourceId, ResourceState>>,
}

impl GlobalResourceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the committed states until the returned guard is dropped.
    pub fn begin_commit_epoch(&self) -> CommitEpoch<'_> {
        CommitEpoch {
            states: self.states.lock(),
        }
    }

    /// Adds (or overwrites) the committed state of a resource.
    pub fn register_resource(&self, resource: ResourceId, state: ResourceStates) {
        self.states.lock().insert(resource, ResourceState::new(state));
    }

    pub fn unregister_resource(&self, resource: ResourceId) {
        self.states.lock().remove(&resource);
    }

    /// Snapshot of the committed state of `resource`.
    pub fn resource_state(&self, resource: ResourceId) -> Option<ResourceState> {
        self.states.lock().get(&resource).cloned()
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to the committed resource states.
pub struct CommitEpoch<'a> {
    states: MutexGuard<'a, HashMap<ResourceId, ResourceState>>,
}

impl CommitEpoch<'_> {
    /// Resolves the first-use transitions of `tracker` against committed
    /// state and records the fix-up barriers into `pending`.
    ///
    /// Resources without a committed state are assumed to already be in the
    /// requested state. Returns the number of barriers recorded.
    ///
    /// A resource's whole-resource first use is resolved before its
    /// subresource first uses: the subresources the list touched earlier
    /// start from the whole first-use state, every other one stays there.
    pub fn flush_pending_resource_barriers(
        &mut self,
        tracker: &mut ResourceStateTracker,
        pending: &mut CommandStream,
    ) -> u32 {
        let (whole, subresources): (Vec<_>, Vec<_>) = tracker
            .take_pending()
            .into_iter()
            .partition(|barrier| {
                matches!(
                    barrier,
                    Barrier::Transition { subresource, .. } if *subresource == ALL_SUBRESOURCES
                )
            });

        // Committed states advanced by the fix-ups recorded so far.
        let mut working: HashMap<ResourceId, ResourceState> = HashMap::new();
        let mut barriers = Vec::new();

        for barrier in whole.into_iter().chain(subresources) {
            let Barrier::Transition {
                resource,
                subresource,
                after,
                ..
            } = barrier
            else {
                continue;
            };

            let state = match working.entry(resource) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => match self.states.get(&resource) {
                    Some(committed) => entry.insert(committed.clone()),
                    None => continue,
                },
            };
            state.transitions_to(resource, subresource, after, &mut barriers);
            state.set_subresource_state(subresource, after);
        }

        let count = barriers.len() as u32;
        if count > 0 {
            log::trace!("resolved {count} pending barrier(s)");
            pending.record(NativeCommand::ResourceBarriers(barriers));
        }
        count
    }

    /// Moves the final states of `tracker` into the committed map.
    ///
    /// Must follow [`flush_pending_resource_barriers`](Self::flush_pending_resource_barriers)
    /// for the same tracker within this epoch.
    pub fn commit_final_resource_states(&mut self, tracker: &mut ResourceStateTracker) {
        for (resource, state) in tracker.take_final_states() {
            self.apply(resource, state);
        }
    }

    fn apply(&mut self, resource: ResourceId, local: LocalResourceState) {
        let committed = match (self.states.entry(resource), local.whole) {
            (Entry::Occupied(entry), whole) => {
                let committed = entry.into_mut();
                if let Some(whole) = whole {
                    *committed = ResourceState::new(whole);
                }
                committed
            }
            (Entry::Vacant(entry), Some(whole)) => entry.insert(ResourceState::new(whole)),
            // Untracked and never made uniform by this list.
            (Entry::Vacant(_), None) => return,
        };

        for (sub, state) in local.subresources {
            committed.set_subresource_state(sub, state);
        }
    }

    pub fn resource_state(&self, resource: ResourceId) -> Option<&ResourceState> {
        self.states.get(&resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::QueueType;

    const R: ResourceId = ResourceId(7);

    fn barriers(stream: &CommandStream) -> Vec<Barrier> {
        stream
            .commands()
            .iter()
            .flat_map(|cmd| match cmd {
                NativeCommand::ResourceBarriers(b) => b.clone(),
                _ => Vec::new(),
            })
            .collect()
    }

    #[test]
    fn pending_resolves_against_committed_state() {
        let global = GlobalResourceState::new();
        global.register_resource(R, ResourceStates::COPY_DEST);

        let mut tracker = ResourceStateTracker::new();
        tracker.transition_resource(R, ResourceStates::PIXEL_SHADER_RESOURCE, ALL_SUBRESOURCES);

        let mut pending = CommandStream::new(QueueType::Direct);
        let mut epoch = global.begin_commit_epoch();
        assert_eq!(epoch.flush_pending_resource_barriers(&mut tracker, &mut pending), 1);
        epoch.commit_final_resource_states(&mut tracker);
        drop(epoch);

        assert_eq!(
            barriers(&pending),
            vec![Barrier::transition(
                R,
                ResourceStates::COPY_DEST,
                ResourceStates::PIXEL_SHADER_RESOURCE,
                ALL_SUBRESOURCES
            )]
        );
        assert_eq!(
            global.resource_state(R),
            Some(ResourceState::new(ResourceStates::PIXEL_SHADER_RESOURCE))
        );
        assert!(tracker.final_state(R).is_none());
    }

    #[test]
    fn matching_committed_state_emits_nothing() {
        let global = GlobalResourceState::new();
        global.register_resource(R, ResourceStates::COPY_DEST);

        let mut tracker = ResourceStateTracker::new();
        tracker.transition_resource(R, ResourceStates::COPY_DEST, ALL_SUBRESOURCES);

        let mut pending = CommandStream::new(QueueType::Copy);
        let mut epoch = global.begin_commit_epoch();
        assert_eq!(epoch.flush_pending_resource_barriers(&mut tracker, &mut pending), 0);
        assert!(pending.is_empty());
    }

    #[test]
    fn unknown_resource_is_committed_without_fix_up() {
        let global = GlobalResourceState::new();
        let mut tracker = ResourceStateTracker::new();
        tracker.transition_resource(R, ResourceStates::RENDER_TARGET, ALL_SUBRESOURCES);

        let mut pending = CommandStream::new(QueueType::Direct);
        let mut epoch = global.begin_commit_epoch();
        assert_eq!(epoch.flush_pending_resource_barriers(&mut tracker, &mut pending), 0);
        epoch.commit_final_resource_states(&mut tracker);
        assert_eq!(
            epoch.resource_state(R).map(|s| s.state),
            Some(ResourceStates::RENDER_TARGET)
        );
    }

    #[test]
    fn commits_resolve_in_submission_order() {
        // List 1 moves R A -> B, list 2 (recorded concurrently) B -> C. List 2's
        // fix-up has to start from whatever was committed before it, not from
        // list 1's local view.
        let global = GlobalResourceState::new();
        global.register_resource(R, ResourceStates::COMMON);

        let mut list1 = ResourceStateTracker::new();
        list1.transition_resource(R, ResourceStates::COPY_DEST, ALL_SUBRESOURCES);
        let mut list2 = ResourceStateTracker::new();
        list2.transition_resource(R, ResourceStates::PIXEL_SHADER_RESOURCE, ALL_SUBRESOURCES);

        let mut pending2 = CommandStream::new(QueueType::Direct);
        {
            let mut epoch = global.begin_commit_epoch();
            let mut pending1 = CommandStream::new(QueueType::Direct);
            epoch.flush_pending_resource_barriers(&mut list1, &mut pending1);
            epoch.commit_final_resource_states(&mut list1);
        }
        {
            let mut epoch = global.begin_commit_epoch();
            epoch.flush_pending_resource_barriers(&mut list2, &mut pending2);
            epoch.commit_final_resource_states(&mut list2);
        }

        assert_eq!(
            barriers(&pending2),
            vec![Barrier::transition(
                R,
                ResourceStates::COPY_DEST,
                ResourceStates::PIXEL_SHADER_RESOURCE,
                ALL_SUBRESOURCES
            )]
        );
    }

    #[test]
    fn split_local_state_merges_into_committed() {
        let global = GlobalResourceState::new();
        global.register_resource(R, ResourceStates::COMMON);

        let mut tracker = ResourceStateTracker::new();
        tracker.transition_resource(R, ResourceStates::RENDER_TARGET, 3);

        let mut pending = CommandStream::new(QueueType::Direct);
        let mut epoch = global.begin_commit_epoch();
        epoch.flush_pending_resource_barriers(&mut tracker, &mut pending);
        epoch.commit_final_resource_states(&mut tracker);
        drop(epoch);

        let committed = global.resource_state(R).unwrap();
        assert_eq!(committed.subresource_state(3), ResourceStates::RENDER_TARGET);
        assert_eq!(committed.subresource_state(0), ResourceStates::COMMON);
    }

    #[test]
    fn subresource_after_whole_transition_keeps_the_whole_state() {
        let global = GlobalResourceState::new();
        global.register_resource(R, ResourceStates::COMMON);

        let mut tracker = ResourceStateTracker::new();
        tracker.transition_resource(R, ResourceStates::COPY_DEST, ALL_SUBRESOURCES);
        tracker.transition_resource(R, ResourceStates::PIXEL_SHADER_RESOURCE, 0);

        let mut pending = CommandStream::new(QueueType::Direct);
        let mut epoch = global.begin_commit_epoch();
        epoch.flush_pending_resource_barriers(&mut tracker, &mut pending);
        epoch.commit_final_resource_states(&mut tracker);
        drop(epoch);

        let committed = global.resource_state(R).unwrap();
        assert_eq!(committed.subresource_state(0), ResourceStates::PIXEL_SHADER_RESOURCE);
        assert_eq!(committed.subresource_state(1), ResourceStates::COPY_DEST);

        // The next list's first use starts from what the GPU actually holds.
        let mut next = ResourceStateTracker::new();
        next.transition_resource(R, ResourceStates::RENDER_TARGET, 1);
        let mut pending = CommandStream::new(QueueType::Direct);
        global
            .begin_commit_epoch()
            .flush_pending_resource_barriers(&mut next, &mut pending);
        assert_eq!(
            barriers(&pending),
            vec![Barrier::transition(
                R,
                ResourceStates::COPY_DEST,
                ResourceStates::RENDER_TARGET,
                1
            )]
        );
    }

    #[test]
    fn first_use_subresources_resolve_independently() {
        let global = GlobalResourceState::new();
        global.register_resource(R, ResourceStates::COMMON);

        let mut tracker = ResourceStateTracker::new();
        tracker.transition_resource(R, ResourceStates::RENDER_TARGET, 0);
        tracker.transition_resource(R, ResourceStates::COPY_DEST, 1);

        let mut pending = CommandStream::new(QueueType::Direct);
        let mut epoch = global.begin_commit_epoch();
        assert_eq!(epoch.flush_pending_resource_barriers(&mut tracker, &mut pending), 2);
        epoch.commit_final_resource_states(&mut tracker);
        drop(epoch);

        assert_eq!(
            barriers(&pending),
            vec![
                Barrier::transition(R, ResourceStates::COMMON, ResourceStates::RENDER_TARGET, 0),
                Barrier::transition(R, ResourceStates::COMMON, ResourceStates::COPY_DEST, 1),
            ]
        );
        let committed = global.resource_state(R).unwrap();
        assert_eq!(committed.subresource_state(0), ResourceStates::RENDER_TARGET);
        assert_eq!(committed.subresource_state(1), ResourceStates::COPY_DEST);
        assert_eq!(committed.subresource_state(2), ResourceStates::COMMON);
    }

    #[test]
    fn whole_first_use_after_subresource_fixes_up_whole_first() {
        let global = GlobalResourceState::new();
        global.register_resource(R, ResourceStates::COMMON);

        let mut tracker = ResourceStateTracker::new();
        tracker.transition_resource(R, ResourceStates::RENDER_TARGET, 0);
        tracker.transition_resource(R, ResourceStates::PIXEL_SHADER_RESOURCE, ALL_SUBRESOURCES);

        let mut pending = CommandStream::new(QueueType::Direct);
        let mut epoch = global.begin_commit_epoch();
        epoch.flush_pending_resource_barriers(&mut tracker, &mut pending);
        epoch.commit_final_resource_states(&mut tracker);
        drop(epoch);

        assert_eq!(
            barriers(&pending),
            vec![
                Barrier::transition(
                    R,
                    ResourceStates::COMMON,
                    ResourceStates::PIXEL_SHADER_RESOURCE,
                    ALL_SUBRESOURCES
                ),
                Barrier::transition(
                    R,
                    ResourceStates::PIXEL_SHADER_RESOURCE,
                    ResourceStates::RENDER_TARGET,
                    0
                ),
            ]
        );
        assert_eq!(
            global.resource_state(R),
            Some(ResourceState::new(ResourceStates::PIXEL_SHADER_RESOURCE))
        );
    }

    #[test]
    fn unregister_removes_entry() {
        let global = GlobalResourceState::new();
        global.register_resource(R, ResourceStates::COMMON);
        assert_eq!(global.len(), 1);
        global.unregister_resource(R);
        assert!(global.is_empty());
    }
}
