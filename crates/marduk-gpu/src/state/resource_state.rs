use std::collections::BTreeMap;

use crate::native::{ALL_SUBRESOURCES, Barrier, ResourceId, ResourceStates};

/// Usage state of one resource: either uniform, or split per subresource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceState {
    /// State of every subresource not listed in `subresources`.
    pub state: ResourceStates,
    pub subresources: BTreeMap<u32, ResourceStates>,
}

impl ResourceState {
    pub fn new(state: ResourceStates) -> Self {
        Self {
            state,
            subresources: BTreeMap::new(),
        }
    }

    /// Sets one subresource, or the whole resource with [`ALL_SUBRESOURCES`]
    /// (which collapses any split).
    pub fn set_subresource_state(&mut self, subresource: u32, state: ResourceStates) {
        if subresource == ALL_SUBRESOURCES {
            self.state = state;
            self.subresources.clear();
        } else {
            self.subresources.insert(subresource, state);
        }
    }

    pub fn subresource_state(&self, subresource: u32) -> ResourceStates {
        self.subresources
            .get(&subresource)
            .copied()
            .unwrap_or(self.state)
    }

    #[inline]
    pub fn is_split(&self) -> bool {
        !self.subresources.is_empty()
    }

    /// Barriers moving `subresource` from this state to `after`.
    ///
    /// A whole-resource transition of a split resource becomes one barrier per
    /// tracked subresource. Subresources already in `after` need no barrier.
    pub(crate) fn transitions_to(
        &self,
        resource: ResourceId,
        subresource: u32,
        after: ResourceStates,
        out: &mut Vec<Barrier>,
    ) {
        if subresource == ALL_SUBRESOURCES && self.is_split() {
            for (&sub, &before) in &self.subresources {
                if before != after {
                    out.push(Barrier::transition(resource, before, after, sub));
                }
            }
        } else {
            let before = self.subresource_state(subresource);
            if before != after {
                out.push(Barrier::transition(resource, before, after, subresource));
            }
        }
    }
}

/// What one command list knows about the state of a resource it touched.
///
/// The whole-resource state is only known once the list transitioned the
/// whole resource; before that only the subresources it transitioned are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalResourceState {
    pub whole: Option<ResourceStates>,
    pub subresources: BTreeMap<u32, ResourceStates>,
}

impl LocalResourceState {
    pub fn set_subresource_state(&mut self, subresource: u32, state: ResourceStates) {
        if subresource == ALL_SUBRESOURCES {
            self.whole = Some(state);
            self.subresources.clear();
        } else {
            self.subresources.insert(subresource, state);
        }
    }

    /// State of `subresource`, if this list knows it.
    pub fn subresource_state(&self, subresource: u32) -> Option<ResourceStates> {
        self.subresources.get(&subresource).copied().or(self.whole)
    }

    #[inline]
    pub fn is_split(&self) -> bool {
        !self.subresources.is_empty()
    }

    /// Barriers moving `subresource` from the known state to `after`.
    ///
    /// Returns `false` when part of the transition starts from a state this
    /// list does not know. For a whole-resource transition the barriers of
    /// the known subresources are still emitted.
    pub(crate) fn transitions_to(
        &self,
        resource: ResourceId,
        subresource: u32,
        after: ResourceStates,
        out: &mut Vec<Barrier>,
    ) -> bool {
        match self.whole {
            Some(whole) => {
                ResourceState {
                    state: whole,
                    subresources: self.subresources.clone(),
                }
                .transitions_to(resource, subresource, after, out);
                true
            }
            None if subresource == ALL_SUBRESOURCES => {
                for (&sub, &before) in &self.subresources {
                    if before != after {
                        out.push(Barrier::transition(resource, before, after, sub));
                    }
                }
                false
            }
            None => match self.subresources.get(&subresource) {
                Some(&before) => {
                    if before != after {
                        out.push(Barrier::transition(resource, before, after, subresource));
                    }
                    true
                }
                None => false,
            },
        }
    }
}
