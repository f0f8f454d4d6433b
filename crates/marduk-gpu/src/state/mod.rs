//! Resource state tracking.
//!
//! Every command list owns a [`ResourceStateTracker`] that records barriers
//! while the list is being built. First-use transitions are resolved against
//! the device-wide [`GlobalResourceState`] when the list is closed, inside a
//! [`CommitEpoch`].

mod global;
mod resource_state;
mod tracker;

pub use global::{CommitEpoch, GlobalResourceState};
pub use resource_state::{LocalResourceState, ResourceState};
pub use tracker::ResourceStateTracker;
