//! Command lists and the queues that execute them.
//!
//! This module is responsible for:
//! - recording GPU work into [`CommandList`]s
//! - resolving first-use barriers against committed state on submission
//! - signaling queue fences and recycling lists once the GPU is done

mod list;
mod queue;

pub use list::CommandList;
pub use queue::CommandQueue;
