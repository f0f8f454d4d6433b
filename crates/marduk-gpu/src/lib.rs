//! Marduk GPU submission crate.
//!
//! This crate owns the layer between a renderer and the native GPU API:
//! command lists and queues, resource state tracking across queues, CPU
//! descriptor allocation, shader-visible descriptor staging and transient
//! upload memory.
//!
//! The native API sits behind the traits in [`native`]. The [`native::soft`]
//! backend runs everything on the CPU; the `wgpu` feature adds a backend on
//! top of `wgpu`.

pub mod command;
pub mod descriptor;
pub mod device;
pub mod dynamic_heap;
pub mod logging;
pub mod native;
pub mod state;
pub mod upload;

pub use command::{CommandList, CommandQueue};
pub use device::{Device, DeviceInit};
