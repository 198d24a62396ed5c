//! Device execution model: work-items, work-groups and the dispatcher.
//!
//! A launch flows top-down:
//!
//! ```text
//!   Device::run ── validates the N-D range, stages constants
//!        │
//!        ▼
//!   WorkGroup ──── local memory + cooperative scheduler (row-major)
//!        │
//!        ▼
//!   WorkItem ───── register file, private memory, one step at a time
//! ```
//!
//! Every memory access, instruction retirement, barrier and lifecycle
//! transition is published synchronously on the plugin bus before control
//! returns to the interpreter.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use ocl_emu::device::Device;
//! use ocl_emu::kernel::Kernel;
//! use ocl_emu::memory::TypedValue;
//! use ocl_emu::testing::programs;
//!
//! let mut device = Device::new();
//! let module = Rc::new(programs::copy_kernel());
//! let mut kernel = Kernel::new(module, "copy").unwrap();
//!
//! let input = device.create_buffer(16).unwrap();
//! let output = device.create_buffer(16).unwrap();
//! kernel.set_argument(0, TypedValue::from_size_t(input)).unwrap();
//! kernel.set_argument(1, TypedValue::from_size_t(output)).unwrap();
//!
//! device.run(&mut kernel, 1, [0; 3], [4, 1, 1], [2, 1, 1]).unwrap();
//! ```

pub mod dispatch;
pub mod work_group;
pub mod work_item;

pub use dispatch::{
    Device, KernelInvocation, LaunchError, ENV_INTERACTIVE, GLOBAL_MEMORY_CAPACITY,
};
pub use work_group::WorkGroup;
pub use work_item::{WorkItem, WorkItemState, PRIVATE_MEMORY_CAPACITY};
