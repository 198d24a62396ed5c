//! The device dispatcher: N-D range decomposition and the launch loop.
//!
//! A [`Device`] owns the global memory region (persisting across kernel
//! launches in the same context) and the plugin [`Context`]. `run`
//! validates the range, stages constants, materialises work-groups in
//! lexicographic order, and drives them to completion serially — the
//! deterministic mode that is always safe regardless of plugin thread
//! safety.

use std::rc::Rc;

use thiserror::Error;

use super::work_group::WorkGroup;
use crate::kernel::{Kernel, KernelError};
use crate::memory::{Memory, MemoryError};
use crate::plugin::{Context, MessageType, Plugin, PluginError, PluginHandle};
use crate::program::types::AddressSpace;

/// Global-region capacity per device.
pub const GLOBAL_MEMORY_CAPACITY: usize = 128 << 20;

/// Environment variable that hands launches to an interactive debugger
/// plugin when set to `"1"`.
pub const ENV_INTERACTIVE: &str = "OCLGRIND_INTERACTIVE";

/// Errors that fail a launch before or during group creation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LaunchError {
    /// `work_dim` outside `1..=3`.
    #[error("work dimension {0} outside 1..=3")]
    InvalidWorkDimension(u32),

    /// A local size is zero, does not divide the global size, or violates
    /// the kernel's required work-group size.
    #[error("invalid work size: {0}")]
    InvalidWorkSize(String),

    /// A formal parameter has no binding.
    #[error("argument {index} of kernel '{kernel}' is not set")]
    UnboundArgument {
        /// Parameter index.
        index: usize,
        /// Kernel name.
        kernel: String,
    },

    /// A region operation failed during launch set-up.
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// Constant staging failed.
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

/// Geometry of one kernel launch, handed to `kernelBegin`/`kernelEnd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelInvocation {
    /// Kernel name.
    pub kernel_name: String,
    /// Number of dimensions supplied by the caller (1..=3).
    pub work_dim: u32,
    /// Global id offset per dimension.
    pub global_offset: [usize; 3],
    /// Global work size per dimension.
    pub global_size: [usize; 3],
    /// Work-group size per dimension.
    pub local_size: [usize; 3],
    /// Work-group count per dimension.
    pub num_groups: [usize; 3],
}

/// A simulated compute device.
pub struct Device {
    context: Rc<Context>,
    global_memory: Memory,
    interactive: bool,
}

impl Device {
    /// Create a device with an empty global region.
    pub fn new() -> Device {
        let context = Context::new();
        let global_memory = Memory::new(
            AddressSpace::Global,
            GLOBAL_MEMORY_CAPACITY,
            Rc::clone(&context),
        );
        let interactive = std::env::var(ENV_INTERACTIVE)
            .map(|v| v == "1")
            .unwrap_or(false);

        Device {
            context,
            global_memory,
            interactive,
        }
    }

    /// The plugin context shared by this device's regions.
    pub fn context(&self) -> &Rc<Context> {
        &self.context
    }

    /// Register a plugin. Invalid during a launch.
    pub fn add_plugin(&self, plugin: Rc<dyn Plugin>) -> Result<PluginHandle, PluginError> {
        self.context.add_plugin(plugin)
    }

    /// Remove a plugin. Invalid during a launch.
    pub fn remove_plugin(&self, handle: PluginHandle) -> Result<(), PluginError> {
        self.context.remove_plugin(handle)
    }

    /// True when `OCLGRIND_INTERACTIVE=1` was set at construction.
    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// The global memory region.
    pub fn global_memory(&self) -> &Memory {
        &self.global_memory
    }

    /// The global memory region, mutable.
    pub fn global_memory_mut(&mut self) -> &mut Memory {
        &mut self.global_memory
    }

    /// Allocate a buffer in global memory (the `clCreateBuffer`
    /// equivalent).
    pub fn create_buffer(&mut self, size: usize) -> Result<usize, MemoryError> {
        self.global_memory.allocate(size)
    }

    /// Release a buffer allocated with [`Device::create_buffer`].
    pub fn release_buffer(&mut self, address: usize) -> Result<(), MemoryError> {
        self.global_memory.deallocate(address)
    }

    /// Host-side write into global memory; surfaces as
    /// `hostMemoryStore`.
    pub fn write_buffer(&mut self, address: usize, data: &[u8]) -> Result<(), MemoryError> {
        self.global_memory.store(address, data)?;
        self.context
            .notify_host_memory_store(&self.global_memory, address, data.len(), data);
        Ok(())
    }

    /// Host-side read from global memory; surfaces as `hostMemoryLoad`.
    pub fn read_buffer(&mut self, address: usize, size: usize) -> Result<Vec<u8>, MemoryError> {
        let data = self.global_memory.load(address, size)?.to_vec();
        self.context
            .notify_host_memory_load(&self.global_memory, address, size);
        Ok(data)
    }

    /// Launch `kernel` over an N-D range.
    ///
    /// Dimensions beyond `work_dim` default to offset 0, global size 1
    /// and local size 1. The launch fails with `InvalidWorkSize` when a
    /// local size is zero, does not divide the global size, or conflicts
    /// with the kernel's `reqd_work_group_size`; those failures precede
    /// constant staging and `kernelBegin`.
    pub fn run(
        &mut self,
        kernel: &mut Kernel,
        work_dim: u32,
        global_offset: [usize; 3],
        global_size: [usize; 3],
        local_size: [usize; 3],
    ) -> Result<(), LaunchError> {
        if !(1..=3).contains(&work_dim) {
            return Err(self.launch_error(LaunchError::InvalidWorkDimension(work_dim)));
        }

        let mut offset = [0usize; 3];
        let mut ndrange = [1usize; 3];
        let mut wgsize = [1usize; 3];
        for d in 0..work_dim as usize {
            offset[d] = global_offset[d];
            ndrange[d] = global_size[d];
            wgsize[d] = local_size[d];
        }

        let reqd = kernel.required_work_group_size();
        for d in 0..3 {
            if wgsize[d] == 0 {
                return Err(self.launch_error(LaunchError::InvalidWorkSize(format!(
                    "local size is zero in dimension {}",
                    d
                ))));
            }
            if ndrange[d] % wgsize[d] != 0 {
                return Err(self.launch_error(LaunchError::InvalidWorkSize(format!(
                    "local size {} does not divide global size {} in dimension {}",
                    wgsize[d], ndrange[d], d
                ))));
            }
            if reqd[d] != 0 && wgsize[d] != reqd[d] {
                return Err(self.launch_error(LaunchError::InvalidWorkSize(format!(
                    "local size {} violates required work-group size {} in dimension {}",
                    wgsize[d], reqd[d], d
                ))));
            }
        }

        for i in 0..kernel.num_arguments() {
            if kernel.argument_value(i).is_none() {
                return Err(self.launch_error(LaunchError::UnboundArgument {
                    index: i,
                    kernel: kernel.name().to_string(),
                }));
            }
        }

        let num_groups = [
            ndrange[0] / wgsize[0],
            ndrange[1] / wgsize[1],
            ndrange[2] / wgsize[2],
        ];
        kernel.set_global_size(ndrange);

        let invocation = Rc::new(KernelInvocation {
            kernel_name: kernel.name().to_string(),
            work_dim,
            global_offset: offset,
            global_size: ndrange,
            local_size: wgsize,
            num_groups,
        });

        // Constant staging precedes kernelBegin; on failure the launch
        // dies but kernelEnd is still published so plugin begin/end
        // bookkeeping can tear down.
        if let Err(e) = kernel.allocate_constants(&mut self.global_memory) {
            let e = self.launch_error(LaunchError::Kernel(e));
            self.context.notify_kernel_end(&invocation);
            return Err(e);
        }

        self.context.set_launch_active(true);
        self.context.notify_kernel_begin(&invocation);
        if self.interactive {
            self.context.log(
                MessageType::Info,
                "interactive mode: launch paused before running groups; \
                 control is with the interactive plugin",
            );
        }

        let result = self.run_groups(kernel, &invocation);

        self.context.notify_kernel_end(&invocation);
        self.context.set_launch_active(false);
        kernel.deallocate_constants(&mut self.global_memory)?;
        result
    }

    /// Materialise and run every work-group in lexicographic order.
    fn run_groups(
        &mut self,
        kernel: &Kernel,
        invocation: &Rc<KernelInvocation>,
    ) -> Result<(), LaunchError> {
        let n = invocation.num_groups;
        let mut groups = Vec::with_capacity(n[0] * n[1] * n[2]);
        for k in 0..n[2] {
            for j in 0..n[1] {
                for i in 0..n[0] {
                    let group = WorkGroup::new(
                        Rc::clone(&self.context),
                        kernel,
                        Rc::clone(invocation),
                        [i, j, k],
                    )
                    .map_err(|e| self.launch_error(LaunchError::Memory(e)))?;
                    groups.push(group);
                }
            }
        }

        for group in &mut groups {
            group.run(&mut self.global_memory);
        }
        Ok(())
    }

    fn launch_error(&self, error: LaunchError) -> LaunchError {
        self.context.log(MessageType::Error, &error.to_string());
        error
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("global_memory", &self.global_memory)
            .field("interactive", &self.interactive)
            .field("plugins", &self.context.num_plugins())
            .finish()
    }
}
