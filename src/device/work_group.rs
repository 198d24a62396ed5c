//! Work-groups: local memory plus a cooperative, deterministic scheduler
//! over the group's work-items.
//!
//! Items are stored in a flat row-major buffer; the index of local id
//! `(i, j, k)` is `i + (k*Ny + j)*Nx`. That layout is a contract, not an
//! implementation detail: plugin event ordering follows the visit order,
//! so it must be reproducible run to run.

use std::rc::Rc;

use super::dispatch::KernelInvocation;
use super::work_item::{WorkItem, WorkItemState};
use crate::kernel::{BindingKey, Kernel};
use crate::memory::{Memory, MemoryError, TypedValue};
use crate::plugin::{Context, MessageType};
use crate::program::types::AddressSpace;

/// A fixed-size block of work-items sharing local memory and barriers.
pub struct WorkGroup {
    context: Rc<Context>,
    group_id: [usize; 3],
    local_size: [usize; 3],
    local_memory: Memory,
    work_items: Vec<WorkItem>,
}

impl WorkGroup {
    pub(crate) fn new(
        context: Rc<Context>,
        kernel: &Kernel,
        invocation: Rc<KernelInvocation>,
        group_id: [usize; 3],
    ) -> Result<WorkGroup, MemoryError> {
        let local_size = invocation.local_size;
        let module = Rc::clone(kernel.module());
        let function = kernel.function_id();

        // Back the group's local address space with one allocation and
        // rebase the kernel's local offsets onto it.
        let local_bytes = kernel.local_memory_size();
        let mut local_memory =
            Memory::new(AddressSpace::Local, local_bytes, Rc::clone(&context));
        let local_base = local_memory.allocate(local_bytes)?;

        let mut bindings = kernel.snapshot_bindings();
        let params = &module.functions[function.0].params;
        for (key, value) in bindings.iter_mut() {
            let is_local = match key {
                BindingKey::Param(i) => {
                    params[*i].ty.pointer_space() == Some(AddressSpace::Local)
                }
                BindingKey::Global(g) => module
                    .global(*g)
                    .map(|v| v.space == AddressSpace::Local)
                    .unwrap_or(false),
            };
            if is_local {
                *value = TypedValue::from_size_t(local_base + value.as_size_t());
            }
        }
        let bindings = Rc::new(bindings);

        let mut work_items =
            Vec::with_capacity(local_size[0] * local_size[1] * local_size[2]);
        for z in 0..local_size[2] {
            for y in 0..local_size[1] {
                for x in 0..local_size[0] {
                    work_items.push(WorkItem::new(
                        Rc::clone(&context),
                        Rc::clone(&module),
                        function,
                        Rc::clone(&invocation),
                        Rc::clone(&bindings),
                        group_id,
                        [x, y, z],
                    ));
                }
            }
        }

        Ok(WorkGroup {
            context,
            group_id,
            local_size,
            local_memory,
            work_items,
        })
    }

    /// Id triple of this group within the launch.
    pub fn group_id(&self) -> [usize; 3] {
        self.group_id
    }

    /// Local size triple (work-items per dimension).
    pub fn size(&self) -> [usize; 3] {
        self.local_size
    }

    /// The group's local memory region.
    pub fn local_memory(&self) -> &Memory {
        &self.local_memory
    }

    /// The group's work-items in row-major order.
    pub fn work_items(&self) -> &[WorkItem] {
        &self.work_items
    }

    /// Run every work-item to completion, honouring barriers.
    ///
    /// Items are visited in row-major order and stepped until they
    /// suspend or finish. When all live items sit at a barrier with
    /// matching fence flags the group publishes `workGroupBarrier` and
    /// releases them; divergent barriers fault the whole group.
    pub(crate) fn run(&mut self, global: &mut Memory) {
        loop {
            for idx in 0..self.work_items.len() {
                loop {
                    let state = {
                        let item = &mut self.work_items[idx];
                        item.step(&mut self.local_memory, global)
                    };
                    if state != WorkItemState::Ready {
                        break;
                    }
                }
            }

            let mut at_barrier = 0;
            let mut retired = 0;
            let mut flags: Option<u32> = None;
            let mut divergent = false;
            for item in &self.work_items {
                match item.state() {
                    WorkItemState::AtBarrier => {
                        at_barrier += 1;
                        match flags {
                            None => flags = Some(item.barrier_flags()),
                            Some(f) if f != item.barrier_flags() => divergent = true,
                            Some(_) => {}
                        }
                    }
                    WorkItemState::Finished | WorkItemState::Faulted => retired += 1,
                    WorkItemState::Ready => {}
                }
            }

            if at_barrier == 0 {
                break;
            }
            if retired > 0 {
                self.divergence_fault("barrier is missing participants");
                break;
            }
            if divergent {
                self.divergence_fault("mismatched barrier fence flags");
                break;
            }

            self.context
                .notify_work_group_barrier(&*self, flags.unwrap_or(0));
            for item in &mut self.work_items {
                item.release_barrier();
            }
        }

        self.context.notify_work_group_complete(&*self);
    }

    /// Fault every still-live item: barrier participation diverged.
    fn divergence_fault(&mut self, reason: &str) {
        self.context.log(
            MessageType::Error,
            &format!(
                "work-group ({},{},{}): barrier divergence: {}",
                self.group_id[0], self.group_id[1], self.group_id[2], reason
            ),
        );
        for item in &mut self.work_items {
            if !matches!(
                item.state(),
                WorkItemState::Finished | WorkItemState::Faulted
            ) {
                item.force_fault();
            }
        }
    }
}

impl std::fmt::Debug for WorkGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkGroup")
            .field("group_id", &self.group_id)
            .field("local_size", &self.local_size)
            .field("work_items", &self.work_items.len())
            .finish()
    }
}
