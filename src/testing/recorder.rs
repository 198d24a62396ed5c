//! A plugin that records the full event stream for assertions.

use std::cell::RefCell;

use crate::device::{KernelInvocation, WorkGroup, WorkItem, WorkItemState};
use crate::memory::{Memory, TypedValue};
use crate::plugin::{MessageType, Plugin};
use crate::program::instruction::{AtomicOp, Instruction};
use crate::program::types::AddressSpace;

/// One recorded plugin event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// `hostMemoryLoad`
    HostMemoryLoad {
        /// Address read.
        address: usize,
        /// Bytes read.
        size: usize,
    },
    /// `hostMemoryStore`
    HostMemoryStore {
        /// Address written.
        address: usize,
        /// Bytes written.
        size: usize,
    },
    /// `memoryAllocated`
    MemoryAllocated {
        /// Region address space.
        space: AddressSpace,
        /// Allocation base.
        address: usize,
        /// Allocation size.
        size: usize,
    },
    /// `memoryDeallocated`
    MemoryDeallocated {
        /// Region address space.
        space: AddressSpace,
        /// Allocation base.
        address: usize,
    },
    /// `memoryLoad` by a work-item
    MemoryLoad {
        /// Region address space.
        space: AddressSpace,
        /// Global id of the loading item.
        item: [usize; 3],
        /// Address read.
        address: usize,
        /// Bytes read.
        size: usize,
    },
    /// `memoryStore` by a work-item
    MemoryStore {
        /// Region address space.
        space: AddressSpace,
        /// Global id of the storing item.
        item: [usize; 3],
        /// Address written.
        address: usize,
        /// Bytes written.
        size: usize,
    },
    /// `memoryAtomicLoad`
    MemoryAtomicLoad {
        /// Atomic operation.
        op: AtomicOp,
        /// Global id of the item.
        item: [usize; 3],
        /// Word address.
        address: usize,
    },
    /// `memoryAtomicStore`
    MemoryAtomicStore {
        /// Atomic operation.
        op: AtomicOp,
        /// Global id of the item.
        item: [usize; 3],
        /// Word address.
        address: usize,
    },
    /// `instructionExecuted`
    InstructionExecuted {
        /// Global id of the item.
        item: [usize; 3],
    },
    /// `kernelBegin`
    KernelBegin {
        /// Kernel name.
        kernel: String,
    },
    /// `kernelEnd`
    KernelEnd {
        /// Kernel name.
        kernel: String,
    },
    /// `workGroupBarrier`
    WorkGroupBarrier {
        /// Group id.
        group: [usize; 3],
        /// Fence flags.
        flags: u32,
    },
    /// `workGroupComplete`
    WorkGroupComplete {
        /// Group id.
        group: [usize; 3],
    },
    /// `workItemComplete`
    WorkItemComplete {
        /// Global id of the item.
        item: [usize; 3],
        /// Final state (`Finished` or `Faulted`).
        state: WorkItemState,
    },
    /// `log`
    Log {
        /// Severity.
        ty: MessageType,
        /// Message text.
        message: String,
    },
}

/// Records every event it observes, in delivery order.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: RefCell<Vec<Event>>,
}

impl EventRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events in delivery order.
    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    /// Number of events matching `f`.
    pub fn count(&self, f: impl Fn(&Event) -> bool) -> usize {
        self.events.borrow().iter().filter(|e| f(e)).count()
    }

    /// Clear the recorded stream.
    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    fn push(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }
}

impl Plugin for EventRecorder {
    fn host_memory_load(&self, _memory: &Memory, address: usize, size: usize) {
        self.push(Event::HostMemoryLoad { address, size });
    }

    fn host_memory_store(&self, _memory: &Memory, address: usize, size: usize, _data: &[u8]) {
        self.push(Event::HostMemoryStore { address, size });
    }

    fn instruction_executed(
        &self,
        item: &WorkItem,
        _instruction: &Instruction,
        _result: Option<&TypedValue>,
    ) {
        self.push(Event::InstructionExecuted {
            item: item.global_id(),
        });
    }

    fn kernel_begin(&self, invocation: &KernelInvocation) {
        self.push(Event::KernelBegin {
            kernel: invocation.kernel_name.clone(),
        });
    }

    fn kernel_end(&self, invocation: &KernelInvocation) {
        self.push(Event::KernelEnd {
            kernel: invocation.kernel_name.clone(),
        });
    }

    fn log(&self, ty: MessageType, message: &str) {
        self.push(Event::Log {
            ty,
            message: message.to_string(),
        });
    }

    fn memory_allocated(&self, memory: &Memory, address: usize, size: usize) {
        self.push(Event::MemoryAllocated {
            space: memory.space(),
            address,
            size,
        });
    }

    fn memory_atomic_load(
        &self,
        _memory: &Memory,
        item: &WorkItem,
        op: AtomicOp,
        address: usize,
        _size: usize,
    ) {
        self.push(Event::MemoryAtomicLoad {
            op,
            item: item.global_id(),
            address,
        });
    }

    fn memory_atomic_store(
        &self,
        _memory: &Memory,
        item: &WorkItem,
        op: AtomicOp,
        address: usize,
        _size: usize,
    ) {
        self.push(Event::MemoryAtomicStore {
            op,
            item: item.global_id(),
            address,
        });
    }

    fn memory_deallocated(&self, memory: &Memory, address: usize) {
        self.push(Event::MemoryDeallocated {
            space: memory.space(),
            address,
        });
    }

    fn memory_load(&self, memory: &Memory, item: &WorkItem, address: usize, size: usize) {
        self.push(Event::MemoryLoad {
            space: memory.space(),
            item: item.global_id(),
            address,
            size,
        });
    }

    fn memory_store(
        &self,
        memory: &Memory,
        item: &WorkItem,
        address: usize,
        size: usize,
        _data: &[u8],
    ) {
        self.push(Event::MemoryStore {
            space: memory.space(),
            item: item.global_id(),
            address,
            size,
        });
    }

    fn work_group_barrier(&self, group: &WorkGroup, flags: u32) {
        self.push(Event::WorkGroupBarrier {
            group: group.group_id(),
            flags,
        });
    }

    fn work_group_complete(&self, group: &WorkGroup) {
        self.push(Event::WorkGroupComplete {
            group: group.group_id(),
        });
    }

    fn work_item_complete(&self, item: &WorkItem) {
        self.push(Event::WorkItemComplete {
            item: item.global_id(),
            state: item.state(),
        });
    }
}
