//! Plugin bus: pluggable observers of execution events.
//!
//! A [`Plugin`] is notified synchronously — in the calling thread, before
//! the originating operation returns to the interpreter — of every memory
//! operation, instruction retirement, barrier and work-item lifecycle
//! event. For a single plugin the delivered events form a total order
//! consistent with the program order of the originating work-item.
//!
//! Every callback has a no-op default, so a plugin implements only the
//! events it cares about. Callbacks take `&self`; stateful plugins keep
//! their state behind `Cell`/`RefCell`.

pub mod context;

pub use context::{Context, PluginError, PluginHandle};

use crate::device::{KernelInvocation, WorkGroup, WorkItem};
use crate::memory::{Memory, TypedValue};
use crate::program::instruction::{AtomicOp, Instruction};

/// Severity of a [`Plugin::log`] message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Diagnostic detail.
    Debug,
    /// Informational.
    Info,
    /// Suspicious but recoverable.
    Warning,
    /// A fault or launch failure.
    Error,
}

/// An observer of execution events.
pub trait Plugin {
    /// Host-side read of a region (outside any launch).
    fn host_memory_load(&self, _memory: &Memory, _address: usize, _size: usize) {}

    /// Host-side write to a region (outside any launch).
    fn host_memory_store(&self, _memory: &Memory, _address: usize, _size: usize, _data: &[u8]) {}

    /// A work-item retired one instruction.
    fn instruction_executed(
        &self,
        _item: &WorkItem,
        _instruction: &Instruction,
        _result: Option<&TypedValue>,
    ) {
    }

    /// A launch passed validation and is about to run.
    fn kernel_begin(&self, _invocation: &KernelInvocation) {}

    /// A launch finished (or failed after validation).
    fn kernel_end(&self, _invocation: &KernelInvocation) {}

    /// A message published on the bus.
    fn log(&self, _ty: MessageType, _message: &str) {}

    /// A region reserved a fresh allocation.
    fn memory_allocated(&self, _memory: &Memory, _address: usize, _size: usize) {}

    /// The read half of an atomic operation by a work-item.
    fn memory_atomic_load(
        &self,
        _memory: &Memory,
        _item: &WorkItem,
        _op: AtomicOp,
        _address: usize,
        _size: usize,
    ) {
    }

    /// The write half of an atomic operation by a work-item.
    fn memory_atomic_store(
        &self,
        _memory: &Memory,
        _item: &WorkItem,
        _op: AtomicOp,
        _address: usize,
        _size: usize,
    ) {
    }

    /// A region released an allocation.
    fn memory_deallocated(&self, _memory: &Memory, _address: usize) {}

    /// A work-item loaded from a region.
    fn memory_load(&self, _memory: &Memory, _item: &WorkItem, _address: usize, _size: usize) {}

    /// A work-item stored to a region.
    fn memory_store(
        &self,
        _memory: &Memory,
        _item: &WorkItem,
        _address: usize,
        _size: usize,
        _data: &[u8],
    ) {
    }

    /// A work-group-scoped load (group-collective operations).
    fn work_group_memory_load(
        &self,
        _memory: &Memory,
        _group: &WorkGroup,
        _address: usize,
        _size: usize,
    ) {
    }

    /// A work-group-scoped store (group-collective operations).
    fn work_group_memory_store(
        &self,
        _memory: &Memory,
        _group: &WorkGroup,
        _address: usize,
        _size: usize,
        _data: &[u8],
    ) {
    }

    /// All live items of a group arrived at a barrier and were released.
    fn work_group_barrier(&self, _group: &WorkGroup, _flags: u32) {}

    /// A work-group ran all its items to completion.
    fn work_group_complete(&self, _group: &WorkGroup) {}

    /// A work-item reached `Finished` or `Faulted`.
    fn work_item_complete(&self, _item: &WorkItem) {}

    /// Whether this plugin tolerates notifications from multiple threads.
    ///
    /// The dispatcher must serialize all notifications when any attached
    /// plugin returns `false`.
    fn is_thread_safe(&self) -> bool {
        true
    }
}
