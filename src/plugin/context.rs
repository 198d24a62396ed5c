//! The context: plugin registry and synchronous notification fan-out.
//!
//! One [`Context`] exists per device. Plugins are held in registration
//! order; each event is delivered to every plugin, in order, before the
//! originating operation returns. Registration is rejected while a launch
//! is active, and non-log notifications raised from inside a plugin
//! callback are rejected as reentrant (plugins may log back to the bus).

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use thiserror::Error;

use super::{MessageType, Plugin};
use crate::device::{KernelInvocation, WorkGroup, WorkItem};
use crate::memory::{Memory, TypedValue};
use crate::program::instruction::{AtomicOp, Instruction};

/// Identifies a registered plugin for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginHandle(usize);

/// Errors raised by the plugin registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PluginError {
    /// Registration changed or a notification was raised at a forbidden
    /// point.
    #[error("invalid plugin callback: {0}")]
    InvalidPluginCallback(String),
}

/// Plugin registry plus notification dispatch, shared via `Rc`.
pub struct Context {
    plugins: RefCell<Vec<(PluginHandle, Rc<dyn Plugin>)>>,
    next_handle: Cell<usize>,
    launch_active: Cell<bool>,
    notifying: Cell<bool>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Rc<Context> {
        Rc::new(Context {
            plugins: RefCell::new(Vec::new()),
            next_handle: Cell::new(0),
            launch_active: Cell::new(false),
            notifying: Cell::new(false),
        })
    }

    /// Register a plugin; events are delivered in registration order.
    ///
    /// Invalid during a launch or from inside a plugin callback.
    pub fn add_plugin(&self, plugin: Rc<dyn Plugin>) -> Result<PluginHandle, PluginError> {
        self.check_registration("add_plugin")?;
        let handle = PluginHandle(self.next_handle.get());
        self.next_handle.set(handle.0 + 1);
        self.plugins.borrow_mut().push((handle, plugin));
        Ok(handle)
    }

    /// Remove a previously registered plugin.
    ///
    /// Invalid during a launch or from inside a plugin callback.
    pub fn remove_plugin(&self, handle: PluginHandle) -> Result<(), PluginError> {
        self.check_registration("remove_plugin")?;
        let mut plugins = self.plugins.borrow_mut();
        match plugins.iter().position(|(h, _)| *h == handle) {
            Some(idx) => {
                plugins.remove(idx);
                Ok(())
            }
            None => Err(PluginError::InvalidPluginCallback(
                "remove_plugin: unknown handle".into(),
            )),
        }
    }

    /// Number of registered plugins.
    pub fn num_plugins(&self) -> usize {
        self.plugins.borrow().len()
    }

    /// True between `kernel_begin` and `kernel_end`.
    pub fn is_launch_active(&self) -> bool {
        self.launch_active.get()
    }

    pub(crate) fn set_launch_active(&self, active: bool) {
        self.launch_active.set(active);
    }

    fn check_registration(&self, what: &str) -> Result<(), PluginError> {
        if self.notifying.get() {
            let err =
                PluginError::InvalidPluginCallback(format!("{} from inside a callback", what));
            self.log(MessageType::Error, &err.to_string());
            return Err(err);
        }
        if self.launch_active.get() {
            let err =
                PluginError::InvalidPluginCallback(format!("{} during an active launch", what));
            self.log(MessageType::Error, &err.to_string());
            return Err(err);
        }
        Ok(())
    }

    /// Deliver one event to every plugin in registration order.
    ///
    /// Rejects reentrant (non-log) notifications from inside a callback.
    fn dispatch(&self, event: &str, f: impl Fn(&dyn Plugin)) {
        if self.notifying.get() {
            let msg = format!(
                "invalid plugin callback: reentrant {} notification rejected",
                event
            );
            log::error!("{}", msg);
            for (_, p) in self.plugins.borrow().iter() {
                p.log(MessageType::Error, &msg);
            }
            return;
        }

        self.notifying.set(true);
        for (_, p) in self.plugins.borrow().iter() {
            f(p.as_ref());
        }
        self.notifying.set(false);
    }

    /// Publish a message to the host log and to every plugin.
    ///
    /// Unlike other events, logging is permitted from inside a callback.
    pub fn log(&self, ty: MessageType, message: &str) {
        match ty {
            MessageType::Debug => log::debug!("{}", message),
            MessageType::Info => log::info!("{}", message),
            MessageType::Warning => log::warn!("{}", message),
            MessageType::Error => log::error!("{}", message),
        }
        for (_, p) in self.plugins.borrow().iter() {
            p.log(ty, message);
        }
    }

    /// Publish `hostMemoryLoad`.
    pub fn notify_host_memory_load(&self, memory: &Memory, address: usize, size: usize) {
        self.dispatch("hostMemoryLoad", |p| {
            p.host_memory_load(memory, address, size)
        });
    }

    /// Publish `hostMemoryStore`.
    pub fn notify_host_memory_store(
        &self,
        memory: &Memory,
        address: usize,
        size: usize,
        data: &[u8],
    ) {
        self.dispatch("hostMemoryStore", |p| {
            p.host_memory_store(memory, address, size, data)
        });
    }

    /// Publish `memoryAllocated`.
    pub fn notify_memory_allocated(&self, memory: &Memory, address: usize, size: usize) {
        self.dispatch("memoryAllocated", |p| {
            p.memory_allocated(memory, address, size)
        });
    }

    /// Publish `memoryDeallocated`.
    pub fn notify_memory_deallocated(&self, memory: &Memory, address: usize) {
        self.dispatch("memoryDeallocated", |p| p.memory_deallocated(memory, address));
    }

    /// Publish `memoryLoad` attributed to a work-item.
    pub fn notify_memory_load(
        &self,
        memory: &Memory,
        item: &WorkItem,
        address: usize,
        size: usize,
    ) {
        self.dispatch("memoryLoad", |p| p.memory_load(memory, item, address, size));
    }

    /// Publish `memoryStore` attributed to a work-item.
    pub fn notify_memory_store(
        &self,
        memory: &Memory,
        item: &WorkItem,
        address: usize,
        size: usize,
        data: &[u8],
    ) {
        self.dispatch("memoryStore", |p| {
            p.memory_store(memory, item, address, size, data)
        });
    }

    /// Publish `memoryLoad` attributed to a work-group.
    pub fn notify_work_group_memory_load(
        &self,
        memory: &Memory,
        group: &WorkGroup,
        address: usize,
        size: usize,
    ) {
        self.dispatch("memoryLoad", |p| {
            p.work_group_memory_load(memory, group, address, size)
        });
    }

    /// Publish `memoryStore` attributed to a work-group.
    pub fn notify_work_group_memory_store(
        &self,
        memory: &Memory,
        group: &WorkGroup,
        address: usize,
        size: usize,
        data: &[u8],
    ) {
        self.dispatch("memoryStore", |p| {
            p.work_group_memory_store(memory, group, address, size, data)
        });
    }

    /// Publish `memoryAtomicLoad`.
    pub fn notify_memory_atomic_load(
        &self,
        memory: &Memory,
        item: &WorkItem,
        op: AtomicOp,
        address: usize,
        size: usize,
    ) {
        self.dispatch("memoryAtomicLoad", |p| {
            p.memory_atomic_load(memory, item, op, address, size)
        });
    }

    /// Publish `memoryAtomicStore`.
    pub fn notify_memory_atomic_store(
        &self,
        memory: &Memory,
        item: &WorkItem,
        op: AtomicOp,
        address: usize,
        size: usize,
    ) {
        self.dispatch("memoryAtomicStore", |p| {
            p.memory_atomic_store(memory, item, op, address, size)
        });
    }

    /// Publish `instructionExecuted`.
    pub fn notify_instruction_executed(
        &self,
        item: &WorkItem,
        instruction: &Instruction,
        result: Option<&TypedValue>,
    ) {
        self.dispatch("instructionExecuted", |p| {
            p.instruction_executed(item, instruction, result)
        });
    }

    /// Publish `kernelBegin`.
    pub fn notify_kernel_begin(&self, invocation: &KernelInvocation) {
        self.dispatch("kernelBegin", |p| p.kernel_begin(invocation));
    }

    /// Publish `kernelEnd`.
    pub fn notify_kernel_end(&self, invocation: &KernelInvocation) {
        self.dispatch("kernelEnd", |p| p.kernel_end(invocation));
    }

    /// Publish `workGroupBarrier`.
    pub fn notify_work_group_barrier(&self, group: &WorkGroup, flags: u32) {
        self.dispatch("workGroupBarrier", |p| p.work_group_barrier(group, flags));
    }

    /// Publish `workGroupComplete`.
    pub fn notify_work_group_complete(&self, group: &WorkGroup) {
        self.dispatch("workGroupComplete", |p| p.work_group_complete(group));
    }

    /// Publish `workItemComplete`.
    pub fn notify_work_item_complete(&self, item: &WorkItem) {
        self.dispatch("workItemComplete", |p| p.work_item_complete(item));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct CountingPlugin {
        logs: RefCell<Vec<String>>,
    }

    impl Plugin for CountingPlugin {
        fn log(&self, _ty: MessageType, message: &str) {
            self.logs.borrow_mut().push(message.to_string());
        }
    }

    #[test]
    fn test_registration_order_and_removal() {
        let ctx = Context::new();
        let a = ctx.add_plugin(Rc::new(CountingPlugin::default())).unwrap();
        let b = ctx.add_plugin(Rc::new(CountingPlugin::default())).unwrap();
        assert_ne!(a, b);
        assert_eq!(ctx.num_plugins(), 2);

        ctx.remove_plugin(a).unwrap();
        assert_eq!(ctx.num_plugins(), 1);
        assert!(ctx.remove_plugin(a).is_err());
    }

    #[test]
    fn test_registration_rejected_during_launch() {
        let ctx = Context::new();
        ctx.set_launch_active(true);
        let err = ctx
            .add_plugin(Rc::new(CountingPlugin::default()))
            .unwrap_err();
        assert!(matches!(err, PluginError::InvalidPluginCallback(_)));
        ctx.set_launch_active(false);
        assert!(ctx.add_plugin(Rc::new(CountingPlugin::default())).is_ok());
    }

    #[test]
    fn test_log_reaches_all_plugins() {
        let ctx = Context::new();
        let p = Rc::new(CountingPlugin::default());
        ctx.add_plugin(p.clone()).unwrap();
        ctx.log(MessageType::Info, "hello");
        assert_eq!(p.logs.borrow().as_slice(), ["hello".to_string()]);
    }
}
