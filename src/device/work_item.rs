//! Work-item execution: one point of the N-D range, stepped
//! instruction-at-a-time.
//!
//! A work-item owns its private memory region, a register file keyed by
//! SSA value identity, and a program counter into the kernel function's
//! CFG. `step` retires the next instruction, publishes
//! `instructionExecuted`, advances the PC and returns the new state.
//! Barriers suspend the item without retiring past them; the scheduler
//! releases it once the whole group has arrived.

use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;

use super::dispatch::KernelInvocation;
use crate::kernel::{BindingKey, TypedValueMap};
use crate::memory::{Memory, MemoryError, TypedValue};
use crate::plugin::{Context, MessageType};
use crate::program::instruction::{
    AtomicOp, BinaryOp, BlockId, CastOp, ComparePred, InstKind, Instruction, Operand, RangeQuery,
    ValueId,
};
use crate::program::types::AddressSpace;
use crate::program::{FunctionId, Module};

/// Private-region capacity per work-item.
pub const PRIVATE_MEMORY_CAPACITY: usize = 64 * 1024;

/// Execution state of a work-item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkItemState {
    /// Runnable.
    Ready,
    /// Suspended at a barrier, waiting for the rest of the group.
    AtBarrier,
    /// Returned from the kernel.
    Finished,
    /// Stopped by a fault; does not cancel siblings.
    Faulted,
}

/// What the executed instruction asks the stepper to do next.
enum StepAction {
    /// Advance to the next instruction.
    Continue,
    /// Jump to the start of another block.
    Jump(BlockId),
    /// Suspend at a barrier with the given fence flags.
    Suspend(u32),
    /// The kernel returned.
    Finish,
}

/// A fault attributed to this work-item.
#[derive(Debug, Error)]
enum Fault {
    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("invalid program: {0}")]
    Invalid(String),
}

/// A single point of execution of the kernel function.
pub struct WorkItem {
    context: Rc<Context>,
    module: Rc<Module>,
    function: FunctionId,
    invocation: Rc<KernelInvocation>,
    bindings: Rc<TypedValueMap>,
    registers: HashMap<ValueId, TypedValue>,
    private_memory: Memory,

    global_id: [usize; 3],
    local_id: [usize; 3],
    group_id: [usize; 3],

    state: WorkItemState,
    block: usize,
    inst: usize,
    prev_block: usize,
    barrier_flags: u32,
}

impl WorkItem {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        context: Rc<Context>,
        module: Rc<Module>,
        function: FunctionId,
        invocation: Rc<KernelInvocation>,
        bindings: Rc<TypedValueMap>,
        group_id: [usize; 3],
        local_id: [usize; 3],
    ) -> WorkItem {
        let mut global_id = [0; 3];
        for d in 0..3 {
            global_id[d] = group_id[d] * invocation.local_size[d]
                + local_id[d]
                + invocation.global_offset[d];
        }

        let mut registers = HashMap::new();
        let num_params = module.functions[function.0].num_params();
        for i in 0..num_params {
            if let Some(v) = bindings.get(&BindingKey::Param(i)) {
                registers.insert(ValueId(i as u32), v.clone());
            }
        }

        let private_memory = Memory::new(
            AddressSpace::Private,
            PRIVATE_MEMORY_CAPACITY,
            Rc::clone(&context),
        );

        WorkItem {
            context,
            module,
            function,
            invocation,
            bindings,
            registers,
            private_memory,
            global_id,
            local_id,
            group_id,
            state: WorkItemState::Ready,
            block: 0,
            inst: 0,
            prev_block: 0,
            barrier_flags: 0,
        }
    }

    /// Global id triple of this work-item.
    pub fn global_id(&self) -> [usize; 3] {
        self.global_id
    }

    /// Local id triple within its work-group.
    pub fn local_id(&self) -> [usize; 3] {
        self.local_id
    }

    /// Id triple of the containing work-group.
    pub fn group_id(&self) -> [usize; 3] {
        self.group_id
    }

    /// Current execution state.
    pub fn state(&self) -> WorkItemState {
        self.state
    }

    /// Fence flags of the barrier this item is suspended at.
    pub(crate) fn barrier_flags(&self) -> u32 {
        self.barrier_flags
    }

    /// Release the item from its barrier, stepping past it.
    pub(crate) fn release_barrier(&mut self) {
        debug_assert_eq!(self.state, WorkItemState::AtBarrier);
        self.state = WorkItemState::Ready;
        self.inst += 1;
    }

    /// Fault this item from outside (group-scoped faults).
    pub(crate) fn force_fault(&mut self) {
        self.state = WorkItemState::Faulted;
        self.context.notify_work_item_complete(&*self);
    }

    /// Retire the next instruction and return the new state.
    pub fn step(&mut self, local: &mut Memory, global: &mut Memory) -> WorkItemState {
        if self.state != WorkItemState::Ready {
            return self.state;
        }

        let instruction = {
            let function = &self.module.functions[self.function.0];
            let block = match function.blocks.get(self.block) {
                Some(b) => b,
                None => {
                    self.fault(&Fault::Invalid(format!("no block {}", self.block)));
                    return self.state;
                }
            };
            match block.instructions.get(self.inst) {
                Some(i) => i.clone(),
                None => {
                    self.fault(&Fault::Invalid(format!(
                        "block {} has no terminator",
                        self.block
                    )));
                    return self.state;
                }
            }
        };

        match self.execute(&instruction, local, global) {
            Ok((StepAction::Continue, result)) => {
                self.context
                    .notify_instruction_executed(&*self, &instruction, result.as_ref());
                self.inst += 1;
            }
            Ok((StepAction::Jump(target), result)) => {
                self.context
                    .notify_instruction_executed(&*self, &instruction, result.as_ref());
                self.prev_block = self.block;
                self.block = target.0 as usize;
                self.inst = 0;
            }
            Ok((StepAction::Suspend(flags), _)) => {
                self.context
                    .notify_instruction_executed(&*self, &instruction, None);
                self.barrier_flags = flags;
                self.state = WorkItemState::AtBarrier;
            }
            Ok((StepAction::Finish, _)) => {
                self.context
                    .notify_instruction_executed(&*self, &instruction, None);
                self.state = WorkItemState::Finished;
                self.context.notify_work_item_complete(&*self);
            }
            Err(fault) => self.fault(&fault),
        }

        self.state
    }

    fn fault(&mut self, fault: &Fault) {
        self.context.log(
            MessageType::Error,
            &format!(
                "work-item ({},{},{}) faulted: {}",
                self.global_id[0], self.global_id[1], self.global_id[2], fault
            ),
        );
        self.state = WorkItemState::Faulted;
        self.context.notify_work_item_complete(&*self);
    }

    fn eval(&self, operand: &Operand) -> Result<TypedValue, Fault> {
        match operand {
            Operand::Value(id) => self
                .registers
                .get(id)
                .cloned()
                .ok_or_else(|| Fault::Invalid(format!("use of undefined value %{}", id.0))),
            Operand::Global(id) => self
                .bindings
                .get(&BindingKey::Global(*id))
                .cloned()
                .ok_or_else(|| Fault::Invalid(format!("unbound module variable @{}", id.0))),
            Operand::ConstInt { value, bytes } => {
                let mut v = TypedValue::zeroed(*bytes, 1);
                v.set_uint(0, *value as u64);
                Ok(v)
            }
            Operand::ConstFloat { value, bytes } => {
                let mut v = TypedValue::zeroed(*bytes, 1);
                v.set_float(0, *value);
                Ok(v)
            }
        }
    }

    fn execute(
        &mut self,
        instruction: &Instruction,
        local: &mut Memory,
        global: &mut Memory,
    ) -> Result<(StepAction, Option<TypedValue>), Fault> {
        let result = match &instruction.kind {
            InstKind::WorkItemInfo { query, dim } => {
                let dim = self.eval(dim)?.uint(0) as usize;
                Some(TypedValue::from_size_t(self.range_query(*query, dim)))
            }

            InstKind::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                Some(binary_op(*op, &lhs, &rhs))
            }

            InstKind::Compare { pred, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                Some(compare_op(*pred, &lhs, &rhs))
            }

            InstKind::Cast { op, value, bytes } => {
                let value = self.eval(value)?;
                Some(cast_op(*op, &value, *bytes))
            }

            InstKind::Alloca { ty } => {
                let address = self.private_memory.allocate(ty.size())?;
                Some(TypedValue::from_size_t(address))
            }

            InstKind::Load { space, ptr, ty } => {
                let address = self.eval(ptr)?.as_size_t();
                let size = ty.size();
                let value = {
                    let mem = region_mut(&mut self.private_memory, local, global, *space);
                    let bytes = mem.load(address, size)?;
                    TypedValue::from_bytes(ty.elem_size(), ty.elem_count(), bytes.to_vec())
                };
                let mem = region_ref(&self.private_memory, local, global, *space);
                self.context.notify_memory_load(mem, self, address, size);
                Some(value)
            }

            InstKind::Store { space, ptr, value } => {
                let address = self.eval(ptr)?.as_size_t();
                let value = self.eval(value)?;
                {
                    let mem = region_mut(&mut self.private_memory, local, global, *space);
                    mem.store(address, value.bytes())?;
                }
                let mem = region_ref(&self.private_memory, local, global, *space);
                self.context
                    .notify_memory_store(mem, self, address, value.size(), value.bytes());
                None
            }

            InstKind::PtrAdd {
                base,
                index,
                elem_size,
            } => {
                let base = self.eval(base)?.uint(0) as i64;
                let index = self.eval(index)?.sint(0);
                let address = base.wrapping_add(index.wrapping_mul(*elem_size as i64));
                Some(TypedValue::from_size_t(address as usize))
            }

            InstKind::AtomicRmw {
                op,
                space,
                ptr,
                operand,
            } => {
                if *op == AtomicOp::CmpXchg {
                    return Err(Fault::Invalid(
                        "cmpxchg must use the compare-exchange form".into(),
                    ));
                }
                let address = self.eval(ptr)?.as_size_t();
                let operand = match operand {
                    Some(o) => self.eval(o)?.uint(0) as u32,
                    None => 0,
                };
                let old = {
                    let mem = region_mut(&mut self.private_memory, local, global, *space);
                    mem.atomic_rmw(*op, address, operand)?
                };
                let mem = region_ref(&self.private_memory, local, global, *space);
                if *op != AtomicOp::Store {
                    self.context
                        .notify_memory_atomic_load(mem, self, *op, address, 4);
                }
                if *op != AtomicOp::Load {
                    self.context
                        .notify_memory_atomic_store(mem, self, *op, address, 4);
                }
                Some(TypedValue::from_u32(old))
            }

            InstKind::AtomicCmpXchg {
                space,
                ptr,
                cmp,
                new,
            } => {
                let address = self.eval(ptr)?.as_size_t();
                let cmp = self.eval(cmp)?.uint(0) as u32;
                let new = self.eval(new)?.uint(0) as u32;
                let old = {
                    let mem = region_mut(&mut self.private_memory, local, global, *space);
                    mem.atomic_cmpxchg(address, cmp, new)?
                };
                let mem = region_ref(&self.private_memory, local, global, *space);
                self.context
                    .notify_memory_atomic_load(mem, self, AtomicOp::CmpXchg, address, 4);
                if old == cmp {
                    self.context
                        .notify_memory_atomic_store(mem, self, AtomicOp::CmpXchg, address, 4);
                }
                Some(TypedValue::from_u32(old))
            }

            InstKind::Barrier { flags } => {
                return Ok((StepAction::Suspend(*flags), None));
            }

            InstKind::Select {
                cond,
                if_true,
                if_false,
            } => {
                let cond = self.eval(cond)?.uint(0);
                let value = if cond != 0 {
                    self.eval(if_true)?
                } else {
                    self.eval(if_false)?
                };
                Some(value)
            }

            InstKind::Phi { incoming } => {
                let prev = BlockId(self.prev_block as u32);
                let operand = incoming
                    .iter()
                    .find(|(b, _)| *b == prev)
                    .map(|(_, o)| o)
                    .ok_or_else(|| {
                        Fault::Invalid(format!("phi has no incoming edge from block {}", prev.0))
                    })?;
                Some(self.eval(operand)?)
            }

            InstKind::Branch { target } => {
                return Ok((StepAction::Jump(*target), None));
            }

            InstKind::CondBranch {
                cond,
                if_true,
                if_false,
            } => {
                let cond = self.eval(cond)?.uint(0);
                let target = if cond != 0 { *if_true } else { *if_false };
                return Ok((StepAction::Jump(target), None));
            }

            InstKind::Return => {
                return Ok((StepAction::Finish, None));
            }
        };

        if let (Some(id), Some(value)) = (instruction.result, result.as_ref()) {
            self.registers.insert(id, value.clone());
        }
        Ok((StepAction::Continue, result))
    }

    fn range_query(&self, query: RangeQuery, dim: usize) -> usize {
        if dim > 2 {
            return match query {
                RangeQuery::GlobalSize | RangeQuery::LocalSize | RangeQuery::NumGroups => 1,
                RangeQuery::WorkDim => self.invocation.work_dim as usize,
                _ => 0,
            };
        }
        match query {
            RangeQuery::GlobalId => self.global_id[dim],
            RangeQuery::LocalId => self.local_id[dim],
            RangeQuery::GroupId => self.group_id[dim],
            RangeQuery::GlobalSize => self.invocation.global_size[dim],
            RangeQuery::LocalSize => self.invocation.local_size[dim],
            RangeQuery::NumGroups => self.invocation.num_groups[dim],
            RangeQuery::GlobalOffset => self.invocation.global_offset[dim],
            RangeQuery::WorkDim => self.invocation.work_dim as usize,
        }
    }
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("global_id", &self.global_id)
            .field("local_id", &self.local_id)
            .field("group_id", &self.group_id)
            .field("state", &self.state)
            .finish()
    }
}

fn region_mut<'a>(
    private: &'a mut Memory,
    local: &'a mut Memory,
    global: &'a mut Memory,
    space: AddressSpace,
) -> &'a mut Memory {
    match space {
        AddressSpace::Private => private,
        AddressSpace::Local => local,
        AddressSpace::Global | AddressSpace::Constant => global,
    }
}

fn region_ref<'a>(
    private: &'a Memory,
    local: &'a Memory,
    global: &'a Memory,
    space: AddressSpace,
) -> &'a Memory {
    match space {
        AddressSpace::Private => private,
        AddressSpace::Local => local,
        AddressSpace::Global | AddressSpace::Constant => global,
    }
}

fn binary_op(op: BinaryOp, lhs: &TypedValue, rhs: &TypedValue) -> TypedValue {
    let mut out = TypedValue::zeroed(lhs.elem_size(), lhs.count());
    for lane in 0..lhs.count() {
        if op.is_float() {
            let a = lhs.float(lane);
            let b = rhs.float(lane);
            let r = match op {
                BinaryOp::FAdd => a + b,
                BinaryOp::FSub => a - b,
                BinaryOp::FMul => a * b,
                BinaryOp::FDiv => a / b,
                _ => unreachable!(),
            };
            out.set_float(lane, r);
        } else {
            let a = lhs.uint(lane);
            let b = rhs.uint(lane);
            let bits = (lhs.elem_size() * 8) as u32;
            let r = match op {
                BinaryOp::Add => a.wrapping_add(b),
                BinaryOp::Sub => a.wrapping_sub(b),
                BinaryOp::Mul => a.wrapping_mul(b),
                BinaryOp::UDiv => {
                    if b == 0 {
                        u64::MAX
                    } else {
                        a / b
                    }
                }
                BinaryOp::SDiv => {
                    let (sa, sb) = (lhs.sint(lane), rhs.sint(lane));
                    if sb == 0 {
                        u64::MAX
                    } else {
                        sa.wrapping_div(sb) as u64
                    }
                }
                BinaryOp::URem => {
                    if b == 0 {
                        0
                    } else {
                        a % b
                    }
                }
                BinaryOp::And => a & b,
                BinaryOp::Or => a | b,
                BinaryOp::Xor => a ^ b,
                BinaryOp::Shl => a << (b % bits as u64) as u32,
                BinaryOp::LShr => {
                    // Logical shift works on the lane width, not u64.
                    let masked = if bits == 64 { a } else { a & ((1u64 << bits) - 1) };
                    masked >> (b % bits as u64) as u32
                }
                BinaryOp::AShr => (lhs.sint(lane) >> (b % bits as u64) as u32) as u64,
                _ => unreachable!(),
            };
            out.set_uint(lane, r);
        }
    }
    out
}

fn compare_op(pred: ComparePred, lhs: &TypedValue, rhs: &TypedValue) -> TypedValue {
    let mut out = TypedValue::zeroed(1, lhs.count());
    for lane in 0..lhs.count() {
        let (ua, ub) = (lhs.uint(lane), rhs.uint(lane));
        let (sa, sb) = (lhs.sint(lane), rhs.sint(lane));
        let r = match pred {
            ComparePred::Eq => ua == ub,
            ComparePred::Ne => ua != ub,
            ComparePred::ULt => ua < ub,
            ComparePred::ULe => ua <= ub,
            ComparePred::UGt => ua > ub,
            ComparePred::UGe => ua >= ub,
            ComparePred::SLt => sa < sb,
            ComparePred::SGt => sa > sb,
        };
        out.set_uint(lane, r as u64);
    }
    out
}

fn cast_op(op: CastOp, value: &TypedValue, bytes: usize) -> TypedValue {
    match op {
        CastOp::Bitcast => {
            let total = value.size();
            TypedValue::from_bytes(bytes, total / bytes, value.bytes().to_vec())
        }
        _ => {
            let mut out = TypedValue::zeroed(bytes, value.count());
            for lane in 0..value.count() {
                let v = match op {
                    CastOp::Trunc | CastOp::ZExt => value.uint(lane),
                    CastOp::SExt => value.sint(lane) as u64,
                    CastOp::Bitcast => unreachable!(),
                };
                out.set_uint(lane, v);
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int32x2(a: u32, b: u32) -> TypedValue {
        let mut v = TypedValue::zeroed(4, 2);
        v.set_uint(0, a as u64);
        v.set_uint(1, b as u64);
        v
    }

    #[test]
    fn test_binary_int_lanes() {
        let lhs = int32x2(10, 0xFFFF_FFFF);
        let rhs = int32x2(3, 2);

        let sum = binary_op(BinaryOp::Add, &lhs, &rhs);
        assert_eq!(sum.uint(0), 13);
        // Wrapping at the lane width.
        assert_eq!(sum.uint(1), 1);

        let quot = binary_op(BinaryOp::UDiv, &lhs, &rhs);
        assert_eq!(quot.uint(0), 3);

        let shifted = binary_op(BinaryOp::LShr, &lhs, &rhs);
        assert_eq!(shifted.uint(1), 0x3FFF_FFFF);
    }

    #[test]
    fn test_binary_signed_division() {
        let mut lhs = TypedValue::zeroed(4, 1);
        lhs.set_uint(0, (-12i32) as u32 as u64);
        let mut rhs = TypedValue::zeroed(4, 1);
        rhs.set_uint(0, 4);

        let quot = binary_op(BinaryOp::SDiv, &lhs, &rhs);
        assert_eq!(quot.sint(0), -3);
    }

    #[test]
    fn test_binary_float_lanes() {
        let mut lhs = TypedValue::zeroed(4, 2);
        lhs.set_float(0, 1.5);
        lhs.set_float(1, -2.0);
        let mut rhs = TypedValue::zeroed(4, 2);
        rhs.set_float(0, 2.0);
        rhs.set_float(1, 0.5);

        let prod = binary_op(BinaryOp::FMul, &lhs, &rhs);
        assert_eq!(prod.float(0), 3.0);
        assert_eq!(prod.float(1), -1.0);
    }

    #[test]
    fn test_compare_lanes() {
        let lhs = int32x2(1, 0xFFFF_FFFF);
        let rhs = int32x2(1, 0);

        let eq = compare_op(ComparePred::Eq, &lhs, &rhs);
        assert_eq!(eq.uint(0), 1);
        assert_eq!(eq.uint(1), 0);

        // 0xFFFFFFFF is -1 signed but large unsigned.
        let slt = compare_op(ComparePred::SLt, &lhs, &rhs);
        assert_eq!(slt.uint(1), 1);
        let ult = compare_op(ComparePred::ULt, &lhs, &rhs);
        assert_eq!(ult.uint(1), 0);
    }

    #[test]
    fn test_cast_widths() {
        let mut v = TypedValue::zeroed(8, 1);
        v.set_uint(0, 0x1_0000_00FF);

        let t = cast_op(CastOp::Trunc, &v, 4);
        assert_eq!(t.elem_size(), 4);
        assert_eq!(t.uint(0), 0xFF);

        let mut small = TypedValue::zeroed(1, 1);
        small.set_uint(0, 0x80);
        let sext = cast_op(CastOp::SExt, &small, 4);
        assert_eq!(sext.sint(0), -128);
        let zext = cast_op(CastOp::ZExt, &small, 4);
        assert_eq!(zext.uint(0), 0x80);
    }

    #[test]
    fn test_bitcast_preserves_bytes() {
        let v = TypedValue::from_bytes(4, 4, (0u8..16).collect());
        let cast = cast_op(CastOp::Bitcast, &v, 8);
        assert_eq!(cast.elem_size(), 8);
        assert_eq!(cast.count(), 2);
        assert_eq!(cast.bytes(), v.bytes());
    }
}
