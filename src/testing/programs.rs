//! Canned kernel programs for tests and demos.
//!
//! Each builder returns a self-contained [`Module`] whose kernels mirror
//! the OpenCL C given in their doc comments.

use crate::program::instruction::{
    AtomicOp, BinaryOp, CastOp, ComparePred, RangeQuery, CLK_LOCAL_MEM_FENCE,
};
use crate::program::types::{AddressSpace, Type};
use crate::program::{ConstantValue, Module, ModuleBuilder, Operand};

/// ```c
/// kernel void copy(global int* in, global int* out) {
///     size_t g = get_global_id(0);
///     out[g] = in[g];
/// }
/// ```
pub fn copy_kernel() -> Module {
    let mut mb = ModuleBuilder::new();
    let mut f = mb.function("copy");
    let input = f.param("in", Type::pointer(AddressSpace::Global));
    let output = f.param("out", Type::pointer(AddressSpace::Global));

    let g = f.work_item_info(RangeQuery::GlobalId, 0);
    let src = f.ptr_add(input, g, 4);
    let v = f.load(AddressSpace::Global, src, Type::int32());
    let dst = f.ptr_add(output, g, 4);
    f.store(AddressSpace::Global, dst, v);
    f.ret();
    f.build();
    mb.build()
}

/// ```c
/// kernel void oob_store(global int* out) {
///     size_t g = get_global_id(0);
///     out[g + 10] = (int)g;
/// }
/// ```
///
/// Faults every item when `out` is smaller than `(global_size + 10) * 4`.
pub fn oob_store_kernel() -> Module {
    let mut mb = ModuleBuilder::new();
    let mut f = mb.function("oob_store");
    let output = f.param("out", Type::pointer(AddressSpace::Global));

    let g = f.work_item_info(RangeQuery::GlobalId, 0);
    let idx = f.binary(BinaryOp::Add, g, Operand::size_t(10));
    let dst = f.ptr_add(output, idx, 4);
    let v = f.cast(CastOp::Trunc, g, 4);
    f.store(AddressSpace::Global, dst, v);
    f.ret();
    f.build();
    mb.build()
}

/// ```c
/// local int scratch[1];
///
/// kernel void barrier_exchange(global int* out) {
///     if (get_local_id(0) == 0)
///         scratch[0] = 42;
///     barrier(CLK_LOCAL_MEM_FENCE);
///     out[get_global_id(0)] = scratch[0];
/// }
/// ```
pub fn barrier_exchange_kernel() -> Module {
    let mut mb = ModuleBuilder::new();
    let scratch = mb.local("scratch", Type::array(Type::int32(), 1));

    let mut f = mb.function("barrier_exchange");
    let output = f.param("out", Type::pointer(AddressSpace::Global));
    let store_block = f.create_block();
    let join = f.create_block();

    let lid = f.work_item_info(RangeQuery::LocalId, 0);
    let is_leader = f.compare(ComparePred::Eq, lid, Operand::size_t(0));
    f.cond_branch(is_leader, store_block, join);

    f.select_block(store_block);
    f.store(AddressSpace::Local, scratch, Operand::int32(42));
    f.branch(join);

    f.select_block(join);
    f.barrier(CLK_LOCAL_MEM_FENCE);
    let v = f.load(AddressSpace::Local, scratch, Type::int32());
    let g = f.work_item_info(RangeQuery::GlobalId, 0);
    let dst = f.ptr_add(output, g, 4);
    f.store(AddressSpace::Global, dst, v);
    f.ret();
    f.build();
    mb.build()
}

/// ```c
/// kernel void diverge(void) {
///     if (get_local_id(0) == 0)
///         barrier(CLK_LOCAL_MEM_FENCE);
/// }
/// ```
///
/// With more than one item per group, item 0 waits at a barrier the
/// others never reach.
pub fn divergent_barrier_kernel() -> Module {
    let mut mb = ModuleBuilder::new();
    let mut f = mb.function("diverge");
    let wait_block = f.create_block();
    let done = f.create_block();

    let lid = f.work_item_info(RangeQuery::LocalId, 0);
    let is_leader = f.compare(ComparePred::Eq, lid, Operand::size_t(0));
    f.cond_branch(is_leader, wait_block, done);

    f.select_block(wait_block);
    f.barrier(CLK_LOCAL_MEM_FENCE);
    f.branch(done);

    f.select_block(done);
    f.ret();
    f.build();
    mb.build()
}

/// ```c
/// kernel void count(global int* counter, global int* out) {
///     int old = atomic_inc(counter);
///     out[get_global_id(0)] = old;
/// }
/// ```
pub fn atomic_counter_kernel() -> Module {
    let mut mb = ModuleBuilder::new();
    let mut f = mb.function("count");
    let counter = f.param("counter", Type::pointer(AddressSpace::Global));
    let output = f.param("out", Type::pointer(AddressSpace::Global));

    let old = f.atomic_rmw(AtomicOp::Inc, AddressSpace::Global, counter, None);
    let g = f.work_item_info(RangeQuery::GlobalId, 0);
    let dst = f.ptr_add(output, g, 4);
    f.store(AddressSpace::Global, dst, old);
    f.ret();
    f.build();
    mb.build()
}

/// ```c
/// constant int table[4] = {7, 8, 9, 10};
///
/// kernel void lookup(global int* out) {
///     size_t g = get_global_id(0);
///     out[g] = table[g];
/// }
/// ```
pub fn constant_table_kernel() -> Module {
    let mut mb = ModuleBuilder::new();
    let table = mb.constant(
        "table",
        Type::array(Type::int32(), 4),
        ConstantValue::Array(vec![
            ConstantValue::Int(7),
            ConstantValue::Int(8),
            ConstantValue::Int(9),
            ConstantValue::Int(10),
        ]),
    );

    let mut f = mb.function("lookup");
    let output = f.param("out", Type::pointer(AddressSpace::Global));

    let g = f.work_item_info(RangeQuery::GlobalId, 0);
    let src = f.ptr_add(table, g, 4);
    let v = f.load(AddressSpace::Constant, src, Type::int32());
    let dst = f.ptr_add(output, g, 4);
    f.store(AddressSpace::Global, dst, v);
    f.ret();
    f.build();
    mb.build()
}

/// ```c
/// __attribute__((reqd_work_group_size(4, 1, 1)))
/// kernel void fixed(global int* out) {
///     out[get_global_id(0)] = 1;
/// }
/// ```
pub fn required_size_kernel() -> Module {
    let mut mb = ModuleBuilder::new();
    mb.reqd_work_group_size("fixed", [4, 1, 1]);

    let mut f = mb.function("fixed");
    let output = f.param("out", Type::pointer(AddressSpace::Global));
    let g = f.work_item_info(RangeQuery::GlobalId, 0);
    let dst = f.ptr_add(output, g, 4);
    f.store(AddressSpace::Global, dst, Operand::int32(1));
    f.ret();
    f.build();
    mb.build()
}

/// ```c
/// kernel void reverse(global int* out, local int* scratch) {
///     size_t lid = get_local_id(0);
///     size_t n = get_local_size(0);
///     scratch[lid] = (int)get_global_id(0);
///     barrier(CLK_LOCAL_MEM_FENCE);
///     out[get_global_id(0)] = scratch[n - 1 - lid];
/// }
/// ```
///
/// Exercises dynamically sized local memory (the `scratch` argument).
pub fn local_reverse_kernel() -> Module {
    let mut mb = ModuleBuilder::new();
    let mut f = mb.function("reverse");
    let output = f.param("out", Type::pointer(AddressSpace::Global));
    let scratch = f.param("scratch", Type::pointer(AddressSpace::Local));

    let lid = f.work_item_info(RangeQuery::LocalId, 0);
    let n = f.work_item_info(RangeQuery::LocalSize, 0);
    let g = f.work_item_info(RangeQuery::GlobalId, 0);
    let gi = f.cast(CastOp::Trunc, g, 4);
    let slot = f.ptr_add(scratch, lid, 4);
    f.store(AddressSpace::Local, slot, gi);

    f.barrier(CLK_LOCAL_MEM_FENCE);

    let n1 = f.binary(BinaryOp::Sub, n, Operand::size_t(1));
    let mirror = f.binary(BinaryOp::Sub, n1, lid);
    let src = f.ptr_add(scratch, mirror, 4);
    let v = f.load(AddressSpace::Local, src, Type::int32());
    let dst = f.ptr_add(output, g, 4);
    f.store(AddressSpace::Global, dst, v);
    f.ret();
    f.build();
    mb.build()
}

/// ```c
/// kernel void fill4(global float4* out, float4 v) {
///     out[get_global_id(0)] = v;
/// }
/// ```
pub fn vector_fill_kernel() -> Module {
    let mut mb = ModuleBuilder::new();
    let mut f = mb.function("fill4");
    let output = f.param("out", Type::pointer(AddressSpace::Global));
    let v = f.param("v", Type::vector(Type::float32(), 4));

    let g = f.work_item_info(RangeQuery::GlobalId, 0);
    let dst = f.ptr_add(output, g, 16);
    f.store(AddressSpace::Global, dst, v);
    f.ret();
    f.build();
    mb.build()
}

/// ```c
/// kernel void capture(global ulong* out) {
///     size_t g = get_global_id(0);
///     out[g - get_global_offset(0)] = g;
/// }
/// ```
///
/// Writes each item's global id into a dense output buffer, regardless of
/// the launch offset.
pub fn id_capture_kernel() -> Module {
    let mut mb = ModuleBuilder::new();
    let mut f = mb.function("capture");
    let output = f.param("out", Type::pointer(AddressSpace::Global));

    let g = f.work_item_info(RangeQuery::GlobalId, 0);
    let off = f.work_item_info(RangeQuery::GlobalOffset, 0);
    let idx = f.binary(BinaryOp::Sub, g, off);
    let dst = f.ptr_add(output, idx, 8);
    f.store(AddressSpace::Global, dst, g);
    f.ret();
    f.build();
    mb.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_programs_are_well_formed() {
        for (module, name) in [
            (copy_kernel(), "copy"),
            (oob_store_kernel(), "oob_store"),
            (barrier_exchange_kernel(), "barrier_exchange"),
            (divergent_barrier_kernel(), "diverge"),
            (atomic_counter_kernel(), "count"),
            (constant_table_kernel(), "lookup"),
            (required_size_kernel(), "fixed"),
            (local_reverse_kernel(), "reverse"),
            (vector_fill_kernel(), "fill4"),
            (id_capture_kernel(), "capture"),
        ] {
            let (_, f) = module.function(name).unwrap();
            for block in &f.blocks {
                let last = block.instructions.last().unwrap();
                assert!(
                    last.kind.is_terminator(),
                    "{}: block does not end in a terminator",
                    name
                );
            }
        }
    }
}
