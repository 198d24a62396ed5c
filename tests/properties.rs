//! Property-based tests for the memory region, kernel binding rules and
//! range decomposition.

use std::rc::Rc;

use proptest::prelude::*;

use ocl_emu::device::Device;
use ocl_emu::kernel::Kernel;
use ocl_emu::memory::{Memory, TypedValue};
use ocl_emu::plugin::Context;
use ocl_emu::program::types::{AddressSpace, Type};
use ocl_emu::program::{ConstantValue, ModuleBuilder};
use ocl_emu::testing::{programs, Event, EventRecorder};

fn global_region() -> Memory {
    Memory::new(AddressSpace::Global, 16 << 20, Context::new())
}

/// Build a module whose single kernel takes one dynamic local pointer.
fn local_arg_module() -> ModuleBuilder {
    let mut mb = ModuleBuilder::new();
    let mut f = mb.function("k");
    f.param("scratch", Type::pointer(AddressSpace::Local));
    f.ret();
    f.build();
    mb
}

proptest! {
    /// Stored bytes always read back identically from a live allocation.
    #[test]
    fn memory_round_trip(data in proptest::collection::vec(any::<u8>(), 1..256)) {
        let mut mem = global_region();
        let address = mem.allocate(data.len()).unwrap();
        mem.store(address, &data).unwrap();
        prop_assert_eq!(mem.load(address, data.len()).unwrap(), data.as_slice());
    }

    /// Live allocations never overlap.
    #[test]
    fn allocations_are_disjoint(sizes in proptest::collection::vec(1usize..512, 2..16)) {
        let mut mem = global_region();
        let mut ranges = Vec::new();
        for size in &sizes {
            let base = mem.allocate(*size).unwrap();
            ranges.push((base, base + size));
        }
        for (i, a) in ranges.iter().enumerate() {
            for b in ranges.iter().skip(i + 1) {
                prop_assert!(a.1 <= b.0 || b.1 <= a.0);
            }
        }
    }

    /// Every dynamic local binding grows the cursor by exactly the
    /// requested size.
    #[test]
    fn local_cursor_is_monotonic(requests in proptest::collection::vec(1usize..1024, 1..8)) {
        let module = Rc::new(local_arg_module().build());
        let mut kernel = Kernel::new(module, "k").unwrap();
        let mut expected = 0;
        for request in requests {
            let before = kernel.local_memory_size();
            kernel.set_argument(0, TypedValue::zeroed(1, request)).unwrap();
            expected += request;
            prop_assert_eq!(kernel.local_memory_size(), before + request);
        }
        prop_assert_eq!(kernel.local_memory_size(), expected);
    }

    /// Two stagings of the same constants produce byte-identical region
    /// contents at the bound addresses.
    #[test]
    fn constant_staging_is_deterministic(values in proptest::collection::vec(any::<i32>(), 1..8)) {
        let mut mb = ModuleBuilder::new();
        mb.constant(
            "t",
            Type::array(Type::int32(), values.len()),
            ConstantValue::Array(values.iter().map(|v| ConstantValue::Int(*v as i64)).collect()),
        );
        let mut f = mb.function("k");
        f.ret();
        f.build();
        let module = Rc::new(mb.build());

        let mut contents = Vec::new();
        for _ in 0..2 {
            let mut kernel = Kernel::new(Rc::clone(&module), "k").unwrap();
            let mut mem = global_region();
            kernel.allocate_constants(&mut mem).unwrap();
            let (_, value) = kernel
                .bindings()
                .next()
                .expect("constant binding present");
            let bytes = mem
                .load(value.as_size_t(), values.len() * 4)
                .unwrap()
                .to_vec();
            contents.push(bytes);
        }
        prop_assert_eq!(&contents[0], &contents[1]);

        let mut expected = Vec::new();
        for v in &values {
            expected.extend_from_slice(&v.to_le_bytes());
        }
        prop_assert_eq!(&contents[0], &expected);
    }

    /// A valid (global, local) decomposition creates global/local groups
    /// and enumerates each global id exactly once.
    #[test]
    fn decomposition_enumerates_ids(
        local in 1usize..5,
        groups in 1usize..5,
        offset in 0usize..16,
    ) {
        let global = local * groups;
        let mut device = Device::new();
        let recorder = Rc::new(EventRecorder::new());
        device.add_plugin(recorder.clone()).unwrap();

        let mut kernel =
            Kernel::new(Rc::new(programs::id_capture_kernel()), "capture").unwrap();
        let output = device.create_buffer(global * 8).unwrap();
        kernel.set_argument(0, TypedValue::from_size_t(output)).unwrap();
        device
            .run(&mut kernel, 1, [offset, 0, 0], [global, 1, 1], [local, 1, 1])
            .unwrap();

        let ids: Vec<u64> = device
            .read_buffer(output, global * 8)
            .unwrap()
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        let expected: Vec<u64> = (0..global as u64).map(|i| i + offset as u64).collect();
        prop_assert_eq!(ids, expected);

        prop_assert_eq!(
            recorder.count(|e| matches!(e, Event::WorkGroupComplete { .. })),
            groups
        );
        prop_assert_eq!(
            recorder.count(|e| matches!(e, Event::WorkItemComplete { .. })),
            global
        );
    }

    /// Binding a flat value to a vector parameter recovers the lane
    /// layout.
    #[test]
    fn vector_binding_recovers_lanes(lanes in prop_oneof![Just(2usize), Just(4), Just(8), Just(16)]) {
        let mut mb = ModuleBuilder::new();
        let mut f = mb.function("k");
        f.param("v", Type::vector(Type::float32(), lanes));
        f.ret();
        f.build();
        let mut kernel = Kernel::new(Rc::new(mb.build()), "k").unwrap();

        kernel
            .set_argument(0, TypedValue::from_bytes(4 * lanes, 1, vec![0; 4 * lanes]))
            .unwrap();
        let bound = kernel.argument_value(0).unwrap();
        prop_assert_eq!(bound.elem_size(), 4);
        prop_assert_eq!(bound.count(), lanes);
    }
}
