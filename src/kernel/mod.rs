//! Kernel objects: an immutable program function plus mutable argument
//! bindings and per-launch constant staging.
//!
//! Construction scans the module once: it captures the kernel's name and
//! any `reqd_work_group_size` metadata, reserves local-memory offsets for
//! module-scope local variables (the cursor becomes the kernel's static
//! local-memory size), and enumerates the constant variables to be
//! allocated per launch.
//!
//! A `Kernel` is not safe to launch from two dispatchers at once: its
//! argument map and local-memory cursor are mutated by `set_argument`,
//! and the dispatcher snapshots the bindings per work-group at launch.

use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;

use crate::memory::{Memory, MemoryError, TypedValue};
use crate::plugin::MessageType;
use crate::program::instruction::GlobalId;
use crate::program::types::{AddressSpace, Type, PTR_SIZE};
use crate::program::{ConstantValue, Function, FunctionId, Module};

/// Stable identity of a bound value: a formal parameter by position, or a
/// module-scope variable by handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKey {
    /// Formal parameter `index`.
    Param(usize),
    /// Module-scope variable.
    Global(GlobalId),
}

/// Map from binding identity to its current value.
pub type TypedValueMap = HashMap<BindingKey, TypedValue>;

/// Errors raised by kernel construction and argument binding.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum KernelError {
    /// The module has no kernel function with the requested name.
    #[error("no kernel named '{0}' in module")]
    UnknownKernel(String),

    /// Argument index out of range or value of the wrong size; the prior
    /// binding, if any, is left in place.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A region operation failed (constant allocation).
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// A kernel: program function, metadata-derived constraints and argument
/// bindings.
#[derive(Debug, Clone)]
pub struct Kernel {
    module: Rc<Module>,
    function: FunctionId,
    name: String,
    reqd_work_group_size: [usize; 3],
    local_memory_size: usize,
    global_size: [usize; 3],
    constants: Vec<GlobalId>,
    constant_buffers: Vec<usize>,
    bindings: TypedValueMap,
}

impl Kernel {
    /// Build a kernel for the named function of `module`.
    pub fn new(module: Rc<Module>, name: &str) -> Result<Kernel, KernelError> {
        let (function, _) = module
            .function(name)
            .ok_or_else(|| KernelError::UnknownKernel(name.to_string()))?;

        let reqd_work_group_size = module
            .kernel_metadata(name)
            .map(|md| md.reqd_work_group_size)
            .unwrap_or([0, 0, 0]);

        let mut local_memory_size = 0;
        let mut constants = Vec::new();
        let mut bindings = TypedValueMap::new();

        for (i, var) in module.globals.iter().enumerate() {
            let id = GlobalId(i as u32);
            match var.space {
                AddressSpace::Local => {
                    bindings.insert(
                        BindingKey::Global(id),
                        TypedValue::from_size_t(local_memory_size),
                    );
                    local_memory_size += var.ty.size();
                }
                AddressSpace::Constant => constants.push(id),
                _ => {}
            }
        }

        Ok(Kernel {
            module,
            function,
            name: name.to_string(),
            reqd_work_group_size,
            local_memory_size,
            global_size: [0, 0, 0],
            constants,
            constant_buffers: Vec::new(),
            bindings,
        })
    }

    /// Kernel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `reqd_work_group_size` triple; zero means unconstrained.
    pub fn required_work_group_size(&self) -> [usize; 3] {
        self.reqd_work_group_size
    }

    /// Number of formal parameters.
    pub fn num_arguments(&self) -> usize {
        self.function_ref().num_params()
    }

    /// Size in bytes expected for argument `index`: the pointer width for
    /// pointer parameters, the value width otherwise.
    pub fn argument_size(&self, index: usize) -> Option<usize> {
        self.function_ref()
            .params
            .get(index)
            .map(|p| if p.ty.is_pointer() { PTR_SIZE } else { p.ty.size() })
    }

    /// `CL_KERNEL_ARG_ADDRESS_*` qualifier of argument `index`, passed
    /// through verbatim; non-pointer parameters classify as private.
    pub fn argument_address_space(&self, index: usize) -> Option<u32> {
        self.function_ref().params.get(index).map(|p| {
            p.ty.pointer_space()
                .unwrap_or(AddressSpace::Private)
                .cl_qualifier()
        })
    }

    /// Static plus dynamic local memory required by this kernel, in
    /// bytes.
    pub fn local_memory_size(&self) -> usize {
        self.local_memory_size
    }

    /// Global size of the most recent launch.
    pub fn global_size(&self) -> [usize; 3] {
        self.global_size
    }

    /// Record the global size of the current launch.
    pub fn set_global_size(&mut self, global_size: [usize; 3]) {
        self.global_size = global_size;
    }

    /// The bound value of argument `index`, if set.
    pub fn argument_value(&self, index: usize) -> Option<&TypedValue> {
        self.bindings.get(&BindingKey::Param(index))
    }

    /// Iterate over all bindings (arguments, local reservations, constant
    /// pointers).
    pub fn bindings(&self) -> impl Iterator<Item = (&BindingKey, &TypedValue)> {
        self.bindings.iter()
    }

    /// True when every formal parameter has a binding.
    pub fn arguments_set(&self) -> bool {
        (0..self.num_arguments()).all(|i| self.bindings.contains_key(&BindingKey::Param(i)))
    }

    pub(crate) fn module(&self) -> &Rc<Module> {
        &self.module
    }

    pub(crate) fn function_id(&self) -> FunctionId {
        self.function
    }

    pub(crate) fn snapshot_bindings(&self) -> TypedValueMap {
        self.bindings.clone()
    }

    fn function_ref(&self) -> &Function {
        &self.module.functions[self.function.0]
    }

    /// Bind formal parameter `index`.
    ///
    /// For local pointer parameters the value's size is the requested
    /// dynamic local byte count: a fresh local offset is reserved and the
    /// kernel's local-memory size grows by the request. For vector
    /// parameters the value is re-laid-out to the parameter's lane count.
    pub fn set_argument(&mut self, index: usize, value: TypedValue) -> Result<(), KernelError> {
        let param = self
            .function_ref()
            .params
            .get(index)
            .ok_or_else(|| {
                KernelError::InvalidArgument(format!(
                    "index {} out of range for kernel '{}' with {} arguments",
                    index,
                    self.name,
                    self.num_arguments()
                ))
            })?
            .clone();

        if param.ty.pointer_space() == Some(AddressSpace::Local) {
            let offset = self.local_memory_size;
            self.local_memory_size += value.size();
            self.bindings
                .insert(BindingKey::Param(index), TypedValue::from_size_t(offset));
            return Ok(());
        }

        let expected = if param.ty.is_pointer() {
            PTR_SIZE
        } else {
            param.ty.size()
        };
        if value.size() != expected {
            return Err(KernelError::InvalidArgument(format!(
                "argument {} of '{}' expects {} bytes, got {}",
                index,
                self.name,
                expected,
                value.size()
            )));
        }

        let value = if param.ty.is_vector() {
            value.with_layout(param.ty.elem_count())
        } else {
            value
        };
        self.bindings.insert(BindingKey::Param(index), value);
        Ok(())
    }

    /// Allocate and initialise the kernel's constant variables in the
    /// global region, binding each to its allocated address.
    ///
    /// Initializer shapes the core cannot serialize are logged and
    /// skipped; their buffers stay zeroed.
    pub fn allocate_constants(&mut self, memory: &mut Memory) -> Result<(), KernelError> {
        for id in self.constants.clone() {
            let var = self.module.global(id).expect("constant enumerated at construction");
            let size = var.ty.size();
            let address = memory.allocate(size)?;
            self.constant_buffers.push(address);
            self.bindings
                .insert(BindingKey::Global(id), TypedValue::from_size_t(address));

            let initializer = match &var.initializer {
                Some(init) => init,
                None => continue,
            };
            match (&var.ty, initializer) {
                (Type::Array { elem, .. }, ConstantValue::Array(elems)) => {
                    let stride = elem.size();
                    for (i, e) in elems.iter().enumerate() {
                        if !store_constant(memory, address + i * stride, elem, e)? {
                            self.log_unhandled_constant(memory, &var.name);
                            break;
                        }
                    }
                }
                (ty, init) => {
                    if !store_constant(memory, address, ty, init)? {
                        self.log_unhandled_constant(memory, &var.name);
                    }
                }
            }
        }
        Ok(())
    }

    /// Release the buffers allocated by
    /// [`Kernel::allocate_constants`].
    pub fn deallocate_constants(&mut self, memory: &mut Memory) -> Result<(), KernelError> {
        for address in self.constant_buffers.drain(..) {
            memory.deallocate(address)?;
        }
        Ok(())
    }

    fn log_unhandled_constant(&self, memory: &Memory, name: &str) {
        memory.context().log(
            MessageType::Warning,
            &format!("unhandled constant initializer for '{}', skipped", name),
        );
    }
}

/// Serialize one scalar constant at `address`. Returns `false` for
/// initializer shapes the core does not handle (nested aggregates).
fn store_constant(
    memory: &mut Memory,
    address: usize,
    ty: &Type,
    constant: &ConstantValue,
) -> Result<bool, KernelError> {
    match (ty, constant) {
        (Type::Int { bytes }, ConstantValue::Int(v)) => {
            memory.store(address, &v.to_le_bytes()[..*bytes])?;
            Ok(true)
        }
        (Type::Float { bytes: 4 }, ConstantValue::Float(v)) => {
            memory.store(address, &(*v as f32).to_le_bytes())?;
            Ok(true)
        }
        (Type::Float { bytes: _ }, ConstantValue::Float(v)) => {
            memory.store(address, &v.to_le_bytes())?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Context;
    use crate::program::{ModuleBuilder, Type};

    fn copy_module() -> Rc<Module> {
        let mut mb = ModuleBuilder::new();
        let mut f = mb.function("copy");
        f.param("in", Type::pointer(AddressSpace::Global));
        f.param("out", Type::pointer(AddressSpace::Global));
        f.ret();
        f.build();
        Rc::new(mb.build())
    }

    #[test]
    fn test_unknown_kernel_rejected() {
        let err = Kernel::new(copy_module(), "missing").unwrap_err();
        assert!(matches!(err, KernelError::UnknownKernel(_)));
    }

    #[test]
    fn test_argument_introspection() {
        let kernel = Kernel::new(copy_module(), "copy").unwrap();
        assert_eq!(kernel.name(), "copy");
        assert_eq!(kernel.num_arguments(), 2);
        assert_eq!(kernel.argument_size(0), Some(PTR_SIZE));
        assert_eq!(kernel.argument_address_space(0), Some(0x119B));
        assert_eq!(kernel.argument_size(2), None);
        assert_eq!(kernel.required_work_group_size(), [0, 0, 0]);
    }

    #[test]
    fn test_required_size_from_metadata() {
        let mut mb = ModuleBuilder::new();
        mb.reqd_work_group_size("k", [4, 1, 1]);
        let mut f = mb.function("k");
        f.ret();
        f.build();
        let kernel = Kernel::new(Rc::new(mb.build()), "k").unwrap();
        assert_eq!(kernel.required_work_group_size(), [4, 1, 1]);
    }

    #[test]
    fn test_static_local_reservation() {
        let mut mb = ModuleBuilder::new();
        let a = mb.local("a", Type::array(Type::int32(), 4));
        let b = mb.local("b", Type::array(Type::int32(), 2));
        let mut f = mb.function("k");
        f.ret();
        f.build();

        let kernel = Kernel::new(Rc::new(mb.build()), "k").unwrap();
        assert_eq!(kernel.local_memory_size(), 24);

        let off_a = kernel.bindings.get(&BindingKey::Global(a)).unwrap();
        let off_b = kernel.bindings.get(&BindingKey::Global(b)).unwrap();
        assert_eq!(off_a.as_size_t(), 0);
        assert_eq!(off_b.as_size_t(), 16);
    }

    #[test]
    fn test_dynamic_local_grows_cursor() {
        let mut mb = ModuleBuilder::new();
        let mut f = mb.function("k");
        f.param("scratch", Type::pointer(AddressSpace::Local));
        f.ret();
        f.build();
        let mut kernel = Kernel::new(Rc::new(mb.build()), "k").unwrap();

        assert_eq!(kernel.local_memory_size(), 0);
        kernel.set_argument(0, TypedValue::zeroed(1, 256)).unwrap();
        assert_eq!(kernel.local_memory_size(), 256);
        assert_eq!(kernel.argument_value(0).unwrap().as_size_t(), 0);
    }

    #[test]
    fn test_vector_argument_relayout() {
        let mut mb = ModuleBuilder::new();
        let mut f = mb.function("k");
        f.param("v", Type::vector(Type::float32(), 4));
        f.ret();
        f.build();
        let mut kernel = Kernel::new(Rc::new(mb.build()), "k").unwrap();

        kernel
            .set_argument(0, TypedValue::from_bytes(16, 1, vec![0; 16]))
            .unwrap();
        let bound = kernel.argument_value(0).unwrap();
        assert_eq!(bound.elem_size(), 4);
        assert_eq!(bound.count(), 4);
    }

    #[test]
    fn test_bad_argument_leaves_binding() {
        let mut kernel = Kernel::new(copy_module(), "copy").unwrap();
        kernel
            .set_argument(0, TypedValue::from_size_t(0x1000))
            .unwrap();

        // Wrong size.
        let err = kernel.set_argument(0, TypedValue::zeroed(1, 3)).unwrap_err();
        assert!(matches!(err, KernelError::InvalidArgument(_)));
        assert_eq!(kernel.argument_value(0).unwrap().as_size_t(), 0x1000);

        // Out of range.
        let err = kernel
            .set_argument(5, TypedValue::from_size_t(0))
            .unwrap_err();
        assert!(matches!(err, KernelError::InvalidArgument(_)));
        assert!(!kernel.arguments_set());
    }

    #[test]
    fn test_constant_allocation_round_trip() {
        let mut mb = ModuleBuilder::new();
        let t = mb.constant(
            "t",
            Type::array(Type::int32(), 4),
            ConstantValue::Array(vec![
                ConstantValue::Int(7),
                ConstantValue::Int(8),
                ConstantValue::Int(9),
                ConstantValue::Int(10),
            ]),
        );
        let mut f = mb.function("k");
        f.ret();
        f.build();
        let mut kernel = Kernel::new(Rc::new(mb.build()), "k").unwrap();

        let mut global = Memory::new(AddressSpace::Global, 1 << 20, Context::new());
        kernel.allocate_constants(&mut global).unwrap();

        let address = kernel.bindings.get(&BindingKey::Global(t)).unwrap().as_size_t();
        let mut expected = Vec::new();
        for v in [7i32, 8, 9, 10] {
            expected.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(global.load(address, 16).unwrap(), expected.as_slice());

        kernel.deallocate_constants(&mut global).unwrap();
        assert!(global.load(address, 16).is_err());
    }
}
