//! Immutable program representation consumed by the execution core.
//!
//! A [`Module`] is what the front-end loader hands to the simulator after
//! parsing, linking and verification: functions enumerable by name,
//! module-scope variables with address-space tags and optional constant
//! initializers, and per-kernel metadata such as the required work-group
//! size. The core never parses IR text.
//!
//! # Example
//!
//! ```
//! use ocl_emu::program::{ModuleBuilder, Type, AddressSpace};
//!
//! let mut mb = ModuleBuilder::new();
//! let mut f = mb.function("noop");
//! f.param("out", Type::pointer(AddressSpace::Global));
//! f.ret();
//! f.build();
//! let module = mb.build();
//! assert!(module.function("noop").is_some());
//! ```

pub mod builder;
pub mod instruction;
pub mod types;

pub use builder::{FunctionBuilder, ModuleBuilder};
pub use instruction::{
    AtomicOp, BasicBlock, BinaryOp, BlockId, CastOp, ComparePred, GlobalId, InstKind, Instruction,
    Operand, RangeQuery, ValueId, CLK_GLOBAL_MEM_FENCE, CLK_LOCAL_MEM_FENCE,
};
pub use types::{AddressSpace, Type, PTR_SIZE};

/// A constant initializer for a module-scope variable.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    /// Integer constant (width taken from the variable's type).
    Int(i64),
    /// Float constant (width taken from the variable's type).
    Float(f64),
    /// Array of element constants.
    Array(Vec<ConstantValue>),
}

/// A module-scope variable.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalVariable {
    /// Variable name.
    pub name: String,
    /// Address space the variable lives in.
    pub space: AddressSpace,
    /// Type of the pointee.
    pub ty: Type,
    /// Initializer, present for constant variables.
    pub initializer: Option<ConstantValue>,
}

/// A formal kernel parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Parameter name.
    pub name: String,
    /// Parameter type.
    pub ty: Type,
}

/// A kernel function: ordered parameters and a CFG of basic blocks.
///
/// SSA numbering contract: parameter `i` is `ValueId(i)`; instruction
/// results are numbered from `params.len()` upward.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    /// Function name.
    pub name: String,
    /// Ordered formal parameters.
    pub params: Vec<Parameter>,
    /// Basic blocks; entry is `BlockId(0)`.
    pub blocks: Vec<BasicBlock>,
}

impl Function {
    /// Number of formal parameters.
    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    /// Look up a block by id.
    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.0 as usize)
    }
}

/// Index of a function within its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(pub usize);

/// Per-kernel metadata recorded by the front end.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KernelMetadata {
    /// `reqd_work_group_size(x, y, z)`; zero means unconstrained.
    pub reqd_work_group_size: [usize; 3],
}

/// An immutable program: functions, module-scope variables, metadata.
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Functions, indexable by [`FunctionId`].
    pub functions: Vec<Function>,
    /// Module-scope variables, indexable by [`GlobalId`].
    pub globals: Vec<GlobalVariable>,
    /// Metadata keyed by kernel name.
    pub metadata: std::collections::HashMap<String, KernelMetadata>,
}

impl Module {
    /// Look up a function by name.
    pub fn function(&self, name: &str) -> Option<(FunctionId, &Function)> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| (FunctionId(i), &self.functions[i]))
    }

    /// Look up a module-scope variable by handle.
    pub fn global(&self, id: GlobalId) -> Option<&GlobalVariable> {
        self.globals.get(id.0 as usize)
    }

    /// Metadata for a kernel, if the front end recorded any.
    pub fn kernel_metadata(&self, name: &str) -> Option<&KernelMetadata> {
        self.metadata.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_lookup() {
        let module = Module {
            functions: vec![Function {
                name: "k".into(),
                params: Vec::new(),
                blocks: vec![BasicBlock {
                    instructions: vec![Instruction {
                        result: None,
                        kind: InstKind::Return,
                    }],
                }],
            }],
            globals: Vec::new(),
            metadata: Default::default(),
        };

        let (id, f) = module.function("k").unwrap();
        assert_eq!(id, FunctionId(0));
        assert_eq!(f.num_params(), 0);
        assert!(module.function("missing").is_none());
    }

    #[test]
    fn test_metadata_lookup() {
        let mut module = Module::default();
        module.metadata.insert(
            "k".into(),
            KernelMetadata {
                reqd_work_group_size: [4, 1, 1],
            },
        );
        assert_eq!(
            module.kernel_metadata("k").unwrap().reqd_work_group_size,
            [4, 1, 1]
        );
        assert!(module.kernel_metadata("other").is_none());
    }
}
