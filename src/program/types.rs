//! Types and address spaces for the program representation.
//!
//! Types carry just enough structure to size and align memory accesses:
//! scalar integers and floats, fixed-width vectors, pointers (tagged with
//! the address space they point into), and one level of arrays for
//! constant initializers.

/// OpenCL address space of a pointer or module-scope variable.
///
/// Discriminants follow the SPIR numbering used by the IR producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    /// Per work-item memory (registers, allocas).
    Private = 0,
    /// Device-wide memory, persists across launches.
    Global = 1,
    /// Read-only memory populated per launch.
    Constant = 2,
    /// Per work-group memory.
    Local = 3,
}

/// `CL_KERNEL_ARG_ADDRESS_GLOBAL`
pub const CL_KERNEL_ARG_ADDRESS_GLOBAL: u32 = 0x119B;
/// `CL_KERNEL_ARG_ADDRESS_CONSTANT`
pub const CL_KERNEL_ARG_ADDRESS_CONSTANT: u32 = 0x119C;
/// `CL_KERNEL_ARG_ADDRESS_LOCAL`
pub const CL_KERNEL_ARG_ADDRESS_LOCAL: u32 = 0x119D;
/// `CL_KERNEL_ARG_ADDRESS_PRIVATE`
pub const CL_KERNEL_ARG_ADDRESS_PRIVATE: u32 = 0x119E;

impl AddressSpace {
    /// The `CL_KERNEL_ARG_ADDRESS_*` value surfaced through kernel
    /// introspection, passed through verbatim to API clients.
    pub fn cl_qualifier(&self) -> u32 {
        match self {
            AddressSpace::Private => CL_KERNEL_ARG_ADDRESS_PRIVATE,
            AddressSpace::Global => CL_KERNEL_ARG_ADDRESS_GLOBAL,
            AddressSpace::Constant => CL_KERNEL_ARG_ADDRESS_CONSTANT,
            AddressSpace::Local => CL_KERNEL_ARG_ADDRESS_LOCAL,
        }
    }
}

impl std::fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressSpace::Private => write!(f, "private"),
            AddressSpace::Global => write!(f, "global"),
            AddressSpace::Constant => write!(f, "constant"),
            AddressSpace::Local => write!(f, "local"),
        }
    }
}

/// Width of a device-side `size_t` / pointer, in bytes.
pub const PTR_SIZE: usize = std::mem::size_of::<usize>();

/// A value type in the program representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    /// No value (kernel return type).
    Void,
    /// Integer of 1, 2, 4 or 8 bytes.
    Int {
        /// Byte width.
        bytes: usize,
    },
    /// IEEE float of 4 or 8 bytes.
    Float {
        /// Byte width.
        bytes: usize,
    },
    /// Fixed-width vector of a scalar element type.
    Vector {
        /// Element type (Int or Float).
        elem: Box<Type>,
        /// Number of lanes (2, 3, 4, 8 or 16).
        count: usize,
    },
    /// Pointer into the given address space.
    Pointer {
        /// Address space the pointee lives in.
        space: AddressSpace,
    },
    /// Array of a scalar or vector element type (constant initializers).
    Array {
        /// Element type.
        elem: Box<Type>,
        /// Number of elements.
        count: usize,
    },
}

impl Type {
    /// Shorthand for a 32-bit integer.
    pub fn int32() -> Type {
        Type::Int { bytes: 4 }
    }

    /// Shorthand for a device-side `size_t`.
    pub fn size_t() -> Type {
        Type::Int { bytes: PTR_SIZE }
    }

    /// Shorthand for a 32-bit float.
    pub fn float32() -> Type {
        Type::Float { bytes: 4 }
    }

    /// Shorthand for a pointer into `space`.
    pub fn pointer(space: AddressSpace) -> Type {
        Type::Pointer { space }
    }

    /// Shorthand for a vector of `count` lanes of `elem`.
    pub fn vector(elem: Type, count: usize) -> Type {
        Type::Vector {
            elem: Box::new(elem),
            count,
        }
    }

    /// Shorthand for an array of `count` elements of `elem`.
    pub fn array(elem: Type, count: usize) -> Type {
        Type::Array {
            elem: Box::new(elem),
            count,
        }
    }

    /// Total size of a value of this type, in bytes.
    pub fn size(&self) -> usize {
        match self {
            Type::Void => 0,
            Type::Int { bytes } | Type::Float { bytes } => *bytes,
            Type::Vector { elem, count } => elem.size() * count,
            Type::Pointer { .. } => PTR_SIZE,
            Type::Array { elem, count } => elem.size() * count,
        }
    }

    /// Size of one element: the scalar width for vectors and arrays,
    /// `size()` otherwise.
    pub fn elem_size(&self) -> usize {
        match self {
            Type::Vector { elem, .. } | Type::Array { elem, .. } => elem.size(),
            other => other.size(),
        }
    }

    /// Number of elements: the lane count for vectors and arrays, 1
    /// otherwise.
    pub fn elem_count(&self) -> usize {
        match self {
            Type::Vector { count, .. } | Type::Array { count, .. } => *count,
            _ => 1,
        }
    }

    /// True for vector types.
    pub fn is_vector(&self) -> bool {
        matches!(self, Type::Vector { .. })
    }

    /// True for pointer types.
    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer { .. })
    }

    /// Address space for pointer types.
    pub fn pointer_space(&self) -> Option<AddressSpace> {
        match self {
            Type::Pointer { space } => Some(*space),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_sizes() {
        assert_eq!(Type::int32().size(), 4);
        assert_eq!(Type::float32().size(), 4);
        assert_eq!(Type::Int { bytes: 8 }.size(), 8);
        assert_eq!(Type::size_t().size(), PTR_SIZE);
        assert_eq!(Type::Void.size(), 0);
    }

    #[test]
    fn test_vector_layout() {
        let float4 = Type::vector(Type::float32(), 4);
        assert_eq!(float4.size(), 16);
        assert_eq!(float4.elem_size(), 4);
        assert_eq!(float4.elem_count(), 4);
        assert!(float4.is_vector());
    }

    #[test]
    fn test_array_layout() {
        let arr = Type::array(Type::int32(), 4);
        assert_eq!(arr.size(), 16);
        assert_eq!(arr.elem_count(), 4);
        assert!(!arr.is_vector());
    }

    #[test]
    fn test_pointer_space() {
        let p = Type::pointer(AddressSpace::Global);
        assert_eq!(p.size(), PTR_SIZE);
        assert_eq!(p.pointer_space(), Some(AddressSpace::Global));
        assert_eq!(Type::int32().pointer_space(), None);
    }

    #[test]
    fn test_cl_qualifiers() {
        assert_eq!(AddressSpace::Global.cl_qualifier(), 0x119B);
        assert_eq!(AddressSpace::Constant.cl_qualifier(), 0x119C);
        assert_eq!(AddressSpace::Local.cl_qualifier(), 0x119D);
        assert_eq!(AddressSpace::Private.cl_qualifier(), 0x119E);
    }
}
