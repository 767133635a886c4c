//! Type descriptors for values crossing the stack, storage and calldata.

/// Analyzed type of a Cinder value.
///
/// The code generator only needs a handful of facts about a type: how many
/// stack words a value occupies, how many bytes its head takes up in
/// calldata, and whether its encoded size is only known at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ty {
    Bool,
    /// Unsigned integer of the given bit width (a multiple of 8, at most 256).
    Uint(u16),
    Address,
    /// Dynamically sized byte array.
    Bytes,
}

impl Ty {
    pub const UINT256: Ty = Ty::Uint(256);

    /// Number of stack words a value of this type occupies.
    pub fn size_on_stack(&self) -> usize {
        match self {
            Ty::Bool | Ty::Uint(_) | Ty::Address => 1,
            // carried as a (data offset, length) pair
            Ty::Bytes => 2,
        }
    }

    /// Number of bytes the head of this type occupies in calldata. For a
    /// dynamically sized type this is the reserved length word, not the data.
    pub fn calldata_encoded_size(&self) -> usize {
        match self {
            Ty::Bool => 1,
            Ty::Uint(bits) => *bits as usize / 8,
            Ty::Address => 20,
            Ty::Bytes => 32,
        }
    }

    pub fn is_dynamically_sized(&self) -> bool {
        matches!(self, Ty::Bytes)
    }

    /// Bit width of the value representation, used for cleanup masking.
    pub fn bits(&self) -> u16 {
        match self {
            Ty::Bool => 8,
            Ty::Uint(bits) => *bits,
            Ty::Address => 160,
            Ty::Bytes => 256,
        }
    }

    /// Canonical name as it appears in external function signatures.
    pub fn canonical_name(&self) -> String {
        match self {
            Ty::Bool => "bool".into(),
            Ty::Uint(bits) => format!("uint{bits}"),
            Ty::Address => "address".into(),
            Ty::Bytes => "bytes".into(),
        }
    }
}
