//! Low-level stack and memory routines shared by the emitters.

use crate::context::{CompilerContext, dup_instruction, swap_instruction};
use alloy_primitives::U256;
use cinder_ast::{SourceUnit, Ty, VarId};
use evm_glue::opcodes::Opcode;

/// Offset of the first argument byte in calldata, right after the 4-byte
/// function selector.
pub const DATA_START_OFFSET: usize = 4;

/// Rounds a byte count up to a 32-byte word boundary.
pub fn padded_size(bytes: usize) -> usize {
    (bytes + 31) / 32 * 32
}

/// Total number of stack words occupied by the given variables.
pub fn size_on_stack(ast: &SourceUnit, vars: &[VarId]) -> usize {
    vars.iter().map(|&v| ast.variables[v].ty.size_on_stack()).sum()
}

fn load_size(ty: &Ty, pad_to_words: bool) -> usize {
    let encoded = ty.calldata_encoded_size();
    assert!(encoded > 0 && encoded <= 32, "cannot load type with encoded size {encoded}");
    if pad_to_words { padded_size(encoded) } else { encoded }
}

pub struct CompilerUtils<'a> {
    ctx: &'a mut CompilerContext,
}

impl<'a> CompilerUtils<'a> {
    pub fn new(ctx: &'a mut CompilerContext) -> Self {
        Self { ctx }
    }

    /// Loads a value of the given type from a statically known calldata or
    /// memory offset, right-aligning sub-word values. Returns the number of
    /// bytes consumed at the source.
    pub fn load_from_memory(
        &mut self,
        offset: usize,
        ty: &Ty,
        from_calldata: bool,
        pad_to_words: bool,
    ) -> usize {
        let num_bytes = load_size(ty, pad_to_words);
        self.ctx.append_push(U256::from(offset));
        self.append_load(from_calldata);
        self.append_right_align(num_bytes);
        num_bytes
    }

    /// Variant of [`Self::load_from_memory`] for offsets only known at
    /// runtime. Expects the source offset on the stack top and replaces it
    /// with the loaded value below the advanced offset:
    /// `[offset] -> [value, offset + bytes]`.
    pub fn load_from_memory_dynamic(&mut self, ty: &Ty, from_calldata: bool, pad_to_words: bool) {
        let num_bytes = load_size(ty, pad_to_words);
        self.ctx.append_op(Opcode::DUP1);
        self.append_load(from_calldata);
        self.append_right_align(num_bytes);
        self.ctx.append_op(Opcode::SWAP1);
        self.ctx.append_push(U256::from(num_bytes));
        self.ctx.append_op(Opcode::ADD);
    }

    fn append_load(&mut self, from_calldata: bool) {
        self.ctx.append_op(if from_calldata { Opcode::CALLDATALOAD } else { Opcode::MLOAD });
    }

    /// Sub-word loads pick up trailing garbage; divide it away so the value
    /// ends up right-aligned in the word.
    fn append_right_align(&mut self, num_bytes: usize) {
        if num_bytes < 32 {
            self.ctx.append_push(U256::from(1) << ((32 - num_bytes) * 8));
            self.ctx.append_op(Opcode::SWAP1);
            self.ctx.append_op(Opcode::DIV);
        }
    }

    /// Stores the word on the stack top to memory at a statically known
    /// offset. Returns the number of bytes written.
    pub fn store_in_memory(&mut self, offset: usize, ty: &Ty, pad_to_words: bool) -> usize {
        assert!(!ty.is_dynamically_sized(), "cannot store a dynamically sized value");
        assert!(pad_to_words, "unpadded stores are not supported");
        self.ctx.append_push(U256::from(offset));
        self.ctx.append_op(Opcode::MSTORE);
        padded_size(ty.calldata_encoded_size())
    }

    /// Moves the value on the stack top into the pre-allocated slots of a
    /// local variable, dropping the old contents.
    pub fn move_to_stack_variable(&mut self, ast: &SourceUnit, var: VarId) {
        let size = ast.variables[var].ty.size_on_stack() as isize;
        let distance = self.ctx.stack_height() - self.ctx.base_stack_offset(var) - size;
        assert!(distance > 0, "variable slot not below the value being moved");
        assert!(distance <= 16, "stack too deep: variable inaccessible");
        for _ in 0..size {
            self.ctx.append_op(swap_instruction(distance as usize));
            self.ctx.append_op(Opcode::POP);
        }
    }

    /// Copies a local variable's value to the stack top.
    pub fn copy_variable_to_stack_top(&mut self, ast: &SourceUnit, var: VarId) {
        let size = ast.variables[var].ty.size_on_stack();
        let depth = self.ctx.stack_height() - self.ctx.base_stack_offset(var);
        assert!(depth >= size as isize, "variable slot above the stack top");
        assert!(depth <= 16, "stack too deep: variable inaccessible");
        for _ in 0..size {
            self.ctx.append_op(dup_instruction(depth as usize));
        }
    }

    /// Copies a value sitting `depth` words down (1-based to its bottom
    /// word) to the stack top.
    pub fn copy_to_stack_top(&mut self, depth: usize, ty: &Ty) {
        assert!(depth <= 16, "stack too deep: return value inaccessible");
        for _ in 0..ty.size_on_stack() {
            self.ctx.append_op(dup_instruction(depth));
        }
    }

    /// Discards a value of the given type from the stack top.
    pub fn pop_stack_element(&mut self, ty: &Ty) {
        self.pop_stack_slots(ty.size_on_stack());
    }

    pub fn pop_stack_slots(&mut self, slots: usize) {
        for _ in 0..slots {
            self.ctx.append_op(Opcode::POP);
        }
    }
}
