//! The runtime image's front door.
//!
//! The dispatcher loads the 4-byte selector from the calldata prefix,
//! compares it against every externally callable function and jumps to the
//! matching calldata unpacker, which in turn jumps into the function body.
//! When the body returns, the packer writes the return values to memory and
//! hands them back to the caller. Calls matching no selector run the
//! fallback function, or stop successfully when there is none.

use crate::{Compiler, context::MarkId, expression::ExpressionCompiler, utils, utils::CompilerUtils};
use alloy_primitives::U256;
use cinder_ast::{Callable, ContractId, Selector, Ty};
use evm_glue::opcodes::Opcode;
use std::collections::BTreeMap;

impl Compiler<'_> {
    pub(crate) fn append_function_selector(&mut self, contract: ContractId) {
        let ast = self.ast;
        let interface = ast.interface_functions(contract);
        let mut entry_points: BTreeMap<Selector, MarkId> = BTreeMap::new();

        if !interface.is_empty() {
            // selector: the first 4 calldata bytes, right-aligned
            CompilerUtils::new(&mut self.ctx).load_from_memory(
                0,
                &Ty::Uint((utils::DATA_START_OFFSET * 8) as u16),
                true,
                false,
            );
        }

        // stack: [selector]
        for &selector in interface.keys() {
            let tag = self.ctx.new_tag();
            entry_points.insert(selector, tag);
            self.ctx.append_op(Opcode::DUP1);
            self.ctx.append_push(U256::from_be_slice(&selector));
            self.ctx.append_op(Opcode::EQ);
            self.ctx.append_conditional_jump_to(tag);
        }

        if let Some(fallback) = ast.fallback_function(contract) {
            let return_tag = self.ctx.push_new_tag();
            // the fallback body is laid down right here; execution falls
            // through its entry label
            self.compile_callable(Callable::Function(fallback));
            self.ctx.append_tag(return_tag);
            let return_types = ast.callable_return_types(Callable::Function(fallback));
            self.append_return_value_packer(&return_types);
        } else {
            // no match and no fallback: terminate without return data
            self.ctx.append_op(Opcode::STOP);
        }

        for (&selector, &callable) in &interface {
            self.ctx.append_tag(entry_points[&selector]);
            let return_tag = self.ctx.push_new_tag();
            let parameter_types = ast.callable_parameter_types(callable);
            self.append_calldata_unpacker(&parameter_types, false);
            let entry = self.ctx.function_entry_label(callable);
            self.ctx.append_jump_to(entry);
            self.ctx.append_tag(return_tag);
            let return_types = ast.callable_return_types(callable);
            self.append_return_value_packer(&return_types);
        }
    }

    /// Unpacks ABI-encoded parameters onto the stack, in declaration order.
    ///
    /// The encoding reserves one word per dynamically sized parameter right
    /// after the selector, holding its *length*; the data of all parameters
    /// follows, in order, each padded to a word boundary. Static parameters
    /// before the first dynamic one live at statically known offsets; once a
    /// dynamic parameter is seen, a running data pointer is kept on the
    /// stack and everything after it loads relative to that pointer. A
    /// dynamic parameter occupies two stack words: data offset and length.
    pub(crate) fn append_calldata_unpacker(&mut self, parameter_types: &[Ty], from_memory: bool) {
        // everything is zero-padded, so reading past the calldata end is fine
        let dynamic_count =
            parameter_types.iter().filter(|ty| ty.is_dynamically_sized()).count();
        let mut offset = utils::DATA_START_OFFSET + dynamic_count * 32;
        let mut current_dynamic = 0usize;

        for ty in parameter_types {
            if ty.is_dynamically_sized() {
                if current_dynamic == 0 {
                    // switch from static to dynamic mode
                    self.ctx.append_push(U256::from(offset));
                }
                // retrieve the length from its reserved slot
                CompilerUtils::new(&mut self.ctx).load_from_memory(
                    utils::DATA_START_OFFSET + current_dynamic * 32,
                    &Ty::UINT256,
                    !from_memory,
                    true,
                );
                // stack: [offset, length]; padded length via ((l + 31) / 32) * 32
                self.ctx.append_push(U256::from(32));
                self.ctx.append_op(Opcode::DUP1);
                self.ctx.append_push(U256::from(31));
                self.ctx.append_op(Opcode::DUP4);
                self.ctx.append_op(Opcode::ADD);
                self.ctx.append_op(Opcode::DIV);
                self.ctx.append_op(Opcode::MUL);
                // stack: [offset, length, padded_length]
                self.ctx.append_op(Opcode::DUP3);
                self.ctx.append_op(Opcode::ADD);
                // stack: [offset, length, next_offset]
                current_dynamic += 1;
            } else if current_dynamic == 0 {
                // still in the statically addressed prefix
                offset += CompilerUtils::new(&mut self.ctx).load_from_memory(
                    offset,
                    ty,
                    !from_memory,
                    true,
                );
            } else {
                CompilerUtils::new(&mut self.ctx).load_from_memory_dynamic(ty, !from_memory, true);
            }
        }
        if dynamic_count > 0 {
            // drop the running data pointer
            self.ctx.append_op(Opcode::POP);
        }
    }

    /// Packs the return values sitting on the stack into memory and returns
    /// them to the caller. The stack is deliberately not cleaned up; RETURN
    /// is terminal.
    pub(crate) fn append_return_value_packer(&mut self, return_types: &[Ty]) {
        let mut data_offset = 0usize;
        let mut stack_depth: usize = return_types.iter().map(Ty::size_on_stack).sum();

        for ty in return_types {
            CompilerUtils::new(&mut self.ctx).copy_to_stack_top(stack_depth, ty);
            ExpressionCompiler::new(self.ast, &mut self.ctx, self.optimize)
                .append_type_conversion(ty, ty, true);
            data_offset += CompilerUtils::new(&mut self.ctx).store_in_memory(data_offset, ty, true);
            stack_depth -= ty.size_on_stack();
        }

        self.ctx.append_push(U256::from(data_offset));
        self.ctx.append_push(U256::ZERO);
        self.ctx.append_op(Opcode::RETURN);
    }
}
