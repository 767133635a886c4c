//! EVM code generation for analyzed Cinder contracts.
//!
//! A contract compiles to two images. The *runtime* image is the code
//! installed on chain: a selector dispatcher in front of the function bodies.
//! The *creation* image runs once at deployment: it executes the base-chain
//! constructors, initializes state variables, then copies the runtime image
//! (embedded as code-data) to memory and returns it. Both images share the
//! function-body emitter but live in separate [`CompilerContext`]s with
//! independent label universes, because jump targets are absolute per image.

mod context;
mod dispatch;
mod error;
mod expression;
mod statement;
mod utils;
#[cfg(test)]
mod tests;

pub use crate::{
    context::CompilerContext,
    error::{CodegenError, Result},
    expression::ExpressionCompiler,
    utils::{CompilerUtils, DATA_START_OFFSET},
};

use crate::context::MarkId;
use alloy_primitives::U256;
use cinder_ast::{Callable, ContractId, Expression, FunctionId, SourceUnit};
use evm_glue::{assembly::Asm, opcodes::Opcode};
use std::collections::HashMap;
use std::mem;

/// The two assembled images of a contract, plus their finalized item streams
/// for inspection.
pub struct CompiledContract {
    /// Deployment payload: executing it installs the runtime image.
    pub creation: Vec<u8>,
    /// The code installed on chain.
    pub runtime: Vec<u8>,
    pub creation_assembly: Vec<Asm>,
    pub runtime_assembly: Vec<Asm>,
}

/// Compiles one contract of a unit, without sibling bytecode for `new`
/// expressions.
pub fn compile_contract(
    ast: &SourceUnit,
    contract: ContractId,
    optimize: bool,
) -> Result<CompiledContract> {
    Compiler::new(ast, optimize).compile_contract(contract, &HashMap::new())
}

pub struct Compiler<'s> {
    ast: &'s SourceUnit,
    optimize: bool,
    /// Context of the image currently being emitted.
    ctx: CompilerContext,
    /// The other image's context; quiescent while `ctx` is active.
    runtime_ctx: CompilerContext,
    break_tags: Vec<MarkId>,
    continue_tags: Vec<MarkId>,
    return_tag: MarkId,
    /// Words a `return` inside the current modifier frame must pop before
    /// jumping to the return tag.
    stack_cleanup_for_return: usize,
    current_function: Option<FunctionId>,
    /// Index into the current function's modifier list; equal to its length
    /// when the function body itself is being emitted.
    modifier_depth: usize,
}

impl<'s> Compiler<'s> {
    pub fn new(ast: &'s SourceUnit, optimize: bool) -> Self {
        Self {
            ast,
            optimize,
            ctx: CompilerContext::new(),
            runtime_ctx: CompilerContext::new(),
            break_tags: Vec::new(),
            continue_tags: Vec::new(),
            return_tag: 0,
            stack_cleanup_for_return: 0,
            current_function: None,
            modifier_depth: 0,
        }
    }

    /// Compiles a contract to its creation and runtime images. The
    /// `compiled_contracts` map supplies the creation bytecode of sibling
    /// contracts referenced by `new` expressions.
    pub fn compile_contract(
        &mut self,
        contract: ContractId,
        compiled_contracts: &HashMap<ContractId, Vec<u8>>,
    ) -> Result<CompiledContract> {
        self.ctx = CompilerContext::new();
        self.initialize_context(contract, compiled_contracts);
        self.append_function_selector(contract);
        self.drain_pending_functions();

        // the runtime image is done; switch to the creation image
        mem::swap(&mut self.ctx, &mut self.runtime_ctx);
        self.initialize_context(contract, compiled_contracts);
        let (runtime_assembly, runtime) = mem::take(&mut self.runtime_ctx).finish()?;

        self.pack_into_contract_creator(contract, runtime.clone());
        let (creation_assembly, creation) = mem::take(&mut self.ctx).finish()?;

        Ok(CompiledContract { creation, runtime, creation_assembly, runtime_assembly })
    }

    fn initialize_context(
        &mut self,
        contract: ContractId,
        compiled_contracts: &HashMap<ContractId, Vec<u8>>,
    ) {
        self.ctx.set_compiled_contracts(compiled_contracts.clone());
        self.ctx
            .set_inheritance_hierarchy(self.ast.contracts[contract].linearized_bases.clone());
        self.register_state_variables(contract);
    }

    /// Assigns storage slots in reverse linearization order, so base fields
    /// come before derived fields.
    fn register_state_variables(&mut self, contract: ContractId) {
        let ast = self.ast;
        for &cid in ast.contracts[contract].linearized_bases.iter().rev() {
            for &var in &ast.contracts[cid].state_variables {
                self.ctx.add_state_variable(var);
            }
        }
    }

    /// Emits every referenced-but-unemitted callable until the set is empty.
    /// Bodies may reference further functions, which are picked up by the
    /// next round.
    fn drain_pending_functions(&mut self) {
        let mut pending = self.ctx.functions_without_code();
        while !pending.is_empty() {
            for callable in pending {
                self.compile_callable(callable);
            }
            pending = self.ctx.functions_without_code();
        }
    }

    pub(crate) fn compile_callable(&mut self, callable: Callable) {
        match callable {
            Callable::Function(function) => self.compile_function(function),
            Callable::Accessor(var) => {
                self.ctx.start_function(callable);
                self.break_tags.clear();
                self.continue_tags.clear();
                ExpressionCompiler::new(self.ast, &mut self.ctx, self.optimize)
                    .append_state_variable_accessor(var);
            }
        }
    }

    /// Emits one function body.
    ///
    /// Stack on entry: `[return address] [arg0] ... [argn]`. The frame
    /// reserves zero-initialized slots for the return parameters and all
    /// hoisted locals above the arguments, then the modifier chain wraps the
    /// body. The epilogue reshuffles the frame into
    /// `[ret0] ... [retm] [return address]` and jumps.
    fn compile_function(&mut self, function: FunctionId) {
        let ast = self.ast;
        let definition = &ast.functions[function];

        self.ctx.start_function(Callable::Function(function));
        self.return_tag = self.ctx.new_tag();
        self.break_tags.clear();
        self.continue_tags.clear();
        self.stack_cleanup_for_return = 0;
        self.current_function = Some(function);
        self.modifier_depth = 0;

        let mut parameters_size = utils::size_on_stack(ast, &definition.params);
        self.ctx.adjust_stack_offset(parameters_size as isize);
        for &param in &definition.params {
            self.ctx.add_variable(param, parameters_size);
            parameters_size -= ast.variables[param].ty.size_on_stack();
        }
        for &ret in &definition.returns {
            self.ctx.add_and_initialize_variable(ret, ast.variables[ret].ty.size_on_stack());
        }
        for &local in &definition.locals {
            self.ctx.add_and_initialize_variable(local, ast.variables[local].ty.size_on_stack());
        }

        self.append_modifier_or_function_code();

        self.ctx.append_tag(self.return_tag);

        // Reshuffle the frame. The intent vector records, for each slot from
        // the frame bottom up, the target position or -1 for "discard". Each
        // swap moves the top element to its target and each pop shortens the
        // vector, so this terminates.
        let arguments_size = utils::size_on_stack(ast, &definition.params);
        let return_values_size = utils::size_on_stack(ast, &definition.returns);
        let local_variables_size = utils::size_on_stack(ast, &definition.locals);

        let mut stack_layout: Vec<isize> =
            Vec::with_capacity(1 + arguments_size + return_values_size + local_variables_size);
        stack_layout.push(return_values_size as isize); // return address
        stack_layout.extend(std::iter::repeat(-1).take(arguments_size));
        stack_layout.extend(0..return_values_size as isize);
        stack_layout.extend(std::iter::repeat(-1).take(local_variables_size));

        while *stack_layout.last().expect("layout is never empty")
            != stack_layout.len() as isize - 1
        {
            let top = *stack_layout.last().expect("layout is never empty");
            if top < 0 {
                self.ctx.append_op(Opcode::POP);
                stack_layout.pop();
            } else {
                let target = top as usize;
                let distance = stack_layout.len() - target - 1;
                self.ctx.append_op(context::swap_instruction(distance));
                let last = stack_layout.len() - 1;
                stack_layout.swap(target, last);
            }
        }

        self.ctx.append_op(Opcode::JUMP);
        self.current_function = None;
    }

    /// Splices the next modifier around the code below it, or emits the
    /// function body once the modifier list is exhausted. Placeholder
    /// statements inside modifier bodies recurse back here one level deeper.
    pub(crate) fn append_modifier_or_function_code(&mut self) {
        let ast = self.ast;
        let function = self.current_function.expect("no function being compiled");
        let definition = &ast.functions[function];
        if self.modifier_depth >= definition.modifiers.len() {
            self.compile_statement(&definition.body);
            return;
        }

        let invocation = &definition.modifiers[self.modifier_depth];
        let scope = self.ctx.inheritance_hierarchy()[0];
        let Some(modifier_id) = ast.modifier_by_name(scope, &invocation.name) else {
            // a constructor invoking a base constructor: the creation driver
            // already consumed the arguments, skip to the next level
            assert!(
                ast.base_by_name(scope, &invocation.name).is_some(),
                "unknown modifier {}",
                invocation.name
            );
            self.modifier_depth += 1;
            self.append_modifier_or_function_code();
            self.modifier_depth -= 1;
            return;
        };

        let modifier = &ast.modifiers[modifier_id];
        assert_eq!(
            modifier.params.len(),
            invocation.arguments.len(),
            "wrong number of modifier arguments"
        );
        for (&param, argument) in modifier.params.iter().zip(&invocation.arguments) {
            self.ctx.add_variable(param, 0);
            self.compile_expression(argument, Some(&ast.variables[param].ty.clone()));
        }
        for &local in &modifier.locals {
            self.ctx.add_and_initialize_variable(local, ast.variables[local].ty.size_on_stack());
        }

        let stack_surplus =
            utils::size_on_stack(ast, &modifier.params) + utils::size_on_stack(ast, &modifier.locals);
        self.stack_cleanup_for_return += stack_surplus;

        self.compile_statement(&modifier.body);

        for _ in 0..stack_surplus {
            self.ctx.append_op(Opcode::POP);
        }
        self.stack_cleanup_for_return -= stack_surplus;
    }

    /// Builds the creation image: base constructors in base-to-derived
    /// order, state initialization, then the epilogue that copies the
    /// embedded runtime image to memory and returns it.
    fn pack_into_contract_creator(&mut self, contract: ContractId, runtime_code: Vec<u8>) {
        let ast = self.ast;
        let bases = &ast.contracts[contract].linearized_bases;

        // Arguments for the base constructors. Scanning derived-to-base,
        // the first specifier or constructor invocation naming a base wins.
        // A specifier without arguments only declares the base.
        let mut base_arguments: HashMap<ContractId, &[Expression]> = HashMap::new();
        for &cid in bases {
            for specifier in &ast.contracts[cid].bases {
                if !specifier.arguments.is_empty() {
                    base_arguments.entry(specifier.base).or_insert(&specifier.arguments);
                }
            }
            if let Some(ctor) = ast.contracts[cid].constructor {
                for invocation in &ast.functions[ctor].modifiers {
                    if let Some(base) = ast.base_by_name(cid, &invocation.name) {
                        base_arguments.entry(base).or_insert(&invocation.arguments);
                    }
                }
            }
        }

        // base-to-derived; the most derived constructor is called last
        for i in 1..bases.len() {
            let base = bases[bases.len() - i];
            self.initialize_state_variables(base);
            if let Some(ctor) = ast.contracts[base].constructor {
                let arguments = base_arguments.get(&base).copied().unwrap_or(&[]);
                self.append_base_constructor_call(ctor, arguments);
            }
        }
        self.initialize_state_variables(contract);
        if let Some(ctor) = ast.contracts[contract].constructor {
            self.append_constructor_call(ctor);
        }

        let subroutine = self.ctx.add_subroutine(runtime_code);
        // stack contains the subroutine size
        self.ctx.append_op(Opcode::DUP1);
        self.ctx.append_subroutine_offset(subroutine);
        self.ctx.append_push(U256::ZERO);
        self.ctx.append_op(Opcode::CODECOPY);
        self.ctx.append_push(U256::ZERO);
        self.ctx.append_op(Opcode::RETURN);

        // the functions called above have to be emitted again for this
        // image: jump labels are absolute and differ from the runtime image
        self.drain_pending_functions();
    }

    fn initialize_state_variables(&mut self, contract: ContractId) {
        let ast = self.ast;
        for &var in &ast.contracts[contract].state_variables {
            if ast.variables[var].value.is_some() {
                ExpressionCompiler::new(ast, &mut self.ctx, self.optimize)
                    .append_state_variable_initialization(var);
            }
        }
    }

    fn append_base_constructor_call(&mut self, ctor: FunctionId, arguments: &[Expression]) {
        let ast = self.ast;
        let definition = &ast.functions[ctor];
        assert_eq!(
            definition.params.len(),
            arguments.len(),
            "wrong number of base constructor arguments"
        );
        let return_tag = self.ctx.push_new_tag();
        for (&param, argument) in definition.params.iter().zip(arguments) {
            self.compile_expression(argument, Some(&ast.variables[param].ty.clone()));
        }
        let entry = self.ctx.function_entry_label(Callable::Function(ctor));
        self.ctx.append_jump_to(entry);
        self.ctx.append_tag(return_tag);
        // the callee consumed the return address and the arguments
        self.ctx
            .adjust_stack_offset(-(utils::size_on_stack(ast, &definition.params) as isize + 1));
    }

    /// Calls the most derived constructor. Its arguments are appended to the
    /// deployed creation code by the deployer; copy them to the calldata
    /// start offset in memory and unpack them from there.
    fn append_constructor_call(&mut self, ctor: FunctionId) {
        let ast = self.ast;
        let definition = &ast.functions[ctor];
        let return_tag = self.ctx.push_new_tag();

        let argument_size: usize = definition
            .params
            .iter()
            .map(|&p| utils::padded_size(ast.variables[p].ty.calldata_encoded_size()))
            .sum();
        if argument_size > 0 {
            self.ctx.append_push(U256::from(argument_size));
            self.ctx.append_program_size();
            self.ctx.append_push(U256::from(DATA_START_OFFSET));
            self.ctx.append_op(Opcode::CODECOPY);
            let parameter_types: Vec<_> =
                definition.params.iter().map(|&p| ast.variables[p].ty.clone()).collect();
            self.append_calldata_unpacker(&parameter_types, true);
        }

        let entry = self.ctx.function_entry_label(Callable::Function(ctor));
        self.ctx.append_jump_to(entry);
        self.ctx.append_tag(return_tag);
        self.ctx
            .adjust_stack_offset(-(utils::size_on_stack(ast, &definition.params) as isize + 1));
    }
}
