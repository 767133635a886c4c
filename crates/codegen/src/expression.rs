//! Expression compilation.
//!
//! Every `compile` call leaves exactly `size_on_stack` words of the
//! expression's type on the stack. Internal calls go through the context's
//! entry-label table, so referencing a function that has no code yet simply
//! queues it for emission.

use crate::{
    context::CompilerContext,
    utils::CompilerUtils,
};
use alloy_primitives::U256;
use cinder_ast::{BinaryOp, Callable, Expression, SourceUnit, Ty, UnaryOp, VarId};
use evm_glue::opcodes::Opcode;

pub struct ExpressionCompiler<'a, 's> {
    ast: &'s SourceUnit,
    ctx: &'a mut CompilerContext,
    #[allow(dead_code)]
    optimize: bool,
}

impl<'a, 's> ExpressionCompiler<'a, 's> {
    pub fn new(ast: &'s SourceUnit, ctx: &'a mut CompilerContext, optimize: bool) -> Self {
        Self { ast, ctx, optimize }
    }

    pub fn compile(&mut self, expression: &Expression) {
        let ast = self.ast;
        match expression {
            Expression::Number(value) => self.ctx.append_push(*value),
            Expression::Bool(value) => {
                self.ctx.append_push(if *value { U256::from(1) } else { U256::ZERO })
            }
            Expression::Identifier(var) => self.compile_variable_read(*var),
            Expression::Assignment { var, value } => {
                self.compile(value);
                let target_ty = ast.variables[*var].ty.clone();
                self.append_type_conversion(&expr_type(ast, value), &target_ty, false);
                if ast.variables[*var].is_state {
                    // keep the value as the expression's result
                    self.ctx.append_op(Opcode::DUP1);
                    let slot = self.ctx.storage_slot(*var);
                    self.ctx.append_push(slot);
                    self.ctx.append_op(Opcode::SSTORE);
                } else {
                    let size = target_ty.size_on_stack();
                    CompilerUtils::new(self.ctx).copy_to_stack_top(size, &target_ty);
                    CompilerUtils::new(self.ctx).move_to_stack_variable(ast, *var);
                }
            }
            Expression::Binary { op, lhs, rhs } => {
                self.compile(lhs);
                self.compile(rhs);
                self.append_type_conversion(&expr_type(ast, rhs), &expr_type(ast, lhs), false);
                self.append_binary_operator(*op);
            }
            Expression::Unary { op, operand } => {
                self.compile(operand);
                match op {
                    UnaryOp::Not => self.ctx.append_op(Opcode::ISZERO),
                    UnaryOp::BitNot => self.ctx.append_op(Opcode::NOT),
                }
            }
            Expression::Call { function, arguments } => {
                let callee = &ast.functions[*function];
                assert_eq!(
                    callee.params.len(),
                    arguments.len(),
                    "wrong number of call arguments"
                );
                let return_tag = self.ctx.push_new_tag();
                for (&param, argument) in callee.params.iter().zip(arguments) {
                    self.compile(argument);
                    self.append_type_conversion(
                        &expr_type(ast, argument),
                        &ast.variables[param].ty,
                        false,
                    );
                }
                let entry = self.ctx.function_entry_label(Callable::Function(*function));
                self.ctx.append_jump_to(entry);
                self.ctx.append_tag(return_tag);
                let arguments_size = crate::utils::size_on_stack(ast, &callee.params) as isize;
                let returns_size = crate::utils::size_on_stack(ast, &callee.returns) as isize;
                // the callee consumed the return address and the arguments
                self.ctx.adjust_stack_offset(returns_size - arguments_size - 1);
            }
            Expression::MsgSender => self.ctx.append_op(Opcode::CALLER),
            Expression::MsgValue => self.ctx.append_op(Opcode::CALLVALUE),
            Expression::Require(condition) => {
                self.compile(condition);
                let passed = self.ctx.append_conditional_jump();
                self.ctx.append_push(U256::ZERO);
                self.ctx.append_push(U256::ZERO);
                self.ctx.append_op(Opcode::REVERT);
                self.ctx.append_tag(passed);
            }
            Expression::New { contract } => {
                let code = self.ctx.compiled_contract(*contract).to_vec();
                let subroutine = self.ctx.add_subroutine(code);
                // stack: [size]
                self.ctx.append_op(Opcode::DUP1);
                self.ctx.append_subroutine_offset(subroutine);
                self.ctx.append_push(U256::ZERO);
                self.ctx.append_op(Opcode::CODECOPY);
                // stack: [size]; creation code now sits at memory offset 0
                self.ctx.append_push(U256::ZERO);
                self.ctx.append_push(U256::ZERO);
                self.ctx.append_op(Opcode::CREATE);
            }
        }
    }

    fn compile_variable_read(&mut self, var: VarId) {
        let ast = self.ast;
        let variable = &ast.variables[var];
        if variable.is_state {
            let slot = self.ctx.storage_slot(var);
            self.ctx.append_push(slot);
            self.ctx.append_op(Opcode::SLOAD);
            let ty = variable.ty.clone();
            self.append_type_conversion(&ty, &ty, true);
        } else {
            CompilerUtils::new(self.ctx).copy_variable_to_stack_top(ast, var);
        }
    }

    fn append_binary_operator(&mut self, op: BinaryOp) {
        use BinaryOp::*;
        // stack: [lhs, rhs]; non-commutative opcodes take their first
        // operand from the top, so swap the operands into place
        match op {
            Add => self.ctx.append_op(Opcode::ADD),
            Mul => self.ctx.append_op(Opcode::MUL),
            BitAnd => self.ctx.append_op(Opcode::AND),
            BitOr => self.ctx.append_op(Opcode::OR),
            BitXor => self.ctx.append_op(Opcode::XOR),
            Eq => self.ctx.append_op(Opcode::EQ),
            NotEq => {
                self.ctx.append_op(Opcode::EQ);
                self.ctx.append_op(Opcode::ISZERO);
            }
            Sub => {
                self.ctx.append_op(Opcode::SWAP1);
                self.ctx.append_op(Opcode::SUB);
            }
            Div => {
                self.ctx.append_op(Opcode::SWAP1);
                self.ctx.append_op(Opcode::DIV);
            }
            Mod => {
                self.ctx.append_op(Opcode::SWAP1);
                self.ctx.append_op(Opcode::MOD);
            }
            Lt => {
                self.ctx.append_op(Opcode::SWAP1);
                self.ctx.append_op(Opcode::LT);
            }
            Gt => {
                self.ctx.append_op(Opcode::SWAP1);
                self.ctx.append_op(Opcode::GT);
            }
            Le => {
                self.ctx.append_op(Opcode::SWAP1);
                self.ctx.append_op(Opcode::GT);
                self.ctx.append_op(Opcode::ISZERO);
            }
            Ge => {
                self.ctx.append_op(Opcode::SWAP1);
                self.ctx.append_op(Opcode::LT);
                self.ctx.append_op(Opcode::ISZERO);
            }
            // SHL/SHR take the shift amount from the top, which is where
            // the right operand already sits
            Shl => self.ctx.append_op(Opcode::SHL),
            Shr => self.ctx.append_op(Opcode::SHR),
        }
    }

    /// Emits conversion code consuming `from`'s stack representation and
    /// producing `to`'s. With `cleanup_only` the types are equal and only
    /// the unused high-order bits are scrubbed.
    pub fn append_type_conversion(&mut self, from: &Ty, to: &Ty, cleanup_only: bool) {
        match (from, to) {
            (Ty::Bytes, Ty::Bytes) => {}
            (Ty::Bytes, _) | (_, Ty::Bytes) => {
                unreachable!("no conversion between dynamic and value types")
            }
            (_, Ty::Bool) => {
                if from != &Ty::Bool {
                    // normalize to canonical 0/1
                    self.ctx.append_op(Opcode::ISZERO);
                    self.ctx.append_op(Opcode::ISZERO);
                }
            }
            (_, to) => {
                let to_bits = to.bits();
                if to_bits < 256 && (cleanup_only || from.bits() > to_bits) {
                    self.append_mask(to_bits);
                }
            }
        }
    }

    fn append_mask(&mut self, bits: u16) {
        self.ctx.append_push(U256::MAX >> (256 - bits as usize));
        self.ctx.append_op(Opcode::AND);
    }

    /// Evaluates a state variable's initializer and stores it to its slot.
    pub fn append_state_variable_initialization(&mut self, var: VarId) {
        let ast = self.ast;
        let variable = &ast.variables[var];
        let value = variable.value.as_ref().expect("state variable without initializer");
        self.compile(value);
        self.append_type_conversion(&expr_type(ast, value), &variable.ty, false);
        let slot = self.ctx.storage_slot(var);
        self.ctx.append_push(slot);
        self.ctx.append_op(Opcode::SSTORE);
    }

    /// Emits the auto-generated getter body for a public state variable.
    /// Entered like a function (return address on the stack top), it loads
    /// the value and jumps back; the dispatcher packs it into return data.
    pub fn append_state_variable_accessor(&mut self, var: VarId) {
        let ty = self.ast.variables[var].ty.clone();
        let slot = self.ctx.storage_slot(var);
        self.ctx.append_push(slot);
        self.ctx.append_op(Opcode::SLOAD);
        self.append_type_conversion(&ty, &ty, true);
        self.ctx.append_op(Opcode::SWAP1);
        self.ctx.append_op(Opcode::JUMP);
    }
}

/// Analyzed type of an expression. Name resolution and type checking happened
/// upstream, so the type is derivable structurally.
pub fn expr_type(ast: &SourceUnit, expression: &Expression) -> Ty {
    match expression {
        Expression::Number(_) => Ty::UINT256,
        Expression::Bool(_) | Expression::Require(_) => Ty::Bool,
        Expression::Identifier(var) | Expression::Assignment { var, .. } => {
            ast.variables[*var].ty.clone()
        }
        Expression::Binary { op, lhs, .. } => {
            if op.is_comparison() {
                Ty::Bool
            } else {
                expr_type(ast, lhs)
            }
        }
        Expression::Unary { op: UnaryOp::Not, .. } => Ty::Bool,
        Expression::Unary { op: UnaryOp::BitNot, operand } => expr_type(ast, operand),
        Expression::Call { function, .. } => {
            let returns = &ast.functions[*function].returns;
            let first = returns.first().expect("value of a call without return values");
            ast.variables[*first].ty.clone()
        }
        Expression::MsgSender => Ty::Address,
        Expression::MsgValue => Ty::UINT256,
        Expression::New { .. } => Ty::Address,
    }
}

/// Number of stack words an expression leaves behind; unlike [`expr_type`]
/// this also covers expressions used only for their effect.
pub fn expr_size_on_stack(ast: &SourceUnit, expression: &Expression) -> usize {
    match expression {
        Expression::Require(_) => 0,
        Expression::Call { function, .. } => {
            crate::utils::size_on_stack(ast, &ast.functions[*function].returns)
        }
        _ => expr_type(ast, expression).size_on_stack(),
    }
}
