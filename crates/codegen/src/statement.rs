//! Statement emission.
//!
//! Statements are emitted by an exhaustive walk over the tagged statement
//! variants. Every handler that is supposed to be stack-neutral is wrapped in
//! a height guard: the cursor at exit must equal the cursor at entry, which
//! is what makes the fixed-depth addressing of locals sound. A violation is
//! a compiler bug, never a property of the input program.

use crate::{
    Compiler,
    expression::{self, ExpressionCompiler},
    utils::CompilerUtils,
};
use cinder_ast::{Expression, Statement, Ty};
use evm_glue::opcodes::Opcode;

impl Compiler<'_> {
    pub(crate) fn compile_statement(&mut self, statement: &Statement) {
        match statement {
            Statement::Block(statements) => {
                for statement in statements {
                    self.compile_statement(statement);
                }
            }
            Statement::If { condition, then_branch, else_branch } => {
                let entry_height = self.ctx.stack_height();
                self.compile_expression(condition, Some(&Ty::Bool));
                let true_tag = self.ctx.append_conditional_jump();
                if let Some(false_branch) = else_branch {
                    self.compile_statement(false_branch);
                }
                let end_tag = self.ctx.append_jump_to_new();
                self.ctx.append_tag(true_tag);
                self.compile_statement(then_branch);
                self.ctx.append_tag(end_tag);
                self.check_stack_height(entry_height, "if");
            }
            Statement::While { condition, body } => {
                let entry_height = self.ctx.stack_height();
                let loop_start = self.ctx.new_tag();
                let loop_end = self.ctx.new_tag();
                self.continue_tags.push(loop_start);
                self.break_tags.push(loop_end);

                self.ctx.append_tag(loop_start);
                self.compile_expression(condition, Some(&Ty::Bool));
                self.ctx.append_op(Opcode::ISZERO);
                self.ctx.append_conditional_jump_to(loop_end);

                self.compile_statement(body);

                self.ctx.append_jump_to(loop_start);
                self.ctx.append_tag(loop_end);

                self.continue_tags.pop();
                self.break_tags.pop();
                self.check_stack_height(entry_height, "while");
            }
            Statement::For { init, condition, post, body } => {
                let entry_height = self.ctx.stack_height();
                let loop_start = self.ctx.new_tag();
                let loop_end = self.ctx.new_tag();
                self.continue_tags.push(loop_start);
                self.break_tags.push(loop_end);

                if let Some(init) = init {
                    self.compile_statement(init);
                }

                self.ctx.append_tag(loop_start);

                // a for loop without a condition runs until break
                if let Some(condition) = condition {
                    self.compile_expression(condition, Some(&Ty::Bool));
                    self.ctx.append_op(Opcode::ISZERO);
                    self.ctx.append_conditional_jump_to(loop_end);
                }

                self.compile_statement(body);

                if let Some(post) = post {
                    self.compile_statement(post);
                }

                self.ctx.append_jump_to(loop_start);
                self.ctx.append_tag(loop_end);

                self.continue_tags.pop();
                self.break_tags.pop();
                self.check_stack_height(entry_height, "for");
            }
            Statement::Continue => {
                if let Some(&tag) = self.continue_tags.last() {
                    self.ctx.append_jump_to(tag);
                }
            }
            Statement::Break => {
                if let Some(&tag) = self.break_tags.last() {
                    self.ctx.append_jump_to(tag);
                }
            }
            Statement::Return(value) => {
                if let Some(expression) = value {
                    let ast = self.ast;
                    let function = self.current_function.expect("return outside of a function");
                    let first_return = *ast.functions[function]
                        .returns
                        .first()
                        .expect("return with a value in a function without return parameters");
                    self.compile_expression(
                        expression,
                        Some(&ast.variables[first_return].ty.clone()),
                    );
                    CompilerUtils::new(&mut self.ctx).move_to_stack_variable(ast, first_return);
                }
                for _ in 0..self.stack_cleanup_for_return {
                    self.ctx.append_op(Opcode::POP);
                }
                self.ctx.append_jump_to(self.return_tag);
                // restore the cursor for the linear walk of what follows
                self.ctx.adjust_stack_offset(self.stack_cleanup_for_return as isize);
            }
            Statement::VariableDeclaration { var, value } => {
                let entry_height = self.ctx.stack_height();
                // the slot was zero-initialized on function entry
                if let Some(expression) = value {
                    let ast = self.ast;
                    self.compile_expression(expression, Some(&ast.variables[*var].ty.clone()));
                    CompilerUtils::new(&mut self.ctx).move_to_stack_variable(ast, *var);
                }
                self.check_stack_height(entry_height, "variable declaration");
            }
            Statement::Expression(expression) => {
                let entry_height = self.ctx.stack_height();
                self.compile_expression(expression, None);
                let words = expression::expr_size_on_stack(self.ast, expression);
                CompilerUtils::new(&mut self.ctx).pop_stack_slots(words);
                self.check_stack_height(entry_height, "expression");
            }
            Statement::Placeholder => {
                let entry_height = self.ctx.stack_height();
                self.modifier_depth += 1;
                self.append_modifier_or_function_code();
                self.modifier_depth -= 1;
                self.check_stack_height(entry_height, "placeholder");
            }
        }
    }

    pub(crate) fn compile_expression(&mut self, expression: &Expression, target: Option<&Ty>) {
        let ast = self.ast;
        let mut compiler = ExpressionCompiler::new(ast, &mut self.ctx, self.optimize);
        compiler.compile(expression);
        if let Some(target) = target {
            compiler.append_type_conversion(&expression::expr_type(ast, expression), target, false);
        }
    }

    fn check_stack_height(&self, expected: isize, statement: &str) {
        assert_eq!(
            self.ctx.stack_height(),
            expected,
            "stack height disturbed by {statement} statement"
        );
    }
}
