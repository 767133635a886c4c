//! Programmatic construction of analyzed ASTs.
//!
//! The builder stands in for the upstream frontend: it performs the duties
//! the code generator trusts to have happened, namely base-contract
//! linearization, hoisting of block-level declarations into the function
//! frame, and keeping constructors and fallbacks out of the regular
//! function list.

use crate::{
    Callable, ContractDefinition, ContractId, Expression, FunctionDefinition, FunctionId,
    InheritanceSpecifier, ModifierDefinition, ModifierId, ModifierInvocation, SourceUnit,
    Statement, Ty, VarId, VariableDeclaration, Visibility,
};
use std::collections::VecDeque;

#[derive(Default)]
pub struct AstBuilder {
    unit: SourceUnit,
}

impl AstBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(self) -> SourceUnit {
        self.unit
    }

    /// Declares a contract without bases.
    pub fn contract(&mut self, name: &str) -> ContractId {
        self.contract_with_bases(name, Vec::new())
    }

    /// Declares a contract deriving from the given bases. The bases must
    /// already exist; the linearization is computed here.
    pub fn contract_with_bases(
        &mut self,
        name: &str,
        bases: Vec<InheritanceSpecifier>,
    ) -> ContractId {
        let id = self.unit.contracts.next_idx();
        let direct: Vec<ContractId> = bases.iter().map(|spec| spec.base).collect();
        let linearized_bases = self.linearize(id, &direct);
        self.unit.contracts.push(ContractDefinition {
            name: name.into(),
            bases,
            linearized_bases,
            state_variables: Vec::new(),
            functions: Vec::new(),
            modifier_defs: Vec::new(),
            constructor: None,
            fallback: None,
        })
    }

    /// Declares a parameter or local variable.
    pub fn var(&mut self, name: &str, ty: Ty) -> VarId {
        self.unit.variables.push(VariableDeclaration {
            name: name.into(),
            ty,
            value: None,
            is_state: false,
            is_public: false,
        })
    }

    pub fn state_variable(
        &mut self,
        contract: ContractId,
        name: &str,
        ty: Ty,
        value: Option<Expression>,
    ) -> VarId {
        self.add_state_variable(contract, name, ty, value, false)
    }

    /// A public state variable additionally exposes an auto-generated
    /// accessor in the contract's external interface.
    pub fn public_state_variable(
        &mut self,
        contract: ContractId,
        name: &str,
        ty: Ty,
        value: Option<Expression>,
    ) -> VarId {
        self.add_state_variable(contract, name, ty, value, true)
    }

    fn add_state_variable(
        &mut self,
        contract: ContractId,
        name: &str,
        ty: Ty,
        value: Option<Expression>,
        is_public: bool,
    ) -> VarId {
        let id = self.unit.variables.push(VariableDeclaration {
            name: name.into(),
            ty,
            value,
            is_state: true,
            is_public,
        });
        self.unit.contracts[contract].state_variables.push(id);
        id
    }

    /// Id the next finished function will get; lets a body reference the
    /// function being built, e.g. for recursion.
    pub fn next_function_id(&self) -> FunctionId {
        self.unit.functions.next_idx()
    }

    pub fn function(&mut self, contract: ContractId, name: &str) -> FunctionBuilder<'_> {
        FunctionBuilder::new(self, contract, name, FunctionKind::Regular)
    }

    pub fn constructor(&mut self, contract: ContractId) -> FunctionBuilder<'_> {
        FunctionBuilder::new(self, contract, "", FunctionKind::Constructor)
    }

    pub fn fallback(&mut self, contract: ContractId) -> FunctionBuilder<'_> {
        FunctionBuilder::new(self, contract, "", FunctionKind::Fallback)
    }

    pub fn modifier(&mut self, contract: ContractId, name: &str) -> ModifierBuilder<'_> {
        ModifierBuilder {
            builder: self,
            contract,
            def: ModifierDefinition {
                name: name.into(),
                params: Vec::new(),
                locals: Vec::new(),
                body: Statement::Block(Vec::new()),
            },
        }
    }

    /// C3 linearization of the inheritance DAG, most-derived first. Direct
    /// bases are merged in reverse declaration order.
    fn linearize(&self, id: ContractId, direct_bases: &[ContractId]) -> Vec<ContractId> {
        let mut sequences: Vec<VecDeque<ContractId>> = direct_bases
            .iter()
            .rev()
            .map(|&base| self.unit.contracts[base].linearized_bases.iter().copied().collect())
            .collect();
        sequences.push(direct_bases.iter().rev().copied().collect());

        let mut result = vec![id];
        loop {
            sequences.retain(|sequence| !sequence.is_empty());
            if sequences.is_empty() {
                break;
            }
            // a head qualifies if it appears in no tail
            let head = sequences
                .iter()
                .map(|sequence| sequence[0])
                .find(|&candidate| {
                    !sequences
                        .iter()
                        .any(|sequence| sequence.iter().skip(1).any(|&c| c == candidate))
                })
                .expect("inheritance graph cannot be linearized");
            result.push(head);
            for sequence in &mut sequences {
                if sequence[0] == head {
                    sequence.pop_front();
                }
            }
        }
        result
    }
}

enum FunctionKind {
    Regular,
    Constructor,
    Fallback,
}

pub struct FunctionBuilder<'a> {
    builder: &'a mut AstBuilder,
    contract: ContractId,
    kind: FunctionKind,
    def: FunctionDefinition,
}

impl<'a> FunctionBuilder<'a> {
    fn new(builder: &'a mut AstBuilder, contract: ContractId, name: &str, kind: FunctionKind) -> Self {
        let is_constructor = matches!(kind, FunctionKind::Constructor);
        Self {
            builder,
            contract,
            kind,
            def: FunctionDefinition {
                name: name.into(),
                visibility: Visibility::Public,
                is_constructor,
                params: Vec::new(),
                returns: Vec::new(),
                locals: Vec::new(),
                modifiers: Vec::new(),
                body: Statement::Block(Vec::new()),
            },
        }
    }

    pub fn internal(mut self) -> Self {
        self.def.visibility = Visibility::Internal;
        self
    }

    pub fn param(mut self, var: VarId) -> Self {
        self.def.params.push(var);
        self
    }

    pub fn ret_param(mut self, var: VarId) -> Self {
        self.def.returns.push(var);
        self
    }

    /// Attaches a modifier invocation; for constructors the name may also be
    /// a base contract supplying its constructor arguments.
    pub fn with_modifier(mut self, name: &str, arguments: Vec<Expression>) -> Self {
        self.def.modifiers.push(ModifierInvocation { name: name.into(), arguments });
        self
    }

    pub fn body(mut self, statements: Vec<Statement>) -> FunctionId {
        self.def.body = Statement::Block(statements);
        hoist_locals(&self.def.body, &mut self.def.locals);
        let id = self.builder.unit.functions.push(self.def);
        let contract = &mut self.builder.unit.contracts[self.contract];
        match self.kind {
            FunctionKind::Regular => contract.functions.push(id),
            FunctionKind::Constructor => {
                assert!(contract.constructor.is_none(), "contract already has a constructor");
                contract.constructor = Some(id);
            }
            FunctionKind::Fallback => {
                assert!(contract.fallback.is_none(), "contract already has a fallback");
                contract.fallback = Some(id);
            }
        }
        id
    }
}

pub struct ModifierBuilder<'a> {
    builder: &'a mut AstBuilder,
    contract: ContractId,
    def: ModifierDefinition,
}

impl ModifierBuilder<'_> {
    pub fn param(mut self, var: VarId) -> Self {
        self.def.params.push(var);
        self
    }

    pub fn body(mut self, statements: Vec<Statement>) -> ModifierId {
        self.def.body = Statement::Block(statements);
        hoist_locals(&self.def.body, &mut self.def.locals);
        let id = self.builder.unit.modifiers.push(self.def);
        self.builder.unit.contracts[self.contract].modifier_defs.push(id);
        id
    }
}

/// Collects every variable declared in the statement tree; declarations are
/// hoisted to the frame and zero-initialized at function entry.
fn hoist_locals(statement: &Statement, locals: &mut Vec<VarId>) {
    match statement {
        Statement::Block(statements) => {
            for s in statements {
                hoist_locals(s, locals);
            }
        }
        Statement::If { then_branch, else_branch, .. } => {
            hoist_locals(then_branch, locals);
            if let Some(else_branch) = else_branch {
                hoist_locals(else_branch, locals);
            }
        }
        Statement::While { body, .. } => hoist_locals(body, locals),
        Statement::For { init, post, body, .. } => {
            if let Some(init) = init {
                hoist_locals(init, locals);
            }
            if let Some(post) = post {
                hoist_locals(post, locals);
            }
            hoist_locals(body, locals);
        }
        Statement::VariableDeclaration { var, .. } => {
            if !locals.contains(var) {
                locals.push(*var);
            }
        }
        Statement::Break
        | Statement::Continue
        | Statement::Return(_)
        | Statement::Expression(_)
        | Statement::Placeholder => {}
    }
}

/// Interface-function lookup by name, mainly a convenience for tests.
pub fn callable_by_name(unit: &SourceUnit, contract: ContractId, name: &str) -> Option<Callable> {
    unit.interface_functions(contract).into_values().find(|&callable| match callable {
        Callable::Function(fid) => unit.functions[fid].name == name,
        Callable::Accessor(vid) => unit.variables[vid].name == name,
    })
}
