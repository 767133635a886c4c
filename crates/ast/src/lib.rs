//! Analyzed AST for the Cinder contract language.
//!
//! Nodes are owned by arenas in a [`SourceUnit`] and addressed by typed ids,
//! so downstream passes can key work queues and symbol tables on stable,
//! copyable identifiers instead of node addresses. The AST is the *output* of
//! name resolution and type checking: identifiers are resolved to [`VarId`]s,
//! calls to [`FunctionId`]s, and every contract carries its precomputed
//! inheritance linearization.

pub mod builder;
pub mod index;
pub mod types;

pub use crate::{
    index::{ContractId, FunctionId, Idx, IndexVec, ModifierId, VarId},
    types::Ty,
};
use alloy_primitives::{U256, keccak256};
use std::collections::{BTreeMap, HashSet};

/// 4-byte external function selector: the first four bytes of the keccak-256
/// hash of the canonical signature.
pub type Selector = [u8; 4];

/// A unit of compilation: all contracts of a source file plus their
/// transitively referenced declarations.
#[derive(Debug, Clone, Default)]
pub struct SourceUnit {
    pub contracts: IndexVec<ContractId, ContractDefinition>,
    pub functions: IndexVec<FunctionId, FunctionDefinition>,
    pub modifiers: IndexVec<ModifierId, ModifierDefinition>,
    pub variables: IndexVec<VarId, VariableDeclaration>,
}

/// Something external calls can be dispatched to: a function, or the
/// auto-generated accessor of a public state variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Callable {
    Function(FunctionId),
    Accessor(VarId),
}

#[derive(Debug, Clone)]
pub struct ContractDefinition {
    pub name: String,
    /// Inheritance specifiers as declared, with optional constructor
    /// arguments.
    pub bases: Vec<InheritanceSpecifier>,
    /// All contracts in the inheritance DAG, most-derived first; the first
    /// entry is the contract itself.
    pub linearized_bases: Vec<ContractId>,
    pub state_variables: Vec<VarId>,
    pub functions: Vec<FunctionId>,
    pub modifier_defs: Vec<ModifierId>,
    pub constructor: Option<FunctionId>,
    pub fallback: Option<FunctionId>,
}

#[derive(Debug, Clone)]
pub struct InheritanceSpecifier {
    pub base: ContractId,
    pub arguments: Vec<Expression>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Internal,
}

#[derive(Debug, Clone)]
pub struct FunctionDefinition {
    pub name: String,
    pub visibility: Visibility,
    pub is_constructor: bool,
    pub params: Vec<VarId>,
    pub returns: Vec<VarId>,
    /// Every variable declared anywhere in the body, hoisted to the frame.
    /// All of them are zero-initialized on function entry.
    pub locals: Vec<VarId>,
    pub modifiers: Vec<ModifierInvocation>,
    pub body: Statement,
}

/// Invocation of a modifier (or of a base constructor, which shares the
/// syntactic position) on a function definition.
#[derive(Debug, Clone)]
pub struct ModifierInvocation {
    pub name: String,
    pub arguments: Vec<Expression>,
}

#[derive(Debug, Clone)]
pub struct ModifierDefinition {
    pub name: String,
    pub params: Vec<VarId>,
    pub locals: Vec<VarId>,
    pub body: Statement,
}

#[derive(Debug, Clone)]
pub struct VariableDeclaration {
    pub name: String,
    pub ty: Ty,
    /// Initializer expression; for state variables it runs at deployment.
    pub value: Option<Expression>,
    pub is_state: bool,
    pub is_public: bool,
}

#[derive(Debug, Clone)]
pub enum Statement {
    Block(Vec<Statement>),
    If {
        condition: Expression,
        then_branch: Box<Statement>,
        else_branch: Option<Box<Statement>>,
    },
    While {
        condition: Expression,
        body: Box<Statement>,
    },
    For {
        init: Option<Box<Statement>>,
        condition: Option<Expression>,
        post: Option<Box<Statement>>,
        body: Box<Statement>,
    },
    Break,
    Continue,
    Return(Option<Expression>),
    VariableDeclaration {
        var: VarId,
        value: Option<Expression>,
    },
    Expression(Expression),
    /// The `_` marker inside a modifier body where the wrapped code is
    /// spliced in.
    Placeholder,
}

#[derive(Debug, Clone)]
pub enum Expression {
    Number(U256),
    Bool(bool),
    /// Resolved reference to a local or state variable.
    Identifier(VarId),
    Assignment {
        var: VarId,
        value: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    /// Internal call to another function of the contract or its bases.
    Call {
        function: FunctionId,
        arguments: Vec<Expression>,
    },
    MsgSender,
    MsgValue,
    /// Abort the transaction unless the condition holds.
    Require(Box<Expression>),
    /// Deploy a new instance of another contract of this unit.
    New {
        contract: ContractId,
    },
}

impl Expression {
    pub fn number(value: u64) -> Self {
        Expression::Number(U256::from(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        use BinaryOp::*;
        matches!(self, Eq | NotEq | Lt | Gt | Le | Ge)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Logical negation.
    Not,
    /// Bitwise complement.
    BitNot,
}

impl SourceUnit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical external signature of a callable, e.g. `transfer(address,uint256)`.
    pub fn signature(&self, callable: Callable) -> String {
        match callable {
            Callable::Function(fid) => {
                let function = &self.functions[fid];
                let params: Vec<String> = function
                    .params
                    .iter()
                    .map(|&p| self.variables[p].ty.canonical_name())
                    .collect();
                format!("{}({})", function.name, params.join(","))
            }
            Callable::Accessor(vid) => format!("{}()", self.variables[vid].name),
        }
    }

    /// 4-byte selector of a callable's canonical signature.
    pub fn selector(&self, callable: Callable) -> Selector {
        let hash = keccak256(self.signature(callable).as_bytes());
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&hash[..4]);
        selector
    }

    /// The externally callable interface of a contract: public functions
    /// (including inherited ones, most-derived override winning) and the
    /// accessors of public state variables. Keyed by selector, so iteration
    /// order is the stable selector order.
    pub fn interface_functions(&self, contract: ContractId) -> BTreeMap<Selector, Callable> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut interface = BTreeMap::new();
        for &cid in &self.contracts[contract].linearized_bases {
            let definition = &self.contracts[cid];
            for &fid in &definition.functions {
                let function = &self.functions[fid];
                if function.visibility != Visibility::Public {
                    continue;
                }
                if !seen.insert(function.name.as_str()) {
                    continue;
                }
                let callable = Callable::Function(fid);
                interface.insert(self.selector(callable), callable);
            }
            for &vid in &definition.state_variables {
                let variable = &self.variables[vid];
                if !variable.is_public || !seen.insert(variable.name.as_str()) {
                    continue;
                }
                let callable = Callable::Accessor(vid);
                interface.insert(self.selector(callable), callable);
            }
        }
        interface
    }

    /// The fallback function handling calls that match no selector, searched
    /// through the linearized bases.
    pub fn fallback_function(&self, contract: ContractId) -> Option<FunctionId> {
        self.contracts[contract]
            .linearized_bases
            .iter()
            .find_map(|&cid| self.contracts[cid].fallback)
    }

    /// Resolves a modifier name in the linearized scope of a contract; the
    /// most derived definition wins.
    pub fn modifier_by_name(&self, contract: ContractId, name: &str) -> Option<ModifierId> {
        self.contracts[contract].linearized_bases.iter().find_map(|&cid| {
            self.contracts[cid]
                .modifier_defs
                .iter()
                .copied()
                .find(|&mid| self.modifiers[mid].name == name)
        })
    }

    /// Resolves a contract name in the linearized scope of a contract. Used
    /// to tell base-constructor invocations apart from modifier invocations.
    pub fn base_by_name(&self, contract: ContractId, name: &str) -> Option<ContractId> {
        self.contracts[contract]
            .linearized_bases
            .iter()
            .copied()
            .find(|&cid| self.contracts[cid].name == name)
    }

    /// Parameter types of a callable, in declaration order.
    pub fn callable_parameter_types(&self, callable: Callable) -> Vec<Ty> {
        match callable {
            Callable::Function(fid) => self.functions[fid]
                .params
                .iter()
                .map(|&p| self.variables[p].ty.clone())
                .collect(),
            Callable::Accessor(_) => Vec::new(),
        }
    }

    /// Return types of a callable, in declaration order.
    pub fn callable_return_types(&self, callable: Callable) -> Vec<Ty> {
        match callable {
            Callable::Function(fid) => self.functions[fid]
                .returns
                .iter()
                .map(|&r| self.variables[r].ty.clone())
                .collect(),
            Callable::Accessor(vid) => vec![self.variables[vid].ty.clone()],
        }
    }
}
