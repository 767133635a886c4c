//! Tests for the creation image: state initialization, constructor argument
//! unpacking, the runtime-embedding epilogue and `new` expressions.

use crate::tests::helpers::{
    DeployedContract, EvmBuilder, assign, bin, compile, compile_with_siblings, count_opcode,
    ident, num, ret, return_data,
};
use alloy_primitives::U256;
use cinder_ast::{BinaryOp, Expression, Ty, builder::AstBuilder};
use revm::primitives::{ExecutionResult, Output};
use std::collections::HashMap;

#[test]
fn creation_image_returns_the_runtime_image() {
    let mut b = AstBuilder::new();
    let c = b.contract("C");
    let r = b.var("r", Ty::UINT256);
    b.function(c, "f").ret_param(r).body(vec![ret(num(1))]);
    let unit = b.build();

    let compiled = compile(&unit, c);

    let mut evm = EvmBuilder::new().with_bytecode(compiled.creation.clone()).build();
    let result = evm.transact_commit().expect("deployment failed");
    match result {
        ExecutionResult::Success { output: Output::Call(bytes), .. } => {
            assert_eq!(bytes.to_vec(), compiled.runtime);
        }
        other => panic!("deployment failed: {other:?}"),
    }
}

#[test]
fn state_initializer_writes_the_slot() {
    let mut b = AstBuilder::new();
    let c = b.contract("G");
    b.public_state_variable(c, "x", Ty::UINT256, Some(num(42)));
    let unit = b.build();

    let compiled = compile(&unit, c);
    let mut deployed = DeployedContract::deploy(&compiled);
    assert_eq!(deployed.call_returning_word("x()", &[]), U256::from(42));
}

#[test]
fn constructor_arguments_are_copied_from_the_code_tail() {
    let mut b = AstBuilder::new();
    let c = b.contract("K");
    let x = b.public_state_variable(c, "x", Ty::UINT256, None);
    let v = b.var("v", Ty::UINT256);
    b.constructor(c).param(v).body(vec![assign(x, ident(v))]);
    let unit = b.build();

    let compiled = compile(&unit, c);
    // the argument copy goes through CODECOPY, besides the runtime embed
    assert!(count_opcode(&compiled.creation_assembly, "CODECOPY") >= 2);

    let mut deployed = DeployedContract::deploy_with_args(&compiled, &[U256::from(42)]);
    assert_eq!(deployed.call_returning_word("x()", &[]), U256::from(42));
}

#[test]
fn two_constructor_arguments() {
    let mut b = AstBuilder::new();
    let c = b.contract("K");
    let x = b.public_state_variable(c, "x", Ty::UINT256, None);
    let a = b.var("a", Ty::UINT256);
    let bb = b.var("b", Ty::UINT256);
    b.constructor(c)
        .param(a)
        .param(bb)
        .body(vec![assign(x, bin(BinaryOp::Sub, ident(a), ident(bb)))]);
    let unit = b.build();

    let compiled = compile(&unit, c);
    let mut deployed =
        DeployedContract::deploy_with_args(&compiled, &[U256::from(50), U256::from(8)]);
    assert_eq!(deployed.call_returning_word("x()", &[]), U256::from(42));
}

#[test]
fn initializers_run_before_the_constructor() {
    let mut b = AstBuilder::new();
    let c = b.contract("K");
    let x = b.public_state_variable(c, "x", Ty::UINT256, Some(num(5)));
    b.constructor(c).body(vec![assign(x, bin(BinaryOp::Add, ident(x), num(1)))]);
    let unit = b.build();

    let compiled = compile(&unit, c);
    let mut deployed = DeployedContract::deploy(&compiled);
    assert_eq!(deployed.call_returning_word("x()", &[]), U256::from(6));
}

#[test]
fn constructor_can_call_other_functions() {
    let mut b = AstBuilder::new();
    let c = b.contract("K");
    let x = b.public_state_variable(c, "x", Ty::UINT256, None);
    let i = b.var("i", Ty::UINT256);
    let o = b.var("o", Ty::UINT256);
    let helper = b
        .function(c, "square")
        .internal()
        .param(i)
        .ret_param(o)
        .body(vec![ret(bin(BinaryOp::Mul, ident(i), ident(i)))]);
    b.constructor(c).body(vec![assign(
        x,
        Expression::Call { function: helper, arguments: vec![num(6)] },
    )]);
    let unit = b.build();

    let compiled = compile(&unit, c);

    // the helper must be emitted into both images: labels are absolute and
    // differ between them
    let public_user = count_opcode(&compiled.runtime_assembly, "MUL");
    assert_eq!(count_opcode(&compiled.creation_assembly, "MUL"), 1);
    assert_eq!(public_user, 0);

    let mut deployed = DeployedContract::deploy(&compiled);
    assert_eq!(deployed.call_returning_word("x()", &[]), U256::from(36));
}

#[test]
fn helper_called_from_both_images_is_emitted_twice() {
    let mut b = AstBuilder::new();
    let c = b.contract("K");
    let x = b.public_state_variable(c, "x", Ty::UINT256, None);
    let i = b.var("i", Ty::UINT256);
    let o = b.var("o", Ty::UINT256);
    let helper = b
        .function(c, "tag")
        .internal()
        .param(i)
        .ret_param(o)
        .body(vec![ret(bin(BinaryOp::BitXor, ident(i), num(0x5a)))]);
    b.constructor(c).body(vec![assign(
        x,
        Expression::Call { function: helper, arguments: vec![num(1)] },
    )]);
    let v = b.var("v", Ty::UINT256);
    let r = b.var("r", Ty::UINT256);
    b.function(c, "f").param(v).ret_param(r).body(vec![ret(Expression::Call {
        function: helper,
        arguments: vec![ident(v)],
    })]);
    let unit = b.build();

    let compiled = compile(&unit, c);
    // one XOR per image, from the same function body
    assert_eq!(count_opcode(&compiled.creation_assembly, "XOR"), 1);
    assert_eq!(count_opcode(&compiled.runtime_assembly, "XOR"), 1);

    let mut deployed = DeployedContract::deploy(&compiled);
    assert_eq!(deployed.call_returning_word("x()", &[]), U256::from(1 ^ 0x5a));
    assert_eq!(
        deployed.call_returning_word("f(uint256)", &[U256::from(0xff)]),
        U256::from(0xff ^ 0x5a)
    );
}

#[test]
fn new_expression_deploys_a_sibling() {
    let mut b = AstBuilder::new();
    let child = b.contract("Child");
    b.public_state_variable(child, "seven", Ty::UINT256, Some(num(7)));
    let factory = b.contract("Factory");
    let r = b.var("r", Ty::Address);
    b.function(factory, "make")
        .ret_param(r)
        .body(vec![ret(Expression::New { contract: child })]);
    let unit = b.build();

    let child_compiled = compile(&unit, child);
    let siblings: HashMap<_, _> = [(child, child_compiled.creation.clone())].into();
    let compiled = compile_with_siblings(&unit, factory, &siblings);

    let mut deployed = DeployedContract::deploy(&compiled);
    let result = deployed.call("make()", &[]);
    let created = return_data(&result);
    assert_eq!(created.len(), 32);
    assert_ne!(U256::from_be_slice(&created), U256::ZERO, "CREATE must return an address");
}
