//! End-to-end deployment scenarios exercising the full pipeline: creation
//! image, runtime installation, dispatch, execution.

use crate::tests::helpers::{
    CALLER_ADDRESS, DeployedContract, assert_stopped, assign, bin, compile, declare, ident,
    if_then, num, require, ret, return_data, while_loop,
};
use alloy_primitives::U256;
use cinder_ast::{BinaryOp, Expression, InheritanceSpecifier, Statement, Ty, builder::AstBuilder};

/// `contract Empty {}` deploys to a runtime that stops unconditionally.
#[test]
fn empty_contract() {
    let mut b = AstBuilder::new();
    let c = b.contract("Empty");
    let unit = b.build();

    let compiled = compile(&unit, c);
    assert_eq!(compiled.runtime, vec![0x00]);

    let mut deployed = DeployedContract::deploy(&compiled);
    assert_stopped(&deployed.call_raw(vec![0x12, 0x34, 0x56, 0x78]));
}

/// `contract G { uint public x = 42; }`: the accessor is dispatched by the
/// selector of `x()` and reads slot 0, which the creation image initialized.
#[test]
fn single_getter() {
    let mut b = AstBuilder::new();
    let c = b.contract("G");
    b.public_state_variable(c, "x", Ty::UINT256, Some(num(42)));
    let unit = b.build();

    let compiled = compile(&unit, c);
    let mut deployed = DeployedContract::deploy(&compiled);
    assert_eq!(deployed.call_returning_word("x()", &[]), U256::from(42));
}

/// `contract A { uint a; constructor(uint v) { a = v; } }`
/// `contract B is A { constructor() A(7) {} }`: A's state initializes
/// first, then A's constructor runs with the literal 7, then B's.
#[test]
fn inherited_constructor() {
    let mut b = AstBuilder::new();
    let a = b.contract("A");
    let a_var = b.public_state_variable(a, "a", Ty::UINT256, None);
    let v = b.var("v", Ty::UINT256);
    b.constructor(a).param(v).body(vec![assign(a_var, ident(v))]);

    let c = b.contract_with_bases(
        "B",
        vec![InheritanceSpecifier { base: a, arguments: vec![] }],
    );
    let order = b.public_state_variable(c, "order", Ty::UINT256, None);
    b.constructor(c).with_modifier("A", vec![num(7)]).body(vec![assign(
        order,
        bin(BinaryOp::Add, bin(BinaryOp::Mul, ident(a_var), num(10)), num(1)),
    )]);
    let unit = b.build();

    let compiled = compile(&unit, c);
    let mut deployed = DeployedContract::deploy(&compiled);
    assert_eq!(deployed.call_returning_word("a()", &[]), U256::from(7));
    // B's constructor observed A's already-assigned state
    assert_eq!(deployed.call_returning_word("order()", &[]), U256::from(71));
}

/// `while (i < 10) { if (i == 5) break; i++; }`: break jumps to the end of
/// the immediately enclosing loop with the entry stack height.
#[test]
fn while_loop_with_break() {
    let mut b = AstBuilder::new();
    let c = b.contract("C");
    let i = b.var("i", Ty::UINT256);
    b.function(c, "f").ret_param(i).body(vec![while_loop(
        bin(BinaryOp::Lt, ident(i), num(10)),
        vec![
            if_then(bin(BinaryOp::Eq, ident(i), num(5)), vec![Statement::Break]),
            assign(i, bin(BinaryOp::Add, ident(i), num(1))),
        ],
    )]);
    let unit = b.build();

    let compiled = compile(&unit, c);
    let mut deployed = DeployedContract::deploy(&compiled);
    assert_eq!(deployed.call_returning_word("f()", &[]), U256::from(5));
}

/// `function f() returns (uint, uint)` populated via the named return
/// parameters: the reshuffle epilogue leaves `[3, 5, return address]`.
#[test]
fn function_with_two_return_values() {
    let mut b = AstBuilder::new();
    let c = b.contract("C");
    let first = b.var("first", Ty::UINT256);
    let second = b.var("second", Ty::UINT256);
    b.function(c, "f")
        .ret_param(first)
        .ret_param(second)
        .body(vec![assign(first, num(3)), assign(second, num(5))]);
    let unit = b.build();

    let compiled = compile(&unit, c);
    let mut deployed = DeployedContract::deploy(&compiled);
    let data = return_data(&deployed.call("f()", &[]));
    assert_eq!(data.len(), 64);
    assert_eq!(U256::from_be_slice(&data[..32]), U256::from(3));
    assert_eq!(U256::from_be_slice(&data[32..]), U256::from(5));
}

/// `modifier onlyBy(address x) { require(msg.sender == x); _; }` wrapping a
/// function body, with the modifier parameter cleaned up on every exit path.
#[test]
fn modifier_with_placeholder() {
    let mut b = AstBuilder::new();
    let c = b.contract("Owned");
    let owner = b.public_state_variable(
        c,
        "owner",
        Ty::Address,
        Some(Expression::Number(U256::from_be_slice(CALLER_ADDRESS.as_slice()))),
    );
    let value = b.public_state_variable(c, "value", Ty::UINT256, None);

    let x = b.var("x", Ty::Address);
    b.modifier(c, "onlyBy").param(x).body(vec![
        require(bin(BinaryOp::Eq, Expression::MsgSender, ident(x))),
        Statement::Placeholder,
    ]);

    let v = b.var("v", Ty::UINT256);
    let r = b.var("r", Ty::UINT256);
    b.function(c, "set")
        .param(v)
        .ret_param(r)
        .with_modifier("onlyBy", vec![ident(owner)])
        .body(vec![
            // early return through the modifier frame
            if_then(bin(BinaryOp::Eq, ident(v), num(0)), vec![ret(num(0xdead))]),
            assign(value, ident(v)),
            assign(r, ident(v)),
        ]);
    let unit = b.build();

    let compiled = compile(&unit, c);
    let mut deployed = DeployedContract::deploy(&compiled);
    assert_eq!(deployed.call_returning_word("set(uint256)", &[U256::ZERO]), U256::from(0xdead));
    assert_eq!(deployed.call_returning_word("set(uint256)", &[U256::from(9)]), U256::from(9));
    assert_eq!(deployed.call_returning_word("value()", &[]), U256::from(9));
}

/// ABI round trip: a function returning its argument hands back exactly the
/// encoded input.
#[test]
fn dispatcher_round_trip() {
    let mut b = AstBuilder::new();
    let c = b.contract("Echo");
    let x = b.var("x", Ty::UINT256);
    let r = b.var("r", Ty::UINT256);
    b.function(c, "echo").param(x).ret_param(r).body(vec![ret(ident(x))]);
    let unit = b.build();

    let compiled = compile(&unit, c);
    let mut deployed = DeployedContract::deploy(&compiled);
    for value in [U256::ZERO, U256::from(1), U256::MAX, U256::from(0x1234567890abcdefu64)] {
        assert_eq!(deployed.call_returning_word("echo(uint256)", &[value]), value);
    }
}

/// A contract using most of the machinery at once: inheritance, modifiers,
/// loops, internal calls and constructor arguments.
#[test]
fn kitchen_sink() {
    let mut b = AstBuilder::new();

    let base = b.contract("Base");
    let total = b.public_state_variable(base, "total", Ty::UINT256, None);
    let seed = b.var("seed", Ty::UINT256);
    b.constructor(base).param(seed).body(vec![assign(total, ident(seed))]);

    let c = b.contract_with_bases(
        "Sink",
        vec![InheritanceSpecifier { base, arguments: vec![num(100)] }],
    );

    let cap = b.var("cap", Ty::UINT256);
    b.modifier(c, "capped").param(cap).body(vec![
        require(bin(BinaryOp::Lt, Expression::MsgValue, ident(cap))),
        Statement::Placeholder,
    ]);

    let t_in = b.var("x", Ty::UINT256);
    let t_out = b.var("r", Ty::UINT256);
    let triple = b
        .function(c, "triple")
        .internal()
        .param(t_in)
        .ret_param(t_out)
        .body(vec![ret(bin(BinaryOp::Mul, ident(t_in), num(3)))]);

    let n = b.var("n", Ty::UINT256);
    let acc = b.var("acc", Ty::UINT256);
    let i = b.var("i", Ty::UINT256);
    b.function(c, "accumulate")
        .param(n)
        .ret_param(acc)
        .with_modifier("capped", vec![num(1000)])
        .body(vec![
            declare(i, num(0)),
            while_loop(
                bin(BinaryOp::Lt, ident(i), ident(n)),
                vec![
                    assign(
                        acc,
                        bin(
                            BinaryOp::Add,
                            ident(acc),
                            Expression::Call { function: triple, arguments: vec![ident(i)] },
                        ),
                    ),
                    assign(i, bin(BinaryOp::Add, ident(i), num(1))),
                ],
            ),
            assign(total, bin(BinaryOp::Add, ident(total), ident(acc))),
        ]);
    let unit = b.build();

    let compiled = compile(&unit, c);
    let mut deployed = DeployedContract::deploy(&compiled);

    // 3 * (0 + 1 + 2 + 3) = 18
    assert_eq!(
        deployed.call_returning_word("accumulate(uint256)", &[U256::from(4)]),
        U256::from(18)
    );
    // seeded with 100 by the base constructor, then incremented
    assert_eq!(deployed.call_returning_word("total()", &[]), U256::from(118));
}
