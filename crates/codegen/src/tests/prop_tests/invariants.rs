//! Property tests for the universal invariants: determinism, selector
//! dispatch, storage-slot assignment and arithmetic faithfulness.

use crate::tests::helpers::{
    DeployedContract, assert_stopped, assign, bin, compile, declare, ident, if_then, num,
    push_constants_before, ret, selector, while_loop,
};
use alloy_primitives::U256;
use cinder_ast::{BinaryOp, SourceUnit, Ty, builder::AstBuilder};
use proptest::prelude::*;

fn arithmetic_unit(values: &[u64]) -> (SourceUnit, cinder_ast::ContractId) {
    let mut b = AstBuilder::new();
    let c = b.contract("C");
    for (i, &value) in values.iter().enumerate() {
        let r = b.var("r", Ty::UINT256);
        b.function(c, &format!("f{i}")).ret_param(r).body(vec![ret(num(value))]);
    }
    b.public_state_variable(c, "x", Ty::UINT256, Some(num(1)));
    (b.build(), c)
}

proptest! {
    #[test]
    fn compilation_is_deterministic(values in prop::collection::vec(0u64..1000, 1..5)) {
        let (unit, c) = arithmetic_unit(&values);
        let first = compile(&unit, c);
        let second = compile(&unit, c);
        prop_assert_eq!(first.creation, second.creation);
        prop_assert_eq!(first.runtime, second.runtime);
    }

    #[test]
    fn unknown_selectors_stop(raw_selector in any::<[u8; 4]>()) {
        let mut b = AstBuilder::new();
        let c = b.contract("C");
        let r = b.var("r", Ty::UINT256);
        b.function(c, "f").ret_param(r).body(vec![ret(num(1))]);
        let unit = b.build();

        prop_assume!(raw_selector != selector("f()"));

        let compiled = compile(&unit, c);
        let mut deployed = DeployedContract::deploy(&compiled);
        let result = deployed.call_raw(raw_selector.to_vec());
        assert_stopped(&result);
    }

    #[test]
    fn echo_round_trips(value in any::<[u8; 32]>()) {
        let mut b = AstBuilder::new();
        let c = b.contract("C");
        let x = b.var("x", Ty::UINT256);
        let r = b.var("r", Ty::UINT256);
        b.function(c, "echo").param(x).ret_param(r).body(vec![ret(ident(x))]);
        let unit = b.build();

        let compiled = compile(&unit, c);
        let mut deployed = DeployedContract::deploy(&compiled);
        let word = U256::from_be_slice(&value);
        prop_assert_eq!(deployed.call_returning_word("echo(uint256)", &[word]), word);
    }

    #[test]
    fn storage_slots_count_up_from_zero(count in 1usize..8) {
        let mut b = AstBuilder::new();
        let c = b.contract("C");
        for i in 0..count {
            b.state_variable(c, &format!("v{i}"), Ty::UINT256, Some(num(i as u64 + 1)));
        }
        let unit = b.build();

        let compiled = compile(&unit, c);
        let slots = push_constants_before(&compiled.creation_assembly, "SSTORE");
        let expected: Vec<U256> = (0..count).map(U256::from).collect();
        prop_assert_eq!(slots, expected);
    }

    #[test]
    fn binary_arithmetic_matches_the_host(a in any::<u64>(), d in 1u64..=u64::MAX) {
        let mut b = AstBuilder::new();
        let c = b.contract("C");
        let x = b.var("x", Ty::UINT256);
        let y = b.var("y", Ty::UINT256);
        let r1 = b.var("r", Ty::UINT256);
        b.function(c, "quot").param(x).param(y).ret_param(r1)
            .body(vec![ret(bin(BinaryOp::Div, ident(x), ident(y)))]);
        let r2 = b.var("r", Ty::UINT256);
        b.function(c, "rem").param(x).param(y).ret_param(r2)
            .body(vec![ret(bin(BinaryOp::Mod, ident(x), ident(y)))]);
        let unit = b.build();

        let compiled = compile(&unit, c);
        let mut deployed = DeployedContract::deploy(&compiled);
        let args = [U256::from(a), U256::from(d)];
        prop_assert_eq!(
            deployed.call_returning_word("quot(uint256,uint256)", &args),
            U256::from(a / d)
        );
        prop_assert_eq!(
            deployed.call_returning_word("rem(uint256,uint256)", &args),
            U256::from(a % d)
        );
    }

    #[test]
    fn comparisons_match_the_host(a in any::<u64>(), b_val in any::<u64>()) {
        let mut b = AstBuilder::new();
        let c = b.contract("C");
        let x = b.var("x", Ty::UINT256);
        let y = b.var("y", Ty::UINT256);
        let r = b.var("r", Ty::UINT256);
        b.function(c, "lt").param(x).param(y).ret_param(r).body(vec![
            if_then(bin(BinaryOp::Lt, ident(x), ident(y)), vec![ret(num(1))]),
            ret(num(0)),
        ]);
        let unit = b.build();

        let compiled = compile(&unit, c);
        let mut deployed = DeployedContract::deploy(&compiled);
        let got = deployed.call_returning_word(
            "lt(uint256,uint256)",
            &[U256::from(a), U256::from(b_val)],
        );
        prop_assert_eq!(got, U256::from(u64::from(a < b_val)));
    }

    #[test]
    fn loops_terminate_with_the_expected_sum(n in 0u64..32) {
        let mut b = AstBuilder::new();
        let c = b.contract("C");
        let limit = b.var("limit", Ty::UINT256);
        let s = b.var("s", Ty::UINT256);
        let i = b.var("i", Ty::UINT256);
        b.function(c, "sum").param(limit).ret_param(s).body(vec![
            declare(i, num(0)),
            while_loop(
                bin(BinaryOp::Lt, ident(i), ident(limit)),
                vec![
                    assign(s, bin(BinaryOp::Add, ident(s), ident(i))),
                    assign(i, bin(BinaryOp::Add, ident(i), num(1))),
                ],
            ),
        ]);
        let unit = b.build();

        let compiled = compile(&unit, c);
        let mut deployed = DeployedContract::deploy(&compiled);
        let expected = if n == 0 { 0 } else { n * (n - 1) / 2 };
        prop_assert_eq!(
            deployed.call_returning_word("sum(uint256)", &[U256::from(n)]),
            U256::from(expected)
        );
    }
}
