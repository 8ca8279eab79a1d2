//! Rejection classification across both channels: receipts for mutations,
//! synchronous errors for views.

use alloy_dyn_abi::{DynSolValue, JsonAbiExt};
use alloy_primitives::{Address, Bytes, U256};
use stagehand_evm::{test_utils::*, *};
use std::time::Duration;

fn deploy_fixture(stage: &Stage, artifact: &str, args: Vec<PlanValue>) -> ContractHandle {
    let artifacts = fixture_set();
    let plan = DeploymentPlan::new().contract(artifact, stage.master(), args);
    let deployment = stage.deploy(&artifacts, &plan).unwrap();
    deployment.facade(artifact).unwrap()
}

fn fee_free_token(stage: &Stage) -> ContractHandle {
    deploy_fixture(
        stage,
        "Token",
        vec![
            PlanValue::address(stage.master()),
            PlanValue::uint(U256::from(1_000_000u64)),
            PlanValue::uint(U256::from(0u64)),
        ],
    )
}

fn fee_token(stage: &Stage) -> ContractHandle {
    deploy_fixture(
        stage,
        "Token",
        vec![
            PlanValue::address(stage.master()),
            PlanValue::uint(U256::from(1_000_000u64)),
            PlanValue::uint(UNIT / U256::from(50)),
        ],
    )
}

fn uint(value: u64) -> DynSolValue {
    DynSolValue::Uint(U256::from(value), 256)
}

#[test]
fn test_program_refusals_classify_as_logic() {
    let stage = Stage::in_process(StageConfig::default());
    let token = fee_free_token(&stage);
    // Funded with ether but holding no tokens.
    let pauper = stage.fresh_account().unwrap();

    let rejection = stage
        .expect_mutation_rejected(
            &token,
            "transfer",
            &[
                DynSolValue::Address(stage.master()),
                DynSolValue::Uint(U256::from(1u64), 256),
            ],
            pauper,
        )
        .unwrap();
    assert_eq!(rejection.kind, RejectionKind::Logic);
    // The fixture reverts without a payload.
    assert!(rejection.data.is_empty());
}

#[test]
fn test_gas_exhaustion_classifies_as_resource_exhaustion() {
    let stage = Stage::in_process(StageConfig::default());
    let spinner = deploy_fixture(&stage, "Spinner", vec![]);

    let rejection = stage
        .expect_mutation_rejected_with(
            &spinner,
            "spin",
            &[],
            stage.master(),
            RejectionKind::ResourceExhaustion,
        )
        .unwrap();
    assert!(!rejection.data.is_empty());
}

#[test]
fn test_exhausted_operations_consume_their_whole_budget() {
    let stage = Stage::in_process(StageConfig::default());
    let spinner = deploy_fixture(&stage, "Spinner", vec![]);

    // Submit raw with a small per-operation budget so the loop dies early.
    let data = spinner.operations()["spin"].function.abi_encode_input(&[]).unwrap();
    let receipt = stage
        .submit(
            SubmitOperation::call(stage.master(), spinner.address(), data.into())
                .with_gas_limit(100_000),
        )
        .unwrap();

    assert!(!receipt.success);
    assert_eq!(receipt.gas_used, 100_000);
    assert_eq!(receipt.rejection.unwrap().kind, RejectionKind::ResourceExhaustion);
}

#[test]
fn test_invalid_instructions_classify_as_fault() {
    let stage = Stage::in_process(StageConfig::default());
    let spinner = deploy_fixture(&stage, "Spinner", vec![]);

    let rejection = stage
        .expect_mutation_rejected_with(
            &spinner,
            "trip",
            &[],
            stage.master(),
            RejectionKind::Fault,
        )
        .unwrap();
    // Faults carry a diagnostic tag rather than a revert payload.
    assert!(!rejection.data.is_empty());
}

#[test]
fn test_pre_execution_failures_classify_as_malformed() {
    let stage = Stage::in_process(StageConfig::default());
    let stranger = Address::with_last_byte(0x77);

    // An unfunded sender moving value fails validation before execution.
    let receipt = stage
        .submit(
            SubmitOperation::call(stranger, stage.master(), Bytes::new())
                .with_value(U256::from(1u64)),
        )
        .unwrap();

    assert!(!receipt.success);
    assert_eq!(receipt.gas_used, 0);
    assert_eq!(receipt.rejection.unwrap().kind, RejectionKind::Malformed);
}

#[test]
fn test_mismatched_kinds_are_findings_not_harness_failures() {
    let stage = Stage::in_process(StageConfig::default());
    let spinner = deploy_fixture(&stage, "Spinner", vec![]);

    // `trip` faults, so expecting a logic rejection is wrong.
    let err = stage
        .expect_mutation_rejected(&spinner, "trip", &[], stage.master())
        .unwrap_err();
    match err {
        HarnessError::Mismatch(RejectionMismatch::WrongKind { operation, expected, actual }) => {
            assert_eq!(operation, "trip");
            assert_eq!(expected, RejectionKind::Logic);
            assert_eq!(actual, RejectionKind::Fault);
        }
        other => panic!("expected a kind mismatch, got {other}"),
    }
}

#[test]
fn test_applied_operations_fail_the_rejection_expectation() {
    let stage = Stage::in_process(StageConfig::default());
    let token = fee_free_token(&stage);

    // A zero-value transfer always goes through.
    let err = stage
        .expect_mutation_rejected(
            &token,
            "transfer",
            &[
                DynSolValue::Address(stage.master()),
                DynSolValue::Uint(U256::ZERO, 256),
            ],
            stage.master(),
        )
        .unwrap_err();
    match err {
        HarnessError::Mismatch(RejectionMismatch::UnexpectedSuccess { operation, outcome }) => {
            assert_eq!(operation, "transfer");
            assert!(outcome.contains("applied using"));
        }
        other => panic!("expected an unexpected-success finding, got {other}"),
    }
}

#[test]
fn test_allowance_shortfalls_classify_as_logic() {
    let stage = Stage::in_process(StageConfig::default());
    let token = fee_token(&stage);
    let spender = stage.fresh_account().unwrap();

    // Approving the bare value leaves nothing for the fee.
    let receipt = token
        .send(stage.master(), "approve", &[DynSolValue::Address(spender), uint(500)])
        .unwrap();
    assert!(receipt.success);

    let rejection = stage
        .expect_mutation_rejected(
            &token,
            "transferFrom",
            &[
                DynSolValue::Address(stage.master()),
                DynSolValue::Address(spender),
                uint(500),
            ],
            spender,
        )
        .unwrap();
    assert_eq!(rejection.kind, RejectionKind::Logic);

    // The refused attempt spent none of the allowance.
    assert_eq!(
        token
            .view_uint(
                "allowance",
                &[DynSolValue::Address(stage.master()), DynSolValue::Address(spender)],
            )
            .unwrap(),
        U256::from(500u64)
    );
}

#[test]
fn test_time_locked_operations_reject_until_the_clock_passes() {
    let stage = Stage::in_process(StageConfig::default());
    let vault = deploy_fixture(&stage, "Vault", vec![PlanValue::address(Address::ZERO)]);

    let receipt = vault.send(stage.master(), "lockFor", &[uint(3_600)]).unwrap();
    assert!(receipt.success);
    assert_eq!(
        vault.view_uint("unlockAt", &[]).unwrap(),
        U256::from(stage.timestamp().unwrap() + 3_600)
    );

    let rejection = stage
        .expect_mutation_rejected(&vault, "release", &[], stage.master())
        .unwrap();
    assert_eq!(rejection.kind, RejectionKind::Logic);

    stage.advance_time(Duration::from_secs(7_200)).unwrap();

    let receipt = vault.send(stage.master(), "release", &[]).unwrap();
    assert!(receipt.success);
    assert_eq!(vault.view_uint("unlockAt", &[]).unwrap(), U256::ZERO);
}

#[test]
fn test_view_rejections_surface_synchronously() {
    let stage = Stage::in_process(StageConfig::default());
    // Views execute from the zero address, which is not the owner here.
    let registry =
        deploy_fixture(&stage, "Registry", vec![PlanValue::address(stage.master())]);

    let rejection = stage.expect_view_rejected(&registry, "requireOwner", &[]).unwrap();
    assert_eq!(rejection.kind, RejectionKind::Logic);
}

#[test]
fn test_view_helpers_refuse_mutating_operations() {
    let stage = Stage::in_process(StageConfig::default());
    let registry =
        deploy_fixture(&stage, "Registry", vec![PlanValue::address(stage.master())]);

    let err = stage
        .expect_view_rejected(
            &registry,
            "setOwner",
            &[DynSolValue::Address(stage.master())],
        )
        .unwrap_err();
    assert!(matches!(
        err,
        HarnessError::Fatal(StageError::OperationKindMismatch {
            expected: OperationKind::View,
            ..
        })
    ));
}

#[test]
fn test_mutation_helpers_refuse_view_operations() {
    let stage = Stage::in_process(StageConfig::default());
    let registry =
        deploy_fixture(&stage, "Registry", vec![PlanValue::address(stage.master())]);

    let err = stage
        .expect_mutation_rejected(&registry, "owner", &[], stage.master())
        .unwrap_err();
    assert!(matches!(
        err,
        HarnessError::Fatal(StageError::OperationKindMismatch {
            expected: OperationKind::Mutating,
            ..
        })
    ));
}
