//! This example deploys a registry, a fee-charging token and a vault from a
//! single declarative plan, then exercises the stack through typed facades:
//! reads and mutations, a snapshot-isolated unit, a rejection assertion, and
//! a warp of the chain clock past the vault's time lock.
//!
//! The orchestrator reports per-step progress through `tracing`; the example
//! defaults the filter to `info` so those lines are visible, and `RUST_LOG`
//! overrides it as usual.

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::U256;
use stagehand_evm::{
    test_utils::{fixture_sources, FixtureCompiler},
    DeploymentPlan, PlanValue, Stage, StageConfig, StageError, UNIT,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let stage = Stage::in_process(StageConfig::default());
    let master = stage.master();

    println!("=== Deploying the stack ===\n");

    let artifacts = stage.compile(&FixtureCompiler, &fixture_sources())?;
    let plan = DeploymentPlan::new()
        .contract("Registry", master, vec![PlanValue::address(master)])
        .contract(
            "Token",
            master,
            vec![
                PlanValue::address(master),
                PlanValue::uint(U256::from(1_000_000u64)),
                // Two percent transfer fee.
                PlanValue::uint(UNIT / U256::from(50)),
            ],
        )
        .contract("Vault", master, vec![PlanValue::instance("Token")])
        .link(master, "Token", "setVault", vec![PlanValue::instance("Vault")]);
    let deployment = stage.deploy(&artifacts, &plan)?;

    println!("{deployment}");

    let token = deployment.facade("Token")?;
    println!("Token capabilities:");
    for capability in token.capabilities() {
        println!("  {}", capability.name);
    }
    println!();

    println!("=== Moving tokens ===\n");

    let alice = stage.fresh_account()?;
    let receipt = token.send(
        master,
        "transfer",
        &[DynSolValue::Address(alice), DynSolValue::Uint(U256::from(10_000u64), 256)],
    )?;
    assert!(receipt.success, "funding transfer should apply");
    println!("  transfer applied using {} gas", receipt.gas_used);
    println!(
        "  alice balance: {}",
        token.view_uint("balanceOf", &[DynSolValue::Address(alice)])?
    );
    println!("  fee pool:      {}", token.view_uint("feePool", &[])?);
    println!();

    println!("=== Running an isolated unit ===\n");

    let before = token.view_uint("balanceOf", &[DynSolValue::Address(alice)])?;
    let inside = stage.isolated(|| -> Result<U256, StageError> {
        let receipt = token.send(
            alice,
            "transfer",
            &[DynSolValue::Address(master), DynSolValue::Uint(U256::from(5_000u64), 256)],
        )?;
        assert!(receipt.success, "transfer inside the unit should apply");
        token.view_uint("balanceOf", &[DynSolValue::Address(alice)])
    })??;
    let after = token.view_uint("balanceOf", &[DynSolValue::Address(alice)])?;
    println!("  inside the unit: alice held {inside}");
    println!("  after the unit:  alice holds {after}");
    assert_eq!(after, before, "the unit's mutations should be rolled back");
    println!();

    println!("=== Expecting a rejection ===\n");

    // Funded with ether, holding no tokens.
    let pauper = stage.fresh_account()?;
    let rejection = stage.expect_mutation_rejected(
        &token,
        "transfer",
        &[DynSolValue::Address(master), DynSolValue::Uint(U256::from(1u64), 256)],
        pauper,
    )?;
    println!("  transfer from an empty account: {rejection}");
    println!();

    println!("=== Warping the clock ===\n");

    let vault = deployment.facade("Vault")?;
    let receipt =
        vault.send(master, "lockFor", &[DynSolValue::Uint(U256::from(86_400u64), 256)])?;
    assert!(receipt.success, "arming the lock should apply");
    println!("  lock armed until {}", vault.view_uint("unlockAt", &[])?);

    let rejection = stage.expect_mutation_rejected(&vault, "release", &[], master)?;
    println!("  release a day early: {rejection}");

    stage.advance_time(Duration::from_secs(2 * 86_400))?;
    let receipt = vault.send(master, "release", &[])?;
    assert!(receipt.success, "release after the warp should apply");
    println!("  release after warping two days: applied using {} gas", receipt.gas_used);

    Ok(())
}
