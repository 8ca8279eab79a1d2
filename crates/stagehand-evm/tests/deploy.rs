//! Deployment plan execution: ordering, labels and failure diagnostics.

use alloy_dyn_abi::{DynSolValue, JsonAbiExt};
use alloy_primitives::U256;
use stagehand_evm::{test_utils::*, *};

fn fee_rate() -> U256 {
    // Two percent of each transfer.
    UNIT / U256::from(50)
}

fn staged_fixtures() -> (Stage, ArtifactSet) {
    (Stage::in_process(StageConfig::default()), fixture_set())
}

#[test]
fn test_a_full_stack_deploys_in_plan_order() {
    let (stage, artifacts) = staged_fixtures();
    let master = stage.master();

    let plan = DeploymentPlan::new()
        .contract("Registry", master, vec![PlanValue::address(master)])
        .contract(
            "Token",
            master,
            vec![
                PlanValue::address(master),
                PlanValue::uint(U256::from(1_000_000u64)),
                PlanValue::uint(fee_rate()),
            ],
        )
        .contract("Vault", master, vec![PlanValue::instance("Token")])
        .link(master, "Token", "setVault", vec![PlanValue::instance("Vault")]);

    let deployment = stage.deploy(&artifacts, &plan).unwrap();

    let labels: Vec<_> = deployment.instances().map(|i| i.label.as_str()).collect();
    assert_eq!(labels, ["Registry", "Token", "Vault"]);

    let addresses: Vec<_> = deployment.instances().map(|i| i.address).collect();
    assert_ne!(addresses[0], addresses[1]);
    assert_ne!(addresses[1], addresses[2]);
    assert_ne!(addresses[0], addresses[2]);

    // The vault saw the token's address as a constructor argument.
    let vault = deployment.facade("Vault").unwrap();
    assert_eq!(vault.view_address("token", &[]).unwrap(), deployment.address("Token").unwrap());

    // The linking phase wired the token back to the vault.
    let token = deployment.facade("Token").unwrap();
    assert_eq!(token.view_address("vault", &[]).unwrap(), deployment.address("Vault").unwrap());
    assert_eq!(deployment.links().len(), 1);
    assert_eq!(deployment.links()[0].label, "Token.setVault");

    // Constructor state landed where expected.
    assert_eq!(token.view_address("owner", &[]).unwrap(), master);
    assert_eq!(token.view_uint("totalSupply", &[]).unwrap(), U256::from(1_000_000u64));
    assert_eq!(
        token.view_uint("balanceOf", &[DynSolValue::Address(master)]).unwrap(),
        U256::from(1_000_000u64)
    );
}

#[test]
fn test_labels_allow_several_instances_of_one_artifact() {
    let (stage, artifacts) = staged_fixtures();
    let master = stage.master();

    let plan = DeploymentPlan::new()
        .contract_as("alpha", "Registry", master, vec![PlanValue::address(master)])
        .contract_as("beta", "Registry", master, vec![PlanValue::address(master)]);
    let deployment = stage.deploy(&artifacts, &plan).unwrap();

    assert_ne!(deployment.address("alpha"), deployment.address("beta"));
    for label in ["alpha", "beta"] {
        let registry = deployment.facade(label).unwrap();
        assert_eq!(registry.view_address("owner", &[]).unwrap(), master);
    }

    let report = deployment.to_string();
    assert!(report.contains("Deployment report"));
    assert!(report.contains("alpha"));
    assert!(report.contains("beta"));
}

#[test]
fn test_execution_stops_at_the_failing_step_with_earlier_instances_live() {
    let (stage, artifacts) = staged_fixtures();
    let master = stage.master();

    // Brick's constructor always rejects; Vault never gets attempted.
    let plan = DeploymentPlan::new()
        .contract("Registry", master, vec![PlanValue::address(master)])
        .contract("Brick", master, vec![])
        .contract("Vault", master, vec![PlanValue::instance("Registry")]);

    let (step, deployed, source) = match stage.deploy(&artifacts, &plan).unwrap_err() {
        StageError::Deployment { step, deployed, source } => (step, deployed, source),
        other => panic!("expected a deployment halt, got {other}"),
    };
    assert_eq!(step, "deploy Brick");
    assert_eq!(deployed.len(), 1);
    assert_eq!(deployed[0].label, "Registry");
    assert!(matches!(*source, StageError::Rejected(ref rejection)
        if rejection.kind == RejectionKind::Logic));

    // No rollback: the registry instance still answers.
    let registry = &deployed[0];
    let owner_fn = registry.abi.functions["owner"].first().unwrap();
    let data = owner_fn.abi_encode_input(&[]).unwrap();
    let raw = stage.call(registry.address, data.into()).unwrap();
    assert!(!raw.is_empty());
}

#[test]
fn test_halted_runs_render_their_progress() {
    let (stage, artifacts) = staged_fixtures();
    let master = stage.master();

    let plan = DeploymentPlan::new()
        .contract("Registry", master, vec![PlanValue::address(master)])
        .contract("Brick", master, vec![]);
    let err = stage.deploy(&artifacts, &plan).unwrap_err();

    let rendered = err.to_string();
    assert!(rendered.contains("deploy Brick"));
    assert!(rendered.contains("1 instance(s) live"));
    assert!(rendered.contains("Registry @"));
}

#[test]
fn test_duplicate_labels_are_rejected() {
    let (stage, artifacts) = staged_fixtures();
    let master = stage.master();

    let plan = DeploymentPlan::new()
        .contract_as("twin", "Registry", master, vec![PlanValue::address(master)])
        .contract_as("twin", "Registry", master, vec![PlanValue::address(master)]);

    let (deployed, source) = match stage.deploy(&artifacts, &plan).unwrap_err() {
        StageError::Deployment { deployed, source, .. } => (deployed, source),
        other => panic!("expected a deployment halt, got {other}"),
    };
    assert_eq!(deployed.len(), 1);
    assert!(matches!(*source, StageError::DuplicateLabel { ref label } if label == "twin"));
}

#[test]
fn test_unknown_artifacts_fail_the_step_that_names_them() {
    let (stage, artifacts) = staged_fixtures();

    let plan = DeploymentPlan::new().contract("Ghost", stage.master(), vec![]);
    let (step, source) = match stage.deploy(&artifacts, &plan).unwrap_err() {
        StageError::Deployment { step, source, .. } => (step, source),
        other => panic!("expected a deployment halt, got {other}"),
    };
    assert_eq!(step, "deploy Ghost");
    assert!(matches!(*source, StageError::UnknownArtifact { ref name } if name == "Ghost"));
}

#[test]
fn test_constructor_references_resolve_only_backwards() {
    let (stage, artifacts) = staged_fixtures();
    let master = stage.master();

    // Vault references Token, which is planned later.
    let plan = DeploymentPlan::new()
        .contract("Vault", master, vec![PlanValue::instance("Token")])
        .contract(
            "Token",
            master,
            vec![
                PlanValue::address(master),
                PlanValue::uint(U256::from(1u64)),
                PlanValue::uint(U256::from(0u64)),
            ],
        );

    let (step, source) = match stage.deploy(&artifacts, &plan).unwrap_err() {
        StageError::Deployment { step, source, .. } => (step, source),
        other => panic!("expected a deployment halt, got {other}"),
    };
    assert_eq!(step, "deploy Vault");
    assert!(
        matches!(*source, StageError::UnresolvedReference { ref reference } if reference == "Token")
    );
}

#[test]
fn test_interface_only_artifacts_cannot_be_deployed() {
    let stage = Stage::in_process(StageConfig::default());
    let artifacts = ArtifactSet::from_artifacts([CompiledArtifact {
        name: "Abstract".to_string(),
        abi: std::sync::Arc::new(alloy_json_abi::JsonAbi::default()),
        bytecode: alloy_primitives::Bytes::new(),
    }])
    .unwrap();

    let plan = DeploymentPlan::new().contract("Abstract", stage.master(), vec![]);
    let source = match stage.deploy(&artifacts, &plan).unwrap_err() {
        StageError::Deployment { source, .. } => source,
        other => panic!("expected a deployment halt, got {other}"),
    };
    assert!(
        matches!(*source, StageError::UndeployableArtifact { ref name } if name == "Abstract")
    );
}

#[test]
fn test_an_empty_plan_deploys_nothing() {
    let (stage, artifacts) = staged_fixtures();
    let deployment = stage.deploy(&artifacts, &DeploymentPlan::new()).unwrap();
    assert_eq!(deployment.instances().count(), 0);
    assert!(deployment.links().is_empty());
}
