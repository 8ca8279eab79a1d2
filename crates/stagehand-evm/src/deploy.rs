//! Plan execution and the resulting deployment record.

use crate::{
    artifact::{ArtifactSet, CompiledArtifact},
    attempt::attempt,
    backend::{ExecutionBackend, ExecutionReceipt, SubmitOperation},
    contract::{ContractHandle, OperationKind},
    error::StageError,
    plan::{DeployStep, DeploymentPlan, LinkStep, PlanValue},
};
use alloy_dyn_abi::{DynSolValue, JsonAbiExt};
use alloy_json_abi::{Function, JsonAbi, StateMutability};
use alloy_primitives::{Address, Bytes};
use indexmap::IndexMap;
use std::{cell::RefCell, fmt, rc::Rc, sync::Arc};

/// One live contract instance produced by a deployment step.
#[derive(Clone, Debug)]
pub struct DeployedInstance {
    /// The instance label from the plan.
    pub label: String,
    /// The artifact it was deployed from.
    pub artifact: String,
    /// The address the backend assigned.
    pub address: Address,
    /// The deployment receipt.
    pub receipt: ExecutionReceipt,
    /// The instance's interface description.
    pub abi: Arc<JsonAbi>,
}

/// One applied link call.
#[derive(Clone, Debug)]
pub struct LinkOutcome {
    /// `target.operation` of the link step.
    pub label: String,
    /// The link call's receipt.
    pub receipt: ExecutionReceipt,
}

/// The record of a completed deployment run.
///
/// Keeps instances in deployment order and hands out typed facades over
/// them. The record shares the backend with the [`Stage`](crate::Stage)
/// that produced it, so facades observe later state changes.
#[derive(Clone)]
pub struct Deployment {
    backend: Rc<RefCell<dyn ExecutionBackend>>,
    instances: IndexMap<String, DeployedInstance>,
    links: Vec<LinkOutcome>,
}

impl fmt::Debug for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deployment")
            .field("instances", &self.instances)
            .field("links", &self.links)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Deployment report")?;
        writeln!(f, "=================")?;
        for instance in self.instances.values() {
            writeln!(
                f,
                "{:<24} {}  gas {}",
                instance.label, instance.address, instance.receipt.gas_used
            )?;
        }
        if !self.links.is_empty() {
            writeln!(f)?;
            writeln!(f, "Links")?;
            writeln!(f, "-----")?;
            for link in &self.links {
                writeln!(f, "{:<24} gas {}", link.label, link.receipt.gas_used)?;
            }
        }
        Ok(())
    }
}

impl Deployment {
    /// The deployed instances, in deployment order.
    pub fn instances(&self) -> impl Iterator<Item = &DeployedInstance> {
        self.instances.values()
    }

    /// Look up an instance by label.
    pub fn instance(&self, label: &str) -> Option<&DeployedInstance> {
        self.instances.get(label)
    }

    /// Look up an instance address by label.
    pub fn address(&self, label: &str) -> Option<Address> {
        self.instances.get(label).map(|instance| instance.address)
    }

    /// The applied link calls, in execution order.
    pub fn links(&self) -> &[LinkOutcome] {
        &self.links
    }

    /// Build a typed facade over the instance deployed under `label`.
    pub fn facade(&self, label: &str) -> Result<ContractHandle, StageError> {
        let instance = self
            .instance(label)
            .ok_or_else(|| StageError::UnresolvedReference { reference: label.to_string() })?;
        ContractHandle::new(label, instance.address, &instance.abi, Rc::clone(&self.backend))
    }
}

/// Executes `plan` against `backend`, strictly in plan order.
///
/// Stops at the first failing step. Instances deployed before the failure
/// stay live in backend state and travel inside the returned error.
pub(crate) fn run_plan(
    backend: Rc<RefCell<dyn ExecutionBackend>>,
    artifacts: &ArtifactSet,
    plan: &DeploymentPlan,
) -> Result<Deployment, StageError> {
    let mut instances: IndexMap<String, DeployedInstance> = IndexMap::new();

    for step in plan.steps() {
        let name = format!("deploy {}", step.label);
        let instance =
            attempt(&name, || deploy_step(&backend, artifacts, &instances, step)).map_err(
                |err| match err {
                    StageError::Step { step, source } => StageError::Deployment {
                        step,
                        deployed: instances.values().cloned().collect(),
                        source,
                    },
                    other => other,
                },
            )?;
        instances.insert(instance.label.clone(), instance);
    }

    let mut links = Vec::with_capacity(plan.links().len());
    for link in plan.links() {
        let name = format!("link {}.{}", link.target, link.operation);
        let outcome =
            attempt(&name, || link_step(&backend, &instances, link)).map_err(|err| match err {
                StageError::Step { step, source } => StageError::Link {
                    step,
                    deployed: instances.values().cloned().collect(),
                    source,
                },
                other => other,
            })?;
        links.push(outcome);
    }

    Ok(Deployment { backend, instances, links })
}

fn deploy_step(
    backend: &Rc<RefCell<dyn ExecutionBackend>>,
    artifacts: &ArtifactSet,
    instances: &IndexMap<String, DeployedInstance>,
    step: &DeployStep,
) -> Result<DeployedInstance, StageError> {
    if instances.contains_key(&step.label) {
        return Err(StageError::DuplicateLabel { label: step.label.clone() });
    }
    let artifact = artifacts
        .get(&step.artifact)
        .ok_or_else(|| StageError::UnknownArtifact { name: step.artifact.clone() })?;
    if artifact.bytecode.is_empty() {
        return Err(StageError::UndeployableArtifact { name: step.artifact.clone() });
    }

    let args = resolve_args(&step.args, instances)?;
    let init_code = encode_constructor(artifact, &args)?;
    let receipt = backend.borrow_mut().submit(SubmitOperation::deploy(step.deployer, init_code))?;
    if let Some(rejection) = receipt.rejection.clone() {
        return Err(StageError::Rejected(rejection));
    }
    let address = receipt.contract_address.ok_or(StageError::MissingCreateAddress)?;
    if let Some(existing) = instances.values().find(|instance| instance.address == address) {
        return Err(StageError::AddressCollision { address, label: existing.label.clone() });
    }

    Ok(DeployedInstance {
        label: step.label.clone(),
        artifact: step.artifact.clone(),
        address,
        receipt,
        abi: Arc::clone(&artifact.abi),
    })
}

fn link_step(
    backend: &Rc<RefCell<dyn ExecutionBackend>>,
    instances: &IndexMap<String, DeployedInstance>,
    link: &LinkStep,
) -> Result<LinkOutcome, StageError> {
    let target = instances
        .get(&link.target)
        .ok_or_else(|| StageError::UnresolvedReference { reference: link.target.clone() })?;
    let function = link_function(target, &link.operation)?;
    let args = resolve_args(&link.args, instances)?;
    let data = function.abi_encode_input(&args)?;

    let receipt = backend
        .borrow_mut()
        .submit(SubmitOperation::call(link.caller, target.address, Bytes::from(data)))?;
    if let Some(rejection) = receipt.rejection.clone() {
        return Err(StageError::Rejected(rejection));
    }
    Ok(LinkOutcome { label: format!("{}.{}", link.target, link.operation), receipt })
}

/// Resolves plan arguments, turning instance references into addresses.
fn resolve_args(
    args: &[PlanValue],
    instances: &IndexMap<String, DeployedInstance>,
) -> Result<Vec<DynSolValue>, StageError> {
    args.iter()
        .map(|arg| match arg {
            PlanValue::Literal(value) => Ok(value.clone()),
            PlanValue::InstanceRef(label) => instances
                .get(label)
                .map(|instance| DynSolValue::Address(instance.address))
                .ok_or_else(|| StageError::UnresolvedReference { reference: label.clone() }),
        })
        .collect()
}

/// Appends encoded constructor arguments to the artifact's init code.
fn encode_constructor(
    artifact: &CompiledArtifact,
    args: &[DynSolValue],
) -> Result<Bytes, StageError> {
    let mut init_code = artifact.bytecode.to_vec();
    match artifact.abi.constructor.as_ref() {
        Some(constructor) => init_code.extend_from_slice(&constructor.abi_encode_input(args)?),
        None if args.is_empty() => {}
        None => {
            return Err(StageError::UnexpectedConstructorArgs { artifact: artifact.name.clone() })
        }
    }
    Ok(Bytes::from(init_code))
}

/// Looks up the single mutating declaration for a link operation.
fn link_function<'a>(
    instance: &'a DeployedInstance,
    operation: &str,
) -> Result<&'a Function, StageError> {
    let overloads =
        instance.abi.functions.get(operation).map(Vec::as_slice).unwrap_or_default();
    match overloads {
        [] => Err(StageError::UnknownOperation {
            contract: instance.label.clone(),
            operation: operation.to_string(),
        }),
        [function] => {
            if matches!(
                function.state_mutability,
                StateMutability::Pure | StateMutability::View
            ) {
                return Err(StageError::OperationKindMismatch {
                    operation: operation.to_string(),
                    expected: OperationKind::Mutating,
                    actual: OperationKind::View,
                });
            }
            Ok(function)
        }
        _ => Err(StageError::AmbiguousOperation {
            contract: instance.label.clone(),
            operation: operation.to_string(),
        }),
    }
}
