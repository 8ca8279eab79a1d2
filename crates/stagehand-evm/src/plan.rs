//! Declarative deployment plans.
//!
//! A plan is an ordered list of deployment steps followed by a flat, ordered
//! list of link calls. Steps run strictly in list order; the linking phase
//! starts only once every instance exists, so a link may wire any two
//! instances regardless of their deployment order.

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Address, U256};

/// A constructor or link argument.
#[derive(Clone, Debug)]
pub enum PlanValue {
    /// A literal value, passed through as-is.
    Literal(DynSolValue),
    /// The address of an instance deployed by an earlier step, by label.
    InstanceRef(String),
}

impl PlanValue {
    /// A literal address argument.
    pub fn address(value: Address) -> Self {
        Self::Literal(DynSolValue::Address(value))
    }

    /// A literal 256-bit unsigned integer argument.
    pub fn uint(value: impl Into<U256>) -> Self {
        Self::Literal(DynSolValue::Uint(value.into(), 256))
    }

    /// The address of the instance deployed under `label`.
    pub fn instance(label: impl Into<String>) -> Self {
        Self::InstanceRef(label.into())
    }
}

/// One deployment step of a plan.
#[derive(Clone, Debug)]
pub struct DeployStep {
    /// Label the new instance is registered under.
    pub label: String,
    /// Artifact to deploy.
    pub artifact: String,
    /// Constructor arguments.
    pub args: Vec<PlanValue>,
    /// Funded account submitting the deployment.
    pub deployer: Address,
}

/// One call of the linking phase.
#[derive(Clone, Debug)]
pub struct LinkStep {
    /// Account submitting the call.
    pub caller: Address,
    /// Label of the instance receiving the call.
    pub target: String,
    /// Mutating operation to invoke.
    pub operation: String,
    /// Call arguments.
    pub args: Vec<PlanValue>,
}

/// An ordered deployment plan.
///
/// Built up front, then handed to [`Stage::deploy`](crate::Stage::deploy)
/// for execution. Execution stops at the first failing step; earlier steps
/// are not rolled back.
#[derive(Clone, Debug, Default)]
pub struct DeploymentPlan {
    steps: Vec<DeployStep>,
    links: Vec<LinkStep>,
}

impl DeploymentPlan {
    /// An empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a deployment of `artifact`, labelled with the artifact name.
    pub fn contract(self, artifact: &str, deployer: Address, args: Vec<PlanValue>) -> Self {
        self.contract_as(artifact, artifact, deployer, args)
    }

    /// Append a deployment of `artifact` under an explicit instance label.
    ///
    /// Labels let one artifact be deployed several times within a plan.
    pub fn contract_as(
        mut self,
        label: &str,
        artifact: &str,
        deployer: Address,
        args: Vec<PlanValue>,
    ) -> Self {
        self.steps.push(DeployStep {
            label: label.to_string(),
            artifact: artifact.to_string(),
            args,
            deployer,
        });
        self
    }

    /// Append a mutating call to the linking phase.
    pub fn link(mut self, caller: Address, target: &str, operation: &str, args: Vec<PlanValue>) -> Self {
        self.links.push(LinkStep {
            caller,
            target: target.to_string(),
            operation: operation.to_string(),
            args,
        });
        self
    }

    /// The deployment steps, in execution order.
    pub fn steps(&self) -> &[DeployStep] {
        &self.steps
    }

    /// The link calls, in execution order.
    pub fn links(&self) -> &[LinkStep] {
        &self.links
    }

    /// Whether the plan contains no work at all.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.links.is_empty()
    }
}
