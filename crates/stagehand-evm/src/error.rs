//! Error type shared by compilation, deployment and facade dispatch.

use crate::{
    artifact::CompileError,
    backend::{BackendError, Rejection},
    contract::OperationKind,
    deploy::DeployedInstance,
};
use alloy_primitives::Address;

/// Top-level error for staging operations.
///
/// Deployment and linking failures carry the instances that were live when
/// the run stopped, so a failed run still reports what it achieved. No
/// variant is ever retried and nothing is rolled back on failure.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// Artifact compilation failed.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// The execution backend failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Argument or return-value coding against an interface failed.
    #[error("interface coding failed: {0}")]
    Abi(#[from] alloy_dyn_abi::Error),

    /// A named step failed.
    #[error("step `{step}` failed: {source}")]
    Step {
        /// The step that failed.
        step: String,
        /// The underlying failure.
        source: Box<StageError>,
    },

    /// A deployment run stopped at the named plan step.
    ///
    /// Instances deployed by earlier steps stay live and are listed in the
    /// rendered message.
    #[error(
        "deployment halted at `{step}` with {} instance(s) live: {source}{}",
        .deployed.len(),
        render_instances(.deployed)
    )]
    Deployment {
        /// The plan step that failed.
        step: String,
        /// Instances that were deployed before the failure.
        deployed: Vec<DeployedInstance>,
        /// The underlying failure.
        source: Box<StageError>,
    },

    /// A linking run stopped at the named link step.
    ///
    /// All deployments and any earlier links have already been applied.
    #[error(
        "linking halted at `{step}` with {} instance(s) live: {source}{}",
        .deployed.len(),
        render_instances(.deployed)
    )]
    Link {
        /// The link step that failed.
        step: String,
        /// Instances live when linking stopped.
        deployed: Vec<DeployedInstance>,
        /// The underlying failure.
        source: Box<StageError>,
    },

    /// A submitted operation was rejected by the backend.
    #[error("operation rejected: {0}")]
    Rejected(Rejection),

    /// A plan step names an artifact the compiled set does not contain.
    #[error("unknown artifact `{name}`")]
    UnknownArtifact {
        /// The missing artifact name.
        name: String,
    },

    /// A plan step names an artifact that has no deployable bytecode.
    #[error("artifact `{name}` has no deployable bytecode")]
    UndeployableArtifact {
        /// The interface-only artifact name.
        name: String,
    },

    /// Constructor arguments were supplied for an artifact without a
    /// constructor.
    #[error("artifact `{artifact}` takes no constructor arguments")]
    UnexpectedConstructorArgs {
        /// The artifact concerned.
        artifact: String,
    },

    /// Two plan steps deploy under the same instance label.
    #[error("duplicate instance label `{label}`")]
    DuplicateLabel {
        /// The repeated label.
        label: String,
    },

    /// An argument references an instance label that has not been deployed.
    #[error("unresolved instance reference `{reference}`")]
    UnresolvedReference {
        /// The dangling label.
        reference: String,
    },

    /// The backend produced an address that is already taken by a live
    /// instance.
    #[error("address {address} already assigned to instance `{label}`")]
    AddressCollision {
        /// The colliding address.
        address: Address,
        /// The instance that already holds it.
        label: String,
    },

    /// A deployment succeeded but the receipt carries no created address.
    #[error("deployment receipt carries no contract address")]
    MissingCreateAddress,

    /// A facade was asked for an operation its interface does not declare.
    #[error("contract `{contract}` has no operation `{operation}`")]
    UnknownOperation {
        /// The facade's contract name.
        contract: String,
        /// The unknown operation name.
        operation: String,
    },

    /// An operation name resolves to more than one declaration.
    #[error("operation `{operation}` on `{contract}` is overloaded; overloads are not dispatchable")]
    AmbiguousOperation {
        /// The facade's contract name.
        contract: String,
        /// The overloaded operation name.
        operation: String,
    },

    /// An operation was invoked through the wrong channel.
    #[error("operation `{operation}` is {actual}, invoked as {expected}")]
    OperationKindMismatch {
        /// The operation concerned.
        operation: String,
        /// The kind the caller asked for.
        expected: OperationKind,
        /// The kind the interface declares.
        actual: OperationKind,
    },

    /// A view returned a different number of values than the caller
    /// expected.
    #[error("operation `{operation}` returned {actual} value(s), expected {expected}")]
    ReturnArity {
        /// The operation concerned.
        operation: String,
        /// Values the caller expected.
        expected: usize,
        /// Values actually returned.
        actual: usize,
    },

    /// A view's return value has an unexpected type.
    #[error("operation `{operation}` did not return {expected}")]
    ReturnType {
        /// The operation concerned.
        operation: String,
        /// The type the caller expected.
        expected: &'static str,
    },

    /// A contract was required to support a capability it does not expose.
    #[error("contract `{contract}` does not support capability `{capability}`")]
    MissingCapability {
        /// The facade's contract name.
        contract: String,
        /// The missing capability name.
        capability: String,
    },

    /// Every configured account has been handed out.
    #[error("no unused accounts left in the configured set")]
    AccountsExhausted,

    /// An isolated test unit was started while another one held the stage.
    #[error("isolation violated: a test unit is already holding the stage")]
    IsolationViolation,
}

/// Renders one line per live instance for deployment and link diagnostics.
fn render_instances(deployed: &[DeployedInstance]) -> String {
    let mut out = String::new();
    for instance in deployed {
        out.push_str(&format!(
            "\n  {} @ {} (gas {})",
            instance.label, instance.address, instance.receipt.gas_used
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ExecutionReceipt;
    use alloy_json_abi::JsonAbi;
    use alloy_primitives::{Bytes, address};
    use std::sync::Arc;

    fn instance(label: &str) -> DeployedInstance {
        DeployedInstance {
            label: label.to_string(),
            artifact: "Token".to_string(),
            address: address!("00000000000000000000000000000000000000dd"),
            receipt: ExecutionReceipt::applied(
                21_000,
                Vec::new(),
                Bytes::new(),
                Some(address!("00000000000000000000000000000000000000dd")),
            ),
            abi: Arc::new(JsonAbi::default()),
        }
    }

    #[test]
    fn test_deployment_error_lists_live_instances() {
        let err = StageError::Deployment {
            step: "deploy vault".to_string(),
            deployed: vec![instance("registry"), instance("token")],
            source: Box::new(StageError::MissingCreateAddress),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("halted at `deploy vault`"));
        assert!(rendered.contains("2 instance(s) live"));
        assert!(rendered.contains("\n  registry @ "));
        assert!(rendered.contains("\n  token @ "));
        assert!(rendered.contains("(gas 21000)"));
    }

    #[test]
    fn test_step_error_keeps_source_chain() {
        let err = StageError::Step {
            step: "deploy token".to_string(),
            source: Box::new(StageError::UnknownArtifact { name: "Token".to_string() }),
        };
        assert_eq!(err.to_string(), "step `deploy token` failed: unknown artifact `Token`");
        assert!(std::error::Error::source(&err).is_some());
    }
}
