//! Contract deployment orchestration and snapshot-isolated testing over an
//! in-process EVM.
//!
//! A [`Stage`] owns an [`ExecutionBackend`] and executes declarative
//! [`DeploymentPlan`]s against it: deployments first, then a flat linking
//! phase, stopping at the first failure. Deployed instances are driven
//! through [`ContractHandle`] facades, and [`Stage::isolated`] brackets
//! test units between a state checkpoint and its restore.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![allow(unused_imports)]

mod config;
pub use config::*;

mod error;
pub use error::*;

mod attempt;
pub use attempt::*;

mod artifact;
pub use artifact::*;

mod solc;
pub use solc::*;

mod backend;
pub use backend::*;

mod plan;
pub use plan::*;

mod contract;
pub use contract::*;

mod deploy;
pub use deploy::*;

mod stage;
pub use stage::*;

mod harness;
pub use harness::*;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
