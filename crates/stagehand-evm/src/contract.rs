//! Typed facades over deployed contract instances.
//!
//! A [`ContractHandle`] is built once from an instance's interface
//! description and dispatches operations by name afterwards. Views and
//! mutations go through separate entry points, so a caller can never
//! accidentally mutate state through a read path. Shared behavior across
//! contracts is described by [`Capability`] sets instead of a type
//! hierarchy; a handle computes the capabilities it supports at
//! construction time.

use crate::{
    backend::{ExecutionBackend, ExecutionReceipt, SubmitOperation},
    error::StageError,
};
use alloy_dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt};
use alloy_json_abi::{Function, JsonAbi, StateMutability};
use alloy_primitives::{Address, Bytes, U256};
use std::{cell::RefCell, collections::BTreeMap, fmt, rc::Rc};

/// Whether an operation reads or mutates global state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, derive_more::Display)]
pub enum OperationKind {
    /// Reads state, executed on the synchronous call path.
    #[display("view")]
    View,
    /// Mutates state, executed through submit-and-receipt.
    #[display("mutating")]
    Mutating,
}

/// One dispatchable operation of a contract interface.
#[derive(Clone, Debug)]
pub struct Operation {
    /// The interface declaration.
    pub function: Function,
    /// The channel this operation dispatches through.
    pub kind: OperationKind,
}

/// A named set of operations that a contract may support.
///
/// Capabilities replace interface inheritance: instead of asking what a
/// contract *is*, callers ask what it *can do*. A contract supports a
/// capability when its interface declares every listed operation with the
/// listed kind.
#[derive(Debug)]
pub struct Capability {
    /// Capability name, used in diagnostics.
    pub name: &'static str,
    /// Required operations and their kinds.
    pub operations: &'static [(&'static str, OperationKind)],
}

impl Capability {
    fn supported_by(&self, operations: &BTreeMap<String, Operation>) -> bool {
        self.operations
            .iter()
            .all(|(name, kind)| operations.get(*name).is_some_and(|op| op.kind == *kind))
    }
}

/// Access control through a single owner account.
pub const OWNABLE: Capability = Capability {
    name: "ownable",
    operations: &[("owner", OperationKind::View), ("setOwner", OperationKind::Mutating)],
};

/// Balance bookkeeping with direct and delegated transfers.
pub const TRANSFERABLE: Capability = Capability {
    name: "transferable",
    operations: &[
        ("totalSupply", OperationKind::View),
        ("balanceOf", OperationKind::View),
        ("transfer", OperationKind::Mutating),
        ("allowance", OperationKind::View),
        ("approve", OperationKind::Mutating),
        ("transferFrom", OperationKind::Mutating),
    ],
};

/// Transfer fees accumulated into a pool and recoverable from it.
pub const FEE_BEARING: Capability = Capability {
    name: "fee-bearing",
    operations: &[
        ("transferFeeRate", OperationKind::View),
        ("setTransferFeeRate", OperationKind::Mutating),
        ("feePool", OperationKind::View),
        ("feeAuthority", OperationKind::View),
        ("withdrawFee", OperationKind::Mutating),
    ],
};

/// Capabilities every handle checks for at construction.
pub const BUILTIN_CAPABILITIES: &[&Capability] = &[&OWNABLE, &TRANSFERABLE, &FEE_BEARING];

/// A typed facade over one deployed instance.
///
/// Holds the dispatch table derived from the interface description and a
/// shared handle to the execution backend. Cloning is cheap and clones talk
/// to the same backend.
#[derive(Clone)]
pub struct ContractHandle {
    name: String,
    address: Address,
    backend: Rc<RefCell<dyn ExecutionBackend>>,
    operations: BTreeMap<String, Operation>,
    capabilities: Vec<&'static Capability>,
}

impl fmt::Debug for ContractHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractHandle")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("operations", &self.operations.keys().collect::<Vec<_>>())
            .field("capabilities", &self.capabilities.iter().map(|c| c.name).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ContractHandle {
    /// Build the dispatch table for `abi`.
    ///
    /// Overloaded operation names are rejected here so that later dispatch
    /// is always unambiguous.
    pub(crate) fn new(
        name: impl Into<String>,
        address: Address,
        abi: &JsonAbi,
        backend: Rc<RefCell<dyn ExecutionBackend>>,
    ) -> Result<Self, StageError> {
        let name = name.into();
        let mut operations = BTreeMap::new();
        for (op_name, overloads) in &abi.functions {
            if overloads.len() > 1 {
                return Err(StageError::AmbiguousOperation {
                    contract: name,
                    operation: op_name.clone(),
                });
            }
            for function in overloads {
                let kind = match function.state_mutability {
                    StateMutability::Pure | StateMutability::View => OperationKind::View,
                    StateMutability::NonPayable | StateMutability::Payable => {
                        OperationKind::Mutating
                    }
                };
                operations.insert(op_name.clone(), Operation { function: function.clone(), kind });
            }
        }
        let capabilities = BUILTIN_CAPABILITIES
            .iter()
            .copied()
            .filter(|capability| capability.supported_by(&operations))
            .collect();
        Ok(Self { name, address, backend, operations, capabilities })
    }

    /// The instance label this handle was built for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The instance's address.
    pub const fn address(&self) -> Address {
        self.address
    }

    /// The dispatchable operations, keyed by name.
    pub const fn operations(&self) -> &BTreeMap<String, Operation> {
        &self.operations
    }

    /// The built-in capabilities this instance supports.
    pub fn capabilities(&self) -> &[&'static Capability] {
        &self.capabilities
    }

    /// Whether the instance supports `capability`.
    ///
    /// Works for any capability value, not just the built-in ones.
    pub fn supports(&self, capability: &Capability) -> bool {
        capability.supported_by(&self.operations)
    }

    /// Require `capability`, failing with a diagnostic naming it.
    pub fn require(&self, capability: &Capability) -> Result<(), StageError> {
        if self.supports(capability) {
            return Ok(());
        }
        Err(StageError::MissingCapability {
            contract: self.name.clone(),
            capability: capability.name.to_string(),
        })
    }

    fn operation(&self, operation: &str) -> Result<&Operation, StageError> {
        self.operations.get(operation).ok_or_else(|| StageError::UnknownOperation {
            contract: self.name.clone(),
            operation: operation.to_string(),
        })
    }

    fn dispatchable(
        &self,
        operation: &str,
        expected: OperationKind,
    ) -> Result<&Operation, StageError> {
        let op = self.operation(operation)?;
        if op.kind != expected {
            return Err(StageError::OperationKindMismatch {
                operation: operation.to_string(),
                expected,
                actual: op.kind,
            });
        }
        Ok(op)
    }

    /// Execute a view operation and decode its return values.
    pub fn view(&self, operation: &str, args: &[DynSolValue]) -> Result<Vec<DynSolValue>, StageError> {
        let op = self.dispatchable(operation, OperationKind::View)?;
        let data = op.function.abi_encode_input(args)?;
        let raw = self.backend.borrow_mut().call(self.address, Bytes::from(data))?;
        Ok(op.function.abi_decode_output(&raw)?)
    }

    /// Execute a view operation that returns exactly one value.
    pub fn view_one(&self, operation: &str, args: &[DynSolValue]) -> Result<DynSolValue, StageError> {
        let mut values = self.view(operation, args)?;
        if values.len() != 1 {
            return Err(StageError::ReturnArity {
                operation: operation.to_string(),
                expected: 1,
                actual: values.len(),
            });
        }
        // Arity was checked above.
        Ok(values.remove(0))
    }

    /// Execute a single-value view returning an address.
    pub fn view_address(&self, operation: &str, args: &[DynSolValue]) -> Result<Address, StageError> {
        self.view_one(operation, args)?.as_address().ok_or_else(|| StageError::ReturnType {
            operation: operation.to_string(),
            expected: "an address",
        })
    }

    /// Execute a single-value view returning a 256-bit unsigned integer.
    pub fn view_uint(&self, operation: &str, args: &[DynSolValue]) -> Result<U256, StageError> {
        self.view_one(operation, args)?
            .as_uint()
            .map(|(value, _)| value)
            .ok_or_else(|| StageError::ReturnType {
                operation: operation.to_string(),
                expected: "an unsigned integer",
            })
    }

    /// Execute a single-value view returning a boolean.
    pub fn view_bool(&self, operation: &str, args: &[DynSolValue]) -> Result<bool, StageError> {
        self.view_one(operation, args)?.as_bool().ok_or_else(|| StageError::ReturnType {
            operation: operation.to_string(),
            expected: "a boolean",
        })
    }

    /// Submit a mutating operation from `sender` and block for its receipt.
    ///
    /// A rejection is reported inside the returned receipt, not as an `Err`.
    pub fn send(
        &self,
        sender: Address,
        operation: &str,
        args: &[DynSolValue],
    ) -> Result<ExecutionReceipt, StageError> {
        let op = self.dispatchable(operation, OperationKind::Mutating)?;
        let data = op.function.abi_encode_input(args)?;
        let receipt = self
            .backend
            .borrow_mut()
            .submit(SubmitOperation::call(sender, self.address, Bytes::from(data)))?;
        Ok(receipt)
    }
}
