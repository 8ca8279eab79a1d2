//! A small bytecode assembler with labelled jumps.

use alloy_primitives::{Address, Bytes, U256};
use revm::bytecode::opcode::{
    CALLDATALOAD, DUP1, EQ, JUMP, JUMPDEST, JUMPI, KECCAK256, MLOAD, MSTORE, PUSH0, PUSH2,
    RETURN, REVERT, SHR, SLOAD, SSTORE, STOP,
};
use std::collections::BTreeMap;

/// A builder for hand-assembled bytecode.
///
/// Beyond raw opcode appends it tracks named positions, so forward jumps
/// and code-copy offsets can be written before their targets exist. Jump
/// targets are encoded as two-byte pushes and patched in [`build`].
///
/// [`build`]: Self::build
#[derive(Debug, Default)]
pub struct Assembler {
    code: Vec<u8>,
    labels: BTreeMap<&'static str, usize>,
    fixups: Vec<(usize, &'static str)>,
}

impl Assembler {
    /// An empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current code length.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Whether no code has been emitted yet.
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Append a single opcode or raw byte.
    pub fn op(mut self, opcode: u8) -> Self {
        self.code.push(opcode);
        self
    }

    /// Append a series of opcodes or raw bytes.
    pub fn ops(mut self, items: impl IntoIterator<Item = u8>) -> Self {
        self.code.extend(items);
        self
    }

    /// Append a PUSH of the given bytes.
    pub fn push(mut self, bytes: &[u8]) -> Self {
        assert!(bytes.len() <= 32, "can push at most 32 bytes");
        self.code.push(PUSH0 + bytes.len() as u8);
        self.code.extend_from_slice(bytes);
        self
    }

    /// Append a PUSH0.
    pub fn push0(self) -> Self {
        self.op(PUSH0)
    }

    /// Append a minimal-width PUSH of an integer.
    pub fn push_int(self, value: u64) -> Self {
        if value == 0 {
            return self.push0();
        }
        let bytes = value.to_be_bytes();
        let skip = bytes.iter().take_while(|byte| **byte == 0).count();
        self.push(&bytes[skip..])
    }

    /// Append a full-width PUSH of a 256-bit value.
    pub fn push_u256(self, value: U256) -> Self {
        self.push(&value.to_be_bytes::<32>())
    }

    /// Append a PUSH of an address.
    pub fn push_address(self, address: Address) -> Self {
        self.push(address.as_slice())
    }

    /// Record the current position under `name` and emit a JUMPDEST.
    pub fn label(self, name: &'static str) -> Self {
        self.mark(name).op(JUMPDEST)
    }

    /// Record the current position under `name` without emitting anything.
    ///
    /// For positions that are copied from rather than jumped to.
    pub fn mark(mut self, name: &'static str) -> Self {
        let previous = self.labels.insert(name, self.code.len());
        assert!(previous.is_none(), "label `{name}` defined twice");
        self
    }

    /// Append a two-byte PUSH of the position recorded under `name`.
    ///
    /// The position is patched in at [`build`](Self::build) time, so the
    /// label may be defined later.
    pub fn push_label(mut self, name: &'static str) -> Self {
        self.code.push(PUSH2);
        self.fixups.push((self.code.len(), name));
        self.code.extend([0xFF, 0xFF]);
        self
    }

    /// Append an unconditional jump to `name`.
    pub fn jump(self, name: &'static str) -> Self {
        self.push_label(name).op(JUMP)
    }

    /// Append a jump to `name` taken when the value under the pushed target
    /// is nonzero.
    pub fn jumpi(self, name: &'static str) -> Self {
        self.push_label(name).op(JUMPI)
    }

    /// Store the top of the stack to memory at `offset`.
    pub fn mem_store(self, offset: u64) -> Self {
        self.push_int(offset).op(MSTORE)
    }

    /// Load the memory word at `offset` onto the stack.
    pub fn mem_load(self, offset: u64) -> Self {
        self.push_int(offset).op(MLOAD)
    }

    /// Store the top of the stack to storage `slot`.
    pub fn slot_store(self, slot: u64) -> Self {
        self.push_int(slot).op(SSTORE)
    }

    /// Load storage `slot` onto the stack.
    pub fn slot_load(self, slot: u64) -> Self {
        self.push_int(slot).op(SLOAD)
    }

    /// Replace the key on top of the stack with its slot in the mapping
    /// rooted at `slot`.
    ///
    /// Computes `keccak256(key ++ slot)` the way the usual storage layout
    /// does, scratching memory words 0 and 1.
    pub fn map_slot(self, slot: u64) -> Self {
        self.mem_store(0)
            .push_int(slot)
            .mem_store(0x20)
            .push_int(0x40)
            .push0()
            .op(KECCAK256)
    }

    /// Replace the key on top of the stack and the slot beneath it with the
    /// key's slot in the mapping rooted there.
    ///
    /// The nested-mapping companion of [`map_slot`](Self::map_slot): the
    /// root is a computed slot already on the stack rather than a constant.
    pub fn map_slot_nested(self) -> Self {
        self.mem_store(0).mem_store(0x20).push_int(0x40).push0().op(KECCAK256)
    }

    /// Load the four-byte operation selector onto the stack.
    pub fn load_selector(self) -> Self {
        self.push0().op(CALLDATALOAD).push_int(0xE0).op(SHR)
    }

    /// Jump to `target` when the selector on top of the stack matches,
    /// keeping the selector for the next comparison.
    pub fn dispatch(self, selector: [u8; 4], target: &'static str) -> Self {
        self.op(DUP1).push(&selector).op(EQ).jumpi(target)
    }

    /// Load the `index`-th 32-byte call argument onto the stack.
    pub fn load_arg(self, index: u64) -> Self {
        self.push_int(4 + 32 * index).op(CALLDATALOAD)
    }

    /// Return the top of the stack as a single 32-byte word.
    pub fn return_word(self) -> Self {
        self.mem_store(0).push_int(0x20).push0().op(RETURN)
    }

    /// Append a REVERT with empty data.
    pub fn revert(self) -> Self {
        self.ops([PUSH0, PUSH0, REVERT])
    }

    /// Append a STOP.
    pub fn stop(self) -> Self {
        self.op(STOP)
    }

    /// Patch all recorded label positions and build the bytecode.
    ///
    /// Panics on labels that were pushed but never defined.
    pub fn build(self) -> Bytes {
        let mut code = self.code;
        for (position, name) in self.fixups {
            let Some(&target) = self.labels.get(name) else {
                panic!("undefined label `{name}`");
            };
            assert!(target <= usize::from(u16::MAX), "label `{name}` beyond two-byte range");
            let bytes = (target as u16).to_be_bytes();
            code[position] = bytes[0];
            code[position + 1] = bytes[1];
        }
        code.into()
    }
}
