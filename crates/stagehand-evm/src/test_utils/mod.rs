//! Test utilities: a tiny bytecode assembler and prebuilt contract fixtures.

mod assembler;
mod fixtures;

pub use assembler::*;
pub use fixtures::*;
