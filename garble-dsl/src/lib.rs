//! Embedded DSL that lowers SMPC programs to virtual-address bytecode.
//!
//! A script builds values through [`Integer`] handles; every operation
//! allocates a region of the virtual address space for its result and
//! appends one packed instruction to the program file. The apparent graph
//! of values is really a straight-line instruction list plus an allocator:
//! handles are small `(address, width, owned)` records and nothing is
//! retained in memory between operations.
//!
//! Regions are recycled through per-width free bins, so the address space
//! a program touches tracks its live values rather than its total value
//! count.

#![warn(missing_docs)]

mod allocator;
mod error;
mod integer;
mod program;
pub mod sort;

pub use allocator::{AddressSpace, BIN_ELIGIBLE_LIMIT};
pub use error::BuildError;
pub use integer::{Bit, Integer};
pub use program::Program;

pub use garble_types::Party;
