// # Capture Ledger Implementations
//
// This module provides implementations of the CaptureLedger trait for
// different persistence strategies.

pub mod file;
pub mod memory;

pub use file::{FileLedger, FileLedgerFactory};
pub use memory::{MemoryLedger, MemoryLedgerFactory};
