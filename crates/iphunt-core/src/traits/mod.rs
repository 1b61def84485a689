//! Core traits for the hunt engine
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`CloudNetwork`]: Allocate, list, release and bind public addresses
//! - [`CaptureLedger`]: Durable log of captures
//! - [`LicenseGate`]: Access check and hunt payload from the licensing service

pub mod capture_ledger;
pub mod cloud_network;
pub mod license_gate;

pub use capture_ledger::{Capture, CaptureLedger, CaptureLedgerFactory};
pub use cloud_network::{AttachmentHandle, CloudNetwork, CloudNetworkFactory, PublicAddress};
pub use license_gate::LicenseGate;
