// # iphunt-core
//
// Core library for the concurrent public IP acquisition-and-match engine.
//
// ## Architecture Overview
//
// - **matcher**: Pure address-in-ranges test
// - **CloudNetwork**: Trait for allocating, listing, releasing and binding public addresses
// - **CaptureLedger**: Trait for the durable append log of captures
// - **LicenseGate**: Trait for the access check and hunt payload
// - **AccountWorker**: One account's list → match → allocate → bind-or-release loop
// - **Hunter**: Fans out one worker per enabled account and owns the stop signal
// - **ProviderRegistry**: Plugin-based registry for providers and ledgers
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Provider and licensing protocols live behind traits
// 2. **Independent Accounts**: One account's capture never cancels another
// 3. **Explicit Cancellation**: A token handed to each worker, never a global flag
// 4. **Unbounded but Observable Retries**: Backoff is configuration, progress is reported
// 5. **Validate Early**: Configuration is rejected before any worker starts

pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod hunter;
pub mod ledger;
pub mod matcher;
pub mod registry;
pub mod traits;
pub mod worker;

// Re-export core types for convenience
pub use config::{AccountConfig, BackoffConfig, HuntConfig, LedgerConfig, ProviderConfig};
pub use error::{Error, Result, RetryClass};
pub use events::{BackoffReason, HuntEvent};
pub use gate::{ConfigCache, ConfigLoader, Freshness, LoadedConfig, LocalFileGate, OfflinePolicy};
pub use hunter::{HuntReport, HuntStatus, Hunter, HunterHandle, WorkerReport, WorkerStatus};
pub use ledger::{FileLedger, MemoryLedger};
pub use matcher::{AddressRange, matches, matching_range};
pub use registry::ProviderRegistry;
pub use traits::{
    AttachmentHandle, Capture, CaptureLedger, CloudNetwork, LicenseGate, PublicAddress,
};
pub use worker::{WorkerOutcome, WorkerSnapshot, WorkerState};
