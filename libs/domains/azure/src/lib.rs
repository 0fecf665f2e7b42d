//! Azure Domain
//!
//! Cost-rate collectors for Azure. The AKS collector joins three stores:
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ MachineStore │   │  PriceStore  │   │  DiskStore   │
//! │ VM inventory │   │ retail index │   │ disks+tiers  │
//! └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!        └───────────┬──────┴──────────────────┘
//!                ┌───▼───┐
//!                │  AKS  │  ← per-VM CPU/memory rates, per-disk rates
//!                └───────┘
//! ```
//!
//! Each store is exclusively owned by the collector, refreshed on its own
//! cadence, and read under brief reader locks during a scrape.

pub mod aks;
pub mod arm;
pub mod auth;
pub mod disk;
pub mod error;
pub mod machine;
pub mod models;
pub mod price;
pub mod retail;

pub use aks::{AksCollector, AksIntervals};
pub use arm::{ArmClient, AzureComputeApi};
pub use auth::TokenProvider;
pub use error::{AzureError, AzureResult};
pub use models::{MachineOs, MachinePriority, VirtualMachineInfo};
pub use retail::{RetailPricesApi, RetailPricesClient};
