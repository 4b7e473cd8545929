//! Quota Ledger - usage tracking for percentage-based reward entitlements
//!
//! Entitlements accrue reward against spending, reset on a schedule, and must
//! stay consistent under concurrent writes and deletions.
//!
//! ## Architecture
//!
//! ```text
//! Spend event (external)        Timer
//!     |                           |
//! QuotaCoordinator          RefreshSweeper
//!     |                           |
//!     +--------- shared ----------+
//!     |      reset routine        |
//!     v                           v
//!   db/ (rusqlite, one transaction per mutation)
//! ```
//!
//! - `reward` - pure decimal reward math (rounding policies, marginal
//!   statement-cycle computation)
//! - `schedule` - next-refresh instants in a fixed reference timezone
//! - `db` - definitions, ledger rows, shared reward mapping edges
//! - `services` - transaction coordinator, overview reads, mapping resolver
//! - `sweeper` - periodic due-check/reset task
//!
//! HTTP routing, catalog CRUD, and persistence beyond SQLite are external
//! collaborators; this crate owns the ledger semantics only.

pub mod config;
pub mod db;
pub mod error;
pub mod reward;
pub mod schedule;
pub mod services;
pub mod sweeper;

// Re-exports
pub use config::Config;
pub use db::{CalculationBasis, DefinitionOwner, EntitlementDefinition, LedgerContext, LedgerDb,
             NewDefinition, QuotaLedgerRow};
pub use error::QuotaError;
pub use reward::{marginal_reward, reward, total_reward, RewardBreakdown, RewardComponent, RoundingPolicy};
pub use schedule::{RefreshPolicy, RefreshSchedule};
pub use services::{QuotaAdjustment, QuotaCoordinator, QuotaOverviewService, QuotaScope, QuotaView,
                   Services, SharedRewardResolver, SpendEvent};
pub use sweeper::RefreshSweeper;
