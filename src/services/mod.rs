//! Service layer for quota-ledger
//!
//! Services encapsulate the business logic between external callers (the
//! event-management collaborator, manual-correction endpoints, quota views)
//! and the repository layer in `db/`. Each write path owns its transaction
//! boundary; nothing is applied partially.

pub mod coordinator;
pub mod overview;
pub mod resolver;

// Re-exports
pub use coordinator::{AppliedDelta, QuotaAdjustment, QuotaCoordinator, SpendEvent};
pub use overview::{QuotaOverviewService, QuotaScope, QuotaView};
pub use resolver::SharedRewardResolver;

use std::sync::Arc;

use crate::db::LedgerDb;
use crate::schedule::RefreshSchedule;

/// Service container for dependency injection
pub struct Services {
    pub coordinator: Arc<QuotaCoordinator>,
    pub overview: Arc<QuotaOverviewService>,
    pub resolver: Arc<SharedRewardResolver>,
}

impl Services {
    /// Create all services over one shared database handle
    pub fn new(db: Arc<LedgerDb>, schedule: RefreshSchedule) -> Self {
        Self {
            coordinator: Arc::new(QuotaCoordinator::new(db.clone(), schedule)),
            overview: Arc::new(QuotaOverviewService::new(db.clone(), schedule)),
            resolver: Arc::new(SharedRewardResolver::new(db)),
        }
    }
}
