//! Shared reward resolver
//!
//! Service wrapper over the mapping table for callers outside a transaction.
//! Code already inside a coordinator transaction uses `db::mappings` directly
//! so resolution and mutation share one atomic unit of work.

use std::sync::Arc;

use tracing::info;

use crate::db::{mappings, LedgerDb};
use crate::error::QuotaError;

pub struct SharedRewardResolver {
    db: Arc<LedgerDb>,
}

impl SharedRewardResolver {
    pub fn new(db: Arc<LedgerDb>) -> Self {
        Self { db }
    }

    /// The canonical scheme for `scheme_id`: its mapped root, or itself
    pub fn resolve_target(&self, scheme_id: &str) -> Result<String, QuotaError> {
        self.db.with_conn(|conn| mappings::resolve_target(conn, scheme_id))
    }

    /// Configure or clear the mapping for `scheme_id`.
    ///
    /// The caller must already have validated that both schemes belong to the
    /// same parent card; ownership is not this component's concern.
    pub fn set_mapping(&self, scheme_id: &str, root: Option<&str>) -> Result<(), QuotaError> {
        self.db.with_conn(|conn| mappings::set_mapping(conn, scheme_id, root))?;
        info!(scheme = scheme_id, root = ?root, "shared reward mapping updated");
        Ok(())
    }
}
