//! Refresh sweeper
//!
//! Periodic background task that scans ledger rows with a pending reset time
//! and resets any that are due, recomputing their next reset instant from the
//! definition's refresh policy. Each due row is reset in its own transaction.
//!
//! Datastore trouble never kills the host process: a failed tick is logged
//! (throttled per error kind) and abandoned; the next tick retries.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::db::{definitions, ledger, LedgerDb, QuotaLedgerRow};
use crate::error::QuotaError;
use crate::schedule::RefreshSchedule;

/// Reset one row if its scheduled refresh has elapsed, inside one transaction.
///
/// This is the single due-check/reset routine: the background sweeper and the
/// synchronous overview read path both call it, so the two cannot diverge.
/// Returns whether the row was reset. A row whose definition has been
/// cascade-deleted is left untouched.
pub fn refresh_row_if_due(
    conn: &mut Connection,
    schedule: &RefreshSchedule,
    row: &QuotaLedgerRow,
    now: DateTime<Utc>,
) -> Result<bool, QuotaError> {
    let Some(stored) = row.next_refresh_at else {
        return Ok(false);
    };
    if !schedule.is_due(stored, now) {
        return Ok(false);
    }

    let tx = conn.transaction()?;

    let Some(def) = definitions::get_definition(&tx, &row.entitlement_ref)? else {
        warn!(
            entitlement = %row.entitlement_ref,
            row = row.id,
            "skipping refresh for ledger row with missing definition"
        );
        return Ok(false);
    };

    let next = def
        .refresh_policy()
        .and_then(|policy| schedule.next_refresh(&policy, now));
    ledger::reset_row(&tx, row.id, def.quota_limit, now, next)?;
    tx.commit()?;

    debug!(
        entitlement = %row.entitlement_ref,
        row = row.id,
        next = ?next,
        "reset ledger row for new refresh period"
    );
    Ok(true)
}

/// Counts for one sweep pass
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepStats {
    pub scanned: usize,
    pub reset: usize,
}

/// Periodic quota refresh task
pub struct RefreshSweeper {
    db: Arc<LedgerDb>,
    schedule: RefreshSchedule,
    interval: Duration,
    /// Minimum gap between repeated error logs of the same kind
    log_cooldown: Duration,
    /// Last time each error kind was logged; lives here, not in process
    /// globals, so throttling state is owned by the sweeper itself
    last_logged: StdMutex<HashMap<&'static str, Instant>>,
    running: Arc<RwLock<bool>>,
}

impl RefreshSweeper {
    pub fn new(
        db: Arc<LedgerDb>,
        schedule: RefreshSchedule,
        interval: Duration,
        log_cooldown: Duration,
    ) -> Self {
        Self {
            db,
            schedule,
            interval,
            log_cooldown,
            last_logged: StdMutex::new(HashMap::new()),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// One full sweep pass: load pending rows, reset the due ones.
    ///
    /// Also callable directly (outside the timer loop) with a pinned `now`.
    pub fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepStats, QuotaError> {
        let pending = self.db.with_conn(ledger::list_pending_refresh)?;

        let mut stats = SweepStats {
            scanned: pending.len(),
            reset: 0,
        };
        for row in &pending {
            let was_reset = self
                .db
                .with_conn_mut(|conn| refresh_row_if_due(conn, &self.schedule, row, now))?;
            if was_reset {
                stats.reset += 1;
            }
        }

        Ok(stats)
    }

    fn tick(&self) {
        match self.sweep_once(Utc::now()) {
            Ok(stats) if stats.reset > 0 => {
                info!(scanned = stats.scanned, reset = stats.reset, "refresh sweep completed");
            }
            Ok(stats) => {
                debug!(scanned = stats.scanned, "refresh sweep found nothing due");
            }
            Err(e) => self.log_throttled(&e),
        }
    }

    /// Log a tick failure, suppressing repeats of the same kind for the
    /// cooldown window to avoid log storms while the datastore is down
    fn log_throttled(&self, err: &QuotaError) {
        let kind = error_kind(err);
        if self.should_log(kind) {
            error!(kind, "refresh sweep failed, will retry next tick: {}", err);
        } else {
            debug!(kind, "refresh sweep failed again (log suppressed): {}", err);
        }
    }

    /// Whether an error of this kind gets a full log line now; records the
    /// log time when it does
    fn should_log(&self, kind: &'static str) -> bool {
        let mut last_logged = match self.last_logged.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let due = last_logged
            .get(kind)
            .map_or(true, |at| at.elapsed() >= self.log_cooldown);
        if due {
            last_logged.insert(kind, Instant::now());
        }
        due
    }

    /// Start the sweep loop
    pub async fn start(self: Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("refresh sweeper already running");
                return;
            }
            *running = true;
        }

        info!(interval = ?self.interval, "starting refresh sweeper");

        let sweeper = Arc::clone(&self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweeper.interval);

            loop {
                interval.tick().await;

                if !*sweeper.running.read().await {
                    info!("refresh sweeper stopped");
                    break;
                }

                sweeper.tick();
            }
        });
    }

    /// Stop the sweep loop after the current tick
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("stopping refresh sweeper");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

fn error_kind(err: &QuotaError) -> &'static str {
    match err {
        QuotaError::Database(_) => "database",
        QuotaError::Io(_) => "io",
        QuotaError::NotFound(_) => "not_found",
        _ => "internal",
    }
}
