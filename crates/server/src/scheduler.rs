//! Periodic recovery tasks
//!
//! Each task runs on its own interval and only does work while it holds the
//! cluster-wide scheduled lock of that task, so one replica sweeps at a time.

use crate::coordinator::Coordinator;
use crate::error::{Result, ServerError};
use std::sync::Arc;
use std::time::Duration;
use tc_common::{GlobalStatus, ScheduledTask, now_millis};
use tc_session::{GlobalSession, SessionError};
use tc_store::SessionCondition;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const MILLIS_PER_DAY: u64 = 86_400_000;

/// Start the loop of one task
pub fn start(coordinator: Arc<Coordinator>, task: ScheduledTask, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // A slow sweep must not be followed by a burst of catch-up sweeps.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if let Err(e) = run_once(&coordinator, task).await {
                error!(%task, error = %e, "Scheduled task failed");
            }
        }
    })
}

/// Run one sweep of `task` if this replica gets its lock
///
/// Returns whether the sweep ran.
pub async fn run_once(coordinator: &Coordinator, task: ScheduledTask) -> Result<bool> {
    let holder = coordinator.holder();
    if !holder.try_lock(task)? {
        return Ok(false);
    }

    let result = match task {
        ScheduledTask::AsyncCommitting => handle_async_committing(coordinator).await,
        ScheduledTask::RetryCommitting => handle_retry_committing(coordinator).await,
        ScheduledTask::RetryRollbacking => handle_retry_rollbacking(coordinator).await,
        ScheduledTask::TxTimeoutCheck => timeout_check(coordinator),
        ScheduledTask::UndologDelete => undo_log_delete(coordinator).await,
    };

    if let Err(e) = holder.unlock(task) {
        warn!(%task, error = %e, "Failed to release scheduled lock");
    }
    result.map(|()| true)
}

async fn handle_async_committing(coordinator: &Coordinator) -> Result<()> {
    let task = ScheduledTask::AsyncCommitting;
    let sessions = coordinator.holder().async_committing().all_sessions()?;
    for session in sessions {
        if !renew(coordinator, task)? {
            break;
        }
        let result = if coordinator.retry_expired(&session) {
            info!(xid = %session.xid(), "Async commit timed out, giving up");
            coordinator.end_as(&session, GlobalStatus::CommitFailed)
        } else {
            coordinator.do_global_commit(&session, true).await.map(|_| ())
        };
        if let Err(e) = result {
            on_sweep_error(coordinator, task, &session, e);
        }
    }
    Ok(())
}

async fn handle_retry_committing(coordinator: &Coordinator) -> Result<()> {
    let task = ScheduledTask::RetryCommitting;
    let holder = coordinator.holder();

    // A synchronous commit that failed to hand its session over leaves it in
    // `Committing`; adopt it once it is old enough to be abandoned.
    let stranded = holder.find_global_sessions(&SessionCondition::by_statuses([GlobalStatus::Committing]))?;
    for session in stranded.iter().filter(|s| is_dead(s)) {
        match holder.queue_to_retry_commit(session) {
            Ok(()) => info!(xid = %session.xid(), "Adopted an abandoned commit"),
            Err(e) => on_sweep_error(coordinator, task, session, e.into()),
        }
    }

    let sessions = holder.retry_committing().all_sessions()?;
    for session in sessions {
        if !renew(coordinator, task)? {
            break;
        }
        let result = if coordinator.retry_expired(&session) {
            info!(xid = %session.xid(), "Global commit retry timed out, giving up");
            coordinator.end_as(&session, GlobalStatus::CommitFailed)
        } else {
            coordinator.do_global_commit(&session, true).await.map(|_| ())
        };
        if let Err(e) = result {
            on_sweep_error(coordinator, task, &session, e);
        }
    }
    Ok(())
}

async fn handle_retry_rollbacking(coordinator: &Coordinator) -> Result<()> {
    let task = ScheduledTask::RetryRollbacking;
    let sessions = coordinator.holder().retry_rollbacking().all_sessions()?;
    for session in sessions {
        // A synchronous rollback still owns sessions in `Rollbacking` until
        // they have been around long enough to be considered abandoned.
        if session.status() == GlobalStatus::Rollbacking && !is_dead(&session) {
            continue;
        }
        if !renew(coordinator, task)? {
            break;
        }
        let result = if coordinator.retry_expired(&session) {
            let failed = if session.status().is_timeout() {
                GlobalStatus::TimeoutRollbackFailed
            } else {
                GlobalStatus::RollbackFailed
            };
            info!(xid = %session.xid(), status = %failed, "Global rollback retry timed out, giving up");
            coordinator.end_as(&session, failed)
        } else {
            coordinator.do_global_rollback(&session, true).await.map(|_| ())
        };
        if let Err(e) = result {
            on_sweep_error(coordinator, task, &session, e);
        }
    }
    Ok(())
}

/// Close timed-out sessions still in `Begin` and queue their rollback
fn timeout_check(coordinator: &Coordinator) -> Result<()> {
    let holder = coordinator.holder();
    let sessions = holder.find_global_sessions(
        &SessionCondition::by_statuses([GlobalStatus::Begin]).without_branches(),
    )?;

    let mut timed_out = 0;
    for session in sessions {
        if !session.is_timed_out() {
            continue;
        }
        let result = holder.lock_and_execute(&session, |session| {
            // A commit or rollback may have won the race for the lock.
            let Some(current) = holder.find_global_session(&session.xid(), false)? else {
                return Ok(false);
            };
            if !current.is_active() || current.status() != GlobalStatus::Begin {
                return Ok(false);
            }
            current.close()?;
            holder.queue_to_timeout_rollback(&current)?;
            Ok(true)
        });
        match result {
            Ok(true) => {
                timed_out += 1;
                info!(xid = %session.xid(), "Global transaction timed out, rolling back");
            }
            Ok(false) => {}
            Err(e) => on_sweep_error(coordinator, ScheduledTask::TxTimeoutCheck, &session, e.into()),
        }
    }

    if timed_out > 0 {
        debug!(timed_out, "Timeout check finished");
    }
    remove_ended(coordinator)
}

/// Remove sessions whose end was decided but never logged
fn remove_ended(coordinator: &Coordinator) -> Result<()> {
    let terminal: Vec<GlobalStatus> = GlobalStatus::ALL
        .into_iter()
        .filter(|status| status.is_terminal())
        .collect();
    let sessions = coordinator
        .holder()
        .find_global_sessions(&SessionCondition::by_statuses(terminal).without_branches())?;

    for session in sessions {
        match session.end() {
            Ok(()) => info!(xid = %session.xid(), status = %session.status(), "Removed an ended session"),
            Err(e) => error!(xid = %session.xid(), error = %e, "Failed to remove an ended session"),
        }
    }
    Ok(())
}

async fn undo_log_delete(coordinator: &Coordinator) -> Result<()> {
    let days = u64::from(coordinator.retry_config().undo_log_save_days);
    let before_ms = now_millis().saturating_sub(days * MILLIS_PER_DAY);
    coordinator.driver().delete_undo_logs(before_ms).await?;
    debug!(before_ms, "Deleted expired undo logs");
    Ok(())
}

/// Extend the lease of `task` before the next session
///
/// Returns false once another replica holds the lock; the sweep then stops.
fn renew(coordinator: &Coordinator, task: ScheduledTask) -> Result<bool> {
    if coordinator.holder().try_lock(task)? {
        return Ok(true);
    }
    warn!(%task, "Scheduled lock lost during a sweep, stopping");
    Ok(false)
}

fn is_dead(session: &GlobalSession) -> bool {
    let record = session.record();
    now_millis().saturating_sub(record.begin_time_ms) > record.timeout_ms.saturating_mul(2)
}

/// A session that violates the state machine is evicted; anything else waits
/// for the next sweep.
fn on_sweep_error(coordinator: &Coordinator, task: ScheduledTask, session: &GlobalSession, e: ServerError) {
    match e {
        ServerError::Session(SessionError::InvalidTransition { .. })
        | ServerError::Session(SessionError::InvalidStatus { .. }) => {
            error!(%task, xid = %session.xid(), error = %e, "Session in an impossible status");
            coordinator.holder().remove_in_error_state(session);
        }
        e => error!(%task, xid = %session.xid(), error = %e, "Failed to process session"),
    }
}
