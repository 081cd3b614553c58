use std::sync::Weak;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::session::{Session, SessionInner};

/// Background task that purges expired messages for one session.
///
/// Ticks every `period`, starting one period after spawn (the session sweeps
/// once while opening). Holds only a weak reference, so dropping the last
/// session handle ends it; `cancel` ends it on close. Each tick also nudges
/// the writer to retry snapshots that failed to save.
pub(crate) async fn run_sweep_loop(
    session: Weak<SessionInner>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let Some(inner) = session.upgrade() else {
            break;
        };
        let session = Session::from_inner(inner);
        session.retry_failed_writes();
        session.sweep().await;
    }

    debug!("Sweep loop stopped");
}
