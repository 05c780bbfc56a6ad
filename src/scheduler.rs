//! Unattended daily backup trigger.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Timelike};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::backup::{self, BackupStore};
use crate::config::BackupSettings;

/// Wall-clock time of the daily run, server-local.
const DAILY_RUN_HOUR: u32 = 2;
const DAILY_RUN_MINUTE: u32 = 0;

const SECONDS_PER_DAY: u32 = 86_400;

/// Spawns the background loop: sleep until the next daily run time, take the
/// shared run lock, back up, log the outcome, apply retention. Failures are
/// logged and the loop carries on to the next day; there is no retry.
pub fn spawn_daily_backup(
    settings: Arc<BackupSettings>,
    store: BackupStore,
    run_lock: Arc<Mutex<()>>,
) {
    tokio::spawn(async move {
        loop {
            let wait = duration_until_next_run(&Local::now());
            info!(seconds = wait.as_secs(), "next scheduled backup");
            tokio::time::sleep(wait).await;

            let _guard = run_lock.lock().await;
            match backup::run_backup(&settings, &store).await {
                Ok(descriptor) => {
                    info!(
                        filename = %descriptor.filename,
                        size = descriptor.size,
                        "scheduled backup completed"
                    );
                    apply_retention(&settings, &store);
                }
                Err(e) => error!(error = %e, "scheduled backup failed"),
            }
        }
    });
}

fn apply_retention(settings: &BackupSettings, store: &BackupStore) {
    let Some(days) = settings.retention_days else {
        return;
    };
    match store.prune(days) {
        Ok(removed) if !removed.is_empty() => {
            info!(removed = removed.len(), days, "pruned expired backups");
        }
        Ok(_) => {}
        Err(e) => error!(error = %e, "retention pruning failed"),
    }
}

/// Seconds until the next occurrence of the daily run time. Computed fresh
/// on every iteration, so clock adjustments only affect a single cycle.
fn duration_until_next_run(now: &impl Timelike) -> Duration {
    let run_at = DAILY_RUN_HOUR * 3600 + DAILY_RUN_MINUTE * 60;
    let now_secs = now.num_seconds_from_midnight();

    let wait = if now_secs < run_at {
        run_at - now_secs
    } else {
        SECONDS_PER_DAY - (now_secs - run_at)
    };
    Duration::from_secs(u64::from(wait))
}
