use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::id::ServerId;
use crate::pool::Pool;

/// Per-id health state. `Running -> Dead -> Restarting -> Running` on
/// success, or
/// `Restarting -> Dead` while retries continue. Modeled explicitly (rather
/// than inferred ad hoc) following the shape of
/// `other_examples/.../mcp_manager.rs`'s `McpServerStatus`, minus its
/// terminal `Failed` variant — this Monitor never gives up on an
/// auto-started id.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SessionHealth {
    Running,
    Dead,
    Restarting,
}

/// Keeps `auto_started` sessions alive. Runs as a background task with period
/// `health_check_interval`; restart attempts use a doubling backoff capped at
/// eight times the check interval, tracked per id so a flapping session does
/// not starve a healthy one of timely checks.
pub struct Monitor;

impl Monitor {
    pub fn spawn(
        pool: Arc<Pool>,
        check_interval: Duration,
        stop: Arc<Notify>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let max_backoff = check_interval.saturating_mul(8);
            let mut backoff: HashMap<ServerId, Duration> = HashMap::new();
            let mut health: HashMap<ServerId, SessionHealth> = HashMap::new();

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(check_interval) => {}
                    _ = stop.notified() => {
                        info!("monitor stopping");
                        break;
                    }
                }

                let ids = pool.auto_started_ids().await;
                for id in ids {
                    let alive = match pool.get(&id).await {
                        Some(session) => session.is_alive().await,
                        None => false,
                    };

                    if alive {
                        health.insert(id.clone(), SessionHealth::Running);
                        backoff.remove(&id);
                        continue;
                    }

                    let was_running = !matches!(health.get(&id), Some(SessionHealth::Restarting));
                    if was_running {
                        warn!(id = %id, "auto-started session is dead; restarting");
                    }
                    health.insert(id.clone(), SessionHealth::Dead);

                    let delay = backoff.get(&id).copied().unwrap_or(Duration::ZERO);
                    if delay > Duration::ZERO {
                        tokio::time::sleep(delay).await;
                    }

                    health.insert(id.clone(), SessionHealth::Restarting);
                    let Some(session) = pool.get(&id).await else {
                        continue;
                    };
                    let spec = session.spec().clone();
                    pool.stop(&id).await;

                    match pool.start(id.clone(), spec, true).await {
                        Ok(_) => {
                            health.insert(id.clone(), SessionHealth::Running);
                            backoff.remove(&id);
                            info!(id = %id, "auto-started session restarted");
                        }
                        Err(err) => {
                            warn!(id = %id, %err, "restart attempt failed; will retry next interval");
                            health.insert(id.clone(), SessionHealth::Dead);
                            // `stop` above dropped `id` from `auto_started`; a failed `start`
                            // never re-adds it, so without this the next tick would silently
                            // stop watching this id.
                            pool.mark_auto_started(id.clone()).await;
                            let next = match backoff.get(&id) {
                                Some(current) => (*current * 2).min(max_backoff).max(check_interval),
                                None => check_interval,
                            };
                            backoff.insert(id, next);
                        }
                    }
                }
            }
        })
    }
}
