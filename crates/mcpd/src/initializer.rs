use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{error, info, warn};

use crate::catalog::{InitializationResult, Outcome, ServerCatalog};
use crate::error::InitError;
use crate::id::ServerId;
use crate::pool::Pool;
use crate::settings::OnInitFailure;

/// Drives the pool from the validated server catalog at boot. Batches of
/// size `parallel_initialization` start concurrently; batches
/// themselves are sequential; the whole boot is bounded by
/// `initialization_timeout_seconds`, not per-entry.
pub async fn run(
    catalog: &ServerCatalog,
    pool: &Pool,
    parallel_initialization: usize,
    initialization_timeout: Duration,
    on_init_failure: OnInitFailure,
) -> Result<InitializationResult, InitError> {
    let entries: Vec<(&String, &crate::spec::ServerSpec)> =
        catalog.iter().filter(|(_, spec)| spec.auto_start).collect();

    if entries.is_empty() {
        return Ok(InitializationResult::default());
    }

    let batches: Vec<Vec<(&String, &crate::spec::ServerSpec)>> = entries
        .chunks(parallel_initialization.max(1))
        .map(|chunk| chunk.to_vec())
        .collect();

    let mut result = InitializationResult::default();

    let outcome = tokio::time::timeout(initialization_timeout, async {
        for batch in &batches {
            let started = join_all(batch.iter().map(|(name, spec)| {
                let name = (*name).clone();
                let spec = (*spec).clone();
                async move {
                    let start = Instant::now();
                    let id = ServerId::from_command(&spec.command, &spec.args);
                    let optional = spec.optional;
                    let outcome = match pool.start(id, spec, true).await {
                        Ok(_) => Outcome::Started,
                        Err(err) => {
                            warn!(server = %name, %err, "auto-start entry failed");
                            Outcome::Failed(err.to_string())
                        }
                    };
                    (name, optional, outcome, start.elapsed())
                }
            }))
            .await;

            for (name, optional, outcome, duration) in started {
                result.record(name, optional, outcome, duration);
            }
        }
    })
    .await;

    if outcome.is_err() {
        let remaining = entries.len() - result.total;
        let recorded: std::collections::HashSet<&str> =
            result.log.iter().map(|entry| entry.name.as_str()).collect();
        for (name, spec) in &entries {
            if !recorded.contains(name.as_str()) {
                result.record((*name).clone(), spec.optional, Outcome::TimedOut, initialization_timeout);
            }
        }
        warn!(
            remaining,
            "initialization deadline exceeded; remaining entries marked as timed out"
        );
    } else {
        info!(
            total = result.total,
            successful = result.successful,
            failed = result.failed,
            "initializer finished"
        );
    }

    if matches!(on_init_failure, OnInitFailure::Fail) {
        for entry in &result.log {
            let reason = match &entry.outcome {
                Outcome::Failed(message) => Some(message.clone()),
                Outcome::TimedOut => Some("initialization deadline exceeded".to_string()),
                Outcome::Started => None,
            };
            let Some(reason) = reason else { continue };
            let is_optional = catalog
                .get(&entry.name)
                .map(|spec| spec.optional)
                .unwrap_or(false);
            if !is_optional {
                error!(server = %entry.name, %reason, "required server failed under fail policy");
                return Err(InitError::RequiredServerFailed {
                    name: entry.name.clone(),
                    reason,
                });
            }
        }
    }

    Ok(result)
}
