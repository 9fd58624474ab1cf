use super::handle::Envelope;
use super::policy::{classify, Decision};
use super::Shared;
use crate::sink::ErrorLogEntry;
use crate::types::WorkItem;
use crate::{Error, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// One dispatch worker: dequeue, admit, call, retry, report. Exits on
/// shutdown or once the queue is closed and empty.
pub(crate) async fn run_worker(worker: usize, shared: Arc<Shared>) {
    debug!(worker, "dispatch worker started");
    loop {
        let envelope = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            next = shared.queue.dequeue() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };
        process(worker, &shared, envelope).await;
    }
    debug!(worker, "dispatch worker stopped");
}

async fn process(worker: usize, shared: &Shared, envelope: Envelope) {
    if envelope.cancel.is_cancelled() {
        debug!(worker, item_id = %envelope.item.id, "item cancelled while queued");
        shared.status.record_withdrawn();
        envelope.resolve(Err(Error::Cancelled));
        return;
    }
    shared.status.record_started();

    let outcome = tokio::select! {
        biased;
        _ = envelope.cancel.cancelled() => Err(Error::Cancelled),
        _ = shared.shutdown.cancelled() => Err(Error::Shutdown),
        res = execute(worker, shared, &envelope.item) => res,
    };

    match &outcome {
        Ok(_) => shared.status.record_succeeded(),
        Err(Error::Cancelled) => {
            debug!(worker, item_id = %envelope.item.id, "item cancelled by caller");
            shared.status.record_cancelled();
        }
        Err(Error::Shutdown) => shared.status.record_interrupted(),
        Err(_) => shared.status.record_failed(),
    }

    if let Some(err) = outcome.as_ref().err().filter(|e| e.is_loggable_failure()) {
        let errors = match err {
            Error::AttemptsExhausted { errors, .. } => errors.clone(),
            other => vec![other.to_string()],
        };
        let entry = ErrorLogEntry::new(
            envelope.item.payload.clone(),
            errors,
            envelope.item.metadata.clone(),
        );
        if let Err(e) = shared.sink.append(entry).await {
            error!(worker, item_id = %envelope.item.id, error = %e, "failed to write error log entry");
        }
    }

    envelope.resolve(outcome);
}

async fn execute(worker: usize, shared: &Shared, item: &WorkItem) -> Result<Value> {
    let cost = shared.estimator.estimate(&item.payload, item.endpoint)?;

    let max_tokens = shared.capacity.max_tokens();
    if cost > max_tokens {
        warn!(
            worker,
            item_id = %item.id,
            cost,
            max_tokens,
            "estimated cost exceeds the per-interval token budget; item stays blocked until cancelled"
        );
    }

    let policy = shared.policy;
    let mut attempts_left = policy.max_attempts;
    let mut errors = Vec::new();

    loop {
        shared
            .capacity
            .acquire(1, cost, shared.poll_interval)
            .await;
        attempts_left -= 1;
        let attempt = policy.max_attempts - attempts_left;

        let result = match shared
            .transport
            .send(&item.path, &item.payload, &item.credentials)
            .await
        {
            Ok(response) => classify(response),
            Err(e) => Err(Error::Transport(e)),
        };

        let err = match result {
            Ok(body) => {
                debug!(worker, item_id = %item.id, endpoint = %item.endpoint, attempt, cost, "request succeeded");
                return Ok(body);
            }
            Err(err) => err,
        };

        match &err {
            Error::ProviderRateLimited { .. } => shared.status.record_rate_limited(),
            Error::Provider { .. } => shared.status.record_api_error(),
            _ => shared.status.record_other_error(),
        }
        warn!(worker, item_id = %item.id, attempt, attempts_left, error = %err, "attempt failed");
        errors.push(err.to_string());

        match policy.decide(&err, attempts_left) {
            Decision::Retry { delay } => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Decision::Fail => break,
        }
    }

    let attempts = policy.max_attempts - attempts_left;
    error!(worker, item_id = %item.id, attempts, "request failed after all attempts");
    Err(Error::AttemptsExhausted { attempts, errors })
}
