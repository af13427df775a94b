use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::state::AppState;

/// Spawns the periodic webhook retry pass and, when configured, the bulk
/// subscription sync.
pub fn start_background_workers(state: AppState) -> Vec<JoinHandle<()>> {
    let mut handles = vec![spawn_retry_loop(state.clone(), state.config.retry.interval)];

    match state.config.sync.interval {
        Some(every) => handles.push(spawn_sync_loop(state, every)),
        None => info!("periodic subscription sync disabled"),
    }

    handles
}

fn spawn_retry_loop(state: AppState, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = state
                .retry_scheduler
                .run_pass(OffsetDateTime::now_utc())
                .await
            {
                error!(?err, "worker: webhook retry pass failed");
            }
        }
    })
}

fn spawn_sync_loop(state: AppState, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick fires immediately; skip it so a restart doesn't sync
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match state.reconciler.sync_all().await {
                Ok(summary) => info!(
                    synced = summary.synced,
                    errors = summary.errors,
                    "worker: scheduled subscription sync finished"
                ),
                Err(err) => error!(?err, "worker: scheduled subscription sync failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::webhook_attempt_repository::WebhookAttemptRepository;
    use crate::models::webhook_attempt::{NewWebhookAttempt, WebhookAttemptStatus};
    use crate::services::webhook_redelivery::MockWebhookRedelivery;
    use crate::state::test_support::TestApp;
    use serde_json::json;

    #[tokio::test]
    async fn retry_loop_drains_due_attempts() {
        let mut redelivery = MockWebhookRedelivery::new();
        redelivery.expect_redeliver().returning(|_| Ok(()));
        let app = TestApp::with_redelivery(redelivery);
        let attempt = app
            .db
            .record_failure(&NewWebhookAttempt {
                stripe_event_id: "evt_loop".into(),
                event_type: "invoice.paid".into(),
                request_payload: json!({"id": "evt_loop"}),
                error_message: "boom".into(),
                next_retry_at: Some(OffsetDateTime::now_utc() - time::Duration::minutes(1)),
            })
            .await
            .unwrap()
            .unwrap();

        let handle = spawn_retry_loop(app.state.clone(), Duration::from_millis(10));
        let mut delivered = false;
        for _ in 0..100 {
            if app.db.attempt(attempt.id).unwrap().status == WebhookAttemptStatus::Success {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert!(delivered);
    }

    #[tokio::test]
    async fn sync_loop_is_skipped_without_interval() {
        let app = TestApp::new();
        let handles = start_background_workers(app.state.clone());
        assert_eq!(handles.len(), 1);
        for handle in handles {
            handle.abort();
        }
    }
}
