//! Periodic scheduling, and the single-slot lock that serializes every
//! session attempt.
//!
//! The scheduler and the HTTP trigger are both producers of session
//! attempts. The lock is a one-capacity mailbox holding a single token:
//! acquisition is a non-blocking take, so "an update is already running"
//! is a first-class skipped outcome, never a wait.

use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use log::{debug, error, info};
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::Notify;

use crate::config::SessionParams;
use crate::filter::Filter;
use crate::metrics::{Metric, MetricsRegistry};
use crate::notify::Notifier;
use crate::registry::RegistryClient;
use crate::runtime::Client;
use crate::session;

pub struct UpdateLock {
    tx: Sender<()>,
    rx: tokio::sync::Mutex<Receiver<()>>,
}

impl UpdateLock {
    pub fn new() -> Self {
        let (tx, rx) = channel(1);
        tx.try_send(()).expect("fresh lock slot cannot be full");
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Non-blocking take of the lock token. `None` means another update
    /// holds it and this attempt should be skipped.
    pub async fn try_acquire(&self) -> Option<LockToken<'_>> {
        let mut rx = self.rx.lock().await;
        rx.try_recv().ok().map(|()| LockToken { tx: &self.tx })
    }

    /// Wait for any in-flight update to release the token. Used on the
    /// shutdown path so sessions are drained, never aborted.
    pub async fn drain(&self) {
        let mut rx = self.rx.lock().await;
        if rx.recv().await.is_some() {
            let _ = self.tx.try_send(());
        }
    }
}

impl Default for UpdateLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the token to the slot when dropped, failure paths included.
pub struct LockToken<'a> {
    tx: &'a Sender<()>,
}

impl Drop for LockToken<'_> {
    fn drop(&mut self) {
        let _ = self.tx.try_send(());
    }
}

/// Outcome of one session attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Completed(Metric),
    Skipped,
}

/// Everything one session attempt needs, shared between the scheduler and
/// the HTTP trigger. The parameters are built once at startup and never
/// change.
pub struct Updater {
    pub client: Box<dyn Client>,
    pub registry: RegistryClient,
    pub filter: Filter,
    pub params: SessionParams,
    pub lock: UpdateLock,
    pub metrics: Arc<MetricsRegistry>,
    pub notifier: Notifier,
}

impl Updater {
    /// Try to run one session, optionally narrowed to the given image
    /// references. Exactly one metric is registered per attempt.
    pub async fn try_run(&self, images: Option<Vec<String>>) -> Attempt {
        let Some(_token) = self.lock.try_acquire().await else {
            debug!("Skipped update, another update is already running");
            self.metrics.register(None);
            return Attempt::Skipped;
        };

        let filter = match images {
            Some(images) => self.filter.clone().narrow_to_images(images),
            None => self.filter.clone(),
        };

        let _batch = self.notifier.begin();
        let metric = match session::run(
            self.client.as_ref(),
            &self.registry,
            &filter,
            &self.params,
            &self.notifier,
        )
        .await
        {
            Ok(report) => {
                let metric = report.metric();
                info!(
                    "Session done: {} scanned, {} updated, {} failed",
                    metric.scanned, metric.updated, metric.failed
                );
                metric
            }
            Err(e) => {
                error!("Update session failed: {e}");
                Metric::default()
            }
        };
        self.metrics.register(Some(&metric));
        Attempt::Completed(metric)
    }
}

/// Fire sessions on the cron schedule until shutdown is signaled, then
/// drain the in-flight session and return.
pub async fn run_on_schedule(updater: Arc<Updater>, schedule: Schedule, shutdown: Arc<Notify>) {
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            info!("Schedule has no upcoming runs");
            break;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                updater.try_run(None).await;
                if let Some(after) = schedule.upcoming(Utc).next() {
                    debug!("Scheduled next run: {after}");
                }
            }
            _ = shutdown.notified() => break,
        }
    }
    info!("Waiting for running update to be finished...");
    updater.lock.drain().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testing::container;
    use crate::runtime::fake::FakeClient;

    fn updater_with(client: FakeClient) -> Updater {
        Updater {
            client: Box::new(client),
            registry: RegistryClient::new(),
            filter: Filter::default(),
            params: SessionParams::default(),
            lock: UpdateLock::new(),
            metrics: Arc::new(MetricsRegistry::new()),
            notifier: Notifier::new(),
        }
    }

    #[tokio::test]
    async fn lock_admits_exactly_one_holder() {
        let lock = UpdateLock::new();
        let token = lock.try_acquire().await;
        assert!(token.is_some());
        assert!(lock.try_acquire().await.is_none());
        drop(token);
        assert!(lock.try_acquire().await.is_some());
    }

    #[tokio::test]
    async fn drain_waits_for_the_token() {
        let lock = UpdateLock::new();
        let token = lock.try_acquire().await;
        let drained = tokio::time::timeout(std::time::Duration::from_millis(50), lock.drain());
        assert!(drained.await.is_err(), "drain must block while held");
        drop(token);
        lock.drain().await;
    }

    #[tokio::test]
    async fn held_lock_skips_the_attempt_and_registers_it() {
        let updater = updater_with(FakeClient::with(vec![container(
            "web",
            "nginx:latest",
            &[],
            &[],
            true,
        )]));
        let _held = updater.lock.try_acquire().await.expect("lock is free");

        assert_eq!(updater.try_run(None).await, Attempt::Skipped);
        assert_eq!(updater.metrics.skipped_scans(), 1);
    }

    #[tokio::test]
    async fn completed_attempt_registers_its_metric() {
        let updater = updater_with(FakeClient::with(vec![container(
            "web",
            "nginx:latest",
            &[],
            &[],
            true,
        )]));

        let attempt = updater.try_run(None).await;
        assert_eq!(
            attempt,
            Attempt::Completed(Metric {
                scanned: 1,
                updated: 0,
                failed: 0
            })
        );
        assert_eq!(updater.metrics.skipped_scans(), 0);
        assert!(updater.metrics.render().contains("vigil_scans_total 1"));

        // the lock is free again afterwards
        assert!(updater.lock.try_acquire().await.is_some());
    }

    #[tokio::test]
    async fn trigger_narrows_to_the_requested_images() {
        let client = FakeClient::with(vec![
            container("web", "nginx:latest", &[], &[], true),
            container("db", "postgres:16", &[], &[], true),
        ]);
        client.publish_image("nginx:latest", "sha256:new");
        client.publish_image("postgres:16", "sha256:new-too");
        let updater = updater_with(client);

        let attempt = updater.try_run(Some(vec!["nginx:latest".to_string()])).await;
        assert_eq!(
            attempt,
            Attempt::Completed(Metric {
                scanned: 1,
                updated: 1,
                failed: 0
            })
        );
    }
}
