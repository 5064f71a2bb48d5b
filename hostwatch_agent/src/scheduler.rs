//! Collection loop: collect -> normalize -> broadcast -> evaluate -> log/notify.
//!
//! Ticks run one after another on a single task; a tick that overruns the
//! period causes the missed ticks to be skipped rather than queued. The
//! only blocking work (provider calls) runs on the blocking pool, hub
//! delivery never waits on subscribers, and notification sends run on
//! their own task with a timeout, reporting back over a channel. The
//! throttle state lives here and nowhere else. A failed send holds further
//! attempts off for `retry_backoff` so a broken transport is not hit on
//! every tick.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use futures_util::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::alert_log::{AlertLog, AlertLogEntry};
use crate::evaluate::{evaluate, AlertCategory, Evaluation, Thresholds};
use crate::hub::{BroadcastHub, BroadcastReport};
use crate::normalize::{normalize, GpuSelection};
use crate::notify::{Notifier, NotifyError};
use crate::source::{collect_blocking, panic_message, SharedSource};
use crate::throttle::NotificationThrottler;

pub const DEFAULT_PERIOD: Duration = Duration::from_secs(5);
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);
pub const ALERT_TITLE: &str = "Server Alert: Metrics Report";

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub period: Duration,
    pub throttle_window: Duration,
    pub thresholds: Thresholds,
    pub gpu_selection: GpuSelection,
    pub send_timeout: Duration,
    // quiet period after a failed send before the next attempt
    pub retry_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            throttle_window: crate::throttle::DEFAULT_WINDOW,
            thresholds: Thresholds::default(),
            gpu_selection: GpuSelection::default(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            retry_backoff: crate::throttle::DEFAULT_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyDecision {
    #[default]
    NotNeeded,
    Throttled,
    // an earlier send has not reported back yet
    InFlight,
    // the last send failed recently
    BackingOff,
    Dispatched,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub collected: bool,
    pub broadcast: Option<BroadcastReport>,
    pub breaches: Vec<AlertCategory>,
    pub logged: bool,
    pub notification: NotifyDecision,
}

struct SendOutcome {
    attempted_at: DateTime<Utc>,
    result: Result<(), NotifyError>,
}

pub struct Scheduler<N: Notifier> {
    source: SharedSource,
    hub: Arc<BroadcastHub>,
    log: AlertLog,
    notifier: Arc<N>,
    throttle: NotificationThrottler,
    config: SchedulerConfig,
    outcome_tx: mpsc::UnboundedSender<SendOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<SendOutcome>,
    in_flight: bool,
    last_failed_at: Option<DateTime<Utc>>,
}

impl<N: Notifier> Scheduler<N> {
    pub fn new(
        source: SharedSource,
        hub: Arc<BroadcastHub>,
        log: AlertLog,
        notifier: N,
        config: SchedulerConfig,
    ) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Self {
            source,
            hub,
            log,
            notifier: Arc::new(notifier),
            throttle: NotificationThrottler::new(config.throttle_window),
            config,
            outcome_tx,
            outcome_rx,
            in_flight: false,
            last_failed_at: None,
        }
    }

    pub fn throttle(&self) -> &NotificationThrottler {
        &self.throttle
    }

    /// When the most recent unsuccessful send was attempted, if it has not
    /// been followed by a successful one.
    pub fn last_failed_at(&self) -> Option<DateTime<Utc>> {
        self.last_failed_at
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Tick every period until `shutdown` flips to true or its sender goes
    /// away. A tick already running is allowed to finish.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(period = ?self.config.period, "collection loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick_at(Utc::now()).await;
                }
                Some(outcome) = self.outcome_rx.recv() => {
                    self.apply_outcome(outcome);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("collection loop stopped");
    }

    /// Run one full pipeline pass as of `now`.
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> TickReport {
        while let Ok(outcome) = self.outcome_rx.try_recv() {
            self.apply_outcome(outcome);
        }

        let mut report = TickReport::default();
        let raw = match collect_blocking(&self.source).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "metrics collection failed, skipping tick");
                return report;
            }
        };
        report.collected = true;

        let snapshot = Arc::new(normalize(&raw, now, self.config.gpu_selection));
        report.broadcast = Some(self.hub.broadcast(Arc::clone(&snapshot)));

        let eval = evaluate(&snapshot, &self.config.thresholds);
        if !eval.any_breach {
            debug!("no thresholds breached");
            return report;
        }
        report.breaches = eval.breaching_categories();
        debug!(breaches = ?report.breaches, "thresholds breached");

        let entry = AlertLogEntry::new(now, eval.texts());
        match self.log.append(&entry).await {
            Ok(()) => report.logged = true,
            Err(e) => error!(error = %e, "alert log entry dropped"),
        }

        report.notification = if self.in_flight {
            NotifyDecision::InFlight
        } else if self.backing_off(now) {
            NotifyDecision::BackingOff
        } else if self.throttle.should_notify(now) {
            self.dispatch(now, &eval);
            NotifyDecision::Dispatched
        } else {
            NotifyDecision::Throttled
        };
        report
    }

    /// Wait for an in-flight notification to report back and apply its result.
    pub async fn settle_notification(&mut self) {
        if !self.in_flight {
            return;
        }
        if let Some(outcome) = self.outcome_rx.recv().await {
            self.apply_outcome(outcome);
        }
    }

    fn backing_off(&self, now: DateTime<Utc>) -> bool {
        let Some(failed) = self.last_failed_at else {
            return false;
        };
        let backoff = TimeDelta::from_std(self.config.retry_backoff).unwrap_or(TimeDelta::MAX);
        now.signed_duration_since(failed) < backoff
    }

    fn dispatch(&mut self, now: DateTime<Utc>, eval: &Evaluation) {
        let body = notification_body(now, eval);
        let notifier = Arc::clone(&self.notifier);
        let tx = self.outcome_tx.clone();
        let limit = self.config.send_timeout;
        self.in_flight = true;
        tokio::spawn(async move {
            // A panicking transport still has to report back, or in_flight never clears.
            let send = tokio::time::timeout(limit, notifier.send(ALERT_TITLE, &body));
            let result = match AssertUnwindSafe(send).catch_unwind().await {
                Ok(Ok(r)) => r,
                Ok(Err(_)) => Err(NotifyError::Timeout(limit)),
                Err(payload) => Err(NotifyError::Panicked(panic_message(&*payload))),
            };
            let _ = tx.send(SendOutcome {
                attempted_at: now,
                result,
            });
        });
    }

    fn apply_outcome(&mut self, outcome: SendOutcome) {
        self.in_flight = false;
        match outcome.result {
            Ok(()) => {
                self.throttle.record_sent(outcome.attempted_at);
                self.last_failed_at = None;
                info!(at = %outcome.attempted_at, "alert notification sent");
            }
            // Throttle window stays open; retry once the backoff has passed.
            Err(e) => {
                self.last_failed_at = Some(outcome.attempted_at);
                error!(
                    error = %e,
                    retry_in = ?self.config.retry_backoff,
                    "alert notification failed"
                );
            }
        }
    }
}

pub fn notification_body(now: DateTime<Utc>, eval: &Evaluation) -> String {
    let lines: Vec<&str> = eval.texts().collect();
    format!(
        "Current server status at {}:\n\n{}",
        now.to_rfc3339_opts(SecondsFormat::Millis, true),
        lines.join("\n\n")
    )
}
