//! Heartbeat liveness probing for open connections
//!
//! # Architecture
//!
//! The monitor is owned by the connection task and exposes its timers as a
//! single future the task selects on:
//!
//! ```text
//! ┌──────────────────────────┐
//! │  HeartbeatMonitor        │
//! │                          │
//! │  interval ──> Tick ──────┼──> send ping, arm timeout
//! │  timeout  ──> TimedOut ──┼──> count miss, maybe force-close
//! └──────────────────────────┘
//! ```
//!
//! Timers exist only while the connection is open. Leaving the open state
//! stops both timers and resets the missed counter. A pong cancels the
//! pending timeout but does not reset the missed counter.
//!
//! # Usage
//!
//! All five options are required together:
//!
//! ```ignore
//! let connection = resocket::builder()
//!     .url("wss://api.example.com")
//!     .heartbeat(HeartbeatOptions::new(
//!         Duration::from_secs(30),   // interval
//!         Duration::from_secs(5),    // timeout
//!         WsMessage::from("ping"),
//!         WsMessage::from("pong"),
//!         2,                         // max missed heartbeats
//!     ))
//!     .build()?;
//! ```

use crate::message::WsMessage;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, warn};

/// Close code used when too many heartbeats go unanswered
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4000;

/// Heartbeat options as supplied by the user
///
/// Every field must be set for heartbeats to run. Incomplete options are
/// reported with a warning and heartbeats stay disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatOptions {
    pub interval: Option<Duration>,
    pub timeout: Option<Duration>,
    pub ping_message: Option<WsMessage>,
    pub pong_message: Option<WsMessage>,
    pub max_missed_heartbeats: Option<u32>,
}

impl HeartbeatOptions {
    /// Fully specified heartbeat options
    pub fn new(
        interval: Duration,
        timeout: Duration,
        ping_message: WsMessage,
        pong_message: WsMessage,
        max_missed_heartbeats: u32,
    ) -> Self {
        Self {
            interval: Some(interval),
            timeout: Some(timeout),
            ping_message: Some(ping_message),
            pong_message: Some(pong_message),
            max_missed_heartbeats: Some(max_missed_heartbeats),
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn ping_message(mut self, message: impl Into<WsMessage>) -> Self {
        self.ping_message = Some(message.into());
        self
    }

    pub fn pong_message(mut self, message: impl Into<WsMessage>) -> Self {
        self.pong_message = Some(message.into());
        self
    }

    pub fn max_missed_heartbeats(mut self, max: u32) -> Self {
        self.max_missed_heartbeats = Some(max);
        self
    }

    /// Names of the options that are still unset
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.interval.is_none() {
            missing.push("interval");
        }
        if self.timeout.is_none() {
            missing.push("timeout");
        }
        if self.ping_message.is_none() {
            missing.push("ping_message");
        }
        if self.pong_message.is_none() {
            missing.push("pong_message");
        }
        if self.max_missed_heartbeats.is_none() {
            missing.push("max_missed_heartbeats");
        }
        missing
    }

    /// Turn complete options into a runnable config, warning otherwise
    pub fn validate(&self) -> Option<HeartbeatConfig> {
        match (
            self.interval,
            self.timeout,
            &self.ping_message,
            &self.pong_message,
            self.max_missed_heartbeats,
        ) {
            (Some(interval), Some(timeout), Some(ping), Some(pong), Some(max_missed)) => {
                if interval.is_zero() {
                    warn!("Heartbeat interval must be non-zero, heartbeat disabled");
                    return None;
                }
                Some(HeartbeatConfig {
                    interval,
                    timeout,
                    ping_message: ping.clone(),
                    pong_message: pong.clone(),
                    max_missed_heartbeats: max_missed,
                })
            }
            _ => {
                warn!(
                    "Incomplete heartbeat options (missing: {}), heartbeat disabled",
                    self.missing().join(", ")
                );
                None
            }
        }
    }
}

/// Validated heartbeat configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub timeout: Duration,
    pub ping_message: WsMessage,
    pub pong_message: WsMessage,
    pub max_missed_heartbeats: u32,
}

/// What the monitor's timers produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeartbeatSignal {
    /// Time to send a ping
    Tick,
    /// No pong arrived within the timeout
    TimedOut,
}

/// Timer state for one connection's heartbeats
pub(crate) struct HeartbeatMonitor {
    config: HeartbeatConfig,
    ticker: Option<Interval>,
    timeout: Option<Pin<Box<Sleep>>>,
    missed: u32,
}

impl HeartbeatMonitor {
    pub(crate) fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            ticker: None,
            timeout: None,
            missed: 0,
        }
    }

    pub(crate) fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    /// Arm the interval timer. The first tick fires one interval from now.
    pub(crate) fn start(&mut self) {
        let period = self.config.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        // If we miss ticks due to slow processing, skip them rather than bursting
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);
        debug!("Heartbeat started with interval: {:?}", period);
    }

    /// Drop both timers and forget missed heartbeats
    pub(crate) fn stop(&mut self) {
        if self.ticker.is_some() {
            debug!("Heartbeat stopped");
        }
        self.ticker = None;
        self.timeout = None;
        self.missed = 0;
    }

    pub(crate) fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    pub(crate) fn missed(&self) -> u32 {
        self.missed
    }

    pub(crate) fn is_pong(&self, message: &WsMessage) -> bool {
        *message == self.config.pong_message
    }

    /// Start waiting for a pong. A timeout that is already pending keeps
    /// its deadline; returns whether a new one was armed.
    pub(crate) fn arm_timeout(&mut self) -> bool {
        if self.timeout.is_some() {
            return false;
        }
        self.timeout = Some(Box::pin(tokio::time::sleep(self.config.timeout)));
        true
    }

    /// Cancel the pending timeout. Returns whether one was pending.
    pub(crate) fn pong_received(&mut self) -> bool {
        self.timeout.take().is_some()
    }

    /// Count a missed heartbeat. Returns the new count and whether the
    /// threshold is now exceeded.
    pub(crate) fn record_miss(&mut self) -> (u32, bool) {
        self.missed += 1;
        (self.missed, self.missed > self.config.max_missed_heartbeats)
    }

    /// Wait for the next timer to fire. Pending forever while stopped.
    pub(crate) async fn next_signal(&mut self) -> HeartbeatSignal {
        let Some(ticker) = self.ticker.as_mut() else {
            return std::future::pending().await;
        };

        match self.timeout.as_mut() {
            Some(timeout) => {
                let signal = tokio::select! {
                    biased;
                    _ = timeout.as_mut() => HeartbeatSignal::TimedOut,
                    _ = ticker.tick() => HeartbeatSignal::Tick,
                };
                if signal == HeartbeatSignal::TimedOut {
                    self.timeout = None;
                }
                signal
            }
            None => {
                ticker.tick().await;
                HeartbeatSignal::Tick
            }
        }
    }
}
