// Outbound engine events and the sink they are published to
use tokio::sync::mpsc;

use crate::alerts::Alert;
use crate::execution::{AccountSummary, Position, UnrealizedPnl};
use crate::models::Interval;
use crate::strategy::Analysis;

/// Structured events for the notification channel; formatting is the
/// channel's job
#[derive(Debug, Clone)]
pub enum EngineEvent {
    SessionStarted {
        interval: Interval,
        symbols: usize,
        initial_balance: f64,
        live: bool,
    },
    AlertTriggered {
        alert: Alert,
        price: f64,
    },
    SignalDetected {
        analysis: Analysis,
    },
    PositionOpened {
        position: Position,
    },
    PositionClosed {
        position: Position,
        summary: AccountSummary,
    },
    OrderFailed {
        description: String,
        error: String,
    },
    SessionEnded {
        summary: AccountSummary,
        unrealized: UnrealizedPnl,
    },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::SessionStarted { .. } => "session-started",
            EngineEvent::AlertTriggered { .. } => "alert-triggered",
            EngineEvent::SignalDetected { .. } => "signal-detected",
            EngineEvent::PositionOpened { .. } => "position-opened",
            EngineEvent::PositionClosed { .. } => "position-closed",
            EngineEvent::OrderFailed { .. } => "order-failed",
            EngineEvent::SessionEnded { .. } => "session-ended",
        }
    }
}

/// Fire-and-forget publication. Must never block the caller.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: EngineEvent);
}

/// Sink backed by a bounded channel drained by a notifier task
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<EngineEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, event: EngineEvent) {
        let name = event.name();
        if let Err(e) = self.tx.try_send(event) {
            // A dropped notification never affects ledger state
            tracing::warn!(event = name, error = %e, "⚠️  Notification dropped");
        }
    }
}
