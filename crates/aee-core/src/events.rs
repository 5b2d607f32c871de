//! Lifecycle events
//!
//! The engine publishes an ordered stream of [`EngineEvent`]s through an
//! [`EventBus`]. Sinks are fire-and-forget: `emit` must return promptly
//! and never fail, so a slow subscriber cannot stall scheduling.

use crate::executor::RunState;
use crate::review::ReviewReason;
use aee_atom::{AtomId, AtomStatus, AttemptOutcome, RunId};
use aee_validation::{Scope, ValidationLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Something that happened during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    RunStarted {
        atoms: usize,
        waves: usize,
    },
    WaveStarted {
        level: usize,
        ready: usize,
        blocked: usize,
    },
    AttemptStarted {
        atom_id: AtomId,
        attempt: u32,
    },
    AttemptResolved {
        atom_id: AtomId,
        attempt: u32,
        outcome: AttemptOutcome,
    },
    AtomSettled {
        atom_id: AtomId,
        status: AtomStatus,
        confidence: Option<f64>,
    },
    GatePassed {
        level: ValidationLevel,
        scope: Scope,
    },
    GateFailed {
        level: ValidationLevel,
        scope: Scope,
        culprits: Vec<AtomId>,
        violations: usize,
    },
    WaveCompleted {
        level: usize,
        validated: usize,
        review: usize,
        blocked: usize,
    },
    ReviewEnqueued {
        atom_id: AtomId,
        confidence: f64,
        reason: ReviewReason,
    },
    ReviewResolved {
        atom_id: AtomId,
        decision: String,
    },
    RunFinished {
        state: RunState,
    },
}

impl EngineEvent {
    /// Short name, used as the tracing message
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::WaveStarted { .. } => "wave_started",
            Self::AttemptStarted { .. } => "attempt_started",
            Self::AttemptResolved { .. } => "attempt_resolved",
            Self::AtomSettled { .. } => "atom_settled",
            Self::GatePassed { .. } => "gate_passed",
            Self::GateFailed { .. } => "gate_failed",
            Self::WaveCompleted { .. } => "wave_completed",
            Self::ReviewEnqueued { .. } => "review_enqueued",
            Self::ReviewResolved { .. } => "review_resolved",
            Self::RunFinished { .. } => "run_finished",
        }
    }
}

/// An event stamped with its position in the run's stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedEvent {
    /// Strictly increasing, starting at 1
    pub seq: u64,
    pub run_id: RunId,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: EngineEvent,
}

/// Event subscriber
pub trait EventSink: Send + Sync + std::fmt::Debug {
    fn emit(&self, event: &SequencedEvent);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &SequencedEvent) {}
}

/// Mirrors events into the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &SequencedEvent) {
        match &event.event {
            EngineEvent::AttemptStarted { .. }
            | EngineEvent::AttemptResolved { .. }
            | EngineEvent::AtomSettled { .. } => {
                tracing::debug!(seq = event.seq, run_id = %event.run_id, detail = ?event.event, "{}", event.event.kind());
            }
            EngineEvent::GateFailed { .. } => {
                tracing::warn!(seq = event.seq, run_id = %event.run_id, detail = ?event.event, "{}", event.event.kind());
            }
            _ => {
                tracing::info!(seq = event.seq, run_id = %event.run_id, detail = ?event.event, "{}", event.event.kind());
            }
        }
    }
}

/// Forwards events to a bounded channel, dropping when it is full
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<SequencedEvent>,
    dropped: AtomicUsize,
}

impl ChannelSink {
    /// Sink plus the receiving end, buffering up to `capacity` events
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SequencedEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicUsize::new(0),
            },
            rx,
        )
    }

    /// Events lost to a full or closed channel
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &SequencedEvent) {
        if self.tx.try_send(event.clone()).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Broadcasts to several sinks
#[derive(Debug, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &SequencedEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

/// Assigns sequence numbers and hands events to the sink
#[derive(Debug)]
pub struct EventBus {
    sink: Arc<dyn EventSink>,
    seq: AtomicU64,
}

impl EventBus {
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            seq: AtomicU64::new(0),
        }
    }

    /// Stamp and publish; returns the assigned sequence number
    pub fn publish(&self, run_id: RunId, event: EngineEvent) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.sink.emit(&SequencedEvent {
            seq,
            run_id,
            at: Utc::now(),
            event,
        });
        seq
    }

    /// Sequence number of the last published event
    #[must_use]
    pub fn last_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Arc::new(NullSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(level: usize) -> EngineEvent {
        EngineEvent::WaveStarted {
            level,
            ready: 1,
            blocked: 0,
        }
    }

    #[tokio::test]
    async fn channel_sink_receives_in_order() {
        let (sink, mut rx) = ChannelSink::new(8);
        let bus = EventBus::new(Arc::new(sink));
        let run = RunId::new();
        for level in 0..3 {
            bus.publish(run, wave(level));
        }
        let seqs: Vec<u64> = (0..3).map(|_| rx.try_recv().unwrap().seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(bus.last_seq(), 3);
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (sink, _rx) = ChannelSink::new(1);
        let sink = Arc::new(sink);
        let bus = EventBus::new(sink.clone());
        let run = RunId::new();
        bus.publish(run, wave(0));
        bus.publish(run, wave(1));
        bus.publish(run, wave(2));
        assert_eq!(sink.dropped(), 2);
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let (a, mut rx_a) = ChannelSink::new(4);
        let (b, mut rx_b) = ChannelSink::new(4);
        let bus = EventBus::new(Arc::new(FanoutSink::new().with(Arc::new(a)).with(Arc::new(b))));
        bus.publish(RunId::new(), wave(0));
        assert_eq!(rx_a.try_recv().unwrap().seq, 1);
        assert_eq!(rx_b.try_recv().unwrap().seq, 1);
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = SequencedEvent {
            seq: 7,
            run_id: RunId::new(),
            at: Utc::now(),
            event: EngineEvent::GatePassed {
                level: ValidationLevel::Module,
                scope: Scope::Module("app/core".into()),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "gate_passed");
        assert_eq!(json["seq"], 7);
    }
}
