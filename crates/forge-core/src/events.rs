//! Progress events streamed by a running pipeline

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::state_machine::Phase;
use crate::types::Outcome;

/// One step of pipeline progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Intermediate progress
    Progress {
        /// 1-based attempt, 0 before the first attempt starts
        attempt: u32,
        phase: Phase,
        message: String,
    },
    /// Always the last event of a run
    Finished(Outcome),
}

impl ProgressEvent {
    /// Whether this is the final event
    #[inline]
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Finished(_))
    }
}

impl std::fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Progress {
                attempt,
                phase,
                message,
            } => write!(f, "[{attempt}] {phase}: {message}"),
            Self::Finished(outcome) => {
                let status = match outcome.status {
                    crate::types::OutcomeStatus::Success => "success",
                    crate::types::OutcomeStatus::Failure => "failure",
                    crate::types::OutcomeStatus::Error => "error",
                };
                write!(f, "{status}: {}", outcome.detail)
            }
        }
    }
}

/// Sending half of a progress stream.
///
/// Sends never block and never fail; events for a dropped receiver are discarded.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl EventSink {
    /// Connected sink and its receiver
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Sink that drops everything
    #[inline]
    #[must_use]
    pub fn discard() -> Self {
        Self::default()
    }

    pub(crate) fn progress(&self, attempt: u32, phase: Phase, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(attempt, phase = %phase, "{}", message);
        self.send(ProgressEvent::Progress {
            attempt,
            phase,
            message,
        });
    }

    pub(crate) fn finish(&self, outcome: Outcome) {
        self.send(ProgressEvent::Finished(outcome));
    }

    fn send(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_arrive_in_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.progress(1, Phase::Generating, "asking");
        sink.finish(Outcome::success("done"));
        drop(sink);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.to_string(), "[1] generating: asking");
        let last = rx.try_recv().unwrap();
        assert!(last.is_final());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn discard_and_closed_receivers_are_silent() {
        EventSink::discard().progress(0, Phase::Orienting, "nobody listens");
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.finish(Outcome::error("gone"));
    }

    #[test]
    fn json_shape() {
        let event = ProgressEvent::Progress {
            attempt: 2,
            phase: Phase::AdversarialVerify,
            message: "strike 1".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "progress");
        assert_eq!(json["phase"], "adversarial_verify");

        let json = serde_json::to_value(ProgressEvent::Finished(Outcome::success("ok"))).unwrap();
        assert_eq!(json["event"], "finished");
        assert_eq!(json["status"], "success");
    }
}
