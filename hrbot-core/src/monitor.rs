//! Counters for side effects that fail without reaching the user.
//!
//! Logging writes, escalation mail and outbound sends are fire-and-forget.
//! Their failures are logged and counted here so they show up on `/health`.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffectKind {
    QuestionLog,
    Escalation,
    OutboundSend,
    HistoryWrite,
}

impl SideEffectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SideEffectKind::QuestionLog => "question_log",
            SideEffectKind::Escalation => "escalation",
            SideEffectKind::OutboundSend => "outbound_send",
            SideEffectKind::HistoryWrite => "history_write",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideEffectSnapshot {
    pub question_log: u64,
    pub escalation: u64,
    pub outbound_send: u64,
    pub history_write: u64,
}

impl SideEffectSnapshot {
    pub fn total(&self) -> u64 {
        self.question_log + self.escalation + self.outbound_send + self.history_write
    }
}

#[derive(Debug, Default)]
pub struct SideEffectMonitor {
    question_log: AtomicU64,
    escalation: AtomicU64,
    outbound_send: AtomicU64,
    history_write: AtomicU64,
}

impl SideEffectMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log and count a failed side effect.
    pub fn record_failure(&self, kind: SideEffectKind, error: impl Display) {
        let total = self.counter(kind).fetch_add(1, Ordering::Relaxed) + 1;
        warn!(kind = kind.as_str(), total, error = %error, "Side effect failed");
    }

    pub fn failures(&self, kind: SideEffectKind) -> u64 {
        self.counter(kind).load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> SideEffectSnapshot {
        SideEffectSnapshot {
            question_log: self.failures(SideEffectKind::QuestionLog),
            escalation: self.failures(SideEffectKind::Escalation),
            outbound_send: self.failures(SideEffectKind::OutboundSend),
            history_write: self.failures(SideEffectKind::HistoryWrite),
        }
    }

    fn counter(&self, kind: SideEffectKind) -> &AtomicU64 {
        match kind {
            SideEffectKind::QuestionLog => &self.question_log,
            SideEffectKind::Escalation => &self.escalation,
            SideEffectKind::OutboundSend => &self.outbound_send,
            SideEffectKind::HistoryWrite => &self.history_write,
        }
    }
}
