use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::models::session::UserInput;
use crate::models::step::NextStep;

// ─── Cancellation ─────────────────────────────────────────────────────────

/// Owner side of a cancellation signal.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn new() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelSignal { rx: Some(rx) })
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observed by the coordinator between turns and raced against dispatch.
#[derive(Clone)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolves once cancellation is requested. Pends forever if the handle
    /// was dropped without cancelling.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

// ─── Input ────────────────────────────────────────────────────────────────

/// Supplier of user answers. `None` means no input is available now; the
/// coordinator then suspends the session instead of blocking.
#[async_trait]
pub trait InputSource: Send {
    async fn next_input(&mut self, next: &NextStep, prompt: &str) -> Option<UserInput>;
}

/// Pre-recorded answers, consumed front to back.
#[derive(Debug, Clone, Default)]
pub struct ScriptedInput {
    pending: VecDeque<UserInput>,
    consumed: Vec<UserInput>,
}

impl ScriptedInput {
    pub fn new<I, S>(inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<UserInput>,
    {
        Self {
            pending: inputs.into_iter().map(Into::into).collect(),
            consumed: Vec::new(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn consumed(&self) -> &[UserInput] {
        &self.consumed
    }
}

#[async_trait]
impl InputSource for ScriptedInput {
    async fn next_input(&mut self, _next: &NextStep, _prompt: &str) -> Option<UserInput> {
        let input = self.pending.pop_front()?;
        self.consumed.push(input.clone());
        Some(input)
    }
}
