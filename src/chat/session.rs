//! The conversation session state machine.
//!
//! A [`ChatSession`] owns the conversation log, the draft buffer, and at most one open turn.
//! It is either idle or streaming; every path out of streaming (done, failure, abort) goes
//! through a single commit step that decides what reaches the log.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::accumulate::Fragment;
use crate::chat::delayed_flag::{ABORT_VISIBILITY_DELAY, DelayedFlag};
use crate::error::{Error, Result};
use crate::observability::{
    SESSION_DRAFTS_RESTORED, SESSION_TURNS_ABORTED, SESSION_TURNS_COMMITTED, SESSION_TURNS_FAILED,
    SESSION_TURNS_STARTED,
};
use crate::relay::{Transport, TurnEvent, TurnHandle};
use crate::store::{MESSAGES_KEY, MODEL_KEY, Store, load_or_default, save};
use crate::types::{
    Delta, Message, RelayRequest, Role, default_model, model_def, provider_for_model,
};

/// Whether a turn is open.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No turn is open.
    Idle,

    /// A turn is open and zero or more deltas have arrived.
    Streaming,
}

/// How a turn ended.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// The stream finished.
    Completed,

    /// The user aborted the turn.
    Aborted,

    /// The stream failed.  Partial output, if any, was kept.
    Failed(Error),
}

/// Progress of the open turn, as reported by [`ChatSession::next_event`].
#[derive(Debug, Clone)]
pub enum TurnUpdate {
    /// A delta was folded into the in-flight message.
    Delta(Delta),

    /// The turn reached a terminal state and the session is idle again.
    Finished(TurnOutcome),
}

/// A dismissible error shown to the user.
#[derive(Debug, Clone)]
pub struct Notice {
    error: Error,
}

impl Notice {
    fn new(error: Error) -> Self {
        Self { error }
    }

    /// The error being reported.
    pub fn error(&self) -> &Error {
        &self.error
    }

    /// Should a retry action be offered?
    pub fn can_retry(&self) -> bool {
        self.error.is_retryable()
    }

    /// Is this a terminal condition for the request rather than a transient one?
    pub fn is_blocking(&self) -> bool {
        self.error.is_blocking()
    }
}

struct Turn {
    handle: TurnHandle,
    fragment: Option<Fragment>,
    abort_visible: DelayedFlag,
}

impl Turn {
    fn has_content(&self) -> bool {
        self.fragment
            .as_ref()
            .is_some_and(|fragment| !fragment.content.is_empty())
    }
}

/// A resumable chat conversation.
pub struct ChatSession<S: Store, T: Transport> {
    store: S,
    transport: T,
    messages: Vec<Message>,
    model: String,
    draft: String,
    turn: Option<Turn>,
    notice: Option<Notice>,
    abort_delay: Duration,
}

impl<S: Store, T: Transport> ChatSession<S, T> {
    /// Reconstruct a session from `store`.
    ///
    /// A corrupt log or model preference is replaced by its default.  A log ending in a user
    /// message means a submission was interrupted before any response was recorded; that message
    /// is moved back into the draft buffer.
    pub fn restore(store: S, transport: T) -> Result<Self> {
        let messages: Vec<Message> = load_or_default(&store, MESSAGES_KEY, |_| true);
        let model: String = load_or_default(&store, MODEL_KEY, |model: &String| {
            model_def(model).is_some()
        });
        let model = if model.is_empty() {
            default_model().api_name.to_string()
        } else {
            model
        };
        let mut session = Self {
            store,
            transport,
            messages,
            model,
            draft: String::new(),
            turn: None,
            notice: None,
            abort_delay: ABORT_VISIBILITY_DELAY,
        };
        if session.restore_unanswered() {
            session.persist_messages()?;
        }
        debug!(
            messages = session.messages.len(),
            model = %session.model,
            "restored chat session"
        );
        Ok(session)
    }

    /// Sets how long a turn must run before [`ChatSession::show_abort`] reports true.
    pub fn with_abort_delay(mut self, delay: Duration) -> Self {
        self.abort_delay = delay;
        self
    }

    /// Append a user message and open a turn answering it.
    ///
    /// # Errors
    ///
    /// - [`Error::TurnInFlight`] while a turn is streaming.
    /// - [`Error::AwaitingRetry`] while the last user message is unanswered.
    /// - [`Error::UnknownModel`] if the selected model is not registered; nothing is sent and
    ///   the log is unchanged.
    /// - Any error opening the turn.  The user message stays in the log so it can be retried.
    pub async fn submit(&mut self, text: impl Into<String>) -> Result<()> {
        if self.turn.is_some() {
            return Err(Error::TurnInFlight);
        }
        if self.ends_with_user() {
            return Err(Error::AwaitingRetry);
        }
        if let Err(err) = provider_for_model(&self.model) {
            self.notice = Some(Notice::new(err.clone()));
            return Err(err);
        }
        self.notice = None;
        self.messages.push(Message::user(text));
        self.draft.clear();
        self.persist_messages()?;
        self.open_turn().await
    }

    /// Resubmit the last user message.
    ///
    /// Trailing assistant messages, such as partial output kept from a failed turn, are removed
    /// first.
    ///
    /// # Errors
    ///
    /// [`Error::TurnInFlight`] while streaming, [`Error::NothingToRetry`] when no user message
    /// remains at the end of the log, and any error opening the turn.
    pub async fn retry(&mut self) -> Result<()> {
        if self.turn.is_some() {
            return Err(Error::TurnInFlight);
        }
        if let Err(err) = provider_for_model(&self.model) {
            self.notice = Some(Notice::new(err.clone()));
            return Err(err);
        }
        let mut messages = self.messages.clone();
        while messages.last().is_some_and(|m| m.role == Role::Assistant) {
            messages.pop();
        }
        if !messages.last().is_some_and(|m| m.role == Role::User) {
            return Err(Error::NothingToRetry);
        }
        self.notice = None;
        self.messages = messages;
        self.persist_messages()?;
        self.open_turn().await
    }

    async fn open_turn(&mut self) -> Result<()> {
        SESSION_TURNS_STARTED.click();
        let request = RelayRequest::new(self.model.clone(), self.messages.clone());
        info!(model = %self.model, messages = self.messages.len(), "opening turn");
        match self.transport.open(request).await {
            Ok(handle) => {
                let mut abort_visible = DelayedFlag::new();
                abort_visible.arm(self.abort_delay);
                self.turn = Some(Turn {
                    handle,
                    fragment: None,
                    abort_visible,
                });
                Ok(())
            }
            Err(err) => {
                SESSION_TURNS_FAILED.click();
                warn!(error = %err, "could not open turn");
                self.notice = Some(Notice::new(err.clone()));
                Err(err)
            }
        }
    }

    /// Wait for the next event of the open turn.
    ///
    /// Returns `None` when idle.  Once [`TurnUpdate::Finished`] has been returned the turn is
    /// closed and later calls return `None` until another turn opens.
    pub async fn next_event(&mut self) -> Option<TurnUpdate> {
        let turn = self.turn.as_mut()?;
        match turn.handle.next().await {
            Some(TurnEvent::Delta(delta)) => {
                turn.fragment
                    .get_or_insert_with(Fragment::default)
                    .push(&delta);
                Some(TurnUpdate::Delta(delta))
            }
            Some(TurnEvent::Done) | None => {
                let outcome = if turn.handle.is_aborted() {
                    TurnOutcome::Aborted
                } else {
                    TurnOutcome::Completed
                };
                Some(TurnUpdate::Finished(self.finish(outcome)))
            }
            Some(TurnEvent::Failed(err)) => {
                Some(TurnUpdate::Finished(self.finish(TurnOutcome::Failed(err))))
            }
        }
    }

    /// Drive the open turn to completion, calling `on_delta` for each delta.
    pub async fn run_turn<F>(&mut self, mut on_delta: F) -> Option<TurnOutcome>
    where
        F: FnMut(&Delta),
    {
        while let Some(update) = self.next_event().await {
            match update {
                TurnUpdate::Delta(delta) => on_delta(&delta),
                TurnUpdate::Finished(outcome) => return Some(outcome),
            }
        }
        None
    }

    /// Abort the open turn, keeping whatever partial output arrived.
    ///
    /// Returns false when idle.
    pub fn abort(&mut self) -> bool {
        match &self.turn {
            Some(turn) => {
                turn.handle.abort();
                self.finish(TurnOutcome::Aborted);
                true
            }
            None => false,
        }
    }

    /// A token that aborts the open turn when cancelled, for use from signal handlers.
    pub fn abort_token(&self) -> Option<CancellationToken> {
        self.turn
            .as_ref()
            .map(|turn| turn.handle.cancellation_token())
    }

    fn finish(&mut self, outcome: TurnOutcome) -> TurnOutcome {
        let Some(turn) = self.turn.take() else {
            return outcome;
        };
        let committed = turn.has_content();
        if let Some(fragment) = turn.fragment.as_ref().filter(|_| committed) {
            self.messages.push(fragment.finalize());
        }
        drop(turn);
        match &outcome {
            TurnOutcome::Completed => {
                SESSION_TURNS_COMMITTED.click();
                if !committed {
                    self.restore_unanswered();
                }
            }
            TurnOutcome::Aborted => {
                SESSION_TURNS_ABORTED.click();
                if !committed {
                    self.restore_unanswered();
                }
            }
            TurnOutcome::Failed(err) => {
                SESSION_TURNS_FAILED.click();
                error!(error = %err, partial = committed, "turn failed");
                self.notice = Some(Notice::new(err.clone()));
            }
        }
        if let Err(err) = self.persist_messages() {
            error!(error = %err, "could not persist conversation");
            self.notice = Some(Notice::new(err));
        }
        outcome
    }

    /// Abort any open turn, then empty and persist the log.
    pub fn clear(&mut self) -> Result<()> {
        self.abort();
        self.messages.clear();
        self.notice = None;
        self.persist_messages()
    }

    /// The committed log.
    pub fn log(&self) -> &[Message] {
        &self.messages
    }

    /// The messages to display: the committed log plus the in-flight message, if any.
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = self.messages.clone();
        if let Some(fragment) = self.turn.as_ref().and_then(|turn| turn.fragment.as_ref()) {
            messages.push(fragment.finalize());
        }
        messages
    }

    /// Whether a turn is open.
    pub fn state(&self) -> SessionState {
        if self.turn.is_some() {
            SessionState::Streaming
        } else {
            SessionState::Idle
        }
    }

    /// The editable draft buffer.
    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Replace the draft buffer.
    pub fn set_draft(&mut self, draft: impl Into<String>) {
        self.draft = draft.into();
    }

    /// Take the draft buffer, leaving it empty.
    pub fn take_draft(&mut self) -> String {
        std::mem::take(&mut self.draft)
    }

    /// The selected model.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Select and persist a model.  Unregistered models are rejected at submission.
    pub fn set_model(&mut self, model: impl Into<String>) -> Result<()> {
        self.model = model.into();
        save(&mut self.store, MODEL_KEY, &self.model)
    }

    /// The current notice, if any.
    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    /// Dismiss the current notice.
    ///
    /// An unanswered user message left by a failed turn moves back into the draft.
    pub fn dismiss_notice(&mut self) -> Result<()> {
        self.notice = None;
        if self.turn.is_none() && self.restore_unanswered() {
            self.persist_messages()?;
        }
        Ok(())
    }

    /// Should the abort action be shown?
    pub fn show_abort(&self) -> bool {
        self.turn
            .as_ref()
            .is_some_and(|turn| turn.abort_visible.is_set())
    }

    /// Should the retry action be shown?
    pub fn show_retry(&self) -> bool {
        self.turn.is_none() && self.notice.as_ref().is_some_and(Notice::can_retry)
    }

    /// Is input blocked?  True while streaming and while the last user message is unanswered.
    pub fn is_input_disabled(&self) -> bool {
        self.turn.is_some() || self.ends_with_user()
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn ends_with_user(&self) -> bool {
        self.messages.last().is_some_and(|m| m.role == Role::User)
    }

    /// Move every trailing user message back into the draft, oldest first, separated by a
    /// blank line.  Returns whether anything moved.
    fn restore_unanswered(&mut self) -> bool {
        let mut unanswered = Vec::new();
        while self.ends_with_user() {
            if let Some(message) = self.messages.pop() {
                unanswered.push(message.content);
            }
        }
        if unanswered.is_empty() {
            return false;
        }
        SESSION_DRAFTS_RESTORED.click();
        debug!(
            messages = unanswered.len(),
            "moving unanswered messages back to the draft"
        );
        unanswered.reverse();
        self.draft = unanswered.join("\n\n");
        true
    }

    fn persist_messages(&mut self) -> Result<()> {
        save(&mut self.store, MESSAGES_KEY, &self.messages)
    }
}
