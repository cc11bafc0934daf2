//! A chat session: transcript, selection and the turn consumer loop.
//!
//! At most one turn is current. Starting a new turn abandons the previous
//! one, and messages tagged with a stale [`TurnId`] are ignored, so a late
//! completion can never write into the newer turn's slot.

use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::{ClientError, ClientResult, FeedbackRequest};
use crate::message::Message;
use crate::selection::{SelectionError, SelectionSet};
use crate::sse::Frame;
use crate::transcript::{StepPolicy, TranscriptState};

/// Error text recorded when the stream ends while the turn is still open.
pub const STREAM_CLOSED_ERROR: &str = "stream closed before completion";

/// Identifies one turn within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(u64);

/// How a turn's consumer loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// A `final` or `done` message closed the turn.
    Completed,
    /// The backend or the transport reported an error.
    Failed,
    /// The cancellation token fired before the turn finished.
    Cancelled,
    /// The turn was no longer current when the loop started.
    Superseded,
}

#[derive(Debug)]
pub struct ChatSession {
    session_id: String,
    transcript: TranscriptState,
    policy: StepPolicy,
    selection: SelectionSet,
    current_turn: Option<TurnId>,
    next_turn: u64,
}

impl ChatSession {
    pub fn new(session_id: impl Into<String>, policy: StepPolicy) -> Self {
        Self {
            session_id: session_id.into(),
            transcript: TranscriptState::new(),
            policy,
            selection: SelectionSet::new(),
            current_turn: None,
            next_turn: 0,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn transcript(&self) -> &TranscriptState {
        &self.transcript
    }

    pub fn policy(&self) -> &StepPolicy {
        &self.policy
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    pub fn selection_mut(&mut self) -> &mut SelectionSet {
        &mut self.selection
    }

    pub fn current_turn(&self) -> Option<TurnId> {
        self.current_turn
    }

    /// Starts a new turn for `query`, abandoning any turn still open.
    pub fn begin_turn(&mut self, query: &str) -> TurnId {
        if let Some(previous) = self.current_turn
            && !self.transcript.is_idle()
        {
            debug!(turn = previous.0, "abandoning open turn");
        }

        let turn = TurnId(self.next_turn);
        self.next_turn += 1;
        self.current_turn = Some(turn);
        self.selection.reset();
        self.transcript = std::mem::take(&mut self.transcript).begin_turn(query);
        turn
    }

    /// Applies a message on behalf of `turn`. Returns false when the turn is
    /// no longer current and the message was ignored.
    pub fn apply(&mut self, turn: TurnId, message: &Message) -> bool {
        if self.current_turn != Some(turn) {
            debug!(turn = turn.0, kind = message.kind(), "ignoring message for stale turn");
            return false;
        }
        if let Message::Unknown { event } = message {
            debug!(event = event.as_deref().unwrap_or(""), "ignoring unknown event");
        }
        self.transcript = std::mem::take(&mut self.transcript).apply(message, &self.policy);
        true
    }

    /// Consumes `frames` for `turn` until a terminal message, the end of the
    /// stream, or cancellation.
    pub async fn run_turn<S>(
        &mut self,
        turn: TurnId,
        frames: S,
        cancel: &CancellationToken,
    ) -> TurnOutcome
    where
        S: Stream<Item = ClientResult<Frame>> + Unpin,
    {
        self.run_turn_with(turn, frames, cancel, |_, _| {}).await
    }

    /// Like [`ChatSession::run_turn`], calling `observe` after every applied
    /// message.
    pub async fn run_turn_with<S, F>(
        &mut self,
        turn: TurnId,
        mut frames: S,
        cancel: &CancellationToken,
        mut observe: F,
    ) -> TurnOutcome
    where
        S: Stream<Item = ClientResult<Frame>> + Unpin,
        F: FnMut(&Message, &TranscriptState),
    {
        if self.current_turn != Some(turn) {
            return TurnOutcome::Superseded;
        }

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.cancel_turn(turn);
                    return TurnOutcome::Cancelled;
                }
                next = frames.next() => next,
            };

            let message = match next {
                Some(Ok(frame)) => Message::from(frame),
                Some(Err(e)) => {
                    debug!(kind = %e.kind, "stream failed: {e}");
                    Message::transport_failure(e.to_string())
                }
                None if self.transcript.is_idle() => return TurnOutcome::Completed,
                None => Message::transport_failure(STREAM_CLOSED_ERROR),
            };

            self.apply(turn, &message);
            observe(&message, &self.transcript);

            match message {
                Message::Error { .. } => return TurnOutcome::Failed,
                Message::Final(_) | Message::Done => return TurnOutcome::Completed,
                _ => {}
            }
        }
    }

    /// Records a transport failure that ended `turn` before any frame was
    /// read, such as a rejected request. Returns the applied message, or
    /// `None` when the turn is stale.
    pub fn fail_turn(&mut self, turn: TurnId, error: &ClientError) -> Option<Message> {
        debug!(kind = %error.kind, "turn failed before streaming: {error}");
        let message = Message::transport_failure(error.to_string());
        self.apply(turn, &message).then_some(message)
    }

    /// Stops `turn`: closes its slot and makes later messages for it stale.
    pub fn cancel_turn(&mut self, turn: TurnId) {
        if self.current_turn != Some(turn) {
            return;
        }
        debug!(turn = turn.0, "turn cancelled");
        self.apply(turn, &Message::Done);
        self.current_turn = None;
    }

    /// Builds a feedback payload for the current selection and the latest
    /// turn's message id.
    pub fn feedback_request(
        &self,
        rating: Option<u8>,
        notes: Option<&str>,
    ) -> Result<FeedbackRequest, SelectionError> {
        self.selection.feedback_request(
            &self.session_id,
            self.transcript.message_id(),
            rating,
            notes,
        )
    }

    /// Marks `codes` as saved after the backend acknowledged them.
    pub fn record_feedback_saved<I, S>(&mut self, codes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selection.mark_saved(codes);
    }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;
    use serde_json::json;

    use super::*;
    use crate::client::ClientErrorKind;
    use crate::sse::FrameDecoder;

    fn frames(input: &str) -> Vec<ClientResult<Frame>> {
        FrameDecoder::decode_all(input.as_bytes())
            .into_iter()
            .map(Ok)
            .collect()
    }

    fn assistant_text(session: &ChatSession, idx: usize) -> &str {
        session.transcript().entries()[idx].text()
    }

    const HAPPY: &str = "event: start\ndata: {\"message_id\":\"m1\"}\n\n\
        event: state\ndata: {\"node\":\"intent_agent\",\"update_keys\":[\"intent\"]}\n\n\
        event: token\ndata: {\"delta\":\"Try \"}\n\n\
        event: token\ndata: {\"delta\":\"these\"}\n\n\
        event: final\ndata: {\"recommended_style_codes\":[\"A1\"]}\n\n\
        event: done\ndata: {}\n\n";

    #[tokio::test]
    async fn test_run_turn_completes_on_final() {
        let mut session = ChatSession::new("s1", StepPolicy::default());
        let turn = session.begin_turn("sneakers");

        let mut seen = Vec::new();
        let outcome = session
            .run_turn_with(
                turn,
                stream::iter(frames(HAPPY)),
                &CancellationToken::new(),
                |msg, _| seen.push(msg.kind().to_string()),
            )
            .await;

        assert_eq!(outcome, TurnOutcome::Completed);
        assert_eq!(seen, vec!["start", "state", "token", "token", "final"]);
        assert_eq!(assistant_text(&session, 1), "Try these");
        assert_eq!(session.transcript().message_id(), Some("m1"));
        assert!(session.transcript().is_idle());
    }

    #[tokio::test]
    async fn test_premature_close_records_error() {
        let mut session = ChatSession::new("s1", StepPolicy::default());
        let turn = session.begin_turn("q");
        let input = "event: token\ndata: {\"delta\":\"par\"}\n\nevent: token\ndata: {\"de";

        let outcome = session
            .run_turn(turn, stream::iter(frames(input)), &CancellationToken::new())
            .await;

        assert_eq!(outcome, TurnOutcome::Failed);
        assert_eq!(assistant_text(&session, 1), "par");
        assert_eq!(
            assistant_text(&session, 2),
            "Error: stream closed before completion"
        );
    }

    #[tokio::test]
    async fn test_stream_error_records_transport_failure() {
        let mut session = ChatSession::new("s1", StepPolicy::default());
        let turn = session.begin_turn("q");
        let items = vec![
            Ok(Frame {
                id: None,
                event: Some("token".into()),
                data: Some(json!({"delta": "x"})),
            }),
            Err(ClientError::new(ClientErrorKind::Stream, "connection reset")),
        ];

        let outcome = session
            .run_turn(turn, stream::iter(items), &CancellationToken::new())
            .await;

        assert_eq!(outcome, TurnOutcome::Failed);
        assert_eq!(assistant_text(&session, 2), "Error: connection reset");
    }

    #[tokio::test]
    async fn test_backend_error_fails_turn() {
        let mut session = ChatSession::new("s1", StepPolicy::default());
        let turn = session.begin_turn("q");
        let input = "event: error\ndata: {\"error\":\"graph failed\",\"error_type\":\"ValueError\"}\n\n";

        let outcome = session
            .run_turn(turn, stream::iter(frames(input)), &CancellationToken::new())
            .await;

        assert_eq!(outcome, TurnOutcome::Failed);
        assert_eq!(assistant_text(&session, 2), "Error: graph failed");
    }

    #[test]
    fn test_fail_turn_records_error_entry() {
        let mut session = ChatSession::new("s1", StepPolicy::default());
        let stale = session.begin_turn("one");
        let turn = session.begin_turn("two");
        let error = ClientError::new(ClientErrorKind::HttpStatus, "HTTP 500: graph unavailable");

        assert_eq!(session.fail_turn(stale, &error), None);
        let message = session.fail_turn(turn, &error).unwrap();
        assert!(message.is_terminal());

        let entries = session.transcript().entries();
        assert_eq!(entries.len(), 5);
        assert!(entries[3].is_done());
        assert_eq!(entries[4].text(), "Error: HTTP 500: graph unavailable");
        assert!(session.transcript().is_idle());
    }

    #[tokio::test]
    async fn test_cancelled_turn_applies_no_frames() {
        let mut session = ChatSession::new("s1", StepPolicy::default());
        let turn = session.begin_turn("q");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = session
            .run_turn(turn, stream::iter(frames(HAPPY)), &cancel)
            .await;

        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert_eq!(assistant_text(&session, 1), "");
        assert!(session.transcript().entries()[1].is_done());
        assert_eq!(session.current_turn(), None);
        assert!(!session.apply(turn, &Message::Token { delta: "late".into() }));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_frames() {
        let mut session = ChatSession::new("s1", StepPolicy::default());
        let turn = session.begin_turn("q");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let first = frames("event: token\ndata: {\"delta\":\"A\"}\n\n");
        let pending = stream::iter(first).chain(stream::pending());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = session.run_turn(turn, Box::pin(pending), &cancel).await;
        canceller.await.unwrap();

        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert_eq!(assistant_text(&session, 1), "A");
    }

    #[tokio::test]
    async fn test_stale_turn_is_superseded_and_ignored() {
        let mut session = ChatSession::new("s1", StepPolicy::default());
        let first = session.begin_turn("one");
        session.apply(first, &Message::Token { delta: "half".into() });
        let second = session.begin_turn("two");

        assert!(!session.apply(first, &Message::Token { delta: "stale".into() }));
        let outcome = session
            .run_turn(first, stream::iter(frames(HAPPY)), &CancellationToken::new())
            .await;
        assert_eq!(outcome, TurnOutcome::Superseded);

        assert!(session.apply(second, &Message::Token { delta: "fresh".into() }));
        assert_eq!(assistant_text(&session, 1), "half");
        assert!(session.transcript().entries()[1].is_done());
        assert_eq!(assistant_text(&session, 3), "fresh");
    }

    #[tokio::test]
    async fn test_feedback_uses_latest_message_id() {
        let mut session = ChatSession::new("s1", StepPolicy::default());
        assert_eq!(
            session.feedback_request(None, None),
            Err(SelectionError::MissingMessageId)
        );

        let turn = session.begin_turn("q");
        session
            .run_turn(turn, stream::iter(frames(HAPPY)), &CancellationToken::new())
            .await;
        session.selection_mut().toggle("A1");

        let request = session.feedback_request(Some(5), None).unwrap();
        assert_eq!(request.session_id, "s1");
        assert_eq!(request.message_id, "m1");
        assert_eq!(request.selected_style_codes, vec!["A1"]);

        session.record_feedback_saved(request.selected_style_codes);
        assert!(session.selection().is_saved("A1"));
        assert!(!session.selection().is_selected("A1"));

        session.begin_turn("next");
        assert!(!session.selection().is_saved("A1"));
    }
}
