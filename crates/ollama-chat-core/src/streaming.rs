//! Streaming replies and per-conversation generation tokens
//!
//! Every reply is tagged with the generation of its conversation at the time
//! the request started. Starting another reply (or deleting the turn or the
//! conversation) bumps the generation, and events from older replies are
//! dropped when they arrive.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::ai::{ChatRequest, ModelClient};
use crate::state::AnswerSlot;

/// Shared view of a conversation's current generation
#[derive(Debug, Clone)]
pub struct GenerationToken {
    counter: Arc<AtomicU64>,
    generation: u64,
}

impl GenerationToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// A newer reply has started for the same conversation
    pub fn is_stale(&self) -> bool {
        self.counter.load(Ordering::SeqCst) != self.generation
    }
}

#[derive(Debug, Default)]
pub struct Generations {
    counters: HashMap<String, Arc<AtomicU64>>,
    in_flight: HashSet<String>,
}

impl Generations {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&mut self, key: &str) -> Arc<AtomicU64> {
        self.counters
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone()
    }

    /// Start a new reply, invalidating any older one
    pub fn begin(&mut self, key: &str) -> GenerationToken {
        let counter = self.counter(key);
        let generation = counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.in_flight.insert(key.to_string());
        GenerationToken { counter, generation }
    }

    /// Invalidate whatever is in flight without starting anything
    pub fn cancel(&mut self, key: &str) {
        if let Some(counter) = self.counters.get(key) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        self.in_flight.remove(key);
    }

    pub fn is_current(&self, key: &str, generation: u64) -> bool {
        self.counters
            .get(key)
            .map(|c| c.load(Ordering::SeqCst) == generation)
            .unwrap_or(false)
    }

    pub fn finish(&mut self, key: &str, generation: u64) {
        if self.is_current(key, generation) {
            self.in_flight.remove(key);
        }
    }

    pub fn in_flight(&self, key: &str) -> bool {
        self.in_flight.contains(key)
    }

    /// Drop all tracking for a deleted conversation
    pub fn forget(&mut self, key: &str) {
        self.cancel(key);
        self.counters.remove(key);
    }
}

/// A reply that has been set up in the session and still has to be fetched
#[derive(Debug, Clone)]
pub struct PendingReply {
    pub conversation: String,
    pub slot: AnswerSlot,
    pub token: GenerationToken,
    pub request: ChatRequest,
}

impl PendingReply {
    pub fn generation(&self) -> u64 {
        self.token.generation()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEventKind {
    /// Everything received so far; replaces the answer text
    Fragment(String),
    Finished,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub conversation: String,
    pub generation: u64,
    pub slot: AnswerSlot,
    pub kind: StreamEventKind,
}

/// How a reply task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    Finished,
    Failed,
    /// Superseded by a newer reply
    Stale,
    /// Nobody is listening any more
    Closed,
}

/// Run one reply to completion, reporting progress through `sender`
pub async fn drive_reply<C, T>(
    client: &C,
    pending: PendingReply,
    sender: UnboundedSender<T>,
) -> ReplyOutcome
where
    C: ModelClient + ?Sized,
    T: From<StreamEvent>,
{
    let PendingReply {
        conversation,
        slot,
        token,
        request,
    } = pending;

    let event = |kind: StreamEventKind| {
        T::from(StreamEvent {
            conversation: conversation.clone(),
            generation: token.generation(),
            slot,
            kind,
        })
    };

    let mut stream = match client.chat_stream(request).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(conversation = %conversation, error = %e, "chat request failed");
            return match sender.send(event(StreamEventKind::Failed(e.to_string()))) {
                Ok(()) => ReplyOutcome::Failed,
                Err(_) => ReplyOutcome::Closed,
            };
        }
    };

    let mut accumulated = String::new();
    let mut fragments = 0usize;

    while let Some(item) = stream.next().await {
        if token.is_stale() {
            debug!(conversation = %conversation, generation = token.generation(), "reply superseded");
            return ReplyOutcome::Stale;
        }

        match item {
            Ok(fragment) => {
                accumulated.push_str(&fragment);
                fragments += 1;
                if sender
                    .send(event(StreamEventKind::Fragment(accumulated.clone())))
                    .is_err()
                {
                    return ReplyOutcome::Closed;
                }
            }
            Err(e) => {
                warn!(conversation = %conversation, error = %e, "reply stream failed");
                return match sender.send(event(StreamEventKind::Failed(e.to_string()))) {
                    Ok(()) => ReplyOutcome::Failed,
                    Err(_) => ReplyOutcome::Closed,
                };
            }
        }
    }

    debug!(conversation = %conversation, fragments, chars = accumulated.len(), "reply finished");
    match sender.send(event(StreamEventKind::Finished)) {
        Ok(()) => ReplyOutcome::Finished,
        Err(_) => ReplyOutcome::Closed,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ai::{FragmentStream, ModelInfo};
    use crate::error::{ChatError, Result};
    use crate::state::Settings;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Replays canned fragments; `Err` entries become stream failures
    pub(crate) struct ScriptedClient {
        pub script: Vec<std::result::Result<&'static str, &'static str>>,
        pub requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedClient {
        pub(crate) fn new(script: Vec<std::result::Result<&'static str, &'static str>>) -> Self {
            Self {
                script,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn chat_stream(&self, request: ChatRequest) -> Result<FragmentStream> {
            self.requests.lock().unwrap().push(request);
            let items: Vec<Result<String>> = self
                .script
                .iter()
                .map(|step| match step {
                    Ok(text) => Ok(text.to_string()),
                    Err(reason) => Err(ChatError::Model(reason.to_string())),
                })
                .collect();
            Ok(futures_util::stream::iter(items).boxed())
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>> {
            Ok(Vec::new())
        }
    }

    struct UnreachableClient;

    #[async_trait]
    impl ModelClient for UnreachableClient {
        async fn chat_stream(&self, _request: ChatRequest) -> Result<FragmentStream> {
            Err(ChatError::Status {
                status: 404,
                body: "model not found".to_string(),
            })
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>> {
            Ok(Vec::new())
        }
    }

    fn pending(generations: &mut Generations) -> PendingReply {
        PendingReply {
            conversation: "c1".to_string(),
            slot: AnswerSlot { message: 1, answer: 0 },
            token: generations.begin("c1"),
            request: ChatRequest::new(&Settings::new("m"), &[]),
        }
    }

    #[test]
    fn test_begin_invalidates_previous_generation() {
        let mut generations = Generations::new();
        let first = generations.begin("c1");
        let second = generations.begin("c1");

        assert!(first.is_stale());
        assert!(!second.is_stale());
        assert!(generations.is_current("c1", second.generation()));
        assert!(!generations.is_current("c1", first.generation()));
    }

    #[test]
    fn test_finish_only_clears_current_generation() {
        let mut generations = Generations::new();
        let first = generations.begin("c1");
        let second = generations.begin("c1");

        generations.finish("c1", first.generation());
        assert!(generations.in_flight("c1"));

        generations.finish("c1", second.generation());
        assert!(!generations.in_flight("c1"));
    }

    #[test]
    fn test_forget_makes_everything_stale() {
        let mut generations = Generations::new();
        let token = generations.begin("c1");
        generations.forget("c1");
        assert!(token.is_stale());
        assert!(!generations.is_current("c1", token.generation()));
    }

    #[tokio::test]
    async fn test_fragments_are_accumulated() {
        let mut generations = Generations::new();
        let client = ScriptedClient::new(vec![Ok("Hel"), Ok("lo"), Ok("!")]);
        let (tx, mut rx) = mpsc::unbounded_channel::<StreamEvent>();

        let outcome = drive_reply(&client, pending(&mut generations), tx).await;

        assert_eq!(outcome, ReplyOutcome::Finished);
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        assert_eq!(
            kinds,
            vec![
                StreamEventKind::Fragment("Hel".into()),
                StreamEventKind::Fragment("Hello".into()),
                StreamEventKind::Fragment("Hello!".into()),
                StreamEventKind::Finished,
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_error_reports_failure() {
        let mut generations = Generations::new();
        let client = ScriptedClient::new(vec![Ok("partial"), Err("connection reset")]);
        let (tx, mut rx) = mpsc::unbounded_channel::<StreamEvent>();

        let outcome = drive_reply(&client, pending(&mut generations), tx).await;

        assert_eq!(outcome, ReplyOutcome::Failed);
        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1].kind, StreamEventKind::Failed(ref r) if r.contains("connection reset")));
    }

    #[tokio::test]
    async fn test_request_error_reports_failure() {
        let mut generations = Generations::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<StreamEvent>();

        let outcome = drive_reply(&UnreachableClient, pending(&mut generations), tx).await;

        assert_eq!(outcome, ReplyOutcome::Failed);
        let event = rx.try_recv().unwrap();
        assert!(matches!(event.kind, StreamEventKind::Failed(ref r) if r.contains("404")));
    }

    #[tokio::test]
    async fn test_stale_reply_stops_quietly() {
        let mut generations = Generations::new();
        let client = ScriptedClient::new(vec![Ok("a"), Ok("b")]);
        let reply = pending(&mut generations);
        generations.begin("c1");
        let (tx, mut rx) = mpsc::unbounded_channel::<StreamEvent>();

        let outcome = drive_reply(&client, reply, tx).await;

        assert_eq!(outcome, ReplyOutcome::Stale);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_receiver_stops_reply() {
        let mut generations = Generations::new();
        let client = ScriptedClient::new(vec![Ok("a"), Ok("b")]);
        let (tx, rx) = mpsc::unbounded_channel::<StreamEvent>();
        drop(rx);

        let outcome = drive_reply(&client, pending(&mut generations), tx).await;

        assert_eq!(outcome, ReplyOutcome::Closed);
    }
}
