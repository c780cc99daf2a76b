//! End-to-end tests: a scripted provider behind the relay server, reached over loopback HTTP by
//! the relay client and driven by a chat session.  No provider network access is needed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream;
use tokio::net::TcpListener;

use relaychat::relay::{BasicAuth, RELAY_PATH, RelayState, router};
use relaychat::store::{MESSAGES_KEY, save};
use relaychat::{
    ChatSession, Chunk, ChunkStream, Completion, Delta, Error, FileStore, MemoryStore, Message,
    RelayClient, RelayRequest, Result, SessionState, TurnOutcome,
};

const MODEL: &str = "gpt-4o-mini-2024-07-18";

enum Script {
    Chunks(Vec<Result<Chunk>>),
    Endless(Arc<AtomicBool>),
    OpenError(Error),
}

#[derive(Default)]
struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    seen: Mutex<Vec<(String, Vec<Message>)>>,
}

impl ScriptedProvider {
    fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    fn seen(&self) -> Vec<(String, Vec<Message>)> {
        self.seen.lock().unwrap().clone()
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Completion for ScriptedProvider {
    async fn complete(&self, model: &str, messages: &[Message]) -> Result<ChunkStream> {
        self.seen
            .lock()
            .unwrap()
            .push((model.to_string(), messages.to_vec()));
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("no scripted completion");
        match script {
            Script::Chunks(items) => Ok(Box::pin(stream::iter(items))),
            Script::Endless(dropped) => {
                let ticks = stream::unfold(DropFlag(dropped), |flag| async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Some((Ok(Chunk::delta(Delta::content("."))), flag))
                });
                Ok(Box::pin(ticks))
            }
            Script::OpenError(err) => Err(err),
        }
    }
}

fn content(text: &str) -> Result<Chunk> {
    Ok(Chunk::delta(Delta::content(text)))
}

fn role(role: &str) -> Result<Chunk> {
    Ok(Chunk::delta(Delta::role(role)))
}

async fn serve(provider: Arc<ScriptedProvider>, auth: Option<BasicAuth>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(RelayState::new(provider, auth));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}{RELAY_PATH}")
}

fn session(url: &str) -> ChatSession<MemoryStore, RelayClient> {
    let client = RelayClient::new(url).unwrap();
    let mut session = ChatSession::restore(MemoryStore::new(), client).unwrap();
    session.set_model(MODEL).unwrap();
    session
}

#[tokio::test]
async fn conversation_round_trip() {
    let provider = Arc::new(ScriptedProvider::default());
    let url = serve(provider.clone(), None).await;
    let mut session = session(&url);

    provider.push(Script::Chunks(vec![
        role("assistant"),
        content("Hel"),
        content("lo"),
        Ok(Chunk::Done),
    ]));
    session.submit("hi").await.unwrap();
    let mut streamed = String::new();
    let outcome = session
        .run_turn(|d| streamed.push_str(d.content.as_deref().unwrap_or_default()))
        .await;
    assert!(matches!(outcome, Some(TurnOutcome::Completed)));
    assert_eq!(streamed, "Hello");

    provider.push(Script::Chunks(vec![content("Fine."), Ok(Chunk::Done)]));
    session.submit("how are you?").await.unwrap();
    session.run_turn(|_| {}).await;

    assert_eq!(
        session.log(),
        &[
            Message::user("hi"),
            Message::assistant("Hello"),
            Message::user("how are you?"),
            Message::assistant("Fine."),
        ]
    );
    let seen = provider.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], (MODEL.to_string(), vec![Message::user("hi")]));
    assert_eq!(seen[1].1.len(), 3);
}

#[tokio::test]
async fn stream_closed_without_done_completes() {
    let provider = Arc::new(ScriptedProvider::default());
    let url = serve(provider.clone(), None).await;
    let mut session = session(&url);

    provider.push(Script::Chunks(vec![content("ok")]));
    session.submit("x").await.unwrap();
    let outcome = session.run_turn(|_| {}).await;
    assert!(matches!(outcome, Some(TurnOutcome::Completed)));
    assert_eq!(session.log(), &[Message::user("x"), Message::assistant("ok")]);
}

#[tokio::test]
async fn upstream_failure_keeps_partial_output_until_retry() {
    let provider = Arc::new(ScriptedProvider::default());
    let url = serve(provider.clone(), None).await;
    let mut session = session(&url);

    provider.push(Script::Chunks(vec![
        content("Par"),
        Err(Error::upstream("connection reset by peer", None)),
    ]));
    session.submit("x").await.unwrap();
    let outcome = session.run_turn(|_| {}).await;
    assert!(matches!(outcome, Some(TurnOutcome::Failed(ref e)) if e.is_upstream()));
    assert_eq!(
        session.log(),
        &[Message::user("x"), Message::assistant("Par")]
    );
    assert!(session.show_retry());

    provider.push(Script::Chunks(vec![
        content("Partial answer"),
        Ok(Chunk::Done),
    ]));
    session.retry().await.unwrap();
    session.run_turn(|_| {}).await;
    assert_eq!(
        session.log(),
        &[Message::user("x"), Message::assistant("Partial answer")]
    );
    assert_eq!(provider.seen()[1].1, vec![Message::user("x")]);
}

#[tokio::test]
async fn failure_before_any_delta_leaves_the_message_unanswered() {
    let provider = Arc::new(ScriptedProvider::default());
    let url = serve(provider.clone(), None).await;
    let mut session = session(&url);

    provider.push(Script::Chunks(vec![Err(Error::upstream("timeout", None))]));
    session.submit("x").await.unwrap();
    session.run_turn(|_| {}).await;
    assert_eq!(session.log(), &[Message::user("x")]);
    assert!(session.is_input_disabled());
    assert!(session.show_retry());

    session.dismiss_notice().unwrap();
    assert!(session.log().is_empty());
    assert_eq!(session.draft(), "x");
}

#[tokio::test]
async fn credentials_are_enforced() {
    let provider = Arc::new(ScriptedProvider::default());
    let auth = BasicAuth::new("alice", "s3cret");
    let url = serve(provider.clone(), Some(auth)).await;

    let mut anonymous = session(&url);
    let err = anonymous.submit("x").await.unwrap_err();
    assert!(err.is_unauthorized());
    assert!(anonymous.notice().unwrap().is_blocking());
    assert_eq!(anonymous.state(), SessionState::Idle);
    assert!(provider.seen().is_empty());

    let client = RelayClient::new(&url)
        .unwrap()
        .with_basic_auth("alice", "s3cret");
    let mut session = ChatSession::restore(MemoryStore::new(), client).unwrap();
    session.set_model(MODEL).unwrap();
    provider.push(Script::Chunks(vec![content("welcome"), Ok(Chunk::Done)]));
    session.submit("x").await.unwrap();
    session.run_turn(|_| {}).await;
    assert_eq!(
        session.log(),
        &[Message::user("x"), Message::assistant("welcome")]
    );
}

#[tokio::test]
async fn relay_rejects_unknown_models() {
    let provider = Arc::new(ScriptedProvider::default());
    let url = serve(provider.clone(), None).await;
    let client = RelayClient::new(&url).unwrap();

    let request = RelayRequest::new("gpt-2", vec![Message::user("x")]);
    match client.stream(&request).await {
        Ok(_) => panic!("unknown model was relayed"),
        Err(err) => assert_eq!(err.status_code(), Some(400)),
    }
    assert!(provider.seen().is_empty());
}

#[tokio::test]
async fn unconfigured_provider_is_unavailable() {
    let provider = Arc::new(ScriptedProvider::default());
    let url = serve(provider.clone(), None).await;
    let mut session = session(&url);

    provider.push(Script::OpenError(Error::configuration(
        "provider openai is not configured",
    )));
    let err = session.submit("x").await.unwrap_err();
    assert_eq!(err.status_code(), Some(503));
    assert_eq!(session.log(), &[Message::user("x")]);
}

#[tokio::test]
async fn abort_releases_the_upstream_stream() {
    let provider = Arc::new(ScriptedProvider::default());
    let url = serve(provider.clone(), None).await;
    let mut session = session(&url);

    let dropped = Arc::new(AtomicBool::new(false));
    provider.push(Script::Endless(dropped.clone()));
    session.submit("x").await.unwrap();
    assert!(session.next_event().await.is_some());
    assert!(session.abort());

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.log()[0], Message::user("x"));
    assert!(session.log()[1].content.starts_with('.'));
    assert!(session.notice().is_none());

    tokio::time::timeout(Duration::from_secs(5), async {
        while !dropped.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("upstream stream was never released");
}

#[tokio::test]
async fn conversation_survives_restart() {
    let root = std::env::temp_dir().join(format!("relaychat-it-{}", std::process::id()));
    let provider = Arc::new(ScriptedProvider::default());
    let url = serve(provider.clone(), None).await;

    {
        let client = RelayClient::new(&url).unwrap();
        let mut session = ChatSession::restore(FileStore::open(&root).unwrap(), client).unwrap();
        session.set_model("claude-3-opus-20240229").unwrap();
        provider.push(Script::Chunks(vec![content("Hello"), Ok(Chunk::Done)]));
        session.submit("hi").await.unwrap();
        session.run_turn(|_| {}).await;
    }

    let mut store = FileStore::open(&root).unwrap();
    let interrupted = vec![
        Message::user("hi"),
        Message::assistant("Hello"),
        Message::user("are you there?"),
    ];
    save(&mut store, MESSAGES_KEY, &interrupted).unwrap();

    let client = RelayClient::new(&url).unwrap();
    let session = ChatSession::restore(store, client).unwrap();
    assert_eq!(session.model(), "claude-3-opus-20240229");
    assert_eq!(
        session.log(),
        &[Message::user("hi"), Message::assistant("Hello")]
    );
    assert_eq!(session.draft(), "are you there?");
    assert_eq!(provider.seen()[0].0, "claude-3-opus-20240229");

    std::fs::remove_dir_all(&root).unwrap();
}
