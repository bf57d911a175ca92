//! Per-connection session handling
//!
//! A session owns one client connection for its whole life:
//!
//! ```text
//! CONNECTING -> ACTIVE -> CLOSING -> CLOSED
//!      \_____________________________/  (room missing)
//! ```
//!
//! Each chat message becomes one worker-pool task that persists and broadcasts
//! the user message, then runs the agent. A message the pool rejects is never
//! seen by the rest of the room. A forwarding task per response drains the
//! task's pipe and broadcasts every chunk, ending with exactly one `is_end`
//! frame.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::room_manager::ConnectionRegistry;
use super::worker_pool::{TaskHandle, TaskOutcome, WorkerPool};
use crate::agents::{AgentRegistry, ResponseProducer, RoomContext};
use crate::error::{ChatError, Result};
use crate::generate_message_id;
use crate::protocol::{Frame, Inbound, MessageId, MessageKind, Role, RoomId, StreamAssembler};
use crate::store::{MessageRecord, MessageStore, RoomRecord};
use crate::transport::{Connection, PipeConsumer, PipeProducer, Pull, StreamPipe};

/// Error content sent when a room id does not resolve
pub const ROOM_NOT_FOUND: &str = "Chat room does not exist";
/// Error content broadcast when a response is cut short by shutdown
pub const RESPONSE_INTERRUPTED: &str = "Response interrupted by server shutdown";

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Shared services a session works with
#[derive(Clone)]
pub struct SessionServices {
    pub store: Arc<dyn MessageStore>,
    pub agents: Arc<AgentRegistry>,
    pub registry: Arc<ConnectionRegistry>,
    pub pool: Arc<WorkerPool>,
    /// Bounded wait of the forwarding loop on its pipe
    pub poll_interval: Duration,
    /// How long a closing session waits for its responses
    pub grace: Duration,
}

enum Event {
    Frame(String),
    Disconnected,
    Shutdown,
}

/// Protocol handler for one client connection
pub struct SessionHandler {
    room_id: RoomId,
    conn: Arc<dyn Connection>,
    services: SessionServices,
    shutdown: CancellationToken,
    state: SessionState,
    /// Forwarding tasks of responses started by this connection
    forwarders: Vec<JoinHandle<()>>,
}

impl SessionHandler {
    pub fn new(
        room_id: impl Into<RoomId>,
        conn: Arc<dyn Connection>,
        services: SessionServices,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            conn,
            services,
            shutdown,
            state: SessionState::Connecting,
            forwarders: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until the client leaves or shutdown is requested.
    ///
    /// `inbound` yields the text frames received from the client and ends when
    /// the client disconnects. Returns the terminal state.
    pub async fn run<S>(mut self, mut inbound: S) -> SessionState
    where
        S: Stream<Item = String> + Unpin + Send,
    {
        let room = match self.connect().await {
            Ok(room) => room,
            Err(e) => {
                info!(room_id = %self.room_id, conn_id = %self.conn.id(), error = %e, "rejecting connection");
                let reason = match e {
                    ChatError::RoomNotFound(_) => ROOM_NOT_FOUND,
                    ref other => other.message(),
                };
                self.send_local(Frame::error(reason));
                self.conn.close();
                self.state = SessionState::Closed;
                return self.state;
            }
        };
        self.state = SessionState::Active;

        let shutdown = self.shutdown.clone();
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => Event::Shutdown,
                next = inbound.next() => match next {
                    Some(text) => Event::Frame(text),
                    None => Event::Disconnected,
                },
            };

            match event {
                Event::Frame(text) => self.dispatch(&room, &text).await,
                Event::Disconnected => {
                    debug!(room_id = %self.room_id, conn_id = %self.conn.id(), "client disconnected");
                    break;
                }
                Event::Shutdown => {
                    debug!(room_id = %self.room_id, conn_id = %self.conn.id(), "closing session for shutdown");
                    break;
                }
            }

            self.forwarders.retain(|f| !f.is_finished());
        }

        self.close().await;
        self.state
    }

    /// CONNECTING: resolve the room, register, greet
    async fn connect(&mut self) -> Result<RoomRecord> {
        let room = self
            .services
            .store
            .get_room(&self.room_id)
            .await?
            .ok_or_else(|| ChatError::room_not_found(self.room_id.clone()))?;

        self.services
            .registry
            .add(&room.id, Arc::clone(&self.conn))
            .await;

        let welcome = MessageRecord::new(
            room.id.clone(),
            MessageKind::System,
            Role::System,
            format!("Welcome to chat room {}", room.id),
        );
        if let Err(e) = self.services.store.create_message(welcome.clone()).await {
            warn!(room_id = %room.id, error = %e, "failed to persist welcome message");
        }
        self.send_local(Frame::from(&welcome));

        info!(room_id = %room.id, conn_id = %self.conn.id(), agent = %room.agent_type, "session started");
        Ok(room)
    }

    /// ACTIVE: handle one client frame
    async fn dispatch(&mut self, room: &RoomRecord, text: &str) {
        match Inbound::classify(text) {
            Ok(Inbound::Heartbeat) => {
                debug!(room_id = %room.id, conn_id = %self.conn.id(), "heartbeat");
                self.send_local(Frame::pong());
            }
            Ok(Inbound::Chat { content }) => {
                if let Err(e) = self.start_response(room, content) {
                    self.report(room, e).await;
                }
            }
            Ok(Inbound::Ignored { kind }) => {
                debug!(room_id = %room.id, conn_id = %self.conn.id(), kind = %kind, "ignoring frame");
            }
            Err(e) => {
                debug!(room_id = %room.id, conn_id = %self.conn.id(), error = %e, "malformed frame");
                self.send_local(Frame::error(e.message()));
            }
        }
    }

    /// Queue the user message and its reply as one pool task
    fn start_response(&mut self, room: &RoomRecord, content: String) -> Result<()> {
        let services = &self.services;

        let producer = services.agents.producer(&room.agent_type)?;
        let ctx = RoomContext {
            room_id: room.id.clone(),
            agent_id: room.agent_id.clone(),
        };
        let response_id = generate_message_id();
        let (pipe_tx, pipe_rx) = StreamPipe::open();

        let task = services.pool.submit(produce_response(
            Arc::clone(&services.store),
            Arc::clone(&services.registry),
            producer,
            ctx,
            content,
            pipe_tx,
        ))?;

        debug!(room_id = %room.id, response_id = %response_id, "response task submitted");
        let forwarder = tokio::spawn(forward_response(
            services.clone(),
            room.id.clone(),
            response_id,
            pipe_rx,
            task,
        ));
        self.forwarders.push(forwarder);
        Ok(())
    }

    /// Capacity and protocol errors go to the sender only; anything else is a
    /// room-visible failure
    async fn report(&self, room: &RoomRecord, err: ChatError) {
        match err {
            ChatError::CapacitySaturated(_) | ChatError::Protocol(_) => {
                warn!(room_id = %room.id, conn_id = %self.conn.id(), error = %err, "message rejected");
                self.send_local(Frame::error(err.message()));
            }
            other => {
                error!(room_id = %room.id, conn_id = %self.conn.id(), error = %other, "failed to handle message");
                broadcast_logged(&self.services.registry, &room.id, &Frame::error(other.message())).await;
            }
        }
    }

    /// CLOSING then CLOSED
    async fn close(&mut self) {
        self.state = SessionState::Closing;

        let deadline = Instant::now() + self.services.grace;
        for forwarder in self.forwarders.drain(..) {
            match tokio::time::timeout_at(deadline, forwarder).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(room_id = %self.room_id, error = %e, "forwarding task failed"),
                Err(_) => warn!(
                    room_id = %self.room_id,
                    conn_id = %self.conn.id(),
                    "response still streaming after grace period"
                ),
            }
        }

        self.services.registry.remove_connection(self.conn.id()).await;
        self.conn.close();
        self.state = SessionState::Closed;
        info!(room_id = %self.room_id, conn_id = %self.conn.id(), "session closed");
    }

    /// Send a frame to this connection only
    fn send_local(&self, frame: Frame) {
        if let Err(e) = self.conn.send_frame(&frame) {
            debug!(conn_id = %self.conn.id(), error = %e, "direct send failed");
        }
    }
}

/// Worker-pool body: publish the user message, then run the producer and
/// push every chunk into the pipe
async fn produce_response(
    store: Arc<dyn MessageStore>,
    registry: Arc<ConnectionRegistry>,
    producer: Arc<dyn ResponseProducer>,
    ctx: RoomContext,
    text: String,
    pipe: PipeProducer,
) -> Result<()> {
    let user_message = store
        .create_message(MessageRecord::new(
            ctx.room_id.clone(),
            MessageKind::Message,
            Role::User,
            text.clone(),
        ))
        .await?;
    registry
        .broadcast(&ctx.room_id, &Frame::from(&user_message))
        .await?;

    let mut chunks = producer.generate_stream(ctx, text);
    while let Some(chunk) = chunks.next().await {
        pipe.push(chunk?)?;
    }
    Ok(())
}

/// Drain one response pipe into the room, then settle the response
async fn forward_response(
    services: SessionServices,
    room_id: RoomId,
    response_id: MessageId,
    mut pipe: PipeConsumer,
    task: TaskHandle<Result<()>>,
) {
    let mut assembler = StreamAssembler::new(response_id.clone());
    loop {
        match pipe.pull_timeout(services.poll_interval).await {
            Pull::Chunk(raw) => {
                let frame = assembler.push(&raw);
                broadcast_logged(&services.registry, &room_id, &frame).await;
            }
            Pull::Empty => continue,
            Pull::Closed => break,
        }
    }

    match task.join().await {
        TaskOutcome::Completed(Ok(())) => {
            if let Some(end) = assembler.finish() {
                broadcast_logged(&services.registry, &room_id, &end).await;
            }
            let chunks = assembler.chunk_count();
            let record = MessageRecord::new(
                room_id.clone(),
                MessageKind::Response,
                Role::Assistant,
                assembler.into_result(),
            )
            .with_id(response_id.clone());
            if let Err(e) = services.store.create_message(record).await {
                error!(room_id = %room_id, response_id = %response_id, error = %e, "failed to persist response");
            }
            debug!(room_id = %room_id, response_id = %response_id, chunks, "response complete");
        }
        TaskOutcome::Completed(Err(e)) => {
            warn!(room_id = %room_id, response_id = %response_id, error = %e, "producer failed");
            report_failure(&services, &room_id, &response_id, e.message()).await;
        }
        TaskOutcome::Panicked(reason) => {
            error!(room_id = %room_id, response_id = %response_id, reason = %reason, "producer panicked");
            report_failure(&services, &room_id, &response_id, "Agent failed to produce a reply").await;
        }
        TaskOutcome::Cancelled | TaskOutcome::Abandoned => {
            warn!(
                room_id = %room_id,
                response_id = %response_id,
                chunks = assembler.chunk_count(),
                "response interrupted"
            );
            let frame = Frame::error(RESPONSE_INTERRUPTED);
            broadcast_logged(&services.registry, &room_id, &frame).await;
        }
    }
}

/// Persist and broadcast a failed response; partial output is discarded
async fn report_failure(services: &SessionServices, room_id: &str, response_id: &str, reason: &str) {
    let record = MessageRecord::new(room_id, MessageKind::Error, Role::System, reason)
        .with_id(response_id);
    if let Err(e) = services.store.create_message(record.clone()).await {
        error!(room_id = %room_id, response_id = %response_id, error = %e, "failed to persist error");
    }
    broadcast_logged(&services.registry, room_id, &Frame::from(&record)).await;
}

async fn broadcast_logged(registry: &ConnectionRegistry, room_id: &str, frame: &Frame) {
    if let Err(e) = registry.broadcast(room_id, frame).await {
        error!(room_id = %room_id, frame_id = %frame.id, error = %e, "broadcast failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentInfo, RepeaterAgent};
    use crate::protocol::{ChunkKind, ProducerChunk};
    use crate::store::MemoryStore;
    use crate::server::worker_pool::MAINTENANCE_NOTICE;
    use crate::transport::connection::MockConnection;
    use async_trait::async_trait;
    use futures::channel::mpsc;
    use futures::stream::BoxStream;

    /// Producer replaying a fixed list of raw chunks, then optionally failing
    /// or never finishing
    struct ScriptedProducer {
        info: AgentInfo,
        chunks: Vec<String>,
        fail: bool,
        stall: bool,
    }

    #[async_trait]
    impl ResponseProducer for ScriptedProducer {
        fn info(&self) -> &AgentInfo {
            &self.info
        }

        async fn generate(&self, _ctx: &RoomContext, _text: &str) -> Result<String> {
            Ok(self.chunks.concat())
        }

        fn generate_stream(
            self: Arc<Self>,
            _ctx: RoomContext,
            _text: String,
        ) -> BoxStream<'static, Result<String>> {
            let mut items: Vec<Result<String>> = self.chunks.iter().cloned().map(Ok).collect();
            if self.fail {
                items.push(Err(ChatError::producer("model unavailable")));
            }
            let items = futures::stream::iter(items);
            if self.stall {
                items.chain(futures::stream::pending()).boxed()
            } else {
                items.boxed()
            }
        }
    }

    struct Fixture {
        services: SessionServices,
        store: Arc<MemoryStore>,
        room: RoomRecord,
    }

    async fn fixture(agent_type: &str, extra: Option<ScriptedProducer>) -> Fixture {
        fixture_with_workers(agent_type, extra, 2).await
    }

    async fn fixture_with_workers(
        agent_type: &str,
        extra: Option<ScriptedProducer>,
        workers: usize,
    ) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let mut agents = AgentRegistry::new();
        agents.register(Arc::new(RepeaterAgent::new()));
        if let Some(producer) = extra {
            agents.register(Arc::new(producer));
        }
        let room = store
            .create_room(RoomRecord::new(agent_type, "agent-1"))
            .await
            .unwrap();

        let registry = Arc::new(ConnectionRegistry::new());
        let services = SessionServices {
            store: store.clone(),
            agents: Arc::new(agents),
            registry: Arc::clone(&registry),
            pool: Arc::new(WorkerPool::new(workers, registry)),
            poll_interval: Duration::from_millis(5),
            grace: Duration::from_secs(1),
        };
        Fixture { services, store, room }
    }

    fn scripted(chunks: &[&str], fail: bool) -> ScriptedProducer {
        ScriptedProducer {
            info: AgentInfo::new("scripted", "Scripted", "test", &["stream"]),
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            fail,
            stall: false,
        }
    }

    fn stalling(chunks: &[&str]) -> ScriptedProducer {
        ScriptedProducer {
            stall: true,
            ..scripted(chunks, false)
        }
    }

    /// Frames received by `conn` once `done` holds for them
    async fn wait_for(conn: &MockConnection, done: impl Fn(&[Frame]) -> bool) -> Vec<Frame> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let frames = conn.frames();
                if done(&frames) {
                    return frames;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("expected frames never arrived")
    }

    fn interrupted(frames: &[Frame]) -> usize {
        frames
            .iter()
            .filter(|f| f.kind == MessageKind::Error && f.content == RESPONSE_INTERRUPTED)
            .count()
    }

    fn chat(text: &str) -> String {
        serde_json::json!({ "type": "message", "content": text }).to_string()
    }

    async fn run_session(fx: &Fixture, conn: Arc<MockConnection>, frames: Vec<String>) -> SessionState {
        let handler = SessionHandler::new(
            fx.room.id.clone(),
            conn,
            fx.services.clone(),
            CancellationToken::new(),
        );
        handler.run(futures::stream::iter(frames)).await
    }

    #[tokio::test]
    async fn test_missing_room_rejected() {
        let fx = fixture("repeater", None).await;
        let conn = MockConnection::new("c1");
        let handler = SessionHandler::new(
            "ghost",
            conn.clone(),
            fx.services.clone(),
            CancellationToken::new(),
        );
        assert_eq!(handler.state(), SessionState::Connecting);

        let state = handler.run(futures::stream::iter(vec![chat("hi")])).await;

        assert_eq!(state, SessionState::Closed);
        let frames = conn.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, MessageKind::Error);
        assert_eq!(frames[0].content, ROOM_NOT_FOUND);
        assert!(conn.is_closed());
        assert_eq!(fx.services.registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_heartbeat_is_direct_and_not_persisted() {
        let fx = fixture("repeater", None).await;
        let conn = MockConnection::new("c1");
        let peer = MockConnection::new("peer");
        fx.services.registry.add(&fx.room.id, peer.clone()).await;

        let ping = r#"{"type":"system","content":"ping"}"#.to_string();
        let state = run_session(&fx, conn.clone(), vec![ping]).await;
        assert_eq!(state, SessionState::Closed);

        let frames = conn.frames();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].content.starts_with("Welcome"));
        assert_eq!(frames[1].content, "pong");
        assert!(peer.frames().is_empty());

        let history = fx.store.list_messages(&fx.room.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history.iter().all(|m| m.content != "pong" && m.content != "ping"));
    }

    #[tokio::test]
    async fn test_chat_streams_to_whole_room() {
        let producer = scripted(
            &[
                &ProducerChunk::new(ChunkKind::Start, "Thinking about it: ").encode(),
                &ProducerChunk::new(ChunkKind::Thinking, "...").encode(),
                &ProducerChunk::new(ChunkKind::Result, "Hello ").encode(),
                "there",
            ],
            false,
        );
        let fx = fixture("scripted", Some(producer)).await;
        let conn = MockConnection::new("c1");
        let peer = MockConnection::new("peer");
        fx.services.registry.add(&fx.room.id, peer.clone()).await;

        run_session(&fx, conn.clone(), vec![chat("hi")]).await;

        for frames in [conn.frames()[1..].to_vec(), peer.frames()] {
            assert_eq!(frames[0].kind, MessageKind::Message);
            assert_eq!(frames[0].role, Role::User);
            assert_eq!(frames[0].content, "hi");

            let stream: Vec<_> = frames[1..].to_vec();
            assert_eq!(stream.len(), 5);
            assert!(stream.iter().all(|f| f.kind == MessageKind::Response
                && f.role == Role::Assistant
                && f.is_stream == Some(true)));
            assert!(stream.iter().all(|f| f.id == stream[0].id));
            assert!(stream[0].is_thinking() && stream[1].is_thinking());
            assert_eq!(stream.iter().filter(|f| f.is_end()).count(), 1);

            let last = stream.last().unwrap();
            assert!(last.is_end());
            assert_eq!(last.content, "Hello there");
        }

        let history = fx.store.list_messages(&fx.room.id).await.unwrap();
        let kinds: Vec<_> = history.iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![MessageKind::System, MessageKind::Message, MessageKind::Response]
        );
        assert_eq!(history[2].content, "Hello there");
        assert_eq!(history[2].id, peer.frames().last().unwrap().id);
        assert_eq!(fx.services.registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_malformed_frame_reported_locally() {
        let fx = fixture("repeater", None).await;
        let conn = MockConnection::new("c1");
        let peer = MockConnection::new("peer");
        fx.services.registry.add(&fx.room.id, peer.clone()).await;

        run_session(
            &fx,
            conn.clone(),
            vec!["{not json".to_string(), r#"{"type":"message"}"#.to_string()],
        )
        .await;

        let frames = conn.frames();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1].kind, MessageKind::Error);
        assert_eq!(frames[2].kind, MessageKind::Error);
        assert!(peer.frames().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_submission_reported_to_sender() {
        let fx = fixture("repeater", None).await;
        fx.services.pool.shutdown(None).await;
        let conn = MockConnection::new("c1");
        let peer = MockConnection::new("peer");
        fx.services.registry.add(&fx.room.id, peer.clone()).await;

        run_session(&fx, conn.clone(), vec![chat("anyone?")]).await;

        let frames = conn.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].kind, MessageKind::Error);
        assert!(peer.frames().is_empty());

        let history = fx.store.list_messages(&fx.room.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, MessageKind::System);
    }

    #[tokio::test]
    async fn test_producer_failure_broadcast_and_partial_discarded() {
        let producer = scripted(&[&ProducerChunk::new(ChunkKind::Result, "half").encode()], true);
        let fx = fixture("scripted", Some(producer)).await;
        let conn = MockConnection::new("c1");
        let peer = MockConnection::new("peer");
        fx.services.registry.add(&fx.room.id, peer.clone()).await;

        run_session(&fx, conn.clone(), vec![chat("go")]).await;

        let frames = peer.frames();
        let last = frames.last().unwrap();
        assert_eq!(last.kind, MessageKind::Error);
        assert_eq!(last.content, "model unavailable");
        assert!(frames.iter().all(|f| !f.is_end()));

        let history = fx.store.list_messages(&fx.room.id).await.unwrap();
        assert!(history.iter().all(|m| m.kind != MessageKind::Response));
        assert_eq!(history.last().unwrap().kind, MessageKind::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_streaming_response() {
        let fx = fixture("scripted", Some(stalling(&["partial"]))).await;
        let conn = MockConnection::new("c1");
        let peer = MockConnection::new("peer");
        fx.services.registry.add(&fx.room.id, peer.clone()).await;

        let (tx, rx) = mpsc::unbounded::<String>();
        let handler = SessionHandler::new(
            fx.room.id.clone(),
            conn.clone(),
            fx.services.clone(),
            CancellationToken::new(),
        );
        let session = tokio::spawn(handler.run(rx));

        tx.unbounded_send(chat("hi")).unwrap();
        wait_for(&peer, |frames| frames.len() >= 2).await;

        assert!(fx.services.pool.shutdown(Some(Duration::from_millis(100))).await);
        let frames = wait_for(&peer, |frames| interrupted(frames) == 1).await;

        assert_eq!(frames[0].content, "hi");
        assert_eq!(frames[1].kind, MessageKind::Response);
        assert_eq!(frames[1].content, "partial");
        assert_eq!(frames[2].content, MAINTENANCE_NOTICE);
        assert_eq!(frames.last().unwrap().content, RESPONSE_INTERRUPTED);
        assert!(frames.iter().all(|f| !f.is_end()));

        let history = fx.store.list_messages(&fx.room.id).await.unwrap();
        assert!(history.iter().all(|m| m.kind != MessageKind::Response));

        drop(tx);
        assert_eq!(session.await.unwrap(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_queued_response() {
        let fx = fixture_with_workers("scripted", Some(stalling(&["partial"])), 1).await;
        let conn = MockConnection::new("c1");
        let peer = MockConnection::new("peer");
        fx.services.registry.add(&fx.room.id, peer.clone()).await;

        let (tx, rx) = mpsc::unbounded::<String>();
        let handler = SessionHandler::new(
            fx.room.id.clone(),
            conn.clone(),
            fx.services.clone(),
            CancellationToken::new(),
        );
        let session = tokio::spawn(handler.run(rx));

        tx.unbounded_send(chat("first")).unwrap();
        wait_for(&peer, |frames| frames.len() >= 2).await;

        // The only slot is taken, so the second reply waits in the queue
        tx.unbounded_send(chat("second")).unwrap();
        while fx.services.pool.stats().queued == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        fx.services.pool.shutdown(Some(Duration::from_millis(100))).await;
        let frames = wait_for(&peer, |frames| interrupted(frames) == 2).await;

        assert!(frames.iter().all(|f| f.content != "second"));
        assert!(frames.iter().all(|f| !f.is_end()));
        let history = fx.store.list_messages(&fx.room.id).await.unwrap();
        let user: Vec<_> = history
            .iter()
            .filter(|m| m.kind == MessageKind::Message)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(user, vec!["first"]);

        drop(tx);
        assert_eq!(session.await.unwrap(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_shutdown_token_closes_session() {
        let fx = fixture("repeater", None).await;
        let conn = MockConnection::new("c1");
        let token = CancellationToken::new();
        let (_tx, rx) = mpsc::unbounded::<String>();

        let handler = SessionHandler::new(
            fx.room.id.clone(),
            conn.clone(),
            fx.services.clone(),
            token.clone(),
        );
        let session = tokio::spawn(handler.run(rx));

        // Wait until the session is registered
        while fx.services.registry.connection_count().await == 0 {
            tokio::task::yield_now().await;
        }
        token.cancel();

        assert_eq!(session.await.unwrap(), SessionState::Closed);
        assert_eq!(fx.services.registry.connection_count().await, 0);
        assert!(conn.is_closed());
    }
}
