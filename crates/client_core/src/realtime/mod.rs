//! Realtime event channel: MQTT over a websocket to the edge host.
//!
//! One worker task owns the socket. It negotiates the sync cursor, dispatches
//! frames in arrival order and reconnects after a fixed backoff, replaying the
//! last cursor so the server only sends what was missed.

pub mod dispatch;
pub mod mqtt;

use std::{sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use shared::protocol::{
    ClientSettingsUpdate, ForegroundState, HandshakePayload, RealtimeEvent, SyncQueueMode,
    SyncQueueRequest,
};
use tokio::{
    net::TcpStream,
    sync::{broadcast, mpsc, oneshot, watch, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        handshake::client::Request,
        http::{
            header::{COOKIE, ORIGIN, SEC_WEBSOCKET_PROTOCOL, USER_AGENT},
            HeaderValue,
        },
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    batch::QueryBatcher,
    config::ClientSettings,
    error::RealtimeError,
    retry::{realtime_recovery, ReconnectPolicy, Recovery},
    service::{
        APP_ID, DELTA_BATCH_SIZE, LEGACY_TOPIC, MAX_DELTAS_ABLE_TO_PROCESS, MQTT_CLIENT_ID,
        MQTT_SUBPROTOCOL, SUBSCRIBE_TOPICS, SYNC_API_VERSION, SYNC_ENCODING, TOPIC_CLIENT_SETTINGS,
        TOPIC_CREATE_QUEUE, TOPIC_DELTAS, TOPIC_FOREGROUND, TOPIC_GET_DIFFS,
        TOPIC_NOTIFY_DISCONNECT, TOPIC_ORCA_TYPING, TOPIC_PRESENCE, TOPIC_THREAD_TYPING,
    },
    session::{with_cancel, Session},
};

use self::{
    dispatch::{classify_delta, parse_presence, parse_sync_frame, parse_typing, SyncFrame},
    mqtt::{Connect, Packet, PacketBuffer, PacketIds, Publish, PROTOCOL_LEVEL, PROTOCOL_NAME},
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const MAX_SESSION_ID: u64 = 1 << 53;
const CONNACK_TIMEOUT: Duration = Duration::from_secs(10);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Receives everything the channel produces. Called from the worker task;
/// implementations must not block.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: RealtimeEvent);
}

impl EventSink for mpsc::UnboundedSender<RealtimeEvent> {
    fn on_event(&self, event: RealtimeEvent) {
        let _ = self.send(event);
    }
}

impl EventSink for broadcast::Sender<RealtimeEvent> {
    fn on_event(&self, event: RealtimeEvent) {
        let _ = self.send(event);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    /// Connected and subscribed; the sync queue is being opened or resumed.
    AwaitingCursor,
    Streaming,
    Reconnecting,
}

impl ChannelState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::AwaitingCursor | Self::Streaming)
    }
}

/// Resumption point in the delta stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RealtimeCursor {
    pub sequence_id: Option<u64>,
    pub sync_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub chat_on: bool,
    pub foreground: bool,
    pub reconnect: ReconnectPolicy,
    pub keepalive: Duration,
}

impl ChannelOptions {
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            chat_on: true,
            foreground: false,
            reconnect: ReconnectPolicy::fixed(settings.reconnect_backoff()),
            keepalive: settings.keepalive(),
        }
    }
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self::from_settings(&ClientSettings::default())
    }
}

#[derive(Debug, Clone, Copy)]
struct Flags {
    chat_on: bool,
    foreground: bool,
}

enum Command {
    Publish { topic: &'static str, payload: Vec<u8> },
    Disconnect,
}

struct Shared {
    state: watch::Sender<ChannelState>,
    cursor: Mutex<RealtimeCursor>,
    flags: Mutex<Flags>,
}

struct Worker {
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<Command>,
    handle: JoinHandle<()>,
}

pub struct RealtimeChannel {
    session: Arc<Session>,
    sink: Arc<dyn EventSink>,
    options: ChannelOptions,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl RealtimeChannel {
    pub fn new(session: Arc<Session>, sink: Arc<dyn EventSink>, options: ChannelOptions) -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        let flags = Flags {
            chat_on: options.chat_on,
            foreground: options.foreground,
        };
        Self {
            session,
            sink,
            options,
            shared: Arc::new(Shared {
                state,
                cursor: Mutex::new(RealtimeCursor::default()),
                flags: Mutex::new(flags),
            }),
            worker: Mutex::new(None),
        }
    }

    /// [`RealtimeChannel::new`] followed by [`RealtimeChannel::connect`].
    pub async fn open(
        session: Arc<Session>,
        sink: Arc<dyn EventSink>,
        options: ChannelOptions,
        cancel: &CancellationToken,
    ) -> Result<Self, RealtimeError> {
        let channel = Self::new(session, sink, options);
        channel.connect(cancel).await?;
        Ok(channel)
    }

    pub fn state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    pub async fn cursor(&self) -> RealtimeCursor {
        self.shared.cursor.lock().await.clone()
    }

    /// Connects and returns once the sync queue request is out. Transport
    /// failures after that are handled by reconnecting in the background;
    /// cancelling `cancel` ends the channel.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<(), RealtimeError> {
        let mut worker = self.worker.lock().await;
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return Err(RealtimeError::AlreadyConnected);
        }

        let cancel = cancel.child_token();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let context = WorkerContext {
            session: Arc::clone(&self.session),
            sink: Arc::clone(&self.sink),
            options: self.options.clone(),
            shared: Arc::clone(&self.shared),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(connection_worker(context, commands_rx, ready_tx));

        match ready_rx.await {
            Ok(Ok(())) => {
                *worker = Some(Worker {
                    cancel,
                    commands: commands_tx,
                    handle,
                });
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = handle.await;
                Err(err)
            }
            Err(_) if cancel.is_cancelled() => {
                let _ = handle.await;
                Err(RealtimeError::Cancelled)
            }
            Err(_) => Err(RealtimeError::Protocol(
                "realtime worker stopped before initial connect".into(),
            )),
        }
    }

    /// Publishes the foreground flag. Returns `false` without sending when the
    /// value is unchanged or the channel is not connected.
    pub async fn set_foreground(&self, foreground: bool) -> Result<bool, RealtimeError> {
        let mut flags = self.shared.flags.lock().await;
        if flags.foreground == foreground || !self.state().is_connected() {
            return Ok(false);
        }
        let payload = encode_json(&ForegroundState { foreground })?;
        if !self.send_command(TOPIC_FOREGROUND, payload).await {
            return Ok(false);
        }
        flags.foreground = foreground;
        Ok(true)
    }

    /// Publishes whether the user shows as available. Same no-op rules as
    /// [`RealtimeChannel::set_foreground`].
    pub async fn set_chat_on(&self, chat_on: bool) -> Result<bool, RealtimeError> {
        let mut flags = self.shared.flags.lock().await;
        if flags.chat_on == chat_on || !self.state().is_connected() {
            return Ok(false);
        }
        let payload = encode_json(&ClientSettingsUpdate {
            make_user_available_when_in_foreground: chat_on,
        })?;
        if !self.send_command(TOPIC_CLIENT_SETTINGS, payload).await {
            return Ok(false);
        }
        flags.chat_on = chat_on;
        Ok(true)
    }

    async fn send_command(&self, topic: &'static str, payload: Vec<u8>) -> bool {
        let worker = self.worker.lock().await;
        worker
            .as_ref()
            .is_some_and(|w| w.commands.send(Command::Publish { topic, payload }).is_ok())
    }

    /// Stops the worker and forgets the cursor. Safe to call at any time,
    /// any number of times.
    pub async fn disconnect(&self) {
        let worker = self.worker.lock().await.take();
        if let Some(mut worker) = worker {
            let _ = worker.commands.send(Command::Disconnect);
            worker.cancel.cancel();
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut worker.handle)
                .await
                .is_err()
            {
                warn!("realtime worker did not stop in time; aborting");
                worker.handle.abort();
            }
        }
        *self.shared.cursor.lock().await = RealtimeCursor::default();
        self.shared.state.send_replace(ChannelState::Disconnected);
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.cancel.cancel();
        }
    }
}

fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>, RealtimeError> {
    serde_json::to_vec(value).map_err(|err| RealtimeError::Protocol(err.to_string()))
}

enum SessionOutcome {
    Shutdown,
    Reconnect(String),
}

#[derive(Clone)]
struct WorkerContext {
    session: Arc<Session>,
    sink: Arc<dyn EventSink>,
    options: ChannelOptions,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

async fn connection_worker(
    context: WorkerContext,
    mut commands: mpsc::UnboundedReceiver<Command>,
    ready_tx: oneshot::Sender<Result<(), RealtimeError>>,
) {
    let mut ready_tx = Some(ready_tx);
    let mut connected = false;

    loop {
        let reason = match run_connected_session(
            &context,
            &mut commands,
            &mut ready_tx,
            &mut connected,
        )
        .await
        {
            Ok(SessionOutcome::Shutdown) => break,
            Ok(SessionOutcome::Reconnect(reason)) => reason,
            Err(err) => {
                if let Some(tx) = ready_tx.take() {
                    context.set_state(ChannelState::Disconnected);
                    let _ = tx.send(Err(err));
                    return;
                }
                if realtime_recovery(&err) == Recovery::Fatal {
                    error!(error = %err, "realtime channel stopped");
                    if connected {
                        context.sink.on_event(RealtimeEvent::Disconnected {
                            reason: err.to_string(),
                        });
                    }
                    break;
                }
                err.to_string()
            }
        };

        if connected {
            connected = false;
            context
                .sink
                .on_event(RealtimeEvent::Disconnected { reason: reason.clone() });
        }
        context.set_state(ChannelState::Reconnecting);
        info!(
            reason = %reason,
            backoff_ms = context.options.reconnect.backoff.as_millis() as u64,
            "realtime connection lost; reconnecting"
        );
        if !context.options.reconnect.wait(&context.cancel).await {
            break;
        }
    }

    context.set_state(ChannelState::Disconnected);
}

async fn run_connected_session(
    context: &WorkerContext,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    ready_tx: &mut Option<oneshot::Sender<Result<(), RealtimeError>>>,
    connected: &mut bool,
) -> Result<SessionOutcome, RealtimeError> {
    context.set_state(ChannelState::Connecting);
    let session_id = rand::rng().random_range(1..=MAX_SESSION_ID);
    let request = context.ws_request(session_id)?;

    let (mut socket, _) = tokio::select! {
        biased;
        _ = context.cancel.cancelled() => return Ok(SessionOutcome::Shutdown),
        result = connect_async(request) => result?,
    };

    let handshake = context.handshake(session_id).await;
    let username = serde_json::to_string(&handshake)
        .map_err(|err| RealtimeError::Protocol(err.to_string()))?;
    send_packet(
        &mut socket,
        &Packet::Connect(Connect {
            protocol_name: PROTOCOL_NAME.into(),
            level: PROTOCOL_LEVEL,
            clean_session: true,
            keep_alive: context.options.keepalive.as_secs().clamp(1, u64::from(u16::MAX)) as u16,
            client_id: MQTT_CLIENT_ID.into(),
            username: Some(username),
            password: None,
        }),
    )
    .await?;

    let mut buffer = PacketBuffer::default();
    let Some(code) = await_connack(&mut socket, &mut buffer, &context.cancel).await? else {
        let _ = socket.close(None).await;
        return Ok(SessionOutcome::Shutdown);
    };
    if code != 0 {
        let _ = socket.close(None).await;
        return Err(RealtimeError::Refused { code });
    }
    debug!(session_id, "realtime connection accepted");

    let mut ids = PacketIds::default();
    send_packet(
        &mut socket,
        &Packet::Subscribe {
            packet_id: ids.next_id(),
            topics: SUBSCRIBE_TOPICS.iter().map(|t| (t.to_string(), 0)).collect(),
        },
    )
    .await?;
    send_packet(
        &mut socket,
        &Packet::Unsubscribe {
            packet_id: ids.next_id(),
            topics: vec![LEGACY_TOPIC.to_string()],
        },
    )
    .await?;

    context.set_state(ChannelState::AwaitingCursor);
    context.request_queue(&mut socket, &mut ids).await?;

    *connected = true;
    context.sink.on_event(RealtimeEvent::Connected);
    if let Some(tx) = ready_tx.take() {
        let _ = tx.send(Ok(()));
    }

    let mut awaiting_pong = false;
    while let Some(packet) = buffer.next_packet()? {
        context
            .handle_packet(&mut socket, &mut ids, packet, &mut awaiting_pong)
            .await?;
    }

    let period = context.options.keepalive;
    let mut keepalive = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = context.cancel.cancelled() => {
                let _ = send_packet(&mut socket, &Packet::Disconnect).await;
                let _ = socket.close(None).await;
                return Ok(SessionOutcome::Shutdown);
            }
            command = commands.recv() => match command {
                Some(Command::Publish { topic, payload }) => {
                    debug!(topic, "publishing client state");
                    publish(&mut socket, &mut ids, topic, payload).await?;
                }
                Some(Command::Disconnect) | None => {
                    let _ = send_packet(&mut socket, &Packet::Disconnect).await;
                    let _ = socket.close(None).await;
                    return Ok(SessionOutcome::Shutdown);
                }
            },
            _ = keepalive.tick() => {
                if awaiting_pong {
                    return Ok(SessionOutcome::Reconnect("keepalive timed out".into()));
                }
                send_packet(&mut socket, &Packet::PingReq).await?;
                awaiting_pong = true;
            }
            frame = socket.next() => match frame {
                Some(Ok(Message::Binary(bytes))) => {
                    buffer.push(&bytes);
                    while let Some(packet) = buffer.next_packet()? {
                        context
                            .handle_packet(&mut socket, &mut ids, packet, &mut awaiting_pong)
                            .await?;
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    socket.send(Message::Pong(payload)).await?;
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Ok(SessionOutcome::Reconnect("connection closed by server".into()));
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Ok(SessionOutcome::Reconnect(err.to_string())),
            },
        }
    }
}

async fn send_packet(socket: &mut Socket, packet: &Packet) -> Result<(), RealtimeError> {
    socket.send(Message::Binary(packet.encode()?)).await?;
    Ok(())
}

async fn publish(
    socket: &mut Socket,
    ids: &mut PacketIds,
    topic: &str,
    payload: Vec<u8>,
) -> Result<(), RealtimeError> {
    send_packet(
        socket,
        &Packet::Publish(Publish {
            topic: topic.to_string(),
            qos: 1,
            retain: false,
            dup: false,
            packet_id: Some(ids.next_id()),
            payload,
        }),
    )
    .await
}

/// `None` when cancelled first.
async fn await_connack(
    socket: &mut Socket,
    buffer: &mut PacketBuffer,
    cancel: &CancellationToken,
) -> Result<Option<u8>, RealtimeError> {
    let deadline = tokio::time::sleep(CONNACK_TIMEOUT);
    tokio::pin!(deadline);
    loop {
        if let Some(packet) = buffer.next_packet()? {
            match packet {
                Packet::ConnAck { code, .. } => return Ok(Some(code)),
                other => debug!(?other, "ignoring packet before CONNACK"),
            }
            continue;
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            _ = &mut deadline => {
                return Err(RealtimeError::Protocol("timed out waiting for CONNACK".into()));
            }
            frame = socket.next() => match frame {
                Some(Ok(Message::Binary(bytes))) => buffer.push(&bytes),
                Some(Ok(Message::Close(_))) | None => {
                    return Err(RealtimeError::Protocol("connection closed before CONNACK".into()));
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err.into()),
            },
        }
    }
}

impl WorkerContext {
    fn set_state(&self, state: ChannelState) {
        self.shared.state.send_replace(state);
    }

    fn ws_request(&self, session_id: u64) -> Result<Request, RealtimeError> {
        let header = |value: &str| {
            HeaderValue::from_str(value)
                .map_err(|err| RealtimeError::Protocol(format!("invalid header value: {err}")))
        };

        let mut url = self.session.endpoints().realtime.clone();
        url.query_pairs_mut()
            .append_pair("sid", &session_id.to_string());
        let cookie = self.session.cookie_header(&url);

        let mut request = url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(MQTT_SUBPROTOCOL),
        );
        headers.insert(USER_AGENT, header(self.session.user_agent())?);
        headers.insert(
            ORIGIN,
            header(&self.session.endpoints().base.origin().ascii_serialization())?,
        );
        match cookie {
            Some(cookie) => {
                headers.insert(COOKIE, header(&cookie)?);
            }
            None => warn!(host = ?url.host_str(), "no cookies for the realtime host"),
        }
        Ok(request)
    }

    async fn handshake(&self, session_id: u64) -> HandshakePayload {
        let state = self.session.state().await;
        let flags = *self.shared.flags.lock().await;
        HandshakePayload {
            user_id: state.user_id,
            session_id,
            chat_on: flags.chat_on,
            foreground: flags.foreground,
            device_id: state.client_id,
            app_id: APP_ID,
            subscribe_topics: SUBSCRIBE_TOPICS.iter().map(|t| t.to_string()).collect(),
            publish_on_connect: Vec::new(),
            cp: 3,
            ecp: 10,
            client_type: "websocket".into(),
            mqtt_sid: String::new(),
            dc: String::new(),
            no_auto_fg: true,
            gas: None,
            pack: Vec::new(),
        }
    }

    /// Resumes from the sync token when one is known, otherwise opens a new
    /// queue at the inbox's current sequence id.
    async fn request_queue(
        &self,
        socket: &mut Socket,
        ids: &mut PacketIds,
    ) -> Result<(), RealtimeError> {
        let cursor = self.shared.cursor.lock().await.clone();
        let (topic, mode) = match cursor {
            RealtimeCursor {
                sequence_id: Some(sequence_id),
                sync_token: Some(sync_token),
            } => {
                info!(sequence_id, "resuming realtime queue");
                (
                    TOPIC_GET_DIFFS,
                    SyncQueueMode::Resume {
                        last_seq_id: sequence_id.to_string(),
                        sync_token,
                    },
                )
            }
            _ => {
                let batcher = QueryBatcher::new(&self.session);
                let sequence_id = with_cancel(&self.cancel, batcher.fetch_sequence_id()).await?;
                self.shared.cursor.lock().await.sequence_id = Some(sequence_id);
                info!(sequence_id, "creating realtime queue");
                (
                    TOPIC_CREATE_QUEUE,
                    SyncQueueMode::Create {
                        initial_titan_sequence_id: sequence_id.to_string(),
                        device_params: None,
                    },
                )
            }
        };

        let request = SyncQueueRequest {
            sync_api_version: SYNC_API_VERSION,
            max_deltas_able_to_process: MAX_DELTAS_ABLE_TO_PROCESS,
            delta_batch_size: DELTA_BATCH_SIZE,
            encoding: SYNC_ENCODING.into(),
            entity_fbid: self.session.user_id().await,
            mode,
        };
        publish(socket, ids, topic, encode_json(&request)?).await
    }

    async fn handle_packet(
        &self,
        socket: &mut Socket,
        ids: &mut PacketIds,
        packet: Packet,
        awaiting_pong: &mut bool,
    ) -> Result<(), RealtimeError> {
        match packet {
            Packet::Publish(publish) => {
                if let (1, Some(packet_id)) = (publish.qos, publish.packet_id) {
                    send_packet(socket, &Packet::PubAck { packet_id }).await?;
                }
                self.handle_publish(socket, ids, &publish.topic, &publish.payload)
                    .await
            }
            Packet::PingResp => {
                *awaiting_pong = false;
                Ok(())
            }
            Packet::SubAck { packet_id, codes } => {
                debug!(packet_id, ?codes, "subscribed");
                Ok(())
            }
            other => {
                debug!(?other, "ignoring packet");
                Ok(())
            }
        }
    }

    async fn handle_publish(
        &self,
        socket: &mut Socket,
        ids: &mut PacketIds,
        topic: &str,
        payload: &[u8],
    ) -> Result<(), RealtimeError> {
        let frame: Value = match serde_json::from_slice(payload) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(topic, error = %err, "dropping unparsable realtime frame");
                return Ok(());
            }
        };

        match topic {
            TOPIC_DELTAS => return self.handle_sync(socket, ids, frame).await,
            TOPIC_THREAD_TYPING | TOPIC_ORCA_TYPING => match parse_typing(&frame) {
                Ok(event) => self.sink.on_event(event),
                Err(err) => warn!(topic, error = %err, "dropping typing frame"),
            },
            TOPIC_PRESENCE => match parse_presence(&frame) {
                Ok(event) => self.sink.on_event(event),
                Err(err) => warn!(topic, error = %err, "dropping presence frame"),
            },
            TOPIC_NOTIFY_DISCONNECT => {
                warn!(frame = %frame, "server announced a disconnect");
                self.sink
                    .on_event(RealtimeEvent::ServerDisconnectNotice { raw: frame });
            }
            other => debug!(topic = other, "ignoring frame on unhandled topic"),
        }
        Ok(())
    }

    async fn handle_sync(
        &self,
        socket: &mut Socket,
        ids: &mut PacketIds,
        frame: Value,
    ) -> Result<(), RealtimeError> {
        match parse_sync_frame(&frame) {
            SyncFrame::QueueCreated {
                sync_token,
                first_sequence_id,
            } => {
                {
                    let mut cursor = self.shared.cursor.lock().await;
                    cursor.sync_token = Some(sync_token);
                    cursor.sequence_id = Some(first_sequence_id);
                }
                info!(sequence_id = first_sequence_id, "realtime queue ready");
                self.set_state(ChannelState::Streaming);
            }
            SyncFrame::QueueError { code } => {
                error!(code = %code, "realtime queue lost; events may have been missed");
                *self.shared.cursor.lock().await = RealtimeCursor::default();
                self.sink
                    .on_event(RealtimeEvent::Desynced { error_code: code });
                self.set_state(ChannelState::AwaitingCursor);
                self.request_queue(socket, ids).await?;
            }
            SyncFrame::Deltas {
                last_sequence_id,
                deltas,
            } => {
                {
                    let mut cursor = self.shared.cursor.lock().await;
                    if let Some(sequence_id) = last_sequence_id {
                        cursor.sequence_id = Some(sequence_id);
                    }
                    if cursor.sync_token.is_some() {
                        self.set_state(ChannelState::Streaming);
                    }
                }
                for delta in deltas {
                    match classify_delta(&delta) {
                        Ok(Some(event)) => self.sink.on_event(RealtimeEvent::Delta { event, raw: delta }),
                        Ok(None) => {}
                        Err(err) => warn!(error = %err, "dropping delta"),
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../tests/realtime_tests.rs"]
mod tests;
