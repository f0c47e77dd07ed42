//! Connection manager: owns the single logical relay session.
//!
//! The manager runs in a dedicated tokio task. External code talks to it
//! through a typed command channel and observes it through a state watch
//! plus events on the bus ([`ServerStateChanged`], [`SessionEstablished`],
//! [`ConnectionLost`]).
//!
//! Reconnect behaviour: transient connect failures retry with delays from
//! the injected [`RetryPolicy`]. Once the failed-attempt count reaches the
//! notification threshold the manager emits [`ConnectionLost`] and a
//! `Disconnected` state exactly once per outage; the latch resets only
//! when a connect succeeds. Terminal denials (bad credential, version
//! skew, rate limit, multi-character policy) stop the retry loop and leave
//! the matching terminal state standing until the user acts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use charasync_shared::constants::CALL_TIMEOUT_SECS;
use charasync_shared::types::ServerState;

use crate::bus::EventBus;
use crate::error::NetError;
use crate::events::{ConnectionLost, ServerStateChanged, SessionEstablished};
use crate::hub::{self, HubClient};
use crate::retry::RetryPolicy;
use crate::transport::{AuthInfo, CredentialProvider, RelaySession, RelayTransport, SessionCall};

/// Failed attempts at which the one-time lost-connection notification fires.
const LOST_NOTIFY_THRESHOLD: u32 = 3;

/// Commands sent *into* the connection task.
#[derive(Debug)]
pub enum ConnectionCommand {
    /// Begin connecting and keep the session alive until told otherwise.
    Connect,
    /// Deliberate teardown back to `Offline`.
    Disconnect,
    /// Forward a call over the live session.
    Call(SessionCall),
    /// Stop the task entirely.
    Shutdown,
}

/// Configuration for spawning the connection task.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub auth: AuthInfo,
    pub call_timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(auth: AuthInfo) -> Self {
        Self {
            auth,
            call_timeout: Duration::from_secs(CALL_TIMEOUT_SECS),
        }
    }
}

/// Handle to the running connection task.
#[derive(Clone)]
pub struct ConnectionHandle {
    cmd_tx: mpsc::Sender<ConnectionCommand>,
    state_rx: watch::Receiver<ServerState>,
    call_timeout: Duration,
}

impl ConnectionHandle {
    /// Current session state.
    pub fn state(&self) -> ServerState {
        *self.state_rx.borrow()
    }

    /// Watch for state transitions.
    pub fn state_watch(&self) -> watch::Receiver<ServerState> {
        self.state_rx.clone()
    }

    /// Typed outbound call surface over this session.
    pub fn client(&self) -> HubClient {
        HubClient::new(self.cmd_tx.clone(), self.call_timeout)
    }

    pub async fn connect(&self) -> Result<(), NetError> {
        self.send(ConnectionCommand::Connect).await
    }

    pub async fn disconnect(&self) -> Result<(), NetError> {
        self.send(ConnectionCommand::Disconnect).await
    }

    pub async fn shutdown(&self) -> Result<(), NetError> {
        self.send(ConnectionCommand::Shutdown).await
    }

    async fn send(&self, cmd: ConnectionCommand) -> Result<(), NetError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| NetError::ChannelClosed)
    }
}

/// Spawn the connection manager task.
pub fn spawn_connection(
    transport: Arc<dyn RelayTransport>,
    policy: Arc<dyn RetryPolicy>,
    credentials: Arc<dyn CredentialProvider>,
    bus: Arc<EventBus>,
    config: ConnectionConfig,
) -> ConnectionHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel::<ConnectionCommand>(64);
    let (state_tx, state_rx) = watch::channel(ServerState::Offline);
    let call_timeout = config.call_timeout;

    let task = ConnectionTask {
        transport,
        policy,
        credentials,
        bus,
        cmd_rx,
        state_tx,
        auth: config.auth,
        attempt: 0,
        lost_notified: false,
    };

    tokio::spawn(task.run());

    ConnectionHandle {
        cmd_tx,
        state_rx,
        call_timeout,
    }
}

enum SessionEnd {
    /// Transport dropped out from under us; go back to retrying.
    Loss,
    /// Deliberate disconnect.
    Disconnect,
    Shutdown,
}

enum OnlineEnd {
    /// Clean teardown finished, state is `Offline`.
    Offline,
    /// A terminal denial is standing; state untouched.
    Terminal,
    Shutdown,
}

struct ConnectionTask {
    transport: Arc<dyn RelayTransport>,
    policy: Arc<dyn RetryPolicy>,
    credentials: Arc<dyn CredentialProvider>,
    bus: Arc<EventBus>,
    cmd_rx: mpsc::Receiver<ConnectionCommand>,
    state_tx: watch::Sender<ServerState>,
    auth: AuthInfo,
    attempt: u32,
    lost_notified: bool,
}

impl ConnectionTask {
    async fn run(mut self) {
        loop {
            match self.cmd_rx.recv().await {
                None | Some(ConnectionCommand::Shutdown) => break,
                Some(ConnectionCommand::Connect) => {
                    if matches!(self.run_online().await, OnlineEnd::Shutdown) {
                        break;
                    }
                }
                Some(ConnectionCommand::Disconnect) => {
                    // Already offline or in a terminal state.
                }
                Some(ConnectionCommand::Call(call)) => {
                    let _ = call.reply.send(Err(NetError::NotConnected));
                }
            }
        }
        info!("Connection task terminated");
    }

    /// Connect-retry-session loop. Runs until deliberate teardown, a
    /// terminal denial, or shutdown.
    async fn run_online(&mut self) -> OnlineEnd {
        self.attempt = 0;
        self.lost_notified = false;
        let mut reconnecting = false;

        loop {
            self.set_state(if reconnecting {
                ServerState::Reconnecting
            } else {
                ServerState::Connecting
            });

            match self.transport.connect(&self.auth).await {
                Ok(session) => {
                    // Successful cycle start: reset the outage latch.
                    self.attempt = 0;
                    self.lost_notified = false;
                    reconnecting = true;

                    info!(
                        shard = %session.connection.server_info.shard_name,
                        uid = %session.connection.user.uid,
                        "Connected to relay"
                    );
                    self.set_state(ServerState::Connected);
                    self.bus.publish(&SessionEstablished {
                        connection: session.connection.clone(),
                    });

                    match self.drive_session(session).await {
                        SessionEnd::Loss => continue,
                        SessionEnd::Disconnect => {
                            self.teardown();
                            return OnlineEnd::Offline;
                        }
                        SessionEnd::Shutdown => {
                            self.teardown();
                            return OnlineEnd::Shutdown;
                        }
                    }
                }
                Err(e) => {
                    if let Some(terminal) = e.terminal_state() {
                        warn!(error = %e, state = %terminal, "Connection attempt denied");
                        self.set_state(terminal);

                        if e.is_credential_failure() {
                            if let Some(fresh) = self.credentials.refresh().await {
                                info!("Re-authenticated, resuming connection attempts");
                                self.auth = fresh;
                                continue;
                            }
                        }
                        return OnlineEnd::Terminal;
                    }

                    let delay = self.policy.next_delay(self.attempt);
                    debug!(
                        attempt = self.attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Connect failed, retrying"
                    );

                    if self.attempt >= LOST_NOTIFY_THRESHOLD && !self.lost_notified {
                        self.lost_notified = true;
                        warn!("Connection to relay lost");
                        self.set_state(ServerState::Disconnected);
                        self.bus.publish(&ConnectionLost);
                    }
                    self.attempt += 1;

                    match self.wait_retry_delay(delay).await {
                        Some(SessionEnd::Disconnect) => {
                            self.teardown();
                            return OnlineEnd::Offline;
                        }
                        Some(SessionEnd::Shutdown) => return OnlineEnd::Shutdown,
                        _ => {}
                    }
                }
            }
        }
    }

    /// Pump the live session: inbound events to the bus, outbound calls
    /// from the command channel into the transport.
    async fn drive_session(&mut self, mut session: RelaySession) -> SessionEnd {
        loop {
            tokio::select! {
                event = session.event_rx.recv() => match event {
                    Some(event) => hub::dispatch_event(&self.bus, event),
                    None => {
                        warn!("Relay session dropped");
                        return SessionEnd::Loss;
                    }
                },
                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(ConnectionCommand::Shutdown) => return SessionEnd::Shutdown,
                    Some(ConnectionCommand::Disconnect) => return SessionEnd::Disconnect,
                    Some(ConnectionCommand::Connect) => {
                        // Already connected.
                    }
                    Some(ConnectionCommand::Call(call)) => {
                        if let Err(mpsc::error::SendError(call)) = session.call_tx.send(call).await {
                            let _ = call.reply.send(Err(NetError::ChannelClosed));
                            return SessionEnd::Loss;
                        }
                    }
                },
            }
        }
    }

    /// Sleep out the retry delay while staying responsive to commands.
    async fn wait_retry_delay(&mut self, delay: Duration) -> Option<SessionEnd> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return None,
                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(ConnectionCommand::Shutdown) => return Some(SessionEnd::Shutdown),
                    Some(ConnectionCommand::Disconnect) => return Some(SessionEnd::Disconnect),
                    Some(ConnectionCommand::Connect) => {
                        // Already in the retry loop.
                    }
                    Some(ConnectionCommand::Call(call)) => {
                        let _ = call.reply.send(Err(NetError::NotConnected));
                    }
                },
            }
        }
    }

    fn teardown(&mut self) {
        self.set_state(ServerState::Disconnecting);
        self.set_state(ServerState::Disconnected);
        self.set_state(ServerState::Offline);
    }

    fn set_state(&self, state: ServerState) {
        let _ = self.state_tx.send(state);
        self.bus.publish(&ServerStateChanged { state });
    }
}
