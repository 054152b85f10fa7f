//! Interactive SSH PTY session built on russh.
//!
//! One session owns one SSH transport and one shell channel. The channel is
//! serviced by a dedicated task spawned at connect time: it forwards channel
//! output into a bounded queue and applies write/resize commands, so callers
//! never contend for the channel itself.

use russh::client::{self, AuthResult, Handle};
use russh::keys::{decode_secret_key, PrivateKeyWithHashAlg};
use russh::{ChannelMsg, Disconnect};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use termgate_core::{Credentials, Secret};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Maximum bytes per output chunk handed to the relay.
const CHUNK_SIZE: usize = 4096;
/// Bounded output queue depth; a slow relay backpressures the channel task.
const OUTPUT_QUEUE: usize = 64;
const COMMAND_QUEUE: usize = 32;

/// Session lifecycle. `Closed` is terminal: a closed session is discarded,
/// never reconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Closed,
}

/// Connection parameters the server applies to every session.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub term: String,
    pub cols: u16,
    pub rows: u16,
    pub connect_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            term: "xterm-256color".into(),
            cols: 120,
            rows: 30,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Why a connect attempt failed. The HTTP layer flattens this to
/// `{success: false, message}`, so each variant carries the exact
/// user-facing message.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Authentication failed")]
    Auth,

    #[error("Connection timeout to {host}:{port}")]
    Timeout { host: String, port: u16 },

    #[error("Connection error: {0}")]
    Connection(String),

    // Deliberately generic: never leaks which key codec rejected the input.
    #[error("Invalid private key format")]
    InvalidKey,

    #[error("{0}")]
    InvalidState(String),

    #[error("Error: {0}")]
    Other(String),
}

/// Commands the session forwards to its channel task.
enum ChannelCommand {
    Send(Vec<u8>, oneshot::Sender<bool>),
    Resize(u16, u16, oneshot::Sender<bool>),
}

/// One interactive SSH PTY session.
pub struct SshSession {
    id: String,
    state: Mutex<SessionState>,
    /// `username@host`, set on successful connect.
    remote: Mutex<Option<String>>,
    /// Last acknowledged terminal geometry.
    geometry: Mutex<(u16, u16)>,
    /// SSH transport; present iff the session reached `Connected`.
    handle: Mutex<Option<Handle<AcceptingHandler>>>,
    /// Sender into the channel task; dropping it stops the task.
    commands: Mutex<Option<mpsc::Sender<ChannelCommand>>>,
    /// Output queue receiver, handed out once to the attaching relay.
    output: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    /// Cleared by the channel task when the shell channel ends.
    channel_open: Arc<AtomicBool>,
}

impl SshSession {
    pub fn new(id: String) -> Self {
        Self {
            id,
            state: Mutex::new(SessionState::Idle),
            remote: Mutex::new(None),
            geometry: Mutex::new((0, 0)),
            handle: Mutex::new(None),
            commands: Mutex::new(None),
            output: Mutex::new(None),
            channel_open: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    pub async fn geometry(&self) -> (u16, u16) {
        *self.geometry.lock().await
    }

    /// Connect, authenticate, and open the interactive shell channel.
    ///
    /// Precondition: the session is `Idle`; there is never more than one
    /// in-flight attempt. On failure the session returns to `Idle` and the
    /// caller is expected to remove it from the registry. On success the
    /// returned message is `Connected to username@host`.
    pub async fn connect(
        &self,
        credentials: &Credentials,
        options: &ConnectOptions,
    ) -> Result<String, ConnectError> {
        {
            let mut state = self.state.lock().await;
            match *state {
                SessionState::Idle => *state = SessionState::Connecting,
                SessionState::Closed => {
                    return Err(ConnectError::InvalidState(
                        "session is closed; open a new session".into(),
                    ));
                }
                _ => {
                    return Err(ConnectError::InvalidState(
                        "session already connecting or connected".into(),
                    ));
                }
            }
        }

        match self.establish(credentials, options).await {
            Ok(message) => Ok(message),
            Err(e) => {
                let mut state = self.state.lock().await;
                // A concurrent disconnect may already have closed the session.
                if *state == SessionState::Connecting {
                    *state = SessionState::Idle;
                }
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        credentials: &Credentials,
        options: &ConnectOptions,
    ) -> Result<String, ConnectError> {
        let config = Arc::new(client::Config::default());
        let handler = AcceptingHandler {
            session_id: self.id.clone(),
        };
        let address = credentials.address();

        debug!(session_id = %self.id, address = %address, "dialing SSH server");

        let mut handle = timeout(
            options.connect_timeout,
            client::connect(config, address.as_str(), handler),
        )
        .await
        .map_err(|_| ConnectError::Timeout {
            host: credentials.host.clone(),
            port: credentials.port,
        })?
        .map_err(|e| match e {
            russh::Error::IO(io) => ConnectError::Connection(io.to_string()),
            other => ConnectError::Other(other.to_string()),
        })?;

        let auth_result = match &credentials.secret {
            Secret::Password(password) => handle
                .authenticate_password(&credentials.username, password)
                .await
                .map_err(|e| ConnectError::Other(e.to_string()))?,
            Secret::PrivateKey { key, passphrase } => {
                let key = decode_secret_key(key, passphrase.as_deref())
                    .map_err(|_| ConnectError::InvalidKey)?;
                let hash_alg = handle
                    .best_supported_rsa_hash()
                    .await
                    .ok()
                    .flatten()
                    .flatten();
                handle
                    .authenticate_publickey(
                        &credentials.username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
                    .map_err(|e| ConnectError::Other(e.to_string()))?
            }
        };

        match auth_result {
            AuthResult::Success => {}
            AuthResult::Failure { .. } => return Err(ConnectError::Auth),
        }

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| ConnectError::Other(e.to_string()))?;
        channel
            .request_pty(
                false,
                &options.term,
                options.cols as u32,
                options.rows as u32,
                0,
                0,
                &[],
            )
            .await
            .map_err(|e| ConnectError::Other(e.to_string()))?;
        channel
            .request_shell(false)
            .await
            .map_err(|e| ConnectError::Other(e.to_string()))?;

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let (out_tx, out_rx) = mpsc::channel(OUTPUT_QUEUE);
        self.channel_open.store(true, Ordering::SeqCst);
        tokio::spawn(run_channel(
            self.id.clone(),
            channel,
            cmd_rx,
            out_tx,
            self.channel_open.clone(),
        ));

        *self.remote.lock().await = Some(credentials.remote());
        *self.geometry.lock().await = (options.cols, options.rows);
        *self.commands.lock().await = Some(cmd_tx);
        *self.output.lock().await = Some(out_rx);
        *self.handle.lock().await = Some(handle);

        {
            let mut state = self.state.lock().await;
            if *state == SessionState::Closed {
                // A concurrent teardown won the race; undo everything.
                drop(state);
                self.disconnect().await;
                return Err(ConnectError::Other("session closed during connect".into()));
            }
            *state = SessionState::Connected;
        }

        info!(
            session_id = %self.id,
            remote = %credentials.remote(),
            "SSH session connected"
        );
        Ok(format!("Connected to {}", credentials.remote()))
    }

    /// Write raw bytes to the shell, verbatim. Returns false if the session
    /// is not connected or the write failed; the two are not distinguished.
    pub async fn send(&self, data: &[u8]) -> bool {
        let tx = match self.commands.lock().await.as_ref() {
            Some(tx) => tx.clone(),
            None => return false,
        };
        let (ack, done) = oneshot::channel();
        if tx
            .send(ChannelCommand::Send(data.to_vec(), ack))
            .await
            .is_err()
        {
            return false;
        }
        done.await.unwrap_or(false)
    }

    /// Request a PTY geometry change. Updates stored geometry only when the
    /// channel acknowledged the change.
    pub async fn resize(&self, cols: u16, rows: u16) -> bool {
        let tx = match self.commands.lock().await.as_ref() {
            Some(tx) => tx.clone(),
            None => return false,
        };
        let (ack, done) = oneshot::channel();
        if tx
            .send(ChannelCommand::Resize(cols, rows, ack))
            .await
            .is_err()
        {
            return false;
        }
        let ok = done.await.unwrap_or(false);
        if ok {
            *self.geometry.lock().await = (cols, rows);
        }
        ok
    }

    /// Hand the output queue to the attaching relay. Returns `None` on the
    /// second call: exactly one consumer may read a session's output.
    pub async fn take_output(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.output.lock().await.take()
    }

    /// Tear the session down. Idempotent and infallible; close-time errors
    /// on an already-broken transport are swallowed.
    pub async fn disconnect(&self) {
        *self.state.lock().await = SessionState::Closed;

        // Dropping the command sender stops the channel task, which sends
        // EOF on the shell channel before exiting.
        self.commands.lock().await.take();
        self.output.lock().await.take();

        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "session closed", "en")
                .await
            {
                debug!(session_id = %self.id, error = %e, "disconnect message not delivered");
            }
            let remote = self.remote.lock().await.take();
            info!(
                session_id = %self.id,
                remote = remote.as_deref().unwrap_or("unknown"),
                "SSH session disconnected"
            );
        }
    }

    /// Probe whether the session is actually usable, consulting the live
    /// transport rather than only the cached state.
    pub async fn is_alive(&self) -> bool {
        if *self.state.lock().await != SessionState::Connected {
            return false;
        }
        if !self.channel_open.load(Ordering::SeqCst) {
            return false;
        }
        match self.handle.lock().await.as_ref() {
            Some(handle) => !handle.is_closed(),
            None => false,
        }
    }
}

/// Services one shell channel: forwards output into the queue and applies
/// commands until the channel ends or the session is torn down.
///
/// A detached consumer (dropped output receiver) does not end the task:
/// output is discarded from then on, and the shell and command path stay
/// live so the session remains usable over the REST surface.
async fn run_channel(
    session_id: String,
    mut channel: russh::Channel<client::Msg>,
    mut commands: mpsc::Receiver<ChannelCommand>,
    output: mpsc::Sender<Vec<u8>>,
    channel_open: Arc<AtomicBool>,
) {
    let mut forwarding = true;
    loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    if forwarding && forward_chunks(&output, &data).await.is_err() {
                        debug!(session_id = %session_id, "output consumer gone, discarding");
                        forwarding = false;
                    }
                }
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    // stderr of the remote shell; relayed like stdout
                    if forwarding && forward_chunks(&output, &data).await.is_err() {
                        forwarding = false;
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!(session_id = %session_id, exit_status, "remote shell exited");
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    debug!(session_id = %session_id, "shell channel ended");
                    break;
                }
                Some(_) => {}
            },
            cmd = commands.recv() => match cmd {
                Some(ChannelCommand::Send(bytes, ack)) => {
                    let ok = channel.data(&bytes[..]).await.is_ok();
                    let _ = ack.send(ok);
                    if !ok {
                        warn!(session_id = %session_id, "channel write failed");
                        break;
                    }
                }
                Some(ChannelCommand::Resize(cols, rows, ack)) => {
                    let ok = channel
                        .window_change(cols as u32, rows as u32, 0, 0)
                        .await
                        .is_ok();
                    let _ = ack.send(ok);
                }
                None => {
                    let _ = channel.eof().await;
                    break;
                }
            },
        }
    }
    channel_open.store(false, Ordering::SeqCst);
    // output sender drops here; the relay sees end-of-stream
}

/// Forward channel data in bounded chunks, preserving order.
async fn forward_chunks(output: &mpsc::Sender<Vec<u8>>, data: &[u8]) -> Result<(), ()> {
    for chunk in data.chunks(CHUNK_SIZE) {
        output.send(chunk.to_vec()).await.map_err(|_| ())?;
    }
    Ok(())
}

/// Client handler that accepts any presented host key.
///
/// This mirrors the trust model of the original service: no pinning, no
/// known_hosts. Integrators exposing this to untrusted networks should
/// replace it with a verifying handler.
struct AcceptingHandler {
    session_id: String,
}

impl client::Handler for AcceptingHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            session_id = %self.session_id,
            algorithm = ?server_public_key.algorithm(),
            "accepting presented host key"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use termgate_core::Credentials;

    fn password_creds(host: &str, port: u16) -> Credentials {
        Credentials::from_parts(
            host.into(),
            Some(port),
            "tester".into(),
            Some("secret".into()),
            None,
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn new_session_is_idle() {
        let session = SshSession::new("s1".into());
        assert_eq!(session.state().await, SessionState::Idle);
        assert!(!session.is_alive().await);
    }

    #[tokio::test]
    async fn send_and_resize_require_connection() {
        let session = SshSession::new("s1".into());
        assert!(!session.send(b"echo hi\n").await);
        assert!(!session.resize(80, 24).await);
    }

    #[tokio::test]
    async fn take_output_requires_connection() {
        let session = SshSession::new("s1".into());
        assert!(session.take_output().await.is_none());
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let session = SshSession::new("s1".into());
        session.disconnect().await;
        session.disconnect().await;
        session.disconnect().await;
        assert_eq!(session.state().await, SessionState::Closed);
    }

    #[tokio::test]
    async fn closed_session_cannot_reconnect() {
        let session = SshSession::new("s1".into());
        session.disconnect().await;
        let err = session
            .connect(&password_creds("127.0.0.1", 22), &ConnectOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::InvalidState(_)));
    }

    #[tokio::test]
    async fn refused_connection_reports_connection_error_and_resets_state() {
        // Port 1 on loopback is essentially never listening.
        let session = SshSession::new("s1".into());
        let err = session
            .connect(&password_creds("127.0.0.1", 1), &ConnectOptions::default())
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(
            message.starts_with("Connection error:") || message.starts_with("Error:"),
            "unexpected message: {message}"
        );
        assert_eq!(session.state().await, SessionState::Idle);
    }

    #[test]
    fn invalid_key_yields_generic_message() {
        assert!(decode_secret_key("this is not a private key", None).is_err());
        assert_eq!(
            ConnectError::InvalidKey.to_string(),
            "Invalid private key format"
        );
    }

    #[tokio::test]
    async fn connect_error_messages_are_stable() {
        assert_eq!(ConnectError::Auth.to_string(), "Authentication failed");
        assert_eq!(
            ConnectError::Timeout {
                host: "example.com".into(),
                port: 2222
            }
            .to_string(),
            "Connection timeout to example.com:2222"
        );
        assert_eq!(
            ConnectError::Connection("connection refused".into()).to_string(),
            "Connection error: connection refused"
        );
        assert_eq!(
            ConnectError::Other("boom".into()).to_string(),
            "Error: boom"
        );
    }

    // Live tests against a real SSH server; point TERMGATE_TEST_HOST,
    // TERMGATE_TEST_USER, TERMGATE_TEST_PASS at one and drop the ignore.

    fn live_creds() -> Option<Credentials> {
        let host = std::env::var("TERMGATE_TEST_HOST").ok()?;
        let user = std::env::var("TERMGATE_TEST_USER").ok()?;
        let pass = std::env::var("TERMGATE_TEST_PASS").ok()?;
        Credentials::from_parts(host, Some(22), user, Some(pass), None, None).ok()
    }

    #[tokio::test]
    #[ignore = "requires a reachable SSH server (TERMGATE_TEST_* env)"]
    async fn live_connect_reports_remote_in_message() {
        let creds = live_creds().expect("TERMGATE_TEST_* not set");
        let session = SshSession::new("live".into());
        let message = session
            .connect(&creds, &ConnectOptions::default())
            .await
            .unwrap();
        assert_eq!(message, format!("Connected to {}", creds.remote()));
        assert_eq!(session.state().await, SessionState::Connected);
        assert!(session.is_alive().await);
        assert_eq!(session.geometry().await, (120, 30));
        session.disconnect().await;
    }

    #[tokio::test]
    #[ignore = "requires a reachable SSH server (TERMGATE_TEST_* env)"]
    async fn live_wrong_password_is_auth_failure() {
        let mut creds = live_creds().expect("TERMGATE_TEST_* not set");
        creds.secret = Secret::Password("definitely-wrong-password".into());
        let session = SshSession::new("live".into());
        let err = session
            .connect(&creds, &ConnectOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Authentication failed");
        assert_eq!(session.state().await, SessionState::Idle);
    }

    #[tokio::test]
    #[ignore = "requires a reachable SSH server (TERMGATE_TEST_* env)"]
    async fn live_echo_round_trip_preserves_order() {
        let creds = live_creds().expect("TERMGATE_TEST_* not set");
        let session = SshSession::new("live".into());
        session
            .connect(&creds, &ConnectOptions::default())
            .await
            .unwrap();
        let mut output = session.take_output().await.unwrap();

        assert!(session.send(b"echo round-trip-marker\n").await);

        let mut collected = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            match timeout(Duration::from_millis(500), output.recv()).await {
                Ok(Some(chunk)) => {
                    collected.extend_from_slice(&chunk);
                    if String::from_utf8_lossy(&collected).contains("round-trip-marker") {
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => {}
            }
        }
        assert!(String::from_utf8_lossy(&collected).contains("round-trip-marker"));
        session.disconnect().await;
    }

    #[tokio::test]
    #[ignore = "requires a reachable SSH server (TERMGATE_TEST_* env)"]
    async fn live_detached_consumer_leaves_shell_running() {
        let creds = live_creds().expect("TERMGATE_TEST_* not set");
        let session = SshSession::new("live".into());
        session
            .connect(&creds, &ConnectOptions::default())
            .await
            .unwrap();

        // Attach, then walk away like a closed WebSocket does.
        let output = session.take_output().await.unwrap();
        drop(output);

        // The shell must still accept input and produce (discarded) output.
        assert!(session.send(b"echo still-here\n").await);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(session.is_alive().await);
        assert_eq!(session.state().await, SessionState::Connected);
        assert!(session.resize(90, 30).await);
        assert_eq!(session.geometry().await, (90, 30));
        session.disconnect().await;
    }

    #[tokio::test]
    #[ignore = "requires a reachable SSH server (TERMGATE_TEST_* env)"]
    async fn live_resize_updates_geometry() {
        let creds = live_creds().expect("TERMGATE_TEST_* not set");
        let session = SshSession::new("live".into());
        session
            .connect(&creds, &ConnectOptions::default())
            .await
            .unwrap();
        assert!(session.resize(100, 40).await);
        assert_eq!(session.geometry().await, (100, 40));
        assert!(session.resize(81, 25).await);
        assert_eq!(session.geometry().await, (81, 25));
        session.disconnect().await;
    }
}
