//! Config sync channel for the settings UI.
//!
//! Newline-delimited JSON over a localhost TCP socket. Commands carry a
//! `"cmd"` tag, replies an `"event"` tag. Connections never touch the
//! registry: each command becomes a [`SyncRequest`] sent to the main loop,
//! which owns the registry and answers over a oneshot channel.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::input::hotkey::{HotkeyBackend, HotkeyRegistry, RegistrationReport, RejectedBinding};
use crate::store::HotkeyBinding;

/// Longest command line accepted before the connection is closed
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Commands received from the settings UI
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum IpcCommand {
    /// Replace the live binding set
    SetHotkeyConfig {
        /// New bindings, in registration order
        bindings: Vec<HotkeyBinding>,
    },
    /// Ask for the current binding set
    GetHotkeyConfig,
}

/// Replies sent to the settings UI
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IpcEvent {
    /// Result of `set_hotkey_config`
    HotkeyConfigApplied {
        /// Combinations now live
        registered: Vec<String>,
        /// Combinations skipped, with reasons
        rejected: Vec<RejectedBinding>,
    },
    /// Result of `get_hotkey_config`
    HotkeyConfig {
        /// Last binding list applied
        bindings: Vec<HotkeyBinding>,
    },
    /// Command could not be handled; the connection stays open
    Error {
        /// What went wrong
        message: String,
    },
}

impl From<RegistrationReport> for IpcEvent {
    fn from(report: RegistrationReport) -> Self {
        Self::HotkeyConfigApplied {
            registered: report.registered,
            rejected: report.rejected,
        }
    }
}

/// Work for the loop that owns the registry
#[derive(Debug)]
pub enum SyncRequest {
    /// Replace all bindings
    SetBindings {
        /// New binding list
        bindings: Vec<HotkeyBinding>,
        /// Receives the registration report
        reply: oneshot::Sender<RegistrationReport>,
    },
    /// Read the current bindings
    GetBindings {
        /// Receives the binding list
        reply: oneshot::Sender<Vec<HotkeyBinding>>,
    },
}

/// Carry out `request` against the registry (main-loop side)
pub fn apply<B: HotkeyBackend>(registry: &mut HotkeyRegistry<B>, request: SyncRequest) {
    match request {
        SyncRequest::SetBindings { bindings, reply } => {
            info!(count = bindings.len(), "applying hotkey config from sync channel");
            let report = registry.set_bindings(bindings);
            if reply.send(report).is_err() {
                debug!("sync client went away before set reply");
            }
        }
        SyncRequest::GetBindings { reply } => {
            if reply.send(registry.bindings().to_vec()).is_err() {
                debug!("sync client went away before get reply");
            }
        }
    }
}

fn shutting_down() -> IpcEvent {
    IpcEvent::Error {
        message: "hotkey service is shutting down".to_owned(),
    }
}

/// Forward one command to the main loop and wait for its answer
pub async fn handle_command(command: IpcCommand, requests: &mpsc::Sender<SyncRequest>) -> IpcEvent {
    match command {
        IpcCommand::SetHotkeyConfig { bindings } => {
            let (reply, answer) = oneshot::channel();
            if requests
                .send(SyncRequest::SetBindings { bindings, reply })
                .await
                .is_err()
            {
                return shutting_down();
            }
            answer.await.map_or_else(|_| shutting_down(), IpcEvent::from)
        }
        IpcCommand::GetHotkeyConfig => {
            let (reply, answer) = oneshot::channel();
            if requests.send(SyncRequest::GetBindings { reply }).await.is_err() {
                return shutting_down();
            }
            answer
                .await
                .map_or_else(|_| shutting_down(), |bindings| IpcEvent::HotkeyConfig { bindings })
        }
    }
}

/// Parse and handle one line of input
pub async fn handle_line(line: &str, requests: &mpsc::Sender<SyncRequest>) -> IpcEvent {
    match serde_json::from_str::<IpcCommand>(line) {
        Ok(command) => handle_command(command, requests).await,
        Err(e) => {
            warn!(error = %e, "malformed sync command");
            IpcEvent::Error {
                message: format!("invalid command: {e}"),
            }
        }
    }
}

/// Serve one client until it disconnects
///
/// A line longer than [`MAX_LINE_BYTES`] is answered with an error event and
/// ends the connection.
///
/// # Errors
/// Returns error if reading from or writing to the stream fails
pub async fn handle_connection<S>(stream: S, requests: mpsc::Sender<SyncRequest>) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let limit = u64::try_from(MAX_LINE_BYTES + 1).unwrap_or(u64::MAX);
    loop {
        buf.clear();
        let read = (&mut reader).take(limit).read_until(b'\n', &mut buf).await?;
        if read == 0 {
            break;
        }
        if buf.last() != Some(&b'\n') && read > MAX_LINE_BYTES {
            warn!(limit = MAX_LINE_BYTES, "sync command too long, closing connection");
            let event = IpcEvent::Error {
                message: format!("command exceeds {MAX_LINE_BYTES} bytes"),
            };
            write_event(&mut writer, &event).await?;
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        if line.trim().is_empty() {
            continue;
        }
        let event = handle_line(line.trim_end(), &requests).await;
        write_event(&mut writer, &event).await?;
    }
    Ok(())
}

async fn write_event<W: AsyncWrite + Unpin>(writer: &mut W, event: &IpcEvent) -> std::io::Result<()> {
    let mut payload = serde_json::to_string(event)?;
    payload.push('\n');
    writer.write_all(payload.as_bytes()).await?;
    writer.flush().await
}

/// Bind the sync listener
///
/// # Errors
/// Returns error if the address is invalid or already in use
pub async fn bind(address: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("failed to bind sync channel on {address}"))?;
    info!(address, "config sync channel listening");
    Ok(listener)
}

/// Accept clients forever, one task per connection
pub async fn serve(listener: TcpListener, requests: mpsc::Sender<SyncRequest>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "sync client connected");
                let requests = requests.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, requests).await {
                        warn!(peer = %peer, error = %e, "sync connection failed");
                    }
                    debug!(peer = %peer, "sync client disconnected");
                });
            }
            Err(e) => {
                warn!(error = %e, "failed to accept sync client");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::hotkey::RegistrationError;
    use global_hotkey::hotkey::HotKey;
    use serde_json::{json, Value};

    struct AcceptAll;

    impl HotkeyBackend for AcceptAll {
        fn register(&self, _hotkey: HotKey) -> Result<(), RegistrationError> {
            Ok(())
        }

        fn unregister(&self, _hotkey: HotKey) -> Result<(), RegistrationError> {
            Ok(())
        }
    }

    #[test]
    fn test_parse_set_command_accepts_key_label() {
        let line = json!({
            "cmd": "set_hotkey_config",
            "bindings": [
                { "id": "b1", "profileId": "formal", "combination": "Ctrl+Shift+R", "keyLabel": "Formal" }
            ]
        })
        .to_string();
        let command: IpcCommand = serde_json::from_str(&line).unwrap();
        let IpcCommand::SetHotkeyConfig { bindings } = command else {
            unreachable!("parsed as wrong command");
        };
        assert_eq!(bindings[0].profile_id, "formal");
        assert_eq!(bindings[0].label, "Formal");
    }

    #[test]
    fn test_parse_get_command() {
        let command: IpcCommand = serde_json::from_str(r#"{"cmd":"get_hotkey_config"}"#).unwrap();
        assert!(matches!(command, IpcCommand::GetHotkeyConfig));
        assert!(serde_json::from_str::<IpcCommand>(r#"{"cmd":"reboot"}"#).is_err());
    }

    #[test]
    fn test_event_wire_shape() {
        let event = IpcEvent::HotkeyConfigApplied {
            registered: vec!["Ctrl+Shift+R".to_owned()],
            rejected: vec![RejectedBinding {
                combination: "Ctrl+Q".to_owned(),
                reason: "taken".to_owned(),
            }],
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "hotkey_config_applied",
                "registered": ["Ctrl+Shift+R"],
                "rejected": [{ "combination": "Ctrl+Q", "reason": "taken" }]
            })
        );
    }

    #[tokio::test]
    async fn test_overlong_line_is_refused_and_connection_closed() {
        let (client, server) = tokio::io::duplex(4096);
        let (requests, _rx) = mpsc::channel(1);

        let client_side = async move {
            let (reader, mut writer) = tokio::io::split(client);
            let flood = vec![b'a'; MAX_LINE_BYTES + 100];
            // the server stops reading at the limit and hangs up
            let _ = writer.write_all(&flood).await;
            let mut lines = BufReader::new(reader).lines();
            let reply = lines.next_line().await.unwrap().unwrap();
            let after = lines.next_line().await.unwrap();
            (serde_json::from_str::<Value>(&reply).unwrap(), after)
        };

        let (served, (reply, after)) = tokio::join!(handle_connection(server, requests), client_side);
        served.unwrap();

        assert_eq!(reply["event"], "error");
        assert!(reply["message"].as_str().unwrap().contains("exceeds"));
        assert!(after.is_none());
    }

    #[tokio::test]
    async fn test_closed_main_loop_reports_shutdown() {
        let (requests, rx) = mpsc::channel(1);
        drop(rx);
        let event = handle_line(r#"{"cmd":"get_hotkey_config"}"#, &requests).await;
        assert!(matches!(event, IpcEvent::Error { .. }));
    }

    #[tokio::test]
    async fn test_connection_round_trip_through_main_loop() {
        let (client, server) = tokio::io::duplex(4096);
        let (requests, mut rx) = mpsc::channel(8);
        let mut registry = HotkeyRegistry::new(AcceptAll);

        let main_loop = async {
            while let Some(request) = rx.recv().await {
                apply(&mut registry, request);
            }
        };

        let client_side = async move {
            let (reader, mut writer) = tokio::io::split(client);
            let mut lines = BufReader::new(reader).lines();
            let mut replies = Vec::new();
            let commands = [
                json!({
                    "cmd": "set_hotkey_config",
                    "bindings": [
                        { "id": "b1", "profileId": "formal", "combination": "Ctrl+Shift+R", "label": "Formal" },
                        { "id": "b2", "profileId": "casual", "combination": "Ctrl+Nope" }
                    ]
                })
                .to_string(),
                "this is not json".to_owned(),
                json!({ "cmd": "get_hotkey_config" }).to_string(),
            ];
            for command in commands {
                writer.write_all(format!("{command}\n").as_bytes()).await.unwrap();
                let reply = lines.next_line().await.unwrap().unwrap();
                replies.push(serde_json::from_str::<Value>(&reply).unwrap());
            }
            writer.shutdown().await.unwrap();
            replies
        };

        let (_, served, replies) =
            tokio::join!(main_loop, handle_connection(server, requests), client_side);
        served.unwrap();

        assert_eq!(replies[0]["event"], "hotkey_config_applied");
        assert_eq!(replies[0]["registered"], json!(["Ctrl+Shift+R"]));
        assert_eq!(replies[0]["rejected"][0]["combination"], "Ctrl+Nope");

        // malformed input is answered, not fatal
        assert_eq!(replies[1]["event"], "error");

        assert_eq!(replies[2]["event"], "hotkey_config");
        assert_eq!(replies[2]["bindings"].as_array().unwrap().len(), 2);
        assert_eq!(replies[2]["bindings"][0]["profileId"], "formal");

        assert_eq!(registry.live_count(), 1);
    }
}
