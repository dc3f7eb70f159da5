//! SSH PTY shell transport.

use std::time::Duration;

use async_ssh2_tokio::Config;
use async_ssh2_tokio::client::{AuthMethod, Client};
use log::debug;
use russh::ChannelMsg;
use tokio::sync::mpsc::{self, Receiver, Sender};

use super::{ConnectionSecurityOptions, Transport};
use crate::error::PollError;
use crate::model::ConnectionConfig;

/// Decodes shell output that may split multi-byte characters across packets.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Text decodable so far. An incomplete sequence at the end waits for the
    /// next packet; invalid bytes become U+FFFD.
    fn decode(&mut self, data: &[u8]) -> String {
        self.pending.extend_from_slice(data);
        let mut text = String::new();
        let mut rest: &[u8] = &self.pending;
        while !rest.is_empty() {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        let consumed = self.pending.len() - rest.len();
        self.pending.drain(..consumed);
        text
    }
}

/// Interactive shell over SSH.
///
/// A background I/O task bridges the russh channel to two mpsc queues so that
/// reads can be bounded with a plain `tokio::time::timeout`.
pub struct SshTransport {
    security_options: ConnectionSecurityOptions,
    client: Option<Client>,
    sender: Option<Sender<String>>,
    recv: Option<Receiver<String>>,
}

impl SshTransport {
    pub fn new(security_options: ConnectionSecurityOptions) -> Self {
        Self {
            security_options,
            client: None,
            sender: None,
            recv: None,
        }
    }

    fn connection_error(config: &ConnectionConfig, reason: impl ToString) -> PollError {
        PollError::Connection {
            host: config.host.clone(),
            port: config.port,
            reason: reason.to_string(),
        }
    }

    async fn open_shell(&mut self, config: &ConnectionConfig) -> Result<(), PollError> {
        let device_addr = config.device_addr();
        let ssh_config = Config {
            preferred: self.security_options.preferred(),
            inactivity_timeout: Some(config.session_timeout()),
            ..Default::default()
        };

        let client = Client::connect_with_config(
            (config.host.clone(), config.port),
            &config.username,
            AuthMethod::with_password(&config.password),
            self.security_options.server_check.clone(),
            ssh_config,
        )
        .await
        .map_err(|e| Self::connection_error(config, e))?;
        debug!("{device_addr} TCP connection and authentication successful");

        let mut channel = client
            .get_channel()
            .await
            .map_err(|e| Self::connection_error(config, e))?;
        channel
            .request_pty(false, "xterm", 800, 600, 0, 0, &[])
            .await
            .map_err(|e| Self::connection_error(config, e))?;
        channel
            .request_shell(false)
            .await
            .map_err(|e| Self::connection_error(config, e))?;
        debug!("{device_addr} shell request successful");

        let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(256);
        let (sender_to_user, receiver_from_shell) = mpsc::channel::<String>(256);

        tokio::spawn(async move {
            let mut decoder = Utf8Decoder::default();
            loop {
                tokio::select! {
                    Some(data) = receiver_from_user.recv() => {
                        if let Err(e) = channel.data(data.as_bytes()).await {
                            debug!("{device_addr} failed to send data to shell: {e:?}");
                            break;
                        }
                    },
                    Some(msg) = channel.wait() => {
                        match msg {
                            ChannelMsg::Data { ref data } => {
                                let text = decoder.decode(data);
                                if text.is_empty() {
                                    continue;
                                }
                                if sender_to_user.send(text).await.is_err() {
                                    debug!("{device_addr} shell output receiver dropped");
                                    break;
                                }
                            }
                            ChannelMsg::ExitStatus { exit_status } => {
                                debug!("{device_addr} shell exited with status {exit_status}");
                                let _ = channel.eof().await;
                                break;
                            }
                            ChannelMsg::Eof => {
                                debug!("{device_addr} shell sent EOF");
                                break;
                            }
                            _ => {}
                        }
                    }
                    else => break,
                }
            }
            debug!("{device_addr} SSH I/O task ended");
        });

        self.client = Some(client);
        self.sender = Some(sender_to_shell);
        self.recv = Some(receiver_from_shell);
        Ok(())
    }
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new(ConnectionSecurityOptions::default())
    }
}

impl Transport for SshTransport {
    async fn connect(&mut self, config: &ConnectionConfig) -> Result<(), PollError> {
        match tokio::time::timeout(config.connect_timeout(), self.open_shell(config)).await {
            Ok(result) => result,
            Err(_) => Err(Self::connection_error(
                config,
                format!("timed out after {:?}", config.connect_timeout()),
            )),
        }
    }

    async fn write(&mut self, text: &str) -> Result<(), PollError> {
        let sender = self.sender.as_ref().ok_or(PollError::SessionClosed)?;
        sender
            .send(text.to_string())
            .await
            .map_err(|_| PollError::SessionClosed)
    }

    async fn read(&mut self, timeout: Duration) -> Result<Option<String>, PollError> {
        let recv = self.recv.as_mut().ok_or(PollError::SessionClosed)?;
        match tokio::time::timeout(timeout, recv.recv()).await {
            Ok(Some(data)) => Ok(Some(data)),
            Ok(None) => Err(PollError::SessionClosed),
            Err(_) => Ok(None),
        }
    }

    async fn disconnect(&mut self) -> Result<(), PollError> {
        if let Some(recv) = self.recv.as_mut() {
            recv.close();
        }
        if self.is_connected()
            && let Some(sender) = self.sender.as_ref()
        {
            if let Err(e) = sender.send("exit\n".to_string()).await {
                debug!("failed to send exit command: {e:?}");
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        // Dropping the client closes the SSH connection.
        self.sender = None;
        self.recv = None;
        self.client = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.as_ref().is_some_and(|client| !client.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_characters_are_joined() {
        let bytes = "uplink to Zürich".as_bytes();
        let split = bytes.iter().position(|b| *b == 0xC3).expect("umlaut") + 1;

        let mut decoder = Utf8Decoder::default();
        let first = decoder.decode(&bytes[..split]);
        let second = decoder.decode(&bytes[split..]);

        assert_eq!(first, "uplink to Z");
        assert_eq!(format!("{first}{second}"), "uplink to Zürich");
    }

    #[test]
    fn invalid_bytes_are_replaced() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"a\xFFb"), "a\u{FFFD}b");
        assert!(decoder.pending.is_empty());
    }
}
