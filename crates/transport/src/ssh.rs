//! SSH transport implementation using russh (pure Rust)
//!
//! Launches the agent process on the remote host over an exec channel and
//! speaks the framed protocol over the channel's stdin/stdout.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use russh::keys::agent::client::AgentClient;
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::{load_secret_key, PublicKey};
use russh::{ChannelMsg, Disconnect};
use tracing::{debug, info};

use txtsync_core::protocol::{decode_response, encode_request};
use txtsync_core::{ChecksumIndex, Request, Response, TextFile, TextFileDelta};

use crate::{expect_content, expect_files, expect_hashes, expect_ok, SyncSession};

/// Command expected on the remote PATH.
const AGENT_COMMAND: &str = "txtsync-agent";

/// SSH connection to the remote host.
pub struct SshTransport {
    session: russh::client::Handle<ClientHandler>,
    host: String,
    user: String,
}

struct ClientHandler;

impl russh::client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        // TODO: verify against known_hosts
        Ok(true)
    }
}

impl SshTransport {
    /// Connect and authenticate.
    ///
    /// Tries the SSH agent first (`SSH_AUTH_SOCK`), then the default key
    /// paths under `~/.ssh`.
    pub async fn connect(host: &str, port: u16, user: &str) -> Result<Self> {
        info!("connecting to {user}@{host}:{port}");

        let config = Arc::new(russh::client::Config::default());
        let mut session = russh::client::connect(config, (host, port), ClientHandler).await?;

        if !Self::authenticate(&mut session, user).await? {
            return Err(eyre!("ssh authentication failed for {user}@{host}"));
        }

        Ok(Self {
            session,
            host: host.to_string(),
            user: user.to_string(),
        })
    }

    async fn authenticate(
        session: &mut russh::client::Handle<ClientHandler>,
        user: &str,
    ) -> Result<bool> {
        if let Some(agent_path) = Self::agent_socket_path() {
            match AgentClient::connect_uds(&agent_path).await {
                Ok(mut agent) => match agent.request_identities().await {
                    Ok(identities) => {
                        debug!("ssh agent offers {} identities", identities.len());
                        for identity in identities {
                            if let Ok(result) = session
                                .authenticate_publickey_with(user, identity, None, &mut agent)
                                .await
                            {
                                if result.success() {
                                    info!("authenticated via ssh agent");
                                    return Ok(true);
                                }
                            }
                        }
                    }
                    Err(e) => debug!("failed to list agent identities: {e}"),
                },
                Err(e) => debug!("failed to reach ssh agent at {}: {e}", agent_path.display()),
            }
        }

        let home = dirs::home_dir().ok_or_else(|| eyre!("no home directory"))?;
        let key_paths = [
            home.join(".ssh/id_ed25519"),
            home.join(".ssh/id_rsa"),
            home.join(".ssh/id_ecdsa"),
        ];

        for key_path in &key_paths {
            if !key_path.exists() {
                continue;
            }
            match load_secret_key(key_path, None) {
                Ok(key) => {
                    let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);
                    if let Ok(result) = session.authenticate_publickey(user, key_with_hash).await {
                        if result.success() {
                            info!("authenticated with key {}", key_path.display());
                            return Ok(true);
                        }
                    }
                }
                Err(e) => debug!("failed to load key {}: {e}", key_path.display()),
            }
        }

        Ok(false)
    }

    fn agent_socket_path() -> Option<PathBuf> {
        let sock = std::env::var("SSH_AUTH_SOCK").ok()?;
        let path = PathBuf::from(&sock);
        path.exists().then_some(path)
    }

    /// Launch the agent in `remote_root` and return the live session.
    ///
    /// The remote directory is created when absent; the agent itself takes
    /// no flags and serves its working directory.
    pub async fn start_session(&self, remote_root: &str) -> Result<SshSession> {
        let channel = self.session.channel_open_session().await?;
        let command =
            format!("mkdir -p '{remote_root}' && cd '{remote_root}' && {AGENT_COMMAND}");
        debug!("starting remote agent: {command}");
        channel.exec(true, command).await?;

        Ok(SshSession {
            channel,
            buffer: Vec::new(),
        })
    }

    /// Disconnect from the remote host.
    pub async fn disconnect(self) -> Result<()> {
        debug!("disconnecting from {}@{}", self.user, self.host);
        self.session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await?;
        Ok(())
    }
}

/// Active protocol session with the remote agent.
pub struct SshSession {
    channel: russh::Channel<russh::client::Msg>,
    buffer: Vec<u8>,
}

impl SshSession {
    /// Read exactly `buf.len()` bytes from the channel.
    ///
    /// Channel data arrives in arbitrarily sized chunks; everything is
    /// accumulated in `self.buffer` and any overshoot stays there for the
    /// next call.
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        while self.buffer.len() < buf.len() {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => self.buffer.extend_from_slice(&data),
                Some(ChannelMsg::Eof | ChannelMsg::Close) | None => {
                    return Err(eyre!("transport closed mid-frame"));
                }
                Some(_) => {}
            }
        }

        buf.copy_from_slice(&self.buffer[..buf.len()]);
        self.buffer.drain(..buf.len());
        Ok(())
    }

    async fn read_response(&mut self) -> Result<Response> {
        let mut header = [0u8; 5];
        self.read_exact(&mut header).await?;

        let msg_type = header[0];
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;

        let mut payload = vec![0u8; len];
        if len > 0 {
            self.read_exact(&mut payload).await?;
        }

        Ok(decode_response(msg_type, &payload)?)
    }

    /// One request, one response.
    async fn call(&mut self, request: &Request) -> Result<Response> {
        let frame = encode_request(request)?;
        self.channel.data(frame.as_slice()).await?;
        self.read_response().await
    }

    /// Close the channel; the agent exits on EOF.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.channel.eof().await?;
        Ok(())
    }
}

#[async_trait]
impl SyncSession for SshSession {
    async fn get_text_file(&mut self, path: &str) -> Result<String> {
        expect_content(self.call(&Request::GetTextFile(path.to_string())).await?)
    }

    async fn get_text_files(&mut self, paths: &[String]) -> Result<Vec<TextFile>> {
        expect_files(self.call(&Request::GetTextFiles(paths.to_vec())).await?)
    }

    async fn send_text_file(&mut self, file: &TextFile) -> Result<()> {
        expect_ok(self.call(&Request::SendTextFile(file.clone())).await?)
    }

    async fn send_text_files(&mut self, files: &[TextFile]) -> Result<()> {
        expect_ok(self.call(&Request::SendTextFiles(files.to_vec())).await?)
    }

    async fn get_file_hashes(&mut self) -> Result<ChecksumIndex> {
        expect_hashes(self.call(&Request::GetFileHashes).await?)
    }

    async fn apply_deltas(&mut self, deltas: &[TextFileDelta]) -> Result<()> {
        expect_ok(self.call(&Request::ApplyDeltas(deltas.to_vec())).await?)
    }
}
