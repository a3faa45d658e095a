// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket client for the control plane: hello/auth handshake plus
//! request/response plumbing.

use anyhow::{anyhow, bail, Context};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use drover_wire::{read_frame, write_frame, RpcRequest, RpcResponse, ServerFrame};
use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::net::UnixStream;

/// Client key material on disk (mode 0600).
#[derive(Serialize, Deserialize)]
struct KeyFile {
    secret_key: String,
}

pub fn load_or_create_key(path: &Path) -> anyhow::Result<SigningKey> {
    match std::fs::read(path) {
        Ok(bytes) => {
            let file: KeyFile = serde_json::from_slice(&bytes)
                .with_context(|| format!("parse {}", path.display()))?;
            let secret = BASE64.decode(&file.secret_key).context("key is not base64")?;
            let secret: [u8; 32] =
                secret.try_into().map_err(|_| anyhow!("key must be 32 bytes"))?;
            Ok(SigningKey::from_bytes(&secret))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let key = SigningKey::generate(&mut rand::rngs::OsRng);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = KeyFile { secret_key: BASE64.encode(key.to_bytes()) };
            std::fs::write(path, serde_json::to_vec_pretty(&file)?)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
            }
            Ok(key)
        }
        Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
    }
}

pub fn public_key_b64(key: &SigningKey) -> String {
    BASE64.encode(key.verifying_key().to_bytes())
}

/// A connected, authenticated control-plane session.
pub struct Client {
    stream: UnixStream,
    next_id: u64,
}

impl Client {
    /// Connect without authenticating (pairing flow).
    pub async fn connect_raw(socket: &Path) -> anyhow::Result<Self> {
        let stream = UnixStream::connect(socket)
            .await
            .with_context(|| format!("connect {}", socket.display()))?;
        Ok(Self { stream, next_id: 1 })
    }

    /// Connect and complete the hello/authenticate handshake.
    pub async fn connect(socket: &Path, key_path: &PathBuf) -> anyhow::Result<Self> {
        let mut client = Self::connect_raw(socket).await?;

        let hello = client.call("hello", serde_json::Value::Null).await?;
        if hello["authRequired"] == serde_json::Value::Bool(true) {
            let key = load_or_create_key(key_path)?;
            let challenge = hello["challenge"]
                .as_str()
                .ok_or_else(|| anyhow!("server sent no challenge"))?;
            let challenge = BASE64.decode(challenge).context("challenge is not base64")?;
            let signature = BASE64.encode(key.sign(&challenge).to_bytes());
            client
                .call(
                    "authenticate",
                    serde_json::json!({
                        "publicKey": public_key_b64(&key),
                        "signature": signature,
                    }),
                )
                .await
                .context("authentication failed (is this client paired?)")?;
        }
        Ok(client)
    }

    /// Issue one RPC and return its result value.
    pub async fn call(
        &mut self,
        method: &str,
        params: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let id = self.next_id;
        self.next_id += 1;
        let request = RpcRequest { id, method: method.to_string(), params };
        write_frame(&mut self.stream, &request).await?;
        loop {
            match read_frame::<_, ServerFrame>(&mut self.stream).await? {
                ServerFrame::Response(RpcResponse { id: got, result, error }) if got == id => {
                    if let Some(error) = error {
                        bail!("{}: {}", error.code, error.message);
                    }
                    return Ok(result.unwrap_or(serde_json::Value::Null));
                }
                ServerFrame::Response(_) => continue,
                ServerFrame::Event { .. } => continue,
            }
        }
    }

    /// Read frames forever, handing events to `f`, until it returns false.
    pub async fn watch_events(
        &mut self,
        mut f: impl FnMut(&drover_core::SchedulerEvent) -> bool,
    ) -> anyhow::Result<()> {
        loop {
            match read_frame::<_, ServerFrame>(&mut self.stream).await? {
                ServerFrame::Event { event } => {
                    if !f(&event) {
                        return Ok(());
                    }
                }
                ServerFrame::Response(_) => continue,
            }
        }
    }
}
