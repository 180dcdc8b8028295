//! Conversation and intelligence storage.
//!
//! A single actor task owns the blob set and the optional JSONL file; every
//! caller goes through a cloneable [`StoreHandle`] that sends a command and
//! waits on a oneshot reply with a timeout. Blobs marked `encrypt` are sealed
//! with AES-256-GCM before they reach memory or disk and opened on retrieve.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::StorageConfig;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobKind {
    /// Raw conversation turns.
    ShortTerm,
    LongTerm,
    ExtractedIoc,
    Report,
}

impl std::fmt::Display for BlobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ShortTerm => "short_term",
            Self::LongTerm => "long_term",
            Self::ExtractedIoc => "extracted_ioc",
            Self::Report => "report",
        };
        write!(f, "{s}")
    }
}

/// A blob to be stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBlob {
    pub conversation_id: String,
    pub kind: BlobKind,
    pub content: Value,
    pub encrypt: bool,
}

impl NewBlob {
    pub fn new(conversation_id: impl Into<String>, kind: BlobKind, content: Value) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            kind,
            content,
            encrypt: false,
        }
    }

    pub fn encrypted(mut self) -> Self {
        self.encrypt = true;
        self
    }
}

/// On-disk and in-memory record. `payload` is JSON text, or hex(nonce ‖ ciphertext).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredBlob {
    id: u64,
    conversation_id: String,
    kind: BlobKind,
    created_at: DateTime<Utc>,
    content_hash: String,
    encrypted: bool,
    payload: String,
}

/// A retrieved, decrypted blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blob {
    pub id: u64,
    pub conversation_id: String,
    pub kind: BlobKind,
    pub created_at: DateTime<Utc>,
    pub content: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    pub total: usize,
    pub encrypted: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub duplicates_ignored: u64,
    pub conversations: usize,
    pub persistent: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("encryption failure")]
    Crypto,

    #[error("corrupt store file {path} at line {line}: {message}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("storage request timed out after {0} ms")]
    Timeout(u64),

    #[error("storage actor has shut down")]
    Closed,
}

pub type StorageResult<T> = Result<T, StorageError>;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Storage backend seen by the orchestrator.
#[async_trait]
pub trait StorageSink: Send + Sync {
    /// Returns the new blob id, or `None` when identical content was already stored.
    async fn append(&self, blob: NewBlob) -> StorageResult<Option<u64>>;

    /// Newest-last blobs for a conversation, optionally filtered by kind.
    async fn retrieve(
        &self,
        conversation_id: &str,
        kind: Option<BlobKind>,
        limit: usize,
    ) -> StorageResult<Vec<Blob>>;

    async fn stats(&self) -> StorageResult<StorageStats>;

    /// Drop blobs of `kind` created before `cutoff`; returns how many went.
    ///
    /// Pruned content is forgotten by duplicate detection as well.
    async fn prune(&self, kind: BlobKind, cutoff: DateTime<Utc>) -> StorageResult<usize>;
}

/// AES-256-GCM sealing for blob payloads.
#[derive(Clone)]
pub struct BlobCipher {
    cipher: Aes256Gcm,
}

impl BlobCipher {
    pub fn new(key: &[u8]) -> StorageResult<Self> {
        if key.len() != KEY_LEN {
            return Err(StorageError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|e| StorageError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    pub fn from_hex(key: &str) -> StorageResult<Self> {
        let bytes = hex::decode(key.trim()).map_err(|e| StorageError::InvalidKey(e.to_string()))?;
        Self::new(&bytes)
    }

    /// Random key for a single run; sealed blobs cannot be reopened after restart.
    pub fn ephemeral() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    pub fn seal(&self, plaintext: &[u8]) -> StorageResult<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| StorageError::Crypto)?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(hex::encode(out))
    }

    pub fn open(&self, sealed: &str) -> StorageResult<Vec<u8>> {
        let raw = hex::decode(sealed).map_err(|_| StorageError::Crypto)?;
        if raw.len() <= NONCE_LEN {
            return Err(StorageError::Crypto);
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| StorageError::Crypto)
    }
}

impl std::fmt::Debug for BlobCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BlobCipher(..)")
    }
}

fn content_hash(blob: &NewBlob) -> StorageResult<String> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(blob.conversation_id.as_bytes());
    hasher.update(&[0]);
    hasher.update(blob.kind.to_string().as_bytes());
    hasher.update(&[0]);
    hasher.update(&serde_json::to_vec(&blob.content)?);
    Ok(hasher.finalize().to_hex().to_string())
}

enum Command {
    Append {
        blob: NewBlob,
        reply: oneshot::Sender<StorageResult<Option<u64>>>,
    },
    Retrieve {
        conversation_id: String,
        kind: Option<BlobKind>,
        limit: usize,
        reply: oneshot::Sender<StorageResult<Vec<Blob>>>,
    },
    Stats {
        reply: oneshot::Sender<StorageStats>,
    },
    Prune {
        kind: BlobKind,
        cutoff: DateTime<Utc>,
        reply: oneshot::Sender<StorageResult<usize>>,
    },
}

struct StoreActor {
    blobs: Vec<StoredBlob>,
    hashes: HashSet<String>,
    next_id: u64,
    duplicates_ignored: u64,
    path: Option<PathBuf>,
    cipher: BlobCipher,
}

impl StoreActor {
    async fn load(path: Option<PathBuf>, cipher: BlobCipher) -> StorageResult<Self> {
        let mut actor = Self {
            blobs: Vec::new(),
            hashes: HashSet::new(),
            next_id: 1,
            duplicates_ignored: 0,
            path,
            cipher,
        };

        let Some(path) = actor.path.clone() else {
            return Ok(actor);
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_err(parent))?;
        }
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(actor),
            Err(e) => return Err(io_err(&path)(e)),
        };
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let blob: StoredBlob =
                serde_json::from_str(line).map_err(|e| StorageError::Corrupt {
                    path: path.clone(),
                    line: idx + 1,
                    message: e.to_string(),
                })?;
            actor.next_id = actor.next_id.max(blob.id + 1);
            actor.hashes.insert(blob.content_hash.clone());
            actor.blobs.push(blob);
        }
        info!(path = %path.display(), blobs = actor.blobs.len(), "Loaded store file");
        Ok(actor)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Append { blob, reply } => {
                    let result = self.append(blob).await;
                    let _ = reply.send(result);
                }
                Command::Retrieve {
                    conversation_id,
                    kind,
                    limit,
                    reply,
                } => {
                    let _ = reply.send(Ok(self.retrieve(&conversation_id, kind, limit)));
                }
                Command::Stats { reply } => {
                    let _ = reply.send(self.stats());
                }
                Command::Prune {
                    kind,
                    cutoff,
                    reply,
                } => {
                    let result = self.prune(kind, cutoff).await;
                    let _ = reply.send(result);
                }
            }
        }
        debug!("Store actor stopped");
    }

    async fn append(&mut self, blob: NewBlob) -> StorageResult<Option<u64>> {
        let hash = content_hash(&blob)?;
        if self.hashes.contains(&hash) {
            self.duplicates_ignored += 1;
            return Ok(None);
        }

        let json = serde_json::to_string(&blob.content)?;
        let payload = if blob.encrypt {
            self.cipher.seal(json.as_bytes())?
        } else {
            json
        };
        let stored = StoredBlob {
            id: self.next_id,
            conversation_id: blob.conversation_id,
            kind: blob.kind,
            created_at: Utc::now(),
            content_hash: hash.clone(),
            encrypted: blob.encrypt,
            payload,
        };

        if let Some(path) = &self.path {
            let mut line = serde_json::to_string(&stored)?;
            line.push('\n');
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .map_err(io_err(path))?;
            file.write_all(line.as_bytes()).await.map_err(io_err(path))?;
            file.flush().await.map_err(io_err(path))?;
        }

        let id = stored.id;
        self.next_id += 1;
        self.hashes.insert(hash);
        self.blobs.push(stored);
        Ok(Some(id))
    }

    async fn prune(&mut self, kind: BlobKind, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let (expired, kept): (Vec<StoredBlob>, Vec<StoredBlob>) = std::mem::take(&mut self.blobs)
            .into_iter()
            .partition(|b| b.kind == kind && b.created_at < cutoff);
        self.blobs = kept;
        if expired.is_empty() {
            return Ok(0);
        }
        for blob in &expired {
            self.hashes.remove(&blob.content_hash);
        }

        if let Some(path) = &self.path {
            let mut text = String::new();
            for blob in &self.blobs {
                text.push_str(&serde_json::to_string(blob)?);
                text.push('\n');
            }
            // Atomic replace.
            let tmp = path.with_extension("jsonl.tmp");
            tokio::fs::write(&tmp, text).await.map_err(io_err(&tmp))?;
            tokio::fs::rename(&tmp, path).await.map_err(io_err(path))?;
        }

        info!(%kind, pruned = expired.len(), remaining = self.blobs.len(), "Pruned store");
        Ok(expired.len())
    }

    fn retrieve(&self, conversation_id: &str, kind: Option<BlobKind>, limit: usize) -> Vec<Blob> {
        let matching: Vec<&StoredBlob> = self
            .blobs
            .iter()
            .filter(|b| b.conversation_id == conversation_id)
            .filter(|b| kind.map_or(true, |k| b.kind == k))
            .collect();
        let skip = matching.len().saturating_sub(limit);

        matching
            .into_iter()
            .skip(skip)
            .filter_map(|stored| match self.decode(stored) {
                Ok(content) => Some(Blob {
                    id: stored.id,
                    conversation_id: stored.conversation_id.clone(),
                    kind: stored.kind,
                    created_at: stored.created_at,
                    content,
                }),
                Err(e) => {
                    warn!(blob_id = stored.id, error = %e, "Skipping unreadable blob");
                    None
                }
            })
            .collect()
    }

    fn decode(&self, stored: &StoredBlob) -> StorageResult<Value> {
        if stored.encrypted {
            let plain = self.cipher.open(&stored.payload)?;
            Ok(serde_json::from_slice(&plain)?)
        } else {
            Ok(serde_json::from_str(&stored.payload)?)
        }
    }

    fn stats(&self) -> StorageStats {
        let mut by_kind = BTreeMap::new();
        for blob in &self.blobs {
            *by_kind.entry(blob.kind.to_string()).or_insert(0) += 1;
        }
        let conversations: HashSet<&str> =
            self.blobs.iter().map(|b| b.conversation_id.as_str()).collect();
        StorageStats {
            total: self.blobs.len(),
            encrypted: self.blobs.iter().filter(|b| b.encrypted).count(),
            by_kind,
            duplicates_ignored: self.duplicates_ignored,
            conversations: conversations.len(),
            persistent: self.path.is_some(),
        }
    }
}

/// Cloneable handle to the store actor.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<Command>,
    timeout: Duration,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Append { .. } => "Append",
            Self::Retrieve { .. } => "Retrieve",
            Self::Stats { .. } => "Stats",
            Self::Prune { .. } => "Prune",
        };
        f.write_str(name)
    }
}

impl StoreHandle {
    /// Load any existing store file and spawn the actor on the current runtime.
    pub async fn spawn(config: &StorageConfig) -> StorageResult<Self> {
        let cipher = match &config.encryption_key {
            Some(key) => BlobCipher::from_hex(key)?,
            None => {
                warn!("No storage encryption key configured; using an ephemeral key for this run");
                BlobCipher::ephemeral()
            }
        };
        Self::spawn_with_cipher(config, cipher).await
    }

    pub async fn spawn_with_cipher(config: &StorageConfig, cipher: BlobCipher) -> StorageResult<Self> {
        let actor = StoreActor::load(config.path.clone(), cipher).await?;
        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
        tokio::spawn(actor.run(rx));
        Ok(Self {
            tx,
            timeout: Duration::from_millis(config.request_timeout_ms),
        })
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> StorageResult<T> {
        let (reply, rx) = oneshot::channel();
        let timeout_ms = self.timeout.as_millis() as u64;
        let exchange = async {
            self.tx
                .send(build(reply))
                .await
                .map_err(|_| StorageError::Closed)?;
            rx.await.map_err(|_| StorageError::Closed)
        };
        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| StorageError::Timeout(timeout_ms))?
    }
}

#[async_trait]
impl StorageSink for StoreHandle {
    async fn append(&self, blob: NewBlob) -> StorageResult<Option<u64>> {
        self.request(|reply| Command::Append { blob, reply }).await?
    }

    async fn retrieve(
        &self,
        conversation_id: &str,
        kind: Option<BlobKind>,
        limit: usize,
    ) -> StorageResult<Vec<Blob>> {
        let conversation_id = conversation_id.to_string();
        self.request(|reply| Command::Retrieve {
            conversation_id,
            kind,
            limit,
            reply,
        })
        .await?
    }

    async fn stats(&self) -> StorageResult<StorageStats> {
        self.request(|reply| Command::Stats { reply }).await
    }

    async fn prune(&self, kind: BlobKind, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        self.request(|reply| Command::Prune {
            kind,
            cutoff,
            reply,
        })
        .await?
    }
}
