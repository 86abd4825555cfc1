use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::collective::Collective;
use crate::error::{CollectiveError, CollectiveResult};

/// Configuration for an in-process collective group.
#[derive(Clone, Debug)]
pub struct CollectiveConfig {
    /// Upper bound on any single wait inside a collective call.
    pub timeout: Duration,
}

impl Default for CollectiveConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct Envelope {
    round: u64,
    from: usize,
    payload: Vec<u8>,
}

/// Receiving side of a member. Envelopes from rounds this member has not
/// reached yet are parked in `stash`.
struct Inbox {
    rx: mpsc::UnboundedReceiver<Envelope>,
    stash: Vec<Envelope>,
}

/// One member of an in-process collective group backed by tokio channels.
///
/// Calls are matched across members by a per-member round counter, so a fast
/// member may enter later rounds before slower members finish earlier ones.
pub struct LocalCollective {
    rank: usize,
    peers: Vec<mpsc::UnboundedSender<Envelope>>,
    inbox: Mutex<Inbox>,
    round: AtomicU64,
    config: CollectiveConfig,
}

impl LocalCollective {
    /// Create `size` connected members, ordered by rank.
    pub fn group(size: usize, config: CollectiveConfig) -> CollectiveResult<Vec<Self>> {
        if size == 0 {
            return Err(CollectiveError::EmptyGroup);
        }
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| mpsc::unbounded_channel()).unzip();

        Ok(receivers
            .into_iter()
            .enumerate()
            .map(|(rank, rx)| Self {
                rank,
                peers: senders.clone(),
                inbox: Mutex::new(Inbox { rx, stash: Vec::new() }),
                round: AtomicU64::new(0),
                config: config.clone(),
            })
            .collect())
    }

    fn begin(&self, root: usize) -> CollectiveResult<u64> {
        if root >= self.peers.len() {
            return Err(CollectiveError::InvalidRoot {
                root,
                size: self.peers.len(),
            });
        }
        Ok(self.round.fetch_add(1, Ordering::SeqCst))
    }

    fn send(&self, to: usize, round: u64, payload: Vec<u8>) -> CollectiveResult<()> {
        self.peers[to]
            .send(Envelope {
                round,
                from: self.rank,
                payload,
            })
            .map_err(|_| CollectiveError::PeerClosed(to))
    }

    /// Wait for the envelope `from` sent in `round`.
    async fn receive(&self, round: u64, from: usize) -> CollectiveResult<Vec<u8>> {
        let mut inbox = self.inbox.lock().await;
        if let Some(pos) = inbox
            .stash
            .iter()
            .position(|e| e.round == round && e.from == from)
        {
            return Ok(inbox.stash.swap_remove(pos).payload);
        }
        loop {
            let envelope = inbox.rx.recv().await.ok_or(CollectiveError::Disconnected)?;
            if envelope.round == round && envelope.from == from {
                return Ok(envelope.payload);
            }
            inbox.stash.push(envelope);
        }
    }

    async fn bounded<T>(
        &self,
        round: u64,
        fut: impl std::future::Future<Output = CollectiveResult<T>> + Send,
    ) -> CollectiveResult<T> {
        tokio::time::timeout(self.config.timeout, fut)
            .await
            .map_err(|_| CollectiveError::Timeout {
                rank: self.rank,
                round,
                waited_ms: self.config.timeout.as_millis(),
            })?
    }
}

#[async_trait]
impl Collective for LocalCollective {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    async fn gather(&self, payload: Vec<u8>, root: usize) -> CollectiveResult<Option<Vec<Vec<u8>>>> {
        let round = self.begin(root)?;
        if self.rank != root {
            debug!(rank = self.rank, root, round, bytes = payload.len(), "gather send");
            self.send(root, round, payload)?;
            return Ok(None);
        }

        let mut own = Some(payload);
        let collected = self
            .bounded(round, async {
                let mut out = Vec::with_capacity(self.size());
                for from in 0..self.size() {
                    if from == root {
                        out.push(own.take().unwrap_or_default());
                    } else {
                        out.push(self.receive(round, from).await?);
                    }
                }
                Ok::<_, CollectiveError>(out)
            })
            .await?;
        debug!(rank = self.rank, round, parts = collected.len(), "gather complete");
        Ok(Some(collected))
    }

    async fn scatter(&self, chunks: Option<Vec<Vec<u8>>>, root: usize) -> CollectiveResult<Vec<u8>> {
        if self.rank != root {
            let round = self.begin(root)?;
            let chunk = self.bounded(round, self.receive(round, root)).await?;
            debug!(rank = self.rank, round, bytes = chunk.len(), "scatter received");
            return Ok(chunk);
        }

        // A rejected scatter consumes no round.
        let chunks = chunks.ok_or(CollectiveError::MissingChunks)?;
        if chunks.len() != self.size() {
            return Err(CollectiveError::ChunkCount {
                expected: self.size(),
                actual: chunks.len(),
            });
        }
        let round = self.begin(root)?;
        let mut own = Vec::new();
        for (to, chunk) in chunks.into_iter().enumerate() {
            if to == root {
                own = chunk;
            } else {
                self.send(to, round, chunk)?;
            }
        }
        debug!(rank = self.rank, round, "scatter sent");
        Ok(own)
    }
}
