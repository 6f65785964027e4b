//! In-process relay with scripted fault injection.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::trace;

use codepair_core::{ChannelBlob, ChannelId, ChannelTransport, ClientId, EntityTag, Fetched, TransportError};

/// One recorded relay call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOp {
    Put { channel: ChannelId, sender: ClientId },
    Get { channel: ChannelId, sender: ClientId },
}

#[derive(Debug, Clone)]
struct Slot {
    blob: ChannelBlob,
    writer: ClientId,
}

#[derive(Default)]
struct Inner {
    slots: HashMap<ChannelId, Slot>,
    next_version: u64,
    get_faults: VecDeque<TransportError>,
    put_faults: VecDeque<TransportError>,
    ops: Vec<RelayOp>,
}

/// Blob store living in memory. Entity tags are drawn from one counter, so
/// every write anywhere yields a tag never seen before.
#[derive(Default)]
pub struct MemoryRelay {
    inner: Mutex<Inner>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `get` calls fail, in order, with these errors.
    pub async fn fail_next_gets(&self, errors: impl IntoIterator<Item = TransportError>) {
        self.inner.lock().await.get_faults.extend(errors);
    }

    /// Make the next `put` or `create` calls fail, in order, with these errors.
    pub async fn fail_next_puts(&self, errors: impl IntoIterator<Item = TransportError>) {
        self.inner.lock().await.put_faults.extend(errors);
    }

    /// Current blob on `channel`, if any.
    pub async fn peek(&self, channel: &ChannelId) -> Option<ChannelBlob> {
        self.inner.lock().await.slots.get(channel).map(|s| s.blob.clone())
    }

    /// Client that wrote the current blob on `channel`.
    pub async fn last_writer(&self, channel: &ChannelId) -> Option<ClientId> {
        self.inner.lock().await.slots.get(channel).map(|s| s.writer.clone())
    }

    /// Every call made so far, faults included.
    pub async fn ops(&self) -> Vec<RelayOp> {
        self.inner.lock().await.ops.clone()
    }

    pub async fn put_count(&self) -> usize {
        self.ops().await.iter().filter(|op| matches!(op, RelayOp::Put { .. })).count()
    }

    pub async fn get_count(&self) -> usize {
        self.ops().await.iter().filter(|op| matches!(op, RelayOp::Get { .. })).count()
    }
}

impl MemoryRelay {
    async fn write(
        &self,
        channel: &ChannelId,
        sender: &ClientId,
        body: Vec<u8>,
        create_only: bool,
    ) -> Result<EntityTag, TransportError> {
        let mut inner = self.inner.lock().await;
        inner.ops.push(RelayOp::Put { channel: channel.clone(), sender: sender.clone() });
        if let Some(err) = inner.put_faults.pop_front() {
            return Err(err);
        }
        if create_only && inner.slots.contains_key(channel) {
            trace!(%channel, "memory relay create refused, channel taken");
            return Err(TransportError::Conflict);
        }

        inner.next_version += 1;
        let etag = EntityTag::new(format!("v{}", inner.next_version));
        trace!(%channel, %etag, bytes = body.len(), create_only, "memory relay put");
        inner.slots.insert(
            channel.clone(),
            Slot { blob: ChannelBlob { body, etag: etag.clone() }, writer: sender.clone() },
        );
        Ok(etag)
    }
}

#[async_trait]
impl ChannelTransport for MemoryRelay {
    async fn put(
        &self,
        channel: &ChannelId,
        sender: &ClientId,
        body: Vec<u8>,
    ) -> Result<EntityTag, TransportError> {
        self.write(channel, sender, body, false).await
    }

    async fn create(
        &self,
        channel: &ChannelId,
        sender: &ClientId,
        body: Vec<u8>,
    ) -> Result<EntityTag, TransportError> {
        self.write(channel, sender, body, true).await
    }

    async fn get(
        &self,
        channel: &ChannelId,
        sender: &ClientId,
        known: Option<&EntityTag>,
    ) -> Result<Fetched, TransportError> {
        let mut inner = self.inner.lock().await;
        inner.ops.push(RelayOp::Get { channel: channel.clone(), sender: sender.clone() });
        if let Some(err) = inner.get_faults.pop_front() {
            return Err(err);
        }

        match inner.slots.get(channel) {
            None => Err(TransportError::NotFound),
            Some(slot) if Some(&slot.blob.etag) == known => Ok(Fetched::Unchanged),
            Some(slot) => Ok(Fetched::Modified(slot.blob.clone())),
        }
    }
}
