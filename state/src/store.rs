//! Channel storage trait and its key-value backed implementation

use async_trait::async_trait;
use sluice_core::{ChannelId, GroupId, KvStore, Nonce, SluiceResult, TxId};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::channel::{validate_transition, ChannelState};

const CHANNEL_PREFIX: &[u8] = b"channel:";
const TX_PREFIX: &[u8] = b"tx:";

/// Storage key of a channel state
pub fn channel_key(id: ChannelId) -> Vec<u8> {
    let mut key = CHANNEL_PREFIX.to_vec();
    key.extend_from_slice(&id.0.to_be_bytes());
    key
}

/// Prefix shared by every transaction of `channel`
pub fn transaction_prefix(channel: ChannelId) -> Vec<u8> {
    let mut key = TX_PREFIX.to_vec();
    key.extend_from_slice(&channel.0.to_be_bytes());
    key.push(b':');
    key
}

/// Storage key of one transaction
pub fn transaction_key(channel: ChannelId, tx_id: &TxId) -> Vec<u8> {
    let mut key = transaction_prefix(channel);
    key.extend_from_slice(tx_id.as_bytes());
    key
}

/// Persistence for channel states and their transactions
///
/// Transactions are stored as opaque encoded bytes; the channel module owns
/// their format.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn get(&self, id: ChannelId) -> SluiceResult<Option<ChannelState>>;

    /// Unconditional write
    async fn put(&self, state: &ChannelState) -> SluiceResult<()>;

    /// Write `state` only if the stored nonce is `expected_nonce`
    /// (`None` meaning no stored state). Returns whether the write happened.
    async fn compare_and_put(
        &self,
        state: &ChannelState,
        expected_nonce: Option<Nonce>,
    ) -> SluiceResult<bool>;

    /// All stored channels, optionally restricted to one group
    async fn list(&self, group: Option<GroupId>) -> SluiceResult<Vec<ChannelState>>;

    async fn put_transaction(
        &self,
        channel: ChannelId,
        tx_id: &TxId,
        bytes: &[u8],
    ) -> SluiceResult<()>;

    async fn get_transaction(
        &self,
        channel: ChannelId,
        tx_id: &TxId,
    ) -> SluiceResult<Option<Vec<u8>>>;

    /// Encoded transactions of `channel`, in key order
    async fn transactions(&self, channel: ChannelId) -> SluiceResult<Vec<Vec<u8>>>;

    /// Whether `state` is a valid successor of what is stored for its id
    async fn validate(&self, state: &ChannelState) -> SluiceResult<bool> {
        let prior = self.get(state.id).await?;
        match validate_transition(prior.as_ref(), state) {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!(channel = %state.id, error = %e, "state failed validation");
                Ok(false)
            }
        }
    }
}

/// `ChannelStore` over any key-value collaborator
pub struct KvChannelStore<K: KvStore> {
    kv: Arc<K>,
}

impl<K: KvStore> KvChannelStore<K> {
    pub fn new(kv: Arc<K>) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &Arc<K> {
        &self.kv
    }
}

impl<K: KvStore> Clone for KvChannelStore<K> {
    fn clone(&self) -> Self {
        Self {
            kv: Arc::clone(&self.kv),
        }
    }
}

#[async_trait]
impl<K: KvStore> ChannelStore for KvChannelStore<K> {
    async fn get(&self, id: ChannelId) -> SluiceResult<Option<ChannelState>> {
        match self.kv.get(&channel_key(id)).await? {
            Some(bytes) => Ok(Some(ChannelState::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, state: &ChannelState) -> SluiceResult<()> {
        self.kv.put(&channel_key(state.id), &state.to_bytes()?).await
    }

    async fn compare_and_put(
        &self,
        state: &ChannelState,
        expected_nonce: Option<Nonce>,
    ) -> SluiceResult<bool> {
        let key = channel_key(state.id);
        let current = self.kv.get(&key).await?;

        let stored_nonce = match &current {
            Some(bytes) => Some(ChannelState::from_bytes(bytes)?.nonce),
            None => None,
        };
        if stored_nonce != expected_nonce {
            warn!(
                channel = %state.id,
                expected = ?expected_nonce,
                stored = ?stored_nonce,
                "stale write rejected"
            );
            return Ok(false);
        }

        // swap against the exact bytes read so a concurrent writer loses
        self.kv
            .compare_and_swap(&key, current.as_deref(), &state.to_bytes()?)
            .await
    }

    async fn list(&self, group: Option<GroupId>) -> SluiceResult<Vec<ChannelState>> {
        let mut states = Vec::new();
        for (_, bytes) in self.kv.scan_prefix(CHANNEL_PREFIX).await? {
            let state = ChannelState::from_bytes(&bytes)?;
            if group.map_or(true, |g| g == state.group_id) {
                states.push(state);
            }
        }
        Ok(states)
    }

    async fn put_transaction(
        &self,
        channel: ChannelId,
        tx_id: &TxId,
        bytes: &[u8],
    ) -> SluiceResult<()> {
        self.kv.put(&transaction_key(channel, tx_id), bytes).await
    }

    async fn get_transaction(
        &self,
        channel: ChannelId,
        tx_id: &TxId,
    ) -> SluiceResult<Option<Vec<u8>>> {
        self.kv.get(&transaction_key(channel, tx_id)).await
    }

    async fn transactions(&self, channel: ChannelId) -> SluiceResult<Vec<Vec<u8>>> {
        Ok(self
            .kv
            .scan_prefix(&transaction_prefix(channel))
            .await?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }
}
