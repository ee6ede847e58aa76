//! Transaction lifecycle manager
//!
//! Drives a transaction from request to applied channel state:
//! `Building -> Signed -> Verified -> Applied`, or `Rejected` when
//! verification or a transition rule fails, or `Failed` when it cannot be
//! built at all. Every check runs before the store is touched.

use dashmap::DashMap;
use sluice_core::{
    Amount, AuthContext, ChannelConfig, ChannelId, ErrorKind, GroupId, KeyHolder, PublicKey,
    Signable, SluiceError, SluiceResult, TxId,
};
use sluice_crypto::merkle::MerkleProof;
use sluice_state::{validate_dispute, ChannelState, ChannelStatus, ChannelStore};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::opcode::ChannelOp;
use crate::transaction::{Transaction, TransactionStatus};
use crate::validator::TransitionValidator;

/// Errors surfaced by channel operations
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Channel not found: {0}")]
    ChannelNotFound(ChannelId),

    #[error("No participants in {0}")]
    NoParticipants(ChannelId),

    /// The transaction could not be constructed or signed
    #[error("Transaction construction failed: {0}")]
    Failed(SluiceError),

    /// The transaction was built but did not pass verification or a
    /// transition rule; it is returned with status `Rejected`
    #[error("Transaction rejected: {reason}")]
    Rejected {
        transaction: Box<Transaction>,
        reason: SluiceError,
    },

    #[error(transparent)]
    Core(#[from] SluiceError),
}

impl ChannelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChannelError::ChannelNotFound(_) => ErrorKind::NotFound,
            ChannelError::NoParticipants(_) => ErrorKind::InvariantViolation,
            ChannelError::Failed(e) | ChannelError::Core(e) => e.kind(),
            ChannelError::Rejected { reason, .. } => reason.kind(),
        }
    }

    /// The rejected transaction, if any
    pub fn transaction(&self) -> Option<&Transaction> {
        match self {
            ChannelError::Rejected { transaction, .. } => Some(transaction),
            _ => None,
        }
    }
}

/// Parameters for opening a channel
#[derive(Debug, Clone)]
pub struct OpenChannelParams {
    pub channel_id: ChannelId,
    pub group_id: GroupId,
    /// Index 0 becomes the owner
    pub participants: Vec<PublicKey>,
    /// Initial locked balance per participant
    pub balances: Vec<Amount>,
}

/// Parameters for a locally signed channel transaction
#[derive(Debug, Clone)]
pub struct ChannelTransactionParams {
    pub channel_id: ChannelId,
    pub group_id: GroupId,
    /// Defaults to `ChannelOp::SendMessage`
    pub op_code: Option<ChannelOp>,
    pub amount: Amount,
    /// Defaults to the channel owner
    pub sender: Option<PublicKey>,
    /// Defaults to the second participant, or the owner of a single-party channel
    pub recipient: Option<PublicKey>,
}

impl ChannelTransactionParams {
    pub fn new(channel_id: ChannelId, group_id: GroupId, amount: Amount) -> Self {
        Self {
            channel_id,
            group_id,
            op_code: None,
            amount,
            sender: None,
            recipient: None,
        }
    }

    pub fn op(mut self, op_code: ChannelOp) -> Self {
        self.op_code = Some(op_code);
        self
    }

    pub fn from(mut self, sender: PublicKey) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn to(mut self, recipient: PublicKey) -> Self {
        self.recipient = Some(recipient);
        self
    }
}

type ChannelLocks = DashMap<ChannelId, Arc<Mutex<()>>>;

/// Exclusive hold on one channel
///
/// Dropping it releases the mutex and forgets the map entry once nobody
/// else holds or waits on it.
struct ChannelGuard<'a> {
    locks: &'a ChannelLocks,
    id: ChannelId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ChannelGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Applies transactions to channel state, one at a time per channel
pub struct ChannelManager<S: ChannelStore, K: KeyHolder> {
    store: Arc<S>,
    keys: Arc<K>,
    validator: TransitionValidator,
    locks: ChannelLocks,
}

impl<S: ChannelStore, K: KeyHolder> ChannelManager<S, K> {
    pub fn new(store: Arc<S>, keys: Arc<K>, config: ChannelConfig) -> Self {
        Self {
            store,
            keys,
            validator: TransitionValidator::new(config),
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    async fn lock_channel(&self, id: ChannelId) -> ChannelGuard<'_> {
        let lock = Arc::clone(
            self.locks
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let guard = lock.lock_owned().await;
        ChannelGuard {
            locks: &self.locks,
            id,
            guard: Some(guard),
        }
    }

    async fn load(&self, id: ChannelId) -> Result<ChannelState, ChannelError> {
        self.store
            .get(id)
            .await?
            .ok_or(ChannelError::ChannelNotFound(id))
    }

    /// Create a `Pending` channel holding the initial balance lock
    pub async fn open_channel(
        &self,
        params: OpenChannelParams,
    ) -> Result<ChannelState, ChannelError> {
        let _guard = self.lock_channel(params.channel_id).await;

        if params.participants.is_empty() {
            return Err(ChannelError::NoParticipants(params.channel_id));
        }
        let max = self.validator.config().max_participants;
        if params.participants.len() > max {
            return Err(ChannelError::Failed(SluiceError::InvalidState(format!(
                "{} participants, at most {} allowed",
                params.participants.len(),
                max
            ))));
        }

        let state = ChannelState::new(
            params.channel_id,
            params.group_id,
            params.participants,
            params.balances,
        )
        .map_err(ChannelError::Failed)?;

        if !self.store.compare_and_put(&state, None).await? {
            return Err(SluiceError::ChannelExists(state.id.to_string()).into());
        }

        info!(
            channel = %state.id,
            group = state.group_id,
            participants = state.participants.len(),
            locked = %state.total(),
            "channel opened"
        );
        Ok(state)
    }

    /// Build, sign, verify and apply a transaction on behalf of a local key
    pub async fn process_channel_transaction(
        &self,
        params: ChannelTransactionParams,
    ) -> Result<Transaction, ChannelError> {
        let _guard = self.lock_channel(params.channel_id).await;

        let state = self.load(params.channel_id).await?;
        let owner = *state
            .owner()
            .ok_or(ChannelError::NoParticipants(state.id))?;

        let mut tx = build_transaction(&state, owner, &params).map_err(ChannelError::Failed)?;

        if !self.keys.holds(&tx.from) {
            return Err(ChannelError::Failed(SluiceError::UnknownSigner(
                tx.from.to_string(),
            )));
        }
        let ctx = AuthContext {
            channel_id: state.id,
            signer: tx.from,
            nonce: tx.nonce,
        };
        let message = tx.signing_bytes().map_err(ChannelError::Failed)?;
        let signature = self
            .keys
            .sign(&message, &ctx)
            .await
            .map_err(ChannelError::Failed)?;
        tx.signature = Some(signature);

        self.commit(&state, tx).await
    }

    /// Verify and apply a transaction signed elsewhere
    pub async fn apply_transaction(&self, tx: Transaction) -> Result<Transaction, ChannelError> {
        let _guard = self.lock_channel(tx.channel_id).await;

        let state = self.load(tx.channel_id).await?;
        if state.participants.is_empty() {
            return Err(ChannelError::NoParticipants(state.id));
        }

        let mut tx = tx;
        tx.status = TransactionStatus::Pending;
        self.commit(&state, tx).await
    }

    async fn commit(
        &self,
        state: &ChannelState,
        mut tx: Transaction,
    ) -> Result<Transaction, ChannelError> {
        let checked = self
            .validator
            .validate(state, &tx)
            .and_then(|_| self.validator.apply(state, &tx));
        let next = match checked {
            Ok(next) => next,
            Err(reason) => {
                warn!(channel = %state.id, tx = %tx.id, %reason, "transaction rejected");
                tx.status = TransactionStatus::Rejected;
                return Err(ChannelError::Rejected {
                    transaction: Box::new(tx),
                    reason,
                });
            }
        };

        tx.status = TransactionStatus::Completed;
        if !self.store.compare_and_put(&next, Some(state.nonce)).await? {
            return Err(SluiceError::InvalidState(format!(
                "{} changed while the transition was in flight",
                state.id
            ))
            .into());
        }
        self.store
            .put_transaction(state.id, &tx.id, &tx.to_bytes()?)
            .await?;

        debug!(
            channel = %next.id,
            nonce = %next.nonce,
            op = %tx.op_code,
            amount = %tx.amount,
            root = %next.merkle_root,
            "transition applied"
        );
        if next.status != state.status {
            info!(channel = %next.id, from = %state.status, to = %next.status, "channel status changed");
        }
        Ok(tx)
    }

    /// Compare a counterparty's view with ours
    ///
    /// The same nonce with different balances marks the channel `Disputed`.
    pub async fn observe_state(
        &self,
        remote: &ChannelState,
    ) -> Result<ChannelStatus, ChannelError> {
        let _guard = self.lock_channel(remote.id).await;

        let local = self.load(remote.id).await?;
        let conflicting = remote.nonce == local.nonce && remote.balances != local.balances;
        if !conflicting || !local.status.can_be_disputed() {
            return Ok(local.status);
        }

        warn!(
            channel = %local.id,
            nonce = %local.nonce,
            status = %local.status,
            "conflicting state observed, marking channel disputed"
        );
        let mut disputed = local.clone();
        disputed.status = ChannelStatus::Disputed;
        disputed.refresh_root()?;
        validate_dispute(&local, &disputed)?;

        if !self.store.compare_and_put(&disputed, Some(local.nonce)).await? {
            return Err(SluiceError::InvalidState(format!(
                "{} changed while the dispute was recorded",
                local.id
            ))
            .into());
        }
        Ok(disputed.status)
    }

    /// Proof of `participant`'s balance leaf under the stored root
    pub async fn balance_proof(
        &self,
        channel_id: ChannelId,
        participant: &PublicKey,
    ) -> Result<(MerkleProof, String), ChannelError> {
        let state = self.load(channel_id).await?;
        let index = state.participant_index(participant).ok_or_else(|| {
            SluiceError::UnknownParticipant(format!("{} is not in {}", participant, channel_id))
        })?;
        Ok(state.balance_proof(index)?)
    }

    pub async fn get_channel(&self, id: ChannelId) -> Result<ChannelState, ChannelError> {
        self.load(id).await
    }

    pub async fn list_channels(
        &self,
        group: Option<GroupId>,
    ) -> Result<Vec<ChannelState>, ChannelError> {
        Ok(self.store.list(group).await?)
    }

    pub async fn get_transaction(
        &self,
        channel_id: ChannelId,
        tx_id: &TxId,
    ) -> Result<Transaction, ChannelError> {
        let bytes = self
            .store
            .get_transaction(channel_id, tx_id)
            .await?
            .ok_or_else(|| SluiceError::TransactionNotFound(tx_id.to_hex()))?;
        Ok(Transaction::from_bytes(&bytes)?)
    }

    /// Applied transactions in history order
    pub async fn transactions(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<Transaction>, ChannelError> {
        let state = self.load(channel_id).await?;
        let mut applied = Vec::with_capacity(state.transaction_history.len());
        for tx_id in &state.transaction_history {
            applied.push(self.get_transaction(channel_id, tx_id).await?);
        }
        Ok(applied)
    }
}

fn build_transaction(
    state: &ChannelState,
    owner: PublicKey,
    params: &ChannelTransactionParams,
) -> SluiceResult<Transaction> {
    if params.group_id != state.group_id {
        return Err(SluiceError::InvalidTransaction(format!(
            "group {} does not match group {} of {}",
            params.group_id, state.group_id, state.id
        )));
    }

    let from = params.sender.unwrap_or(owner);
    let from_index = state
        .participant_index(&from)
        .ok_or_else(|| SluiceError::UnknownParticipant(format!("sender {}", from)))?;

    let to = params
        .recipient
        .or_else(|| state.participants.get(1).copied())
        .unwrap_or(owner);
    if state.participant_index(&to).is_none() {
        return Err(SluiceError::UnknownParticipant(format!("recipient {}", to)));
    }

    let nonce = state
        .nonce
        .next()
        .ok_or_else(|| SluiceError::InvalidState(format!("nonce of {} exhausted", state.id)))?;
    let op_code = params.op_code.unwrap_or_default();

    let mut tx = Transaction::new(
        state.id,
        op_code,
        from,
        to,
        params.amount.clone(),
        nonce,
        state.nonce.0,
        state.merkle_root,
    );
    if op_code.requires_proof() {
        let (proof, _) = state.balance_proof(from_index)?;
        tx = tx.with_proof(proof);
    }
    Ok(tx)
}
