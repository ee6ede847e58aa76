//! Cell encodings of transactions, channel states, proofs and settlement payloads
//!
//! Transaction cell, fields in order:
//!
//! | field       | bits  |
//! |-------------|-------|
//! | id          | 256   |
//! | op_code     | 8     |
//! | channel_id  | 64    |
//! | from        | 256   |
//! | to          | 256   |
//! | amount      | coins |
//! | nonce       | 64    |
//! | seqno       | 64    |
//! | timestamp   | 64    |
//! | signature   | 512   |
//! | status      | 8     |
//! | merkle_root | 256   |
//! | proof flag  | 1     |
//!
//! When the flag is set the proof payload cell is the only reference.

use sluice_cell::{
    deserialize_boc, serialize_boc, Cell, CellBuilder, CellSlice, MAX_COINS_BYTES,
};
use sluice_core::{
    Amount, ChannelId, Nonce, PublicKey, Signature, SluiceError, SluiceResult, Timestamp, TxId,
};
use sluice_crypto::hashing::sha256_hash;
use sluice_crypto::merkle::{normalize_hex, MerkleProof};
use sluice_state::{ChannelState, ChannelStatus};
use std::sync::Arc;

use crate::opcode::ChannelOp;
use crate::transaction::{Transaction, TransactionStatus};

/// Prefix of every transaction signing message
pub const SIGNING_DOMAIN: &[u8] = b"SLUICE_TX_V1:";

const UNSIGNED: [u8; 64] = [0u8; 64];
const MAX_PROOF_NODE_BYTES: usize = 32;
const PROOF_LEVELS_PER_CELL: usize = 7;
const PARTICIPANTS_PER_CELL: usize = 5;
const HISTORY_PER_CELL: usize = 7;

/// Coins encoding for unbounded amounts
trait StoreAmount {
    fn store_amount(&mut self, amount: &Amount) -> SluiceResult<&mut Self>;
}

impl StoreAmount for CellBuilder {
    /// `BitWidthOverflow` once the amount is wider than the coins field
    fn store_amount(&mut self, amount: &Amount) -> SluiceResult<&mut Self> {
        let value = amount
            .to_u128()
            .ok_or_else(|| SluiceError::BitWidthOverflow {
                field: format!("coins {}", amount),
                bits: MAX_COINS_BYTES * 8,
            })?;
        self.store_coins(value)
    }
}

fn store_transaction_fields(
    builder: &mut CellBuilder,
    tx: &Transaction,
    with_signature: bool,
) -> SluiceResult<()> {
    builder
        .store_hash(&tx.id)?
        .store_u8(tx.op_code.value())?
        .store_u64(tx.channel_id.0)?
        .store_bytes(tx.from.as_bytes())?
        .store_bytes(tx.to.as_bytes())?
        .store_amount(&tx.amount)?
        .store_u64(tx.nonce.0)?
        .store_u64(tx.seqno)?
        .store_u64(tx.timestamp.0)?;

    if with_signature {
        let signature = tx.signature.map(|s| s.0).unwrap_or(UNSIGNED);
        builder
            .store_bytes(&signature)?
            .store_u8(tx.status.as_u8())?;
    }

    let payload = match &tx.proof {
        Some(proof) => Some(Arc::new(encode_proof(proof)?)),
        None => None,
    };
    builder.store_hash(&tx.merkle_root)?.store_maybe_ref(payload)?;
    Ok(())
}

/// Encode a transaction into its canonical cell
pub fn encode_transaction(tx: &Transaction) -> SluiceResult<Cell> {
    let mut builder = CellBuilder::new();
    store_transaction_fields(&mut builder, tx, true)?;
    builder.build()
}

/// Decode a transaction cell, requiring every bit and reference be consumed
pub fn decode_transaction(cell: &Cell) -> SluiceResult<Transaction> {
    let mut s = cell.parse();

    let id = s.load_hash()?;
    let op_code = ChannelOp::try_from(s.load_u8()?)?;
    let channel_id = ChannelId::new(s.load_u64()?);
    let from = PublicKey::from_bytes(s.load_array::<32>()?);
    let to = PublicKey::from_bytes(s.load_array::<32>()?);
    let amount = Amount::new(s.load_coins()?);
    let nonce = Nonce::new(s.load_u64()?);
    let seqno = s.load_u64()?;
    let timestamp = Timestamp::from_millis(s.load_u64()?);

    let raw_signature = s.load_array::<64>()?;
    let signature = (raw_signature != UNSIGNED).then(|| Signature::from_bytes(raw_signature));

    let status_code = s.load_u8()?;
    let status = TransactionStatus::from_u8(status_code).ok_or_else(|| {
        SluiceError::MalformedCell(format!("unknown transaction status {}", status_code))
    })?;

    let merkle_root = s.load_hash()?;
    let proof = match s.load_maybe_ref()? {
        Some(payload) => Some(decode_proof(&payload)?),
        None => None,
    };
    s.end_parse()?;

    Ok(Transaction {
        id,
        op_code,
        channel_id,
        from,
        to,
        amount,
        nonce,
        seqno,
        timestamp,
        merkle_root,
        proof,
        signature,
        status,
    })
}

/// Message the sender signs
///
/// Domain tag followed by the hash of the transaction cell built without the
/// signature and status fields.
pub fn signing_bytes(tx: &Transaction) -> SluiceResult<Vec<u8>> {
    let mut builder = CellBuilder::new();
    store_transaction_fields(&mut builder, tx, false)?;
    let digest = builder.build()?.hash();

    let mut message = Vec::with_capacity(SIGNING_DOMAIN.len() + 32);
    message.extend_from_slice(SIGNING_DOMAIN);
    message.extend_from_slice(digest.as_bytes());
    Ok(message)
}

pub fn transaction_to_boc(tx: &Transaction) -> SluiceResult<Vec<u8>> {
    Ok(serialize_boc(&encode_transaction(tx)?))
}

pub fn transaction_from_boc(bytes: &[u8]) -> SluiceResult<Transaction> {
    decode_transaction(&*deserialize_boc(bytes)?)
}

// ---- chains of fixed-size entries spread over linked cells ----

fn encode_chain<T, F>(items: &[T], per_cell: usize, mut write: F) -> SluiceResult<Option<Arc<Cell>>>
where
    F: FnMut(&mut CellBuilder, &T) -> SluiceResult<()>,
{
    let mut next: Option<Arc<Cell>> = None;
    for chunk in items.chunks(per_cell).rev() {
        let mut builder = CellBuilder::new();
        for item in chunk {
            write(&mut builder, item)?;
        }
        builder.store_maybe_ref(next.take())?;
        next = Some(Arc::new(builder.build()?));
    }
    Ok(next)
}

fn decode_chain<T, F>(
    head: Option<Arc<Cell>>,
    count: usize,
    per_cell: usize,
    mut read: F,
) -> SluiceResult<Vec<T>>
where
    F: FnMut(&mut CellSlice<'_>) -> SluiceResult<T>,
{
    let mut items = Vec::with_capacity(count.min(1024));
    let mut current = head;
    while items.len() < count {
        let cell = current.take().ok_or_else(|| {
            SluiceError::InvalidReference(format!(
                "chain ends after {} of {} entries",
                items.len(),
                count
            ))
        })?;
        let mut s = cell.parse();
        for _ in 0..per_cell.min(count - items.len()) {
            items.push(read(&mut s)?);
        }
        current = s.load_maybe_ref()?;
        s.end_parse()?;
    }
    if current.is_some() {
        return Err(SluiceError::MalformedCell(format!(
            "chain continues past {} declared entries",
            count
        )));
    }
    Ok(items)
}

// ---- proof payload ----

fn proof_node_bytes(value: &str, what: &str) -> SluiceResult<Vec<u8>> {
    let bytes = hex::decode(normalize_hex(value, what)?)
        .map_err(|e| SluiceError::MerkleEncoding(e.to_string()))?;
    if bytes.len() > MAX_PROOF_NODE_BYTES {
        return Err(SluiceError::MerkleEncoding(format!(
            "{} is {} bytes, at most {} fit a payload cell",
            what,
            bytes.len(),
            MAX_PROOF_NODE_BYTES
        )));
    }
    Ok(bytes)
}

fn store_proof_node(builder: &mut CellBuilder, value: &str, what: &str) -> SluiceResult<()> {
    let bytes = proof_node_bytes(value, what)?;
    builder.store_u8(bytes.len() as u8)?.store_bytes(&bytes)?;
    Ok(())
}

fn load_proof_node(s: &mut CellSlice<'_>) -> SluiceResult<String> {
    let len = s.load_u8()? as usize;
    if len > MAX_PROOF_NODE_BYTES {
        return Err(SluiceError::MalformedCell(format!(
            "proof node of {} bytes",
            len
        )));
    }
    Ok(hex::encode(s.load_bytes(len)?))
}

/// Encode a merkle proof as a payload cell
///
/// Node values are stored as raw bytes, so they decode as lower-case hex
/// without a `0x` prefix. Only `siblings` is written; a decoded proof carries
/// the same sequence as its `path`.
pub fn encode_proof(proof: &MerkleProof) -> SluiceResult<Cell> {
    let depth = proof.depth();
    if proof.path.len() != depth || proof.directions.len() != depth {
        return Err(SluiceError::MerkleStructure(format!(
            "length mismatch: path={} siblings={} directions={}",
            proof.path.len(),
            depth,
            proof.directions.len()
        )));
    }

    let levels: Vec<(&String, u8)> = proof
        .siblings
        .iter()
        .zip(proof.directions.iter().copied())
        .collect();
    let chain = encode_chain(&levels, PROOF_LEVELS_PER_CELL, |b, (sibling, direction)| {
        if *direction > 1 {
            return Err(SluiceError::MerkleStructure(format!(
                "direction {} is not 0 or 1",
                direction
            )));
        }
        b.store_bit(*direction == 1)?;
        store_proof_node(b, sibling, "sibling")
    })?;

    let mut builder = CellBuilder::new();
    store_proof_node(&mut builder, &proof.root, "root")?;
    builder
        .store_uint(depth as u128, 8)?
        .store_maybe_ref(chain)?;
    builder.build()
}

pub fn decode_proof(cell: &Cell) -> SluiceResult<MerkleProof> {
    let mut s = cell.parse();
    let root = load_proof_node(&mut s)?;
    let depth = s.load_u8()? as usize;
    let head = s.load_maybe_ref()?;
    s.end_parse()?;

    let levels = decode_chain(head, depth, PROOF_LEVELS_PER_CELL, |s| {
        let direction = s.load_bit()? as u8;
        let sibling = load_proof_node(s)?;
        Ok((sibling, direction))
    })?;

    let (siblings, directions): (Vec<String>, Vec<u8>) = levels.into_iter().unzip();
    Ok(MerkleProof {
        root,
        path: siblings.clone(),
        siblings,
        directions,
    })
}

// ---- channel state ----

/// Encode a channel state: fixed header, then participant and history chains
pub fn encode_state(state: &ChannelState) -> SluiceResult<Cell> {
    if state.balances.len() != state.participants.len() {
        return Err(SluiceError::InvalidState(format!(
            "{} balances for {} participants",
            state.balances.len(),
            state.participants.len()
        )));
    }

    let entries: Vec<(&PublicKey, &Amount)> =
        state.participants.iter().zip(&state.balances).collect();
    let participants = encode_chain(&entries, PARTICIPANTS_PER_CELL, |b, (key, balance)| {
        b.store_bytes(key.as_bytes())?.store_amount(balance)?;
        Ok(())
    })?;
    let history = encode_chain(&state.transaction_history, HISTORY_PER_CELL, |b, id| {
        b.store_hash(id)?;
        Ok(())
    })?;

    let mut builder = CellBuilder::new();
    builder
        .store_u64(state.id.0)?
        .store_u32(state.group_id)?
        .store_u8(state.status.as_u8())?
        .store_u64(state.nonce.0)?
        .store_hash(&state.merkle_root)?
        .store_uint(entries.len() as u128, 8)?
        .store_uint(state.transaction_history.len() as u128, 32)?
        .store_maybe_ref(participants)?
        .store_maybe_ref(history)?;
    builder.build()
}

pub fn decode_state(cell: &Cell) -> SluiceResult<ChannelState> {
    let mut s = cell.parse();
    let id = ChannelId::new(s.load_u64()?);
    let group_id = s.load_u32()?;
    let status_code = s.load_u8()?;
    let status = ChannelStatus::from_u8(status_code).ok_or_else(|| {
        SluiceError::MalformedCell(format!("unknown channel status {}", status_code))
    })?;
    let nonce = Nonce::new(s.load_u64()?);
    let merkle_root = s.load_hash()?;
    let participant_count = s.load_u8()? as usize;
    let history_count = s.load_u32()? as usize;
    let participants_head = s.load_maybe_ref()?;
    let history_head = s.load_maybe_ref()?;
    s.end_parse()?;

    let entries = decode_chain(
        participants_head,
        participant_count,
        PARTICIPANTS_PER_CELL,
        |s| {
            let key = PublicKey::from_bytes(s.load_array::<32>()?);
            let balance = Amount::new(s.load_coins()?);
            Ok((key, balance))
        },
    )?;
    let transaction_history: Vec<TxId> =
        decode_chain(history_head, history_count, HISTORY_PER_CELL, |s| s.load_hash())?;
    let (participants, balances) = entries.into_iter().unzip();

    Ok(ChannelState {
        id,
        group_id,
        participants,
        balances,
        nonce,
        merkle_root,
        status,
        transaction_history,
    })
}

pub fn state_to_boc(state: &ChannelState) -> SluiceResult<Vec<u8>> {
    Ok(serialize_boc(&encode_state(state)?))
}

pub fn state_from_boc(bytes: &[u8]) -> SluiceResult<ChannelState> {
    decode_state(&*deserialize_boc(bytes)?)
}

// ---- settlement ----

/// The message the on-ledger channel contract deserializes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementPayload {
    pub op_code: ChannelOp,
    pub nonce: Nonce,
    pub amount: Amount,
    pub sender: PublicKey,
    pub recipient: PublicKey,
    pub timestamp: Timestamp,
    pub id: TxId,
}

impl SettlementPayload {
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self {
            op_code: tx.op_code,
            nonce: tx.nonce,
            amount: tx.amount.clone(),
            sender: tx.from,
            recipient: tx.to,
            timestamp: tx.timestamp,
            id: tx.id,
        }
    }

    pub fn to_cell(&self) -> SluiceResult<Cell> {
        let mut builder = CellBuilder::new();
        builder
            .store_u8(self.op_code.value())?
            .store_u64(self.nonce.0)?
            .store_amount(&self.amount)?
            .store_bytes(self.sender.as_bytes())?
            .store_bytes(self.recipient.as_bytes())?
            .store_u64(self.timestamp.0)?
            .store_hash(&self.id)?;
        builder.build()
    }

    pub fn from_cell(cell: &Cell) -> SluiceResult<Self> {
        let mut s = cell.parse();
        let payload = Self {
            op_code: ChannelOp::try_from(s.load_u8()?)?,
            nonce: Nonce::new(s.load_u64()?),
            amount: Amount::new(s.load_coins()?),
            sender: PublicKey::from_bytes(s.load_array::<32>()?),
            recipient: PublicKey::from_bytes(s.load_array::<32>()?),
            timestamp: Timestamp::from_millis(s.load_u64()?),
            id: s.load_hash()?,
        };
        s.end_parse()?;
        Ok(payload)
    }

    pub fn to_boc(&self) -> SluiceResult<Vec<u8>> {
        Ok(serialize_boc(&self.to_cell()?))
    }

    /// Ledger-side identifier of this payload
    pub fn digest(&self) -> SluiceResult<TxId> {
        Ok(sha256_hash(&self.to_boc()?))
    }
}
