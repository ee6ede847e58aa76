//! Channel operations behind the CLI subcommands

use anyhow::{bail, Context};
use sluice_cell::{deserialize_boc, serialize_boc};
use sluice_channel::{
    decode_proof, encode_proof, state_to_boc, transaction_to_boc, ChannelManager, ChannelOp,
    ChannelTransactionParams, OpenChannelParams, Transaction,
};
use sluice_core::{Amount, ChannelId, GroupId, PublicKey, TxId};
use sluice_crypto::keyring::Keyring;
use sluice_crypto::merkle::{verify, MerkleProof};
use sluice_state::{ChannelState, ChannelStore};
use std::fmt::Write as _;
use std::path::Path;

use crate::wallet::WalletManager;

/// Parse `<participant>=<amount>`; the participant is a wallet name or hex key
pub fn parse_allocation(arg: &str) -> Result<(String, Amount), String> {
    let (who, amount) = arg
        .rsplit_once('=')
        .ok_or_else(|| format!("expected <participant>=<amount>, got '{}'", arg))?;
    let amount = amount
        .parse::<Amount>()
        .map_err(|e| format!("bad amount '{}': {}", amount, e))?;
    Ok((who.to_string(), amount))
}

pub fn parse_op(arg: &str) -> Result<ChannelOp, String> {
    match arg.to_ascii_lowercase().as_str() {
        "init" => Ok(ChannelOp::InitChannel),
        "message" => Ok(ChannelOp::SendMessage),
        "payment" => Ok(ChannelOp::CreatePayment),
        "close" => Ok(ChannelOp::CloseChannel),
        "finalize" => Ok(ChannelOp::FinalizeClose),
        "dispute" => Ok(ChannelOp::Dispute),
        other => Err(format!(
            "unknown op '{}' (init, message, payment, close, finalize, dispute)",
            other
        )),
    }
}

pub async fn open_channel<S: ChannelStore>(
    manager: &ChannelManager<S, Keyring>,
    wallets: &WalletManager,
    channel_id: ChannelId,
    group_id: GroupId,
    allocations: &[(String, Amount)],
) -> anyhow::Result<ChannelState> {
    let mut participants = Vec::with_capacity(allocations.len());
    let mut balances = Vec::with_capacity(allocations.len());
    for (who, amount) in allocations {
        participants.push(wallets.resolve(who)?);
        balances.push(amount.clone());
    }
    let state = manager
        .open_channel(OpenChannelParams {
            channel_id,
            group_id,
            participants,
            balances,
        })
        .await?;
    Ok(state)
}

/// Sign and apply one transaction with a locally held key
pub async fn transact<S: ChannelStore>(
    manager: &ChannelManager<S, Keyring>,
    wallets: &WalletManager,
    channel_id: ChannelId,
    op: ChannelOp,
    amount: Amount,
    from: Option<&str>,
    to: Option<&str>,
) -> anyhow::Result<Transaction> {
    let state = manager.get_channel(channel_id).await?;
    let mut params =
        ChannelTransactionParams::new(channel_id, state.group_id, amount).op(op);
    if let Some(from) = from {
        params = params.from(wallets.resolve(from)?);
    }
    if let Some(to) = to {
        params = params.to(wallets.resolve(to)?);
    }
    Ok(manager.process_channel_transaction(params).await?)
}

pub fn describe_state(state: &ChannelState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Channel:      {}", state.id);
    let _ = writeln!(out, "Group:        {}", state.group_id);
    let _ = writeln!(out, "Status:       {}", state.status);
    let _ = writeln!(out, "Nonce:        {}", state.nonce);
    let _ = writeln!(out, "Merkle root:  {}", state.merkle_root);
    let _ = writeln!(out, "Transactions: {}", state.transaction_history.len());
    for (participant, balance) in state.participants.iter().zip(&state.balances) {
        let _ = writeln!(out, "  {}  {}", participant, balance);
    }
    out
}

pub fn describe_transaction(tx: &Transaction) -> String {
    format!(
        "{}  nonce={} {} {} -> {} amount={} [{}]",
        tx.id, tx.nonce, tx.op_code, tx.from, tx.to, tx.amount, tx.status
    )
}

/// Write a participant's balance proof as JSON; returns the leaf it proves
pub async fn write_proof<S: ChannelStore>(
    manager: &ChannelManager<S, Keyring>,
    channel_id: ChannelId,
    participant: &PublicKey,
    output: &Path,
) -> anyhow::Result<String> {
    let (proof, leaf) = manager.balance_proof(channel_id, participant).await?;
    std::fs::write(output, serde_json::to_string_pretty(&proof)?)
        .with_context(|| format!("writing {}", output.display()))?;
    Ok(leaf)
}

/// Read a proof stored as JSON or as a hex bag of cells
pub fn read_proof(path: &Path) -> anyhow::Result<MerkleProof> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let content = content.trim();
    if content.starts_with('{') {
        return Ok(serde_json::from_str(content)?);
    }
    let boc = hex::decode(content).context("proof is neither JSON nor hex")?;
    Ok(decode_proof(&*deserialize_boc(&boc)?)?)
}

pub fn verify_proof_file(path: &Path, leaf: &str) -> anyhow::Result<bool> {
    let proof = read_proof(path)?;
    Ok(verify(&proof, leaf)?)
}

/// What `export` renders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportTarget {
    State,
    Transaction,
    Proof,
}

/// Hex bag of cells for a channel state, one of its transactions, or a proof
pub async fn export<S: ChannelStore>(
    manager: &ChannelManager<S, Keyring>,
    wallets: &WalletManager,
    channel_id: ChannelId,
    target: ExportTarget,
    selector: Option<&str>,
) -> anyhow::Result<String> {
    let boc = match target {
        ExportTarget::State => state_to_boc(&manager.get_channel(channel_id).await?)?,
        ExportTarget::Transaction => {
            let Some(id) = selector else {
                bail!("transaction export needs a transaction id");
            };
            let tx_id = TxId::from_hex(id).context("bad transaction id")?;
            transaction_to_boc(&manager.get_transaction(channel_id, &tx_id).await?)?
        }
        ExportTarget::Proof => {
            let Some(who) = selector else {
                bail!("proof export needs a participant");
            };
            let participant = wallets.resolve(who)?;
            let (proof, _) = manager.balance_proof(channel_id, &participant).await?;
            serialize_boc(&encode_proof(&proof)?)
        }
    };
    Ok(hex::encode(boc))
}
