//! Channel state, its commitment, and structural transition rules

use serde::{Deserialize, Serialize};
use sluice_core::{
    Amount, ChannelId, GroupId, Hash, Nonce, PublicKey, SluiceError, SluiceResult, StateRoot,
    TxId,
};
use sluice_crypto::hashing::sha256_multiple;
use sluice_crypto::merkle::{MerkleProof, MerkleTree};
use std::fmt;

const PARTICIPANT_LEAF_TAG: u8 = 0x00;
const HEADER_LEAF_TAG: u8 = 0x01;

/// Channel lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelStatus {
    Pending,
    Active,
    Closed,
    Disputed,
}

impl ChannelStatus {
    pub fn as_u8(&self) -> u8 {
        match self {
            ChannelStatus::Pending => 0,
            ChannelStatus::Active => 1,
            ChannelStatus::Closed => 2,
            ChannelStatus::Disputed => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ChannelStatus::Pending),
            1 => Some(ChannelStatus::Active),
            2 => Some(ChannelStatus::Closed),
            3 => Some(ChannelStatus::Disputed),
            _ => None,
        }
    }

    /// Whether a transition may move a channel from `self` to `next`
    pub fn can_become(&self, next: ChannelStatus) -> bool {
        use ChannelStatus::*;
        matches!(
            (self, next),
            (Pending, Pending)
                | (Pending, Active)
                | (Active, Active)
                | (Active, Closed)
                | (Active, Disputed)
        )
    }

    /// Whether an observed conflicting state may mark a channel in `self` as
    /// `Disputed`
    ///
    /// This edge carries no transaction, so it is not limited to `can_become`.
    /// Every status except `Disputed` itself qualifies; a conflict seen after
    /// close still has to reach settlement.
    pub fn can_be_disputed(&self) -> bool {
        !matches!(self, ChannelStatus::Disputed)
    }

    pub fn is_final(&self) -> bool {
        matches!(self, ChannelStatus::Closed | ChannelStatus::Disputed)
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelStatus::Pending => "Pending",
            ChannelStatus::Active => "Active",
            ChannelStatus::Closed => "Closed",
            ChannelStatus::Disputed => "Disputed",
        };
        f.write_str(name)
    }
}

/// Authoritative state of one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState {
    pub id: ChannelId,
    pub group_id: GroupId,
    /// Index 0 is the owner
    pub participants: Vec<PublicKey>,
    /// One balance per participant
    pub balances: Vec<Amount>,
    pub nonce: Nonce,
    pub merkle_root: StateRoot,
    pub status: ChannelStatus,
    pub transaction_history: Vec<TxId>,
}

impl ChannelState {
    /// New `Pending` channel with its initial balance lock and computed root
    pub fn new(
        id: ChannelId,
        group_id: GroupId,
        participants: Vec<PublicKey>,
        balances: Vec<Amount>,
    ) -> SluiceResult<Self> {
        let mut state = Self {
            id,
            group_id,
            participants,
            balances,
            nonce: Nonce::new(0),
            merkle_root: Hash::ZERO,
            status: ChannelStatus::Pending,
            transaction_history: Vec::new(),
        };
        check_shape(&state)?;
        state.refresh_root()?;
        Ok(state)
    }

    pub fn owner(&self) -> Option<&PublicKey> {
        self.participants.first()
    }

    pub fn participant_index(&self, participant: &PublicKey) -> Option<usize> {
        self.participants.iter().position(|p| p == participant)
    }

    pub fn balance_of(&self, participant: &PublicKey) -> Option<Amount> {
        self.participant_index(participant)
            .map(|i| self.balances[i].clone())
    }

    /// Sum of all balances
    pub fn total(&self) -> Amount {
        self.balances.iter().sum()
    }

    /// Leaf committing to participant `index` and their balance
    pub fn balance_leaf(&self, index: usize) -> SluiceResult<Hash> {
        let participant = self.participants.get(index).ok_or_else(|| {
            SluiceError::UnknownParticipant(format!("index {} of {}", index, self.id))
        })?;
        let balance = self.balances.get(index).ok_or_else(|| {
            SluiceError::InvalidState(format!("no balance for participant {}", index))
        })?;
        Ok(sha256_multiple(&[
            &[PARTICIPANT_LEAF_TAG],
            participant.as_bytes(),
            &balance.to_be_bytes(),
        ]))
    }

    fn header_leaf(&self) -> Hash {
        sha256_multiple(&[
            &[HEADER_LEAF_TAG],
            &self.id.0.to_be_bytes(),
            &self.group_id.to_be_bytes(),
            &self.nonce.0.to_be_bytes(),
            &[self.status.as_u8()],
        ])
    }

    /// Merkle tree over participant balance leaves followed by the header leaf
    pub fn commitment_tree(&self) -> SluiceResult<MerkleTree> {
        let mut leaves = (0..self.participants.len())
            .map(|i| self.balance_leaf(i))
            .collect::<SluiceResult<Vec<_>>>()?;
        leaves.push(self.header_leaf());
        MerkleTree::new(leaves)
    }

    pub fn compute_root(&self) -> SluiceResult<StateRoot> {
        Ok(self.commitment_tree()?.root())
    }

    /// Recompute and store the commitment
    pub fn refresh_root(&mut self) -> SluiceResult<()> {
        self.merkle_root = self.compute_root()?;
        Ok(())
    }

    /// Proof of participant `index`'s balance leaf under the current root
    pub fn balance_proof(&self, index: usize) -> SluiceResult<(MerkleProof, String)> {
        let tree = self.commitment_tree()?;
        let proof = tree.proof(index)?;
        let leaf = self.balance_leaf(index)?.to_hex();
        Ok((proof, leaf))
    }

    pub fn to_bytes(&self) -> SluiceResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> SluiceResult<Self> {
        bincode::deserialize(bytes).map_err(|e| SluiceError::DeserializationError(e.to_string()))
    }
}

fn check_shape(state: &ChannelState) -> SluiceResult<()> {
    if state.participants.is_empty() {
        return Err(SluiceError::InvalidState(format!(
            "{} has no participants",
            state.id
        )));
    }
    if state.balances.len() != state.participants.len() {
        return Err(SluiceError::InvalidState(format!(
            "{} balances for {} participants",
            state.balances.len(),
            state.participants.len()
        )));
    }
    for (i, p) in state.participants.iter().enumerate() {
        if state.participants[..i].contains(p) {
            return Err(SluiceError::InvalidState(format!(
                "participant {} listed twice",
                p
            )));
        }
    }
    Ok(())
}

/// Check the structural invariants of `next` against the stored `prior`
///
/// No proof is consulted. With no prior, `next` must be a fresh `Pending`
/// channel at nonce 0.
pub fn validate_transition(prior: Option<&ChannelState>, next: &ChannelState) -> SluiceResult<()> {
    check_shape(next)?;

    match prior {
        None => {
            if next.nonce != Nonce::new(0) {
                return Err(SluiceError::InvalidNonce {
                    expected: 0,
                    got: next.nonce.0,
                });
            }
            if next.status != ChannelStatus::Pending {
                return Err(SluiceError::StatusMismatch {
                    expected: ChannelStatus::Pending.to_string(),
                    actual: next.status.to_string(),
                });
            }
            if !next.transaction_history.is_empty() {
                return Err(SluiceError::InvalidState(
                    "new channel carries transaction history".into(),
                ));
            }
        }
        Some(prior) => {
            if prior.id != next.id || prior.group_id != next.group_id {
                return Err(SluiceError::InvalidState(format!(
                    "identity changed from {} to {}",
                    prior.id, next.id
                )));
            }
            if prior.participants != next.participants {
                return Err(SluiceError::InvalidState(
                    "participant list changed".into(),
                ));
            }

            let before = prior.total();
            let after = next.total();
            if before != after {
                return Err(SluiceError::BalanceNotConserved { before, after });
            }

            let expected = prior.nonce.next().ok_or_else(|| {
                SluiceError::InvalidState(format!("nonce of {} exhausted", prior.id))
            })?;
            if next.nonce != expected {
                return Err(SluiceError::InvalidNonce {
                    expected: expected.0,
                    got: next.nonce.0,
                });
            }

            if !prior.status.can_become(next.status) {
                return Err(SluiceError::StatusMismatch {
                    expected: format!("a successor of {}", prior.status),
                    actual: next.status.to_string(),
                });
            }

            let history_extends = next.transaction_history.len()
                == prior.transaction_history.len() + 1
                && next.transaction_history.starts_with(&prior.transaction_history);
            if !history_extends {
                return Err(SluiceError::InvalidState(
                    "transaction history must grow by exactly one entry".into(),
                ));
            }
        }
    }

    if next.merkle_root != next.compute_root()? {
        return Err(SluiceError::InvalidState(format!(
            "stale merkle root for {}",
            next.id
        )));
    }

    Ok(())
}

/// Check that `next` is `prior` marked `Disputed` with nothing else changed
pub fn validate_dispute(prior: &ChannelState, next: &ChannelState) -> SluiceResult<()> {
    if !prior.status.can_be_disputed() {
        return Err(SluiceError::StatusMismatch {
            expected: "a status that can be disputed".into(),
            actual: prior.status.to_string(),
        });
    }
    if next.status != ChannelStatus::Disputed {
        return Err(SluiceError::StatusMismatch {
            expected: ChannelStatus::Disputed.to_string(),
            actual: next.status.to_string(),
        });
    }

    let mut expected = prior.clone();
    expected.status = ChannelStatus::Disputed;
    expected.refresh_root()?;
    if *next != expected {
        return Err(SluiceError::InvalidState(format!(
            "marking {} disputed may only change its status",
            prior.id
        )));
    }
    Ok(())
}
