//! Transition checks and application for channel transactions

use sluice_core::{Amount, ChannelConfig, SluiceError, SluiceResult};
use sluice_crypto::merkle::verify;
use sluice_state::{validate_transition, ChannelState, ChannelStatus};

use crate::opcode::ChannelOp;
use crate::transaction::{derive_tx_id, Transaction};

/// Checks a transaction against the channel state it targets
#[derive(Debug, Clone)]
pub struct TransitionValidator {
    config: ChannelConfig,
}

impl TransitionValidator {
    pub fn new(config: ChannelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Shape checks that need no signature or proof
    pub fn validate_structure(
        &self,
        state: &ChannelState,
        tx: &Transaction,
    ) -> SluiceResult<()> {
        if tx.channel_id != state.id {
            return Err(SluiceError::InvalidTransaction(format!(
                "transaction targets {}, not {}",
                tx.channel_id, state.id
            )));
        }
        if tx.id != derive_tx_id(tx.timestamp, tx.nonce, tx.channel_id) {
            return Err(SluiceError::InvalidTransaction(format!(
                "id {} is not derived from its timestamp, nonce and channel",
                tx.id
            )));
        }
        if state.participant_index(&tx.from).is_none() {
            return Err(SluiceError::UnknownParticipant(format!(
                "sender {} is not in {}",
                tx.from, state.id
            )));
        }
        if state.participant_index(&tx.to).is_none() {
            return Err(SluiceError::UnknownParticipant(format!(
                "recipient {} is not in {}",
                tx.to, state.id
            )));
        }
        if tx.amount > Amount::new(self.config.max_amount) {
            return Err(SluiceError::InvalidTransaction(format!(
                "amount {} exceeds maximum {}",
                tx.amount, self.config.max_amount
            )));
        }
        if !tx.op_code.moves_funds() && !tx.amount.is_zero() {
            return Err(SluiceError::InvalidTransaction(format!(
                "{} carries amount {}",
                tx.op_code, tx.amount
            )));
        }
        Ok(())
    }

    /// Nonce, seqno and source status against the stored state
    pub fn validate_sequence(&self, state: &ChannelState, tx: &Transaction) -> SluiceResult<()> {
        let expected = state.nonce.next().ok_or_else(|| {
            SluiceError::InvalidState(format!("nonce of {} exhausted", state.id))
        })?;
        if tx.nonce != expected {
            return Err(SluiceError::InvalidNonce {
                expected: expected.0,
                got: tx.nonce.0,
            });
        }
        if tx.seqno != state.nonce.0 {
            return Err(SluiceError::InvalidSeqno {
                expected: state.nonce.0,
                got: tx.seqno,
            });
        }

        let required = tx.op_code.required_status();
        if state.status != required {
            return Err(SluiceError::StatusMismatch {
                expected: required.to_string(),
                actual: state.status.to_string(),
            });
        }

        if state.transaction_history.contains(&tx.id) {
            return Err(SluiceError::InvalidTransaction(format!(
                "{} was already applied to {}",
                tx.id, state.id
            )));
        }
        Ok(())
    }

    pub fn validate_signature(&self, tx: &Transaction) -> SluiceResult<()> {
        tx.verify_signature().map_err(|e| match e {
            SluiceError::InvalidSignature => {
                SluiceError::VerificationFailed(format!("bad signature on {}", tx.id))
            }
            other => other,
        })
    }

    /// Check the attached proof of the sender's balance against the current root
    ///
    /// Structural proof errors propagate as-is; a proof that is well formed
    /// but does not verify is a `VerificationFailed`.
    pub fn validate_proof(&self, state: &ChannelState, tx: &Transaction) -> SluiceResult<()> {
        if !(self.config.require_proofs && tx.op_code.requires_proof()) {
            return Ok(());
        }
        let proof = tx.proof.as_ref().ok_or_else(|| {
            SluiceError::VerificationFailed(format!("{} requires a merkle proof", tx.op_code))
        })?;

        if tx.merkle_root != state.merkle_root {
            return Err(SluiceError::VerificationFailed(format!(
                "built against root {}, channel is at {}",
                tx.merkle_root, state.merkle_root
            )));
        }
        if !proof
            .root
            .trim_start_matches("0x")
            .eq_ignore_ascii_case(&state.merkle_root.to_hex())
        {
            return Err(SluiceError::VerificationFailed(
                "proof root is not the channel root".into(),
            ));
        }

        let index = state.participant_index(&tx.from).ok_or_else(|| {
            SluiceError::UnknownParticipant(format!("sender {} is not in {}", tx.from, state.id))
        })?;
        let leaf = state.balance_leaf(index)?.to_hex();
        if !verify(proof, &leaf)? {
            return Err(SluiceError::VerificationFailed(
                "balance proof does not reach the channel root".into(),
            ));
        }
        Ok(())
    }

    /// Everything except application
    pub fn validate(&self, state: &ChannelState, tx: &Transaction) -> SluiceResult<()> {
        self.validate_structure(state, tx)?;
        self.validate_sequence(state, tx)?;
        self.validate_signature(tx)?;
        self.validate_proof(state, tx)?;
        Ok(())
    }

    /// Successor state produced by `tx`, checked against `state`
    ///
    /// Never mutates `state`; the result has passed `validate_transition`.
    pub fn apply(&self, state: &ChannelState, tx: &Transaction) -> SluiceResult<ChannelState> {
        let mut next = state.clone();

        match tx.op_code {
            ChannelOp::InitChannel => {
                if next.total().is_zero() {
                    return Err(SluiceError::InvalidState(format!(
                        "{} has no locked funds",
                        state.id
                    )));
                }
                next.status = ChannelStatus::Active;
            }
            ChannelOp::SendMessage | ChannelOp::CreatePayment => {
                transfer(&mut next, tx)?;
            }
            ChannelOp::CloseChannel | ChannelOp::FinalizeClose => {
                transfer(&mut next, tx)?;
                next.status = ChannelStatus::Closed;
            }
            ChannelOp::Dispute => {
                next.status = ChannelStatus::Disputed;
            }
        }

        next.nonce = tx.nonce;
        next.transaction_history.push(tx.id);
        next.refresh_root()?;

        validate_transition(Some(state), &next)?;
        Ok(next)
    }
}

fn transfer(state: &mut ChannelState, tx: &Transaction) -> SluiceResult<()> {
    let from = state
        .participant_index(&tx.from)
        .ok_or_else(|| SluiceError::UnknownParticipant(tx.from.to_string()))?;
    let to = state
        .participant_index(&tx.to)
        .ok_or_else(|| SluiceError::UnknownParticipant(tx.to.to_string()))?;

    let available = &state.balances[from];
    let debited = available
        .checked_sub(&tx.amount)
        .ok_or_else(|| SluiceError::InsufficientBalance {
            required: tx.amount.clone(),
            available: available.clone(),
        })?;
    state.balances[from] = debited;
    state.balances[to] += &tx.amount;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::{ChannelId, Nonce, Signable};
    use sluice_crypto::keys::KeyPair;
    use sluice_crypto::signing::sign;

    struct Fixture {
        owner: KeyPair,
        peer: KeyPair,
        state: ChannelState,
        validator: TransitionValidator,
    }

    fn active_channel(owner_balance: u128) -> Fixture {
        let owner = KeyPair::generate();
        let peer = KeyPair::generate();
        let mut state = ChannelState::new(
            ChannelId::new(1),
            0,
            vec![owner.public_key(), peer.public_key()],
            vec![Amount::new(owner_balance), Amount::ZERO],
        )
        .unwrap();
        state.status = ChannelStatus::Active;
        state.refresh_root().unwrap();
        Fixture {
            owner,
            peer,
            state,
            validator: TransitionValidator::new(ChannelConfig::default()),
        }
    }

    fn payment(f: &Fixture, op: ChannelOp, amount: u128) -> Transaction {
        let mut tx = Transaction::new(
            f.state.id,
            op,
            f.owner.public_key(),
            f.peer.public_key(),
            Amount::new(amount),
            f.state.nonce.next().unwrap(),
            f.state.nonce.0,
            f.state.merkle_root,
        );
        if op.requires_proof() {
            let (proof, _) = f.state.balance_proof(0).unwrap();
            tx = tx.with_proof(proof);
        }
        tx.signature = Some(sign(&f.owner, &tx.signing_bytes().unwrap()));
        tx
    }

    #[test]
    fn test_payment_moves_funds_and_conserves() {
        let f = active_channel(100);
        let tx = payment(&f, ChannelOp::CreatePayment, 30);
        f.validator.validate(&f.state, &tx).unwrap();
        let next = f.validator.apply(&f.state, &tx).unwrap();

        assert_eq!(next.balances, vec![Amount::new(70), Amount::new(30)]);
        assert_eq!(next.nonce, Nonce::new(1));
        assert_eq!(next.transaction_history, vec![tx.id]);
        assert_ne!(next.merkle_root, f.state.merkle_root);
        assert_eq!(next.total(), f.state.total());
    }

    #[test]
    fn test_overdraft_rejected() {
        let f = active_channel(100);
        let tx = payment(&f, ChannelOp::SendMessage, 150);
        f.validator.validate(&f.state, &tx).unwrap();
        assert!(matches!(
            f.validator.apply(&f.state, &tx),
            Err(SluiceError::InsufficientBalance { required, available })
                if required == Amount::new(150) && available == Amount::new(100)
        ));
    }

    #[test]
    fn test_stale_nonce_and_seqno() {
        let f = active_channel(100);
        let mut tx = payment(&f, ChannelOp::SendMessage, 1);
        tx.nonce = Nonce::new(0);
        assert!(matches!(
            f.validator.validate_sequence(&f.state, &tx),
            Err(SluiceError::InvalidNonce { expected: 1, got: 0 })
        ));

        let mut tx = payment(&f, ChannelOp::SendMessage, 1);
        tx.seqno = 3;
        assert!(matches!(
            f.validator.validate_sequence(&f.state, &tx),
            Err(SluiceError::InvalidSeqno { expected: 0, got: 3 })
        ));
    }

    #[test]
    fn test_reused_or_forged_id_rejected() {
        let f = active_channel(100);
        let first = payment(&f, ChannelOp::SendMessage, 10);
        let next = f.validator.apply(&f.state, &first).unwrap();

        // fresh nonce, recycled id
        let mut reused = Transaction::new(
            next.id,
            ChannelOp::SendMessage,
            f.owner.public_key(),
            f.peer.public_key(),
            Amount::new(5),
            next.nonce.next().unwrap(),
            next.nonce.0,
            next.merkle_root,
        );
        reused.id = first.id;
        reused.signature = Some(sign(&f.owner, &reused.signing_bytes().unwrap()));
        assert!(matches!(
            f.validator.validate_structure(&next, &reused),
            Err(SluiceError::InvalidTransaction(_))
        ));

        // id consistent with its fields but already in the history
        let mut history = next.clone();
        let mut repeat = reused.clone();
        repeat.id = derive_tx_id(repeat.timestamp, repeat.nonce, repeat.channel_id);
        history.transaction_history.push(repeat.id);
        assert!(matches!(
            f.validator.validate_sequence(&history, &repeat),
            Err(SluiceError::InvalidTransaction(_))
        ));
        assert!(f.validator.validate_sequence(&next, &repeat).is_ok());
    }

    #[test]
    fn test_status_gate() {
        let f = active_channel(100);
        let tx = payment(&f, ChannelOp::InitChannel, 0);
        assert!(matches!(
            f.validator.validate_sequence(&f.state, &tx),
            Err(SluiceError::StatusMismatch { .. })
        ));
    }

    #[test]
    fn test_tampered_signature_fails_verification() {
        let f = active_channel(100);
        let mut tx = payment(&f, ChannelOp::SendMessage, 10);
        tx.amount = Amount::new(11);
        assert!(matches!(
            f.validator.validate_signature(&tx),
            Err(SluiceError::VerificationFailed(_))
        ));
    }

    #[test]
    fn test_missing_or_stale_proof() {
        let f = active_channel(100);
        let mut tx = payment(&f, ChannelOp::CreatePayment, 10);
        tx.proof = None;
        assert!(matches!(
            f.validator.validate_proof(&f.state, &tx),
            Err(SluiceError::VerificationFailed(_))
        ));

        // proof for the peer's leaf does not prove the sender's balance
        let mut tx = payment(&f, ChannelOp::CreatePayment, 10);
        tx.proof = Some(f.state.balance_proof(1).unwrap().0);
        assert!(matches!(
            f.validator.validate_proof(&f.state, &tx),
            Err(SluiceError::VerificationFailed(_))
        ));

        let mut tx = payment(&f, ChannelOp::CreatePayment, 10);
        if let Some(proof) = tx.proof.as_mut() {
            proof.directions.pop();
        }
        assert!(matches!(
            f.validator.validate_proof(&f.state, &tx),
            Err(SluiceError::MerkleStructure(_))
        ));
    }

    #[test]
    fn test_proofs_optional_when_disabled() {
        let mut f = active_channel(100);
        f.validator = TransitionValidator::new(ChannelConfig {
            require_proofs: false,
            ..ChannelConfig::default()
        });
        let mut tx = payment(&f, ChannelOp::CreatePayment, 10);
        tx.proof = None;
        assert!(f.validator.validate_proof(&f.state, &tx).is_ok());
    }

    #[test]
    fn test_close_and_dispute_statuses() {
        let f = active_channel(100);
        let close = payment(&f, ChannelOp::CloseChannel, 40);
        let closed = f.validator.apply(&f.state, &close).unwrap();
        assert_eq!(closed.status, ChannelStatus::Closed);
        assert_eq!(closed.balances, vec![Amount::new(60), Amount::new(40)]);

        let dispute = payment(&f, ChannelOp::Dispute, 0);
        f.validator.validate_structure(&f.state, &dispute).unwrap();
        let disputed = f.validator.apply(&f.state, &dispute).unwrap();
        assert_eq!(disputed.status, ChannelStatus::Disputed);
        assert_eq!(disputed.balances, f.state.balances);

        let bad = payment(&f, ChannelOp::Dispute, 5);
        assert!(f.validator.validate_structure(&f.state, &bad).is_err());
    }

    #[test]
    fn test_init_requires_locked_funds() {
        let owner = KeyPair::generate();
        let state = ChannelState::new(
            ChannelId::new(2),
            0,
            vec![owner.public_key()],
            vec![Amount::ZERO],
        )
        .unwrap();
        let validator = TransitionValidator::new(ChannelConfig::default());
        let tx = Transaction::new(
            state.id,
            ChannelOp::InitChannel,
            owner.public_key(),
            owner.public_key(),
            Amount::ZERO,
            Nonce::new(1),
            0,
            state.merkle_root,
        );
        assert!(matches!(
            validator.apply(&state, &tx),
            Err(SluiceError::InvalidState(_))
        ));
    }
}
