//! Model of the on-ledger channel contract
//!
//! Mirrors the checks the settlement contract runs on each payload, so the
//! off-chain rules can be tested against them directly.

use sluice_cell::Cell;
use sluice_core::{Amount, PublicKey, SluiceError, SluiceResult, TxId};
use sluice_state::ChannelState;

use crate::codec::SettlementPayload;
use crate::opcode::ChannelOp;

/// Message the contract emits when a payload is accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub op_code: ChannelOp,
    pub destination: PublicKey,
    pub amount: Amount,
    pub transaction_id: TxId,
}

/// Stored contract data: last accepted sequence number and remaining balance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelContract {
    pub seqno: u64,
    pub balance: Amount,
    pub closed: bool,
}

impl ChannelContract {
    pub fn new(seqno: u64, balance: Amount) -> Self {
        Self {
            seqno,
            balance,
            closed: false,
        }
    }

    /// Contract data matching `participant`'s side of a stored channel
    pub fn for_participant(state: &ChannelState, participant: &PublicKey) -> SluiceResult<Self> {
        let balance = state.balance_of(participant).ok_or_else(|| {
            SluiceError::UnknownParticipant(format!("{} is not in {}", participant, state.id))
        })?;
        Ok(Self::new(state.nonce.0, balance))
    }

    fn check(&self, payload: &SettlementPayload) -> SluiceResult<()> {
        if self.closed {
            return Err(SluiceError::StatusMismatch {
                expected: "open".into(),
                actual: "closed".into(),
            });
        }
        let expected = self.seqno.checked_add(1).ok_or_else(|| {
            SluiceError::InvalidState("contract seqno exhausted".into())
        })?;
        if payload.nonce.0 != expected {
            return Err(SluiceError::InvalidSeqno {
                expected,
                got: payload.nonce.0,
            });
        }
        if self.balance < payload.amount {
            return Err(SluiceError::InsufficientBalance {
                required: payload.amount.clone(),
                available: self.balance.clone(),
            });
        }
        Ok(())
    }

    fn accept(&mut self, payload: SettlementPayload) -> SluiceResult<OutboundMessage> {
        self.check(&payload)?;
        self.balance = self
            .balance
            .checked_sub(&payload.amount)
            .ok_or_else(|| SluiceError::InsufficientBalance {
                required: payload.amount.clone(),
                available: self.balance.clone(),
            })?;
        self.seqno = payload.nonce.0;
        Ok(OutboundMessage {
            op_code: payload.op_code,
            destination: payload.recipient,
            amount: payload.amount,
            transaction_id: payload.id,
        })
    }

    /// Settle a payment payload
    pub fn create_child_contract(&mut self, payload: &Cell) -> SluiceResult<OutboundMessage> {
        let payload = SettlementPayload::from_cell(payload)?;
        if !matches!(
            payload.op_code,
            ChannelOp::CreatePayment | ChannelOp::SendMessage
        ) {
            return Err(SluiceError::InvalidTransaction(format!(
                "{} is not a payment",
                payload.op_code
            )));
        }
        self.accept(payload)
    }

    /// Settle the final redistribution; no payload is accepted afterwards
    pub fn close_channel(&mut self, payload: &Cell) -> SluiceResult<OutboundMessage> {
        let payload = SettlementPayload::from_cell(payload)?;
        if !matches!(
            payload.op_code,
            ChannelOp::CloseChannel | ChannelOp::FinalizeClose
        ) {
            return Err(SluiceError::InvalidTransaction(format!(
                "{} does not close a channel",
                payload.op_code
            )));
        }
        let message = self.accept(payload)?;
        self.closed = true;
        Ok(message)
    }
}
