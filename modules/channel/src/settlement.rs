//! Settlement hand-off to the ledger client
//!
//! Runs off the transition path: a channel state is already applied when it is
//! submitted here, and a failed submission never rolls it back.

use sluice_cell::serialize_boc;
use sluice_core::{
    LedgerClient, SettlementConfig, SettlementStatus, SluiceError, SluiceResult,
    SubmissionReceipt,
};
use sluice_state::ChannelState;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::codec::{encode_state, SettlementPayload};
use crate::transaction::{Transaction, TransactionStatus};

/// Submits settlement messages with bounded, exponentially backed-off retries
pub struct Settler<L: LedgerClient> {
    ledger: Arc<L>,
    config: SettlementConfig,
}

impl<L: LedgerClient> Settler<L> {
    pub fn new(ledger: Arc<L>, config: SettlementConfig) -> Self {
        Self { ledger, config }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        let delay = self
            .config
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.config.max_backoff_ms);
        Duration::from_millis(delay)
    }

    /// Submit a bag of cells, retrying transport failures
    pub async fn submit(&self, boc: &[u8]) -> SluiceResult<SubmissionReceipt> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.ledger.submit(boc, &self.config.destination).await {
                Ok(receipt) => {
                    info!(
                        receipt = %receipt.id,
                        destination = %receipt.destination,
                        attempt,
                        "settlement submitted"
                    );
                    return Ok(receipt);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "settlement submission failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Settle one applied transaction
    pub async fn settle_transaction(&self, tx: &Transaction) -> SluiceResult<SubmissionReceipt> {
        if tx.status != TransactionStatus::Completed {
            return Err(SluiceError::InvalidTransaction(format!(
                "{} is {}, only applied transactions settle",
                tx.id, tx.status
            )));
        }
        let boc = SettlementPayload::from_transaction(tx).to_boc()?;
        self.submit(&boc).await
    }

    /// Checkpoint a whole channel state on the ledger
    pub async fn settle_state(&self, state: &ChannelState) -> SluiceResult<SubmissionReceipt> {
        let boc = serialize_boc(&encode_state(state)?);
        self.submit(&boc).await
    }

    pub async fn status(&self, receipt: &SubmissionReceipt) -> SluiceResult<SettlementStatus> {
        self.ledger.status(receipt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use sluice_cell::deserialize_boc;
    use sluice_core::{Amount, ChannelId, Hash, Nonce, PublicKey, Timestamp};

    use crate::opcode::ChannelOp;

    /// Fails the first `failures` submissions with `error`
    struct FlakyLedger {
        failures: Mutex<u32>,
        error: fn() -> SluiceError,
        submitted: Mutex<Vec<Vec<u8>>>,
    }

    impl FlakyLedger {
        fn new(failures: u32, error: fn() -> SluiceError) -> Self {
            Self {
                failures: Mutex::new(failures),
                error,
                submitted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LedgerClient for FlakyLedger {
        async fn submit(&self, boc: &[u8], destination: &str) -> SluiceResult<SubmissionReceipt> {
            {
                let mut failures = self.failures.lock();
                if *failures > 0 {
                    *failures -= 1;
                    return Err((self.error)());
                }
            }
            let mut submitted = self.submitted.lock();
            submitted.push(boc.to_vec());
            Ok(SubmissionReceipt {
                id: format!("receipt-{}", submitted.len()),
                destination: destination.to_string(),
                submitted_at: Timestamp::from_millis(0),
            })
        }

        async fn status(&self, _receipt: &SubmissionReceipt) -> SluiceResult<SettlementStatus> {
            Ok(SettlementStatus::Confirmed)
        }
    }

    fn fast_config(max_attempts: u32) -> SettlementConfig {
        SettlementConfig {
            destination: "test-contract".into(),
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        }
    }

    fn transport() -> SluiceError {
        SluiceError::LedgerError("connection reset".into())
    }

    fn malformed() -> SluiceError {
        SluiceError::MalformedCell("rejected by ledger".into())
    }

    fn applied_tx() -> Transaction {
        let mut tx = Transaction::with_timestamp(
            ChannelId::new(3),
            ChannelOp::CloseChannel,
            PublicKey::from_bytes([1; 32]),
            PublicKey::from_bytes([2; 32]),
            Amount::new(70),
            Nonce::new(7),
            6,
            Hash::ZERO,
            Timestamp::from_millis(1),
        );
        tx.status = TransactionStatus::Completed;
        tx
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let settler = Settler::new(
            Arc::new(FlakyLedger::new(0, transport)),
            SettlementConfig {
                initial_backoff_ms: 100,
                max_backoff_ms: 1_000,
                ..SettlementConfig::default()
            },
        );
        assert_eq!(settler.backoff(1), Duration::from_millis(100));
        assert_eq!(settler.backoff(2), Duration::from_millis(200));
        assert_eq!(settler.backoff(4), Duration::from_millis(800));
        assert_eq!(settler.backoff(5), Duration::from_millis(1_000));
        assert_eq!(settler.backoff(60), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn test_transport_failures_retried() {
        let ledger = Arc::new(FlakyLedger::new(2, transport));
        let settler = Settler::new(Arc::clone(&ledger), fast_config(3));

        let receipt = settler.settle_transaction(&applied_tx()).await.unwrap();
        assert_eq!(receipt.destination, "test-contract");
        assert_eq!(ledger.submitted.lock().len(), 1);
        assert_eq!(
            settler.status(&receipt).await.unwrap(),
            SettlementStatus::Confirmed
        );

        let cell = deserialize_boc(&ledger.submitted.lock()[0]).unwrap();
        let payload = SettlementPayload::from_cell(&cell).unwrap();
        assert_eq!(payload, SettlementPayload::from_transaction(&applied_tx()));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let ledger = Arc::new(FlakyLedger::new(5, transport));
        let settler = Settler::new(Arc::clone(&ledger), fast_config(3));
        let err = settler.settle_transaction(&applied_tx()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(*ledger.failures.lock(), 2);
    }

    #[tokio::test]
    async fn test_structural_rejection_not_retried() {
        let ledger = Arc::new(FlakyLedger::new(1, malformed));
        let settler = Settler::new(Arc::clone(&ledger), fast_config(5));
        assert!(matches!(
            settler.settle_transaction(&applied_tx()).await,
            Err(SluiceError::MalformedCell(_))
        ));
        assert!(ledger.submitted.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unapplied_transaction_not_settled() {
        let settler = Settler::new(Arc::new(FlakyLedger::new(0, transport)), fast_config(1));
        let mut tx = applied_tx();
        tx.status = TransactionStatus::Rejected;
        assert!(matches!(
            settler.settle_transaction(&tx).await,
            Err(SluiceError::InvalidTransaction(_))
        ));
    }

    #[tokio::test]
    async fn test_state_checkpoint() {
        let ledger = Arc::new(FlakyLedger::new(0, transport));
        let settler = Settler::new(Arc::clone(&ledger), fast_config(1));
        let state = ChannelState::new(
            ChannelId::new(4),
            0,
            vec![PublicKey::from_bytes([1; 32])],
            vec![Amount::new(10)],
        )
        .unwrap();
        settler.settle_state(&state).await.unwrap();
        let submitted = ledger.submitted.lock();
        assert_eq!(
            crate::codec::state_from_boc(&submitted[0]).unwrap(),
            state
        );
    }
}
