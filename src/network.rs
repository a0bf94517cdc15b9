use async_trait::async_trait;
use solana_client::client_error::ClientError;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::commitment_config::{CommitmentConfig, CommitmentLevel};
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use solana_transaction_status::TransactionConfirmationStatus;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rpc error: {0}")]
pub struct NetworkError(pub String);

impl From<ClientError> for NetworkError {
    fn from(err: ClientError) -> Self {
        NetworkError(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// Skip local simulation before broadcasting. The aggregator has already
    /// validated the route, so this trades pre-validation for latency.
    pub skip_preflight: bool,
    pub max_retries: Option<usize>,
}

/// How far a landed transaction has progressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureState {
    Processed,
    Confirmed,
    Finalized,
    Failed(String),
}

impl SignatureState {
    pub fn reaches(&self, commitment: CommitmentLevel) -> bool {
        let rank = |c: CommitmentLevel| match c {
            CommitmentLevel::Processed => 0,
            CommitmentLevel::Confirmed => 1,
            CommitmentLevel::Finalized => 2,
        };
        let have = match self {
            SignatureState::Processed => 0,
            SignatureState::Confirmed => 1,
            SignatureState::Finalized => 2,
            SignatureState::Failed(_) => return false,
        };
        have >= rank(commitment)
    }
}

/// Transaction submission and confirmation against the cluster.
#[async_trait]
pub trait Network: Send + Sync {
    async fn send_transaction(&self, tx: &VersionedTransaction, opts: SendOptions) -> Result<Signature, NetworkError>;
    /// `None` while the cluster has not seen the signature.
    async fn signature_state(&self, signature: &Signature) -> Result<Option<SignatureState>, NetworkError>;
    async fn is_blockhash_valid(&self, blockhash: &Hash) -> Result<bool, NetworkError>;
}

pub struct RpcNetwork {
    rpc: Arc<RpcClient>,
    commitment: CommitmentConfig,
}

impl RpcNetwork {
    pub fn new(rpc: Arc<RpcClient>, commitment: CommitmentConfig) -> Self {
        Self { rpc, commitment }
    }
}

#[async_trait]
impl Network for RpcNetwork {
    async fn send_transaction(&self, tx: &VersionedTransaction, opts: SendOptions) -> Result<Signature, NetworkError> {
        let sig = self
            .rpc
            .send_transaction_with_config(
                tx,
                RpcSendTransactionConfig {
                    skip_preflight: opts.skip_preflight,
                    preflight_commitment: Some(self.commitment.commitment),
                    max_retries: opts.max_retries,
                    ..RpcSendTransactionConfig::default()
                },
            )
            .await?;
        Ok(sig)
    }

    async fn signature_state(&self, signature: &Signature) -> Result<Option<SignatureState>, NetworkError> {
        let resp = self.rpc.get_signature_statuses(&[*signature]).await?;
        let Some(Some(status)) = resp.value.into_iter().next() else {
            return Ok(None);
        };
        if let Some(err) = status.err {
            return Ok(Some(SignatureState::Failed(err.to_string())));
        }
        let state = match status.confirmation_status {
            Some(TransactionConfirmationStatus::Finalized) => SignatureState::Finalized,
            Some(TransactionConfirmationStatus::Confirmed) => SignatureState::Confirmed,
            // Older nodes omit the field; a status with no confirmations is finalized.
            None if status.confirmations.is_none() => SignatureState::Finalized,
            _ => SignatureState::Processed,
        };
        Ok(Some(state))
    }

    async fn is_blockhash_valid(&self, blockhash: &Hash) -> Result<bool, NetworkError> {
        Ok(self.rpc.is_blockhash_valid(blockhash, self.commitment).await?)
    }
}
