use solana_sdk::commitment_config::CommitmentLevel;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::aggregator::{BackendError, ConfirmRequest, SwapBackend, SwapRequest};
use crate::domain::{PreparedTransaction, Quote, TradeIntent};
use crate::error::SwapError;
use crate::network::{Network, SendOptions, SignatureState};
use crate::state::Phase;
use crate::wallet::{WalletError, WalletSigner};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub skip_preflight: bool,
    pub max_send_retries: Option<usize>,
    pub commitment: CommitmentLevel,
    pub confirm_poll_interval: Duration,
    /// Client-side ceiling on the confirmation wait.
    pub confirm_timeout: Duration,
    pub record_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            skip_preflight: true,
            max_send_retries: Some(3),
            commitment: CommitmentLevel::Confirmed,
            confirm_poll_interval: Duration::from_secs(1),
            confirm_timeout: Duration::from_secs(60),
            record_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapReceipt {
    pub signature: Signature,
    pub correlation_id: String,
    /// Reward points reported by the backend, when the bookkeeping call succeeded.
    pub points_earned: Option<u64>,
}

/// Drives one accepted quote through build, sign, submit, confirm and record.
pub struct Engine {
    backend: Arc<dyn SwapBackend>,
    network: Arc<dyn Network>,
    cfg: EngineConfig,
}

impl Engine {
    pub fn new(backend: Arc<dyn SwapBackend>, network: Arc<dyn Network>, cfg: EngineConfig) -> Self {
        Self { backend, network, cfg }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Build -> sign -> send (no preflight by default) -> confirm -> record.
    ///
    /// `progress` is told about every phase after `building`. The swap cannot be
    /// cancelled once it has been sent.
    pub async fn execute(
        &self,
        quote: &Quote,
        intent: &TradeIntent,
        wallet: &dyn WalletSigner,
        progress: &(dyn Fn(Phase) + Send + Sync),
    ) -> Result<SwapReceipt, SwapError> {
        let trader = wallet.pubkey();
        if !quote.is_executable_by(&trader) {
            return Err(SwapError::NotReady(
                "quote was not priced for the connected wallet".into(),
            ));
        }

        info!(
            input = intent.input.as_ref().map(|t| t.symbol.as_str()).unwrap_or(""),
            output = intent.output.as_ref().map(|t| t.symbol.as_str()).unwrap_or(""),
            in_amount = quote.in_amount,
            out_amount = quote.out_amount,
            slippage_bps = intent.slippage_bps,
            skip_preflight = self.cfg.skip_preflight,
            "engine.execute_swap"
        );

        // 1) Build
        let prepared = self.build(quote, &trader).await?;

        // 2) Sign
        progress(Phase::AwaitingSignature);
        let blockhash = *prepared.transaction.message.recent_blockhash();
        let signed = wallet
            .sign_transaction(prepared.transaction)
            .await
            .map_err(|e| match e {
                WalletError::Rejected => SwapError::UserCancelledSignature,
                WalletError::Signing(msg) => SwapError::SigningFailed(msg),
            })?;

        // 3) Send
        progress(Phase::Submitting);
        let signature = self
            .network
            .send_transaction(
                &signed,
                SendOptions {
                    skip_preflight: self.cfg.skip_preflight,
                    max_retries: self.cfg.max_send_retries,
                },
            )
            .await
            .map_err(|e| SwapError::SubmissionFailed(e.0))?;
        info!(%signature, trade_id = %prepared.correlation_id, "engine.sent");

        // 4) Confirm
        progress(Phase::Confirming);
        self.confirm(&signature, &blockhash).await?;
        info!(%signature, "engine.confirmed");

        // 5) Record (best-effort)
        let points_earned = self.record(&prepared.correlation_id, &signature).await;

        Ok(SwapReceipt {
            signature,
            correlation_id: prepared.correlation_id,
            points_earned,
        })
    }

    async fn build(&self, quote: &Quote, trader: &Pubkey) -> Result<PreparedTransaction, SwapError> {
        let resp = self
            .backend
            .build_swap(&SwapRequest {
                quote_response: quote.raw.clone(),
                user_public_key: trader.to_string(),
            })
            .await
            .map_err(|e| {
                warn!(error = %e, "engine.build_failed");
                match e {
                    BackendError::Rejected(reason) => SwapError::build_failed(Some(reason)),
                    _ => SwapError::build_failed(None),
                }
            })?;

        resp.into_prepared().map_err(|e| {
            warn!(error = %e, "engine.build_undecodable");
            SwapError::build_failed(None)
        })
    }

    async fn confirm(&self, signature: &Signature, blockhash: &Hash) -> Result<(), SwapError> {
        let wait = async {
            loop {
                match self.network.signature_state(signature).await {
                    Ok(Some(SignatureState::Failed(err))) => {
                        return Err(SwapError::TransactionFailed(err))
                    }
                    Ok(Some(state)) if state.reaches(self.cfg.commitment) => return Ok(()),
                    Ok(Some(_)) => {}
                    Ok(None) => match self.network.is_blockhash_valid(blockhash).await {
                        Ok(true) => {}
                        Ok(false) => return self.final_check(signature).await,
                        Err(e) => warn!(error = %e, "engine.blockhash_check_failed"),
                    },
                    Err(e) => warn!(error = %e, "engine.status_poll_failed"),
                }
                tokio::time::sleep(self.cfg.confirm_poll_interval).await;
            }
        };

        match tokio::time::timeout(self.cfg.confirm_timeout, wait).await {
            Ok(res) => res,
            Err(_) => {
                warn!(%signature, timeout = ?self.cfg.confirm_timeout, "engine.confirm_timeout");
                Err(SwapError::ConfirmationTimeout)
            }
        }
    }

    /// The blockhash expired; the transaction may still have landed just before.
    async fn final_check(&self, signature: &Signature) -> Result<(), SwapError> {
        match self.network.signature_state(signature).await {
            Ok(Some(SignatureState::Failed(err))) => Err(SwapError::TransactionFailed(err)),
            Ok(Some(state)) if state.reaches(self.cfg.commitment) => Ok(()),
            _ => {
                warn!(%signature, "engine.blockhash_expired");
                Err(SwapError::ConfirmationTimeout)
            }
        }
    }

    async fn record(&self, correlation_id: &str, signature: &Signature) -> Option<u64> {
        let req = ConfirmRequest {
            trade_id: correlation_id.to_string(),
            tx_signature: signature.to_string(),
        };
        let err = match tokio::time::timeout(self.cfg.record_timeout, self.backend.confirm_trade(&req)).await {
            Ok(Ok(resp)) => {
                info!(
                    trade_id = correlation_id,
                    confirmed = resp.confirmed,
                    points = ?resp.points_earned,
                    "engine.recorded"
                );
                return resp.points_earned;
            }
            Ok(Err(e)) => SwapError::RecordingFailed(e.to_string()),
            Err(_) => SwapError::RecordingFailed("timed out".into()),
        };
        warn!(trade_id = correlation_id, error = %err, "engine.record_failed");
        None
    }
}
