//! Error taxonomy for quoting, execution and intent editing.

use thiserror::Error;

use crate::amount::AmountError;
use crate::state::Phase;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuoteError {
    /// The intent cannot be quoted; resolved locally without a network call.
    #[error("intent is not quotable: {0}")]
    NotQuotable(String),
    /// No route, transport failure or aggregator error.
    #[error("quote unavailable: {0}")]
    Unavailable(String),
    #[error("malformed quote payload: {0}")]
    Malformed(String),
    /// A newer request or an intent edit made this response irrelevant.
    #[error("quote request was superseded")]
    Superseded,
}

impl From<AmountError> for QuoteError {
    fn from(err: AmountError) -> Self {
        QuoteError::NotQuotable(err.to_string())
    }
}

/// How a failure should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Neutral notice, not an error toast.
    Notice,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SwapError {
    #[error("swap not ready: {0}")]
    NotReady(String),
    #[error("Insufficient {symbol}")]
    InsufficientBalance { symbol: String },
    #[error("{0}")]
    BuildFailed(String),
    #[error("Transaction cancelled")]
    UserCancelledSignature,
    #[error("signing failed: {0}")]
    SigningFailed(String),
    #[error("submission failed: {0}")]
    SubmissionFailed(String),
    #[error("transaction failed on-chain: {0}")]
    TransactionFailed(String),
    #[error("transaction was not confirmed in time")]
    ConfirmationTimeout,
    /// Bookkeeping after an on-chain success; logged, never surfaced.
    #[error("recording failed: {0}")]
    RecordingFailed(String),
}

impl SwapError {
    pub const DEFAULT_BUILD_FAILURE: &'static str = "Swap build failed";

    pub fn build_failed(reason: Option<String>) -> Self {
        match reason {
            Some(r) if !r.trim().is_empty() => SwapError::BuildFailed(r),
            _ => SwapError::BuildFailed(Self::DEFAULT_BUILD_FAILURE.to_string()),
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, SwapError::UserCancelledSignature)
    }

    pub fn severity(&self) -> Severity {
        if self.is_cancellation() {
            Severity::Notice
        } else {
            Severity::Error
        }
    }
}

/// Intent edits are refused while a swap is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("intent is locked while the swap is {0}")]
    Locked(Phase),
    #[error("slippage of {requested} bps is outside 1..={max} bps")]
    SlippageOutOfBounds { requested: u16, max: u16 },
    #[error("invalid amount input")]
    InvalidAmount,
}
