//! Swap lifecycle engine for a Solana token-swap client.
//!
//! A [`SwapController`] owns one trading session: it debounces intent edits,
//! keeps the quote fresh, and drives an accepted quote through build, sign,
//! submit and confirm against pluggable backend, wallet and network
//! collaborators.

pub mod aggregator;
pub mod amount;
pub mod config;
pub mod controller;
pub mod domain;
pub mod engine;
pub mod error;
pub mod logger;
pub mod market;
pub mod network;
pub mod quote;
pub mod state;
pub mod status;
pub mod timer;
pub mod wallet;

pub use aggregator::{HttpSwapBackend, SwapBackend};
pub use controller::{ControllerConfig, SwapController};
pub use domain::{Quote, Token, TradeIntent};
pub use engine::{EngineConfig, SwapReceipt};
pub use error::{EditError, QuoteError, SwapError};
pub use network::{Network, RpcNetwork};
pub use state::{Phase, SwapSnapshot};
pub use wallet::{KeypairWallet, WalletSigner};
