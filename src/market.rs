//! Balance and price collaborators.
//!
//! Both are polled on fixed intervals outside the swap lifecycle and pushed into
//! the controller, which only ever reads them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use solana_account_decoder::UiAccountData;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_request::TokenAccountsFilter;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::aggregator::SwapBackend;
use crate::controller::SwapController;
use crate::domain::SOL_MINT;
use crate::network::NetworkError;
use crate::timer;

pub const TOKEN_PROGRAM_ID: Pubkey = solana_sdk::pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");

/// Base-unit balances of the connected trader, keyed by mint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceBook {
    owner: Option<Pubkey>,
    balances: HashMap<Pubkey, u64>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl BalanceBook {
    pub fn new(owner: Pubkey, balances: HashMap<Pubkey, u64>) -> Self {
        Self {
            owner: Some(owner),
            balances,
            refreshed_at: Some(Utc::now()),
        }
    }

    pub fn owner(&self) -> Option<Pubkey> {
        self.owner
    }

    /// Unknown mints read as zero.
    pub fn get(&self, mint: &Pubkey) -> u64 {
        self.balances.get(mint).copied().unwrap_or(0)
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }
}

/// USD prices keyed by mint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceBook {
    prices: HashMap<Pubkey, f64>,
}

impl PriceBook {
    pub fn get(&self, mint: &Pubkey) -> Option<f64> {
        self.prices.get(mint).copied()
    }

    /// Newer entries win; mints missing from the update keep their last price.
    pub fn merge(&mut self, update: HashMap<Pubkey, f64>) {
        self.prices.extend(update);
    }
}

#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn balances(&self, owner: &Pubkey) -> Result<HashMap<Pubkey, u64>, NetworkError>;
}

/// Native SOL plus every SPL token account the owner holds.
pub struct RpcBalanceSource {
    rpc: Arc<RpcClient>,
}

impl RpcBalanceSource {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc }
    }
}

/// Extracts `(mint, amount)` from a jsonParsed SPL token account.
pub fn parse_token_account(parsed: &serde_json::Value) -> Option<(Pubkey, u64)> {
    let info = parsed.get("info")?;
    let mint = Pubkey::from_str(info.get("mint")?.as_str()?).ok()?;
    let amount = info.get("tokenAmount")?.get("amount")?.as_str()?.parse().ok()?;
    Some((mint, amount))
}

#[async_trait]
impl BalanceSource for RpcBalanceSource {
    async fn balances(&self, owner: &Pubkey) -> Result<HashMap<Pubkey, u64>, NetworkError> {
        let lamports = self.rpc.get_balance(owner).await?;
        let accounts = self
            .rpc
            .get_token_accounts_by_owner(owner, TokenAccountsFilter::ProgramId(TOKEN_PROGRAM_ID))
            .await?;

        let mut out = HashMap::with_capacity(accounts.len() + 1);
        out.insert(SOL_MINT, lamports);
        for keyed in accounts {
            let UiAccountData::Json(parsed) = &keyed.account.data else {
                debug!(account = %keyed.pubkey, "market.token_account_not_parsed");
                continue;
            };
            match parse_token_account(&parsed.parsed) {
                Some((mint, amount)) if amount > 0 => *out.entry(mint).or_insert(0) += amount,
                Some(_) => {}
                None => debug!(account = %keyed.pubkey, "market.token_account_unrecognized"),
            }
        }
        Ok(out)
    }
}

/// Refreshes the controller's balances now and then every `interval`.
pub fn spawn_balance_refresh(
    controller: SwapController,
    source: Arc<dyn BalanceSource>,
    interval: Duration,
) -> JoinHandle<()> {
    timer::spawn_repeating(Duration::ZERO, move || {
        let controller = controller.clone();
        let source = source.clone();
        async move {
            match controller.wallet_pubkey() {
                None => {
                    controller.update_balances(BalanceBook::default());
                }
                Some(owner) => match source.balances(&owner).await {
                    Ok(balances) => {
                        let tokens = balances.len();
                        if controller.update_balances(BalanceBook::new(owner, balances)) {
                            debug!(%owner, tokens, "market.balances_refreshed");
                        }
                    }
                    Err(e) => warn!(%owner, error = %e, "market.balances_failed"),
                },
            }
            Some(interval)
        }
    })
}

/// Refreshes USD prices for `mints` now and then every `interval`.
pub fn spawn_price_refresh(
    controller: SwapController,
    backend: Arc<dyn SwapBackend>,
    mints: Vec<Pubkey>,
    interval: Duration,
) -> JoinHandle<()> {
    timer::spawn_repeating(Duration::ZERO, move || {
        let controller = controller.clone();
        let backend = backend.clone();
        let mints = mints.clone();
        async move {
            match backend.prices(&mints).await {
                Ok(prices) => controller.update_prices(prices),
                Err(e) => warn!(error = %e, "market.prices_failed"),
            }
            Some(interval)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_json_token_account() {
        let mint = crate::domain::USDC_MINT;
        let parsed = json!({
            "info": {
                "mint": mint.to_string(),
                "owner": Pubkey::new_unique().to_string(),
                "tokenAmount": {"amount": "2500000", "decimals": 6, "uiAmount": 2.5}
            },
            "type": "account"
        });
        assert_eq!(parse_token_account(&parsed), Some((mint, 2_500_000)));
        assert_eq!(parse_token_account(&json!({"info": {"mint": "bad"}})), None);
    }

    #[test]
    fn unknown_mints_have_zero_balance() {
        let owner = Pubkey::new_unique();
        let book = BalanceBook::new(owner, HashMap::from([(SOL_MINT, 5)]));
        assert_eq!(book.get(&SOL_MINT), 5);
        assert_eq!(book.get(&Pubkey::new_unique()), 0);
        assert_eq!(book.owner(), Some(owner));
        assert_eq!(BalanceBook::default().get(&SOL_MINT), 0);
    }

    #[test]
    fn price_merge_keeps_missing_entries() {
        let mut book = PriceBook::default();
        book.merge(HashMap::from([(SOL_MINT, 140.0)]));
        book.merge(HashMap::from([(crate::domain::USDC_MINT, 1.0)]));
        assert_eq!(book.get(&SOL_MINT), Some(140.0));
        assert_eq!(book.get(&crate::domain::USDC_MINT), Some(1.0));
    }
}
