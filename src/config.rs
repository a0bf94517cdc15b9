use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::CommitmentLevel;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::time::Duration;

use crate::controller::ControllerConfig;
use crate::domain::{Token, TradeIntent, SOL_MINT, USDC_MINT};
use crate::engine::EngineConfig;
use crate::quote::DEFAULT_MIN_BASE_UNITS;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Endpoints
    pub swap_api_url: String,
    pub rpc_http_url: String,
    pub http_timeout_ms: u64,

    // Quoting
    pub debounce_ms: u64,
    pub quote_refresh_ms: u64,
    pub quote_refresh_max_ms: u64,
    pub min_quote_base_units: u64,
    pub slippage_bps: u16,
    pub max_slippage_bps: u16,

    // Execution
    pub skip_preflight: bool,
    pub max_send_retries: usize,
    pub commitment: String,
    pub confirm_timeout_secs: u64,
    pub confirm_poll_ms: u64,
    pub record_timeout_ms: u64,
    pub settle_display_ms: u64,

    // Market data
    pub balance_refresh_secs: u64,
    pub price_refresh_secs: u64,

    // Runtime
    pub dry_run: bool,
    pub log_json: bool,

    // Keys
    pub sol_keypair_path: Option<String>,

    // Intent
    pub input_mint: String,
    pub output_mint: String,
    pub amount: String,
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().map(|s| s.trim().to_lowercase()) {
        None => default,
        Some(v) if v.is_empty() => default,
        Some(v) if v == "1" || v == "true" || v == "yes" || v == "y" || v == "on" => true,
        Some(v) if v == "0" || v == "false" || v == "no" || v == "n" || v == "off" => false,
        Some(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|x| x.trim().parse().ok())
}

fn parse_commitment(s: &str) -> Option<CommitmentLevel> {
    match s.trim().to_lowercase().as_str() {
        "processed" => Some(CommitmentLevel::Processed),
        "confirmed" => Some(CommitmentLevel::Confirmed),
        "finalized" => Some(CommitmentLevel::Finalized),
        _ => None,
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Endpoints
        let swap_api_url = std::env::var("SWAP_API_URL")
            .unwrap_or_else(|_| "https://velocity-api.devsiten.workers.dev".to_string());
        let rpc_http_url = std::env::var("HELIUS_HTTP_URL")
            .or_else(|_| std::env::var("SOLANA_RPC_URL"))
            .unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".to_string());
        let http_timeout_ms = env_parse::<u64>("SWAP_HTTP_TIMEOUT_MS").unwrap_or(10_000);

        // Quoting
        let debounce_ms = env_parse::<u64>("SWAP_DEBOUNCE_MS").unwrap_or(500);
        let quote_refresh_ms = env_parse::<u64>("SWAP_QUOTE_REFRESH_MS").unwrap_or(2_000);
        let quote_refresh_max_ms = env_parse::<u64>("SWAP_QUOTE_REFRESH_MAX_MS").unwrap_or(30_000);
        let min_quote_base_units =
            env_parse::<u64>("SWAP_MIN_QUOTE_BASE_UNITS").unwrap_or(DEFAULT_MIN_BASE_UNITS);
        let slippage_bps = env_parse::<u16>("SWAP_SLIPPAGE_BPS").unwrap_or(50);
        let max_slippage_bps = env_parse::<u16>("SWAP_MAX_SLIPPAGE_BPS").unwrap_or(500);
        if slippage_bps == 0 || slippage_bps > max_slippage_bps {
            return Err(anyhow!(
                "SWAP_SLIPPAGE_BPS must be within 1..=SWAP_MAX_SLIPPAGE_BPS ({max_slippage_bps})"
            ));
        }
        if quote_refresh_ms == 0 || quote_refresh_max_ms < quote_refresh_ms {
            return Err(anyhow!("SWAP_QUOTE_REFRESH_MAX_MS cannot be below SWAP_QUOTE_REFRESH_MS"));
        }

        // Execution
        let skip_preflight = env_bool("SWAP_SKIP_PREFLIGHT", true);
        let max_send_retries = env_parse::<usize>("SWAP_MAX_SEND_RETRIES").unwrap_or(3);
        let commitment = std::env::var("SWAP_COMMITMENT").unwrap_or_else(|_| "confirmed".to_string());
        if parse_commitment(&commitment).is_none() {
            return Err(anyhow!("SWAP_COMMITMENT must be processed, confirmed or finalized"));
        }
        let confirm_timeout_secs = env_parse::<u64>("SWAP_CONFIRM_TIMEOUT_SECS").unwrap_or(60);
        let confirm_poll_ms = env_parse::<u64>("SWAP_CONFIRM_POLL_MS").unwrap_or(1_000);
        let record_timeout_ms = env_parse::<u64>("SWAP_RECORD_TIMEOUT_MS").unwrap_or(5_000);
        let settle_display_ms = env_parse::<u64>("SWAP_SETTLE_DISPLAY_MS").unwrap_or(4_000);
        if confirm_poll_ms == 0 {
            return Err(anyhow!("SWAP_CONFIRM_POLL_MS must be positive"));
        }

        // Market data
        let balance_refresh_secs = env_parse::<u64>("SWAP_BALANCE_REFRESH_SECS").unwrap_or(30);
        let price_refresh_secs = env_parse::<u64>("SWAP_PRICE_REFRESH_SECS").unwrap_or(10);

        // Runtime
        let dry_run = env_bool("DRY_RUN", true);
        let log_json = env_bool("SWAP_LOG_JSON", false);

        let sol_keypair_path = std::env::var("SOL_KEYPAIR_PATH").ok();

        // Intent
        let input_mint = std::env::var("SWAP_INPUT_MINT").unwrap_or_else(|_| USDC_MINT.to_string());
        let output_mint = std::env::var("SWAP_OUTPUT_MINT").unwrap_or_else(|_| SOL_MINT.to_string());
        let amount = std::env::var("SWAP_AMOUNT").unwrap_or_default();

        Ok(Self {
            swap_api_url,
            rpc_http_url,
            http_timeout_ms,
            debounce_ms,
            quote_refresh_ms,
            quote_refresh_max_ms,
            min_quote_base_units,
            slippage_bps,
            max_slippage_bps,
            skip_preflight,
            max_send_retries,
            commitment,
            confirm_timeout_secs,
            confirm_poll_ms,
            record_timeout_ms,
            settle_display_ms,
            balance_refresh_secs,
            price_refresh_secs,
            dry_run,
            log_json,
            sol_keypair_path,
            input_mint,
            output_mint,
            amount,
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn commitment_level(&self) -> CommitmentLevel {
        parse_commitment(&self.commitment).unwrap_or(CommitmentLevel::Confirmed)
    }

    pub fn balance_refresh(&self) -> Duration {
        Duration::from_secs(self.balance_refresh_secs)
    }

    pub fn price_refresh(&self) -> Duration {
        Duration::from_secs(self.price_refresh_secs)
    }

    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            quote_refresh: Duration::from_millis(self.quote_refresh_ms),
            quote_refresh_max: Duration::from_millis(self.quote_refresh_max_ms),
            settle_display: Duration::from_millis(self.settle_display_ms),
            min_quote_base_units: self.min_quote_base_units,
            max_slippage_bps: self.max_slippage_bps,
            engine: EngineConfig {
                skip_preflight: self.skip_preflight,
                max_send_retries: Some(self.max_send_retries),
                commitment: self.commitment_level(),
                confirm_poll_interval: Duration::from_millis(self.confirm_poll_ms),
                confirm_timeout: Duration::from_secs(self.confirm_timeout_secs),
                record_timeout: Duration::from_millis(self.record_timeout_ms),
            },
            ..ControllerConfig::default()
        }
    }

    /// The configured trade, without an amount: the amount goes through the
    /// controller so it is validated like any other edit.
    pub fn intent(&self) -> Result<TradeIntent> {
        let input = resolve_token(&self.input_mint, "SWAP_INPUT_DECIMALS")?;
        let output = resolve_token(&self.output_mint, "SWAP_OUTPUT_DECIMALS")?;
        Ok(TradeIntent::new(input, output, self.slippage_bps))
    }
}

fn resolve_token(mint: &str, decimals_key: &str) -> Result<Token> {
    let address = Pubkey::from_str(mint.trim()).with_context(|| format!("invalid mint {mint}"))?;
    if let Some(token) = Token::well_known(&address) {
        return Ok(token);
    }
    let Some(decimals) = env_parse::<u8>(decimals_key) else {
        bail!("unknown mint {address}; set {decimals_key}");
    };
    let symbol: String = address.to_string().chars().take(4).collect();
    Ok(Token::new(address, &symbol, &symbol, decimals))
}
