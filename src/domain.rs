use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;

use crate::amount;

pub const SOL_MINT: Pubkey = solana_sdk::pubkey!("So11111111111111111111111111111111111111112");
pub const USDC_MINT: Pubkey = solana_sdk::pubkey!("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v");

/// Slippage presets offered to the user, in basis points.
pub const SLIPPAGE_PRESETS_BPS: [u16; 4] = [50, 100, 200, 500];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub address: Pubkey,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
}

impl Token {
    pub fn new(address: Pubkey, symbol: &str, name: &str, decimals: u8) -> Self {
        Self {
            address,
            symbol: symbol.to_string(),
            name: name.to_string(),
            decimals,
        }
    }

    pub fn sol() -> Self {
        Self::new(SOL_MINT, "SOL", "Solana", 9)
    }

    pub fn usdc() -> Self {
        Self::new(USDC_MINT, "USDC", "USD Coin", 6)
    }

    /// Looks up one of the built-in tokens by mint.
    pub fn well_known(mint: &Pubkey) -> Option<Self> {
        if *mint == SOL_MINT {
            Some(Self::sol())
        } else if *mint == USDC_MINT {
            Some(Self::usdc())
        } else {
            None
        }
    }
}

/// What the user wants to trade. Any change to it invalidates the current quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub input: Option<Token>,
    pub output: Option<Token>,
    /// Human units, exactly as typed.
    pub amount: String,
    pub slippage_bps: u16,
    /// `None` while no wallet is connected.
    pub trader: Option<Pubkey>,
}

impl TradeIntent {
    pub fn new(input: Token, output: Token, slippage_bps: u16) -> Self {
        Self {
            input: Some(input),
            output: Some(output),
            amount: String::new(),
            slippage_bps,
            trader: None,
        }
    }

    /// Input amount in the input token's base units, if the amount parses.
    pub fn amount_base_units(&self) -> Option<u64> {
        let input = self.input.as_ref()?;
        amount::to_base_units(&self.amount, input.decimals).ok()
    }

    pub fn has_positive_amount(&self) -> bool {
        amount::parse_positive(&self.amount).is_ok()
    }
}

/// A priced route, decoded from the aggregator payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    /// Base units of the input token.
    pub in_amount: u64,
    /// Base units of the output token.
    pub out_amount: u64,
    pub price_impact_pct: f64,
    pub route_hops: usize,
    /// Address the quote was priced for.
    pub trader: Pubkey,
    /// Priced for the placeholder trader; display only, never executable.
    pub informational: bool,
    /// Passed back verbatim when building the swap.
    pub raw: serde_json::Value,
}

impl Quote {
    pub fn is_executable_by(&self, trader: &Pubkey) -> bool {
        !self.informational && self.trader == *trader
    }
}

/// A ready-to-sign transaction returned by the aggregator for an accepted quote.
#[derive(Debug, Clone)]
pub struct PreparedTransaction {
    pub transaction: VersionedTransaction,
    /// Server-assigned trade id, reported back once the swap lands.
    pub correlation_id: String,
    pub last_valid_block_height: Option<u64>,
}
