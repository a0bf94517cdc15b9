//! What the UI shows: the swap button, the status line and the quote details.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::RoundingStrategy;
use solana_sdk::pubkey::Pubkey;

use crate::amount;
use crate::domain::{Quote, TradeIntent};
use crate::market::PriceBook;
use crate::state::{Phase, SwapSnapshot};

/// Fractional digits used when showing a quoted output amount.
pub const DISPLAY_PRECISION: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    ConnectWallet,
    Swap,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapAction {
    pub kind: ActionKind,
    pub label: String,
}

impl SwapAction {
    fn new(kind: ActionKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
        }
    }

    fn disabled(label: impl Into<String>) -> Self {
        Self::new(ActionKind::Disabled, label)
    }

    pub fn enabled(&self) -> bool {
        self.kind != ActionKind::Disabled
    }
}

/// The swap button for the current snapshot. `balance_of` reads the trader's
/// base-unit balance for a mint.
pub fn swap_action(
    snapshot: &SwapSnapshot,
    wallet_connected: bool,
    balance_of: impl Fn(&Pubkey) -> u64,
) -> SwapAction {
    if !wallet_connected {
        return SwapAction::new(ActionKind::ConnectWallet, "Connect Wallet");
    }
    let intent = &snapshot.intent;
    let Some(input) = intent.input.as_ref().filter(|_| intent.has_positive_amount()) else {
        return SwapAction::disabled("Enter amount");
    };
    if intent.output.is_none() {
        return SwapAction::disabled("Select output token");
    }
    if snapshot.phase.is_executing() {
        return SwapAction::disabled("Swapping...");
    }
    if snapshot.quote_loading || matches!(snapshot.phase, Phase::Debouncing | Phase::Quoting) {
        return SwapAction::disabled("Fetching quote...");
    }
    if snapshot.quote.is_none() || snapshot.phase != Phase::Quoted {
        return SwapAction::disabled("No route found");
    }
    let needed = intent.amount_base_units().unwrap_or(u64::MAX);
    if needed > balance_of(&input.address) {
        return SwapAction::disabled(format!("Insufficient {}", input.symbol));
    }
    SwapAction::new(ActionKind::Swap, "Swap")
}

/// One-line progress text for the current phase.
pub fn status_text(snapshot: &SwapSnapshot) -> Option<String> {
    let text = match snapshot.phase {
        Phase::Building => "Building transaction...".to_string(),
        Phase::AwaitingSignature => "Please sign the transaction...".to_string(),
        Phase::Submitting => "Sending transaction...".to_string(),
        Phase::Confirming => "Confirming...".to_string(),
        Phase::Settled => match snapshot.points_earned {
            Some(points) => format!("Swap successful! +{points} points"),
            None => "Swap successful!".to_string(),
        },
        Phase::Failed => snapshot
            .error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "Swap failed".to_string()),
        _ => return None,
    };
    Some(text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpactSeverity {
    Low,
    Moderate,
    High,
}

impl ImpactSeverity {
    pub fn from_pct(pct: f64) -> Self {
        if pct < 1.0 {
            ImpactSeverity::Low
        } else if pct < 3.0 {
            ImpactSeverity::Moderate
        } else {
            ImpactSeverity::High
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuoteDetails {
    pub output_amount: String,
    /// "1 USDC = 0.007100 SOL"
    pub rate: String,
    pub price_impact_pct: f64,
    pub impact: ImpactSeverity,
    pub min_received: String,
    pub slippage_pct: String,
    pub route_hops: usize,
    pub input_usd: Option<String>,
    pub output_usd: Option<String>,
}

impl QuoteDetails {
    pub fn build(quote: &Quote, intent: &TradeIntent, prices: &PriceBook) -> Option<Self> {
        let input = intent.input.as_ref()?;
        let output = intent.output.as_ref()?;
        let rate = amount::exchange_rate(quote.in_amount, quote.out_amount, input.decimals, output.decimals)?;
        let mut rate = rate.round_dp_with_strategy(DISPLAY_PRECISION, RoundingStrategy::ToZero);
        rate.rescale(DISPLAY_PRECISION);
        let rate = format!("1 {} = {} {}", input.symbol, rate, output.symbol);
        let usd = |units: u64, decimals: u8, mint: &Pubkey| {
            let price = prices.get(mint)?;
            let value = amount::from_base_units(units, decimals).to_f64()? * price;
            Some(format!("${value:.2}"))
        };
        Some(Self {
            output_amount: amount::display_amount(quote.out_amount, output.decimals, DISPLAY_PRECISION),
            rate,
            price_impact_pct: quote.price_impact_pct,
            impact: ImpactSeverity::from_pct(quote.price_impact_pct),
            min_received: format!(
                "{} {}",
                amount::format_compact(amount::min_received(quote.out_amount, intent.slippage_bps), output.decimals),
                output.symbol
            ),
            slippage_pct: format!("{}%", f64::from(intent.slippage_bps) / 100.0),
            route_hops: quote.route_hops,
            input_usd: usd(quote.in_amount, input.decimals, &input.address),
            output_usd: usd(quote.out_amount, output.decimals, &output.address),
        })
    }
}
