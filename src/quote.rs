use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::aggregator::{BackendError, QuoteRequest, SwapBackend};
use crate::amount;
use crate::domain::{Quote, TradeIntent};
use crate::error::QuoteError;

/// Smallest input the aggregator will route, in base units.
pub const DEFAULT_MIN_BASE_UNITS: u64 = 1_000;

/// A quote request that passed the local checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotePlan {
    pub request: QuoteRequest,
    pub trader: Pubkey,
    /// Priced for the placeholder trader because no wallet is connected.
    pub informational: bool,
}

/// Turns a trade intent into a priced quote.
pub struct QuoteFetcher {
    backend: Arc<dyn SwapBackend>,
    min_base_units: u64,
    placeholder_trader: Pubkey,
}

impl QuoteFetcher {
    pub fn new(backend: Arc<dyn SwapBackend>, min_base_units: u64, placeholder_trader: Pubkey) -> Self {
        Self {
            backend,
            min_base_units,
            placeholder_trader,
        }
    }

    /// Local preconditions only; never touches the network.
    pub fn plan(&self, intent: &TradeIntent) -> Result<QuotePlan, QuoteError> {
        let (Some(input), Some(output)) = (&intent.input, &intent.output) else {
            return Err(QuoteError::NotQuotable("select both tokens".into()));
        };
        if input.address == output.address {
            return Err(QuoteError::NotQuotable("input and output token are the same".into()));
        }
        let units = amount::to_base_units(&intent.amount, input.decimals)?;
        if units < self.min_base_units {
            return Err(QuoteError::NotQuotable(format!(
                "{units} base units is below the {} minimum",
                self.min_base_units
            )));
        }
        let (trader, informational) = match intent.trader {
            Some(trader) => (trader, false),
            None => (self.placeholder_trader, true),
        };
        Ok(QuotePlan {
            request: QuoteRequest {
                input_mint: input.address.to_string(),
                output_mint: output.address.to_string(),
                amount: units.to_string(),
                slippage_bps: intent.slippage_bps,
                user_public_key: trader.to_string(),
            },
            trader,
            informational,
        })
    }

    pub async fn fetch(&self, intent: &TradeIntent) -> Result<Quote, QuoteError> {
        let plan = self.plan(intent)?;
        self.fetch_planned(plan).await
    }

    pub async fn fetch_planned(&self, plan: QuotePlan) -> Result<Quote, QuoteError> {
        let resp = self.backend.quote(&plan.request).await.map_err(|e| match e {
            BackendError::Malformed(msg) => {
                warn!(error = %msg, "quote.malformed_payload");
                QuoteError::Malformed(msg)
            }
            other => QuoteError::Unavailable(other.to_string()),
        })?;

        if resp.out_amount == 0 {
            return Err(QuoteError::Unavailable("no route found".into()));
        }
        if resp.in_amount.to_string() != plan.request.amount {
            debug!(
                requested = %plan.request.amount,
                quoted = resp.in_amount,
                "quote.in_amount_differs"
            );
        }

        Ok(Quote {
            in_amount: resp.in_amount,
            out_amount: resp.out_amount,
            price_impact_pct: resp.price_impact_pct,
            route_hops: resp.route_hops,
            trader: plan.trader,
            informational: plan.informational,
            raw: resp.raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{ConfirmRequest, ConfirmResponse, QuoteResponse, SwapRequest, SwapResponse};
    use crate::domain::Token;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct RecordingBackend {
        requests: Mutex<Vec<QuoteRequest>>,
        fail: Option<BackendError>,
    }

    #[async_trait]
    impl SwapBackend for RecordingBackend {
        async fn quote(&self, req: &QuoteRequest) -> Result<QuoteResponse, BackendError> {
            self.requests.lock().push(req.clone());
            if let Some(err) = &self.fail {
                return Err(err.clone());
            }
            Ok(QuoteResponse {
                in_amount: req.amount.parse().unwrap(),
                out_amount: 42,
                price_impact_pct: 0.1,
                route_hops: 1,
                raw: serde_json::json!({"inAmount": req.amount}),
            })
        }
        async fn build_swap(&self, _: &SwapRequest) -> Result<SwapResponse, BackendError> {
            unreachable!()
        }
        async fn confirm_trade(&self, _: &ConfirmRequest) -> Result<ConfirmResponse, BackendError> {
            unreachable!()
        }
        async fn prices(&self, _: &[Pubkey]) -> Result<HashMap<Pubkey, f64>, BackendError> {
            unreachable!()
        }
    }

    fn fetcher(backend: Arc<RecordingBackend>) -> QuoteFetcher {
        QuoteFetcher::new(backend, DEFAULT_MIN_BASE_UNITS, Pubkey::default())
    }

    fn intent(amount: &str) -> TradeIntent {
        let mut intent = TradeIntent::new(Token::usdc(), Token::sol(), 50);
        intent.amount = amount.into();
        intent
    }

    #[tokio::test]
    async fn unquotable_intents_never_reach_the_backend() {
        let backend = Arc::new(RecordingBackend::default());
        let f = fetcher(backend.clone());

        for amount in ["", "0", "-3", "abc", "0.0009"] {
            let err = f.fetch(&intent(amount)).await.unwrap_err();
            assert!(matches!(err, QuoteError::NotQuotable(_)), "{amount}: {err:?}");
        }

        let mut missing = intent("10");
        missing.output = None;
        assert!(matches!(f.fetch(&missing).await, Err(QuoteError::NotQuotable(_))));

        let mut same = intent("10");
        same.output = Some(Token::usdc());
        assert!(matches!(f.fetch(&same).await, Err(QuoteError::NotQuotable(_))));

        assert!(backend.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn converts_amount_and_marks_placeholder_quotes_informational() {
        let backend = Arc::new(RecordingBackend::default());
        let f = fetcher(backend.clone());

        let quote = f.fetch(&intent("10")).await.unwrap();
        assert!(quote.informational);
        assert_eq!(quote.in_amount, 10_000_000);

        let trader = Pubkey::new_unique();
        let mut owned = intent("2.5");
        owned.trader = Some(trader);
        let quote = f.fetch(&owned).await.unwrap();
        assert!(!quote.informational);
        assert_eq!(quote.trader, trader);

        let reqs = backend.requests.lock();
        assert_eq!(reqs[1].amount, "2500000");
        assert_eq!(reqs[1].user_public_key, trader.to_string());
        assert_eq!(reqs[1].slippage_bps, 50);
    }

    #[tokio::test]
    async fn backend_failures_map_to_unavailable_or_malformed() {
        let backend = Arc::new(RecordingBackend {
            fail: Some(BackendError::Rejected("No route".into())),
            ..Default::default()
        });
        assert!(matches!(
            fetcher(backend).fetch(&intent("10")).await,
            Err(QuoteError::Unavailable(_))
        ));

        let backend = Arc::new(RecordingBackend {
            fail: Some(BackendError::Malformed("bad".into())),
            ..Default::default()
        });
        assert!(matches!(
            fetcher(backend).fetch(&intent("10")).await,
            Err(QuoteError::Malformed(_))
        ));
    }
}
