use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::PreparedTransaction;
use crate::error::EditError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(String),
    /// The backend answered with `success: false`; carries its reason.
    #[error("{0}")]
    Rejected(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Transport(err.to_string())
    }
}

/// The remote quote/swap service. Treated as a black box.
#[async_trait]
pub trait SwapBackend: Send + Sync {
    async fn quote(&self, req: &QuoteRequest) -> Result<QuoteResponse, BackendError>;
    async fn build_swap(&self, req: &SwapRequest) -> Result<SwapResponse, BackendError>;
    async fn confirm_trade(&self, req: &ConfirmRequest) -> Result<ConfirmResponse, BackendError>;
    /// USD prices keyed by mint. Entries the backend sends in an unknown shape are dropped.
    async fn prices(&self, mints: &[Pubkey]) -> Result<HashMap<Pubkey, f64>, BackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRequest {
    #[serde(rename = "inputMint")]
    pub input_mint: String,
    #[serde(rename = "outputMint")]
    pub output_mint: String,
    /// Amount in the input mint's base units (e.g. USDC has 6 decimals)
    pub amount: String,
    #[serde(rename = "slippageBps")]
    pub slippage_bps: u16,
    #[serde(rename = "userPublicKey")]
    pub user_public_key: String,
}

/// Canonical quote, decoded once from whatever the aggregator sent.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteResponse {
    pub in_amount: u64,
    pub out_amount: u64,
    pub price_impact_pct: f64,
    pub route_hops: usize,
    pub raw: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BaseUnitsField {
    Text(String),
    Number(u64),
}

impl BaseUnitsField {
    fn into_u64(self, field: &str) -> Result<u64, BackendError> {
        match self {
            BaseUnitsField::Number(n) => Ok(n),
            BaseUnitsField::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| BackendError::Malformed(format!("{field} is not a base-unit integer: {s:?}"))),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PercentField {
    Number(f64),
    Text(String),
}

impl PercentField {
    fn into_f64(self) -> Result<f64, BackendError> {
        let v = match self {
            PercentField::Number(n) => n,
            PercentField::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| BackendError::Malformed(format!("priceImpactPct is not numeric: {s:?}")))?,
        };
        if !v.is_finite() {
            return Err(BackendError::Malformed("priceImpactPct is not finite".into()));
        }
        Ok(v)
    }
}

#[derive(Debug, Deserialize)]
struct QuotePayload {
    #[serde(rename = "inAmount")]
    in_amount: BaseUnitsField,
    #[serde(rename = "outAmount")]
    out_amount: BaseUnitsField,
    #[serde(rename = "priceImpactPct", default)]
    price_impact_pct: Option<PercentField>,
    #[serde(rename = "routePlan", default)]
    route_plan: Vec<serde_json::Value>,
}

impl QuoteResponse {
    pub fn from_payload(raw: serde_json::Value) -> Result<Self, BackendError> {
        let payload: QuotePayload = serde_json::from_value(raw.clone())
            .map_err(|e| BackendError::Malformed(e.to_string()))?;
        Ok(Self {
            in_amount: payload.in_amount.into_u64("inAmount")?,
            out_amount: payload.out_amount.into_u64("outAmount")?,
            price_impact_pct: payload
                .price_impact_pct
                .map(PercentField::into_f64)
                .transpose()?
                .unwrap_or(0.0),
            route_hops: payload.route_plan.len().max(1),
            raw,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapRequest {
    /// The quote payload exactly as the aggregator returned it.
    #[serde(rename = "quoteResponse")]
    pub quote_response: serde_json::Value,

    #[serde(rename = "userPublicKey")]
    pub user_public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapResponse {
    /// base64 encoded VersionedTransaction
    #[serde(rename = "swapTransaction")]
    pub swap_transaction: String,

    #[serde(rename = "tradeId")]
    pub trade_id: String,

    #[serde(rename = "lastValidBlockHeight", default)]
    pub last_valid_block_height: Option<u64>,
}

impl SwapResponse {
    pub fn into_prepared(self) -> Result<PreparedTransaction, BackendError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(self.swap_transaction.trim())
            .map_err(|e| BackendError::Malformed(format!("swapTransaction is not base64: {e}")))?;
        let transaction: VersionedTransaction = bincode::deserialize(&bytes)
            .map_err(|e| BackendError::Malformed(format!("swapTransaction does not decode: {e}")))?;
        Ok(PreparedTransaction {
            transaction,
            correlation_id: self.trade_id,
            last_valid_block_height: self.last_valid_block_height,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmRequest {
    #[serde(rename = "tradeId")]
    pub trade_id: String,
    #[serde(rename = "txSignature")]
    pub tx_signature: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfirmResponse {
    #[serde(default)]
    pub confirmed: bool,
    #[serde(rename = "pointsEarned", default)]
    pub points_earned: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PriceField {
    Number(f64),
    Quoted { usd: Option<f64>, sol: Option<f64> },
}

impl PriceField {
    fn usd(&self) -> Option<f64> {
        let v = match self {
            PriceField::Number(n) => Some(*n),
            PriceField::Quoted { usd, sol } => usd.or(*sol),
        };
        v.filter(|p| p.is_finite() && *p >= 0.0)
    }
}

#[derive(Debug, Deserialize)]
struct PricesPayload {
    prices: HashMap<String, serde_json::Value>,
}

pub(crate) fn decode_prices(payload: serde_json::Value) -> Result<HashMap<Pubkey, f64>, BackendError> {
    let payload: PricesPayload =
        serde_json::from_value(payload).map_err(|e| BackendError::Malformed(e.to_string()))?;
    let mut out = HashMap::with_capacity(payload.prices.len());
    for (mint, value) in payload.prices {
        let Ok(key) = Pubkey::from_str(&mint) else {
            warn!(%mint, "aggregator.price_bad_mint");
            continue;
        };
        match serde_json::from_value::<PriceField>(value).ok().and_then(|p| p.usd()) {
            Some(price) => {
                out.insert(key, price);
            }
            None => warn!(%mint, "aggregator.price_unrecognized_shape"),
        }
    }
    Ok(out)
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct PricesRequest {
    mints: Vec<String>,
}

/// HTTP client for the trade API. Every response is wrapped in `{ success, data, error }`.
#[derive(Clone)]
pub struct HttpSwapBackend {
    base_url: String,
    http: Client,
}

impl HttpSwapBackend {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, BackendError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        trader: Option<&str>,
    ) -> Result<serde_json::Value, BackendError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "aggregator.request");
        let mut req = self.http.post(url).json(body);
        if let Some(key) = trader {
            req = req.header("X-Public-Key", key);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let envelope: Envelope = match resp.json().await {
            Ok(env) => env,
            Err(_) if !status.is_success() => {
                return Err(BackendError::Transport(format!("http status {status}")))
            }
            Err(e) => return Err(BackendError::Malformed(e.to_string())),
        };
        if !envelope.success {
            return Err(BackendError::Rejected(
                envelope.error.unwrap_or_else(|| "Request failed".to_string()),
            ));
        }
        envelope
            .data
            .ok_or_else(|| BackendError::Malformed("missing data".into()))
    }

    fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, BackendError> {
        serde_json::from_value(value).map_err(|e| BackendError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl SwapBackend for HttpSwapBackend {
    async fn quote(&self, req: &QuoteRequest) -> Result<QuoteResponse, BackendError> {
        let data = self
            .post("/api/v1/trade/quote", req, Some(req.user_public_key.as_str()))
            .await?;
        QuoteResponse::from_payload(data)
    }

    async fn build_swap(&self, req: &SwapRequest) -> Result<SwapResponse, BackendError> {
        let data = self
            .post("/api/v1/trade/swap", req, Some(req.user_public_key.as_str()))
            .await?;
        Self::decode(data)
    }

    async fn confirm_trade(&self, req: &ConfirmRequest) -> Result<ConfirmResponse, BackendError> {
        let data = self.post("/api/v1/trade/confirm", req, None).await?;
        Self::decode(data)
    }

    async fn prices(&self, mints: &[Pubkey]) -> Result<HashMap<Pubkey, f64>, BackendError> {
        let body = PricesRequest {
            mints: mints.iter().map(ToString::to_string).collect(),
        };
        let data = self.post("/api/v1/trade/prices", &body, None).await?;
        decode_prices(data)
    }
}

pub fn ensure_slippage_bounds(slippage_bps: u16, max_slippage_bps: u16) -> Result<(), EditError> {
    if slippage_bps == 0 || slippage_bps > max_slippage_bps {
        return Err(EditError::SlippageOutOfBounds {
            requested: slippage_bps,
            max: max_slippage_bps,
        });
    }
    Ok(())
}
