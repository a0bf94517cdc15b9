#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine as _;
use parking_lot::Mutex;
use serde_json::json;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::message::{Message, VersionedMessage};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::VersionedTransaction;
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use velocity_swap::aggregator::{
    BackendError, ConfirmRequest, ConfirmResponse, QuoteRequest, QuoteResponse, SwapBackend,
    SwapRequest, SwapResponse,
};
use velocity_swap::domain::{Token, TradeIntent, USDC_MINT};
use velocity_swap::market::BalanceBook;
use velocity_swap::network::{Network, NetworkError, SendOptions, SignatureState};
use velocity_swap::wallet::{WalletError, WalletSigner};
use velocity_swap::{ControllerConfig, SwapController};

/// Output base units quoted per input base unit.
pub const RATE: u64 = 7;

pub fn unsigned_for(payer: &Pubkey) -> VersionedTransaction {
    let ix = Instruction::new_with_bytes(Pubkey::new_unique(), &[1, 2, 3], vec![AccountMeta::new(*payer, true)]);
    let message = Message::new_with_blockhash(&[ix], Some(payer), &Hash::new_unique());
    VersionedTransaction {
        signatures: vec![Signature::default()],
        message: VersionedMessage::Legacy(message),
    }
}

#[derive(Default)]
pub struct MockBackend {
    pub quote_calls: AtomicUsize,
    pub build_calls: AtomicUsize,
    pub confirm_calls: AtomicUsize,
    pub quote_requests: Mutex<Vec<QuoteRequest>>,
    quote_delays: Mutex<VecDeque<Duration>>,
    quote_failure: Mutex<Option<BackendError>>,
    build_failure: Mutex<Option<BackendError>>,
    confirm_failure: Mutex<Option<BackendError>>,
    points: Mutex<Option<u64>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        let backend = Self::default();
        *backend.points.lock() = Some(5);
        Arc::new(backend)
    }

    /// Delays for the next quote calls, in call order.
    pub fn delay_quotes(&self, delays: &[Duration]) {
        self.quote_delays.lock().extend(delays.iter().copied());
    }

    pub fn fail_quotes(&self, err: Option<BackendError>) {
        *self.quote_failure.lock() = err;
    }

    pub fn fail_build(&self, err: BackendError) {
        *self.build_failure.lock() = Some(err);
    }

    pub fn fail_confirm(&self, err: BackendError) {
        *self.confirm_failure.lock() = Some(err);
    }

    pub fn quotes(&self) -> usize {
        self.quote_calls.load(Ordering::SeqCst)
    }

    pub fn builds(&self) -> usize {
        self.build_calls.load(Ordering::SeqCst)
    }

    pub fn last_quote_request(&self) -> Option<QuoteRequest> {
        self.quote_requests.lock().last().cloned()
    }
}

#[async_trait]
impl SwapBackend for MockBackend {
    async fn quote(&self, req: &QuoteRequest) -> Result<QuoteResponse, BackendError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        self.quote_requests.lock().push(req.clone());
        let delay = self.quote_delays.lock().pop_front().unwrap_or_default();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.quote_failure.lock().clone() {
            return Err(err);
        }
        let in_amount: u64 = req.amount.parse().unwrap();
        QuoteResponse::from_payload(json!({
            "inputMint": req.input_mint,
            "outputMint": req.output_mint,
            "inAmount": req.amount,
            "outAmount": (in_amount * RATE).to_string(),
            "priceImpactPct": "0.12",
            "routePlan": [{"percent": 100}]
        }))
    }

    async fn build_swap(&self, req: &SwapRequest) -> Result<SwapResponse, BackendError> {
        let n = self.build_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = self.build_failure.lock().clone() {
            return Err(err);
        }
        let payer = Pubkey::from_str(&req.user_public_key).map_err(|e| BackendError::Rejected(e.to_string()))?;
        let bytes = bincode::serialize(&unsigned_for(&payer)).unwrap();
        Ok(SwapResponse {
            swap_transaction: base64::engine::general_purpose::STANDARD.encode(bytes),
            trade_id: format!("trade-{n}"),
            last_valid_block_height: Some(1_000),
        })
    }

    async fn confirm_trade(&self, _req: &ConfirmRequest) -> Result<ConfirmResponse, BackendError> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.confirm_failure.lock().clone() {
            return Err(err);
        }
        Ok(ConfirmResponse {
            confirmed: true,
            points_earned: *self.points.lock(),
        })
    }

    async fn prices(&self, mints: &[Pubkey]) -> Result<HashMap<Pubkey, f64>, BackendError> {
        Ok(mints.iter().map(|m| (*m, 1.0)).collect())
    }
}

pub struct MockWallet {
    keypair: Keypair,
    pub reject: Mutex<bool>,
    pub sign_delay: Mutex<Duration>,
    pub sign_calls: AtomicUsize,
}

impl MockWallet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            keypair: Keypair::new(),
            reject: Mutex::new(false),
            sign_delay: Mutex::new(Duration::ZERO),
            sign_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl WalletSigner for MockWallet {
    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    async fn sign_transaction(&self, tx: VersionedTransaction) -> Result<VersionedTransaction, WalletError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.sign_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if *self.reject.lock() {
            return Err(WalletError::from_message("User rejected the request."));
        }
        VersionedTransaction::try_new(tx.message, &[&self.keypair]).map_err(|e| WalletError::Signing(e.to_string()))
    }
}

pub struct MockNetwork {
    pub sent: Mutex<Vec<(Signature, SendOptions)>>,
    /// Answers to successive status polls; once drained, `settled` is returned.
    pub states: Mutex<VecDeque<Option<SignatureState>>>,
    pub settled: Mutex<Option<SignatureState>>,
    pub blockhash_valid: Mutex<bool>,
    pub send_failure: Mutex<Option<NetworkError>>,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            states: Mutex::new(VecDeque::new()),
            settled: Mutex::new(Some(SignatureState::Confirmed)),
            blockhash_valid: Mutex::new(true),
            send_failure: Mutex::new(None),
        })
    }

    pub fn sends(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn send_transaction(&self, tx: &VersionedTransaction, opts: SendOptions) -> Result<Signature, NetworkError> {
        if let Some(err) = self.send_failure.lock().clone() {
            return Err(err);
        }
        let signature = tx.signatures[0];
        self.sent.lock().push((signature, opts));
        Ok(signature)
    }

    async fn signature_state(&self, _signature: &Signature) -> Result<Option<SignatureState>, NetworkError> {
        let next = self.states.lock().pop_front();
        Ok(next.unwrap_or_else(|| self.settled.lock().clone()))
    }

    async fn is_blockhash_valid(&self, _blockhash: &Hash) -> Result<bool, NetworkError> {
        Ok(*self.blockhash_valid.lock())
    }
}

pub struct Harness {
    pub controller: SwapController,
    pub backend: Arc<MockBackend>,
    pub network: Arc<MockNetwork>,
    pub wallet: Arc<MockWallet>,
    pub placeholder: Pubkey,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ControllerConfig::default())
    }

    pub fn with_config(mut cfg: ControllerConfig) -> Self {
        let placeholder = Pubkey::new_unique();
        cfg.placeholder_trader = placeholder;
        let backend = MockBackend::new();
        let network = MockNetwork::new();
        let intent = TradeIntent::new(Token::usdc(), Token::sol(), 50);
        let controller = SwapController::new(cfg, backend.clone(), network.clone(), intent);
        Self {
            controller,
            backend,
            network,
            wallet: MockWallet::new(),
            placeholder,
        }
    }

    /// Connects the wallet and funds it with `usdc` base units.
    pub fn connect(&self, usdc: u64) {
        self.controller.connect_wallet(self.wallet.clone()).unwrap();
        self.controller
            .update_balances(BalanceBook::new(self.wallet.pubkey(), HashMap::from([(USDC_MINT, usdc)])));
    }
}

pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
