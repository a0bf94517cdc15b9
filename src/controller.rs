//! The swap lifecycle controller.
//!
//! Owns the session state and schedules quoting: a debounce task after every
//! edit, then a refresh task while the intent stays unchanged. Quote responses
//! are matched against the intent generation and request sequence they were
//! issued for, so a late answer for an old intent never lands. Execution takes
//! the state from `quoted` to `building` under the lock, which makes it
//! exclusive; edits are refused until the swap settles.

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::aggregator::{ensure_slippage_bounds, SwapBackend};
use crate::amount;
use crate::domain::{Quote, Token, TradeIntent};
use crate::engine::{Engine, EngineConfig, SwapReceipt};
use crate::error::{EditError, QuoteError, SwapError};
use crate::market::{BalanceBook, PriceBook};
use crate::network::Network;
use crate::quote::{QuoteFetcher, DEFAULT_MIN_BASE_UNITS};
use crate::state::{Phase, QuoteOutcome, SwapSnapshot, SwapState};
use crate::status::{self, QuoteDetails, SwapAction};
use crate::timer::{self, TaskSlot};
use crate::wallet::WalletSigner;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub debounce: Duration,
    pub quote_refresh: Duration,
    /// Ceiling for the refresh interval after repeated quote failures.
    pub quote_refresh_max: Duration,
    /// How long `settled`/`failed` stays visible before returning to `idle`.
    pub settle_display: Duration,
    pub min_quote_base_units: u64,
    pub max_slippage_bps: u16,
    /// Quoted on behalf of when no wallet is connected.
    pub placeholder_trader: Pubkey,
    pub engine: EngineConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            quote_refresh: Duration::from_secs(2),
            quote_refresh_max: Duration::from_secs(30),
            settle_display: Duration::from_secs(4),
            min_quote_base_units: DEFAULT_MIN_BASE_UNITS,
            max_slippage_bps: 500,
            placeholder_trader: Pubkey::default(),
            engine: EngineConfig::default(),
        }
    }
}

#[derive(Debug, Default)]
struct Timers {
    debounce: TaskSlot,
    refresh: TaskSlot,
    reset: TaskSlot,
}

impl Timers {
    fn cancel_all(&mut self) {
        self.debounce.cancel();
        self.refresh.cancel();
        self.reset.cancel();
    }
}

struct Inner {
    cfg: ControllerConfig,
    fetcher: QuoteFetcher,
    engine: Engine,
    // Lock order: `timers` may be held while taking `state`, never the reverse.
    state: Mutex<SwapState>,
    timers: Mutex<Timers>,
    wallet: RwLock<Option<Arc<dyn WalletSigner>>>,
    balances: RwLock<BalanceBook>,
    prices: RwLock<PriceBook>,
    tx: watch::Sender<SwapSnapshot>,
}

/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct SwapController {
    inner: Arc<Inner>,
}

impl SwapController {
    pub fn new(
        cfg: ControllerConfig,
        backend: Arc<dyn SwapBackend>,
        network: Arc<dyn Network>,
        intent: TradeIntent,
    ) -> Self {
        let fetcher = QuoteFetcher::new(backend.clone(), cfg.min_quote_base_units, cfg.placeholder_trader);
        let engine = Engine::new(backend, network, cfg.engine.clone());
        let state = SwapState::new(intent);
        let (tx, _) = watch::channel(state.snapshot());
        Self {
            inner: Arc::new(Inner {
                cfg,
                fetcher,
                engine,
                state: Mutex::new(state),
                timers: Mutex::new(Timers::default()),
                wallet: RwLock::new(None),
                balances: RwLock::new(BalanceBook::default()),
                prices: RwLock::new(PriceBook::default()),
                tx,
            }),
        }
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.cfg
    }

    pub fn subscribe(&self) -> watch::Receiver<SwapSnapshot> {
        self.inner.tx.subscribe()
    }

    pub fn snapshot(&self) -> SwapSnapshot {
        self.inner.state.lock().snapshot()
    }

    fn publish(&self, st: &SwapState) {
        self.inner.tx.send_replace(st.snapshot());
    }

    fn generation(&self) -> u64 {
        self.inner.state.lock().generation()
    }

    // ---- intent edits ----

    pub fn set_amount(&self, input: &str) -> Result<(), EditError> {
        if !amount::is_valid_amount_input(input.trim()) {
            return Err(EditError::InvalidAmount);
        }
        let input = input.trim().to_string();
        self.edit(move |i| i.amount = input)
    }

    pub fn set_input_token(&self, token: Token) -> Result<(), EditError> {
        self.edit(move |i| i.input = Some(token))
    }

    pub fn set_output_token(&self, token: Token) -> Result<(), EditError> {
        self.edit(move |i| i.output = Some(token))
    }

    /// Swaps input and output and clears the amount.
    pub fn flip_tokens(&self) -> Result<(), EditError> {
        self.edit(|i| {
            std::mem::swap(&mut i.input, &mut i.output);
            i.amount.clear();
        })
    }

    pub fn set_slippage_bps(&self, bps: u16) -> Result<(), EditError> {
        ensure_slippage_bounds(bps, self.inner.cfg.max_slippage_bps)?;
        self.edit(move |i| i.slippage_bps = bps)
    }

    /// Connecting changes the trader, so any quote priced for the placeholder is dropped.
    pub fn connect_wallet(&self, wallet: Arc<dyn WalletSigner>) -> Result<(), EditError> {
        let pubkey = wallet.pubkey();
        self.edit(move |i| i.trader = Some(pubkey))?;
        *self.inner.wallet.write() = Some(wallet);
        info!(%pubkey, "controller.wallet_connected");
        Ok(())
    }

    pub fn disconnect_wallet(&self) -> Result<(), EditError> {
        self.edit(|i| i.trader = None)?;
        *self.inner.wallet.write() = None;
        *self.inner.balances.write() = BalanceBook::default();
        info!("controller.wallet_disconnected");
        Ok(())
    }

    pub fn wallet_pubkey(&self) -> Option<Pubkey> {
        self.inner.wallet.read().as_ref().map(|w| w.pubkey())
    }

    fn edit(&self, apply: impl FnOnce(&mut TradeIntent)) -> Result<(), EditError> {
        let debounce_for = {
            let mut st = self.inner.state.lock();
            let before = st.generation();
            let generation = st.edit(apply)?;
            if generation == before {
                return Ok(());
            }
            let quotable = self.inner.fetcher.plan(st.intent()).is_ok();
            if quotable {
                if let Err(e) = st.transition(Phase::Debouncing) {
                    warn!(error = %e, "controller.debounce_transition");
                }
            }
            debug!(generation, quotable, "controller.intent_changed");
            self.publish(&st);
            quotable.then_some(generation)
        };

        let mut timers = self.inner.timers.lock();
        timers.refresh.cancel();
        timers.reset.cancel();
        match debounce_for {
            Some(generation) => timers.debounce.replace(self.spawn_debounce(generation)),
            None => timers.debounce.cancel(),
        }
        Ok(())
    }

    // ---- quoting ----

    fn spawn_debounce(&self, generation: u64) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        timer::spawn_delayed(self.inner.cfg.debounce, async move {
            let Some(ctl) = Self::from_weak(&weak) else { return };
            if ctl.generation() != generation {
                return;
            }
            if let Err(e) = ctl.fetch_quote().await {
                debug!(error = %e, "controller.initial_quote_failed");
            }
            ctl.start_refresh(generation);
        })
    }

    fn start_refresh(&self, generation: u64) {
        let weak = Arc::downgrade(&self.inner);
        let task = timer::spawn_repeating(self.next_refresh_delay(), move || {
            let weak = weak.clone();
            async move {
                let ctl = Self::from_weak(&weak)?;
                if ctl.generation() != generation {
                    return None;
                }
                ctl.refresh_tick().await;
                Some(ctl.next_refresh_delay())
            }
        });

        let mut timers = self.inner.timers.lock();
        if self.generation() == generation {
            timers.refresh.replace(task);
        } else {
            task.abort();
        }
    }

    async fn refresh_tick(&self) {
        {
            let st = self.inner.state.lock();
            let phase = st.phase();
            if st.quote_in_flight() || phase.is_executing() || phase.is_terminal() {
                debug!(%phase, in_flight = st.quote_in_flight(), "controller.refresh_skipped");
                return;
            }
        }
        if let Err(e) = self.fetch_quote().await {
            debug!(error = %e, "controller.refresh_failed");
        }
    }

    fn next_refresh_delay(&self) -> Duration {
        let failures = self.inner.state.lock().quote_failures();
        refresh_delay(self.inner.cfg.quote_refresh, self.inner.cfg.quote_refresh_max, failures)
    }

    /// Requests a quote for the current intent now.
    ///
    /// The result is applied only if the intent is unchanged and no newer request
    /// was issued in the meantime; otherwise `QuoteError::Superseded` is returned.
    pub async fn fetch_quote(&self) -> Result<Quote, QuoteError> {
        let (ticket, plan) = {
            let mut st = self.inner.state.lock();
            if st.phase().is_executing() {
                return Err(QuoteError::NotQuotable(format!("swap is {}", st.phase())));
            }
            let plan = match self.inner.fetcher.plan(st.intent()) {
                Ok(plan) => plan,
                Err(e) => {
                    st.clear_quote();
                    self.publish(&st);
                    return Err(e);
                }
            };
            let ticket = st
                .begin_quote()
                .map_err(|e| QuoteError::NotQuotable(e.to_string()))?;
            self.publish(&st);
            (ticket, plan)
        };

        let result = self.inner.fetcher.fetch_planned(plan).await;

        let mut st = self.inner.state.lock();
        match st.apply_quote(ticket, result.clone()) {
            QuoteOutcome::Applied => {
                match &result {
                    Ok(q) => debug!(
                        generation = ticket.generation,
                        seq = ticket.seq,
                        in_amount = q.in_amount,
                        out_amount = q.out_amount,
                        "controller.quote_applied"
                    ),
                    Err(e) => info!(error = %e, "controller.no_route"),
                }
                self.publish(&st);
                result
            }
            QuoteOutcome::Stale => {
                debug!(
                    generation = ticket.generation,
                    seq = ticket.seq,
                    current = st.generation(),
                    "controller.quote_discarded"
                );
                Err(QuoteError::Superseded)
            }
        }
    }

    // ---- execution ----

    /// Runs the accepted quote to settlement. Only legal in `quoted` with a wallet
    /// connected and enough input balance.
    pub async fn execute_swap(&self) -> Result<SwapReceipt, SwapError> {
        let wallet = self
            .inner
            .wallet
            .read()
            .clone()
            .ok_or_else(|| SwapError::NotReady("wallet not connected".into()))?;

        let (quote, intent) = {
            let mut st = self.inner.state.lock();
            if st.phase() != Phase::Quoted {
                return Err(SwapError::NotReady(format!("swap is {}", st.phase())));
            }
            if let Some(symbol) = self.insufficient_funds(st.intent()) {
                return Err(SwapError::InsufficientBalance { symbol });
            }
            if !st.quote().is_some_and(|q| q.is_executable_by(&wallet.pubkey())) {
                return Err(SwapError::NotReady(
                    "quote was not priced for the connected wallet".into(),
                ));
            }
            let taken = st.begin_execution()?;
            self.publish(&st);
            taken
        };
        self.inner.timers.lock().cancel_all();

        // The attempt runs on its own task so dropping this future cannot strand
        // the state in an executing phase; once sent, a swap is not cancellable.
        let ctl = self.clone();
        let attempt = tokio::spawn(async move { ctl.run_attempt(quote, intent, wallet).await });
        match attempt.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let err = SwapError::SubmissionFailed(format!("swap task ended: {e}"));
                self.settle(&Err(err.clone()));
                Err(err)
            }
        }
    }

    async fn run_attempt(
        &self,
        quote: Quote,
        intent: TradeIntent,
        wallet: Arc<dyn WalletSigner>,
    ) -> Result<SwapReceipt, SwapError> {
        let progress = |phase: Phase| {
            let mut st = self.inner.state.lock();
            if let Err(e) = st.transition(phase) {
                warn!(error = %e, "controller.progress_transition");
            }
            self.publish(&st);
        };
        let outcome = self
            .inner
            .engine
            .execute(&quote, &intent, wallet.as_ref(), &progress)
            .await;
        self.settle(&outcome);
        outcome
    }

    fn settle(&self, outcome: &Result<SwapReceipt, SwapError>) {
        let generation = {
            let mut st = self.inner.state.lock();
            if !st.phase().is_executing() {
                return;
            }
            let generation = st.finish_execution(outcome);
            self.publish(&st);
            generation
        };
        match outcome {
            Ok(receipt) => info!(
                signature = %receipt.signature,
                points = ?receipt.points_earned,
                "controller.swap_settled"
            ),
            Err(e) if e.is_cancellation() => info!("controller.swap_cancelled"),
            Err(e) => warn!(error = %e, "controller.swap_failed"),
        }
        self.schedule_reset(generation);
    }

    fn schedule_reset(&self, generation: u64) {
        let weak = Arc::downgrade(&self.inner);
        let task = timer::spawn_delayed(self.inner.cfg.settle_display, async move {
            let Some(ctl) = Self::from_weak(&weak) else { return };
            let mut st = ctl.inner.state.lock();
            if st.reset_after_display(generation) {
                ctl.publish(&st);
            }
        });
        self.inner.timers.lock().reset.replace(task);
    }

    fn insufficient_funds(&self, intent: &TradeIntent) -> Option<String> {
        let input = intent.input.as_ref()?;
        let needed = intent.amount_base_units()?;
        let have = self.balance_of(&input.address);
        (needed > have).then(|| input.symbol.clone())
    }

    /// Balance of the connected wallet; a book held for any other owner reads as zero.
    fn balance_of(&self, mint: &Pubkey) -> u64 {
        let wallet = self.wallet_pubkey();
        let balances = self.inner.balances.read();
        if wallet.is_some() && balances.owner() == wallet {
            balances.get(mint)
        } else {
            0
        }
    }

    // ---- collaborators & views ----

    /// Installs a fetched balance book. A book for an owner other than the
    /// connected wallet is dropped and `false` returned; an ownerless book clears.
    pub fn update_balances(&self, book: BalanceBook) -> bool {
        let wallet = self.inner.wallet.read();
        let current = wallet.as_ref().map(|w| w.pubkey());
        if book.owner().is_some() && book.owner() != current {
            debug!(owner = ?book.owner(), wallet = ?current, "controller.balances_dropped");
            return false;
        }
        *self.inner.balances.write() = book;
        true
    }

    pub fn balances(&self) -> BalanceBook {
        self.inner.balances.read().clone()
    }

    pub fn update_prices(&self, prices: HashMap<Pubkey, f64>) {
        self.inner.prices.write().merge(prices);
    }

    pub fn action(&self) -> SwapAction {
        let snapshot = self.snapshot();
        let connected = self.inner.wallet.read().is_some();
        status::swap_action(&snapshot, connected, |mint| self.balance_of(mint))
    }

    pub fn status_text(&self) -> Option<String> {
        status::status_text(&self.snapshot())
    }

    pub fn quote_details(&self) -> Option<QuoteDetails> {
        let snapshot = self.snapshot();
        let quote = snapshot.quote.as_ref()?;
        QuoteDetails::build(quote, &snapshot.intent, &self.inner.prices.read())
    }

    /// Cancels every scheduled task. A swap already in flight runs to completion.
    pub fn shutdown(&self) {
        self.inner.timers.lock().cancel_all();
        debug!("controller.shutdown");
    }
}

/// Refresh interval after `failures` consecutive quote failures: doubled per
/// failure, capped at `max`, with ±10% jitter once backing off.
pub fn refresh_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    if failures == 0 {
        return base;
    }
    let backoff = base.saturating_mul(2u32.saturating_pow(failures.min(16))).min(max);
    let jitter = rand::thread_rng().gen_range(0.9..=1.1);
    backoff.mul_f64(jitter).min(max)
}
