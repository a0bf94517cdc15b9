//! Lifecycle state of one trading session.
//!
//! `SwapState` is the single owner of the trade intent, the current quote and the
//! execution phase. It is plain data guarded by the controller's mutex; every
//! method is synchronous so the lock is never held across an await point.

use chrono::{DateTime, Utc};
use serde::Serialize;
use solana_sdk::signature::Signature;
use std::fmt;
use thiserror::Error;

use crate::domain::{Quote, TradeIntent};
use crate::engine::SwapReceipt;
use crate::error::{EditError, QuoteError, SwapError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Idle,
    Debouncing,
    Quoting,
    Quoted,
    Building,
    AwaitingSignature,
    Submitting,
    Confirming,
    Settled,
    Failed,
}

impl Phase {
    /// Building through confirming: the intent is frozen and no other swap may start.
    pub fn is_executing(self) -> bool {
        matches!(
            self,
            Phase::Building | Phase::AwaitingSignature | Phase::Submitting | Phase::Confirming
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Settled | Phase::Failed)
    }

    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (from, Failed) if from.is_executing() => true,
            (from, Idle | Debouncing) => !from.is_executing(),
            (Idle | Debouncing, Quoting) => true,
            (Quoting | Quoted, Quoted) => true,
            (Quoted, Building) => true,
            (Building, AwaitingSignature) => true,
            (AwaitingSignature, Submitting) => true,
            (Submitting, Confirming) => true,
            (Confirming, Settled) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Debouncing => "debouncing",
            Phase::Quoting => "quoting",
            Phase::Quoted => "quoted",
            Phase::Building => "building",
            Phase::AwaitingSignature => "awaiting-signature",
            Phase::Submitting => "submitting",
            Phase::Confirming => "confirming",
            Phase::Settled => "settled",
            Phase::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal phase transition {from} -> {to}")]
pub struct TransitionError {
    pub from: Phase,
    pub to: Phase,
}

/// Outcome of handing a quote response back to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteOutcome {
    Applied,
    /// The intent changed, or a newer request superseded this one.
    Stale,
}

/// Identifies one quote request against the intent it was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteTicket {
    pub generation: u64,
    pub seq: u64,
}

/// Read-only view published to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapSnapshot {
    pub phase: Phase,
    pub intent: TradeIntent,
    pub quote: Option<Quote>,
    pub generation: u64,
    pub quote_loading: bool,
    pub no_route: bool,
    pub error: Option<SwapError>,
    pub signature: Option<Signature>,
    pub points_earned: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct SwapState {
    intent: TradeIntent,
    phase: Phase,
    quote: Option<Quote>,
    generation: u64,
    quote_seq: u64,
    in_flight: Option<u64>,
    no_route: bool,
    quote_failures: u32,
    error: Option<SwapError>,
    signature: Option<Signature>,
    points_earned: Option<u64>,
    updated_at: DateTime<Utc>,
}

impl SwapState {
    pub fn new(intent: TradeIntent) -> Self {
        Self {
            intent,
            phase: Phase::Idle,
            quote: None,
            generation: 0,
            quote_seq: 0,
            in_flight: None,
            no_route: false,
            quote_failures: 0,
            error: None,
            signature: None,
            points_earned: None,
            updated_at: Utc::now(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn intent(&self) -> &TradeIntent {
        &self.intent
    }

    pub fn quote(&self) -> Option<&Quote> {
        self.quote.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn quote_failures(&self) -> u32 {
        self.quote_failures
    }

    /// True while a request for the current intent is outstanding.
    pub fn quote_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn transition(&mut self, next: Phase) -> Result<(), TransitionError> {
        if !self.phase.can_transition_to(next) {
            return Err(TransitionError {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        self.touch();
        Ok(())
    }

    /// Applies a user edit. The quote and any outstanding request are dropped and
    /// the phase falls back to idle; the caller decides whether to debounce.
    pub fn edit(&mut self, apply: impl FnOnce(&mut TradeIntent)) -> Result<u64, EditError> {
        if self.phase.is_executing() {
            return Err(EditError::Locked(self.phase));
        }
        let before = self.intent.clone();
        apply(&mut self.intent);
        if self.intent == before {
            return Ok(self.generation);
        }
        self.invalidate();
        self.phase = Phase::Idle;
        self.touch();
        Ok(self.generation)
    }

    fn invalidate(&mut self) {
        self.generation += 1;
        self.quote = None;
        self.in_flight = None;
        self.no_route = false;
        self.quote_failures = 0;
        self.error = None;
        self.signature = None;
        self.points_earned = None;
    }

    /// Drops the quote without a network call (intent not quotable).
    pub fn clear_quote(&mut self) {
        self.quote = None;
        self.in_flight = None;
        self.no_route = false;
        if !self.phase.is_executing() && !self.phase.is_terminal() {
            self.phase = Phase::Idle;
        }
        self.touch();
    }

    /// Registers a new outstanding request, superseding any earlier one.
    pub fn begin_quote(&mut self) -> Result<QuoteTicket, TransitionError> {
        if !matches!(self.phase, Phase::Quoting | Phase::Quoted) {
            self.transition(Phase::Quoting)?;
        }
        self.quote_seq += 1;
        self.in_flight = Some(self.quote_seq);
        self.touch();
        Ok(QuoteTicket {
            generation: self.generation,
            seq: self.quote_seq,
        })
    }

    pub fn apply_quote(&mut self, ticket: QuoteTicket, result: Result<Quote, QuoteError>) -> QuoteOutcome {
        if ticket.generation != self.generation
            || self.in_flight != Some(ticket.seq)
            || !matches!(self.phase, Phase::Quoting | Phase::Quoted)
        {
            return QuoteOutcome::Stale;
        }
        self.in_flight = None;
        match result {
            Ok(quote) => {
                self.quote = Some(quote);
                self.no_route = false;
                self.quote_failures = 0;
                self.phase = Phase::Quoted;
            }
            Err(QuoteError::NotQuotable(_)) => {
                self.quote = None;
                self.no_route = false;
                self.phase = Phase::Idle;
            }
            Err(_) => {
                self.quote = None;
                self.no_route = true;
                self.quote_failures = self.quote_failures.saturating_add(1);
                self.phase = Phase::Idle;
            }
        }
        self.touch();
        QuoteOutcome::Applied
    }

    /// Takes the exclusive execution lock: only legal from `quoted`.
    pub fn begin_execution(&mut self) -> Result<(Quote, TradeIntent), SwapError> {
        if self.phase != Phase::Quoted {
            return Err(SwapError::NotReady(format!("swap is {}", self.phase)));
        }
        let quote = self
            .quote
            .clone()
            .ok_or_else(|| SwapError::NotReady("no quote".into()))?;
        self.in_flight = None;
        self.error = None;
        self.signature = None;
        self.points_earned = None;
        self.phase = Phase::Building;
        self.touch();
        Ok((quote, self.intent.clone()))
    }

    /// Records the outcome, clears amount and quote. Returns the generation the
    /// settle-reset timer must match.
    pub fn finish_execution(&mut self, outcome: &Result<SwapReceipt, SwapError>) -> u64 {
        self.invalidate();
        self.intent.amount.clear();
        match outcome {
            Ok(receipt) => {
                self.signature = Some(receipt.signature);
                self.points_earned = receipt.points_earned;
                self.phase = Phase::Settled;
            }
            Err(err) => {
                self.error = Some(err.clone());
                self.phase = Phase::Failed;
            }
        }
        self.touch();
        self.generation
    }

    /// Ends the settlement display window, unless the user already moved on.
    pub fn reset_after_display(&mut self, generation: u64) -> bool {
        if generation != self.generation || !self.phase.is_terminal() {
            return false;
        }
        self.phase = Phase::Idle;
        self.error = None;
        self.signature = None;
        self.points_earned = None;
        self.touch();
        true
    }

    pub fn snapshot(&self) -> SwapSnapshot {
        SwapSnapshot {
            phase: self.phase,
            intent: self.intent.clone(),
            quote: self.quote.clone(),
            generation: self.generation,
            quote_loading: self.in_flight.is_some(),
            no_route: self.no_route,
            error: self.error.clone(),
            signature: self.signature,
            points_earned: self.points_earned,
            updated_at: self.updated_at,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Token;
    use solana_sdk::pubkey::Pubkey;

    fn quote() -> Quote {
        Quote {
            in_amount: 10_000_000,
            out_amount: 70_000_000,
            price_impact_pct: 0.01,
            route_hops: 1,
            trader: Pubkey::new_unique(),
            informational: false,
            raw: serde_json::json!({}),
        }
    }

    fn quoted_state() -> SwapState {
        let mut st = SwapState::new(TradeIntent::new(Token::usdc(), Token::sol(), 50));
        st.edit(|i| i.amount = "10".into()).unwrap();
        st.transition(Phase::Debouncing).unwrap();
        let ticket = st.begin_quote().unwrap();
        assert_eq!(st.apply_quote(ticket, Ok(quote())), QuoteOutcome::Applied);
        st
    }

    #[test]
    fn execution_phases_follow_the_happy_path_only() {
        use Phase::*;
        assert!(Quoted.can_transition_to(Building));
        assert!(Building.can_transition_to(AwaitingSignature));
        assert!(Confirming.can_transition_to(Settled));
        assert!(Submitting.can_transition_to(Failed));
        assert!(Settled.can_transition_to(Idle));

        assert!(!Idle.can_transition_to(Building));
        assert!(!Quoting.can_transition_to(Building));
        assert!(!Building.can_transition_to(Idle));
        assert!(!Confirming.can_transition_to(Debouncing));
        assert!(!Idle.can_transition_to(Settled));
    }

    #[test]
    fn edit_invalidates_quote_and_bumps_generation() {
        let mut st = quoted_state();
        let gen = st.generation();
        st.edit(|i| i.amount = "11".into()).unwrap();
        assert!(st.quote().is_none());
        assert_eq!(st.phase(), Phase::Idle);
        assert_eq!(st.generation(), gen + 1);
    }

    #[test]
    fn no_op_edit_keeps_quote() {
        let mut st = quoted_state();
        let gen = st.generation();
        st.edit(|i| i.amount = "10".into()).unwrap();
        assert!(st.quote().is_some());
        assert_eq!(st.generation(), gen);
    }

    #[test]
    fn stale_generation_is_discarded() {
        let mut st = SwapState::new(TradeIntent::new(Token::usdc(), Token::sol(), 50));
        st.edit(|i| i.amount = "1".into()).unwrap();
        let old = st.begin_quote().unwrap();
        st.edit(|i| i.amount = "2".into()).unwrap();
        let new = st.begin_quote().unwrap();

        assert_eq!(st.apply_quote(old, Ok(quote())), QuoteOutcome::Stale);
        assert!(st.quote().is_none());
        assert_eq!(st.apply_quote(new, Ok(quote())), QuoteOutcome::Applied);
        assert!(st.quote().is_some());
    }

    #[test]
    fn superseded_request_is_discarded() {
        let mut st = SwapState::new(TradeIntent::new(Token::usdc(), Token::sol(), 50));
        st.edit(|i| i.amount = "1".into()).unwrap();
        let first = st.begin_quote().unwrap();
        let second = st.begin_quote().unwrap();
        assert_eq!(st.apply_quote(first, Ok(quote())), QuoteOutcome::Stale);
        assert_eq!(st.apply_quote(second, Ok(quote())), QuoteOutcome::Applied);
    }

    #[test]
    fn failed_quote_flags_no_route_and_counts_failures() {
        let mut st = quoted_state();
        let ticket = st.begin_quote().unwrap();
        let out = st.apply_quote(ticket, Err(QuoteError::Unavailable("no route".into())));
        assert_eq!(out, QuoteOutcome::Applied);
        assert!(st.snapshot().no_route);
        assert_eq!(st.quote_failures(), 1);
        assert_eq!(st.phase(), Phase::Idle);
    }

    #[test]
    fn execution_locks_edits_and_only_starts_from_quoted() {
        let mut idle = SwapState::new(TradeIntent::new(Token::usdc(), Token::sol(), 50));
        assert!(matches!(idle.begin_execution(), Err(SwapError::NotReady(_))));

        let mut st = quoted_state();
        st.begin_execution().unwrap();
        assert_eq!(st.phase(), Phase::Building);
        assert_eq!(
            st.edit(|i| i.amount = "5".into()),
            Err(EditError::Locked(Phase::Building))
        );
        assert!(matches!(st.begin_execution(), Err(SwapError::NotReady(_))));
    }

    #[test]
    fn settlement_clears_amount_and_resets_after_display() {
        let mut st = quoted_state();
        st.begin_execution().unwrap();
        let receipt = SwapReceipt {
            signature: Signature::new_unique(),
            correlation_id: "t".into(),
            points_earned: Some(3),
        };
        let gen = st.finish_execution(&Ok(receipt));
        assert_eq!(st.phase(), Phase::Settled);
        assert!(st.intent().amount.is_empty());
        assert!(st.quote().is_none());
        assert_eq!(st.snapshot().points_earned, Some(3));

        assert!(!st.reset_after_display(gen + 1));
        assert!(st.reset_after_display(gen));
        assert_eq!(st.phase(), Phase::Idle);
        assert!(st.snapshot().signature.is_none());
    }

    #[test]
    fn failure_keeps_reason_until_reset() {
        let mut st = quoted_state();
        st.begin_execution().unwrap();
        st.finish_execution(&Err(SwapError::UserCancelledSignature));
        assert_eq!(st.phase(), Phase::Failed);
        assert_eq!(st.snapshot().error, Some(SwapError::UserCancelledSignature));
    }
}
