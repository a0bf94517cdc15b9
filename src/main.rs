use anyhow::{anyhow, Context, Result};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use velocity_swap::config::Config;
use velocity_swap::market::{self, RpcBalanceSource};
use velocity_swap::state::SwapSnapshot;
use velocity_swap::status::ActionKind;
use velocity_swap::{
    logger, HttpSwapBackend, KeypairWallet, Phase, RpcNetwork, SwapBackend, SwapController,
};

const QUOTE_WAIT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Load local .env if present (no-op in prod/systemd envs)
    let _ = dotenvy::dotenv();

    let cfg = Config::from_env()?;
    logger::init_tracing(cfg.log_json)?;
    info!(?cfg, "boot");

    let backend: Arc<dyn SwapBackend> =
        Arc::new(HttpSwapBackend::new(cfg.swap_api_url.clone(), cfg.http_timeout())?);
    let rpc = Arc::new(RpcClient::new_with_commitment(
        cfg.rpc_http_url.clone(),
        CommitmentConfig {
            commitment: cfg.commitment_level(),
        },
    ));
    let network = Arc::new(RpcNetwork::new(
        rpc.clone(),
        CommitmentConfig {
            commitment: cfg.commitment_level(),
        },
    ));

    let intent = cfg.intent()?;
    let mints: Vec<_> = [&intent.input, &intent.output]
        .into_iter()
        .flatten()
        .map(|t| t.address)
        .collect();
    let controller = SwapController::new(cfg.controller(), backend.clone(), network, intent);

    if let Some(path) = &cfg.sol_keypair_path {
        let wallet = KeypairWallet::from_file(path).with_context(|| format!("loading keypair {path}"))?;
        controller.connect_wallet(Arc::new(wallet))?;
    }

    let balances = market::spawn_balance_refresh(
        controller.clone(),
        Arc::new(RpcBalanceSource::new(rpc)),
        cfg.balance_refresh(),
    );
    let prices = market::spawn_price_refresh(controller.clone(), backend, mints, cfg.price_refresh());

    let res = run(&cfg, &controller).await;

    controller.shutdown();
    balances.abort();
    prices.abort();
    res
}

async fn run(cfg: &Config, controller: &SwapController) -> Result<()> {
    if cfg.amount.trim().is_empty() {
        warn!("SWAP_AMOUNT not set, nothing to quote");
        return Ok(());
    }

    let mut updates = controller.subscribe();
    controller.set_amount(&cfg.amount)?;

    tokio::time::timeout(QUOTE_WAIT, wait_for_quote(&mut updates))
        .await
        .map_err(|_| anyhow!("no quote within {QUOTE_WAIT:?}"))??;

    if let Some(details) = controller.quote_details() {
        info!(
            output = %details.output_amount,
            rate = %details.rate,
            price_impact_pct = details.price_impact_pct,
            impact = ?details.impact,
            min_received = %details.min_received,
            slippage = %details.slippage_pct,
            route_hops = details.route_hops,
            input_usd = ?details.input_usd,
            output_usd = ?details.output_usd,
            "quote"
        );
    }

    if cfg.dry_run {
        info!(action = %controller.action().label, "dry_run.skip_execute");
        return Ok(());
    }

    let action = controller.action();
    if action.kind != ActionKind::Swap {
        return Err(anyhow!("cannot swap: {}", action.label));
    }
    match controller.execute_swap().await {
        Ok(receipt) => {
            info!(
                signature = %receipt.signature,
                trade_id = %receipt.correlation_id,
                points = ?receipt.points_earned,
                "swap.done"
            );
            Ok(())
        }
        Err(e) if e.is_cancellation() => {
            info!("swap.cancelled");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn wait_for_quote(updates: &mut watch::Receiver<SwapSnapshot>) -> Result<()> {
    loop {
        let snap = updates.borrow_and_update().clone();
        if snap.phase == Phase::Quoted {
            return Ok(());
        }
        if snap.no_route {
            return Err(anyhow!("no route found"));
        }
        updates.changed().await.context("controller dropped")?;
    }
}
