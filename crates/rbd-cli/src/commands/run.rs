//! `rbd run` — one rebalance tick.
//!
//! Loads layered config + persisted state, reads the market snapshot file,
//! runs the pure tick, persists the mutated state, appends the tick's
//! events to the ledger, and prints the TickResult as JSON.
//!
//! Exit codes: 0 success, 2 invariant violation, 3 unexecutable plan.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use clap::Args;
use rbd_config::{load_layered_yaml, BotConfig};
use rbd_engine::{run_tick, ScenarioEvents, StateStore, TickInputs};
use rbd_features::{HistoryBar, HistoryMap, QuoteMap};
use rbd_ledger::{
    LedgerWriter, EVENT_CASH, EVENT_FILL_RECORDED, EVENT_RUN_COMPLETED, EVENT_RUN_STARTED,
};
use rbd_portfolio::Micros;
use rbd_regime::RegimeSnapshot;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use tracing::info;
use uuid::Uuid;

#[derive(Args)]
pub struct RunArgs {
    /// Tick timestamp (ISO-8601, minute precision, e.g. 2025-01-06T21:00).
    #[arg(long = "as-of")]
    pub as_of: String,

    /// Market snapshot JSON (quotes, history, universe, proxies, scenario).
    #[arg(long)]
    pub market: String,

    /// Layered config paths in merge order.
    #[arg(long = "config")]
    pub config_paths: Vec<String>,

    /// State directory (snapshots + ledger).
    #[arg(long = "state-dir", default_value = "./state")]
    pub state_dir: String,
}

/// The market snapshot file format.
#[derive(Debug, Deserialize)]
struct MarketFile {
    quotes: BTreeMap<String, f64>,
    #[serde(default)]
    history: BTreeMap<String, Vec<(chrono::NaiveDate, f64)>>,
    universe: Vec<String>,
    #[serde(default)]
    proxy_map: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    scenario: Option<ScenarioFile>,
}

#[derive(Debug, Deserialize)]
struct ScenarioFile {
    #[serde(default)]
    cash_infusion_usd: Option<f64>,
    #[serde(default)]
    forced_tier: Option<u8>,
    #[serde(default)]
    forced_returns: BTreeMap<String, f64>,
}

pub fn execute(args: RunArgs) -> Result<i32> {
    let as_of = parse_as_of(&args.as_of)?;

    let loaded = load_layered_yaml(&args.config_paths)?;
    let cfg: BotConfig = loaded.typed()?;

    let market: MarketFile = serde_json::from_str(
        &fs::read_to_string(&args.market)
            .with_context(|| format!("read market file {}", args.market))?,
    )
    .with_context(|| format!("parse market file {}", args.market))?;

    let store = StateStore::new(&args.state_dir)?;
    let state = store.load_or_bootstrap(&cfg)?;

    // Prior regime snapshot, persisted across runs so regime-change
    // detection survives process restarts.
    let regimes_path = store.dir().join("regimes.json");
    let prior_regimes: Option<RegimeSnapshot> = if regimes_path.exists() {
        Some(
            serde_json::from_str(
                &fs::read_to_string(&regimes_path).context("read regimes.json")?,
            )
            .context("parse regimes.json")?,
        )
    } else {
        None
    };

    let run_id = Uuid::new_v4();
    let mut ledger = LedgerWriter::resume(store.ledger_path(), cfg.ledger_hash_chain)?;
    ledger.append(
        run_id,
        as_of,
        EVENT_RUN_STARTED,
        serde_json::json!({
            "as_of": as_of,
            "config_hash": loaded.config_hash,
            "env": cfg.env,
            "account_id": cfg.account_id,
        }),
    )?;

    let inputs = TickInputs {
        as_of,
        quotes: to_quotes(&market.quotes),
        history: to_history(&market.history),
        universe: market.universe.clone(),
        proxy_map: market.proxy_map.clone(),
        prior_regimes,
        scenario: market.scenario.as_ref().map(|s| ScenarioEvents {
            cash_infusion_usd: s.cash_infusion_usd,
            forced_tier: s.forced_tier,
            forced_returns: s.forced_returns.clone(),
        }),
        config: &cfg,
    };

    let (next_state, result) = run_tick(&state, &inputs)?;

    for event in &result.cash_events {
        ledger.append(run_id, as_of, EVENT_CASH, serde_json::to_value(event)?)?;
    }
    for order in &result.orders {
        ledger.append(run_id, as_of, EVENT_FILL_RECORDED, serde_json::to_value(order)?)?;
    }
    ledger.append(
        run_id,
        as_of,
        EVENT_RUN_COMPLETED,
        serde_json::json!({
            "invariants_ok": result.invariants.ok,
            "orders": result.orders.len(),
            "phase": result.diagnostics.phase,
        }),
    )?;

    store.save(&cfg, &next_state)?;
    fs::write(
        &regimes_path,
        serde_json::to_string_pretty(&result.diagnostics.regimes)?,
    )
    .context("write regimes.json")?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    info!(
        orders = result.orders.len(),
        invariants_ok = result.invariants.ok,
        "tick complete"
    );

    if !result.invariants.ok {
        return Ok(2);
    }
    if result.diagnostics.rebalance_status.is_blocking() {
        return Ok(3);
    }
    Ok(0)
}

fn parse_as_of(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M") {
        return Ok(naive.and_utc());
    }
    bail!("unparseable --as-of timestamp: {raw}")
}

fn to_quotes(raw: &BTreeMap<String, f64>) -> QuoteMap {
    raw.iter()
        .map(|(sym, px)| (sym.clone(), Micros::from_dollars(*px)))
        .collect()
}

fn to_history(raw: &BTreeMap<String, Vec<(chrono::NaiveDate, f64)>>) -> HistoryMap {
    raw.iter()
        .map(|(sym, bars)| {
            (
                sym.clone(),
                bars.iter()
                    .map(|(date, close)| HistoryBar::new(*date, Micros::from_dollars(*close)))
                    .collect(),
            )
        })
        .collect()
}
