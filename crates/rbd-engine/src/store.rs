//! JSON state store.
//!
//! Persists the engine state between ticks as four snapshot files:
//! `portfolio.json`, `sleeve_positions.json` (keyed by `"{env}:{account}"`),
//! `lifecycle.json`, `option_sleeves.json`.  The layout is opaque to
//! callers; the ledger (`ledger.jsonl`) is written separately by the CLI
//! through `rbd-ledger`.

use crate::state::EngineState;
use anyhow::{Context, Result};
use rbd_config::BotConfig;
use rbd_dislocation::LifecycleState;
use rbd_options::OptionSleeves;
use rbd_portfolio::{Portfolio, SleeveIndex};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const PORTFOLIO_FILE: &str = "portfolio.json";
const SLEEVES_FILE: &str = "sleeve_positions.json";
const LIFECYCLE_FILE: &str = "lifecycle.json";
const OPTIONS_FILE: &str = "option_sleeves.json";

/// Directory-backed store for the engine state.
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).with_context(|| format!("create state dir {:?}", dir))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.dir.join("ledger.jsonl")
    }

    /// Load the persisted state, or bootstrap a fresh one when no snapshot
    /// exists yet.
    pub fn load_or_bootstrap(&self, cfg: &BotConfig) -> Result<EngineState> {
        let portfolio: Option<Portfolio> = self.read_optional(PORTFOLIO_FILE)?;
        let Some(portfolio) = portfolio else {
            return Ok(EngineState::bootstrap(cfg));
        };

        let sleeve_book: BTreeMap<String, SleeveIndex> =
            self.read_optional(SLEEVES_FILE)?.unwrap_or_default();
        let sleeves = sleeve_book.get(&cfg.store_key()).cloned().unwrap_or_default();

        let lifecycle: LifecycleState = self.read_optional(LIFECYCLE_FILE)?.unwrap_or_default();
        let option_sleeves: OptionSleeves = self.read_optional(OPTIONS_FILE)?.unwrap_or_default();

        Ok(EngineState {
            portfolio,
            sleeves,
            lifecycle,
            option_sleeves,
        })
    }

    /// Persist the state.  The sleeve book preserves entries for other
    /// env/account keys.
    pub fn save(&self, cfg: &BotConfig, state: &EngineState) -> Result<()> {
        self.write(PORTFOLIO_FILE, &state.portfolio)?;

        let mut sleeve_book: BTreeMap<String, SleeveIndex> =
            self.read_optional(SLEEVES_FILE)?.unwrap_or_default();
        sleeve_book.insert(cfg.store_key(), state.sleeves.clone());
        self.write(SLEEVES_FILE, &sleeve_book)?;

        self.write(LIFECYCLE_FILE, &state.lifecycle)?;
        self.write(OPTIONS_FILE, &state.option_sleeves)?;
        Ok(())
    }

    fn read_optional<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let content =
            fs::read_to_string(&path).with_context(|| format!("read state file {:?}", path))?;
        let value =
            serde_json::from_str(&content).with_context(|| format!("parse state file {:?}", path))?;
        Ok(Some(value))
    }

    fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        let content =
            serde_json::to_string_pretty(value).context("serialize state file failed")?;
        fs::write(&path, content).with_context(|| format!("write state file {:?}", path))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
