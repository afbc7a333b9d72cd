//! rbd-config
//!
//! Layered YAML configuration with canonical-JSON hashing, plus the typed
//! [`BotConfig`] the engine consumes.
//!
//! Loading is a two-stage pipeline:
//! 1. [`load_layered_yaml`] deep-merges the YAML layers in order, then
//!    fingerprints the merged tree through the workspace's canonical-JSON
//!    writer ([`canonical_json`] + [`sha256_hex`], also used by the event
//!    ledger) — the hash goes into the ledger's RUN_STARTED event for
//!    provenance.
//! 2. [`BotConfig::from_value`] deserialises the merged JSON into the typed
//!    config; every field carries its documented default, so an empty layer
//!    list yields the stock configuration.

mod bot;
mod canonical;

pub use bot::{
    AssetClass, BotConfig, CapitalConfig, DislocationConfig, EarlyExitConfig, EscalationConfig,
    InsuranceReserveMode, OptionSleeveConfig, OverlayMinBudgetPolicy, RebalanceConfig, TierSpec,
};
pub use canonical::{canonical_json, sha256_hex};

use anyhow::{Context, Result};
use serde_json::map::Entry;
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Load + merge YAML files in order, then canonicalize and hash.
/// Later files override earlier files via deep-merge.
pub fn load_layered_yaml<P: AsRef<Path>>(paths: &[P]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let p = p.as_ref();
        let s = fs::read_to_string(p).with_context(|| format!("read config: {}", p.display()))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {}", p.display()))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        merge_layer(&mut merged, json_val);
    }

    Ok(LoadedConfig::from_merged(merged))
}

/// The merged, canonicalized, hashed configuration.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

impl LoadedConfig {
    fn from_merged(merged: Value) -> Self {
        let canonical = canonical_json(&merged);
        let config_hash = sha256_hex(canonical.as_bytes());
        LoadedConfig {
            config_json: merged,
            canonical_json: canonical,
            config_hash,
        }
    }

    /// Deserialise into the typed config, applying documented defaults for
    /// every absent field.
    pub fn typed(&self) -> Result<BotConfig> {
        BotConfig::from_value(self.config_json.clone())
    }
}

/// Fold one overlay into the base tree.
///
/// Matching object keys recurse; everything else — arrays, scalars, or an
/// overlay that is not an object at all — replaces the base slot outright.
fn merge_layer(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Object(fields) => {
            if let Value::Object(slots) = base {
                for (key, value) in fields {
                    match slots.entry(key) {
                        Entry::Occupied(mut occupied) => merge_layer(occupied.get_mut(), value),
                        Entry::Vacant(vacant) => {
                            vacant.insert(value);
                        }
                    }
                }
            } else {
                *base = Value::Object(fields);
            }
        }
        replacement => *base = replacement,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_yaml(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn empty_layer_list_yields_defaults() {
        let loaded = load_layered_yaml::<&Path>(&[]).unwrap();
        let cfg = loaded.typed().unwrap();
        assert_eq!(cfg.starting_capital_usd, 2000.0);
        assert_eq!(cfg.capital.core_pct, 0.7);
        assert_eq!(cfg.max_positions, 4);
        assert_eq!(cfg.dislocation.anchor_symbol, "SPY");
    }

    #[test]
    fn later_layer_overrides_earlier() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_yaml(&dir, "base.yaml", "max_positions: 4\nstarting_capital_usd: 2000\n");
        let overlay = write_yaml(&dir, "overlay.yaml", "max_positions: 6\n");

        let loaded = load_layered_yaml(&[&base, &overlay]).unwrap();
        let cfg = loaded.typed().unwrap();
        assert_eq!(cfg.max_positions, 6);
        assert_eq!(cfg.starting_capital_usd, 2000.0);
    }

    #[test]
    fn nested_sections_deep_merge() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_yaml(
            &dir,
            "base.yaml",
            "dislocation:\n  anchor_symbol: SPY\n  min_active_tier: 2\n",
        );
        let overlay = write_yaml(&dir, "overlay.yaml", "dislocation:\n  min_active_tier: 1\n");

        let cfg = load_layered_yaml(&[&base, &overlay]).unwrap().typed().unwrap();
        assert_eq!(cfg.dislocation.anchor_symbol, "SPY");
        assert_eq!(cfg.dislocation.min_active_tier, 1);
    }

    #[test]
    fn arrays_replace_instead_of_merging() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_yaml(
            &dir,
            "base.yaml",
            "rebalance:\n  regime_change_keys: [\"equity.label\", \"vol_label\"]\n",
        );
        let overlay = write_yaml(
            &dir,
            "overlay.yaml",
            "rebalance:\n  regime_change_keys: [\"rates.label\"]\n",
        );

        let cfg = load_layered_yaml(&[&base, &overlay]).unwrap().typed().unwrap();
        assert_eq!(cfg.rebalance.regime_change_keys, vec!["rates.label"]);
    }

    #[test]
    fn hash_is_stable_across_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_yaml(&dir, "a.yaml", "x: 1\ny: 2\n");
        let b = write_yaml(&dir, "b.yaml", "y: 2\nx: 1\n");

        let ha = load_layered_yaml(&[&a]).unwrap().config_hash;
        let hb = load_layered_yaml(&[&b]).unwrap().config_hash;
        assert_eq!(ha, hb);
    }

    #[test]
    fn hash_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_yaml(&dir, "a.yaml", "max_positions: 4\n");
        let b = write_yaml(&dir, "b.yaml", "max_positions: 5\n");

        let ha = load_layered_yaml(&[&a]).unwrap().config_hash;
        let hb = load_layered_yaml(&[&b]).unwrap().config_hash;
        assert_ne!(ha, hb);
    }

    #[test]
    fn missing_file_is_a_context_error() {
        let err = load_layered_yaml(&[Path::new("/nonexistent/cfg.yaml")]).unwrap_err();
        assert!(format!("{err:#}").contains("read config"));
    }

    #[test]
    fn scalar_base_is_replaced_by_object_overlay() {
        let mut base = serde_json::json!({"dislocation": 3});
        merge_layer(
            &mut base,
            serde_json::json!({"dislocation": {"min_active_tier": 1}}),
        );
        assert_eq!(
            base,
            serde_json::json!({"dislocation": {"min_active_tier": 1}})
        );
    }
}
