//! Symbol → asset-class classification for the tilt table.

use rbd_config::AssetClass;
use std::collections::BTreeMap;

/// Built-in classification for common retail ETFs; config overrides win.
/// Unknown symbols default to large-cap equity, the least-tilted bucket.
pub fn classify_symbol(symbol: &str, overrides: &BTreeMap<String, AssetClass>) -> AssetClass {
    if let Some(cls) = overrides.get(symbol) {
        return *cls;
    }
    match symbol {
        "SPY" | "VOO" | "IVV" | "VTI" | "DIA" | "SPLG" => AssetClass::EquityLarge,
        "QQQ" | "QQQM" | "VGT" | "XLK" => AssetClass::EquityGrowth,
        "IWM" | "VB" | "IJR" => AssetClass::EquitySmall,
        "TLT" | "VGLT" | "EDV" | "ZROZ" => AssetClass::DurationLong,
        "SHY" | "VGSH" | "BIL" | "SGOV" => AssetClass::DurationShort,
        "GLD" | "IAU" | "GLDM" | "SGOL" => AssetClass::Gold,
        _ => AssetClass::EquityLarge,
    }
}
