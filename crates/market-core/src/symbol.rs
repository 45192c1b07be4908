use serde::{Deserialize, Serialize};

/// Exchange a 6-digit A-share code trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Market {
    Shanghai,
    Shenzhen,
}

/// Per-upstream symbol conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolStyle {
    /// `sh600519` / `sz000001` (tencent, sina)
    LowerPrefix,
    /// `hs_600519` (tonghuashun, market-agnostic)
    HsPrefix,
    /// `600519.SH` / `000001.SZ` (tushare)
    UpperSuffix,
    /// `sh.600519` / `sz.000001` (baostock)
    DottedPrefix,
    /// `600519.SS` / `000001.SZ` (yahoo)
    YahooSuffix,
}

/// Strip any known decoration so only the bare numeric code remains.
pub fn strip_decorations(code: &str) -> String {
    let mut bare = code.trim().to_string();
    for suffix in [".SH", ".SZ", ".SS", ".sh", ".sz", ".ss"] {
        if let Some(stripped) = bare.strip_suffix(suffix) {
            bare = stripped.to_string();
            break;
        }
    }
    for prefix in ["sh.", "sz.", "hs_", "sh", "sz"] {
        if let Some(stripped) = bare.strip_prefix(prefix) {
            if stripped.chars().all(|c| c.is_ascii_digit()) {
                bare = stripped.to_string();
                break;
            }
        }
    }
    bare
}

/// Market from the code prefix. Unknown prefixes default to Shenzhen with a
/// warning, matching the provider-wide convention.
pub fn detect_market(bare_code: &str) -> Market {
    if ["600", "601", "603", "688"]
        .iter()
        .any(|p| bare_code.starts_with(p))
    {
        Market::Shanghai
    } else if ["000", "002", "300", "301"]
        .iter()
        .any(|p| bare_code.starts_with(p))
    {
        Market::Shenzhen
    } else {
        tracing::warn!(code = bare_code, "unknown market prefix, defaulting to Shenzhen");
        Market::Shenzhen
    }
}

/// Translate a display code into the given upstream convention. Existing
/// decorations are stripped before the destination convention is applied.
pub fn format_code(code: &str, style: SymbolStyle) -> String {
    let bare = strip_decorations(code);
    let market = detect_market(&bare);
    match (style, market) {
        (SymbolStyle::LowerPrefix, Market::Shanghai) => format!("sh{bare}"),
        (SymbolStyle::LowerPrefix, Market::Shenzhen) => format!("sz{bare}"),
        (SymbolStyle::HsPrefix, _) => format!("hs_{bare}"),
        (SymbolStyle::UpperSuffix, Market::Shanghai) => format!("{bare}.SH"),
        (SymbolStyle::UpperSuffix, Market::Shenzhen) => format!("{bare}.SZ"),
        (SymbolStyle::DottedPrefix, Market::Shanghai) => format!("sh.{bare}"),
        (SymbolStyle::DottedPrefix, Market::Shenzhen) => format!("sz.{bare}"),
        (SymbolStyle::YahooSuffix, Market::Shanghai) => format!("{bare}.SS"),
        (SymbolStyle::YahooSuffix, Market::Shenzhen) => format!("{bare}.SZ"),
    }
}

/// Invert any upstream convention back to the bare display code.
pub fn display_code(symbol: &str) -> String {
    strip_decorations(symbol)
}

/// EastMoney `secid` form: market digit + dot + bare code.
pub fn secid(code: &str) -> String {
    let bare = strip_decorations(code);
    match detect_market(&bare) {
        Market::Shanghai => format!("1.{bare}"),
        Market::Shenzhen => format!("0.{bare}"),
    }
}
