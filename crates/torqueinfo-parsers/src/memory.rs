//! Memory parsing utilities for scheduler output.

/// Unit suffixes accepted on PBS size values.
///
/// PBS allows a byte (`b`) or word (`w`) base; both scale the same way here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryUnit {
    Bytes,
    Kilo,
    Mega,
    Giga,
    Tera,
}

impl MemoryUnit {
    /// Parse a suffix such as "kb", "MW" or "gb" (case-insensitive).
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix.trim().to_ascii_lowercase().as_str() {
            "b" | "w" => Some(Self::Bytes),
            "kb" | "kw" => Some(Self::Kilo),
            "mb" | "mw" => Some(Self::Mega),
            "gb" | "gw" => Some(Self::Giga),
            "tb" | "tw" => Some(Self::Tera),
            _ => None,
        }
    }

    /// Convert a value in this unit to megabytes.
    pub fn to_mb(self, value: u64) -> u64 {
        match self {
            Self::Bytes => value / 1_048_576,
            Self::Kilo => value / 1024,
            Self::Mega => value,
            Self::Giga => value.saturating_mul(1024),
            Self::Tera => value.saturating_mul(1_048_576),
        }
    }
}

/// Parse a PBS size string (e.g., "2gb", "512mb", "4194304kb") to megabytes.
///
/// Returns 0 for anything that is not `<integer><suffix>` with a known suffix.
pub fn parse_memory_mb(s: &str) -> u64 {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, suffix) = s.split_at(split);

    let Ok(value) = digits.parse::<u64>() else {
        return 0;
    };

    MemoryUnit::from_suffix(suffix)
        .map(|unit| unit.to_mb(value))
        .unwrap_or(0)
}
