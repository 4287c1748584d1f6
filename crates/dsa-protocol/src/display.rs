//! Display helpers shared by every renderer of dashboard state.

use std::collections::HashMap;

use crate::constants::{BADGE_PALETTE_SIZE, LEGACY_DISPLAY_NAMES};
use crate::types::ProviderInfo;

/// Provider key -> human readable label.
///
/// Lookup precedence: backend provider list, then configured overrides,
/// then the built-in legacy labels. Unknown keys render as themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayNames {
    names: HashMap<String, String>,
}

impl DisplayNames {
    /// Empty map: every key renders as itself.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Map seeded with the legacy labels.
    pub fn with_legacy_defaults() -> Self {
        let names = LEGACY_DISPLAY_NAMES
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self { names }
    }

    /// Apply labels from configuration on top of the current map.
    pub fn apply_overrides<'a, I>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (key, label) in overrides {
            if !label.trim().is_empty() {
                self.names.insert(key.clone(), label.clone());
            }
        }
    }

    /// Labels from the backend provider list win over everything else.
    pub fn merge_providers(&mut self, providers: &[ProviderInfo]) {
        for p in providers {
            self.names.insert(p.key.clone(), p.display_name.clone());
        }
    }

    pub fn label<'a>(&'a self, key: &'a str) -> &'a str {
        self.names.get(key).map(String::as_str).unwrap_or(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.names.contains_key(key)
    }
}

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

/// Short badge text for a provider label.
///
/// CJK labels of up to four characters are kept whole, longer ones are cut to
/// two characters. Latin labels become their first two letters upper-cased.
pub fn badge_label(display_name: &str) -> String {
    if display_name.chars().any(is_cjk) {
        if display_name.chars().count() <= 4 {
            display_name.to_string()
        } else {
            display_name.chars().take(2).collect()
        }
    } else {
        display_name.chars().take(2).collect::<String>().to_uppercase()
    }
}

/// Palette slot for a provider badge. The two legacy providers own the first
/// two slots; every other key hashes into the palette.
pub fn badge_slot(key: &str) -> usize {
    match key {
        "openai" => 0,
        "gemini" => 1,
        _ => {
            // Only the shift is 32-bit; the running sum is carried untruncated.
            let mut hash: i64 = 0;
            for unit in key.encode_utf16() {
                let shifted = i64::from((hash as i32) << 5);
                hash = i64::from(unit).wrapping_add(shifted).wrapping_sub(hash);
            }
            (hash.unsigned_abs() % BADGE_PALETTE_SIZE as u64) as usize
        }
    }
}

/// Coarse reading of a 0-100 sentiment score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentimentBand {
    VeryBearish,
    Bearish,
    Neutral,
    Bullish,
    VeryBullish,
}

impl SentimentBand {
    pub fn from_score(score: i32) -> Self {
        match score {
            s if s >= 80 => Self::VeryBullish,
            s if s >= 60 => Self::Bullish,
            s if s >= 40 => Self::Neutral,
            s if s >= 20 => Self::Bearish,
            _ => Self::VeryBearish,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::VeryBearish => "Very bearish",
            Self::Bearish => "Bearish",
            Self::Neutral => "Neutral",
            Self::Bullish => "Bullish",
            Self::VeryBullish => "Very bullish",
        }
    }
}

/// Direction of the day's price move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceDirection {
    Up,
    Down,
    Flat,
    Unknown,
}

impl PriceDirection {
    pub fn from_change_pct(change_pct: Option<f64>) -> Self {
        match change_pct {
            None => Self::Unknown,
            Some(c) if c > 0.0 => Self::Up,
            Some(c) if c < 0.0 => Self::Down,
            Some(_) => Self::Flat,
        }
    }
}

/// `+1.23%`, `-0.50%`, `0.00%`, or `--` when unknown.
pub fn format_change_pct(change_pct: Option<f64>) -> String {
    match change_pct {
        None => "--".to_string(),
        Some(c) if c > 0.0 => format!("+{c:.2}%"),
        Some(c) => format!("{c:.2}%"),
    }
}

/// Render a backend timestamp as `YYYY-MM-DD HH:MM`.
///
/// The backend emits either RFC 3339 or naive ISO timestamps; anything that
/// does not parse is returned unchanged.
pub fn format_timestamp(raw: &str) -> String {
    const OUT: &str = "%Y-%m-%d %H:%M";
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return dt.format(OUT).to_string();
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(raw, fmt) {
            return dt.format(OUT).to_string();
        }
    }
    raw.to_string()
}
