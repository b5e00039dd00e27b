//! Coarse script-based language guess for the zh/en pair the nodes care about.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Lang {
    #[serde(rename = "zh")]
    Chinese,
    #[serde(rename = "en")]
    English,
}

impl Lang {
    pub fn code(&self) -> &'static str {
        match self {
            Lang::Chinese => "zh",
            Lang::English => "en",
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Lang {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zh" | "zh-cn" | "chinese" => Ok(Lang::Chinese),
            "en" | "english" => Ok(Lang::English),
            other => Err(format!("unsupported language `{other}`")),
        }
    }
}

#[inline]
fn is_han(c: char) -> bool {
    let code = c as u32;
    (0x4E00..=0x9FFF).contains(&code) || // CJK Unified Ideographs
    (0x3400..=0x4DBF).contains(&code) || // Extension A
    (0xF900..=0xFAFF).contains(&code) // Compatibility Ideographs
}

#[inline]
fn is_kana_or_hangul(c: char) -> bool {
    let code = c as u32;
    (0x3040..=0x30FF).contains(&code) || (0xAC00..=0xD7AF).contains(&code)
}

/// Chinese when Han characters are at least half as many as Latin letters,
/// English when Latin letters dominate. Kana or Hangul, or no letters at all,
/// give `None`.
pub fn detect_language(text: &str) -> Option<Lang> {
    let mut han = 0usize;
    let mut latin = 0usize;
    for c in text.chars() {
        if is_han(c) {
            han += 1;
        } else if c.is_ascii_alphabetic() {
            latin += 1;
        } else if is_kana_or_hangul(c) {
            return None;
        }
    }

    match (han, latin) {
        (0, 0) => None,
        (h, l) if h * 2 >= l && h > 0 => Some(Lang::Chinese),
        _ => Some(Lang::English),
    }
}

/// Whether `text` reads as `target`. Undetectable text never matches.
pub fn is_language(text: &str, target: Lang) -> bool {
    detect_language(text) == Some(target)
}
