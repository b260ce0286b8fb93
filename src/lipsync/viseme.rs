//! The 15-symbol viseme alphabet and its phonetic classes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Visual mouth shape for a group of phonemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum Viseme {
    #[serde(rename = "sil")]
    Sil,
    PP,
    FF,
    TH,
    DD,
    #[serde(rename = "kk")]
    Kk,
    CH,
    SS,
    #[serde(rename = "nn")]
    Nn,
    RR,
    #[serde(rename = "aa")]
    Aa,
    E,
    I,
    O,
    U,
}

/// Broad phonetic category used to track the classifier's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhoneticClass {
    Silence,
    Vowel,
    Plosive,
    Fricative,
}

impl Viseme {
    /// Every symbol in scoring order; ties resolve to the earlier entry.
    pub const ALL: [Viseme; 15] = [
        Viseme::Sil,
        Viseme::PP,
        Viseme::FF,
        Viseme::TH,
        Viseme::DD,
        Viseme::Kk,
        Viseme::CH,
        Viseme::SS,
        Viseme::Nn,
        Viseme::RR,
        Viseme::Aa,
        Viseme::E,
        Viseme::I,
        Viseme::O,
        Viseme::U,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// Position in [`Viseme::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Short symbol, e.g. `"aa"` or `"PP"`.
    pub fn symbol(self) -> &'static str {
        match self {
            Viseme::Sil => "sil",
            Viseme::PP => "PP",
            Viseme::FF => "FF",
            Viseme::TH => "TH",
            Viseme::DD => "DD",
            Viseme::Kk => "kk",
            Viseme::CH => "CH",
            Viseme::SS => "SS",
            Viseme::Nn => "nn",
            Viseme::RR => "RR",
            Viseme::Aa => "aa",
            Viseme::E => "E",
            Viseme::I => "I",
            Viseme::O => "O",
            Viseme::U => "U",
        }
    }

    /// Conventional morph channel name, e.g. `"viseme_aa"`.
    pub fn channel_name(self) -> String {
        format!("viseme_{}", self.symbol())
    }

    pub fn class(self) -> PhoneticClass {
        match self {
            Viseme::Sil => PhoneticClass::Silence,
            Viseme::PP | Viseme::DD | Viseme::Kk | Viseme::Nn => PhoneticClass::Plosive,
            Viseme::FF | Viseme::TH | Viseme::CH | Viseme::SS | Viseme::RR => {
                PhoneticClass::Fricative
            }
            Viseme::Aa | Viseme::E | Viseme::I | Viseme::O | Viseme::U => PhoneticClass::Vowel,
        }
    }

    /// Vowels that open the jaw noticeably.
    pub fn is_open_vowel(self) -> bool {
        matches!(self, Viseme::Aa | Viseme::E | Viseme::O)
    }
}

impl fmt::Display for Viseme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Viseme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let symbol = s.strip_prefix("viseme_").unwrap_or(s);
        Viseme::ALL
            .into_iter()
            .find(|v| v.symbol() == symbol)
            .ok_or_else(|| format!("unknown viseme '{}'", s))
    }
}

/// One score per viseme, indexed by [`Viseme::index`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VisemeScores([f32; Viseme::COUNT]);

impl VisemeScores {
    pub fn get(&self, viseme: Viseme) -> f32 {
        self.0[viseme.index()]
    }

    pub fn set(&mut self, viseme: Viseme, score: f32) {
        self.0[viseme.index()] = score;
    }

    pub fn add(&mut self, viseme: Viseme, score: f32) {
        self.0[viseme.index()] += score;
    }

    pub fn scale(&mut self, viseme: Viseme, factor: f32) {
        self.0[viseme.index()] *= factor;
    }

    /// Highest-scoring symbol; on ties the earliest in [`Viseme::ALL`] wins.
    pub fn best(&self) -> Viseme {
        let mut best = Viseme::Sil;
        let mut best_score = f32::NEG_INFINITY;
        for viseme in Viseme::ALL {
            let score = self.get(viseme);
            if score > best_score {
                best = viseme;
                best_score = score;
            }
        }
        best
    }
}
