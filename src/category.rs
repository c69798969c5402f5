use anyhow::{Context, Result};
use regex::Regex;

use crate::util::round2;

/// Fixed taxonomy. Declaration order is the tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Water,
    Garbage,
    Road,
    Electricity,
    Sewage,
    Noise,
    Park,
    Other,
}

pub const TAXONOMY: &[Category] = &[
    Category::Water,
    Category::Garbage,
    Category::Road,
    Category::Electricity,
    Category::Sewage,
    Category::Noise,
    Category::Park,
    Category::Other,
];

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Water => "WATER",
            Self::Garbage => "GARBAGE",
            Self::Road => "ROAD",
            Self::Electricity => "ELECTRICITY",
            Self::Sewage => "SEWAGE",
            Self::Noise => "NOISE",
            Self::Park => "PARK",
            Self::Other => "OTHER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "WATER" => Some(Self::Water),
            "GARBAGE" => Some(Self::Garbage),
            "ROAD" => Some(Self::Road),
            "ELECTRICITY" => Some(Self::Electricity),
            "SEWAGE" => Some(Self::Sewage),
            "NOISE" => Some(Self::Noise),
            "PARK" => Some(Self::Park),
            "OTHER" => Some(Self::Other),
            _ => None,
        }
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Water => &[
                "water supply", "drinking water", "water tanker", "water pipeline", "tap water",
                "borewell", "hand pump", "tube well", "water leakage", "leaking pipe",
                "contaminated water", "dirty water", "no water", "low pressure", "water bill",
            ],
            Self::Garbage => &[
                "garbage", "trash", "waste collection", "solid waste", "dump", "dustbin",
                "litter", "sweeping", "rubbish", "debris", "landfill", "door to door collection",
                "cleanliness", "garbage truck", "compost",
            ],
            Self::Road => &[
                "pothole", "road condition", "road repair", "footpath", "pavement",
                "speed breaker", "divider", "road construction", "bridge", "zebra crossing",
                "road widening", "service lane", "encroachment", "damaged road", "broken road",
            ],
            Self::Electricity => &[
                "electricity", "power cut", "power supply", "streetlight", "street light",
                "transformer", "voltage", "electric pole", "hanging wire", "electric meter",
                "load shedding", "short circuit", "power outage", "street lamp", "electric shock",
            ],
            Self::Sewage => &[
                "sewage", "sewer", "drainage", "drain", "manhole", "gutter", "overflow",
                "blockage", "choked", "septic tank", "waste water", "storm water", "stagnant",
                "foul smell", "open drain",
            ],
            Self::Noise => &[
                "noise", "loudspeaker", "loud music", "honking", "dj", "sound pollution",
                "late night party", "construction noise", "generator noise", "factory noise",
                "barking", "siren", "firecracker", "disturbance", "loud",
            ],
            Self::Park => &[
                "park", "garden", "playground", "jogging track", "swing", "bench", "lawn",
                "plantation", "tree cutting", "tree trimming", "greenery", "horticulture",
                "open gym", "boundary wall of park", "grass",
            ],
            Self::Other => &[],
        }
    }
}

/// Keyword-bag classification over the raw text. Highest substring-match
/// count wins, ties break in taxonomy order, zero matches is OTHER.
/// Confidence is `min(count / 3, 1.0)` rounded to two decimals.
pub fn detect_category(text: &str) -> (Category, f64) {
    let lowered = text.to_lowercase();

    let mut best = Category::Other;
    let mut best_count = 0usize;
    for category in TAXONOMY {
        let count = category
            .keywords()
            .iter()
            .filter(|keyword| lowered.contains(*keyword))
            .count();
        if count > best_count {
            best = *category;
            best_count = count;
        }
    }

    if best_count == 0 {
        return (Category::Other, 0.0);
    }

    let confidence = round2((best_count as f64 / 3.0).min(1.0));
    (best, confidence)
}

/// Best-effort locality extraction. First matching pattern wins; the
/// returned form is lower-cased with collapsed spacing so it can serve
/// as a case-insensitive filter key.
#[derive(Debug)]
pub struct AreaExtractor {
    patterns: Vec<Regex>,
}

impl AreaExtractor {
    pub fn new() -> Result<Self> {
        let patterns = [
            r"(?i)\b(sector)[\s\-]*(\d+[a-z]?)\b",
            r"(?i)\b(ward)[\s\-]*(?:no\.?\s*)?(\d+)\b",
            r"(?i)\b(block)[\s\-]*([a-z]|\d+)\b",
            r"(?i)\b(zone)[\s\-]*([a-z]|\d+)\b",
            r"(?i)\b(colony|village|mohalla|nagar)\s+([a-z]+(?:\s+[a-z]+)?)\b",
        ];

        Ok(Self {
            patterns: patterns
                .iter()
                .map(|pattern| {
                    Regex::new(pattern)
                        .with_context(|| format!("failed to compile area pattern: {pattern}"))
                })
                .collect::<Result<Vec<Regex>>>()?,
        })
    }

    pub fn extract_area(&self, text: &str) -> Option<String> {
        for pattern in &self.patterns {
            if let Some(captures) = pattern.captures(text) {
                let kind = captures.get(1)?.as_str().to_lowercase();
                let label = captures.get(2)?.as_str().to_lowercase();
                return Some(format!("{kind} {label}"));
            }
        }
        None
    }
}
