//! Chapter manifest parsing and normalization.
//!
//! A manifest is a loose, server-generated JSON descriptor: nearly every
//! field is optional and several carry historical alias spellings. The raw
//! shape is deserialized tolerantly ([`RawManifest`]) and then resolved
//! once into a [`ChapterManifest`] so the rest of the engine never has to
//! re-check aliases or fall back field-by-field at call sites.
use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Invalid manifest JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

// ============================================================================
// Card attribute categories
// ============================================================================

/// Card side. Asset filenames are `{side}{number}.{ext}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Front,
    Back,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Front => "front",
            Side::Back => "back",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Border color printed on a card, used as its difficulty marker.
///
/// `Purple` marks non-study cards (chapter dividers, legends); these are
/// excluded from every deck unconditionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BorderCategory {
    Green,
    Orange,
    Red,
    Purple,
}

impl BorderCategory {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "green" | "vert" => Some(Self::Green),
            "orange" => Some(Self::Orange),
            "red" | "rouge" => Some(Self::Red),
            "purple" | "violet" => Some(Self::Purple),
            _ => None,
        }
    }
}

/// Timer badge printed on a card (answer-time category).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerCategory {
    Green,
    Yellow,
    Orange,
}

impl TimerCategory {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "green" | "vert" => Some(Self::Green),
            "yellow" | "jaune" => Some(Self::Yellow),
            "orange" => Some(Self::Orange),
            _ => None,
        }
    }
}

// ============================================================================
// Raw (wire) shape
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDimensions {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Per-card entry as it appears on the wire. Dimensions may be given at the
/// card level or per side; the per-side form wins.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCardMeta {
    pub border: Option<String>,
    pub timer: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub front: Option<RawDimensions>,
    pub back: Option<RawDimensions>,
}

/// Format hints block: `{front?, back?, default?}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormats {
    pub front: Option<String>,
    pub back: Option<String>,
    pub default: Option<String>,
}

/// Chapter-wide default dimensions: either `{width, height}` directly or
/// nested under a `front` key (older manifests).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawCardDimensions {
    Flat { width: u32, height: u32 },
    Nested { front: RawDimensions },
}

/// The manifest exactly as served. Every field is optional; unknown fields
/// are ignored. Aliased fields are kept separate here and resolved during
/// normalization so a manifest carrying several spellings still parses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawManifest {
    pub total_cards: Option<u32>,
    #[serde(default)]
    pub per_card: HashMap<String, RawCardMeta>,
    #[serde(default)]
    pub cards_by_border: HashMap<String, Vec<u32>>,
    #[serde(default)]
    pub cards_by_timer: HashMap<String, Vec<u32>>,
    pub image_formats: Option<RawFormats>,
    pub formats: Option<RawFormats>,
    pub image_format: Option<String>,
    pub card_dimensions: Option<RawCardDimensions>,
    // Version/cache-bust token aliases, in precedence order.
    pub version: Option<serde_json::Value>,
    pub cache_bust: Option<serde_json::Value>,
    pub cachebust: Option<serde_json::Value>,
    pub v: Option<serde_json::Value>,
    pub build: Option<serde_json::Value>,
}

// ============================================================================
// Normalized shape
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Fully resolved per-card metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CardMeta {
    pub border: Option<BorderCategory>,
    pub timer: Option<TimerCategory>,
    pub front_dims: Option<Dimensions>,
    pub back_dims: Option<Dimensions>,
}

/// Resolved image-format hints. `for_side` applies the side-specific hint
/// first, then the chapter default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatHints {
    pub front: Option<String>,
    pub back: Option<String>,
    pub default: Option<String>,
}

impl FormatHints {
    /// Ordered format preferences for one side (side-specific, then default).
    pub fn for_side(&self, side: Side) -> Vec<&str> {
        let side_hint = match side {
            Side::Front => self.front.as_deref(),
            Side::Back => self.back.as_deref(),
        };
        let mut out = Vec::new();
        if let Some(f) = side_hint {
            out.push(f);
        }
        if let Some(f) = self.default.as_deref() {
            if !out.contains(&f) {
                out.push(f);
            }
        }
        out
    }
}

/// Normalized chapter manifest: aliases resolved, aggregate category lists
/// folded into per-card metadata, version token extracted.
#[derive(Debug, Clone, Default)]
pub struct ChapterManifest {
    pub total_cards: Option<u32>,
    pub cards: HashMap<u32, CardMeta>,
    pub formats: FormatHints,
    pub default_dims: Option<Dimensions>,
    pub version: Option<String>,
}

impl ChapterManifest {
    /// Parse manifest JSON and normalize it in one step.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ManifestError> {
        let raw: RawManifest = serde_json::from_slice(bytes)?;
        Ok(Self::from_raw(raw))
    }

    pub fn from_raw(raw: RawManifest) -> Self {
        let mut cards: HashMap<u32, CardMeta> = HashMap::new();

        for (key, meta) in &raw.per_card {
            let Ok(number) = key.parse::<u32>() else {
                tracing::debug!(key = %key, "Non-numeric per_card key in manifest, ignoring");
                continue;
            };
            if number == 0 {
                continue;
            }
            let entry = cards.entry(number).or_default();
            entry.border = meta.border.as_deref().and_then(BorderCategory::parse);
            entry.timer = meta.timer.as_deref().and_then(TimerCategory::parse);
            let card_level = dims_from(meta.width, meta.height);
            entry.front_dims = meta
                .front
                .as_ref()
                .and_then(|d| dims_from(d.width, d.height))
                .or(card_level);
            entry.back_dims = meta
                .back
                .as_ref()
                .and_then(|d| dims_from(d.width, d.height))
                .or(card_level);
        }

        // Aggregate lists are the older representation; per-card data wins
        // where both are present.
        for (category, numbers) in &raw.cards_by_border {
            let Some(border) = BorderCategory::parse(category) else {
                continue;
            };
            for &n in numbers {
                let entry = cards.entry(n).or_default();
                if entry.border.is_none() {
                    entry.border = Some(border);
                }
            }
        }
        for (category, numbers) in &raw.cards_by_timer {
            let Some(timer) = TimerCategory::parse(category) else {
                continue;
            };
            for &n in numbers {
                let entry = cards.entry(n).or_default();
                if entry.timer.is_none() {
                    entry.timer = Some(timer);
                }
            }
        }

        // `image_formats` and `formats` are aliases; the singular
        // `image_format` is the oldest spelling and only sets the default.
        let mut formats = raw
            .image_formats
            .or(raw.formats)
            .map(|f| FormatHints {
                front: normalize_ext(f.front),
                back: normalize_ext(f.back),
                default: normalize_ext(f.default),
            })
            .unwrap_or_default();
        if formats.default.is_none() {
            formats.default = normalize_ext(raw.image_format);
        }

        let default_dims = raw.card_dimensions.and_then(|d| match d {
            RawCardDimensions::Flat { width, height } => Some(Dimensions { width, height }),
            RawCardDimensions::Nested { front } => dims_from(front.width, front.height),
        });

        // First non-empty alias wins.
        let version = [raw.version, raw.cache_bust, raw.cachebust, raw.v, raw.build]
            .into_iter()
            .flatten()
            .find_map(version_token);

        ChapterManifest {
            total_cards: raw.total_cards,
            cards,
            formats,
            default_dims,
            version,
        }
    }

    /// Resolved dimensions for one side of a card: per-side, then per-card,
    /// then chapter default.
    pub fn dimensions_for(&self, side: Side, number: u32) -> Option<Dimensions> {
        let per_card = self.cards.get(&number).and_then(|m| match side {
            Side::Front => m.front_dims,
            Side::Back => m.back_dims,
        });
        per_card.or(self.default_dims)
    }

    pub fn meta_for(&self, number: u32) -> Option<&CardMeta> {
        self.cards.get(&number)
    }
}

fn dims_from(width: Option<u32>, height: Option<u32>) -> Option<Dimensions> {
    match (width, height) {
        (Some(width), Some(height)) => Some(Dimensions { width, height }),
        _ => None,
    }
}

/// Lowercase an extension hint and strip a leading dot. Empty hints are
/// treated as absent.
fn normalize_ext(ext: Option<String>) -> Option<String> {
    let ext = ext?;
    let trimmed = ext.trim().trim_start_matches('.').to_ascii_lowercase();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Extract a usable version token from a JSON value. Strings must be
/// non-empty after trimming; numbers are stringified.
fn version_token(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================
