//! Shared value types for morpheme evidence.
//!
//! A [`Morpheme`] identifies a lexical unit by base form, part-of-speech tags
//! and reading. The inflected form is carried along for display but never
//! takes part in equality or hashing, so `歩い` and `歩く` collapse into the
//! same entry when their base, tags and reading agree.
//!
//! A [`Location`] records one place a morpheme was observed. Every variant
//! exposes a maturity (how well the surrounding material is known) and a
//! weight (how much the occurrence counts towards frequency).
//!
//! ```rust
//! use morph_types::{Location, Morpheme};
//!
//! let walked = Morpheme::new("歩く", "歩い", "動詞", "自立", "アルク");
//! let walk = Morpheme::new("歩く", "歩く", "動詞", "自立", "アルク");
//! assert_eq!(walked, walk);
//!
//! let loc = Location::text_file("story.txt", 3, 21);
//! assert_eq!(loc.to_string(), "story.txt:3@21");
//! assert_eq!(loc.weight(), 1);
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Tag used for part-of-speech fields an analyzer cannot (or does not) fill.
pub const UNKNOWN_TAG: &str = "UNKNOWN";

/// Part-of-speech tag attached to single-character CJK morphemes.
pub const CJK_CHAR_TAG: &str = "CJK_CHAR";

/// Lexical unit produced by an analyzer.
///
/// Fields mirror the classic tagger output order:
/// `base  inflected  pos  sub_pos  reading`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Morpheme {
    base: String,
    inflected: String,
    pos: String,
    sub_pos: String,
    reading: String,
}

impl Morpheme {
    pub fn new(
        base: impl Into<String>,
        inflected: impl Into<String>,
        pos: impl Into<String>,
        sub_pos: impl Into<String>,
        reading: impl Into<String>,
    ) -> Self {
        Self {
            base: base.into(),
            inflected: inflected.into(),
            pos: pos.into(),
            sub_pos: sub_pos.into(),
            reading: reading.into(),
        }
    }

    /// Morpheme standing for a literal string, with both tags set to [`UNKNOWN_TAG`].
    pub fn literal(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            base: text.clone(),
            inflected: text.clone(),
            pos: UNKNOWN_TAG.to_string(),
            sub_pos: UNKNOWN_TAG.to_string(),
            reading: text,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn inflected(&self) -> &str {
        &self.inflected
    }

    pub fn pos(&self) -> &str {
        &self.pos
    }

    pub fn sub_pos(&self) -> &str {
        &self.sub_pos
    }

    pub fn reading(&self) -> &str {
        &self.reading
    }

    /// Copy of this morpheme with a different reading.
    pub fn with_reading(&self, reading: impl Into<String>) -> Self {
        Self {
            reading: reading.into(),
            ..self.clone()
        }
    }

    /// Tab separated `base pos sub_pos reading`, the identity-bearing fields.
    pub fn show(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}",
            self.base, self.pos, self.sub_pos, self.reading
        )
    }
}

impl PartialEq for Morpheme {
    fn eq(&self, other: &Self) -> bool {
        self.pos == other.pos
            && self.sub_pos == other.sub_pos
            && self.reading == other.reading
            && self.base == other.base
    }
}

impl Eq for Morpheme {}

impl Hash for Morpheme {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pos.hash(state);
        self.sub_pos.hash(state);
        self.reading.hash(state);
        self.base.hash(state);
    }
}

impl fmt::Display for Morpheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.show())
    }
}

/// Render a morpheme list one per line, as used by textual reports.
pub fn show_morphemes<'a>(morphemes: impl IntoIterator<Item = &'a Morpheme>) -> String {
    morphemes
        .into_iter()
        .map(Morpheme::show)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Identity of a flashcard field: `(note_id, guid, field_name)`.
pub type FactId = (i64, String, String);

/// One note field a morpheme was found in, with per-card maturities.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeckField {
    pub note_id: i64,
    /// Field name such as `Expression`.
    pub field_name: String,
    pub field_value: String,
    pub guid: String,
    /// One entry per card of the note (typically the review interval).
    pub maturities: Vec<u32>,
    pub weight: u32,
}

impl DeckField {
    pub fn new(
        note_id: i64,
        field_name: impl Into<String>,
        field_value: impl Into<String>,
        guid: impl Into<String>,
        maturities: Vec<u32>,
    ) -> Self {
        Self {
            note_id,
            field_name: field_name.into(),
            field_value: field_value.into(),
            guid: guid.into(),
            maturities,
            weight: 1,
        }
    }

    /// Highest card maturity, or 0 for a note without cards.
    pub fn maturity(&self) -> u32 {
        self.maturities.iter().copied().max().unwrap_or(0)
    }

    pub fn fact_id(&self) -> FactId {
        (self.note_id, self.guid.clone(), self.field_name.clone())
    }
}

/// Where a morpheme was observed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Location {
    /// Placeholder without positional information.
    Nowhere { maturity: u32, weight: u32 },
    /// Frequency-only evidence from an external corpus. Maturity is always 0.
    Corpus { name: String, weight: u32 },
    /// A line of a plain text file; `line` is 1-indexed.
    TextFile {
        path: PathBuf,
        line: usize,
        maturity: u32,
        weight: u32,
    },
    DeckField(DeckField),
}

impl Location {
    pub fn nowhere(maturity: u32, weight: u32) -> Self {
        Location::Nowhere { maturity, weight }
    }

    pub fn corpus(name: impl Into<String>, weight: u32) -> Self {
        Location::Corpus {
            name: name.into(),
            weight,
        }
    }

    pub fn text_file(path: impl AsRef<Path>, line: usize, maturity: u32) -> Self {
        Location::TextFile {
            path: path.as_ref().to_path_buf(),
            line,
            maturity,
            weight: 1,
        }
    }

    pub fn maturity(&self) -> u32 {
        match self {
            Location::Nowhere { maturity, .. } => *maturity,
            Location::Corpus { .. } => 0,
            Location::TextFile { maturity, .. } => *maturity,
            Location::DeckField(field) => field.maturity(),
        }
    }

    pub fn weight(&self) -> u32 {
        match self {
            Location::Nowhere { weight, .. }
            | Location::Corpus { weight, .. }
            | Location::TextFile { weight, .. } => *weight,
            Location::DeckField(field) => field.weight,
        }
    }

    /// Fact identity for flashcard locations; `None` for every other variant.
    pub fn fact_id(&self) -> Option<FactId> {
        match self {
            Location::DeckField(field) => Some(field.fact_id()),
            _ => None,
        }
    }
}

impl From<DeckField> for Location {
    fn from(field: DeckField) -> Self {
        Location::DeckField(field)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Nowhere { maturity, .. } => write!(f, "nowhere@{maturity}"),
            Location::Corpus { name, weight } => write!(f, "{name}*{weight}@0"),
            Location::TextFile {
                path,
                line,
                maturity,
                ..
            } => write!(f, "{}:{line}@{maturity}", path.display()),
            Location::DeckField(field) => write!(
                f,
                "{}[{}]@{}",
                field.note_id,
                field.field_name,
                field.maturity()
            ),
        }
    }
}
