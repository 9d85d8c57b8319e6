//! Field normaliser: OCR text → first-pass [`PattaRecord`] via ordered
//! pattern rules.
//!
//! Every field owns an ordered rule list. The first rule that matches
//! anywhere in the text decides the field and later rules are never
//! consulted, even if the winning capture turns out to be unusable.
//!
//! All matching is case-insensitive, and free-text captures never cross a
//! line break. The abbreviations `ST`, `SC`, `OTFD`, `IFR`, `CR` and `CFR`
//! are the exception: they only match in upper case, since their lower-case
//! forms are ordinary words.
//!
//! The tables are compiled once ([`PatternTable::builtin`]) and shared
//! behind an `Arc`; a [`Normalizer`] never mutates them.

use crate::output::{ClaimType, Coordinates, PattaRecord};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::sync::Arc;

// ── Pattern building blocks ──────────────────────────────────────────────

/// Optional `:`, `-` or `.` separators between a label and its value.
const SEP: &str = r"[ \t]*[:\-.]{0,2}[ \t]*";
/// A name-like value: letters (any script) and marks, spaces, dots.
const WORDS: &str = r"(\p{L}[\p{L}\p{M}. \t]*)";
/// A code-like value such as `2A` or `IV-B`.
const CODE: &str = r"([\p{L}\d][\p{L}\p{M}\d/\- \t]*)";
const DIGITS: &str = r"(\d+)";
const DATE: &str = r"(\d{1,2}[/\-]\d{1,2}[/\-]\d{2,4})\b";
const COORD: &str = r"(-?\d{1,3}(?:\.\d+)?)";
const AREA_NUMBER: &str = r"(\d[\d,]*(?:\.\d+)?)";

/// Square feet per hectare is 107 639.1; one acre is 0.404 686 ha.
const HECTARES_PER_ACRE: f64 = 0.404_686;
const HECTARES_PER_SQ_FT: f64 = 0.000_009_290_3;

fn compile(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|e| panic!("invalid built-in pattern {pattern:?}: {e}"))
}

// ── Rule types ───────────────────────────────────────────────────────────

/// String fields of [`PattaRecord`] filled by pattern rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextField {
    ClaimantName,
    FatherOrSpouse,
    CasteSt,
    Village,
    Taluk,
    District,
    SurveyOrCompartmentNo,
    SubDivision,
    DocumentNo,
    DocumentDate,
}

impl TextField {
    pub const ALL: [TextField; 10] = [
        TextField::ClaimantName,
        TextField::FatherOrSpouse,
        TextField::CasteSt,
        TextField::Village,
        TextField::Taluk,
        TextField::District,
        TextField::SurveyOrCompartmentNo,
        TextField::SubDivision,
        TextField::DocumentNo,
        TextField::DocumentDate,
    ];

    pub fn slot(self, record: &mut PattaRecord) -> &mut String {
        match self {
            TextField::ClaimantName => &mut record.claimant_name,
            TextField::FatherOrSpouse => &mut record.father_or_spouse,
            TextField::CasteSt => &mut record.caste_st,
            TextField::Village => &mut record.village,
            TextField::Taluk => &mut record.taluk,
            TextField::District => &mut record.district,
            TextField::SurveyOrCompartmentNo => &mut record.survey_or_compartment_no,
            TextField::SubDivision => &mut record.sub_division,
            TextField::DocumentNo => &mut record.document_no,
            TextField::DocumentDate => &mut record.document_date,
        }
    }
}

/// Which part of a match becomes the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// Capture group 1.
    Group,
    /// The whole match, e.g. `Scheduled Tribe`.
    Whole,
}

#[derive(Debug, Clone)]
pub struct TextRule {
    regex: Regex,
    capture: Capture,
}

impl TextRule {
    /// Compile a case-insensitive rule. `Capture::Group` patterns must
    /// contain at least one group.
    pub fn new(pattern: &str, capture: Capture) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self { regex, capture })
    }

    fn builtin(pattern: &str, capture: Capture) -> Self {
        Self {
            regex: compile(pattern),
            capture,
        }
    }

    /// The trimmed value if this rule matches `text`.
    pub fn apply(&self, text: &str) -> Option<String> {
        let caps = self.regex.captures(text)?;
        let m = match self.capture {
            Capture::Group => caps.get(1)?,
            Capture::Whole => caps.get(0)?,
        };
        Some(m.as_str().trim().to_string())
    }
}

/// A number followed (or labelled) by a unit, converted to hectares.
#[derive(Debug, Clone)]
pub struct AreaRule {
    regex: Regex,
    hectares_per_unit: f64,
}

impl AreaRule {
    pub fn new(pattern: &str, hectares_per_unit: f64) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self {
            regex,
            hectares_per_unit,
        })
    }

    fn builtin(pattern: &str, hectares_per_unit: f64) -> Self {
        Self {
            regex: compile(pattern),
            hectares_per_unit,
        }
    }
}

/// Maps a vocabulary phrase to a canonical claim type. `claim: None` derives
/// the type from the matched words.
#[derive(Debug, Clone)]
pub struct ClaimRule {
    regex: Regex,
    claim: Option<ClaimType>,
}

impl ClaimRule {
    pub fn new(pattern: &str, claim: Option<ClaimType>) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self { regex, claim })
    }

    fn builtin(pattern: &str, claim: Option<ClaimType>) -> Self {
        Self {
            regex: compile(pattern),
            claim,
        }
    }
}

/// Inclusive geographic validity box for coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Default for GeoBounds {
    /// Mainland India plus the island territories.
    fn default() -> Self {
        Self {
            min_lat: 6.0,
            max_lat: 37.0,
            min_lng: 68.0,
            max_lng: 97.0,
        }
    }
}

impl GeoBounds {
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lng..=self.max_lng).contains(&lng)
    }
}

// ── Pattern table ────────────────────────────────────────────────────────

/// Immutable rule set for every record field.
#[derive(Debug, Clone)]
pub struct PatternTable {
    text: HashMap<TextField, Vec<TextRule>>,
    latitude: Vec<TextRule>,
    longitude: Vec<TextRule>,
    area: Vec<AreaRule>,
    claim_type: Vec<ClaimRule>,
    bounds: GeoBounds,
}

static BUILTIN: Lazy<Arc<PatternTable>> = Lazy::new(|| Arc::new(PatternTable::build_builtin()));

impl PatternTable {
    /// The shared built-in table, compiled on first use.
    pub fn builtin() -> Arc<PatternTable> {
        Arc::clone(&BUILTIN)
    }

    /// Replace the rules for one text field.
    pub fn with_text_rules(mut self, field: TextField, rules: Vec<TextRule>) -> Self {
        self.text.insert(field, rules);
        self
    }

    pub fn with_area_rules(mut self, rules: Vec<AreaRule>) -> Self {
        self.area = rules;
        self
    }

    pub fn with_claim_rules(mut self, rules: Vec<ClaimRule>) -> Self {
        self.claim_type = rules;
        self
    }

    pub fn with_bounds(mut self, bounds: GeoBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn text_rules(&self, field: TextField) -> &[TextRule] {
        self.text.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn bounds(&self) -> GeoBounds {
        self.bounds
    }

    fn build_builtin() -> Self {
        use Capture::{Group, Whole};
        let label = |l: &str, value: &str| TextRule::builtin(&format!("{l}{SEP}{value}"), Group);

        let mut text = HashMap::new();
        text.insert(
            TextField::ClaimantName,
            vec![
                label(
                    r"\b(?:claimant(?:[ \t]+name)?|name[ \t]+of[ \t]+(?:the[ \t]+)?claimant|holder(?:[ \t]+name)?)\b",
                    WORDS,
                ),
                TextRule::builtin(r"(\p{L}[\p{L}\p{M}. \t]*?)[ \t]+(?:son|daughter|wife)[ \t]+of\b", Group),
                label(r"(?m)^[ \t]*name\b", WORDS),
            ],
        );
        text.insert(
            TextField::FatherOrSpouse,
            vec![
                label(r"\b(?:son|daughter|wife)[ \t]+of\b", WORDS),
                label(r"\b(?:father|mother|husband|spouse)(?:'?s)?(?:[ \t]+name)?\b", WORDS),
                label(r"\b[sdw][ \t]*/[ \t]*o\b", WORDS),
            ],
        );
        text.insert(
            TextField::CasteSt,
            vec![
                TextRule::builtin(&format!(r"\b(?:caste|community|category)[ \t]*[:\-][ \t]*{WORDS}"), Group),
                TextRule::builtin(
                    r"\bscheduled[ \t]+(?:tribes?|castes?)\b|(?-i:\b(?:ST|SC|OTFD)\b)",
                    Whole,
                ),
                label(r"\b(?:tribal|tribe)\b", WORDS),
            ],
        );
        text.insert(
            TextField::Village,
            vec![
                label(r"\b(?:village|vill|vlg)\b", WORDS),
                label(r"\bgram(?:[ \t]+panchayat)?\b", WORDS),
                label(r"\b(?:place|mouza)\b", WORDS),
            ],
        );
        text.insert(
            TextField::Taluk,
            vec![
                label(r"\b(?:taluk|taluka|taluq)\b", WORDS),
                label(r"\b(?:tehsil|tahsil|mandal|block)\b", WORDS),
            ],
        );
        text.insert(
            TextField::District,
            vec![
                label(r"\bdistrict\b", WORDS),
                label(r"\b(?:dist|zila|zilla)\b", WORDS),
            ],
        );
        text.insert(
            TextField::SurveyOrCompartmentNo,
            vec![
                label(
                    r"\b(?:survey(?:[ \t]+(?:no|number))?|s[ \t]*\.[ \t]*no|sno)\b",
                    DIGITS,
                ),
                label(r"\b(?:plot|khasra|compartment)(?:[ \t]+(?:no|number))?\b", DIGITS),
                label(r"\bpatta(?:[ \t]+(?:no|number))?\b", DIGITS),
            ],
        );
        text.insert(
            TextField::SubDivision,
            vec![
                label(r"\bsub[ \t.\-]*div(?:ision)?\b", CODE),
                label(r"\brange\b", WORDS),
            ],
        );
        text.insert(
            TextField::DocumentNo,
            vec![
                label(
                    r"\b(?:document|doc|patta|certificate|title)[ \t]*(?:no|number)\b",
                    DIGITS,
                ),
                label(r"\b(?:ref(?:erence)?|file)(?:[ \t]*(?:no|number))?\b", DIGITS),
            ],
        );
        text.insert(
            TextField::DocumentDate,
            vec![
                label(
                    r"\b(?:dated?(?:[ \t]+of[ \t]+(?:issue|grant))?|issued[ \t]+on)\b",
                    DATE,
                ),
                TextRule::builtin(&format!(r"\b{DATE}"), Group),
            ],
        );

        let latitude = vec![
            label(r"\b(?:latitude|lat)\b", COORD),
            TextRule::builtin(r"(-?\d{1,2}\.\d+)[ \t]*°?[ \t]*N\b", Group),
        ];
        let longitude = vec![
            label(r"\b(?:longitude|long|lng|lon)\b", COORD),
            TextRule::builtin(r"(-?\d{1,3}\.\d+)[ \t]*°?[ \t]*E\b", Group),
        ];

        let area = vec![
            AreaRule::builtin(&format!(r"{AREA_NUMBER}[ \t]*(?:hectares?|hect|ha)\b"), 1.0),
            AreaRule::builtin(&format!(r"{AREA_NUMBER}[ \t]*(?:acres?|ac)\b"), HECTARES_PER_ACRE),
            AreaRule::builtin(
                &format!(r"{AREA_NUMBER}[ \t]*(?:sq(?:uare)?[ \t.]*(?:ft|feet|foot))\b"),
                HECTARES_PER_SQ_FT,
            ),
            AreaRule::builtin(&format!(r"\barea\b{SEP}{AREA_NUMBER}"), 1.0),
        ];

        let claim_type = vec![
            ClaimRule::builtin(
                r"(?-i:\bIFR\b)|\bindividual[ \t]+forest[ \t]+rights?\b",
                Some(ClaimType::Ifr),
            ),
            ClaimRule::builtin(r"(?-i:\bCR\b)|\bcommunity[ \t]+rights?\b", Some(ClaimType::Cr)),
            ClaimRule::builtin(
                r"(?-i:\bCFR\b)|\bcommunity[ \t]+forest[ \t]+(?:rights?|resources?)\b",
                Some(ClaimType::Cfr),
            ),
            ClaimRule::builtin(r"\b(?:individual|community)[ \t]*(?:forest|rights?)\b", None),
        ];

        Self {
            text,
            latitude,
            longitude,
            area,
            claim_type,
            bounds: GeoBounds::default(),
        }
    }
}

/// Canonical type for a generic `individual|community forest|rights` phrase.
fn derive_claim_type(phrase: &str) -> ClaimType {
    let lower = phrase.to_lowercase();
    if lower.contains("individual") {
        ClaimType::Ifr
    } else if lower.contains("forest") {
        ClaimType::Cfr
    } else {
        ClaimType::Cr
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse::<f64>().ok()
}

fn positive(value: f64) -> Option<f64> {
    (value.is_finite() && value > 0.0).then_some(value)
}

static FIRST_NUMBER: Lazy<Regex> = Lazy::new(|| compile(AREA_NUMBER));

// ── Normaliser ───────────────────────────────────────────────────────────

/// Pure, deterministic text → record mapping over a shared [`PatternTable`].
#[derive(Debug, Clone)]
pub struct Normalizer {
    table: Arc<PatternTable>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(PatternTable::builtin())
    }
}

impl Normalizer {
    pub fn new(table: Arc<PatternTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &PatternTable {
        &self.table
    }

    /// Build a first-pass record from OCR output.
    pub fn normalize(&self, raw_text: &str, ocr_confidence: f32) -> PattaRecord {
        let mut record = PattaRecord {
            coords: self.extract_coordinates(raw_text),
            area: self.extract_area(raw_text),
            claim_type: self.extract_claim_type(raw_text),
            raw_text: raw_text.to_string(),
            ocr_confidence,
            ..Default::default()
        };
        for field in TextField::ALL {
            *field.slot(&mut record) = self.extract_text_field(field, raw_text);
        }
        record
    }

    /// Value of the first matching rule for `field`, or `""`.
    pub fn extract_text_field(&self, field: TextField, text: &str) -> String {
        first_match(self.table.text_rules(field), text).unwrap_or_default()
    }

    /// Latitude and longitude, matched independently. Emitted only when both
    /// are present and inside the bounding box.
    pub fn extract_coordinates(&self, text: &str) -> Option<Coordinates> {
        let lat = parse_number(&first_match(&self.table.latitude, text)?)?;
        let lng = parse_number(&first_match(&self.table.longitude, text)?)?;
        self.table
            .bounds
            .contains(lat, lng)
            .then_some(Coordinates { lat, lng })
    }

    /// Area in hectares from the first matching unit rule.
    pub fn extract_area(&self, text: &str) -> Option<f64> {
        let (caps, rule) = self
            .table
            .area
            .iter()
            .find_map(|rule| rule.regex.captures(text).map(|c| (c, rule)))?;
        let value = parse_number(caps.get(1)?.as_str())?;
        positive(value * rule.hectares_per_unit)
    }

    /// Area from a NER span: unit rules first, then the first bare number
    /// read as hectares.
    pub fn parse_area_value(&self, text: &str) -> Option<f64> {
        self.extract_area(text).or_else(|| {
            let m = FIRST_NUMBER.find(text)?;
            positive(parse_number(m.as_str())?)
        })
    }

    /// Canonical claim type, or [`ClaimType::Unspecified`].
    pub fn extract_claim_type(&self, text: &str) -> ClaimType {
        self.table
            .claim_type
            .iter()
            .find_map(|rule| {
                rule.regex
                    .find(text)
                    .map(|m| rule.claim.unwrap_or_else(|| derive_claim_type(m.as_str())))
            })
            .unwrap_or_default()
    }
}

fn first_match(rules: &[TextRule], text: &str) -> Option<String> {
    rules
        .iter()
        .find(|rule| rule.regex.is_match(text))
        .and_then(|rule| rule.apply(text))
}
