//! Data model shared by every pipeline stage.
//!
//! [`PattaRecord`] is the durable interchange format: its field names are the
//! canonical snake_case identifiers downstream consumers depend on, so they
//! must never be renamed.

use serde::{Deserialize, Serialize};
use std::fmt;

// ── Documents ────────────────────────────────────────────────────────────

/// How a document is turned into pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// A single PNG/JPEG scan: one page, no rasterization.
    Image,
    /// A PDF: rasterized page by page.
    Paginated,
}

/// Lifecycle of a document held by the orchestrator.
///
/// `pending → processing → completed | error`. Both terminal states are
/// final for the current attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl DocumentStatus {
    /// `true` for `completed` and `error`.
    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Error)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Terminal → pending is only reachable through an explicit requeue,
    /// which starts a new logical attempt.
    pub fn can_transition_to(self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Error)
                | (Completed, Pending)
                | (Error, Pending)
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Error => "error",
        };
        f.write_str(s)
    }
}

// ── Recognition ──────────────────────────────────────────────────────────

/// Text recognised on one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    /// 1-indexed page number.
    pub page_index: usize,
    pub text: String,
    /// 0–100.
    pub confidence: f32,
}

/// OCR output for a whole document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// Pages in page-index order.
    pub pages: Vec<PageText>,
    /// Page texts joined with `'\n'` in page-index order.
    pub full_text: String,
    /// Mean of per-page confidences, 0 when no pages were recognised.
    pub overall_confidence: f32,
}

impl RecognitionResult {
    /// Assemble the document result from per-page results.
    ///
    /// A page whose text is blank contributes a confidence of 0 to the mean,
    /// whatever the engine reported for it.
    pub fn from_pages(mut pages: Vec<PageText>) -> Self {
        pages.sort_by_key(|p| p.page_index);

        let full_text = pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let overall_confidence = if pages.is_empty() {
            0.0
        } else {
            let sum: f32 = pages.iter().map(effective_confidence).sum();
            sum / pages.len() as f32
        };

        Self {
            pages,
            full_text,
            overall_confidence,
        }
    }
}

fn effective_confidence(page: &PageText) -> f32 {
    if page.text.trim().is_empty() {
        0.0
    } else {
        page.confidence.clamp(0.0, 100.0)
    }
}

// ── Entities ─────────────────────────────────────────────────────────────

/// Label attached to an entity span by the NER service.
///
/// Unknown labels are kept as [`EntityLabel::Other`] so a new label on the
/// service side never breaks deserialisation; they are never routed to a
/// record field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityLabel {
    Person,
    Name,
    FatherSpouse,
    Org,
    Village,
    Taluk,
    District,
    SurveyNo,
    SubDiv,
    Area,
    Coords,
    ClaimType,
    DocNo,
    DocDate,
    Date,
    Cardinal,
    Quantity,
    Money,
    Percent,
    Gpe,
    Loc,
    Other(String),
}

impl EntityLabel {
    pub fn as_str(&self) -> &str {
        match self {
            EntityLabel::Person => "PERSON",
            EntityLabel::Name => "NAME",
            EntityLabel::FatherSpouse => "FATHER_SPOUSE",
            EntityLabel::Org => "ORG",
            EntityLabel::Village => "VILLAGE",
            EntityLabel::Taluk => "TALUK",
            EntityLabel::District => "DISTRICT",
            EntityLabel::SurveyNo => "SURVEY_NO",
            EntityLabel::SubDiv => "SUB_DIV",
            EntityLabel::Area => "AREA",
            EntityLabel::Coords => "COORDS",
            EntityLabel::ClaimType => "CLAIM_TYPE",
            EntityLabel::DocNo => "DOC_NO",
            EntityLabel::DocDate => "DOC_DATE",
            EntityLabel::Date => "DATE",
            EntityLabel::Cardinal => "CARDINAL",
            EntityLabel::Quantity => "QUANTITY",
            EntityLabel::Money => "MONEY",
            EntityLabel::Percent => "PERCENT",
            EntityLabel::Gpe => "GPE",
            EntityLabel::Loc => "LOC",
            EntityLabel::Other(s) => s,
        }
    }
}

impl From<String> for EntityLabel {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "PERSON" => EntityLabel::Person,
            "NAME" => EntityLabel::Name,
            "FATHER_SPOUSE" => EntityLabel::FatherSpouse,
            "ORG" => EntityLabel::Org,
            "VILLAGE" => EntityLabel::Village,
            "TALUK" => EntityLabel::Taluk,
            "DISTRICT" => EntityLabel::District,
            "SURVEY_NO" => EntityLabel::SurveyNo,
            "SUB_DIV" => EntityLabel::SubDiv,
            "AREA" => EntityLabel::Area,
            "COORDS" => EntityLabel::Coords,
            "CLAIM_TYPE" => EntityLabel::ClaimType,
            "DOC_NO" => EntityLabel::DocNo,
            "DOC_DATE" => EntityLabel::DocDate,
            "DATE" => EntityLabel::Date,
            "CARDINAL" => EntityLabel::Cardinal,
            "QUANTITY" => EntityLabel::Quantity,
            "MONEY" => EntityLabel::Money,
            "PERCENT" => EntityLabel::Percent,
            "GPE" => EntityLabel::Gpe,
            "LOC" => EntityLabel::Loc,
            _ => EntityLabel::Other(s),
        }
    }
}

impl From<EntityLabel> for String {
    fn from(label: EntityLabel) -> Self {
        label.as_str().to_string()
    }
}

impl fmt::Display for EntityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One NER output unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpan {
    pub text: String,
    pub label: EntityLabel,
    /// Character offsets into the source text.
    #[serde(default)]
    pub start: usize,
    #[serde(default)]
    pub end: usize,
    /// 0–1. Missing scores read as 0, so such spans never reach a field.
    #[serde(default)]
    pub score: f32,
}

// ── Record ───────────────────────────────────────────────────────────────

/// A point inside the deployment's geographic validity box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Canonical claim type under the Forest Rights Act.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClaimType {
    /// Individual Forest Rights.
    #[serde(rename = "IFR")]
    Ifr,
    /// Community Rights.
    #[serde(rename = "CR")]
    Cr,
    /// Community Forest Rights.
    #[serde(rename = "CFR")]
    Cfr,
    /// Not stated in the document.
    #[default]
    #[serde(rename = "")]
    Unspecified,
}

impl ClaimType {
    pub fn as_str(self) -> &'static str {
        match self {
            ClaimType::Ifr => "IFR",
            ClaimType::Cr => "CR",
            ClaimType::Cfr => "CFR",
            ClaimType::Unspecified => "",
        }
    }

    pub fn is_unspecified(self) -> bool {
        self == ClaimType::Unspecified
    }
}

impl fmt::Display for ClaimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The normalised land-rights record ("patta schema").
///
/// String fields are either empty or a trimmed, non-empty token. Missing
/// fields deserialise to their empty value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PattaRecord {
    pub claimant_name: String,
    pub father_or_spouse: String,
    pub caste_st: String,
    pub village: String,
    pub taluk: String,
    pub district: String,
    pub survey_or_compartment_no: String,
    pub sub_division: String,
    pub coords: Option<Coordinates>,
    /// Hectares.
    pub area: Option<f64>,
    pub document_no: String,
    /// Matched literal, e.g. `12/03/2019`; never reformatted.
    pub document_date: String,
    pub claim_type: ClaimType,
    pub raw_text: String,
    pub ocr_confidence: f32,
}

// ── Pipeline output ──────────────────────────────────────────────────────

/// Timings and counters for one document run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub pages: usize,
    pub entities: usize,
    pub rasterize_duration_ms: u64,
    pub ocr_duration_ms: u64,
    pub ner_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything produced for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub record: PattaRecord,
    pub recognition: RecognitionResult,
    /// Spans returned by the NER service (empty when extraction degraded).
    pub entities: Vec<EntitySpan>,
    /// Set when entity extraction failed and the record is normaliser-only.
    pub entity_error: Option<String>,
    pub stats: ExtractionStats,
}
