//! Fusion: merge NER spans into the normaliser's record.
//!
//! Spans scoring 0.7 or less are ignored. A qualifying span fills its
//! target field when the field is still empty, and overwrites an existing
//! value only when it scores above 0.8. Spans are applied in input order,
//! so among overwriting spans for the same field the last one wins.
//!
//! Structured targets are re-validated: `COORDS` text goes back through the
//! normaliser's coordinate rules (and its bounding box), `AREA` text through
//! the area rules, `CLAIM_TYPE` text through the claim vocabulary. Spans that
//! fail validation are dropped.

use crate::output::{EntityLabel, EntitySpan, PattaRecord};
use crate::pipeline::normalize::{Normalizer, TextField};
use tracing::debug;

/// Spans must score strictly above this to be considered.
pub const MIN_SPAN_SCORE: f32 = 0.7;

/// Spans scoring strictly above this overwrite non-empty fields.
pub const OVERWRITE_SCORE: f32 = 0.8;

/// Record field a span label is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetField {
    Text(TextField),
    Area,
    Coords,
    ClaimType,
}

/// The label → field table. Labels not listed here never touch the record.
pub fn target_for(label: &EntityLabel) -> Option<TargetField> {
    use EntityLabel as L;
    use TargetField::Text;
    let target = match label {
        L::Person | L::Name => Text(TextField::ClaimantName),
        L::FatherSpouse => Text(TextField::FatherOrSpouse),
        L::Village => Text(TextField::Village),
        L::Taluk => Text(TextField::Taluk),
        L::District => Text(TextField::District),
        L::SurveyNo => Text(TextField::SurveyOrCompartmentNo),
        L::SubDiv => Text(TextField::SubDivision),
        L::DocNo => Text(TextField::DocumentNo),
        L::DocDate => Text(TextField::DocumentDate),
        L::Area => TargetField::Area,
        L::Coords => TargetField::Coords,
        L::ClaimType => TargetField::ClaimType,
        L::Org
        | L::Date
        | L::Cardinal
        | L::Quantity
        | L::Money
        | L::Percent
        | L::Gpe
        | L::Loc
        | L::Other(_) => return None,
    };
    Some(target)
}

/// Deterministic merge of spans into a record.
#[derive(Debug, Clone, Default)]
pub struct FusionEngine {
    normalizer: Normalizer,
}

impl FusionEngine {
    pub fn new(normalizer: Normalizer) -> Self {
        Self { normalizer }
    }

    pub fn merge(&self, mut record: PattaRecord, spans: &[EntitySpan]) -> PattaRecord {
        for span in spans {
            // `!(a > b)` also rejects NaN scores.
            if !(span.score > MIN_SPAN_SCORE) {
                continue;
            }
            let Some(target) = target_for(&span.label) else {
                continue;
            };
            let text = span.text.trim();
            if text.is_empty() {
                continue;
            }
            let overwrite = span.score > OVERWRITE_SCORE;

            match target {
                TargetField::Text(field) => {
                    let slot = field.slot(&mut record);
                    if slot.is_empty() || overwrite {
                        *slot = text.to_string();
                    }
                }
                TargetField::Area => match self.normalizer.parse_area_value(text) {
                    Some(area) if record.area.is_none() || overwrite => record.area = Some(area),
                    Some(_) => {}
                    None => debug!("Discarding unparsable AREA span '{}'", text),
                },
                TargetField::Coords => match self.normalizer.extract_coordinates(text) {
                    Some(coords) if record.coords.is_none() || overwrite => {
                        record.coords = Some(coords)
                    }
                    Some(_) => {}
                    None => debug!("Discarding COORDS span '{}'", text),
                },
                TargetField::ClaimType => {
                    let claim = self.normalizer.extract_claim_type(text);
                    if claim.is_unspecified() {
                        debug!("Discarding unrecognised CLAIM_TYPE span '{}'", text);
                    } else if record.claim_type.is_unspecified() || overwrite {
                        record.claim_type = claim;
                    }
                }
            }
        }
        record
    }
}
