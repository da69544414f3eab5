//! Declarative per-field validation
//!
//! Rules are attached to fields as data: required-ness, numeric range, or a
//! custom predicate, each with an optional display name used for error
//! attribution. Accessors are plain function pointers over the concrete
//! record type, so the rule set is checked at compile time; there is no
//! reflective walk over record shapes.
//!
//! Message templates embed the subject as a `{field}` placeholder. Rendering
//! strips the subject ("{field} is required" becomes "is required") because
//! the produced [`ValidationError`] already carries the field name.

use chrono::Utc;

use crate::errors::ValidationError;
use crate::record::CandidateRecord;

/// Subject placeholder used in message templates.
pub const FIELD_PLACEHOLDER: &str = "{field}";

/// A single declarative constraint over a record of type `R`.
pub enum Constraint<R> {
    /// The accessor must return `true` for the field to count as present.
    Required(fn(&R) -> bool),
    /// The accessor's value must fall within `min..=max`.
    Range {
        min: i64,
        max: i64,
        value: fn(&R) -> i64,
    },
    /// Free-form predicate with its own message template; `true` passes.
    Custom {
        message: &'static str,
        check: fn(&R) -> bool,
    },
}

/// A constraint bound to a named field.
pub struct FieldRule<R> {
    pub field: &'static str,
    pub display_name: Option<&'static str>,
    pub constraint: Constraint<R>,
}

impl<R> FieldRule<R> {
    pub fn required(field: &'static str, present: fn(&R) -> bool) -> Self {
        Self {
            field,
            display_name: None,
            constraint: Constraint::Required(present),
        }
    }

    pub fn range(field: &'static str, min: i64, max: i64, value: fn(&R) -> i64) -> Self {
        Self {
            field,
            display_name: None,
            constraint: Constraint::Range { min, max, value },
        }
    }

    pub fn custom(field: &'static str, message: &'static str, check: fn(&R) -> bool) -> Self {
        Self {
            field,
            display_name: None,
            constraint: Constraint::Custom { message, check },
        }
    }

    pub fn with_display_name(mut self, name: &'static str) -> Self {
        self.display_name = Some(name);
        self
    }

    fn violation(&self, record: &R) -> Option<String> {
        match &self.constraint {
            Constraint::Required(present) => {
                (!present(record)).then(|| render_subject_free("{field} is required"))
            },
            Constraint::Range { min, max, value } => {
                let v = value(record);
                (v < *min || v > *max).then(|| {
                    render_subject_free(&format!("{{field}} must be between {} and {}", min, max))
                })
            },
            Constraint::Custom { message, check } => {
                (!check(record)).then(|| render_subject_free(message))
            },
        }
    }

    fn error_field_name(&self) -> &'static str {
        self.display_name.unwrap_or(self.field)
    }
}

/// Render a message template without its `{field}` subject; the subject is
/// carried separately in `ValidationError::field_name`.
fn render_subject_free(template: &str) -> String {
    template
        .replace(&format!("{FIELD_PLACEHOLDER} "), "")
        .replace(FIELD_PLACEHOLDER, "")
        .trim()
        .to_string()
}

/// An ordered set of field rules applied to each candidate record.
pub struct Validator<R> {
    rules: Vec<FieldRule<R>>,
}

impl<R> Validator<R> {
    pub fn new(rules: Vec<FieldRule<R>>) -> Self {
        Self { rules }
    }

    /// Apply every rule to `record`. An empty result means the record is
    /// valid; each violated constraint produces one error with the same row
    /// number.
    pub fn validate(&self, record: &R, row_number: u64) -> Vec<ValidationError> {
        self.rules
            .iter()
            .filter_map(|rule| {
                rule.violation(record).map(|message| {
                    ValidationError::new(row_number, message).with_field(rule.error_field_name())
                })
            })
            .collect()
    }
}

/// Default rule set for the master record shape.
pub fn master_rules() -> Validator<CandidateRecord> {
    Validator::new(vec![
        FieldRule::required("name", |r: &CandidateRecord| !r.name.trim().is_empty())
            .with_display_name("Name"),
        FieldRule::range("internet_id", 1, 99_999_999, |r: &CandidateRecord| {
            r.internet_id
        })
        .with_display_name("Internet ID"),
        FieldRule::custom(
            "created_at",
            "{field} must not be in the future",
            |r: &CandidateRecord| r.created_at <= Utc::now().naive_utc(),
        ),
    ])
}
