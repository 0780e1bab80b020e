//! Structural output checks.
//!
//! A [`Validator`] is a named list of [`Rule`]s evaluated against the JSON
//! form of a stage output. Fields are addressed with JSON pointers, so the
//! same rules work for every output shape. Extraction stages turn the first
//! violation into a hard [`ValidationError`]; generative stages keep the
//! issue list and retry.

mod text;

pub use text::{count_section_headings, count_words, markdown_title};

use crate::errors::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of checking one output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    /// Whether every rule passed.
    pub valid: bool,
    /// Human-readable issues, one per violation.
    pub issues: Vec<String>,
    /// Structured violations, parallel to `issues`.
    #[serde(skip)]
    pub violations: Vec<ValidationError>,
}

impl ValidationVerdict {
    /// A passing verdict.
    #[must_use]
    pub fn pass() -> Self {
        Self {
            valid: true,
            issues: Vec::new(),
            violations: Vec::new(),
        }
    }

    /// Builds a verdict from violations.
    #[must_use]
    pub fn from_violations(violations: Vec<ValidationError>) -> Self {
        Self {
            valid: violations.is_empty(),
            issues: violations.iter().map(ToString::to_string).collect(),
            violations,
        }
    }

    /// Merges another verdict into this one.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        self.valid &= other.valid;
        self.issues.extend(other.issues);
        self.violations.extend(other.violations);
        self
    }

    /// Number of issues.
    #[must_use]
    pub fn issue_count(&self) -> usize {
        self.issues.len()
    }
}

/// One structural check.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// Field is present, not null, and not an empty string or array.
    Required(&'static str),
    /// String field has at least `n` characters.
    MinChars(&'static str, usize),
    /// String field has at most `n` characters.
    MaxChars(&'static str, usize),
    /// String field has at least `n` words.
    MinWords(&'static str, usize),
    /// Array field has at least `n` items.
    MinItems(&'static str, usize),
    /// Array field has at most `n` items.
    MaxItems(&'static str, usize),
    /// String field is one of the allowed values.
    OneOf(&'static str, &'static [&'static str]),
    /// Markdown field opens with a `# Title` line.
    MarkdownTitle(&'static str),
    /// Markdown field has at least `n` `##` headings.
    MinHeadings(&'static str, usize),
    /// Every item of an array has a non-empty string at `field`.
    EachRequired {
        /// Pointer to the array.
        array: &'static str,
        /// Pointer inside each item.
        field: &'static str,
    },
    /// Every item of an array has a string at `field` of at most `max` chars.
    EachMaxChars {
        /// Pointer to the array.
        array: &'static str,
        /// Pointer inside each item.
        field: &'static str,
        /// Character limit.
        max: usize,
    },
    /// Every item of an array has one of the allowed values at `field`.
    EachOneOf {
        /// Pointer to the array.
        array: &'static str,
        /// Pointer inside each item.
        field: &'static str,
        /// Allowed values.
        allowed: &'static [&'static str],
    },
}

fn field_name(pointer: &str) -> String {
    pointer.trim_start_matches('/').replace('/', ".")
}

fn non_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(_) => true,
    }
}

impl Rule {
    /// Evaluates the rule, returning a violation on failure.
    #[must_use]
    pub fn check(&self, value: &Value) -> Option<ValidationError> {
        match self {
            Self::Required(ptr) => (!non_empty(value.pointer(ptr)))
                .then(|| ValidationError::new(field_name(ptr), "is required")),
            Self::MinChars(ptr, n) => {
                let len = str_at(value, ptr).map_or(0, |s| s.chars().count());
                (len < *n).then(|| {
                    ValidationError::new(
                        field_name(ptr),
                        format!("must be at least {n} characters (got {len})"),
                    )
                })
            }
            Self::MaxChars(ptr, n) => {
                let len = str_at(value, ptr).map_or(0, |s| s.chars().count());
                (len > *n).then(|| {
                    ValidationError::new(
                        field_name(ptr),
                        format!("must be at most {n} characters (got {len})"),
                    )
                })
            }
            Self::MinWords(ptr, n) => {
                let words = str_at(value, ptr).map_or(0, count_words);
                (words < *n).then(|| {
                    ValidationError::new(
                        field_name(ptr),
                        format!("must be at least {n} words (got {words})"),
                    )
                })
            }
            Self::MinItems(ptr, n) => {
                let len = array_at(value, ptr).map_or(0, Vec::len);
                (len < *n).then(|| {
                    ValidationError::new(
                        field_name(ptr),
                        format!("must have at least {n} items (got {len})"),
                    )
                })
            }
            Self::MaxItems(ptr, n) => {
                let len = array_at(value, ptr).map_or(0, Vec::len);
                (len > *n).then(|| {
                    ValidationError::new(
                        field_name(ptr),
                        format!("must have at most {n} items (got {len})"),
                    )
                })
            }
            Self::OneOf(ptr, allowed) => {
                let found = str_at(value, ptr);
                (!found.is_some_and(|s| allowed.contains(&s))).then(|| {
                    ValidationError::new(
                        field_name(ptr),
                        format!(
                            "must be one of [{}] (got {})",
                            allowed.join(", "),
                            found.unwrap_or("nothing")
                        ),
                    )
                })
            }
            Self::MarkdownTitle(ptr) => str_at(value, ptr)
                .and_then(markdown_title)
                .is_none()
                .then(|| {
                    ValidationError::new(field_name(ptr), "must open with a '# Title' line")
                }),
            Self::MinHeadings(ptr, n) => {
                let count = str_at(value, ptr).map_or(0, count_section_headings);
                (count < *n).then(|| {
                    ValidationError::new(
                        field_name(ptr),
                        format!("must have at least {n} '##' section headings (got {count})"),
                    )
                })
            }
            Self::EachRequired { array, field } => each(value, array, field, |item| {
                (!non_empty(item)).then(|| "is required".to_string())
            }),
            Self::EachMaxChars { array, field, max } => each(value, array, field, |item| {
                let len = item.and_then(Value::as_str).map_or(0, |s| s.chars().count());
                (len > *max).then(|| format!("must be at most {max} characters (got {len})"))
            }),
            Self::EachOneOf {
                array,
                field,
                allowed,
            } => each(value, array, field, |item| {
                let found = item.and_then(Value::as_str);
                (!found.is_some_and(|s| allowed.contains(&s))).then(|| {
                    format!(
                        "must be one of [{}] (got {})",
                        allowed.join(", "),
                        found.unwrap_or("nothing")
                    )
                })
            }),
        }
    }
}

fn str_at<'a>(value: &'a Value, ptr: &str) -> Option<&'a str> {
    value.pointer(ptr).and_then(Value::as_str)
}

fn array_at<'a>(value: &'a Value, ptr: &str) -> Option<&'a Vec<Value>> {
    value.pointer(ptr).and_then(Value::as_array)
}

/// Checks every item of an array, reporting the first failing index.
fn each<F>(value: &Value, array: &str, field: &str, check: F) -> Option<ValidationError>
where
    F: Fn(Option<&Value>) -> Option<String>,
{
    array_at(value, array)?
        .iter()
        .enumerate()
        .find_map(|(i, item)| {
            check(item.pointer(field)).map(|reason| {
                let inner = field_name(field);
                let path = if inner.is_empty() {
                    format!("{}[{i}]", field_name(array))
                } else {
                    format!("{}[{i}].{inner}", field_name(array))
                };
                ValidationError::new(path, reason)
            })
        })
}

/// A named set of rules for one output shape.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    name: String,
    rules: Vec<Rule>,
}

impl Validator {
    /// Creates an empty validator.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
        }
    }

    /// Adds a rule.
    #[must_use]
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Validator name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Checks a JSON value against every rule.
    #[must_use]
    pub fn check_value(&self, value: &Value) -> ValidationVerdict {
        let violations = self
            .rules
            .iter()
            .filter_map(|rule| rule.check(value))
            .collect();
        ValidationVerdict::from_violations(violations)
    }

    /// Checks any serializable output.
    #[must_use]
    pub fn check<T: Serialize>(&self, output: &T) -> ValidationVerdict {
        match serde_json::to_value(output) {
            Ok(value) => self.check_value(&value),
            Err(e) => ValidationVerdict::from_violations(vec![ValidationError::new(
                self.name.clone(),
                format!("output is not serializable: {e}"),
            )]),
        }
    }

    /// Checks an output and fails on the first violation.
    pub fn enforce<T: Serialize>(&self, output: &T) -> Result<(), ValidationError> {
        match self.check(output).violations.into_iter().next() {
            Some(violation) => Err(violation),
            None => Ok(()),
        }
    }
}
