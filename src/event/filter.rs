//! Predicate-based event filters.
//!
//! A filter bundles an event type with zero or more field predicates. Each
//! predicate names an extractor, applies it to a candidate event, and
//! compares the extracted value against an expected one; the filter matches
//! only if every predicate holds. An empty filter matches every event of
//! its type — the broad-observation case.
//!
//! Filters are built once and immutable thereafter. Two filters are equal
//! when they inspect the same event type with the same
//! `(extractor, expected value)` pairs; subscription removal matches on
//! this equality, not on closure identity.

use std::any::TypeId;
use std::fmt;
use std::rc::Rc;

/// A field value extracted from an event for predicate comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// A boolean field.
    Bool(bool),
    /// An integer field.
    Int(i64),
    /// A floating-point field.
    Float(f64),
    /// A string field.
    Str(String),
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
        }
    }
}

struct Predicate<E> {
    extractor_id: String,
    extract: Rc<dyn Fn(&E) -> FieldValue>,
    expected: FieldValue,
}

impl<E> Clone for Predicate<E> {
    fn clone(&self) -> Self {
        Self {
            extractor_id: self.extractor_id.clone(),
            extract: Rc::clone(&self.extract),
            expected: self.expected.clone(),
        }
    }
}

/// A filter determining which published events of type `E` reach a
/// subscriber.
///
/// # Examples
///
/// ```
/// use nucleus::{EventFilter, FieldValue};
///
/// struct Infection { region: u64, severe: bool }
///
/// let filter = EventFilter::<Infection>::builder()
///     .field("region", |e: &Infection| FieldValue::Int(e.region as i64), 3i64)
///     .field("severe", |e: &Infection| FieldValue::Bool(e.severe), true)
///     .build();
///
/// assert!(filter.matches(&Infection { region: 3, severe: true }));
/// assert!(!filter.matches(&Infection { region: 3, severe: false }));
/// ```
pub struct EventFilter<E> {
    predicates: Vec<Predicate<E>>,
}

impl<E> Clone for EventFilter<E> {
    fn clone(&self) -> Self {
        Self {
            predicates: self.predicates.clone(),
        }
    }
}

impl<E: 'static> EventFilter<E> {
    /// Starts building a filter for events of type `E`.
    #[must_use]
    pub fn builder() -> EventFilterBuilder<E> {
        EventFilterBuilder {
            predicates: Vec::new(),
        }
    }

    /// A filter with no predicates: matches every event of type `E`.
    #[must_use]
    pub fn any() -> Self {
        Self {
            predicates: Vec::new(),
        }
    }

    /// Whether the given event satisfies every predicate.
    #[must_use]
    pub fn matches(&self, event: &E) -> bool {
        self.predicates
            .iter()
            .all(|p| (p.extract)(event) == p.expected)
    }

    /// Number of predicates.
    #[must_use]
    pub fn predicate_count(&self) -> usize {
        self.predicates.len()
    }

    /// The filter's value identity, used for subscription removal.
    pub(crate) fn spec(&self) -> FilterSpec {
        let mut terms: Vec<(String, FieldValue)> = self
            .predicates
            .iter()
            .map(|p| (p.extractor_id.clone(), p.expected.clone()))
            .collect();
        terms.sort_by(|a, b| a.0.cmp(&b.0));
        FilterSpec {
            event_type: TypeId::of::<E>(),
            terms,
        }
    }
}

/// Builder for [`EventFilter`].
pub struct EventFilterBuilder<E> {
    predicates: Vec<Predicate<E>>,
}

impl<E: 'static> EventFilterBuilder<E> {
    /// Adds a predicate: the extractor, applied to a candidate event, must
    /// equal the expected value.
    ///
    /// `extractor_id` names the extractor for filter-equality purposes; two
    /// predicates with the same id are assumed to extract the same field.
    #[must_use]
    pub fn field(
        mut self,
        extractor_id: impl Into<String>,
        extract: impl Fn(&E) -> FieldValue + 'static,
        expected: impl Into<FieldValue>,
    ) -> Self {
        self.predicates.push(Predicate {
            extractor_id: extractor_id.into(),
            extract: Rc::new(extract),
            expected: expected.into(),
        });
        self
    }

    /// Finalizes the filter.
    #[must_use]
    pub fn build(self) -> EventFilter<E> {
        EventFilter {
            predicates: self.predicates,
        }
    }
}

/// Type-erased filter identity: event type plus sorted
/// `(extractor, expected)` terms.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FilterSpec {
    pub(crate) event_type: TypeId,
    pub(crate) terms: Vec<(String, FieldValue)>,
}
