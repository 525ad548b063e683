//! Series attributes and measurement context.

use metrics::Label;

/// The set of labels identifying one histogram series.
///
/// Labels are kept ordered by key, and a key appears at most once: when built from labels that
/// repeat a key, the last one wins.  Two attribute sets built from the same labels in a different
/// order are therefore equal and hash identically.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Attributes(Vec<Label>);

impl Attributes {
    /// Creates an empty attribute set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Gets the number of labels.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no labels.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the labels in key order.
    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.0.iter()
    }

    /// Gets the value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .binary_search_by(|label| label.key().cmp(key))
            .ok()
            .map(|idx| self.0[idx].value())
    }

    /// Gets the labels whose keys do not appear in `other`.
    pub fn difference(&self, other: &Attributes) -> Attributes {
        Attributes(self.0.iter().filter(|label| other.get(label.key()).is_none()).cloned().collect())
    }
}

impl FromIterator<Label> for Attributes {
    fn from_iter<I: IntoIterator<Item = Label>>(iter: I) -> Self {
        let mut labels: Vec<Label> = iter.into_iter().collect();
        // A stable sort keeps duplicates in insertion order, so keeping the last of each run
        // keeps the label given last.
        labels.sort_by(|a, b| a.key().cmp(b.key()));
        labels.reverse();
        labels.dedup_by(|a, b| a.key() == b.key());
        labels.reverse();
        Attributes(labels)
    }
}

impl From<Vec<Label>> for Attributes {
    fn from(labels: Vec<Label>) -> Self {
        labels.into_iter().collect()
    }
}

impl<'a> From<&'a [(&'static str, &'static str)]> for Attributes {
    fn from(pairs: &'a [(&'static str, &'static str)]) -> Self {
        pairs.iter().map(|(key, value)| Label::new(*key, *value)).collect()
    }
}

impl<'a> IntoIterator for &'a Attributes {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Identifies the span a measurement was taken in.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SpanContext {
    /// Trace identifier.
    pub trace_id: [u8; 16],
    /// Span identifier.
    pub span_id: [u8; 8],
    /// Whether the trace is sampled.
    pub sampled: bool,
}

/// Context a measurement is recorded in.
///
/// Only carries what exemplar sampling needs: the current span, if there is one.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Context {
    span_context: Option<SpanContext>,
}

impl Context {
    /// Creates a context with no span.
    pub fn none() -> Self {
        Self::default()
    }

    /// Creates a context within the given span.
    pub fn with_span(span_context: SpanContext) -> Self {
        Self { span_context: Some(span_context) }
    }

    /// Gets the span of this context, if any.
    pub fn span_context(&self) -> Option<&SpanContext> {
        self.span_context.as_ref()
    }

    /// Returns `true` if the context belongs to a sampled trace.
    pub fn is_sampled(&self) -> bool {
        self.span_context.map_or(false, |span| span.sampled)
    }
}

#[cfg(test)]
mod tests {
    use super::{Attributes, Context, SpanContext};
    use metrics::Label;

    #[test]
    fn test_order_independent() {
        let a = Attributes::from(&[("service", "api"), ("region", "eu")][..]);
        let b = Attributes::from(&[("region", "eu"), ("service", "api")][..]);
        assert_eq!(a, b);
        assert_eq!(a.iter().map(|l| l.key()).collect::<Vec<_>>(), vec!["region", "service"]);
    }

    #[test]
    fn test_last_duplicate_wins() {
        let attrs: Attributes =
            vec![Label::new("a", "1"), Label::new("b", "2"), Label::new("a", "3")].into();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs.get("a"), Some("3"));
        assert_eq!(attrs.get("b"), Some("2"));
        assert_eq!(attrs.get("c"), None);
    }

    #[test]
    fn test_difference() {
        let measurement = Attributes::from(&[("route", "/"), ("user", "42"), ("method", "GET")][..]);
        let series = Attributes::from(&[("route", "/"), ("method", "POST")][..]);
        let filtered = measurement.difference(&series);
        assert_eq!(filtered, Attributes::from(&[("user", "42")][..]));
        assert!(Attributes::empty().difference(&series).is_empty());
    }

    #[test]
    fn test_context_sampling() {
        assert!(!Context::none().is_sampled());
        let span = SpanContext { trace_id: [1; 16], span_id: [2; 8], sampled: true };
        assert!(Context::with_span(span).is_sampled());
        let unsampled = SpanContext { sampled: false, ..span };
        assert!(!Context::with_span(unsampled).is_sampled());
    }
}
