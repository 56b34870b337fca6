//! Parameter bundles and normalization.
//!
//! Callers hand statements either an ordered sequence of values bound to
//! `?` markers or a name-to-value mapping bound to `@name` markers. The two
//! shapes are never mixed within one statement.

use crate::types::Value;

/// Normalized parameter bundle for one statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    /// No parameters.
    #[default]
    Empty,
    /// Ordered values bound to `?` markers; nulls are preserved.
    Positional(Vec<Value>),
    /// Name-to-value mapping bound to `@name` markers. Names carry no
    /// `@` prefix. Insertion order is preserved for diagnostics.
    Named(Vec<(String, Value)>),
}

impl Params {
    /// Normalizes an ordered sequence into a positional bundle.
    pub fn positional<I>(values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        Self::Positional(values.into_iter().map(Into::into).collect())
    }

    /// Normalizes a name-keyed mapping into a named bundle.
    pub fn named<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
        )
    }

    /// Normalizes a single scalar into a positional bundle of one element.
    pub fn single(value: impl Into<Value>) -> Self {
        Self::Positional(vec![value.into()])
    }

    /// True when no parameters are carried.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Positional(values) => values.is_empty(),
            Self::Named(pairs) => pairs.is_empty(),
        }
    }

    /// Looks up a named value.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Named(pairs) => pairs.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Self::Positional(values)
    }
}

impl From<Option<Params>> for Params {
    fn from(params: Option<Params>) -> Self {
        params.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_input_is_empty() {
        assert_eq!(Params::from(None), Params::Empty);
        assert!(Params::Empty.is_empty());
    }

    #[test]
    fn sequence_becomes_positional_preserving_nulls() {
        let params = Params::positional(vec![
            Value::Text("a".into()),
            Value::Null,
            Value::Integer(3),
        ]);
        match &params {
            Params::Positional(values) => {
                assert_eq!(values.len(), 3);
                assert_eq!(values[1], Value::Null);
            }
            other => panic!("expected positional bundle, got {other:?}"),
        }
    }

    #[test]
    fn mapping_becomes_named_with_lookup() {
        let params = Params::named(vec![
            ("n", Value::Text("x".into())),
            ("r", Value::Text("admin".into())),
        ]);
        assert_eq!(params.lookup("r"), Some(&Value::Text("admin".into())));
        assert_eq!(params.lookup("missing"), None);
    }

    #[test]
    fn single_scalar_becomes_one_element_bundle() {
        let params = Params::single(7i64);
        assert_eq!(params, Params::Positional(vec![Value::Integer(7)]));
    }
}
