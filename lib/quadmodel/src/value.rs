use oxsdatatypes::DateTime;
use std::fmt::{self, Write};
use std::hash::{Hash, Hasher};
use std::mem::discriminant;

/// The externally typed form of a graph node.
///
/// The default string formatter returns an N-Quads-like representation:
/// ```
/// use quadmodel::Value;
///
/// assert_eq!("<http://example.com/foo>", Value::Iri("http://example.com/foo".into()).to_string());
/// assert_eq!("\"hello\"@en", Value::LangString { value: "hello".into(), lang: "en".into() }.to_string());
/// assert_eq!("42", Value::Int(42).to_string());
/// ```
///
/// Equality and hashing of [`Value::Float`] are bitwise on the IEEE-754
/// representation, so `NaN == NaN` here and `0.0 != -0.0`.
#[derive(Debug, Clone)]
pub enum Value {
    /// An IRI reference
    Iri(String),
    /// A blank node, identified by its local name
    BNode(String),
    /// A plain string literal
    String(String),
    /// A string literal with a language tag
    LangString { value: String, lang: String },
    /// A string literal with an explicit datatype IRI
    TypedString { value: String, datatype: String },
    /// A 64-bit signed integer
    Int(i64),
    /// A 64-bit float
    Float(f64),
    /// A boolean
    Bool(bool),
    /// A timestamp
    Time(DateTime),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Iri(a), Self::Iri(b))
            | (Self::BNode(a), Self::BNode(b))
            | (Self::String(a), Self::String(b)) => a == b,
            (
                Self::LangString { value: a, lang: al },
                Self::LangString { value: b, lang: bl },
            ) => a == b && al == bl,
            (
                Self::TypedString {
                    value: a,
                    datatype: ad,
                },
                Self::TypedString {
                    value: b,
                    datatype: bd,
                },
            ) => a == b && ad == bd,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Time(a), Self::Time(b)) => a == b,
            (_, _) => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        discriminant(self).hash(state);
        match self {
            Self::Iri(s) | Self::BNode(s) | Self::String(s) => s.hash(state),
            Self::LangString { value, lang } => {
                value.hash(state);
                lang.hash(state);
            }
            Self::TypedString { value, datatype } => {
                value.hash(state);
                datatype.hash(state);
            }
            Self::Int(i) => i.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::Bool(b) => b.hash(state),
            Self::Time(t) => t.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Iri(iri) => write!(f, "<{iri}>"),
            Self::BNode(name) => write!(f, "_:{name}"),
            Self::String(value) => print_quoted_str(value, f),
            Self::LangString { value, lang } => {
                print_quoted_str(value, f)?;
                write!(f, "@{lang}")
            }
            Self::TypedString { value, datatype } => {
                print_quoted_str(value, f)?;
                write!(f, "^^<{datatype}>")
            }
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Time(t) => write!(f, "{t}"),
        }
    }
}

impl From<&str> for Value {
    #[inline]
    fn from(value: &str) -> Self {
        Self::String(value.into())
    }
}

impl From<String> for Value {
    #[inline]
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for Value {
    #[inline]
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    #[inline]
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Value {
    #[inline]
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<DateTime> for Value {
    #[inline]
    fn from(value: DateTime) -> Self {
        Self::Time(value)
    }
}

fn print_quoted_str(string: &str, f: &mut impl Write) -> fmt::Result {
    f.write_char('"')?;
    for c in string.chars() {
        match c {
            '\t' => f.write_str("\\t"),
            '\n' => f.write_str("\\n"),
            '\r' => f.write_str("\\r"),
            '"' => f.write_str("\\\""),
            '\\' => f.write_str("\\\\"),
            c => f.write_char(c),
        }?;
    }
    f.write_char('"')
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;
    use std::str::FromStr;

    #[test]
    fn kinds_are_distinct() {
        assert_ne!(Value::String("1".into()), Value::Int(1));
        assert_ne!(Value::Iri("a".into()), Value::BNode("a".into()));
        assert_ne!(
            Value::String("a".into()),
            Value::LangString {
                value: "a".into(),
                lang: "en".into()
            }
        );
    }

    #[test]
    fn float_equality_is_bitwise() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
    }

    #[test]
    fn hash_matches_equality() {
        let mut set = FxHashSet::default();
        set.insert(Value::from("a"));
        set.insert(Value::from(1));
        set.insert(Value::from(1));
        assert_eq!(set.len(), 2);
        assert!(set.contains(&Value::Int(1)));
    }

    #[test]
    fn display_escapes_strings() {
        assert_eq!(Value::from("say \"hi\"\n").to_string(), "\"say \\\"hi\\\"\\n\"");
        assert_eq!(
            Value::TypedString {
                value: "1".into(),
                datatype: "http://www.w3.org/2001/XMLSchema#byte".into()
            }
            .to_string(),
            "\"1\"^^<http://www.w3.org/2001/XMLSchema#byte>"
        );
    }

    #[test]
    fn display_time() {
        let t = DateTime::from_str("2024-05-01T12:00:00Z").unwrap();
        assert_eq!(Value::Time(t).to_string(), "2024-05-01T12:00:00Z");
    }
}
