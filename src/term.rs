//! RDF terms and their interned identifiers.
//!
//! A [`Term`] is a closed sum over IRIs, literals and blank nodes. Within one
//! space the relational store maps each distinct term to exactly one
//! [`TermId`]; terms are never mutated after they are interned.

use std::borrow::Cow;
use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use crate::error::TermError;

pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
pub const XSD_BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
pub const XSD_DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";
pub const XSD_DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";
pub const XSD_DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";
pub const RDF_LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";
pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

/// IRI prefix standing in for blank nodes on the triple-store wire.
///
/// `INSERT DATA` mints fresh blank nodes on every request, and `DELETE DATA`
/// rejects them outright, so blank nodes are sent as skolem IRIs and mapped
/// back when results are decoded.
pub const SKOLEM_PREFIX: &str = "https://kg-dualwrite.dev/.well-known/genid/";

/// Interned identifier of a term, unique within one space.
///
/// `Option<TermId>` is the same size as `TermId`; the raw value `0` is used
/// by the quad tables for the default graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TermId(NonZeroU64);

impl TermId {
    /// Create a `TermId` from a raw `u64`. Returns `None` for zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(TermId)
    }

    /// The underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for TermId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "term:{}", self.0)
    }
}

/// The three kinds of RDF term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TermKind {
    Iri,
    Literal,
    Blank,
}

impl std::fmt::Display for TermKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TermKind::Iri => write!(f, "iri"),
            TermKind::Literal => write!(f, "literal"),
            TermKind::Blank => write!(f, "blank"),
        }
    }
}

impl std::str::FromStr for TermKind {
    type Err = TermError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "iri" | "uri" => Ok(TermKind::Iri),
            "literal" => Ok(TermKind::Literal),
            "blank" | "bnode" => Ok(TermKind::Blank),
            _ => Err(TermError::InvalidKind { kind: s.to_string() }),
        }
    }
}

/// An RDF term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Term {
    /// An absolute IRI (without angle brackets).
    Iri(String),
    /// A literal. Plain literals carry `xsd:string`; language-tagged literals
    /// carry `rdf:langString` and a lower-cased tag.
    Literal {
        lexical: String,
        datatype: String,
        language: Option<String>,
    },
    /// A blank node label (without the `_:` prefix).
    Blank(String),
}

impl Term {
    pub fn iri(iri: impl Into<String>) -> Self {
        Term::Iri(iri.into())
    }

    /// A plain `xsd:string` literal.
    pub fn literal(lexical: impl Into<String>) -> Self {
        Term::Literal {
            lexical: lexical.into(),
            datatype: XSD_STRING.to_string(),
            language: None,
        }
    }

    /// A typed literal in canonical form.
    ///
    /// Lexical forms of the xsd value types are rewritten to the form the
    /// triple store hands back (`"007"^^xsd:integer` becomes `"7"`), so the
    /// same value has the same term in both stores.
    pub fn typed_literal(lexical: impl Into<String>, datatype: impl Into<String>) -> Self {
        let lexical = lexical.into();
        let datatype = datatype.into();
        match canonical_value(&lexical, &datatype) {
            Some((lexical, datatype)) => Term::Literal {
                lexical,
                datatype: datatype.to_string(),
                language: None,
            },
            None => Term::Literal {
                lexical,
                datatype,
                language: None,
            },
        }
    }

    pub fn lang_literal(lexical: impl Into<String>, language: &str) -> Self {
        Term::Literal {
            lexical: lexical.into(),
            datatype: RDF_LANG_STRING.to_string(),
            language: Some(language.to_ascii_lowercase()),
        }
    }

    pub fn blank(label: impl Into<String>) -> Self {
        Term::Blank(label.into())
    }

    /// Build a term from its stored parts, validating it.
    ///
    /// This is the shape the interner works with: lexical form, kind,
    /// optional datatype, optional language tag.
    pub fn from_parts(
        lexical: &str,
        kind: TermKind,
        datatype: Option<&str>,
        language: Option<&str>,
    ) -> Result<Self, TermError> {
        let term = match kind {
            TermKind::Iri => Term::iri(lexical),
            TermKind::Blank => Term::blank(lexical),
            TermKind::Literal => match (language, datatype) {
                (Some(lang), None) => Term::lang_literal(lexical, lang),
                (Some(lang), Some(dt)) if dt == RDF_LANG_STRING => {
                    Term::lang_literal(lexical, lang)
                }
                (Some(lang), Some(_)) => {
                    return Err(TermError::InvalidLanguageTag {
                        tag: lang.to_string(),
                    });
                }
                (None, Some(dt)) => Term::typed_literal(lexical, dt),
                (None, None) => Term::literal(lexical),
            },
        };
        term.validate()?;
        Ok(term)
    }

    pub fn kind(&self) -> TermKind {
        match self {
            Term::Iri(_) => TermKind::Iri,
            Term::Literal { .. } => TermKind::Literal,
            Term::Blank(_) => TermKind::Blank,
        }
    }

    /// The lexical form: IRI text, literal value or blank label.
    pub fn lexical(&self) -> &str {
        match self {
            Term::Iri(iri) => iri,
            Term::Literal { lexical, .. } => lexical,
            Term::Blank(label) => label,
        }
    }

    pub fn datatype(&self) -> Option<&str> {
        match self {
            Term::Literal { datatype, .. } => Some(datatype),
            _ => None,
        }
    }

    pub fn language(&self) -> Option<&str> {
        match self {
            Term::Literal { language, .. } => language.as_deref(),
            _ => None,
        }
    }

    pub fn is_iri(&self) -> bool {
        matches!(self, Term::Iri(_))
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal { .. })
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Term::Blank(_))
    }

    /// Check the lexical rules for this term's kind.
    pub fn validate(&self) -> Result<(), TermError> {
        match self {
            Term::Iri(iri) => validate_iri(iri),
            Term::Blank(label) => {
                let ok = !label.is_empty()
                    && label
                        .chars()
                        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
                    && !label.ends_with('.');
                if ok {
                    Ok(())
                } else {
                    Err(TermError::InvalidBlankLabel {
                        label: label.clone(),
                    })
                }
            }
            Term::Literal {
                datatype, language, ..
            } => {
                validate_iri(datatype)?;
                if let Some(tag) = language {
                    let ok = !tag.is_empty()
                        && tag.split('-').all(|part| {
                            !part.is_empty()
                                && part.len() <= 8
                                && part.chars().all(|c| c.is_ascii_alphanumeric())
                        })
                        && tag.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
                    if !ok {
                        return Err(TermError::InvalidLanguageTag { tag: tag.clone() });
                    }
                }
                Ok(())
            }
        }
    }

    /// This term with its literal value in canonical form. Terms that did
    /// not come through [`Term::typed_literal`] (deserialized unit states)
    /// pass through here before they are written.
    pub fn canonical(self) -> Term {
        match self {
            Term::Literal {
                lexical,
                datatype,
                language: None,
            } => Term::typed_literal(lexical, datatype),
            other => other,
        }
    }

    /// The wire form of this term: blank nodes become skolem IRIs.
    pub fn skolemized(&self) -> Cow<'_, Term> {
        match self {
            Term::Blank(label) => Cow::Owned(Term::Iri(format!("{SKOLEM_PREFIX}{label}"))),
            other => Cow::Borrowed(other),
        }
    }

    /// Map a skolem IRI read back from the triple store to its blank node.
    pub fn deskolemized(self) -> Term {
        match self {
            Term::Iri(iri) => match iri.strip_prefix(SKOLEM_PREFIX) {
                Some(label) if !label.is_empty() => Term::Blank(label.to_string()),
                _ => Term::Iri(iri),
            },
            other => other,
        }
    }
}

/// Parse `lexical` as a value of `datatype` and print it back. `None` when
/// the datatype is not stored by value or the lexical form does not parse;
/// such literals are kept verbatim.
fn canonical_value(lexical: &str, datatype: &str) -> Option<(String, &'static str)> {
    use oxsdatatypes::{
        Boolean, Date, DateTime, DayTimeDuration, Decimal, Double, Duration, Float, GDay, GMonth,
        GMonthDay, GYear, GYearMonth, Integer, Time, YearMonthDuration,
    };

    fn value<T: std::str::FromStr + std::fmt::Display>(
        lexical: &str,
        datatype: &'static str,
    ) -> Option<(String, &'static str)> {
        lexical
            .parse::<T>()
            .ok()
            .map(|v| (v.to_string(), datatype))
    }

    const XSD: &str = "http://www.w3.org/2001/XMLSchema#";
    let local = datatype.strip_prefix(XSD)?;
    match local {
        "boolean" => value::<Boolean>(lexical, XSD_BOOLEAN),
        "float" => value::<Float>(lexical, "http://www.w3.org/2001/XMLSchema#float"),
        "double" => value::<Double>(lexical, XSD_DOUBLE),
        "integer" | "byte" | "short" | "int" | "long" | "unsignedByte" | "unsignedShort"
        | "unsignedInt" | "unsignedLong" | "positiveInteger" | "negativeInteger"
        | "nonPositiveInteger" | "nonNegativeInteger" => value::<Integer>(lexical, XSD_INTEGER),
        "decimal" => value::<Decimal>(lexical, XSD_DECIMAL),
        "dateTime" | "dateTimeStamp" => value::<DateTime>(lexical, XSD_DATE_TIME),
        "time" => value::<Time>(lexical, "http://www.w3.org/2001/XMLSchema#time"),
        "date" => value::<Date>(lexical, "http://www.w3.org/2001/XMLSchema#date"),
        "gYearMonth" => value::<GYearMonth>(lexical, "http://www.w3.org/2001/XMLSchema#gYearMonth"),
        "gYear" => value::<GYear>(lexical, "http://www.w3.org/2001/XMLSchema#gYear"),
        "gMonthDay" => value::<GMonthDay>(lexical, "http://www.w3.org/2001/XMLSchema#gMonthDay"),
        "gDay" => value::<GDay>(lexical, "http://www.w3.org/2001/XMLSchema#gDay"),
        "gMonth" => value::<GMonth>(lexical, "http://www.w3.org/2001/XMLSchema#gMonth"),
        "duration" => value::<Duration>(lexical, "http://www.w3.org/2001/XMLSchema#duration"),
        "yearMonthDuration" => value::<YearMonthDuration>(
            lexical,
            "http://www.w3.org/2001/XMLSchema#yearMonthDuration",
        ),
        "dayTimeDuration" => value::<DayTimeDuration>(
            lexical,
            "http://www.w3.org/2001/XMLSchema#dayTimeDuration",
        ),
        _ => None,
    }
}

fn validate_iri(iri: &str) -> Result<(), TermError> {
    if iri.is_empty() {
        return Err(TermError::InvalidIri {
            iri: iri.to_string(),
            reason: "empty IRI".into(),
        });
    }
    if let Some(bad) = iri
        .chars()
        .find(|c| c.is_control() || c.is_whitespace() || "<>\"{}|^`\\".contains(*c))
    {
        return Err(TermError::InvalidIri {
            iri: iri.to_string(),
            reason: format!("forbidden character {bad:?}"),
        });
    }
    let has_scheme = iri
        .split_once(':')
        .is_some_and(|(scheme, _)| {
            !scheme.is_empty()
                && scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        });
    if !has_scheme {
        return Err(TermError::InvalidIri {
            iri: iri.to_string(),
            reason: "IRI is not absolute (missing scheme)".into(),
        });
    }
    Ok(())
}

/// Escape a string for a double-quoted SPARQL / N-Triples literal.
pub(crate) fn escape_literal(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            c => out.push(c),
        }
    }
}

impl std::fmt::Display for Term {
    /// N-Triples syntax, which is also valid SPARQL term syntax.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{iri}>"),
            Term::Blank(label) => write!(f, "_:{label}"),
            Term::Literal {
                lexical,
                datatype,
                language,
            } => {
                let mut escaped = String::with_capacity(lexical.len() + 2);
                escape_literal(lexical, &mut escaped);
                match language {
                    Some(lang) => write!(f, "\"{escaped}\"@{lang}"),
                    None if datatype == XSD_STRING => write!(f, "\"{escaped}\""),
                    None => write!(f, "\"{escaped}\"^^<{datatype}>"),
                }
            }
        }
    }
}
