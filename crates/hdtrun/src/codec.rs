//! # Result Codec
//!
//! Two directions across the boundary:
//!
//! - **Out of the guest**: `query_triples` writes a UTF-8 JSON array of triples.
//!   [`decode_triples`] turns it into [`Triple`] values.
//! - **Into the guest**: pattern positions are plain strings in the store's own
//!   term syntax. [`Term::to_pattern`] produces that syntax; the guest decides
//!   what an IRI, a blank node or a literal is. No RDF escaping happens here.
//!
//! ## Wire format
//!
//! ```text
//! [{"subject":   {"type": "NamedNode", "value": "http://ex.org/a"},
//!   "predicate": {"type": "NamedNode", "value": "http://ex.org/p"},
//!   "object":    {"type": "Literal",   "value": "hi", "language": "en"}}]
//! ```
//!
//! Blank node values arrive without the `_:` prefix.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
pub const RDF_LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";
pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";

/// Prefix the store uses internally for blank node identifiers.
pub const BLANK_NODE_PREFIX: &str = "_:";

#[derive(Debug)]
pub enum Error {
    Utf8(std::str::Utf8Error),
    Json(serde_json::Error),
    /// A term carried a `type` discriminator this host does not know.
    /// Indicates the host and guest disagree on the protocol version.
    UnknownTermShape(String),
    /// A term was structurally valid JSON but not a valid RDF term.
    MalformedTerm(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Utf8(e) => write!(f, "Result is not UTF-8: {}", e),
            Self::Json(e) => write!(f, "Result is not valid JSON: {}", e),
            Self::UnknownTermShape(kind) => write!(f, "Unknown term shape: {}", kind),
            Self::MalformedTerm(msg) => write!(f, "Malformed term: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::str::Utf8Error> for Error {
    fn from(e: std::str::Utf8Error) -> Self {
        Self::Utf8(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// An RDF term as delivered by the guest.
///
/// A literal carries at most one of `language` and `datatype`. Neither means a
/// plain string literal; an `xsd:string` datatype on the wire decodes to that.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    NamedNode {
        value: String,
    },
    /// `value` is the bare identifier, without `_:`.
    BlankNode {
        value: String,
    },
    Literal {
        value: String,
        language: Option<String>,
        datatype: Option<String>,
    },
}

impl Term {
    pub fn named(iri: impl Into<String>) -> Self {
        Self::NamedNode { value: iri.into() }
    }

    pub fn blank(id: impl Into<String>) -> Self {
        Self::BlankNode { value: id.into() }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
            language: None,
            datatype: None,
        }
    }

    pub fn lang_literal(value: impl Into<String>, language: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
            language: Some(language.into()),
            datatype: None,
        }
    }

    pub fn typed_literal(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
            language: None,
            datatype: Some(datatype.into()),
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::NamedNode { value } | Self::BlankNode { value } | Self::Literal { value, .. } => value,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal { .. })
    }

    /// The string the guest matches a pattern position against.
    ///
    /// IRIs are bare, blank nodes get `_:`, literals are quoted with an
    /// optional `@lang` or `^^<datatype>` suffix.
    pub fn to_pattern(&self) -> String {
        match self {
            Self::NamedNode { value } => value.clone(),
            Self::BlankNode { value } => format!("{}{}", BLANK_NODE_PREFIX, value),
            Self::Literal { value, language: Some(lang), .. } => format!("\"{}\"@{}", value, lang),
            Self::Literal { value, datatype: Some(dt), .. } => format!("\"{}\"^^<{}>", value, dt),
            Self::Literal { value, .. } => format!("\"{}\"", value),
        }
    }

    /// Parses the store's term syntax, the inverse of [`Term::to_pattern`].
    pub fn from_pattern(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(Error::MalformedTerm("empty term".to_string()));
        }

        if let Some(id) = pattern.strip_prefix(BLANK_NODE_PREFIX) {
            return Ok(Self::blank(id));
        }

        if let Some(rest) = pattern.strip_prefix('"') {
            let close = rest
                .rfind('"')
                .ok_or_else(|| Error::MalformedTerm(format!("unterminated literal: {}", pattern)))?;
            let (value, suffix) = (&rest[..close], &rest[close + 1..]);
            return if suffix.is_empty() {
                Ok(Self::literal(value))
            } else if let Some(lang) = suffix.strip_prefix('@') {
                Ok(Self::lang_literal(value, lang))
            } else if let Some(dt) = suffix.strip_prefix("^^") {
                let dt = dt.strip_prefix('<').and_then(|d| d.strip_suffix('>')).unwrap_or(dt);
                Ok(Self::typed_literal(value, dt))
            } else {
                Err(Error::MalformedTerm(format!("bad literal suffix: {}", suffix)))
            };
        }

        let iri = pattern
            .strip_prefix('<')
            .and_then(|p| p.strip_suffix('>'))
            .unwrap_or(pattern);
        Ok(Self::named(iri))
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}

/// N-Triples style rendering.
impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NamedNode { value } => write!(f, "<{}>", value),
            Self::BlankNode { value } => write!(f, "_:{}", value),
            Self::Literal { value, language: Some(lang), .. } => write!(f, "\"{}\"@{}", escape(value), lang),
            Self::Literal { value, datatype: Some(dt), .. } => write!(f, "\"{}\"^^<{}>", escape(value), dt),
            Self::Literal { value, .. } => write!(f, "\"{}\"", escape(value)),
        }
    }
}

/// A triple in the store's single default graph.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Triple {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

impl Triple {
    pub fn new(subject: Term, predicate: Term, object: Term) -> Self {
        Self { subject, predicate, object }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} .", self.subject, self.predicate, self.object)
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct WireTerm {
    #[serde(rename = "type")]
    kind: String,
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    datatype: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct WireTriple {
    subject: WireTerm,
    predicate: WireTerm,
    object: WireTerm,
}

impl TryFrom<WireTerm> for Term {
    type Error = Error;

    fn try_from(wire: WireTerm) -> Result<Self> {
        match wire.kind.as_str() {
            "NamedNode" => Ok(Self::named(wire.value)),
            "BlankNode" => Ok(Self::blank(wire.value)),
            "Literal" => {
                let language = wire.language.filter(|lang| !lang.is_empty());
                let datatype = wire.datatype.filter(|dt| !dt.is_empty());
                match (language, datatype) {
                    (Some(lang), None) => Ok(Self::lang_literal(wire.value, lang)),
                    (Some(lang), Some(dt)) if dt == RDF_LANG_STRING => Ok(Self::lang_literal(wire.value, lang)),
                    (Some(_), Some(dt)) => Err(Error::MalformedTerm(format!(
                        "literal {:?} has both a language and datatype {}",
                        wire.value, dt
                    ))),
                    (None, Some(dt)) if dt == XSD_STRING => Ok(Self::literal(wire.value)),
                    (None, Some(dt)) => Ok(Self::typed_literal(wire.value, dt)),
                    (None, None) => Ok(Self::literal(wire.value)),
                }
            }
            other => Err(Error::UnknownTermShape(other.to_string())),
        }
    }
}

impl From<&Term> for WireTerm {
    fn from(term: &Term) -> Self {
        match term {
            Term::NamedNode { value } => Self {
                kind: "NamedNode".to_string(),
                value: value.clone(),
                language: None,
                datatype: None,
            },
            Term::BlankNode { value } => Self {
                kind: "BlankNode".to_string(),
                value: value.clone(),
                language: None,
                datatype: None,
            },
            Term::Literal { value, language, datatype } => Self {
                kind: "Literal".to_string(),
                value: value.clone(),
                language: language.clone(),
                datatype: datatype.clone(),
            },
        }
    }
}

impl TryFrom<WireTriple> for Triple {
    type Error = Error;

    fn try_from(wire: WireTriple) -> Result<Self> {
        let subject = Term::try_from(wire.subject)?;
        if subject.is_literal() {
            return Err(Error::MalformedTerm(format!("literal in subject position: {}", subject)));
        }
        Ok(Self {
            subject,
            predicate: Term::try_from(wire.predicate)?,
            object: Term::try_from(wire.object)?,
        })
    }
}

/// Decodes a `query_triples` payload. An empty payload is an empty result.
pub fn decode_triples(payload: &[u8]) -> Result<Vec<Triple>> {
    let text = std::str::from_utf8(payload)?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let wire: Vec<WireTriple> = serde_json::from_str(text)?;
    wire.into_iter().map(Triple::try_from).collect()
}

/// Encodes triples in the wire format a guest produces.
pub fn encode_triples(triples: &[Triple]) -> Result<Vec<u8>> {
    let wire: Vec<WireTriple> = triples
        .iter()
        .map(|triple| WireTriple {
            subject: WireTerm::from(&triple.subject),
            predicate: WireTerm::from(&triple.predicate),
            object: WireTerm::from(&triple.object),
        })
        .collect();
    Ok(serde_json::to_vec(&wire)?)
}

/// Encodes an optional pattern position to the bytes handed to the guest.
///
/// `None` stays `None`: the marshaler turns it into the null region.
pub fn encode_pattern(term: Option<&Term>) -> Option<Vec<u8>> {
    term.map(|t| t.to_pattern().into_bytes())
}
