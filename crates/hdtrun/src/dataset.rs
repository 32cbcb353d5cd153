//! # Dataset Facade
//!
//! The public, read-only view over a loaded guest. Every triple lives in the
//! default graph; there is no other.
//!
//! ## States
//!
//! - **Unbound**: wraps a guest, nothing loaded yet.
//! - **Active**: a dataset was loaded. All reads are allowed.
//! - **Closed**: `close()` was called. Reads fail with `NotLoaded`.
//!
//! ## Cardinality
//!
//! `size()` and `count_matches()` go through the guest's count export, which
//! never builds a result set. `size()` is computed once and cached until
//! `close()`. Neither ever materializes triples to count them.

use std::fmt;

use crate::bridge::ModuleBridge;
use crate::codec;
use crate::codec::Term;
use crate::codec::Triple;
use crate::diag;
use crate::fetch;
use crate::guest;
use crate::guest::CallStats;
use crate::guest::Guest;
use crate::marshal;
use crate::marshal::MATCH_ALL;

#[derive(Debug)]
pub enum Error {
    Marshal(marshal::Error),
    Fetch(fetch::Error),
    /// The store is immutable; mutations are never attempted.
    Immutable,
    /// No dataset is loaded, or the dataset was closed.
    NotLoaded,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Marshal(e) => write!(f, "{}", e),
            Self::Fetch(e) => write!(f, "Fetch error: {}", e),
            Self::Immutable => write!(f, "Dataset is read-only"),
            Self::NotLoaded => write!(f, "No dataset is loaded"),
        }
    }
}

impl std::error::Error for Error {}

impl From<marshal::Error> for Error {
    fn from(e: marshal::Error) -> Self {
        Self::Marshal(e)
    }
}

impl From<guest::Error> for Error {
    fn from(e: guest::Error) -> Self {
        Self::Marshal(marshal::Error::Guest(e))
    }
}

impl From<fetch::Error> for Error {
    fn from(e: fetch::Error) -> Self {
        Self::Fetch(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Graph component of a quad.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum GraphName {
    #[default]
    Default,
    Named(Term),
}

/// A triple tagged with its graph. Quads produced here are always in
/// [`GraphName::Default`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Quad {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
    pub graph: GraphName,
}

impl From<Triple> for Quad {
    fn from(triple: Triple) -> Self {
        Self {
            subject: triple.subject,
            predicate: triple.predicate,
            object: triple.object,
            graph: GraphName::Default,
        }
    }
}

/// Decoded result of a pattern match.
///
/// Holds the triples the guest returned; quads are built as they are iterated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Matches {
    triples: Vec<Triple>,
}

impl Matches {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Quad> + '_ {
        self.triples.iter().cloned().map(Quad::from)
    }

    /// Narrows the view to triples satisfying `keep`.
    pub fn filter(self, mut keep: impl FnMut(&Triple) -> bool) -> Self {
        Self {
            triples: self.triples.into_iter().filter(|t| keep(t)).collect(),
        }
    }

    pub fn contains(&self, triple: &Triple) -> bool {
        self.triples.contains(triple)
    }

    pub fn triples(&self) -> &[Triple] {
        &self.triples
    }
}

impl IntoIterator for Matches {
    type Item = Quad;
    type IntoIter = std::iter::Map<std::vec::IntoIter<Triple>, fn(Triple) -> Quad>;

    fn into_iter(self) -> Self::IntoIter {
        self.triples.into_iter().map(Quad::from as fn(Triple) -> Quad)
    }
}

/// Encodes the pattern positions for the guest.
///
/// Returns `None` when a constrained position encodes to an empty string. The
/// null region is reserved for "unconstrained", so such a constraint cannot be
/// expressed to the guest and matches nothing.
fn constraints(terms: [Option<&Term>; 3]) -> Option<[Option<Vec<u8>>; 3]> {
    let encoded = terms.map(codec::encode_pattern);
    if encoded.iter().flatten().any(|pattern| pattern.is_empty()) {
        tracing::trace!("empty constraint, nothing to match");
        return None;
    }
    Some(encoded)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Unbound,
    Active,
    Closed,
}

/// Read-only, default-graph-only query surface over a guest.
pub struct Dataset<G: Guest = ModuleBridge> {
    guest: G,
    state: State,
    cached_size: Option<u64>,
}

impl<G: Guest> Dataset<G> {
    /// Wraps a guest without loading anything.
    pub fn new(guest: G) -> Self {
        Self {
            guest,
            state: State::Unbound,
            cached_size: None,
        }
    }

    /// Wraps `guest` and loads `data` into it.
    pub fn from_bytes(guest: G, data: &[u8]) -> Result<Self> {
        let mut dataset = Self::new(guest);
        dataset.load(data)?;
        Ok(dataset)
    }

    /// Loads `data` into the guest. A guest holds one session for its life,
    /// so this succeeds at most once.
    pub fn load(&mut self, data: &[u8]) -> Result<()> {
        marshal::load(&mut self.guest, data)?;
        self.state = State::Active;
        self.cached_size = None;
        tracing::debug!(bytes = data.len(), "dataset loaded");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.state == State::Active
    }

    fn require_active(&self) -> Result<()> {
        match self.state {
            State::Active => Ok(()),
            State::Unbound | State::Closed => Err(Error::NotLoaded),
        }
    }

    /// Total number of triples. One guest count call, then cached.
    pub fn size(&mut self) -> Result<u64> {
        self.require_active()?;
        if let Some(size) = self.cached_size {
            tracing::trace!(size, "size served from cache");
            return Ok(size);
        }
        let size = marshal::count(&mut self.guest, MATCH_ALL)?;
        tracing::debug!(size, "size computed");
        self.cached_size = Some(size);
        Ok(size)
    }

    /// Whether `triple` is in the dataset.
    pub fn has(&mut self, triple: &Triple) -> Result<bool> {
        self.require_active()?;
        let Some([s, p, o]) =
            constraints([Some(&triple.subject), Some(&triple.predicate), Some(&triple.object)])
        else {
            return Ok(false);
        };
        let found = marshal::query(&mut self.guest, [s.as_deref(), p.as_deref(), o.as_deref()])?;
        Ok(found.iter().any(|candidate| candidate == triple))
    }

    /// Triples matching every constrained position. `None` is unconstrained.
    ///
    /// A named graph can never match and returns an empty result without
    /// calling into the guest.
    pub fn match_pattern(
        &mut self,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
        graph: Option<&GraphName>,
    ) -> Result<Matches> {
        self.require_active()?;
        if let Some(GraphName::Named(name)) = graph {
            tracing::trace!(graph = %name, "named graph requested, nothing to match");
            return Ok(Matches::empty());
        }

        let Some([s, p, o]) = constraints([subject, predicate, object]) else {
            return Ok(Matches::empty());
        };
        let triples = marshal::query(&mut self.guest, [s.as_deref(), p.as_deref(), o.as_deref()])?;
        Ok(Matches { triples })
    }

    /// Number of triples `match_pattern` would return, without decoding any.
    pub fn count_matches(
        &mut self,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
    ) -> Result<u64> {
        self.require_active()?;
        let Some([s, p, o]) = constraints([subject, predicate, object]) else {
            return Ok(0);
        };
        Ok(marshal::count(&mut self.guest, [s.as_deref(), p.as_deref(), o.as_deref()])?)
    }

    /// Every triple, as quads in the default graph.
    pub fn quads(&mut self) -> Result<Matches> {
        self.match_pattern(None, None, None, None)
    }

    /// Matches on raw pattern strings in the store's own syntax.
    pub fn query_raw(
        &mut self,
        subject: Option<&str>,
        predicate: Option<&str>,
        object: Option<&str>,
    ) -> Result<Vec<Triple>> {
        self.require_active()?;
        let pattern = [subject, predicate, object].map(|value| value.map(str::as_bytes));
        Ok(marshal::query(&mut self.guest, pattern)?)
    }

    /// Memory footprint of the loaded store as reported by the guest.
    pub fn size_in_bytes(&mut self) -> Result<u64> {
        self.require_active()?;
        Ok(self.guest.size_in_bytes()?)
    }

    pub fn add(&mut self, _quad: &Quad) -> Result<()> {
        Err(Error::Immutable)
    }

    pub fn delete(&mut self, _quad: &Quad) -> Result<()> {
        Err(Error::Immutable)
    }

    /// Ends the session from the host's side and drops the cached size.
    pub fn close(&mut self) {
        self.cached_size = None;
        self.state = State::Closed;
        tracing::debug!("dataset closed");
    }

    pub fn last_error(&mut self) -> Result<Option<String>> {
        Ok(diag::last_error(&mut self.guest)?)
    }

    pub fn debug_log(&mut self) -> Result<Option<String>> {
        Ok(diag::debug_log(&mut self.guest)?)
    }

    pub fn stats(&self) -> CallStats {
        self.guest.stats()
    }

    pub fn guest(&self) -> &G {
        &self.guest
    }

    pub fn into_guest(self) -> G {
        self.guest
    }
}
