//! # Buffer Marshaler
//!
//! Every crossing into the guest follows one protocol:
//!
//! 1. Allocate a guest buffer for each non-empty input (and each output scratch).
//! 2. Copy inputs into their buffers through a fresh view of guest memory.
//! 3. Call the export with the resulting (pointer, length) pairs.
//! 4. Free every buffer from step 1, whatever step 2 or 3 did.
//! 5. Interpret the export's return code.
//!
//! The guest has no destructor hook, so step 4 is explicit: [`with_buffers`]
//! releases on the success path, on a guest-reported failure, on a trap and on
//! a partial allocation. No buffer outlives the call that allocated it.

use std::fmt;

use crate::codec;
use crate::codec::Triple;
use crate::diag;
use crate::guest;
use crate::guest::Guest;
use crate::guest::Region;
use crate::guest::QUERY_OUTPUT_CAPACITY;

#[derive(Debug)]
pub enum Error {
    Guest(guest::Error),
    /// The guest allocator returned a null pointer.
    AllocationFailure { len: u64 },
    /// The guest rejected the dataset bytes.
    LoadFailure { code: i32, message: Option<String> },
    /// `query_triples` returned a negative status, e.g. the result did not fit
    /// in the output buffer.
    QueryFailed { code: i64, message: Option<String> },
    Codec(codec::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Guest(e) => write!(f, "Guest error: {}", e),
            Self::AllocationFailure { len } => write!(f, "Guest allocation of {} bytes failed", len),
            Self::LoadFailure { code, message: Some(msg) } => write!(f, "Load failed ({}): {}", code, msg),
            Self::LoadFailure { code, message: None } => write!(f, "Load failed with status {}", code),
            Self::QueryFailed { code, message: Some(msg) } => write!(f, "Query failed ({}): {}", code, msg),
            Self::QueryFailed { code, message: None } => write!(f, "Query failed with status {}", code),
            Self::Codec(e) => write!(f, "Codec error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<guest::Error> for Error {
    fn from(e: guest::Error) -> Self {
        Self::Guest(e)
    }
}

impl From<codec::Error> for Error {
    fn from(e: codec::Error) -> Self {
        Self::Codec(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// One argument slot of a boundary call.
#[derive(Clone, Copy, Debug)]
pub enum Slot<'a> {
    /// No value: passed as the null region, nothing is allocated.
    Absent,
    /// Copied into a buffer of exactly its length. Empty bytes act as `Absent`.
    Bytes(&'a [u8]),
    /// An uninitialized buffer of the given capacity for the guest to fill.
    Scratch(u64),
}

impl<'a> Slot<'a> {
    fn from_input(input: Option<&'a [u8]>) -> Self {
        input.map_or(Self::Absent, Self::Bytes)
    }

    fn capacity(&self) -> u64 {
        match self {
            Self::Absent => 0,
            Self::Bytes(bytes) => bytes.len() as u64,
            Self::Scratch(capacity) => *capacity,
        }
    }
}

/// Subject, predicate and object constraints. `None` is unconstrained.
pub type Pattern<'a> = [Option<&'a [u8]>; 3];

/// Unconstrained in every position.
pub const MATCH_ALL: Pattern<'static> = [None, None, None];

/// Runs `call` with each slot resolved to a guest region, then frees every
/// allocated region before returning.
///
/// The regions passed to `call` line up with `slots`; absent and empty slots
/// are [`Region::NULL`].
pub fn with_buffers<G, R, F>(guest: &mut G, slots: &[Slot<'_>], call: F) -> Result<R>
where
    G: Guest + ?Sized,
    F: FnOnce(&mut G, &[Region]) -> Result<R>,
{
    let mut held = Vec::with_capacity(slots.len());
    let outcome = match acquire(guest, slots, &mut held) {
        Ok(()) => call(guest, &held),
        Err(e) => Err(e),
    };
    let released = release(guest, &held);

    match (outcome, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release_err)) => {
            tracing::warn!(error = %release_err, "buffer release failed while unwinding");
            Err(e)
        }
    }
}

/// Allocates every slot, then fills the byte slots. Regions are pushed onto
/// `held` as soon as they exist so a failure part-way leaves them releasable.
fn acquire<G: Guest + ?Sized>(guest: &mut G, slots: &[Slot<'_>], held: &mut Vec<Region>) -> Result<()> {
    for slot in slots {
        let len = slot.capacity();
        if len == 0 {
            held.push(Region::NULL);
            continue;
        }
        let ptr = guest.allocate(len)?;
        if ptr == 0 {
            return Err(Error::AllocationFailure { len });
        }
        held.push(Region::new(ptr, len));
    }

    // Allocation may have grown memory; each write resolves it afresh.
    for (slot, region) in slots.iter().zip(held.iter()) {
        if let Slot::Bytes(bytes) = slot {
            if !bytes.is_empty() {
                guest.write(region.ptr, bytes)?;
            }
        }
    }
    Ok(())
}

/// Frees every non-null region, attempting all of them even if one fails.
fn release<G: Guest + ?Sized>(guest: &mut G, held: &[Region]) -> Result<()> {
    let mut first_err = None;
    for region in held.iter().filter(|region| !region.is_null()) {
        if let Err(e) = guest.free(*region) {
            tracing::warn!(%region, error = %e, "guest free failed");
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(Error::Guest(e)),
        None => Ok(()),
    }
}

/// Hands dataset bytes to the guest's `load` export.
pub fn load<G: Guest + ?Sized>(guest: &mut G, data: &[u8]) -> Result<()> {
    with_buffers(guest, &[Slot::Bytes(data)], |guest, regions| {
        let code = guest.load(regions[0])?;
        if code != 0 {
            let message = diag::describe_failure(guest);
            return Err(Error::LoadFailure { code, message });
        }
        Ok(())
    })
}

/// Runs `query_triples` and returns the raw JSON payload.
pub fn query_raw<G: Guest + ?Sized>(guest: &mut G, pattern: Pattern<'_>) -> Result<Vec<u8>> {
    let [s, p, o] = pattern.map(Slot::from_input);
    let slots = [s, p, o, Slot::Scratch(QUERY_OUTPUT_CAPACITY)];

    with_buffers(guest, &slots, |guest, regions| {
        let out = regions[3];
        let written = guest.query_triples([regions[0], regions[1], regions[2]], out)?;
        if written < 0 {
            let message = diag::describe_failure(guest);
            return Err(Error::QueryFailed { code: written, message });
        }
        let written = written as u64;
        if written > out.len {
            return Err(Error::Guest(guest::Error::OutOfBounds(Region::new(out.ptr, written))));
        }
        Ok(guest.read(Region::new(out.ptr, written))?)
    })
}

/// Runs `query_triples` and decodes the result.
pub fn query<G: Guest + ?Sized>(guest: &mut G, pattern: Pattern<'_>) -> Result<Vec<Triple>> {
    let payload = query_raw(guest, pattern)?;
    Ok(codec::decode_triples(&payload)?)
}

/// Runs `count_triples`. No output buffer, so no capacity bound.
pub fn count<G: Guest + ?Sized>(guest: &mut G, pattern: Pattern<'_>) -> Result<u64> {
    let slots = pattern.map(Slot::from_input);
    with_buffers(guest, &slots, |guest, regions| {
        Ok(guest.count_triples([regions[0], regions[1], regions[2]])?)
    })
}
