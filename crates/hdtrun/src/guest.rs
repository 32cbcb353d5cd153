//! # Guest Export Surface
//!
//! The triple store runs as a guest module with 64-bit addressed linear memory.
//! This module names the functions it exports and abstracts them behind the
//! [`Guest`] trait, so the marshaling layer can drive either a real wasmtime
//! instance ([`crate::bridge::ModuleBridge`]) or an in-process stand-in.
//!
//! ## Conventions
//!
//! - **Wide Values**: Pointers, lengths and counts are `u64` end to end. The
//!   guest memory is 64-bit addressed, so nothing here narrows to `u32`.
//! - **Null Sentinel**: A region with pointer 0 and length 0 means "no value".
//!   For pattern positions this reads as "unconstrained".
//! - **Optional Capabilities**: `get_last_error`, `get_debug_log` and
//!   `init_logging` may be missing. Their trait methods return `Ok(None)` then.

use std::fmt;

/// Export names consumed by the host.
pub mod exports {
    pub const MEMORY: &str = "memory";
    pub const ALLOCATE: &str = "allocate";
    pub const FREE: &str = "free";
    pub const LOAD: &str = "load";
    pub const QUERY_TRIPLES: &str = "query_triples";
    pub const COUNT_TRIPLES: &str = "count_triples";
    pub const SIZE_IN_BYTES: &str = "size_in_bytes";
    pub const GET_LAST_ERROR: &str = "get_last_error";
    pub const GET_DEBUG_LOG: &str = "get_debug_log";
    pub const INIT_LOGGING: &str = "init_logging";
}

/// Capacity of the output buffer handed to `query_triples` (1 MiB).
pub const QUERY_OUTPUT_CAPACITY: u64 = 1024 * 1024;

/// Scratch buffer size for `get_last_error` (1 KiB).
pub const ERROR_SCRATCH_CAPACITY: u64 = 1024;

/// Scratch buffer size for `get_debug_log` (4 KiB).
pub const DEBUG_LOG_SCRATCH_CAPACITY: u64 = 4 * 1024;

/// A (pointer, length) window into guest memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Region {
    pub ptr: u64,
    pub len: u64,
}

impl Region {
    /// The "no value" sentinel.
    pub const NULL: Region = Region { ptr: 0, len: 0 };

    pub fn new(ptr: u64, len: u64) -> Self {
        Self { ptr, len }
    }

    pub fn is_null(&self) -> bool {
        self.ptr == 0 && self.len == 0
    }

    /// One past the last byte, or `None` if the region wraps the address space.
    pub fn end(&self) -> Option<u64> {
        self.ptr.checked_add(self.len)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}; {}]", self.ptr, self.len)
    }
}

/// The three pattern positions, in subject/predicate/object order.
pub type PatternRegions = [Region; 3];

/// Exports a guest may or may not provide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    LastError,
    DebugLog,
}

/// Host-side counters of boundary traffic, used for instrumentation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallStats {
    pub loads: u64,
    pub queries: u64,
    pub counts: u64,
    pub allocations: u64,
    pub frees: u64,
}

impl CallStats {
    /// Buffers handed out by the guest allocator and not yet released.
    pub fn live_buffers(&self) -> u64 {
        self.allocations.saturating_sub(self.frees)
    }
}

/// Failures crossing into or out of the guest.
#[derive(Debug)]
pub enum Error {
    /// An operation was attempted before the module was instantiated.
    NotReady,
    /// The module bytes failed validation or compilation.
    Compile(wasmtime::Error),
    /// Instantiation failed (missing imports, start function trapped).
    Instantiate(wasmtime::Error),
    /// A required export is absent or has the wrong signature.
    MissingExport(String),
    /// The guest memory is not usable in the configured mode.
    UnsupportedMemory(String),
    /// A read or write fell outside the current bounds of guest memory.
    OutOfBounds(Region),
    /// The guest trapped while executing an export.
    Trap(wasmtime::Error),
    /// A dataset is already loaded into this guest.
    AlreadyLoaded,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "Guest module is not instantiated"),
            Self::Compile(e) => write!(f, "Compile error: {}", e),
            Self::Instantiate(e) => write!(f, "Instantiate error: {}", e),
            Self::MissingExport(name) => write!(f, "Missing guest export: {}", name),
            Self::UnsupportedMemory(msg) => write!(f, "Unsupported guest memory: {}", msg),
            Self::OutOfBounds(region) => write!(f, "Guest memory access out of bounds: {}", region),
            Self::Trap(e) => write!(f, "Guest trapped: {}", e),
            Self::AlreadyLoaded => write!(f, "A dataset is already loaded into this guest"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// The raw export surface of a triple-store guest.
///
/// Implementations perform exactly one guest call per method and do not
/// interpret return codes; that is the marshaler's job.
///
/// # invariants
/// - `read` and `write` must resolve guest memory at call time. A view taken
///   before a guest call may be stale after it, since the guest can grow memory.
/// - `allocate` returns `0` on failure; it never reports failure as an `Err`
///   unless the guest trapped.
/// - Every method that calls into the guest fails with [`Error::NotReady`]
///   before the module is instantiated.
pub trait Guest {
    /// Whether the export table and the memory handle are both present.
    fn is_ready(&self) -> bool;

    /// Boundary counters accumulated so far. Does not call into the guest.
    fn stats(&self) -> CallStats;

    /// Whether an optional export was found at instantiation.
    fn supports(&self, capability: Capability) -> bool;

    fn allocate(&mut self, len: u64) -> Result<u64>;

    /// Releases a region previously returned by `allocate`, with its original length.
    fn free(&mut self, region: Region) -> Result<()>;

    fn write(&mut self, ptr: u64, bytes: &[u8]) -> Result<()>;

    fn read(&mut self, region: Region) -> Result<Vec<u8>>;

    /// Loads a dataset. Returns the guest status code (0 = success).
    fn load(&mut self, data: Region) -> Result<i32>;

    /// Writes matching triples as JSON into `out`.
    ///
    /// Returns the byte length written, or a negative status.
    fn query_triples(&mut self, pattern: PatternRegions, out: Region) -> Result<i64>;

    fn count_triples(&mut self, pattern: PatternRegions) -> Result<u64>;

    fn size_in_bytes(&mut self) -> Result<u64>;

    /// Copies the last error message into `buf`. `None` if not exported.
    fn last_error(&mut self, buf: Region) -> Result<Option<u64>>;

    /// Copies pending debug log output into `buf`. `None` if not exported.
    fn debug_log(&mut self, buf: Region) -> Result<Option<u64>>;
}
