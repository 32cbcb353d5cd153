//! # Configuration
//!
//! The host has two knobs: where the guest binary comes from, and who owns the
//! guest's linear memory. There is no memory sizing; the guest grows its own.

/// Environment variable overriding the default guest location.
pub const GUEST_ENV: &str = "HDTRUN_GUEST";

/// Location used when neither bytes nor a location are configured.
pub const DEFAULT_GUEST_LOCATION: &str = "hdt.wasm";

/// Where the guest module binary is loaded from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuestSource {
    /// The module bytes, already in hand.
    Bytes(Vec<u8>),
    /// A path or URL resolved through a [`crate::fetch::Fetch`] implementation.
    Location(String),
}

impl GuestSource {
    /// Reads `HDTRUN_GUEST`, falling back to [`DEFAULT_GUEST_LOCATION`].
    pub fn from_env() -> Self {
        let location = std::env::var(GUEST_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_GUEST_LOCATION.to_string());
        Self::Location(location)
    }
}

impl Default for GuestSource {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Instantiation strategy for the guest's linear memory.
///
/// 64-bit addressed guests must export their own memory: a host-created memory
/// would have to agree with the guest on the addressing mode, and the guest
/// toolchain decides that. `Imported` exists for guests built the other way.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MemoryStrategy {
    /// The module defines and exports `memory`. The host supplies nothing.
    #[default]
    Exported,
    /// The module imports one memory; the host creates it with exactly the
    /// type the import declares.
    Imported,
}
