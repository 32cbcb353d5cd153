//! # hdtrun
//!
//! Host-side query facade over a compressed, read-only triple store compiled
//! to WebAssembly with 64-bit memory.
//!
//! ## Architecture
//!
//! - **Guest**: the export surface of the store module, as a trait.
//! - **Bridge**: instantiates the module with wasmtime. The module owns its memory.
//! - **Marshal**: the allocate/copy/call/free protocol every crossing uses.
//! - **Codec**: JSON results out, pattern strings in.
//! - **Diag**: error and debug-log strings from the guest.
//! - **Dataset**: the read-only, default-graph-only collection API.
//!
//! ## Example
//!
//! ```rust,no_run
//! use hdtrun::{Dataset, MemoryStrategy, ModuleBridge, Term};
//!
//! # fn example(wasm: &[u8], data: &[u8]) -> hdtrun::dataset::Result<()> {
//! let bridge = ModuleBridge::from_module(wasm, MemoryStrategy::Exported)?;
//! let mut dataset = Dataset::from_bytes(bridge, data)?;
//!
//! let person = Term::named("http://xmlns.com/foaf/0.1/Person");
//! let rdf_type = Term::named(hdtrun::codec::RDF_TYPE);
//! let people = dataset.count_matches(None, Some(&rdf_type), Some(&person))?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod builder;
pub mod codec;
pub mod config;
pub mod dataset;
pub mod diag;
pub mod fetch;
pub mod guest;
pub mod marshal;

#[cfg(test)]
mod mock_guest;

pub use bridge::ModuleBridge;
pub use builder::DatasetBuilder;
pub use codec::Term;
pub use codec::Triple;
pub use config::GuestSource;
pub use config::MemoryStrategy;
pub use dataset::Dataset;
pub use dataset::GraphName;
pub use dataset::Matches;
pub use dataset::Quad;
pub use guest::CallStats;
pub use guest::Guest;
