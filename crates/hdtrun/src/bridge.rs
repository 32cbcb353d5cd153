//! # Module Bridge
//!
//! Compiles and instantiates the triple-store guest with wasmtime and exposes
//! its exports through the [`Guest`] trait.
//!
//! The bridge moves through three states:
//!
//! - **Empty**: engine only. Every guest operation fails with `NotReady`.
//! - **Ready**: module instantiated, memory and export table resolved.
//! - **Session**: a dataset was loaded successfully. A second load is rejected.
//!
//! ## Interruption
//!
//! Guest calls are synchronous and cannot be cancelled. A caller that enforces
//! a timeout by abandoning the bridge mid-call leaves any buffers that call
//! allocated unreleased in the guest heap; the bridge should be discarded then.

use wasmtime::Engine;
use wasmtime::ExternType;
use wasmtime::Instance;
use wasmtime::Linker;
use wasmtime::Memory;
use wasmtime::Module;
use wasmtime::Store;
use wasmtime::TypedFunc;

use crate::config::MemoryStrategy;
use crate::guest::CallStats;
use crate::guest::Capability;
use crate::guest::Error;
use crate::guest::Guest;
use crate::guest::PatternRegions;
use crate::guest::Region;
use crate::guest::Result;
use crate::guest::exports;

/// Store data for a bridged instance.
#[derive(Debug, Default)]
pub struct BridgeCtx {
    stats: CallStats,
}

type PtrLen = (i64, i64);
type QueryParams = (i64, i64, i64, i64, i64, i64, i64, i64);
type CountParams = (i64, i64, i64, i64, i64, i64);

struct Exports {
    allocate: TypedFunc<i64, i64>,
    free: TypedFunc<PtrLen, ()>,
    load: TypedFunc<PtrLen, i32>,
    query_triples: TypedFunc<QueryParams, i64>,
    count_triples: TypedFunc<CountParams, i64>,
    size_in_bytes: TypedFunc<(), i64>,
    get_last_error: Option<TypedFunc<PtrLen, i64>>,
    get_debug_log: Option<TypedFunc<PtrLen, i64>>,
}

struct Live {
    store: Store<BridgeCtx>,
    memory: Memory,
    exports: Exports,
    session: bool,
}

/// The wasmtime-backed implementation of [`Guest`].
pub struct ModuleBridge {
    engine: Engine,
    strategy: MemoryStrategy,
    live: Option<Live>,
}

// Wasm i64 parameters carry the u64 bit pattern unchanged.
fn wide(value: u64) -> i64 {
    value as i64
}

fn ptr_len(region: Region) -> PtrLen {
    (wide(region.ptr), wide(region.len))
}

impl ModuleBridge {
    /// Creates an empty bridge with a memory64-enabled engine.
    pub fn new(strategy: MemoryStrategy) -> Result<Self> {
        let mut config = wasmtime::Config::new();
        config.wasm_memory64(true);
        let engine = Engine::new(&config).map_err(Error::Compile)?;

        Ok(Self {
            engine,
            strategy,
            live: None,
        })
    }

    /// Creates a bridge and instantiates `wasm` in one step.
    pub fn from_module(wasm: &[u8], strategy: MemoryStrategy) -> Result<Self> {
        let mut bridge = Self::new(strategy)?;
        bridge.instantiate(wasm)?;
        Ok(bridge)
    }

    /// Whether a dataset has been loaded successfully.
    pub fn has_session(&self) -> bool {
        self.live.as_ref().is_some_and(|live| live.session)
    }

    /// Compiles and instantiates the guest, replacing nothing: a bridge holds
    /// at most one instance for its whole life.
    pub fn instantiate(&mut self, wasm: &[u8]) -> Result<()> {
        if self.live.is_some() {
            return Err(Error::AlreadyLoaded);
        }

        let module = Module::new(&self.engine, wasm).map_err(Error::Compile)?;
        let mut store = Store::new(&self.engine, BridgeCtx::default());
        let mut linker = Linker::new(&self.engine);

        let host_memory = provision_memory(self.strategy, &module, &mut store, &mut linker)?;
        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(Error::Instantiate)?;

        let memory = match host_memory {
            Some(memory) => memory,
            None => instance
                .get_memory(&mut store, exports::MEMORY)
                .ok_or_else(|| Error::MissingExport(exports::MEMORY.to_string()))?,
        };
        if !memory.ty(&store).is_64() {
            return Err(Error::UnsupportedMemory(
                "guest memory uses 32-bit addressing".to_string(),
            ));
        }

        let funcs = Exports {
            allocate: required(&instance, &mut store, exports::ALLOCATE)?,
            free: required(&instance, &mut store, exports::FREE)?,
            load: required(&instance, &mut store, exports::LOAD)?,
            query_triples: required(&instance, &mut store, exports::QUERY_TRIPLES)?,
            count_triples: required(&instance, &mut store, exports::COUNT_TRIPLES)?,
            size_in_bytes: required(&instance, &mut store, exports::SIZE_IN_BYTES)?,
            get_last_error: optional(&instance, &mut store, exports::GET_LAST_ERROR)?,
            get_debug_log: optional(&instance, &mut store, exports::GET_DEBUG_LOG)?,
        };

        let init_logging: Option<TypedFunc<(), i32>> =
            optional(&instance, &mut store, exports::INIT_LOGGING)?;
        if let Some(init) = init_logging {
            let status = init.call(&mut store, ()).map_err(Error::Trap)?;
            tracing::debug!(status, "guest logging initialized");
        }

        tracing::debug!(
            pages = memory.size(&store),
            last_error = funcs.get_last_error.is_some(),
            debug_log = funcs.get_debug_log.is_some(),
            "guest instantiated"
        );

        self.live = Some(Live {
            store,
            memory,
            exports: funcs,
            session: false,
        });
        Ok(())
    }

    fn live(&mut self) -> Result<&mut Live> {
        self.live.as_mut().ok_or(Error::NotReady)
    }
}

fn provision_memory(
    strategy: MemoryStrategy,
    module: &Module,
    store: &mut Store<BridgeCtx>,
    linker: &mut Linker<BridgeCtx>,
) -> Result<Option<Memory>> {
    let imported = module.imports().find_map(|import| match import.ty() {
        ExternType::Memory(ty) => Some((import.module().to_string(), import.name().to_string(), ty)),
        _ => None,
    });

    match (strategy, imported) {
        (MemoryStrategy::Exported, None) => Ok(None),
        (MemoryStrategy::Exported, Some((module, name, _))) => Err(Error::UnsupportedMemory(format!(
            "module imports {}::{} but the guest must export its own memory",
            module, name
        ))),
        (MemoryStrategy::Imported, None) => Err(Error::UnsupportedMemory(
            "module declares no memory import".to_string(),
        )),
        (MemoryStrategy::Imported, Some((module, name, ty))) => {
            let memory = Memory::new(&mut *store, ty).map_err(Error::Instantiate)?;
            linker
                .define(&*store, &module, &name, memory)
                .map_err(Error::Instantiate)?;
            Ok(Some(memory))
        }
    }
}

fn required<P, R>(instance: &Instance, store: &mut Store<BridgeCtx>, name: &str) -> Result<TypedFunc<P, R>>
where
    P: wasmtime::WasmParams,
    R: wasmtime::WasmResults,
{
    instance
        .get_typed_func::<P, R>(&mut *store, name)
        .map_err(|e| Error::MissingExport(format!("{}: {}", name, e)))
}

/// Feature detection: absent is `None`, present with a bad signature is an error.
fn optional<P, R>(instance: &Instance, store: &mut Store<BridgeCtx>, name: &str) -> Result<Option<TypedFunc<P, R>>>
where
    P: wasmtime::WasmParams,
    R: wasmtime::WasmResults,
{
    match instance.get_func(&mut *store, name) {
        None => Ok(None),
        Some(func) => func
            .typed::<P, R>(&*store)
            .map(Some)
            .map_err(|e| Error::MissingExport(format!("{}: {}", name, e))),
    }
}

impl Live {
    /// Resolves `region` against the current memory size.
    fn bounds(&self, region: Region) -> Result<std::ops::Range<usize>> {
        let end = region.end().ok_or(Error::OutOfBounds(region))?;
        let start = usize::try_from(region.ptr).map_err(|_| Error::OutOfBounds(region))?;
        let end = usize::try_from(end).map_err(|_| Error::OutOfBounds(region))?;
        if end > self.memory.data_size(&self.store) {
            return Err(Error::OutOfBounds(region));
        }
        Ok(start..end)
    }

    fn stats_mut(&mut self) -> &mut CallStats {
        &mut self.store.data_mut().stats
    }
}

impl Guest for ModuleBridge {
    fn is_ready(&self) -> bool {
        self.live.is_some()
    }

    fn stats(&self) -> CallStats {
        self.live
            .as_ref()
            .map(|live| live.store.data().stats)
            .unwrap_or_default()
    }

    fn supports(&self, capability: Capability) -> bool {
        self.live.as_ref().is_some_and(|live| match capability {
            Capability::LastError => live.exports.get_last_error.is_some(),
            Capability::DebugLog => live.exports.get_debug_log.is_some(),
        })
    }

    fn allocate(&mut self, len: u64) -> Result<u64> {
        let live = self.live()?;
        let ptr = live
            .exports
            .allocate
            .call(&mut live.store, wide(len))
            .map_err(Error::Trap)? as u64;
        if ptr != 0 {
            live.stats_mut().allocations += 1;
        }
        tracing::trace!(ptr, len, "allocate");
        Ok(ptr)
    }

    fn free(&mut self, region: Region) -> Result<()> {
        let live = self.live()?;
        live.exports
            .free
            .call(&mut live.store, ptr_len(region))
            .map_err(Error::Trap)?;
        live.stats_mut().frees += 1;
        tracing::trace!(%region, "free");
        Ok(())
    }

    fn write(&mut self, ptr: u64, bytes: &[u8]) -> Result<()> {
        let live = self.live()?;
        let range = live.bounds(Region::new(ptr, bytes.len() as u64))?;
        live.memory.data_mut(&mut live.store)[range].copy_from_slice(bytes);
        Ok(())
    }

    fn read(&mut self, region: Region) -> Result<Vec<u8>> {
        let live = self.live()?;
        let range = live.bounds(region)?;
        Ok(live.memory.data(&live.store)[range].to_vec())
    }

    fn load(&mut self, data: Region) -> Result<i32> {
        let live = self.live()?;
        if live.session {
            return Err(Error::AlreadyLoaded);
        }
        let status = live
            .exports
            .load
            .call(&mut live.store, ptr_len(data))
            .map_err(Error::Trap)?;
        live.stats_mut().loads += 1;
        live.session = status == 0;
        tracing::debug!(%data, status, "load");
        Ok(status)
    }

    fn query_triples(&mut self, pattern: PatternRegions, out: Region) -> Result<i64> {
        let live = self.live()?;
        let [s, p, o] = pattern.map(ptr_len);
        let (out_ptr, out_cap) = ptr_len(out);
        let written = live
            .exports
            .query_triples
            .call(&mut live.store, (s.0, s.1, p.0, p.1, o.0, o.1, out_ptr, out_cap))
            .map_err(Error::Trap)?;
        live.stats_mut().queries += 1;
        tracing::trace!(written, "query_triples");
        Ok(written)
    }

    fn count_triples(&mut self, pattern: PatternRegions) -> Result<u64> {
        let live = self.live()?;
        let [s, p, o] = pattern.map(ptr_len);
        let raw = live
            .exports
            .count_triples
            .call(&mut live.store, (s.0, s.1, p.0, p.1, o.0, o.1))
            .map_err(Error::Trap)?;
        live.stats_mut().counts += 1;
        if raw < 0 {
            tracing::warn!(raw, "negative count from guest, ABI mismatch?");
        }
        let count = raw as u64;
        tracing::trace!(count, "count_triples");
        Ok(count)
    }

    fn size_in_bytes(&mut self) -> Result<u64> {
        let live = self.live()?;
        let size = live
            .exports
            .size_in_bytes
            .call(&mut live.store, ())
            .map_err(Error::Trap)?;
        Ok(size as u64)
    }

    fn last_error(&mut self, buf: Region) -> Result<Option<u64>> {
        let live = self.live()?;
        let Some(func) = live.exports.get_last_error.clone() else {
            return Ok(None);
        };
        let written = func.call(&mut live.store, ptr_len(buf)).map_err(Error::Trap)?;
        Ok(Some(written.max(0) as u64))
    }

    fn debug_log(&mut self, buf: Region) -> Result<Option<u64>> {
        let live = self.live()?;
        let Some(func) = live.exports.get_debug_log.clone() else {
            return Ok(None);
        };
        let written = func.call(&mut live.store, ptr_len(buf)).map_err(Error::Trap)?;
        Ok(Some(written.max(0) as u64))
    }
}
