//! In-process guest for testing.
//!
//! `MockGuest` implements the full [`Guest`] surface over a plain byte vector
//! that grows like linear memory. It keeps a ledger of live allocations so
//! tests can assert that every buffer was released, and it counts calls so
//! tests can assert which boundary paths an operation took.
//!
//! Its dataset format is one triple per line, three tab-separated fields, each
//! in the store's term syntax (see [`Term::to_pattern`]).

use std::collections::HashMap;

use crate::codec;
use crate::codec::Term;
use crate::codec::Triple;
use crate::guest::CallStats;
use crate::guest::Capability;
use crate::guest::Error;
use crate::guest::Guest;
use crate::guest::PatternRegions;
use crate::guest::Region;
use crate::guest::Result;

const ALIGN: u64 = 8;

pub struct MockGuest {
    memory: Vec<u8>,
    next: u64,
    live: HashMap<u64, u64>,
    triples: Option<Vec<[String; 3]>>,
    last_error: Option<String>,
    log: Vec<String>,
    stats: CallStats,
    ready: bool,
    fail_after: Option<u64>,
    misreport: Option<u64>,
    last_error_export: bool,
    debug_log_export: bool,
}

impl MockGuest {
    pub const STATUS_NOT_UTF8: i32 = 1;
    pub const STATUS_BAD_LINE: i32 = 2;
    pub const STATUS_CAPACITY: i64 = -1;
    pub const STATUS_BAD_PATTERN: i64 = -2;
    pub const STATUS_NO_SESSION: i64 = -3;

    /// A ready guest with every optional export present.
    pub fn new() -> Self {
        Self {
            memory: vec![0; ALIGN as usize],
            next: ALIGN,
            live: HashMap::new(),
            triples: None,
            last_error: None,
            log: Vec::new(),
            stats: CallStats::default(),
            ready: true,
            fail_after: None,
            misreport: None,
            last_error_export: true,
            debug_log_export: true,
        }
    }

    /// A guest that behaves as if the module was never instantiated.
    pub fn unready() -> Self {
        Self {
            ready: false,
            ..Self::new()
        }
    }

    pub fn without_last_error(mut self) -> Self {
        self.last_error_export = false;
        self
    }

    pub fn without_debug_log(mut self) -> Self {
        self.debug_log_export = false;
        self
    }

    /// Lets `n` more allocations succeed, then returns null pointers.
    pub fn fail_allocations_after(&mut self, n: u64) {
        self.fail_after = Some(n);
    }

    /// Makes the next `query_triples` claim to have written `len` bytes.
    pub fn misreport_query_length(&mut self, len: u64) {
        self.misreport = Some(len);
    }

    pub fn set_last_error(&mut self, message: &str) {
        self.last_error = Some(message.to_string());
    }

    /// Buffers currently allocated and not yet freed.
    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    /// Current size of the simulated linear memory.
    pub fn memory_size(&self) -> u64 {
        self.memory.len() as u64
    }

    /// Serializes triples in this guest's dataset format.
    pub fn dataset_bytes(triples: &[Triple]) -> Vec<u8> {
        let mut out = String::new();
        for triple in triples {
            out.push_str(&triple.subject.to_pattern());
            out.push('\t');
            out.push_str(&triple.predicate.to_pattern());
            out.push('\t');
            out.push_str(&triple.object.to_pattern());
            out.push('\n');
        }
        out.into_bytes()
    }

    fn check_ready(&self) -> Result<()> {
        if self.ready { Ok(()) } else { Err(Error::NotReady) }
    }

    fn range(&self, region: Region) -> Result<std::ops::Range<usize>> {
        let end = region.end().ok_or(Error::OutOfBounds(region))?;
        if end > self.memory.len() as u64 {
            return Err(Error::OutOfBounds(region));
        }
        Ok(region.ptr as usize..end as usize)
    }

    fn pattern_string(&self, region: Region) -> Result<Option<String>> {
        if region.len == 0 {
            return Ok(None);
        }
        let bytes = &self.memory[self.range(region)?];
        Ok(Some(String::from_utf8_lossy(bytes).into_owned()))
    }

    fn matching(&self, pattern: PatternRegions) -> Result<Option<Vec<[String; 3]>>> {
        let Some(triples) = &self.triples else {
            return Ok(None);
        };
        let [s, p, o] = [
            self.pattern_string(pattern[0])?,
            self.pattern_string(pattern[1])?,
            self.pattern_string(pattern[2])?,
        ];
        let hit = |want: &Option<String>, have: &String| want.as_ref().is_none_or(|w| w == have);
        Ok(Some(
            triples
                .iter()
                .filter(|t| hit(&s, &t[0]) && hit(&p, &t[1]) && hit(&o, &t[2]))
                .cloned()
                .collect(),
        ))
    }

    fn fail(&mut self, message: String) {
        self.log.push(format!("error: {}", message));
        self.last_error = Some(message);
    }

    fn parse_dataset(text: &str) -> std::result::Result<Vec<[String; 3]>, String> {
        let mut triples = Vec::new();
        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            match fields.as_slice() {
                [s, p, o] => triples.push([s.to_string(), p.to_string(), o.to_string()]),
                _ => {
                    return Err(format!(
                        "line {}: expected 3 tab-separated fields, found {}",
                        index + 1,
                        fields.len()
                    ));
                }
            }
        }
        Ok(triples)
    }

    fn decode_row(row: &[String; 3]) -> codec::Result<Triple> {
        Ok(Triple::new(
            Term::from_pattern(&row[0])?,
            Term::from_pattern(&row[1])?,
            Term::from_pattern(&row[2])?,
        ))
    }

    fn copy_out(&mut self, buf: Region, bytes: &[u8]) -> Result<u64> {
        let written = (bytes.len() as u64).min(buf.len);
        let range = self.range(Region::new(buf.ptr, written))?;
        self.memory[range].copy_from_slice(&bytes[..written as usize]);
        Ok(written)
    }
}

impl Default for MockGuest {
    fn default() -> Self {
        Self::new()
    }
}

impl Guest for MockGuest {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn stats(&self) -> CallStats {
        self.stats
    }

    fn supports(&self, capability: Capability) -> bool {
        self.ready
            && match capability {
                Capability::LastError => self.last_error_export,
                Capability::DebugLog => self.debug_log_export,
            }
    }

    fn allocate(&mut self, len: u64) -> Result<u64> {
        self.check_ready()?;
        if let Some(remaining) = self.fail_after.as_mut() {
            if *remaining == 0 {
                return Ok(0);
            }
            *remaining -= 1;
        }
        let ptr = self.next;
        self.next = (ptr + len).div_ceil(ALIGN) * ALIGN;
        // Growth: anything the host held onto before this point is stale.
        if self.next > self.memory_size() {
            self.memory.resize(self.next as usize, 0);
        }
        self.live.insert(ptr, len);
        self.stats.allocations += 1;
        Ok(ptr)
    }

    fn free(&mut self, region: Region) -> Result<()> {
        self.check_ready()?;
        match self.live.remove(&region.ptr) {
            Some(len) if len == region.len => {
                self.stats.frees += 1;
                if self.live.is_empty() {
                    self.next = ALIGN;
                }
                Ok(())
            }
            Some(len) => Err(Error::Trap(wasmtime::Error::msg(format!(
                "free of {} with length {}, allocated with {}",
                region.ptr, region.len, len
            )))),
            None => Err(Error::Trap(wasmtime::Error::msg(format!(
                "free of unallocated pointer {}",
                region.ptr
            )))),
        }
    }

    fn write(&mut self, ptr: u64, bytes: &[u8]) -> Result<()> {
        self.check_ready()?;
        let range = self.range(Region::new(ptr, bytes.len() as u64))?;
        self.memory[range].copy_from_slice(bytes);
        Ok(())
    }

    fn read(&mut self, region: Region) -> Result<Vec<u8>> {
        self.check_ready()?;
        let range = self.range(region)?;
        Ok(self.memory[range].to_vec())
    }

    fn load(&mut self, data: Region) -> Result<i32> {
        self.check_ready()?;
        if self.triples.is_some() {
            return Err(Error::AlreadyLoaded);
        }
        self.stats.loads += 1;

        let bytes = self.memory[self.range(data)?].to_vec();
        let Ok(text) = String::from_utf8(bytes) else {
            self.fail("dataset is not UTF-8".to_string());
            return Ok(Self::STATUS_NOT_UTF8);
        };
        match Self::parse_dataset(&text) {
            Ok(triples) => {
                self.log.push(format!("load: {} triples", triples.len()));
                self.triples = Some(triples);
                Ok(0)
            }
            Err(message) => {
                self.fail(message);
                Ok(Self::STATUS_BAD_LINE)
            }
        }
    }

    fn query_triples(&mut self, pattern: PatternRegions, out: Region) -> Result<i64> {
        self.check_ready()?;
        self.stats.queries += 1;

        let Some(rows) = self.matching(pattern)? else {
            self.fail("no dataset loaded".to_string());
            return Ok(Self::STATUS_NO_SESSION);
        };
        let decoded: codec::Result<Vec<Triple>> = rows.iter().map(Self::decode_row).collect();
        let payload = match decoded.and_then(|triples| codec::encode_triples(&triples)) {
            Ok(payload) => payload,
            Err(e) => {
                self.fail(format!("bad stored term: {}", e));
                return Ok(Self::STATUS_BAD_PATTERN);
            }
        };
        if payload.len() as u64 > out.len {
            self.fail(format!(
                "result of {} bytes exceeds output capacity {}",
                payload.len(),
                out.len
            ));
            return Ok(Self::STATUS_CAPACITY);
        }

        let written = self.copy_out(out, &payload)?;
        self.log.push(format!("query: {} triples", rows.len()));
        Ok(self.misreport.take().unwrap_or(written) as i64)
    }

    fn count_triples(&mut self, pattern: PatternRegions) -> Result<u64> {
        self.check_ready()?;
        self.stats.counts += 1;
        Ok(self.matching(pattern)?.map_or(0, |rows| rows.len() as u64))
    }

    fn size_in_bytes(&mut self) -> Result<u64> {
        self.check_ready()?;
        let triples = self.triples.as_deref().unwrap_or_default();
        Ok(triples
            .iter()
            .flat_map(|row| row.iter())
            .map(|field| field.len() as u64)
            .sum())
    }

    fn last_error(&mut self, buf: Region) -> Result<Option<u64>> {
        self.check_ready()?;
        if !self.last_error_export {
            return Ok(None);
        }
        let message = self.last_error.clone().unwrap_or_default();
        self.copy_out(buf, message.as_bytes()).map(Some)
    }

    fn debug_log(&mut self, buf: Region) -> Result<Option<u64>> {
        self.check_ready()?;
        if !self.debug_log_export {
            return Ok(None);
        }
        let log = self.log.join("\n");
        self.log.clear();
        self.copy_out(buf, log.as_bytes()).map(Some)
    }
}
