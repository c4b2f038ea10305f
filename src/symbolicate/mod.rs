//! Incremental symbolication and function merging.
//!
//! Address-to-symbol resolution is delegated to an injected
//! [`SymbolProvider`]. The engine is structured so the rest of the pipeline
//! never waits on the provider: it hands out the pending per-library
//! requests, the caller resolves them whenever it likes, and each completed
//! batch is applied atomically. Functions that resolve to the same symbol
//! within the same resource are merged, and every table referencing function
//! indices is rewritten through the resulting remap in one step.
//!
//! Derived call-node structures built before symbolication completes stay
//! valid to read; the per-batch generation bump tells their caches to drop
//! and rebuild exactly once (see [`crate::call_tree::CallTreeCache`]).

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::string_table::StringIndex;
use crate::tables::thread::{FuncTable, LibIndex, Thread};
use crate::tables::{Capture, Library};
use crate::utils::error::SymbolError;

/// Identifies a library to a symbol-information provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LibraryIdentity {
    pub debug_name: String,
    pub breakpad_id: String,
}

impl From<&Library> for LibraryIdentity {
    fn from(lib: &Library) -> Self {
        Self {
            debug_name: lib.debug_name.clone(),
            breakpad_id: lib.breakpad_id.clone(),
        }
    }
}

/// All addresses observed for one library across the capture.
#[derive(Debug, Clone)]
pub struct SymbolRequest {
    pub lib: LibIndex,
    pub identity: LibraryIdentity,
    pub addresses: Vec<u64>,
}

/// Resolved symbols for one library. May be partial: unresolved addresses
/// simply keep their placeholder names.
#[derive(Debug, Clone)]
pub struct ResolvedBatch {
    pub lib: LibIndex,
    pub symbols: HashMap<u64, String>,
}

/// Injected capability that resolves code addresses to symbol names.
///
/// Implementations may answer from local symbol files, a symbol server, or
/// anything else; they are free to return partial results and must report
/// failures per library.
pub trait SymbolProvider {
    fn resolve(
        &self,
        identity: &LibraryIdentity,
        addresses: &[u64],
    ) -> Result<HashMap<u64, String>, SymbolError>;
}

/// Drives incremental symbolication of one capture.
pub struct SymbolicationEngine {
    pending: Vec<SymbolRequest>,
    generation: u64,
}

impl SymbolicationEngine {
    /// Collect the (library, address) pairs observed across all threads'
    /// frame tables into per-library requests.
    pub fn new(capture: &Capture) -> Self {
        let mut addresses_by_lib: HashMap<LibIndex, Vec<u64>> = HashMap::new();
        for thread in &capture.threads {
            for frame in 0..thread.frame_table.length {
                let Some(address) = thread.frame_table.address[frame] else {
                    continue;
                };
                let func = thread.frame_table.func[frame];
                let Some(lib) = lib_of_func(thread, func) else {
                    continue;
                };
                let addresses = addresses_by_lib.entry(lib).or_default();
                if !addresses.contains(&address) {
                    addresses.push(address);
                }
            }
        }

        let mut pending: Vec<SymbolRequest> = addresses_by_lib
            .into_iter()
            .map(|(lib, mut addresses)| {
                addresses.sort_unstable();
                SymbolRequest {
                    lib,
                    identity: LibraryIdentity::from(&capture.libs[lib]),
                    addresses,
                }
            })
            .collect();
        pending.sort_by_key(|r| r.lib);
        debug!("symbolication: {} libraries pending", pending.len());
        Self {
            pending,
            generation: 0,
        }
    }

    /// Requests not yet resolved. Empty once symbolication is complete (or
    /// canceled).
    pub fn pending_requests(&self) -> &[SymbolRequest] {
        &self.pending
    }

    /// The merge-batch generation. Starts at zero and bumps once per applied
    /// batch that changed anything.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Discard all in-flight resolution state, e.g. when a new capture
    /// replaces this one. Merges already applied are not rolled back.
    pub fn cancel(&mut self) {
        self.pending.clear();
    }

    /// Resolve every pending request with `provider` and apply the results.
    ///
    /// A provider failure for one library is logged and skipped; it never
    /// blocks symbolication of the others. Returns the final generation.
    pub fn run(&mut self, capture: &mut Capture, provider: &dyn SymbolProvider) -> u64 {
        let requests = std::mem::take(&mut self.pending);
        for request in requests {
            match provider.resolve(&request.identity, &request.addresses) {
                Ok(symbols) => {
                    let batch = ResolvedBatch {
                        lib: request.lib,
                        symbols,
                    };
                    self.apply_batch(capture, &batch);
                }
                Err(err) => {
                    warn!(
                        "symbolication of {} failed, leaving its functions unresolved: {err}",
                        request.identity.debug_name
                    );
                }
            }
        }
        self.generation
    }

    /// Apply one library's resolved symbols: assign names, merge functions
    /// that resolved to the same symbol within the same resource, and
    /// rewrite all function references through the remap.
    ///
    /// The update is atomic per thread table set; callers never observe a
    /// frame table remapped ahead of its func table. Re-entrant: a later
    /// batch can merge on top of the result of an earlier one.
    pub fn apply_batch(&mut self, capture: &mut Capture, batch: &ResolvedBatch) -> u64 {
        self.pending.retain(|request| request.lib != batch.lib);

        let mut changed = false;
        for (thread_index, thread) in capture.threads.iter_mut().enumerate() {
            if merge_thread_funcs(thread, batch, &mut capture.shared.string_array) {
                debug!("thread {thread_index}: functions remapped after symbolication");
                changed = true;
            }
        }
        if changed {
            self.generation += 1;
            info!(
                "applied symbol batch for lib {} (generation {})",
                batch.lib, self.generation
            );
        }
        self.generation
    }
}

/// The library a function's resource points at, if any.
fn lib_of_func(thread: &Thread, func: usize) -> Option<LibIndex> {
    let resource = thread.func_table.resource.get(func).copied().flatten()?;
    thread.resource_table.lib.get(resource).copied().flatten()
}

/// Merge a thread's functions after name resolution. Returns true if any
/// name changed or any rows merged.
fn merge_thread_funcs(
    thread: &mut Thread,
    batch: &ResolvedBatch,
    strings: &mut crate::string_table::StringTable,
) -> bool {
    // Resolved name per func, from the frames that carry addresses.
    let mut resolved: HashMap<usize, StringIndex> = HashMap::new();
    for frame in 0..thread.frame_table.length {
        let Some(address) = thread.frame_table.address[frame] else {
            continue;
        };
        let func = thread.frame_table.func[frame];
        if lib_of_func(thread, func) != Some(batch.lib) {
            continue;
        }
        if let Some(symbol) = batch.symbols.get(&address) {
            resolved.entry(func).or_insert_with(|| strings.intern(symbol));
        }
    }
    if resolved.is_empty() {
        return false;
    }

    // Choose survivors: the first (lowest-index) func for each
    // (name, resource) key after name assignment. This is the same key the
    // builder deduplicates with, so repeated merges are stable.
    let old = &thread.func_table;
    let mut merged = FuncTable::default();
    let mut survivor: HashMap<(StringIndex, Option<usize>), usize> = HashMap::new();
    let mut remap = Vec::with_capacity(old.length);
    for func in 0..old.length {
        let name = resolved.get(&func).copied().unwrap_or(old.name[func]);
        let key = (name, old.resource[func]);
        let new_index = *survivor.entry(key).or_insert_with(|| {
            merged.push(
                name,
                old.file[func],
                old.line[func],
                old.is_js[func],
                old.resource[func],
            )
        });
        remap.push(new_index);
    }

    // Single atomic application: the new func table and the rewritten frame
    // references land together.
    thread.func_table = merged;
    for func in thread.frame_table.func.iter_mut() {
        *func = remap[*func];
    }
    true
}
