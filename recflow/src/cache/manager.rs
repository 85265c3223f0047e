//! Memory-bounded LRU store for stage results.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use super::key::composite_key;
use super::spill::{read_spill, remove_spill, write_spill};
use crate::model::{
    CacheConfig, CacheMap, CachePolicy, CachedResult, Fork, ForkId, Stage, StageId,
    DEFAULT_MAX_MEMORY_BYTES,
};

/// Results larger than this are written to disk when a spill dir is set.
pub const SPILL_THRESHOLD_BYTES: u64 = 50 * 1024 * 1024;

/// Storage the executor reads from and writes to.
///
/// Implemented for the plain [`CacheMap`] held by a state and for
/// [`CacheManager`].
pub trait ResultCache {
    /// Fetches a result, counting as an access.
    fn lookup(&mut self, input_id: &str, stage_id: &str) -> Option<Arc<CachedResult>>;

    /// Checks presence without counting as an access.
    fn contains(&self, input_id: &str, stage_id: &str) -> bool;

    /// Stores a result under its own input and stage ids.
    fn store(&mut self, result: Arc<CachedResult>);
}

impl ResultCache for CacheMap {
    fn lookup(&mut self, input_id: &str, stage_id: &str) -> Option<Arc<CachedResult>> {
        self.get(&composite_key(input_id, stage_id)).cloned()
    }

    fn contains(&self, input_id: &str, stage_id: &str) -> bool {
        self.contains_key(&composite_key(input_id, stage_id))
    }

    fn store(&mut self, result: Arc<CachedResult>) {
        self.insert(composite_key(&result.input_id, &result.stage_id), result);
    }
}

#[derive(Debug)]
struct CacheEntry {
    result: Arc<CachedResult>,
    access_order: u64,
}

/// LRU cache with a memory cap, admission policy and disk spill.
///
/// Eviction scans every entry for the lowest access counter, so it is
/// linear in the number of entries.
#[derive(Debug)]
pub struct CacheManager {
    entries: HashMap<String, CacheEntry>,
    current_size_bytes: u64,
    max_memory_bytes: u64,
    cache_policy: CachePolicy,
    pinned_stage_ids: HashSet<StageId>,
    spill_dir: Option<PathBuf>,
    access_counter: u64,
}

impl CacheManager {
    /// Creates an empty manager. Without a spill dir nothing is spilled.
    #[must_use]
    pub fn new(config: &CacheConfig, spill_dir: Option<PathBuf>) -> Self {
        Self {
            entries: HashMap::new(),
            current_size_bytes: 0,
            max_memory_bytes: effective_max(config.max_memory_bytes),
            cache_policy: config.cache_policy,
            pinned_stage_ids: config.pinned_stage_ids.clone(),
            spill_dir,
            access_counter: 0,
        }
    }

    /// Applies new limits and policy. Switching to [`CachePolicy::None`]
    /// empties the cache.
    pub fn update_config(&mut self, config: &CacheConfig) {
        self.max_memory_bytes = effective_max(config.max_memory_bytes);
        self.cache_policy = config.cache_policy;
        self.pinned_stage_ids = config.pinned_stage_ids.clone();

        if self.cache_policy == CachePolicy::None {
            self.clear();
        }
    }

    /// Returns true if the current policy admits results for `stage_id`.
    #[must_use]
    pub fn should_cache(&self, stage_id: &str) -> bool {
        match self.cache_policy {
            CachePolicy::None => false,
            CachePolicy::Selective => self.pinned_stage_ids.contains(stage_id),
            CachePolicy::All => true,
        }
    }

    /// Fetches a result and marks it most recently used.
    ///
    /// Spilled results are read back from disk; if that fails the entry is
    /// dropped and `None` is returned.
    pub fn get(&mut self, input_id: &str, stage_id: &str) -> Option<Arc<CachedResult>> {
        let key = composite_key(input_id, stage_id);
        let entry = self.entries.get_mut(&key)?;

        if let Some(path) = entry.result.spill_file.as_deref() {
            if entry.result.records.is_empty() {
                match read_spill(path) {
                    Ok(records) => {
                        let mut result = CachedResult::clone(&entry.result);
                        result.records = records;
                        entry.result = Arc::new(result);
                    }
                    Err(err) => {
                        warn!(key = %key, error = %err, "Dropping unreadable spilled result");
                        self.evict_entry(&key);
                        return None;
                    }
                }
            }
        }

        self.access_counter += 1;
        entry.access_order = self.access_counter;
        Some(Arc::clone(&entry.result))
    }

    /// Checks presence without touching LRU order.
    #[must_use]
    pub fn has(&self, input_id: &str, stage_id: &str) -> bool {
        self.entries.contains_key(&composite_key(input_id, stage_id))
    }

    /// Stores a result, spilling and evicting as needed.
    ///
    /// Rejected silently when the policy does not admit the stage.
    pub fn put(&mut self, result: impl Into<Arc<CachedResult>>) {
        let result = result.into();
        if !self.should_cache(&result.stage_id) {
            debug!(stage_id = %result.stage_id, policy = %self.cache_policy, "Result not admitted");
            return;
        }

        let key = composite_key(&result.input_id, &result.stage_id);
        self.remove_entry(&key, result.spill_file.as_deref());

        // Already-spilled results keep their file and count 0 bytes.
        let stored = match self.spill_dir.as_deref() {
            Some(dir) if result.size_bytes > SPILL_THRESHOLD_BYTES && !result.is_spilled() => {
                spill(dir, &key, result)
            }
            _ => result,
        };

        let incoming = stored.in_memory_size();
        while self.current_size_bytes + incoming > self.max_memory_bytes && !self.entries.is_empty() {
            self.evict_lru();
        }

        self.access_counter += 1;
        self.entries.insert(
            key,
            CacheEntry {
                result: stored,
                access_order: self.access_counter,
            },
        );
        self.current_size_bytes += incoming;
    }

    /// Drops a stage's results for every input.
    pub fn invalidate_stage(&mut self, stage_id: &str) {
        self.evict_where(|result| result.stage_id == stage_id);
    }

    /// Drops a stage's results and those of every later stage in its fork.
    ///
    /// Unknown stages, forks or positions leave the cache untouched.
    pub fn invalidate_cascade(
        &mut self,
        stage_id: &str,
        forks: &HashMap<ForkId, Fork>,
        stages: &HashMap<StageId, Stage>,
    ) {
        let Some(fork) = stages.get(stage_id).and_then(|s| forks.get(&s.fork_id)) else {
            return;
        };
        let Some(index) = fork.index_of(stage_id) else {
            return;
        };

        let doomed: HashSet<&str> = fork.stage_ids[index..].iter().map(String::as_str).collect();
        self.evict_where(|result| doomed.contains(result.stage_id.as_str()));
    }

    /// Removes everything, deleting spill files.
    pub fn clear(&mut self) {
        for entry in self.entries.values() {
            if let Some(path) = entry.result.spill_file.as_deref() {
                remove_spill(path);
            }
        }
        self.entries.clear();
        self.current_size_bytes = 0;
    }

    /// Flat copy of all entries keyed by composite key.
    #[must_use]
    pub fn to_map(&self) -> CacheMap {
        self.entries
            .iter()
            .map(|(key, entry)| (key.clone(), Arc::clone(&entry.result)))
            .collect()
    }

    /// Replaces the contents with `map`, re-applying policy and limits.
    ///
    /// Spill files referenced by `map` are kept; other files owned by the
    /// current entries are deleted.
    pub fn from_map(&mut self, map: &CacheMap) {
        let referenced: HashSet<&Path> = map
            .values()
            .filter_map(|result| result.spill_file.as_deref())
            .collect();
        for entry in self.entries.values() {
            if let Some(path) = entry.result.spill_file.as_deref() {
                if !referenced.contains(path) {
                    remove_spill(path);
                }
            }
        }
        self.entries.clear();
        self.current_size_bytes = 0;

        for result in map.values() {
            self.put(Arc::clone(result));
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes currently counted against the memory cap.
    #[must_use]
    pub const fn memory_usage_bytes(&self) -> u64 {
        self.current_size_bytes
    }

    /// Effective memory cap.
    #[must_use]
    pub const fn max_memory_bytes(&self) -> u64 {
        self.max_memory_bytes
    }

    /// Directory spill files are written to.
    #[must_use]
    pub fn spill_dir(&self) -> Option<&Path> {
        self.spill_dir.as_deref()
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.access_order)
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            debug!(key = %key, "Evicting least recently used result");
            self.evict_entry(&key);
        }
    }

    fn evict_where(&mut self, predicate: impl Fn(&CachedResult) -> bool) {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| predicate(&entry.result))
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            self.evict_entry(&key);
        }
    }

    fn evict_entry(&mut self, key: &str) {
        self.remove_entry(key, None);
    }

    /// Removes an entry and its spill file unless that file is `keep_file`.
    fn remove_entry(&mut self, key: &str, keep_file: Option<&Path>) {
        let Some(entry) = self.entries.remove(key) else {
            return;
        };
        self.current_size_bytes = self
            .current_size_bytes
            .saturating_sub(entry.result.in_memory_size());
        if let Some(path) = entry.result.spill_file.as_deref() {
            if keep_file != Some(path) {
                remove_spill(path);
            }
        }
    }
}

impl ResultCache for CacheManager {
    fn lookup(&mut self, input_id: &str, stage_id: &str) -> Option<Arc<CachedResult>> {
        self.get(input_id, stage_id)
    }

    fn contains(&self, input_id: &str, stage_id: &str) -> bool {
        self.has(input_id, stage_id)
    }

    fn store(&mut self, result: Arc<CachedResult>) {
        self.put(result);
    }
}

const fn effective_max(configured: u64) -> u64 {
    if configured == 0 {
        DEFAULT_MAX_MEMORY_BYTES
    } else {
        configured
    }
}

/// Writes the records to disk and returns a record-less copy pointing at
/// the file. Keeps the original in memory if the write fails.
fn spill(dir: &Path, key: &str, result: Arc<CachedResult>) -> Arc<CachedResult> {
    match write_spill(dir, key, &result.records) {
        Ok(path) => {
            let mut spilled = CachedResult::clone(&result);
            spilled.records = Vec::new();
            spilled.spill_file = Some(path);
            Arc::new(spilled)
        }
        Err(err) => {
            warn!(key = %key, error = %err, "Spill failed, keeping result in memory");
            result
        }
    }
}
