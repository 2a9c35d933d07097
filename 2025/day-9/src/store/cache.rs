use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;

use super::{GreenRow, RowSource};
use crate::config::DEFAULT_ROW_CACHE;
use crate::error::Result;

/// How a worker's [`RowCache`] bounds itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Keep up to `capacity` rows, then drop them all at once.
    ClearOnOverflow { capacity: usize },
    /// Keep the `capacity` most recently used rows.
    Lru { capacity: usize },
    Disabled,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::ClearOnOverflow {
            capacity: DEFAULT_ROW_CACHE,
        }
    }
}

enum Slots {
    Map {
        rows: HashMap<i64, Option<GreenRow>>,
        capacity: usize,
    },
    Lru(LruCache<i64, Option<GreenRow>>),
    Disabled,
}

/// Bounded per-worker cache in front of a [`RowSource`]. Absent rows are cached too.
pub struct RowCache {
    slots: Slots,
    hits: u64,
    misses: u64,
}

impl RowCache {
    pub fn new(policy: CachePolicy) -> Self {
        let slots = match policy {
            CachePolicy::ClearOnOverflow { capacity } => Slots::Map {
                rows: HashMap::with_capacity(capacity),
                capacity: capacity.max(1),
            },
            CachePolicy::Lru { capacity } => Slots::Lru(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            CachePolicy::Disabled => Slots::Disabled,
        };
        Self {
            slots,
            hits: 0,
            misses: 0,
        }
    }

    pub fn get_or_load<S: RowSource + ?Sized>(
        &mut self,
        y: i64,
        source: &mut S,
    ) -> Result<Option<GreenRow>> {
        let cached = match &mut self.slots {
            Slots::Map { rows, .. } => rows.get(&y).cloned(),
            Slots::Lru(lru) => lru.get(&y).cloned(),
            Slots::Disabled => None,
        };
        if let Some(row) = cached {
            self.hits += 1;
            return Ok(row);
        }

        self.misses += 1;
        let row = source.load_row(y)?;
        match &mut self.slots {
            Slots::Map { rows, capacity } => {
                if rows.len() >= *capacity {
                    rows.clear();
                }
                rows.insert(y, row.clone());
            }
            Slots::Lru(lru) => {
                lru.put(y, row.clone());
            }
            Slots::Disabled => {}
        }
        Ok(row)
    }

    pub fn len(&self) -> usize {
        match &self.slots {
            Slots::Map { rows, .. } => rows.len(),
            Slots::Lru(lru) => lru.len(),
            Slots::Disabled => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::store::{MemoryRows, RowRecord};

    /// Counts how often the cache falls through to the rows.
    struct Counting {
        rows: MemoryRows,
        loads: usize,
    }

    impl RowSource for Counting {
        fn load_row(&mut self, y: i64) -> Result<Option<GreenRow>> {
            self.loads += 1;
            self.rows.load_row(y)
        }
    }

    fn source() -> Counting {
        Counting {
            rows: MemoryRows::from_records((0..10).map(|y| RowRecord::new(y, vec![y]))),
            loads: 0,
        }
    }

    #[test]
    fn clear_on_overflow_drops_everything() -> Result<()> {
        let mut source = source();
        let mut cache = RowCache::new(CachePolicy::ClearOnOverflow { capacity: 3 });
        for y in 0..3 {
            cache.get_or_load(y, &mut source)?;
        }
        assert_eq!(3, cache.len());
        cache.get_or_load(1, &mut source)?;
        assert_eq!(3, source.loads);

        cache.get_or_load(3, &mut source)?;
        assert_eq!(1, cache.len());
        cache.get_or_load(0, &mut source)?;
        assert_eq!(5, source.loads);
        assert_eq!(1, cache.hits());
        Ok(())
    }

    #[test]
    fn lru_keeps_recent_rows() -> Result<()> {
        let mut source = source();
        let mut cache = RowCache::new(CachePolicy::Lru { capacity: 2 });
        cache.get_or_load(0, &mut source)?;
        cache.get_or_load(1, &mut source)?;
        cache.get_or_load(0, &mut source)?;
        cache.get_or_load(2, &mut source)?;
        assert_eq!(2, cache.len());

        cache.get_or_load(0, &mut source)?;
        assert_eq!(3, source.loads);
        cache.get_or_load(1, &mut source)?;
        assert_eq!(4, source.loads);
        Ok(())
    }

    #[test]
    fn caches_missing_rows() -> Result<()> {
        let mut source = source();
        let mut cache = RowCache::new(CachePolicy::default());
        assert_eq!(None, cache.get_or_load(42, &mut source)?);
        assert_eq!(None, cache.get_or_load(42, &mut source)?);
        assert_eq!(1, source.loads);
        Ok(())
    }

    #[test]
    fn disabled_always_loads() -> Result<()> {
        let mut source = source();
        let mut cache = RowCache::new(CachePolicy::Disabled);
        cache.get_or_load(4, &mut source)?;
        cache.get_or_load(4, &mut source)?;
        assert_eq!(2, source.loads);
        assert!(cache.is_empty());
        Ok(())
    }
}
