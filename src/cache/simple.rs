use std::fmt;
use std::sync::Arc;

use super::item::{LineAccess, NtLineAccess};
use super::replacement::Replacement;
use super::{AddrDecoder, Cache, CacheError, SizeUnit};

/// The interface a cache presents to the level above it, and expects
/// from the level below it.
pub trait BlockingMemory {
    fn read(&mut self, addr: u64, buf: &mut [u8]) -> bool;
    fn write(&mut self, addr: u64, buf: &[u8]) -> bool;
}

/// Access counters. These are an approximation only: the cache lacks
/// the full context of an access, so callers wanting exact statistics
/// must keep their own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub castouts: u64,
    pub reloads: u64,
    pub reads: u64,
    pub writes: u64,
    pub read_misses: u64,
    pub write_misses: u64,
    pub next_level_writes: u64,
    pub getline_misses: u64,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  num_reads:            {}", self.reads)?;
        writeln!(f, "  num_writes:           {}", self.writes)?;
        writeln!(f, "  num_read_misses:      {}", self.read_misses)?;
        writeln!(f, "  num_write_misses:     {}", self.write_misses)?;
        writeln!(f, "  num_castouts:         {}", self.castouts)?;
        writeln!(f, "  num_reloads:          {}", self.reloads)?;
        writeln!(f, "  num_write_next_level: {}", self.next_level_writes)?;
        write!(f, "  num_getline_misses:   {}", self.getline_misses)
    }
}

/// Result of a non-mutating hit/victim probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CastoutQuery {
    pub hit: bool,
    pub needs_castout: bool,
    pub castout_addr: u64,
    pub is_dirty: bool,
}

/// A blocking read/write cache.
///
/// By default the cache is write-back and no-write-allocate; flip the
/// modes with `set_write_through` and `set_write_allocate`. Misses
/// run a victim/castout/reload pipeline against the optional next
/// level.
pub struct SimpleCache<I> {
    cache: Cache<I>,
    write_through: bool,
    write_allocate: bool,
    next_level: Option<Box<dyn BlockingMemory>>,
    stats: CacheStats,
}

impl<I: LineAccess> SimpleCache<I> {
    pub fn new(
        size: u64,
        unit: SizeUnit,
        line_size: u64,
        stride: u64,
        default_line: &I,
        policy: &Replacement,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            cache: Cache::new(size, unit, line_size, stride, default_line, policy)?,
            write_through: false,
            write_allocate: false,
            next_level: None,
            stats: CacheStats::default(),
        })
    }

    #[must_use]
    pub fn decoder(&self) -> &Arc<dyn AddrDecoder> {
        self.cache.decoder()
    }

    pub fn set_write_through(&mut self, write_through: bool) {
        self.write_through = write_through;
    }

    /// Write-allocate means a line is allocated on a write miss.
    pub fn set_write_allocate(&mut self, write_allocate: bool) {
        self.write_allocate = write_allocate;
    }

    /// Attach the memory level below this cache. Castouts and reloads
    /// are forwarded to it.
    pub fn set_next_level(&mut self, next: Box<dyn BlockingMemory>) {
        self.next_level = Some(next);
    }

    pub fn take_next_level(&mut self) -> Option<Box<dyn BlockingMemory>> {
        self.next_level.take()
    }

    #[must_use]
    pub fn is_hit(&self, addr: u64) -> bool {
        self.cache.peek_item(addr).is_some()
    }

    /// Pure probe: would `addr` hit, and if not, would its victim need
    /// a castout? Victim selection mirrors the allocation path
    /// (invalid slots first).
    #[must_use]
    pub fn hit_with_castout_query(&self, addr: u64) -> CastoutQuery {
        let mut query = CastoutQuery {
            hit: self.is_hit(addr),
            needs_castout: false,
            castout_addr: 0,
            is_dirty: false,
        };
        if !query.hit {
            let set = self.cache.peek_cache_set(addr);
            if set.find_invalid_way() == set.num_ways() {
                let victim = set.peek_lru_item();
                query.needs_castout = true;
                query.castout_addr = victim.address();
                query.is_dirty = victim.is_modified();
            }
        }
        query
    }

    /// Line holding `addr`, allocating one (victim/castout/reload) on
    /// a miss. MRU is updated.
    pub fn get_line(&mut self, addr: u64) -> &mut I {
        let tag = self.cache.decoder().tag(addr);
        if self.cache.peek_item(addr).is_none() {
            self.stats.getline_misses += 1;
            self.replace_line(addr);
        }
        let set = self.cache.cache_set(addr);
        let way = match set.get_by_tag(tag) {
            Some(line) => line.way(),
            None => unreachable!("line missing right after allocation"),
        };
        set.replacement_mut().touch_mru(way);
        set.get_way(way)
    }

    #[must_use]
    pub fn peek_line(&self, addr: u64) -> Option<&I> {
        self.cache.peek_item(addr)
    }

    /// Invalidate the line holding `addr` and rank it LRU. Panics when
    /// the address does not hit.
    pub fn invalidate_line(&mut self, addr: u64) {
        let tag = self.cache.decoder().tag(addr);
        let set = self.cache.cache_set(addr);
        let way = match set.get_by_tag(tag) {
            Some(line) => line.way(),
            None => panic!("invalidate_line: no line holds {addr:#x}"),
        };
        set.get_way(way).set_valid(false);
        set.replacement_mut().touch_lru(way);
    }

    pub fn invalidate_all(&mut self) {
        for set in self.cache.iter_mut() {
            for line in set.iter_mut() {
                line.set_valid(false);
            }
            set.replacement_mut().reset();
        }
    }

    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = CacheStats::default();
    }

    #[must_use]
    pub fn num_ways(&self) -> u32 {
        self.cache.num_ways()
    }

    #[must_use]
    pub fn num_sets(&self) -> u32 {
        self.cache.num_sets()
    }

    #[must_use]
    pub fn cache(&self) -> &Cache<I> {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut Cache<I> {
        &mut self.cache
    }

    /// Victim/castout/reload pipeline. On return the set holds a
    /// valid, clean line for `addr`'s block.
    fn replace_line(&mut self, addr: u64) {
        let blk_addr = self.cache.decoder().block_address(addr);
        let set = self.cache.cache_set(addr);
        let victim_way = set.victim_item().way();

        let victim = set.get_way(victim_way);
        if victim.is_valid() && victim.is_modified() {
            self.stats.castouts += 1;
            if let Some(next) = self.next_level.as_mut() {
                let mut line_buf = vec![0u8; victim.line_size() as usize];
                victim.read_bytes(0, &mut line_buf);
                next.write(victim.address(), &line_buf);
            }
        }

        self.stats.reloads += 1;
        let set = self.cache.cache_set(addr);
        let victim = set.get_way(victim_way);
        victim.set_valid(true);
        victim.set_address(blk_addr);
        victim.set_modified(false);
        if let Some(next) = self.next_level.as_mut() {
            let mut line_buf = vec![0u8; victim.line_size() as usize];
            next.read(blk_addr, &mut line_buf);
            victim.write_bytes(0, &line_buf);
        }
    }
}

impl<I: LineAccess> BlockingMemory for SimpleCache<I> {
    fn read(&mut self, addr: u64, buf: &mut [u8]) -> bool {
        self.stats.reads += 1;
        if self.cache.peek_item(addr).is_none() {
            self.stats.read_misses += 1;
            self.replace_line(addr);
        }

        let tag = self.cache.decoder().tag(addr);
        let offset = self.cache.decoder().block_offset(addr);
        let set = self.cache.cache_set(addr);
        let way = match set.get_by_tag(tag) {
            Some(line) => line.way(),
            None => unreachable!("line missing right after allocation"),
        };
        set.replacement_mut().touch_mru(way);
        set.get_way(way).read_bytes(offset, buf);
        true
    }

    fn write(&mut self, addr: u64, buf: &[u8]) -> bool {
        self.stats.writes += 1;
        let mut needs_next_level = self.write_through;

        let hit = self.cache.peek_item(addr).is_some();
        if !hit {
            self.stats.write_misses += 1;
            if self.write_allocate {
                self.replace_line(addr);
            } else {
                needs_next_level = true;
            }
        }

        if hit || self.write_allocate {
            let tag = self.cache.decoder().tag(addr);
            let offset = self.cache.decoder().block_offset(addr);
            let set = self.cache.cache_set(addr);
            let way = match set.get_by_tag(tag) {
                Some(line) => line.way(),
                None => unreachable!("line missing right after allocation"),
            };
            set.replacement_mut().touch_mru(way);
            let line = set.get_way(way);
            line.write_bytes(offset, buf);
            line.set_modified(true);
        }

        if needs_next_level {
            self.stats.next_level_writes += 1;
            if let Some(next) = self.next_level.as_mut() {
                next.write(addr, buf);
            }
        }
        true
    }
}

/// NT-aware cache (no next-level plumbing): lines carry a
/// non-temporal mark and NT fills are restricted to ways 0 and 1 so
/// streaming data cannot flush the whole set.
pub struct NtCache<I> {
    cache: Cache<I>,
    /// Most recently NT-filled way, one counter per set.
    previous_nt_way: Vec<u32>,
}

impl<I: NtLineAccess> NtCache<I> {
    pub fn new(
        size: u64,
        unit: SizeUnit,
        line_size: u64,
        stride: u64,
        default_line: &I,
        policy: &Replacement,
    ) -> Result<Self, CacheError> {
        let cache = Cache::new(size, unit, line_size, stride, default_line, policy)?;
        let previous_nt_way = vec![0; cache.num_sets() as usize];
        Ok(Self {
            cache,
            previous_nt_way,
        })
    }

    #[must_use]
    pub fn decoder(&self) -> &Arc<dyn AddrDecoder> {
        self.cache.decoder()
    }

    #[must_use]
    pub fn is_hit(&self, addr: u64) -> bool {
        self.cache.peek_item(addr).is_some()
    }

    pub fn get_line(&mut self, addr: u64) -> Option<&mut I> {
        self.cache.get_item(addr)
    }

    #[must_use]
    pub fn peek_line(&self, addr: u64) -> Option<&I> {
        self.cache.peek_item(addr)
    }

    /// Plain LRU victim, NT state ignored.
    pub fn line_for_replacement(&mut self, addr: u64) -> &mut I {
        self.cache.lru_item(addr)
    }

    /// Invalid-first victim, NT state ignored.
    pub fn line_for_replacement_with_invalid_check(&mut self, addr: u64) -> &mut I {
        self.cache.cache_set(addr).victim_item()
    }

    /// Victim for a fill that may be non-temporal. NT fills go to way
    /// 0 if it is not already NT, else way 1, else the two ways
    /// alternate via the set's previous-NT-way counter. Regular fills
    /// use plain LRU.
    pub fn line_for_nt_replacement(&mut self, addr: u64, nt: bool) -> &mut I {
        if !nt {
            return self.cache.lru_item(addr);
        }
        let set_idx = self.cache.decoder().index(addr);
        let previous = self.previous_nt_way[set_idx as usize];
        let set = self.cache.set_at(set_idx);
        let way = if !set.peek_way(0).is_nt() {
            0
        } else if !set.peek_way(1).is_nt() {
            1
        } else if previous == 0 {
            1
        } else {
            0
        };
        set.get_way(way)
    }

    pub fn touch_mru(&mut self, set_idx: u32, way: u32) {
        self.cache.set_at(set_idx).replacement_mut().touch_mru(way);
    }

    pub fn touch_lru(&mut self, set_idx: u32, way: u32) {
        self.cache.set_at(set_idx).replacement_mut().touch_lru(way);
    }

    /// Read from the line holding `addr` and rank it MRU. Panics when
    /// the address does not hit.
    pub fn read_with_mru_update(&mut self, addr: u64, buf: &mut [u8]) {
        let offset = self.cache.decoder().block_offset(addr);
        let line = match self.cache.get_item(addr) {
            Some(line) => line,
            None => panic!("read_with_mru_update: no line holds {addr:#x}"),
        };
        line.read_bytes(offset, buf);
        let (set_idx, way) = (line.set_index(), line.way());
        self.touch_mru(set_idx, way);
    }

    /// Write into the line holding `addr`, mark it modified and rank
    /// it MRU. Panics when the address does not hit.
    pub fn write_with_mru_update(&mut self, addr: u64, buf: &[u8]) {
        let offset = self.cache.decoder().block_offset(addr);
        let line = match self.cache.get_item(addr) {
            Some(line) => line,
            None => panic!("write_with_mru_update: no line holds {addr:#x}"),
        };
        line.write_bytes(offset, buf);
        line.set_modified(true);
        let (set_idx, way) = (line.set_index(), line.way());
        self.touch_mru(set_idx, way);
    }

    /// Allocate `way` of `addr`'s set for the block at `addr` and rank
    /// it MRU. An NT fill also updates the set's previous-NT-way
    /// counter.
    pub fn allocate_with_mru_update(&mut self, addr: u64, way: u32, nt: bool) {
        let set_idx = self.cache.decoder().index(addr);
        let set = self.cache.set_at(set_idx);
        set.get_way(way).reset_nt(addr, nt);
        if nt {
            self.previous_nt_way[set_idx as usize] = way;
        }
        self.touch_mru(set_idx, way);
    }

    /// Invalidate the slot at `(set_idx, way)` and rank it LRU.
    pub fn invalidate_line_with_lru_update(&mut self, set_idx: u32, way: u32) {
        let line = self.cache.set_at(set_idx).get_way(way);
        line.set_nt(false);
        line.set_valid(false);
        self.touch_lru(set_idx, way);
    }

    pub fn invalidate_all(&mut self) {
        for set in self.cache.iter_mut() {
            for line in set.iter_mut() {
                line.set_valid(false);
            }
            set.replacement_mut().reset();
        }
        self.previous_nt_way.fill(0);
    }

    #[must_use]
    pub fn has_open_way(&self, addr: u64) -> bool {
        self.cache.peek_cache_set(addr).has_open_way()
    }

    #[must_use]
    pub fn previous_nt_way(&self, set_idx: u32) -> u32 {
        self.previous_nt_way[set_idx as usize]
    }

    #[must_use]
    pub fn num_ways(&self) -> u32 {
        self.cache.num_ways()
    }

    #[must_use]
    pub fn num_sets(&self) -> u32 {
        self.cache.num_sets()
    }

    #[must_use]
    pub fn cache(&self) -> &Cache<I> {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut Cache<I> {
        &mut self.cache
    }
}
