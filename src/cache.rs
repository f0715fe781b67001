use std::sync::Arc;
use std::{error, fmt};

pub mod cam;
pub mod decoder;
pub mod item;
pub mod replacement;
pub mod set;
pub mod simple;

pub use self::cam::{CamCache, CamItem};
pub use self::decoder::{AddrDecoder, DefaultAddrDecoder, HashAddrDecoder};
pub use self::item::{BasicItem, CacheItem, LineAccess, LineData, NtLineAccess, NtLineData, TaggedItem};
pub use self::replacement::Replacement;
pub use self::set::CacheSet;
pub use self::simple::{BlockingMemory, CacheStats, CastoutQuery, NtCache, SimpleCache};

/// Cache geometry and policy errors
#[derive(Debug, Clone)]
pub enum CacheError {
    NotPowerOfTwo { what: &'static str, value: u64 },
    ZeroGeometry(&'static str),
    TooManyWays { ways: u32, max: u32 },
    Unsupported(&'static str),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPowerOfTwo { what, value } => {
                write!(f, "{what} must be a power of two, got {value}")
            }
            Self::ZeroGeometry(what) => write!(f, "{what} must be non-zero"),
            Self::TooManyWays { ways, max } => {
                write!(f, "way count `{ways}` exceeds the supported maximum of {max}")
            }
            Self::Unsupported(op) => write!(f, "`{op}` is not supported by this variant"),
        }
    }
}

impl error::Error for CacheError {}

/// Unit of the `size` argument accepted by cache and decoder constructors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeUnit {
    KiB,
    Bytes,
}

impl SizeUnit {
    #[must_use]
    pub fn to_bytes(self, size: u64) -> u64 {
        match self {
            Self::KiB => size * 1024,
            Self::Bytes => size,
        }
    }
}

/// A vector of cache sets plus the address decoder that routes
/// addresses to them.
///
/// Ways are taken from the replacement policy prototype; every set
/// clones the supplied default item into each slot and clones the
/// policy.
pub struct Cache<I> {
    num_sets: u32,
    num_ways: u32,
    decoder: Arc<dyn AddrDecoder>,
    sets: Vec<CacheSet<I>>,
}

impl<I: CacheItem> Cache<I> {
    /// Build a cache from its total size. The number of sets is derived
    /// as `size / (line_size * ways)`.
    pub fn new(
        size: u64,
        unit: SizeUnit,
        line_size: u64,
        stride: u64,
        default_item: &I,
        policy: &Replacement,
    ) -> Result<Self, CacheError> {
        let num_ways = policy.num_ways();
        let decoder: Arc<dyn AddrDecoder> = Arc::new(DefaultAddrDecoder::new(
            size, unit, line_size, stride, num_ways,
        )?);
        let num_sets = (unit.to_bytes(size) / (line_size * u64::from(num_ways))) as u32;
        Ok(Self::build(num_sets, num_ways, decoder, default_item, policy))
    }

    /// Build a cache directly from a set count.
    pub fn with_sets(
        num_sets: u32,
        line_size: u64,
        stride: u64,
        default_item: &I,
        policy: &Replacement,
    ) -> Result<Self, CacheError> {
        let size = u64::from(num_sets) * line_size * u64::from(policy.num_ways());
        Self::new(size, SizeUnit::Bytes, line_size, stride, default_item, policy)
    }

    fn build(
        num_sets: u32,
        num_ways: u32,
        decoder: Arc<dyn AddrDecoder>,
        default_item: &I,
        policy: &Replacement,
    ) -> Self {
        let sets = (0..num_sets)
            .map(|i| CacheSet::new(i, num_ways, default_item, &decoder, policy))
            .collect();
        Self {
            num_sets,
            num_ways,
            decoder,
            sets,
        }
    }

    /// Replace the decoder, e.g. with a hash variant. Propagates to
    /// every slot.
    pub fn set_decoder(&mut self, decoder: Arc<dyn AddrDecoder>) {
        self.decoder = decoder.clone();
        for set in &mut self.sets {
            set.set_decoder(&decoder);
        }
    }

    #[must_use]
    pub fn decoder(&self) -> &Arc<dyn AddrDecoder> {
        &self.decoder
    }

    pub fn cache_set(&mut self, addr: u64) -> &mut CacheSet<I> {
        let set_idx = self.decoder.index(addr);
        &mut self.sets[set_idx as usize]
    }

    #[must_use]
    pub fn peek_cache_set(&self, addr: u64) -> &CacheSet<I> {
        let set_idx = self.decoder.index(addr);
        &self.sets[set_idx as usize]
    }

    pub fn set_at(&mut self, set_idx: u32) -> &mut CacheSet<I> {
        &mut self.sets[set_idx as usize]
    }

    #[must_use]
    pub fn peek_set_at(&self, set_idx: u32) -> &CacheSet<I> {
        &self.sets[set_idx as usize]
    }

    /// Valid item with the address' tag, if present.
    pub fn get_item(&mut self, addr: u64) -> Option<&mut I> {
        let tag = self.decoder.tag(addr);
        self.cache_set(addr).get_by_tag(tag)
    }

    #[must_use]
    pub fn peek_item(&self, addr: u64) -> Option<&I> {
        let tag = self.decoder.tag(addr);
        self.peek_cache_set(addr).peek_by_tag(tag)
    }

    /// Like `get_item`, but also reports whether the scan encountered
    /// an invalid slot (a cold miss).
    pub fn get_item_cold(&mut self, addr: u64) -> (Option<&mut I>, bool) {
        let tag = self.decoder.tag(addr);
        self.cache_set(addr).get_by_tag_cold(tag)
    }

    pub fn item_at(&mut self, set_idx: u32, way: u32) -> &mut I {
        self.set_at(set_idx).get_way(way)
    }

    /// The slot the replacement policy currently ranks LRU. May or may
    /// not hold a valid line.
    pub fn lru_item(&mut self, addr: u64) -> &mut I {
        self.cache_set(addr).lru_item()
    }

    #[must_use]
    pub fn peek_lru_item(&self, addr: u64) -> &I {
        self.peek_cache_set(addr).peek_lru_item()
    }

    /// The replacement state of the set holding `addr`. Use this to
    /// update the ranking.
    pub fn replacement_of(&mut self, addr: u64) -> &mut Replacement {
        self.cache_set(addr).replacement_mut()
    }

    #[must_use]
    pub fn find_invalid_way(&self, addr: u64) -> u32 {
        self.peek_cache_set(addr).find_invalid_way()
    }

    #[must_use]
    pub fn num_ways(&self) -> u32 {
        self.num_ways
    }

    #[must_use]
    pub fn num_sets(&self) -> u32 {
        self.num_sets
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CacheSet<I>> {
        self.sets.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, CacheSet<I>> {
        self.sets.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::item::{LineAccess, LineData};
    use super::replacement::TrueLru;
    use super::*;

    fn make_cache() -> Cache<LineData> {
        Cache::new(
            32,
            SizeUnit::KiB,
            64,
            64,
            &LineData::new(64),
            &TrueLru::new(8).into(),
        )
        .unwrap()
    }

    #[test]
    fn geometry_from_size_and_from_sets_agree() {
        let by_size = make_cache();
        let by_sets =
            Cache::with_sets(64, 64, 64, &LineData::new(64), &TrueLru::new(8).into()).unwrap();
        assert_eq!(by_size.num_sets(), 64);
        assert_eq!(by_size.num_ways(), 8);
        assert_eq!(by_sets.num_sets(), by_size.num_sets());
        assert_eq!(by_sets.num_ways(), by_size.num_ways());
    }

    #[test]
    fn item_lookup_and_cold_miss() {
        let mut cache = make_cache();
        let addr = 0x0123_4040u64;
        assert!(cache.peek_item(addr).is_none());

        let set_idx = cache.decoder().index(addr);
        cache.cache_set(addr).get_way(3).reset(addr);
        let item = cache.get_item(addr).unwrap();
        assert_eq!(item.way(), 3);
        assert_eq!(CacheItem::set_index(item), set_idx);
        assert_eq!(item.address(), cache.decoder().block_address(addr));

        let (hit, _) = cache.get_item_cold(addr);
        assert!(hit.is_some());
        let (miss, cold) = cache.get_item_cold(addr + 64);
        assert!(miss.is_none());
        assert!(cold);

        assert_eq!(cache.find_invalid_way(addr), 0);
        assert_eq!(cache.lru_item(addr).way(), 0);
    }

    #[test]
    fn hash_decoder_can_replace_the_default() {
        let mut cache = make_cache();
        let hash: Arc<dyn AddrDecoder> = Arc::new(
            HashAddrDecoder::new(32, SizeUnit::KiB, 64, 64, 8, vec![vec![6, 12]]).unwrap(),
        );
        cache.set_decoder(hash);

        let addr = 0x1040u64; // bit 6 and bit 12 set: hash bit 0 is 0
        let set_idx = cache.decoder().index(addr);
        cache.cache_set(addr).get_way(0).reset(addr);
        // The slot derived its tag through the swapped-in decoder
        assert_eq!(cache.get_item(addr).unwrap().way(), 0);
        let tag = cache.decoder().tag(addr);
        assert_eq!(cache.peek_set_at(set_idx).peek_by_tag(tag).unwrap().way(), 0);
    }
}
