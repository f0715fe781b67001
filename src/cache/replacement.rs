use std::cell::RefCell;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::CacheError;

/// Per-set ranked list of ways behind one dispatching enum. Cloning a
/// policy yields an independent copy of its state.
///
/// Every variant enforces `way < num_ways` on all inputs. `reset`
/// returns the canonical initial order `0, 1, .., N-1` with way 0 LRU
/// and way N-1 MRU (or the equivalent initial state for the encoded
/// variants).
#[derive(Debug, Clone)]
pub enum Replacement {
    TrueLru(TrueLru),
    TrueLru4(TrueLru4),
    TreePlru(TreePlru),
    HybridPlru8(HybridPlru8),
    HybridPlru16(HybridPlru16),
    BubbleUp(BubbleUp),
    RoundRobin(RoundRobin),
    Random(RandomReplacement),
}

impl Replacement {
    #[must_use]
    pub fn num_ways(&self) -> u32 {
        match self {
            Self::TrueLru(p) => p.num_ways(),
            Self::TrueLru4(_) => TrueLru4::NUM_WAYS,
            Self::TreePlru(p) => p.num_ways(),
            Self::HybridPlru8(_) => HybridPlru8::NUM_WAYS,
            Self::HybridPlru16(_) => HybridPlru16::NUM_WAYS,
            Self::BubbleUp(p) => p.num_ways(),
            Self::RoundRobin(p) => p.num_ways(),
            Self::Random(p) => p.num_ways(),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Self::TrueLru(p) => p.reset(),
            Self::TrueLru4(p) => p.reset(),
            Self::TreePlru(p) => p.reset(),
            Self::HybridPlru8(p) => p.reset(),
            Self::HybridPlru16(p) => p.reset(),
            Self::BubbleUp(p) => p.reset(),
            Self::RoundRobin(p) => p.reset(),
            Self::Random(p) => p.reset(),
        }
    }

    pub fn touch_mru(&mut self, way: u32) {
        match self {
            Self::TrueLru(p) => p.touch_mru(way),
            Self::TrueLru4(p) => p.touch_mru(way),
            Self::TreePlru(p) => p.touch_mru(way),
            Self::HybridPlru8(p) => p.touch_mru(way),
            Self::HybridPlru16(p) => p.touch_mru(way),
            Self::BubbleUp(p) => p.touch_mru(way),
            Self::RoundRobin(p) => p.touch_mru(way),
            Self::Random(p) => p.touch_mru(way),
        }
    }

    pub fn touch_lru(&mut self, way: u32) {
        match self {
            Self::TrueLru(p) => p.touch_lru(way),
            Self::TrueLru4(p) => p.touch_lru(way),
            Self::TreePlru(p) => p.touch_lru(way),
            Self::HybridPlru8(p) => p.touch_lru(way),
            Self::HybridPlru16(p) => p.touch_lru(way),
            Self::BubbleUp(p) => p.touch_lru(way),
            Self::RoundRobin(p) => p.touch_lru(way),
            Self::Random(p) => p.touch_lru(way),
        }
    }

    #[must_use]
    pub fn mru_way(&self) -> u32 {
        match self {
            Self::TrueLru(p) => p.mru_way(),
            Self::TrueLru4(p) => p.mru_way(),
            Self::TreePlru(p) => p.mru_way(),
            Self::HybridPlru8(p) => p.mru_way(),
            Self::HybridPlru16(p) => p.mru_way(),
            Self::BubbleUp(p) => p.mru_way(),
            Self::RoundRobin(p) => p.mru_way(),
            Self::Random(p) => p.mru_way(),
        }
    }

    #[must_use]
    pub fn lru_way(&self) -> u32 {
        match self {
            Self::TrueLru(p) => p.lru_way(),
            Self::TrueLru4(p) => p.lru_way(),
            Self::TreePlru(p) => p.lru_way(),
            Self::HybridPlru8(p) => p.lru_way(),
            Self::HybridPlru16(p) => p.lru_way(),
            Self::BubbleUp(p) => p.lru_way(),
            Self::RoundRobin(p) => p.lru_way(),
            Self::Random(p) => p.lru_way(),
        }
    }

    /// Way locking is reserved; no current variant implements it.
    pub fn lock_way(&mut self, way: u32) -> Result<(), CacheError> {
        check_way(way, self.num_ways());
        Err(CacheError::Unsupported("lock_way"))
    }
}

impl From<TrueLru> for Replacement {
    fn from(p: TrueLru) -> Self {
        Self::TrueLru(p)
    }
}

impl From<TrueLru4> for Replacement {
    fn from(p: TrueLru4) -> Self {
        Self::TrueLru4(p)
    }
}

impl From<TreePlru> for Replacement {
    fn from(p: TreePlru) -> Self {
        Self::TreePlru(p)
    }
}

impl From<HybridPlru8> for Replacement {
    fn from(p: HybridPlru8) -> Self {
        Self::HybridPlru8(p)
    }
}

impl From<HybridPlru16> for Replacement {
    fn from(p: HybridPlru16) -> Self {
        Self::HybridPlru16(p)
    }
}

impl From<BubbleUp> for Replacement {
    fn from(p: BubbleUp) -> Self {
        Self::BubbleUp(p)
    }
}

impl From<RoundRobin> for Replacement {
    fn from(p: RoundRobin) -> Self {
        Self::RoundRobin(p)
    }
}

impl From<RandomReplacement> for Replacement {
    fn from(p: RandomReplacement) -> Self {
        Self::Random(p)
    }
}

#[inline]
fn check_way(way: u32, num_ways: u32) {
    assert!(way < num_ways, "way {way} out of range (num_ways={num_ways})");
}

/// True LRU over an ordered list of way indices. MRU at the front, LRU
/// at the back. O(N) per touch; usable with any N.
#[derive(Debug, Clone)]
pub struct TrueLru {
    ordered_ways: Vec<u32>,
}

impl TrueLru {
    #[must_use]
    pub fn new(num_ways: u32) -> Self {
        assert!(num_ways > 0, "a replacement policy needs at least one way");
        let mut rep = Self {
            ordered_ways: Vec::with_capacity(num_ways as usize),
        };
        rep.reset_to(num_ways);
        rep
    }

    fn reset_to(&mut self, num_ways: u32) {
        self.ordered_ways.clear();
        self.ordered_ways.extend((0..num_ways).rev());
    }

    #[must_use]
    pub fn num_ways(&self) -> u32 {
        self.ordered_ways.len() as u32
    }

    pub fn reset(&mut self) {
        let n = self.num_ways();
        self.reset_to(n);
    }

    fn position(&self, way: u32) -> usize {
        // The list is a permutation of 0..N, so the way is always present.
        self.ordered_ways.iter().position(|&w| w == way).unwrap()
    }

    pub fn touch_mru(&mut self, way: u32) {
        check_way(way, self.num_ways());
        let pos = self.position(way);
        self.ordered_ways.remove(pos);
        self.ordered_ways.insert(0, way);
    }

    pub fn touch_lru(&mut self, way: u32) {
        check_way(way, self.num_ways());
        let pos = self.position(way);
        self.ordered_ways.remove(pos);
        self.ordered_ways.push(way);
    }

    #[must_use]
    pub fn mru_way(&self) -> u32 {
        self.ordered_ways[0]
    }

    #[must_use]
    pub fn lru_way(&self) -> u32 {
        *self.ordered_ways.last().unwrap()
    }
}

const INVALID_ENCODING: u8 = 0xFF;

#[derive(Debug, Clone, Copy)]
struct Lru4Entry {
    valid: bool,
    /// Way order for the encoding, index 0 is the MRU way.
    way_order: [u8; 4],
    /// Next encoding when way `w` is touched MRU.
    next_mru: [u8; 4],
    /// Next encoding when way `w` is touched LRU.
    next_lru: [u8; 4],
}

/// The 6-bit encoding packs the pairwise "way i more recent than way
/// j" relations: b0 = W0>W1, b1 = W0>W2, b2 = W0>W3, b3 = W1>W2,
/// b4 = W1>W3, b5 = W2>W3. Of the 64 possible encodings only 24 are
/// consistent orders; the rest are trapped.
const fn lru4_table() -> [Lru4Entry; 64] {
    const fn e(way_order: [u8; 4], next_mru: [u8; 4], next_lru: [u8; 4]) -> Lru4Entry {
        Lru4Entry {
            valid: true,
            way_order,
            next_mru,
            next_lru,
        }
    }

    let mut tbl = [Lru4Entry {
        valid: false,
        way_order: [0; 4],
        next_mru: [INVALID_ENCODING; 4],
        next_lru: [INVALID_ENCODING; 4],
    }; 64];

    //            way order     touchMRU transition       touchLRU transition
    //            MRU -> LRU    w0    w1    w2    w3      w0    w1    w2    w3
    tbl[0x3F] = e([0, 1, 2, 3], [0x3F, 0x3E, 0x35, 0x0B], [0x38, 0x27, 0x1F, 0x3F]);
    tbl[0x1F] = e([0, 1, 3, 2], [0x1F, 0x1E, 0x35, 0x0B], [0x18, 0x07, 0x1F, 0x3F]);
    tbl[0x37] = e([0, 2, 1, 3], [0x37, 0x3E, 0x35, 0x03], [0x30, 0x27, 0x1F, 0x37]);
    tbl[0x0F] = e([0, 3, 1, 2], [0x0F, 0x1E, 0x25, 0x0B], [0x08, 0x07, 0x0F, 0x3F]);
    tbl[0x27] = e([0, 2, 3, 1], [0x27, 0x3E, 0x25, 0x03], [0x20, 0x27, 0x0F, 0x37]);
    tbl[0x07] = e([0, 3, 2, 1], [0x07, 0x1E, 0x25, 0x03], [0x00, 0x07, 0x0F, 0x37]);
    tbl[0x3E] = e([1, 0, 2, 3], [0x3F, 0x3E, 0x34, 0x0A], [0x38, 0x27, 0x1E, 0x3E]);
    tbl[0x1E] = e([1, 0, 3, 2], [0x1F, 0x1E, 0x34, 0x0A], [0x18, 0x07, 0x1E, 0x3E]);
    tbl[0x35] = e([2, 0, 1, 3], [0x37, 0x3C, 0x35, 0x01], [0x30, 0x25, 0x1F, 0x35]);
    tbl[0x0B] = e([3, 0, 1, 2], [0x0F, 0x1A, 0x21, 0x0B], [0x08, 0x03, 0x0B, 0x3F]);
    tbl[0x25] = e([2, 0, 3, 1], [0x27, 0x3C, 0x25, 0x01], [0x20, 0x25, 0x0F, 0x35]);
    tbl[0x03] = e([3, 0, 2, 1], [0x07, 0x1A, 0x21, 0x03], [0x00, 0x03, 0x0B, 0x37]);
    tbl[0x3C] = e([1, 2, 0, 3], [0x3F, 0x3C, 0x34, 0x08], [0x38, 0x25, 0x1E, 0x3C]);
    tbl[0x1A] = e([1, 3, 0, 2], [0x1F, 0x1A, 0x30, 0x0A], [0x18, 0x03, 0x1A, 0x3E]);
    tbl[0x34] = e([2, 1, 0, 3], [0x37, 0x3C, 0x34, 0x00], [0x30, 0x25, 0x1E, 0x34]);
    tbl[0x0A] = e([3, 1, 0, 2], [0x0F, 0x1A, 0x20, 0x0A], [0x08, 0x03, 0x0A, 0x3E]);
    tbl[0x21] = e([2, 3, 0, 1], [0x27, 0x38, 0x21, 0x01], [0x20, 0x21, 0x0B, 0x35]);
    tbl[0x01] = e([3, 2, 0, 1], [0x07, 0x18, 0x21, 0x01], [0x00, 0x01, 0x0B, 0x35]);
    tbl[0x38] = e([1, 2, 3, 0], [0x3F, 0x38, 0x30, 0x08], [0x38, 0x21, 0x1A, 0x3C]);
    tbl[0x18] = e([1, 3, 2, 0], [0x1F, 0x18, 0x30, 0x08], [0x18, 0x01, 0x1A, 0x3C]);
    tbl[0x30] = e([2, 1, 3, 0], [0x37, 0x38, 0x30, 0x00], [0x30, 0x21, 0x1A, 0x34]);
    tbl[0x08] = e([3, 1, 2, 0], [0x0F, 0x18, 0x20, 0x08], [0x08, 0x01, 0x0A, 0x3C]);
    tbl[0x20] = e([2, 3, 1, 0], [0x27, 0x38, 0x20, 0x00], [0x20, 0x21, 0x0A, 0x34]);
    tbl[0x00] = e([3, 2, 1, 0], [0x07, 0x18, 0x20, 0x00], [0x00, 0x01, 0x0A, 0x34]);

    tbl
}

static LRU4_TABLE: [Lru4Entry; 64] = lru4_table();

/// 4-way true LRU over a 6-bit pairwise-recency encoding and a
/// precomputed transition table.
#[derive(Debug, Clone)]
pub struct TrueLru4 {
    encoding: u8,
}

impl Default for TrueLru4 {
    fn default() -> Self {
        Self::new()
    }
}

impl TrueLru4 {
    pub const NUM_WAYS: u32 = 4;

    #[must_use]
    pub fn new() -> Self {
        Self { encoding: 0 }
    }

    pub fn reset(&mut self) {
        self.encoding = 0;
    }

    fn entry(&self) -> &'static Lru4Entry {
        let entry = &LRU4_TABLE[self.encoding as usize];
        assert!(entry.valid, "undefined 4-way LRU encoding {:#x}", self.encoding);
        entry
    }

    pub fn touch_mru(&mut self, way: u32) {
        check_way(way, Self::NUM_WAYS);
        let next = self.entry().next_mru[way as usize];
        assert!(next != INVALID_ENCODING, "undefined 4-way LRU transition");
        self.encoding = next;
    }

    pub fn touch_lru(&mut self, way: u32) {
        check_way(way, Self::NUM_WAYS);
        let next = self.entry().next_lru[way as usize];
        assert!(next != INVALID_ENCODING, "undefined 4-way LRU transition");
        self.encoding = next;
    }

    #[must_use]
    pub fn mru_way(&self) -> u32 {
        u32::from(self.entry().way_order[0])
    }

    #[must_use]
    pub fn lru_way(&self) -> u32 {
        u32::from(self.entry().way_order[3])
    }
}

/// Tree PLRU over an implicit complete binary tree of N-1 bits, N a
/// power of two. Node `idx` has children `2*idx` and `2*idx + 1`; leaf
/// `way + N` maps back to `way`. A set bit means the LRU side is to
/// the right.
#[derive(Debug, Clone)]
pub struct TreePlru {
    num_ways: u32,
    num_levels: u32,
    plru_bits: u128,
}

impl TreePlru {
    pub const MAX_NUM_WAYS: u32 = 128;

    pub fn new(num_ways: u32) -> Result<Self, CacheError> {
        if num_ways == 0 {
            return Err(CacheError::ZeroGeometry("way count"));
        }
        if !num_ways.is_power_of_two() {
            return Err(CacheError::NotPowerOfTwo {
                what: "way count",
                value: u64::from(num_ways),
            });
        }
        if num_ways > Self::MAX_NUM_WAYS {
            return Err(CacheError::TooManyWays {
                ways: num_ways,
                max: Self::MAX_NUM_WAYS,
            });
        }
        Ok(Self {
            num_ways,
            num_levels: num_ways.ilog2(),
            plru_bits: 0,
        })
    }

    #[must_use]
    pub fn num_ways(&self) -> u32 {
        self.num_ways
    }

    pub fn reset(&mut self) {
        self.plru_bits = 0;
    }

    #[inline]
    fn bit(&self, idx: u32) -> u32 {
        ((self.plru_bits >> idx) & 1) as u32
    }

    #[inline]
    fn set_bit(&mut self, idx: u32, value: bool) {
        if value {
            self.plru_bits |= 1u128 << idx;
        } else {
            self.plru_bits &= !(1u128 << idx);
        }
    }

    #[must_use]
    pub fn mru_way(&self) -> u32 {
        let mut idx = 1;
        for _ in 0..self.num_levels {
            // An LRU tree, so finding the MRU way follows inverted bits
            idx = 2 * idx + (1 - self.bit(idx));
        }
        idx - self.num_ways
    }

    #[must_use]
    pub fn lru_way(&self) -> u32 {
        let mut idx = 1;
        for _ in 0..self.num_levels {
            idx = 2 * idx + self.bit(idx);
        }
        idx - self.num_ways
    }

    pub fn touch_mru(&mut self, way: u32) {
        check_way(way, self.num_ways);
        let mut idx = way + self.num_ways;
        for _ in 0..self.num_levels {
            let mru_is_right = idx & 1 == 1;
            idx >>= 1;
            // Inverted: the stored bits track the LRU direction
            self.set_bit(idx, !mru_is_right);
        }
    }

    pub fn touch_lru(&mut self, way: u32) {
        check_way(way, self.num_ways);
        let mut idx = way + self.num_ways;
        for _ in 0..self.num_levels {
            let lru_is_right = idx & 1 == 1;
            idx >>= 1;
            self.set_bit(idx, lru_is_right);
        }
    }
}

/// 8-way hybrid: 4-way true LRU over super-way pairs plus one
/// expansion bit per pair naming which half is LRU.
#[derive(Debug, Clone)]
pub struct HybridPlru8 {
    top4: TrueLru4,
    /// Bit per super-way; set means the right (odd) way is LRU.
    expansion_lru_bits: u8,
}

impl Default for HybridPlru8 {
    fn default() -> Self {
        Self::new()
    }
}

impl HybridPlru8 {
    pub const NUM_WAYS: u32 = 8;

    #[must_use]
    pub fn new() -> Self {
        Self {
            top4: TrueLru4::new(),
            expansion_lru_bits: 0,
        }
    }

    pub fn reset(&mut self) {
        self.expansion_lru_bits = 0;
        self.top4.reset();
    }

    #[inline]
    fn expansion_bit(&self, super_way: u32) -> u32 {
        u32::from(self.expansion_lru_bits >> super_way) & 1
    }

    #[inline]
    fn set_expansion_bit(&mut self, super_way: u32, value: bool) {
        if value {
            self.expansion_lru_bits |= 1 << super_way;
        } else {
            self.expansion_lru_bits &= !(1 << super_way);
        }
    }

    #[must_use]
    pub fn mru_way(&self) -> u32 {
        let top4_mru = self.top4.mru_way();
        (top4_mru << 1) + (1 - self.expansion_bit(top4_mru))
    }

    #[must_use]
    pub fn lru_way(&self) -> u32 {
        let top4_lru = self.top4.lru_way();
        (top4_lru << 1) + self.expansion_bit(top4_lru)
    }

    pub fn touch_mru(&mut self, way: u32) {
        check_way(way, Self::NUM_WAYS);
        let super_way = way >> 1;
        let half = way & 1 == 1;
        self.top4.touch_mru(super_way);
        self.set_expansion_bit(super_way, !half);
    }

    pub fn touch_lru(&mut self, way: u32) {
        check_way(way, Self::NUM_WAYS);
        let super_way = way >> 1;
        let half = way & 1 == 1;
        self.top4.touch_lru(super_way);
        self.set_expansion_bit(super_way, half);
    }
}

/// 16-way hybrid: one top bit selecting which of two 8-way hybrids
/// holds the LRU half.
#[derive(Debug, Clone)]
pub struct HybridPlru16 {
    top_lru_bit: bool,
    halves: [HybridPlru8; 2],
}

impl Default for HybridPlru16 {
    fn default() -> Self {
        Self::new()
    }
}

impl HybridPlru16 {
    pub const NUM_WAYS: u32 = 16;

    #[must_use]
    pub fn new() -> Self {
        Self {
            top_lru_bit: false,
            halves: [HybridPlru8::new(), HybridPlru8::new()],
        }
    }

    pub fn reset(&mut self) {
        self.top_lru_bit = false;
        self.halves[0].reset();
        self.halves[1].reset();
    }

    #[must_use]
    pub fn mru_way(&self) -> u32 {
        if self.top_lru_bit {
            self.halves[0].mru_way()
        } else {
            self.halves[1].mru_way() + Self::NUM_WAYS / 2
        }
    }

    #[must_use]
    pub fn lru_way(&self) -> u32 {
        if self.top_lru_bit {
            self.halves[1].lru_way() + Self::NUM_WAYS / 2
        } else {
            self.halves[0].lru_way()
        }
    }

    pub fn touch_mru(&mut self, way: u32) {
        check_way(way, Self::NUM_WAYS);
        let top_half = (way >> 3) & 1;
        self.top_lru_bit = top_half == 0;
        self.halves[top_half as usize].touch_mru(way & 0x7);
    }

    pub fn touch_lru(&mut self, way: u32) {
        check_way(way, Self::NUM_WAYS);
        let top_half = (way >> 3) & 1;
        self.top_lru_bit = top_half == 1;
        self.halves[top_half as usize].touch_lru(way & 0x7);
    }
}

/// Ordered list where a touch only moves the way a single position.
/// Insertion at next-to-LRU falls out of inserting at LRU and bubbling
/// once.
#[derive(Debug, Clone)]
pub struct BubbleUp {
    ordered_ways: Vec<u32>,
}

impl BubbleUp {
    #[must_use]
    pub fn new(num_ways: u32) -> Self {
        assert!(num_ways > 0, "a replacement policy needs at least one way");
        Self {
            ordered_ways: (0..num_ways).collect(),
        }
    }

    #[must_use]
    pub fn num_ways(&self) -> u32 {
        self.ordered_ways.len() as u32
    }

    pub fn reset(&mut self) {
        let n = self.ordered_ways.len();
        self.ordered_ways.clear();
        self.ordered_ways.extend(0..n as u32);
    }

    pub fn touch_mru(&mut self, way: u32) {
        check_way(way, self.num_ways());
        let pos = self.ordered_ways.iter().position(|&w| w == way).unwrap();
        if pos != 0 {
            self.ordered_ways.swap(pos, pos - 1);
        }
    }

    pub fn touch_lru(&mut self, way: u32) {
        check_way(way, self.num_ways());
        let pos = self.ordered_ways.iter().position(|&w| w == way).unwrap();
        if pos != self.ordered_ways.len() - 1 {
            self.ordered_ways.swap(pos, pos + 1);
        }
    }

    #[must_use]
    pub fn mru_way(&self) -> u32 {
        self.ordered_ways[0]
    }

    #[must_use]
    pub fn lru_way(&self) -> u32 {
        *self.ordered_ways.last().unwrap()
    }
}

/// A bare counter. The consumer advances it by touching the way it
/// just filled.
#[derive(Debug, Clone)]
pub struct RoundRobin {
    num_ways: u32,
    counter: u32,
}

impl RoundRobin {
    #[must_use]
    pub fn new(num_ways: u32) -> Self {
        assert!(num_ways > 0, "a replacement policy needs at least one way");
        Self {
            num_ways,
            counter: 0,
        }
    }

    #[must_use]
    pub fn num_ways(&self) -> u32 {
        self.num_ways
    }

    pub fn reset(&mut self) {
        self.counter = 0;
    }

    pub fn touch_mru(&mut self, way: u32) {
        check_way(way, self.num_ways);
        self.counter = (way + 1) % self.num_ways;
    }

    pub fn touch_lru(&mut self, way: u32) {
        check_way(way, self.num_ways);
        self.counter = way;
    }

    #[must_use]
    pub fn mru_way(&self) -> u32 {
        (self.counter + self.num_ways - 1) % self.num_ways
    }

    #[must_use]
    pub fn lru_way(&self) -> u32 {
        self.counter
    }
}

/// Uniformly random victim selection. Touches are no-ops. A fixed seed
/// makes runs reproducible.
#[derive(Debug, Clone)]
pub struct RandomReplacement {
    num_ways: u32,
    rng: RefCell<SmallRng>,
}

impl RandomReplacement {
    #[must_use]
    pub fn new(num_ways: u32) -> Self {
        assert!(num_ways > 0, "a replacement policy needs at least one way");
        Self {
            num_ways,
            rng: RefCell::new(SmallRng::from_entropy()),
        }
    }

    #[must_use]
    pub fn with_seed(num_ways: u32, seed: u64) -> Self {
        assert!(num_ways > 0, "a replacement policy needs at least one way");
        Self {
            num_ways,
            rng: RefCell::new(SmallRng::seed_from_u64(seed)),
        }
    }

    #[must_use]
    pub fn num_ways(&self) -> u32 {
        self.num_ways
    }

    pub fn reset(&mut self) {}

    pub fn touch_mru(&mut self, way: u32) {
        check_way(way, self.num_ways);
    }

    pub fn touch_lru(&mut self, way: u32) {
        check_way(way, self.num_ways);
    }

    #[must_use]
    pub fn mru_way(&self) -> u32 {
        self.rng.borrow_mut().gen_range(0..self.num_ways)
    }

    #[must_use]
    pub fn lru_way(&self) -> u32 {
        self.rng.borrow_mut().gen_range(0..self.num_ways)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_reset_order(rep: &Replacement) {
        assert_eq!(rep.mru_way(), rep.num_ways() - 1);
        assert_eq!(rep.lru_way(), 0);
    }

    #[test]
    fn reset_order_all_lru_variants() {
        let variants: Vec<Replacement> = vec![
            TrueLru::new(6).into(),
            TrueLru4::new().into(),
            TreePlru::new(8).unwrap().into(),
            HybridPlru8::new().into(),
            HybridPlru16::new().into(),
        ];
        for mut rep in variants {
            assert_reset_order(&rep);
            // reset is idempotent
            rep.reset();
            assert_reset_order(&rep);
            rep.touch_mru(0);
            rep.reset();
            assert_reset_order(&rep);
        }
    }

    #[test]
    fn touch_mru_postcondition_everywhere() {
        let variants: Vec<Replacement> = vec![
            TrueLru::new(4).into(),
            TrueLru4::new().into(),
            TreePlru::new(4).unwrap().into(),
        ];
        for mut rep in variants {
            for way in [2, 0, 3, 1, 3, 0] {
                rep.touch_mru(way);
                assert_eq!(rep.mru_way(), way);
            }
        }
    }

    #[test]
    fn true_lru_ordering() {
        let mut rep = TrueLru::new(4);
        for w in 0..4 {
            rep.touch_mru(w);
        }
        assert_eq!(rep.mru_way(), 3);
        assert_eq!(rep.lru_way(), 0);
        rep.touch_lru(3);
        assert_eq!(rep.lru_way(), 3);
        rep.touch_mru(3);
        assert_eq!(rep.mru_way(), 3);
        assert_eq!(rep.lru_way(), 0);
    }

    #[test]
    fn true_lru4_tracks_full_order() {
        let mut rep = TrueLru4::new();
        rep.touch_mru(0);
        rep.touch_mru(1);
        rep.touch_mru(2);
        rep.touch_mru(3);
        assert_eq!(rep.mru_way(), 3);
        assert_eq!(rep.lru_way(), 0);
        rep.touch_mru(0);
        assert_eq!(rep.mru_way(), 0);
        assert_eq!(rep.lru_way(), 1);
        rep.touch_lru(0);
        assert_eq!(rep.lru_way(), 0);
        assert_eq!(rep.mru_way(), 3);
    }

    #[test]
    fn true_lru4_matches_list_lru_on_random_walk() {
        // The table encodes exactly what the list-based policy computes.
        let mut tbl = TrueLru4::new();
        let mut list = TrueLru::new(4);
        let mut x = 0x2545_f491_4f6c_dd1du64;
        for _ in 0..500 {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            let way = (x % 4) as u32;
            if x & 0x10 == 0 {
                tbl.touch_mru(way);
                list.touch_mru(way);
            } else {
                tbl.touch_lru(way);
                list.touch_lru(way);
            }
            assert_eq!(tbl.mru_way(), list.mru_way());
            assert_eq!(tbl.lru_way(), list.lru_way());
        }
    }

    #[test]
    fn tree_plru_hand_sequence() {
        let mut rep = TreePlru::new(4).unwrap();
        rep.reset();
        rep.touch_mru(0);
        rep.touch_mru(1);
        rep.touch_mru(2);
        rep.touch_mru(3);
        assert_eq!((rep.mru_way(), rep.lru_way()), (3, 0));
        rep.touch_mru(2);
        assert_eq!((rep.mru_way(), rep.lru_way()), (2, 0));
        rep.touch_mru(0);
        assert_eq!((rep.mru_way(), rep.lru_way()), (0, 3));
        rep.touch_mru(2);
        assert_eq!((rep.mru_way(), rep.lru_way()), (2, 1));
        rep.touch_lru(2);
        assert_eq!((rep.mru_way(), rep.lru_way()), (0, 2));
    }

    #[test]
    fn tree_plru_replaces_every_way() {
        let mut rep = TreePlru::new(8).unwrap();
        let mut replaced = 0u32;
        for _ in 0..8 {
            let lru = rep.lru_way();
            replaced |= 1 << lru;
            rep.touch_mru(lru);
        }
        assert_eq!(rep.lru_way(), 0);
        assert_eq!(replaced, 0xFF);
    }

    #[test]
    fn tree_plru_64_ways() {
        let mut rep = TreePlru::new(64).unwrap();
        for w in 0..64 {
            rep.touch_mru(w);
        }
        assert_eq!((rep.mru_way(), rep.lru_way()), (63, 0));
        rep.touch_mru(0);
        assert_eq!((rep.mru_way(), rep.lru_way()), (0, 32));
        rep.touch_lru(35);
        assert_eq!((rep.mru_way(), rep.lru_way()), (0, 35));
        rep.touch_mru(35);
        assert_eq!((rep.mru_way(), rep.lru_way()), (35, 16));
    }

    #[test]
    fn hybrid_plru16_hand_sequence() {
        let mut rep = HybridPlru16::new();
        for w in 0..16 {
            rep.touch_mru(w);
        }
        assert_eq!((rep.mru_way(), rep.lru_way()), (15, 0));
        rep.touch_mru(5);
        assert_eq!((rep.mru_way(), rep.lru_way()), (5, 8));
        rep.touch_mru(0);
        assert_eq!((rep.mru_way(), rep.lru_way()), (0, 8));
        rep.touch_lru(0);
        assert_eq!((rep.mru_way(), rep.lru_way()), (15, 0));
        rep.touch_lru(5);
        assert_eq!((rep.mru_way(), rep.lru_way()), (15, 5));
    }

    #[test]
    fn hybrid_plru8_mru_tracking() {
        let mut rep = HybridPlru8::new();
        for way in [0, 7, 3, 4, 6, 1, 2, 5, 5, 0] {
            rep.touch_mru(way);
            assert_eq!(rep.mru_way(), way);
        }
    }

    #[test]
    fn bubble_up_single_position_moves() {
        let mut rep = BubbleUp::new(4);
        // order: 0 1 2 3 (0 = top/MRU)
        rep.touch_mru(3); // 0 1 3 2
        assert_eq!(rep.lru_way(), 2);
        rep.touch_mru(3); // 0 3 1 2
        rep.touch_mru(3); // 3 0 1 2
        assert_eq!(rep.mru_way(), 3);
        rep.touch_mru(3); // already at top
        assert_eq!(rep.mru_way(), 3);
        rep.touch_lru(3); // 0 3 1 2
        assert_eq!(rep.mru_way(), 0);
        assert_eq!(rep.lru_way(), 2);
    }

    #[test]
    fn round_robin_counter_semantics() {
        let mut rep = RoundRobin::new(16);
        for w in 0..16 {
            rep.touch_mru(w);
        }
        assert_eq!(rep.lru_way(), 0);
        assert_eq!(rep.mru_way(), 15);
        // Stable until the next touch
        assert_eq!(rep.lru_way(), 0);
        assert_eq!(rep.lru_way(), 0);
        rep.touch_mru(0);
        assert_eq!(rep.lru_way(), 1);
        rep.touch_lru(9);
        assert_eq!(rep.lru_way(), 9);
        assert_eq!(rep.mru_way(), 8);
    }

    #[test]
    fn random_is_uniform_in_range_and_seedable() {
        let rep = RandomReplacement::with_seed(8, 7);
        let again = RandomReplacement::with_seed(8, 7);
        for _ in 0..100 {
            let way = rep.lru_way();
            assert!(way < 8);
            assert_eq!(way, again.lru_way());
        }
    }

    #[test]
    fn lock_way_is_unsupported() {
        let mut rep: Replacement = TrueLru::new(4).into();
        assert!(matches!(
            rep.lock_way(1),
            Err(CacheError::Unsupported("lock_way"))
        ));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn way_bounds_are_enforced() {
        let mut rep: Replacement = TreePlru::new(4).unwrap().into();
        rep.touch_mru(4);
    }
}
