use std::sync::Arc;

use super::decoder::AddrDecoder;
use super::item::CacheItem;
use super::replacement::Replacement;

/// N ways plus the replacement state that ranks them. Scans run in
/// ascending way order.
pub struct CacheSet<I> {
    set_idx: u32,
    ways: Vec<I>,
    replacement: Replacement,
}

impl<I: CacheItem> CacheSet<I> {
    /// Copy-initialize every slot from `default_item` and tell each its
    /// slot identity exactly once.
    pub fn new(
        set_idx: u32,
        num_ways: u32,
        default_item: &I,
        decoder: &Arc<dyn AddrDecoder>,
        replacement: &Replacement,
    ) -> Self {
        let mut ways = vec![default_item.clone(); num_ways as usize];
        for (i, way) in ways.iter_mut().enumerate() {
            way.set_set_index(set_idx);
            way.set_way(i as u32);
            way.set_decoder(decoder.clone());
        }
        Self {
            set_idx,
            ways,
            replacement: replacement.clone(),
        }
    }

    #[must_use]
    pub fn set_index(&self) -> u32 {
        self.set_idx
    }

    #[must_use]
    pub fn num_ways(&self) -> u32 {
        self.ways.len() as u32
    }

    pub fn set_decoder(&mut self, decoder: &Arc<dyn AddrDecoder>) {
        for way in &mut self.ways {
            way.set_decoder(decoder.clone());
        }
    }

    #[must_use]
    pub fn replacement(&self) -> &Replacement {
        &self.replacement
    }

    /// Use this to update the set's ranking.
    pub fn replacement_mut(&mut self) -> &mut Replacement {
        &mut self.replacement
    }

    /// Valid slot holding `tag`, if any.
    #[must_use]
    pub fn peek_by_tag(&self, tag: u64) -> Option<&I> {
        self.ways.iter().find(|w| w.is_valid() && w.tag() == tag)
    }

    pub fn get_by_tag(&mut self, tag: u64) -> Option<&mut I> {
        self.ways.iter_mut().find(|w| w.is_valid() && w.tag() == tag)
    }

    /// Like `get_by_tag`, additionally classifying a miss as cold when
    /// the scan saw an invalid slot. The flag is cleared on a hit.
    pub fn get_by_tag_cold(&mut self, tag: u64) -> (Option<&mut I>, bool) {
        let mut cold_miss = false;
        let mut hit = None;
        for (i, way) in self.ways.iter().enumerate() {
            if way.is_valid() {
                if way.tag() == tag {
                    hit = Some(i);
                    cold_miss = false;
                    break;
                }
            } else {
                cold_miss = true;
            }
        }
        match hit {
            Some(i) => (Some(&mut self.ways[i]), cold_miss),
            None => (None, cold_miss),
        }
    }

    pub fn get_way(&mut self, way: u32) -> &mut I {
        &mut self.ways[way as usize]
    }

    #[must_use]
    pub fn peek_way(&self, way: u32) -> &I {
        &self.ways[way as usize]
    }

    /// The slot the policy currently ranks LRU; it may or may not hold
    /// a valid line. Replacement of the item must happen in place,
    /// without intervening state changes.
    pub fn lru_item(&mut self) -> &mut I {
        let way = self.replacement.lru_way();
        &mut self.ways[way as usize]
    }

    #[must_use]
    pub fn peek_lru_item(&self) -> &I {
        let way = self.replacement.lru_way();
        &self.ways[way as usize]
    }

    /// Victim selection with invalid-first: the first invalid slot if
    /// one exists, the LRU slot otherwise.
    pub fn victim_item(&mut self) -> &mut I {
        let mut way = self.find_invalid_way();
        if way >= self.num_ways() {
            way = self.replacement.lru_way();
        }
        &mut self.ways[way as usize]
    }

    /// Victim selection scanning for invalid slots in an explicit way
    /// order.
    pub fn victim_item_in(&mut self, way_order: &[u32]) -> &mut I {
        let mut way = self.find_invalid_way_in(way_order);
        if way >= self.num_ways() {
            way = self.replacement.lru_way();
        }
        &mut self.ways[way as usize]
    }

    /// First invalid way in ascending order, or N if every way is
    /// valid.
    #[must_use]
    pub fn find_invalid_way(&self) -> u32 {
        for (i, way) in self.ways.iter().enumerate() {
            if !way.is_valid() {
                return i as u32;
            }
        }
        self.num_ways()
    }

    /// First invalid way in a caller-supplied scan order, or N.
    #[must_use]
    pub fn find_invalid_way_in(&self, way_order: &[u32]) -> u32 {
        assert!(!way_order.is_empty(), "way scan order is empty");
        for &i in way_order {
            if !self.ways[i as usize].is_valid() {
                return i;
            }
        }
        self.num_ways()
    }

    #[must_use]
    pub fn has_open_way(&self) -> bool {
        self.find_invalid_way() != self.num_ways()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, I> {
        self.ways.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, I> {
        self.ways.iter_mut()
    }
}
