use super::replacement::Replacement;

/// An entry in a content-addressable cache. The tag is an opaque
/// caller-supplied value; validity and tag management are the user's
/// responsibility.
pub trait CamItem: Clone {
    type Tag: PartialEq;

    fn tag(&self) -> &Self::Tag;
    fn is_valid(&self) -> bool;
    fn set_valid(&mut self, valid: bool);
    fn way(&self) -> u32;
    fn set_way(&mut self, way: u32);
}

/// Flat fully-associative cache: no sets, no address decoder. Lookups
/// scan every line; the supplied replacement policy owns the ranking.
/// Multiple lines may share a tag.
pub struct CamCache<I: CamItem> {
    lines: Vec<I>,
    replacement: Replacement,
}

impl<I: CamItem> CamCache<I> {
    /// The line count is taken from the policy's way count; every line
    /// is copy-initialized from `default_line`.
    pub fn new(default_line: &I, replacement: Replacement) -> Self {
        let num_lines = replacement.num_ways();
        let mut lines = vec![default_line.clone(); num_lines as usize];
        for (i, line) in lines.iter_mut().enumerate() {
            line.set_way(i as u32);
        }
        Self { lines, replacement }
    }

    #[must_use]
    pub fn num_lines(&self) -> u32 {
        self.lines.len() as u32
    }

    /// First valid line matching `tag`, in way order.
    pub fn get_by_tag(&mut self, tag: &I::Tag) -> Option<&mut I> {
        self.lines
            .iter_mut()
            .find(|l| l.is_valid() && l.tag() == tag)
    }

    #[must_use]
    pub fn peek_by_tag(&self, tag: &I::Tag) -> Option<&I> {
        self.lines.iter().find(|l| l.is_valid() && l.tag() == tag)
    }

    /// Every valid line matching `tag`.
    #[must_use]
    pub fn get_all_matching(&self, tag: &I::Tag) -> Vec<&I> {
        self.lines
            .iter()
            .filter(|l| l.is_valid() && l.tag() == tag)
            .collect()
    }

    #[must_use]
    pub fn is_hit(&self, tag: &I::Tag) -> bool {
        self.peek_by_tag(tag).is_some()
    }

    pub fn lru_line(&mut self) -> &mut I {
        let way = self.replacement.lru_way();
        &mut self.lines[way as usize]
    }

    #[must_use]
    pub fn peek_lru_line(&self) -> &I {
        let way = self.replacement.lru_way();
        &self.lines[way as usize]
    }

    pub fn mru_line(&mut self) -> &mut I {
        let way = self.replacement.mru_way();
        &mut self.lines[way as usize]
    }

    #[must_use]
    pub fn peek_mru_line(&self) -> &I {
        let way = self.replacement.mru_way();
        &self.lines[way as usize]
    }

    pub fn line_at_way(&mut self, way: u32) -> &mut I {
        &mut self.lines[way as usize]
    }

    /// `way` must identify a line of this cache (obtained from one of
    /// the lookup methods).
    pub fn touch_mru(&mut self, way: u32) {
        self.replacement.touch_mru(way);
    }

    pub fn touch_lru(&mut self, way: u32) {
        self.replacement.touch_lru(way);
    }

    pub fn invalidate_with_lru_update(&mut self, way: u32) {
        self.lines[way as usize].set_valid(false);
        self.replacement.touch_lru(way);
    }

    pub fn invalidate_all(&mut self) {
        for line in &mut self.lines {
            line.set_valid(false);
        }
        self.replacement.reset();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, I> {
        self.lines.iter()
    }
}
