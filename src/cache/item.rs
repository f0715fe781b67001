use bitflags::bitflags;
use std::fmt;
use std::sync::Arc;

use super::decoder::AddrDecoder;

/// Sentinel for a slot identity that has not been assigned yet.
pub const INVALID_SLOT: u32 = u32::MAX;

/// One slot in a cache set. Slot identity (set index, way number) is
/// assigned once at set construction and never changes.
pub trait CacheItem: Clone {
    fn is_valid(&self) -> bool;
    fn set_valid(&mut self, valid: bool);

    fn way(&self) -> u32;
    fn set_index(&self) -> u32;
    fn tag(&self) -> u64;
    /// The block-aligned address this slot currently holds.
    fn address(&self) -> u64;

    /// Assign the way number. Panics on re-assignment.
    fn set_way(&mut self, way: u32);
    /// Assign the owning set's index. Panics on re-assignment.
    fn set_set_index(&mut self, set_idx: u32);
    fn set_decoder(&mut self, decoder: Arc<dyn AddrDecoder>);
    /// Re-derive tag and block address for a new address.
    fn set_address(&mut self, addr: u64);
}

/// Slot bookkeeping shared by every concrete item: identity, current
/// address/tag, and the decoder used to derive them.
#[derive(Clone)]
pub struct BasicItem {
    set_idx: u32,
    way_num: u32,
    addr: u64,
    tag: u64,
    decoder: Option<Arc<dyn AddrDecoder>>,
}

impl BasicItem {
    #[must_use]
    pub fn new() -> Self {
        Self {
            set_idx: INVALID_SLOT,
            way_num: INVALID_SLOT,
            addr: 0,
            tag: 0,
            decoder: None,
        }
    }

    #[must_use]
    pub fn way(&self) -> u32 {
        self.way_num
    }

    #[must_use]
    pub fn set_index(&self) -> u32 {
        self.set_idx
    }

    #[must_use]
    pub fn tag(&self) -> u64 {
        self.tag
    }

    #[must_use]
    pub fn address(&self) -> u64 {
        self.addr
    }

    pub fn set_way(&mut self, way: u32) {
        assert!(
            self.way_num == INVALID_SLOT,
            "way number may only be assigned once (was {}, new {way})",
            self.way_num
        );
        self.way_num = way;
    }

    pub fn set_set_index(&mut self, set_idx: u32) {
        assert!(
            self.set_idx == INVALID_SLOT,
            "set index may only be assigned once (was {}, new {set_idx})",
            self.set_idx
        );
        self.set_idx = set_idx;
    }

    pub fn set_decoder(&mut self, decoder: Arc<dyn AddrDecoder>) {
        self.decoder = Some(decoder);
    }

    pub fn set_address(&mut self, addr: u64) {
        let decoder = match &self.decoder {
            Some(d) => d,
            None => panic!("set_address called before a decoder was attached"),
        };
        self.addr = decoder.block_address(addr);
        self.tag = decoder.tag(addr);
    }
}

impl fmt::Debug for BasicItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicItem")
            .field("set_idx", &self.set_idx)
            .field("way_num", &self.way_num)
            .field("addr", &self.addr)
            .field("tag", &self.tag)
            .finish()
    }
}

bitflags! {
    /// Coherency-style state carried per line. The library itself only
    /// requires VALID; the other bits are bookkeeping for the model.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LineState: u8 {
        const VALID     = 1;
        const MODIFIED  = 1 << 1;
        const EXCLUSIVE = 1 << 2;
        const SHARED    = 1 << 3;
    }
}

/// Byte-addressable line payload on top of [`CacheItem`]. The seam the
/// blocking cache reads and writes through.
pub trait LineAccess: CacheItem {
    fn line_size(&self) -> u64;

    fn is_modified(&self) -> bool;
    fn set_modified(&mut self, modified: bool);
    fn is_exclusive(&self) -> bool;
    fn set_exclusive(&mut self, exclusive: bool);
    fn is_shared(&self) -> bool;
    fn set_shared(&mut self, shared: bool);

    /// Copy `buf.len()` bytes starting at `offset` out of the line.
    /// `offset + buf.len()` must not exceed the line size.
    fn read_bytes(&self, offset: u64, buf: &mut [u8]);
    /// Copy `buf` into the line at `offset`. Same bound as `read_bytes`.
    fn write_bytes(&mut self, offset: u64, buf: &[u8]);

    /// Return the line to valid/clean/exclusive at a new address.
    fn reset(&mut self, addr: u64);
}

/// An item holding a block of line data.
#[derive(Debug, Clone)]
pub struct LineData {
    base: BasicItem,
    line_size: u64,
    state: LineState,
    data: Box<[u8]>,
}

impl LineData {
    #[must_use]
    pub fn new(line_size: u64) -> Self {
        Self {
            base: BasicItem::new(),
            line_size,
            state: LineState::empty(),
            data: vec![0u8; line_size as usize].into_boxed_slice(),
        }
    }

    #[must_use]
    pub fn state(&self) -> LineState {
        self.state
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn check_span(&self, offset: u64, len: usize) {
        assert!(
            offset + len as u64 <= self.line_size,
            "line access [{offset}, {}) is outside the {}-byte line",
            offset + len as u64,
            self.line_size
        );
    }

    #[must_use]
    pub fn read_u8(&self, offset: u64) -> u8 {
        self.check_span(offset, 1);
        self.data[offset as usize]
    }

    #[must_use]
    pub fn read_u16(&self, offset: u64) -> u16 {
        self.check_span(offset, 2);
        let o = offset as usize;
        u16::from_le_bytes(self.data[o..o + 2].try_into().unwrap())
    }

    #[must_use]
    pub fn read_u32(&self, offset: u64) -> u32 {
        self.check_span(offset, 4);
        let o = offset as usize;
        u32::from_le_bytes(self.data[o..o + 4].try_into().unwrap())
    }

    #[must_use]
    pub fn read_u64(&self, offset: u64) -> u64 {
        self.check_span(offset, 8);
        let o = offset as usize;
        u64::from_le_bytes(self.data[o..o + 8].try_into().unwrap())
    }

    pub fn write_u8(&mut self, offset: u64, value: u8) {
        self.check_span(offset, 1);
        self.data[offset as usize] = value;
    }

    pub fn write_u16(&mut self, offset: u64, value: u16) {
        self.check_span(offset, 2);
        let o = offset as usize;
        self.data[o..o + 2].copy_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, offset: u64, value: u32) {
        self.check_span(offset, 4);
        let o = offset as usize;
        self.data[o..o + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, offset: u64, value: u64) {
        self.check_span(offset, 8);
        let o = offset as usize;
        self.data[o..o + 8].copy_from_slice(&value.to_le_bytes());
    }
}

impl CacheItem for LineData {
    fn is_valid(&self) -> bool {
        self.state.contains(LineState::VALID)
    }

    fn set_valid(&mut self, valid: bool) {
        self.state.set(LineState::VALID, valid);
    }

    fn way(&self) -> u32 {
        self.base.way()
    }

    fn set_index(&self) -> u32 {
        self.base.set_index()
    }

    fn tag(&self) -> u64 {
        self.base.tag()
    }

    fn address(&self) -> u64 {
        self.base.address()
    }

    fn set_way(&mut self, way: u32) {
        self.base.set_way(way);
    }

    fn set_set_index(&mut self, set_idx: u32) {
        self.base.set_set_index(set_idx);
    }

    fn set_decoder(&mut self, decoder: Arc<dyn AddrDecoder>) {
        self.base.set_decoder(decoder);
    }

    fn set_address(&mut self, addr: u64) {
        self.base.set_address(addr);
    }
}

impl LineAccess for LineData {
    fn line_size(&self) -> u64 {
        self.line_size
    }

    fn is_modified(&self) -> bool {
        self.state.contains(LineState::MODIFIED)
    }

    fn set_modified(&mut self, modified: bool) {
        self.state.set(LineState::MODIFIED, modified);
    }

    fn is_exclusive(&self) -> bool {
        self.state.contains(LineState::EXCLUSIVE)
    }

    fn set_exclusive(&mut self, exclusive: bool) {
        self.state.set(LineState::EXCLUSIVE, exclusive);
    }

    fn is_shared(&self) -> bool {
        self.state.contains(LineState::SHARED)
    }

    fn set_shared(&mut self, shared: bool) {
        self.state.set(LineState::SHARED, shared);
    }

    fn read_bytes(&self, offset: u64, buf: &mut [u8]) {
        self.check_span(offset, buf.len());
        let o = offset as usize;
        buf.copy_from_slice(&self.data[o..o + buf.len()]);
    }

    fn write_bytes(&mut self, offset: u64, buf: &[u8]) {
        self.check_span(offset, buf.len());
        let o = offset as usize;
        self.data[o..o + buf.len()].copy_from_slice(buf);
    }

    fn reset(&mut self, addr: u64) {
        self.set_address(addr);
        self.state = LineState::VALID | LineState::EXCLUSIVE;
    }
}

/// An item that carries only a tag plus a caller-defined payload, no
/// data block. Useful for TLBs, BTBs and similar structures.
#[derive(Debug, Clone)]
pub struct TaggedItem<P> {
    base: BasicItem,
    valid: bool,
    payload: P,
}

impl<P: Clone> TaggedItem<P> {
    #[must_use]
    pub fn new(payload: P) -> Self {
        Self {
            base: BasicItem::new(),
            valid: false,
            payload,
        }
    }

    #[must_use]
    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut P {
        &mut self.payload
    }

    /// Mark valid at a new address.
    pub fn reset(&mut self, addr: u64) {
        self.base.set_address(addr);
        self.valid = true;
    }
}

impl<P: Clone> CacheItem for TaggedItem<P> {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }

    fn way(&self) -> u32 {
        self.base.way()
    }

    fn set_index(&self) -> u32 {
        self.base.set_index()
    }

    fn tag(&self) -> u64 {
        self.base.tag()
    }

    fn address(&self) -> u64 {
        self.base.address()
    }

    fn set_way(&mut self, way: u32) {
        self.base.set_way(way);
    }

    fn set_set_index(&mut self, set_idx: u32) {
        self.base.set_set_index(set_idx);
    }

    fn set_decoder(&mut self, decoder: Arc<dyn AddrDecoder>) {
        self.base.set_decoder(decoder);
    }

    fn set_address(&mut self, addr: u64) {
        self.base.set_address(addr);
    }
}

/// Line data carrying a non-temporal mark for the NT-aware cache.
pub trait NtLineAccess: LineAccess {
    fn is_nt(&self) -> bool;
    fn set_nt(&mut self, nt: bool);
    fn reset_nt(&mut self, addr: u64, nt: bool) {
        self.reset(addr);
        self.set_nt(nt);
    }
}

#[derive(Debug, Clone)]
pub struct NtLineData {
    line: LineData,
    nt: bool,
}

impl NtLineData {
    #[must_use]
    pub fn new(line_size: u64) -> Self {
        Self {
            line: LineData::new(line_size),
            nt: false,
        }
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.line.data()
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.line.data_mut()
    }
}

impl CacheItem for NtLineData {
    fn is_valid(&self) -> bool {
        self.line.is_valid()
    }

    fn set_valid(&mut self, valid: bool) {
        self.line.set_valid(valid);
    }

    fn way(&self) -> u32 {
        self.line.way()
    }

    fn set_index(&self) -> u32 {
        CacheItem::set_index(&self.line)
    }

    fn tag(&self) -> u64 {
        self.line.tag()
    }

    fn address(&self) -> u64 {
        self.line.address()
    }

    fn set_way(&mut self, way: u32) {
        self.line.set_way(way);
    }

    fn set_set_index(&mut self, set_idx: u32) {
        self.line.set_set_index(set_idx);
    }

    fn set_decoder(&mut self, decoder: Arc<dyn AddrDecoder>) {
        self.line.set_decoder(decoder);
    }

    fn set_address(&mut self, addr: u64) {
        self.line.set_address(addr);
    }
}

impl LineAccess for NtLineData {
    fn line_size(&self) -> u64 {
        self.line.line_size()
    }

    fn is_modified(&self) -> bool {
        self.line.is_modified()
    }

    fn set_modified(&mut self, modified: bool) {
        self.line.set_modified(modified);
    }

    fn is_exclusive(&self) -> bool {
        self.line.is_exclusive()
    }

    fn set_exclusive(&mut self, exclusive: bool) {
        self.line.set_exclusive(exclusive);
    }

    fn is_shared(&self) -> bool {
        self.line.is_shared()
    }

    fn set_shared(&mut self, shared: bool) {
        self.line.set_shared(shared);
    }

    fn read_bytes(&self, offset: u64, buf: &mut [u8]) {
        self.line.read_bytes(offset, buf);
    }

    fn write_bytes(&mut self, offset: u64, buf: &[u8]) {
        self.line.write_bytes(offset, buf);
    }

    fn reset(&mut self, addr: u64) {
        self.line.reset(addr);
    }
}

impl NtLineAccess for NtLineData {
    fn is_nt(&self) -> bool {
        self.nt
    }

    fn set_nt(&mut self, nt: bool) {
        self.nt = nt;
    }
}
