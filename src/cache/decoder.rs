use super::{CacheError, SizeUnit};

/// Maps an address onto the cache geometry. All operations are
/// constant time and cannot fail.
pub trait AddrDecoder {
    fn tag(&self, addr: u64) -> u64;
    fn index(&self, addr: u64) -> u32;
    fn block_address(&self, addr: u64) -> u64;
    fn block_offset(&self, addr: u64) -> u64;
}

/// Bit-field decoder. Assuming `line_size == stride` the address
/// splits as `| tag | index | offset |`.
#[derive(Debug, Clone)]
pub struct DefaultAddrDecoder {
    line_size: u64,
    blk_addr_mask: u64,
    blk_offset_mask: u64,
    index_shift: u32,
    index_mask: u32,
    tag_shift: u32,
}

fn require_power_of_two(what: &'static str, value: u64) -> Result<(), CacheError> {
    if value == 0 {
        return Err(CacheError::ZeroGeometry(what));
    }
    if !value.is_power_of_two() {
        return Err(CacheError::NotPowerOfTwo { what, value });
    }
    Ok(())
}

impl DefaultAddrDecoder {
    pub fn new(
        size: u64,
        unit: SizeUnit,
        line_size: u64,
        stride: u64,
        num_ways: u32,
    ) -> Result<Self, CacheError> {
        require_power_of_two("line size", line_size)?;
        require_power_of_two("stride", stride)?;
        if num_ways == 0 {
            return Err(CacheError::ZeroGeometry("way count"));
        }

        let size_bytes = unit.to_bytes(size);
        let num_sets = size_bytes / (line_size * u64::from(num_ways));
        if num_sets == 0 {
            return Err(CacheError::ZeroGeometry("set count"));
        }

        Ok(Self {
            line_size,
            blk_offset_mask: line_size - 1,
            blk_addr_mask: !(line_size - 1),
            index_shift: stride.ilog2(),
            index_mask: (num_sets - 1) as u32,
            tag_shift: (num_sets * stride).ilog2(),
        })
    }

    #[must_use]
    pub fn line_size(&self) -> u64 {
        self.line_size
    }

    #[must_use]
    pub fn index_mask(&self) -> u32 {
        self.index_mask
    }

    #[must_use]
    pub fn index_shift(&self) -> u32 {
        self.index_shift
    }

    #[must_use]
    pub fn block_offset_mask(&self) -> u64 {
        self.blk_offset_mask
    }
}

impl AddrDecoder for DefaultAddrDecoder {
    fn tag(&self, addr: u64) -> u64 {
        addr >> self.tag_shift
    }

    fn index(&self, addr: u64) -> u32 {
        ((addr >> self.index_shift) as u32) & self.index_mask
    }

    fn block_address(&self, addr: u64) -> u64 {
        addr & self.blk_addr_mask
    }

    fn block_offset(&self, addr: u64) -> u64 {
        addr & self.blk_offset_mask
    }
}

/// Decoder that XOR-folds configured address bits into the low bits of
/// the set index. Each entry of `hash` lists the address bit positions
/// reduced into one replacement bit; entry `i` produces bit `i`.
#[derive(Debug, Clone)]
pub struct HashAddrDecoder {
    base: DefaultAddrDecoder,
    index_hash: Vec<Vec<u32>>,
}

impl HashAddrDecoder {
    pub fn new(
        size: u64,
        unit: SizeUnit,
        line_size: u64,
        stride: u64,
        num_ways: u32,
        hash: Vec<Vec<u32>>,
    ) -> Result<Self, CacheError> {
        let base = DefaultAddrDecoder::new(size, unit, line_size, stride, num_ways)?;
        let num_sets = u64::from(base.index_mask) + 1;
        require_power_of_two("set count", num_sets)?;
        Ok(Self {
            base,
            index_hash: hash,
        })
    }
}

impl AddrDecoder for HashAddrDecoder {
    fn tag(&self, addr: u64) -> u64 {
        self.base.tag(addr)
    }

    fn index(&self, addr: u64) -> u32 {
        let mut index = self.base.index(addr);
        let mut hash_index = 0u32;
        let mut pass = 0u32;
        for slice in &self.index_hash {
            let mut hash = 0u32;
            for &bit in slice {
                hash ^= ((addr >> bit) & 0x1) as u32;
            }
            hash_index |= hash << pass;
            pass += 1;
        }
        index &= !((1u32 << pass) - 1);
        index | hash_index
    }

    fn block_address(&self, addr: u64) -> u64 {
        self.base.block_address(addr)
    }

    fn block_offset(&self, addr: u64) -> u64 {
        self.base.block_offset(addr)
    }
}

#[test]
fn test_default_decoder_split() {
    // 32KiB, 64B lines, 8 ways -> 64 sets
    let dec = DefaultAddrDecoder::new(32, SizeUnit::KiB, 64, 64, 8).unwrap();
    for addr in [0u64, 0x40, 0x1000, 0xdead_beef, u64::MAX, 0x00f1_f2f3_f4f5_f6f7] {
        assert_eq!(dec.block_address(addr) + dec.block_offset(addr), addr);
        assert!(dec.index(addr) < 64);
    }
    assert_eq!(dec.index(0x40), 1);
    assert_eq!(dec.index(0x1000), 0x40 & dec.index_mask());
    assert_eq!(dec.tag(0x1_0000), 0x1_0000 >> 12);
}

#[test]
fn test_default_decoder_bytes_unit() {
    let kb = DefaultAddrDecoder::new(4, SizeUnit::KiB, 64, 64, 4).unwrap();
    let bytes = DefaultAddrDecoder::new(4096, SizeUnit::Bytes, 64, 64, 4).unwrap();
    for addr in [0u64, 0xFFFF_FFFF_FFFF_FFFF, 0x00f1_f2f3_f4f5_f6f7] {
        assert_eq!(kb.index(addr), bytes.index(addr));
        assert_eq!(kb.tag(addr), bytes.tag(addr));
        assert_eq!(kb.block_address(addr), bytes.block_address(addr));
        assert_eq!(kb.block_offset(addr), bytes.block_offset(addr));
    }
}

#[test]
fn test_default_decoder_rejects_bad_geometry() {
    assert!(DefaultAddrDecoder::new(32, SizeUnit::KiB, 48, 64, 8).is_err());
    assert!(DefaultAddrDecoder::new(32, SizeUnit::KiB, 64, 96, 8).is_err());
    assert!(DefaultAddrDecoder::new(0, SizeUnit::KiB, 64, 64, 8).is_err());
}

#[test]
fn test_hash_decoder_folds_low_bits() {
    // 64 sets; two hashed bits
    let dec = HashAddrDecoder::new(
        32,
        SizeUnit::KiB,
        64,
        64,
        8,
        vec![vec![6, 12], vec![7, 13]],
    )
    .unwrap();
    let base = DefaultAddrDecoder::new(32, SizeUnit::KiB, 64, 64, 8).unwrap();

    let addr = 0x3040u64; // bit12 and bit6 set -> hash bit0 = 0; bit13 set -> hash bit1 = 1
    let expect = (base.index(addr) & !0x3) | 0x2;
    assert_eq!(dec.index(addr), expect);

    // Tag and block math are untouched by the hash
    assert_eq!(dec.tag(addr), base.tag(addr));
    assert_eq!(dec.block_address(addr) + dec.block_offset(addr), addr);
}

#[test]
fn test_hash_decoder_requires_pow2_sets() {
    // 24KiB / (64 * 8) = 48 sets, not a power of two
    assert!(HashAddrDecoder::new(24, SizeUnit::KiB, 64, 64, 8, vec![vec![6]]).is_err());
}
