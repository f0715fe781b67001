use byteorder::{LittleEndian, ReadBytesExt};
use num_enum::TryFromPrimitive;
use std::io::{self, Read};

/// Mask selecting the record-kind bits of a record's `flags` word.
pub const TYPE_MASK: u16 = 0x7;

/// Record kinds encoded in the low bits of `flags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum RecordKind {
    Annotation = 1,
    Instruction = 2,
    MemoryOp = 3,
    Pair = 4,
}

/// Common header shared by every record, packed little-endian on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Txn {
    pub time_start: u64,
    pub time_end: u64,
    pub parent_id: u64,
    pub transaction_id: u64,
    pub display_id: u64,
    pub location_id: u32,
    pub flags: u16,
}

impl Txn {
    /// On-disk size of the packed header.
    pub const BYTES: u64 = 46;

    /// Record kind from the low flag bits, or `None` when the bits
    /// name no known kind (corrupt data).
    #[must_use]
    pub fn kind(&self) -> Option<RecordKind> {
        RecordKind::try_from(self.flags & TYPE_MASK).ok()
    }

    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            time_start: reader.read_u64::<LittleEndian>()?,
            time_end: reader.read_u64::<LittleEndian>()?,
            parent_id: reader.read_u64::<LittleEndian>()?,
            transaction_id: reader.read_u64::<LittleEndian>()?,
            display_id: reader.read_u64::<LittleEndian>()?,
            location_id: reader.read_u32::<LittleEndian>()?,
            flags: reader.read_u16::<LittleEndian>()?,
        })
    }
}

/// A free-form text record.
#[derive(Debug, Clone)]
pub struct AnnotationRecord {
    pub header: Txn,
    pub text: String,
}

/// A retired-instruction record.
#[derive(Debug, Clone, Copy)]
pub struct InstructionRecord {
    pub header: Txn,
    pub op_code: u32,
    pub virtual_addr: u64,
    pub real_addr: u64,
}

/// A memory-operation record.
#[derive(Debug, Clone, Copy)]
pub struct MemoryOpRecord {
    pub header: Txn,
    pub virtual_addr: u64,
    pub real_addr: u64,
}

/// Display format for an integer pair field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum PairFormat {
    Decimal = 0,
    Hex = 1,
    Octal = 2,
}

/// Field types appearing in the pair schema. Anything else renders as
/// a "none" field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum PairFieldType {
    Int = 0,
    Str = 1,
}

/// A variable-width record reconstructed against the in-memory pair
/// schema. Field 0 is always the synthetic `pairid` field.
///
/// `values[i]` holds the integer form and a flag telling whether the
/// string form was synthesized from it; fields whose rendering came
/// from the string-interning table, and the synthetic field, carry
/// `false`. String-typed fields hold `(u64::MAX, true)`.
#[derive(Debug, Clone)]
pub struct PairRecord {
    pub header: Txn,
    pub pair_id: u16,
    pub length: u16,
    pub names: Vec<String>,
    pub sizes: Vec<u16>,
    pub formats: Vec<PairFormat>,
    pub values: Vec<(u64, bool)>,
    pub strings: Vec<String>,
}

/// Sink receiving the records found by a window query, one method per
/// record kind. Records are only valid for the duration of the call.
pub trait PipelineDataCallback {
    fn on_annotation(&mut self, record: &AnnotationRecord);
    fn on_instruction(&mut self, record: &InstructionRecord);
    fn on_memory(&mut self, record: &MemoryOpRecord);
    fn on_pair(&mut self, record: &PairRecord);
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    #[test]
    fn header_reads_packed_little_endian() {
        let mut buf = Vec::new();
        buf.write_u64::<LittleEndian>(100).unwrap();
        buf.write_u64::<LittleEndian>(200).unwrap();
        buf.write_u64::<LittleEndian>(0).unwrap();
        buf.write_u64::<LittleEndian>(42).unwrap();
        buf.write_u64::<LittleEndian>(42).unwrap();
        buf.write_u32::<LittleEndian>(7).unwrap();
        buf.write_u16::<LittleEndian>(RecordKind::Annotation as u16).unwrap();
        assert_eq!(buf.len() as u64, Txn::BYTES);

        let txn = Txn::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(txn.time_start, 100);
        assert_eq!(txn.time_end, 200);
        assert_eq!(txn.location_id, 7);
        assert_eq!(txn.kind(), Some(RecordKind::Annotation));
    }

    #[test]
    fn unknown_kind_bits_are_rejected() {
        let txn = Txn {
            time_start: 0,
            time_end: 0,
            parent_id: 0,
            transaction_id: 0,
            display_id: 0,
            location_id: 0,
            flags: 0x7,
        };
        assert_eq!(txn.kind(), None);
    }

    #[test]
    fn short_header_is_an_eof_error() {
        let buf = [0u8; 20];
        let err = Txn::read_from(&mut &buf[..]).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
