use std::{error, fmt, io};

pub mod reader;
pub mod record;
pub mod schema;

pub use self::reader::{
    AuditReport, BoundsViolation, Reader, FILE_VERSION, HEADER_PREFIX, HEADER_SIZE,
};
pub use self::record::{
    AnnotationRecord, InstructionRecord, MemoryOpRecord, PairFieldType, PairFormat, PairRecord,
    PipelineDataCallback, RecordKind, Txn, TYPE_MASK,
};
pub use self::schema::{PairSchema, SchemaTables};

/// Transaction database errors
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    /// A database file exists but holds no data. Produced databases
    /// always carry at least one record and one index entry.
    EmptyFile(String),
    BadHeader(String),
    UnsupportedVersion { found: u32, max: u32 },
    ZeroHeartbeat,
    /// The reader was re-entered while a query was running.
    QueryInProgress,
    /// A record was cut short by the end of the file.
    TruncatedRecord,
    UnknownRecordKind(u16),
    UnknownLocation(u32),
    UnknownPairId(u16),
    FieldTooWide { size: u16 },
    BadTable { file: &'static str, line: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => err.fmt(f),
            Self::EmptyFile(path) => {
                write!(f, "{path} is empty; did database collection complete?")
            }
            Self::BadHeader(detail) => write!(f, "malformed index header: {detail}"),
            Self::UnsupportedVersion { found, max } => write!(
                f,
                "database format {found} is not supported; expected a version in [1, {max}]"
            ),
            Self::ZeroHeartbeat => {
                write!(f, "database has a heartbeat of 0; this would be too slow to load")
            }
            Self::QueryInProgress => {
                write!(f, "the reader is not thread safe and a query is already running")
            }
            Self::TruncatedRecord => write!(f, "record cut short; data might be corrupt"),
            Self::UnknownRecordKind(flags) => {
                write!(f, "unknown record kind in flags {flags:#06x}; data might be corrupt")
            }
            Self::UnknownLocation(loc) => {
                write!(f, "location {loc} has no pair mapping; data might be corrupt")
            }
            Self::UnknownPairId(id) => {
                write!(f, "pair id {id} has no schema; data might be corrupt")
            }
            Self::FieldTooWide { size } => {
                write!(f, "pair field of {size} bytes is too wide to read")
            }
            Self::BadTable { file, line } => {
                write!(f, "malformed entry at {file} line {line}")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::TruncatedRecord
        } else {
            Self::Io(err)
        }
    }
}
