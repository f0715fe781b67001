use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use byteorder::{LittleEndian, WriteBytesExt};
use simkit::pipeout::{
    AnnotationRecord, Error, InstructionRecord, MemoryOpRecord, PairRecord,
    PipelineDataCallback, Reader, RecordKind, HEADER_PREFIX, HEADER_SIZE,
};
use tempfile::TempDir;

const HEARTBEAT: u64 = 1000;
const PAIR_LOCATION: u32 = 7;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Annotation {
        start: u64,
        end: u64,
        text: String,
    },
    Instruction {
        op_code: u32,
    },
    Memory {
        virtual_addr: u64,
    },
    Pair {
        names: Vec<String>,
        values: Vec<(u64, bool)>,
        strings: Vec<String>,
    },
}

struct Collecting(Rc<RefCell<Vec<Event>>>);

impl PipelineDataCallback for Collecting {
    fn on_annotation(&mut self, record: &AnnotationRecord) {
        self.0.borrow_mut().push(Event::Annotation {
            start: record.header.time_start,
            end: record.header.time_end,
            text: record.text.clone(),
        });
    }

    fn on_instruction(&mut self, record: &InstructionRecord) {
        self.0.borrow_mut().push(Event::Instruction {
            op_code: record.op_code,
        });
    }

    fn on_memory(&mut self, record: &MemoryOpRecord) {
        self.0.borrow_mut().push(Event::Memory {
            virtual_addr: record.virtual_addr,
        });
    }

    fn on_pair(&mut self, record: &PairRecord) {
        self.0.borrow_mut().push(Event::Pair {
            names: record.names.clone(),
            values: record.values.clone(),
            strings: record.strings.clone(),
        });
    }
}

fn push_header(out: &mut Vec<u8>, start: u64, end: u64, location: u32, kind: RecordKind) {
    out.write_u64::<LittleEndian>(start).unwrap();
    out.write_u64::<LittleEndian>(end).unwrap();
    out.write_u64::<LittleEndian>(0).unwrap(); // parent
    out.write_u64::<LittleEndian>(end).unwrap(); // transaction id
    out.write_u64::<LittleEndian>(end).unwrap(); // display id
    out.write_u32::<LittleEndian>(location).unwrap();
    out.write_u16::<LittleEndian>(kind as u16).unwrap();
}

fn push_annotation(out: &mut Vec<u8>, start: u64, end: u64, text: &str) -> u64 {
    let offset = out.len() as u64;
    push_header(out, start, end, 1, RecordKind::Annotation);
    out.write_u16::<LittleEndian>(text.len() as u16).unwrap();
    out.extend_from_slice(text.as_bytes());
    offset
}

fn push_instruction(out: &mut Vec<u8>, start: u64, end: u64, op_code: u32) -> u64 {
    let offset = out.len() as u64;
    push_header(out, start, end, 2, RecordKind::Instruction);
    out.write_u32::<LittleEndian>(op_code).unwrap();
    out.write_u64::<LittleEndian>(0x4000).unwrap();
    out.write_u64::<LittleEndian>(0x8000).unwrap();
    offset
}

fn push_memory(out: &mut Vec<u8>, start: u64, end: u64, virtual_addr: u64) -> u64 {
    let offset = out.len() as u64;
    push_header(out, start, end, 3, RecordKind::MemoryOp);
    out.write_u64::<LittleEndian>(virtual_addr).unwrap();
    out.write_u64::<LittleEndian>(virtual_addr + 0x1000).unwrap();
    offset
}

/// Pair of the test schema: uid (4-byte int), mnemonic (string),
/// flags (8-byte int).
fn push_pair(out: &mut Vec<u8>, start: u64, end: u64, uid: u32, mnemonic: &str, flags: u64) -> u64 {
    let offset = out.len() as u64;
    push_header(out, start, end, PAIR_LOCATION, RecordKind::Pair);
    out.write_u32::<LittleEndian>(uid).unwrap();
    out.write_u16::<LittleEndian>(mnemonic.len() as u16).unwrap();
    out.extend_from_slice(mnemonic.as_bytes());
    out.write_u64::<LittleEndian>(flags).unwrap();
    offset
}

fn write_index(dir: &Path, with_header: bool, version: u32, entries: &[u64], junk: &[u64]) {
    let mut out = Vec::new();
    if with_header {
        let mut header = format!("{HEADER_PREFIX}{version}").into_bytes();
        header.resize(HEADER_SIZE, 0);
        out.extend_from_slice(&header);
    }
    out.write_u64::<LittleEndian>(HEARTBEAT).unwrap();
    for &entry in entries.iter().chain(junk) {
        out.write_u64::<LittleEndian>(entry).unwrap();
    }
    fs::write(dir.join("index.bin"), out).unwrap();
}

fn write_schema_files(dir: &Path) {
    fs::write(dir.join("map.dat"), format!("{PAIR_LOCATION}:3\n")).unwrap();
    fs::write(dir.join("data.dat"), "3:3:uid:4:0:mnemonic:0:1:flags:8:0\n").unwrap();
    fs::write(dir.join("display_format.dat"), "3:1:0:0\n").unwrap();
    fs::write(dir.join("string_map.dat"), "3:0:1:one\n").unwrap();
}

/// The standard fixture: three annotations ending at 500, 1500 and
/// 2500, an instruction and a memory op in the first heartbeat, and
/// two pairs ending in the second.
fn build_database(dir: &Path, with_header: bool, junk: &[u64]) {
    let mut records = Vec::new();
    let a1 = push_annotation(&mut records, 400, 500, "first");
    push_instruction(&mut records, 550, 600, 0x13);
    push_memory(&mut records, 650, 700, 0xcafe);
    let a2 = push_annotation(&mut records, 1400, 1500, "second");
    push_pair(&mut records, 1700, 1800, 0xbeef, "ADD", u64::MAX);
    push_pair(&mut records, 1850, 1900, 1, "SUB", 5);
    let a3 = push_annotation(&mut records, 2400, 2500, "third");
    fs::write(dir.join("record.bin"), &records).unwrap();

    // Bucket entries for k = 0, 1, 2, then the final entry pointing
    // at the start of the last record.
    write_index(dir, with_header, 2, &[a1, a2, a3, a3], junk);
    write_schema_files(dir);
}

fn open_with_collector(dir: &Path) -> (Reader, Rc<RefCell<Vec<Event>>>) {
    let events = Rc::new(RefCell::new(Vec::new()));
    let reader = Reader::open(dir, Box::new(Collecting(events.clone()))).unwrap();
    (reader, events)
}

#[test]
fn window_queries_deliver_bucketed_records() {
    let tmp = TempDir::new().unwrap();
    build_database(tmp.path(), true, &[]);
    let (mut reader, events) = open_with_collector(tmp.path());

    assert_eq!(reader.version(), 2);
    assert_eq!(reader.chunk_size(), HEARTBEAT);
    assert_eq!(reader.cycle_first(), 400);
    assert_eq!(reader.cycle_last(), 2499);

    reader.get_window(0, 1000).unwrap();
    {
        let seen = events.borrow();
        assert_eq!(seen.len(), 3);
        assert_eq!(
            seen[0],
            Event::Annotation {
                start: 400,
                end: 500,
                text: "first".to_owned()
            }
        );
        assert_eq!(seen[1], Event::Instruction { op_code: 0x13 });
        assert_eq!(seen[2], Event::Memory { virtual_addr: 0xcafe });
    }

    events.borrow_mut().clear();
    reader.get_window(1000, 2000).unwrap();
    {
        let seen = events.borrow();
        assert_eq!(seen.len(), 3);
        assert!(matches!(&seen[0], Event::Annotation { text, .. } if text == "second"));
        assert!(matches!(&seen[1], Event::Pair { .. }));
        assert!(matches!(&seen[2], Event::Pair { .. }));
    }

    events.borrow_mut().clear();
    reader.get_window(2000, 3000).unwrap();
    {
        let seen = events.borrow();
        assert_eq!(seen.len(), 1);
        assert!(matches!(&seen[0], Event::Annotation { text, .. } if text == "third"));
    }
}

#[test]
fn pair_reconstruction_follows_the_schema() {
    let tmp = TempDir::new().unwrap();
    build_database(tmp.path(), true, &[]);
    let (mut reader, events) = open_with_collector(tmp.path());

    reader.get_window(1000, 2000).unwrap();
    let seen = events.borrow();

    let Event::Pair {
        names,
        values,
        strings,
    } = &seen[1]
    else {
        panic!("expected a pair event, got {:?}", seen[1]);
    };
    assert_eq!(names, &["pairid", "uid", "mnemonic", "flags"]);
    // Synthetic pairid field, hex-formatted uid, raw string field, and
    // an all-ones integer rendering as the empty string.
    assert_eq!(values[0], (3, false));
    assert_eq!(strings[0], "3");
    assert_eq!(values[1], (0xbeef, true));
    assert_eq!(strings[1], "0xbeef");
    assert_eq!(values[2], (u64::MAX, true));
    assert_eq!(strings[2], "ADD");
    assert_eq!(values[3], (u64::MAX, true));
    assert_eq!(strings[3], "");

    let Event::Pair {
        values, strings, ..
    } = &seen[2]
    else {
        panic!("expected a pair event, got {:?}", seen[2]);
    };
    // uid 1 hits the string-interning table, which also clears the
    // numeric-validity flag; flags renders decimal.
    assert_eq!(values[1], (1, false));
    assert_eq!(strings[1], "one");
    assert_eq!(strings[3], "5");
}

#[test]
fn annotations_are_filtered_but_pairs_are_not() {
    let tmp = TempDir::new().unwrap();
    build_database(tmp.path(), true, &[]);
    let (mut reader, events) = open_with_collector(tmp.path());

    // Bucket 1 holds the "second" annotation (ends at 1500) and both
    // pairs. The annotation ends before the window and is dropped;
    // the pairs are delivered regardless.
    reader.get_window(1600, 1900).unwrap();
    let seen = events.borrow();
    assert_eq!(seen.len(), 2);
    assert!(matches!(&seen[0], Event::Pair { .. }));
    assert!(matches!(&seen[1], Event::Pair { .. }));
}

#[test]
fn window_past_the_last_bucket_is_empty() {
    let tmp = TempDir::new().unwrap();
    build_database(tmp.path(), true, &[]);
    let (mut reader, events) = open_with_collector(tmp.path());

    reader.get_window(5000, 6000).unwrap();
    assert!(events.borrow().is_empty());
}

#[test]
fn audit_of_a_clean_database_reports_nothing() {
    let tmp = TempDir::new().unwrap();
    build_database(tmp.path(), true, &[]);
    let (mut reader, _events) = open_with_collector(tmp.path());

    let report = reader.dump_index_transactions().unwrap();
    assert_eq!(report.windows, 4); // ticks 0, 1000, 2000, 3000
    assert_eq!(report.records, 7);
    assert!(report.violations.is_empty());
    assert!(report.junk.is_empty());
}

#[test]
fn audit_reports_trailing_index_junk() {
    let tmp = TempDir::new().unwrap();
    build_database(tmp.path(), true, &[999]);
    let (mut reader, _events) = open_with_collector(tmp.path());

    let report = reader.dump_index_transactions().unwrap();
    assert_eq!(report.junk, vec![999]);
    // The junk entry shifts the final bucket, so the last annotation
    // replays inside a window that starts after it does.
    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].header.time_start, 2400);
    assert_eq!(report.violations[0].window_start, 3000);
}

#[test]
fn headerless_database_is_version_1_and_unreadable() {
    let tmp = TempDir::new().unwrap();
    build_database(tmp.path(), false, &[]);
    let (mut reader, events) = open_with_collector(tmp.path());

    assert_eq!(reader.version(), 1);
    assert!(matches!(
        reader.get_window(0, 1000),
        Err(Error::UnsupportedVersion { found: 1, max: 2 })
    ));
    assert!(events.borrow().is_empty());
}

#[test]
fn future_version_is_rejected_at_open() {
    let tmp = TempDir::new().unwrap();
    build_database(tmp.path(), true, &[]);
    // Rewrite the index with a version from the future
    write_index(tmp.path(), true, 3, &[0, 0], &[]);

    let events = Rc::new(RefCell::new(Vec::new()));
    let err = Reader::open(tmp.path(), Box::new(Collecting(events))).unwrap_err();
    assert!(matches!(err, Error::UnsupportedVersion { found: 3, max: 2 }));
}

#[test]
fn zero_heartbeat_is_rejected() {
    let tmp = TempDir::new().unwrap();
    build_database(tmp.path(), true, &[]);
    let mut out = Vec::new();
    let mut header = format!("{HEADER_PREFIX}2").into_bytes();
    header.resize(HEADER_SIZE, 0);
    out.extend_from_slice(&header);
    out.write_u64::<LittleEndian>(0).unwrap();
    out.write_u64::<LittleEndian>(0).unwrap();
    fs::write(tmp.path().join("index.bin"), out).unwrap();

    let events = Rc::new(RefCell::new(Vec::new()));
    let err = Reader::open(tmp.path(), Box::new(Collecting(events))).unwrap_err();
    assert!(matches!(err, Error::ZeroHeartbeat));
}

#[test]
fn empty_record_file_is_rejected() {
    let tmp = TempDir::new().unwrap();
    build_database(tmp.path(), true, &[]);
    fs::write(tmp.path().join("record.bin"), b"").unwrap();

    let events = Rc::new(RefCell::new(Vec::new()));
    let err = Reader::open(tmp.path(), Box::new(Collecting(events))).unwrap_err();
    assert!(matches!(err, Error::EmptyFile(_)));
}

#[test]
fn producer_appends_are_noticed_and_acknowledged() {
    let tmp = TempDir::new().unwrap();
    build_database(tmp.path(), true, &[]);
    let (mut reader, _events) = open_with_collector(tmp.path());

    assert!(!reader.is_updated().unwrap());
    assert_eq!(reader.cycle_last(), 2499);

    // The producer appends one more record and a new final index
    // entry pointing at it.
    let mut records = fs::read(tmp.path().join("record.bin")).unwrap();
    let a4 = push_annotation(&mut records, 3400, 3500, "fourth");
    fs::write(tmp.path().join("record.bin"), &records).unwrap();
    let mut index = fs::read(tmp.path().join("index.bin")).unwrap();
    index.write_u64::<LittleEndian>(a4).unwrap();
    fs::write(tmp.path().join("index.bin"), &index).unwrap();

    assert!(reader.is_updated().unwrap());
    assert_eq!(reader.cycle_last(), 3499);

    reader.ack_updated();
    assert!(!reader.is_updated().unwrap());
}
