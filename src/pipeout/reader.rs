use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, trace};
use std::cell::Cell;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::record::{
    AnnotationRecord, InstructionRecord, MemoryOpRecord, PairFieldType, PairFormat, PairRecord,
    PipelineDataCallback, RecordKind, Txn,
};
use super::schema::SchemaTables;
use super::Error;

/// ASCII prefix of the optional index-file header.
pub const HEADER_PREFIX: &str = "sparta_pipeout_version_";
/// Total header size: prefix + decimal version, NUL-padded.
pub const HEADER_SIZE: usize = 64;
/// Newest (and at read time, only) supported format version.
pub const FILE_VERSION: u32 = 2;

/// A seekable handle that remembers its path so it can be re-opened in
/// place when the producer extends the file.
struct FileStream {
    path: PathBuf,
    file: BufReader<File>,
}

impl FileStream {
    fn open(path: PathBuf) -> Result<Self, Error> {
        let file = File::open(&path).map_err(Error::Io)?;
        if file.metadata().map_err(Error::Io)?.len() == 0 {
            return Err(Error::EmptyFile(path.display().to_string()));
        }
        Ok(Self {
            path,
            file: BufReader::new(file),
        })
    }

    /// Close and re-open the handle, restoring the cursor. On failure
    /// the previous handle stays usable.
    fn reopen(&mut self) -> Result<(), Error> {
        let pos = self.file.stream_position()?;
        let file = File::open(&self.path).map_err(Error::Io)?;
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(pos))?;
        self.file = reader;
        Ok(())
    }

    /// Current on-disk size, independent of the open handle.
    fn size(&self) -> io::Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    fn position(&mut self) -> io::Result<u64> {
        self.file.stream_position()
    }

    fn read_u64(&mut self) -> io::Result<u64> {
        self.file.read_u64::<LittleEndian>()
    }

    fn read_u32(&mut self) -> io::Result<u32> {
        self.file.read_u32::<LittleEndian>()
    }

    fn read_u16(&mut self) -> io::Result<u16> {
        self.file.read_u16::<LittleEndian>()
    }

    /// Next little-endian u64, or `None` on a clean end of file.
    fn try_read_u64(&mut self) -> Result<Option<u64>, Error> {
        match self.file.read_u64::<LittleEndian>() {
            Ok(v) => Ok(Some(v)),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(err) => Err(Error::Io(err)),
        }
    }

    /// Bytes read; shorter than the buffer only at end of file.
    fn read_up_to(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            let n = self.file.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    fn read_all_text(&mut self) -> io::Result<String> {
        let mut text = String::new();
        self.file.read_to_string(&mut text)?;
        Ok(text)
    }
}

impl Read for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

/// Releases the reader's single-entry flag on drop, including on
/// unwinds out of a callback.
struct QueryGuard {
    flag: Rc<Cell<bool>>,
}

impl Drop for QueryGuard {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

/// One record the audit found outside its heartbeat window.
#[derive(Debug, Clone, Copy)]
pub struct BoundsViolation {
    pub window_start: u64,
    pub window_end: u64,
    pub header: Txn,
}

/// Result of [`Reader::dump_index_transactions`].
#[derive(Debug, Clone, Default)]
pub struct AuditReport {
    /// Heartbeat windows replayed.
    pub windows: u64,
    /// Records delivered across all windows.
    pub records: u64,
    /// Records outside their window's bounds.
    pub violations: Vec<BoundsViolation>,
    /// Index entries found past the expected final entry.
    pub junk: Vec<u64>,
}

/// Sink that verifies every delivered record lies inside the heartbeat
/// window being replayed.
struct RecordChecker {
    start: u64,
    end: u64,
    violations: Rc<Cell<Vec<BoundsViolation>>>,
    records: Rc<Cell<u64>>,
}

impl RecordChecker {
    fn check(&mut self, header: &Txn) {
        self.records.set(self.records.get() + 1);
        if header.time_start < self.start || header.time_end > self.end {
            let mut violations = self.violations.take();
            violations.push(BoundsViolation {
                window_start: self.start,
                window_end: self.end,
                header: *header,
            });
            self.violations.set(violations);
        }
    }
}

impl PipelineDataCallback for RecordChecker {
    fn on_annotation(&mut self, record: &AnnotationRecord) {
        self.check(&record.header);
    }

    fn on_instruction(&mut self, record: &InstructionRecord) {
        self.check(&record.header);
    }

    fn on_memory(&mut self, record: &MemoryOpRecord) {
        self.check(&record.header);
    }

    fn on_pair(&mut self, record: &PairRecord) {
        self.check(&record.header);
    }
}

/// Reads transactions back from a produced database directory,
/// answering "every record whose lifetime touches [start, end]" via
/// the callback sink.
///
/// The directory must hold `record.bin`, `index.bin`, `map.dat`,
/// `data.dat`, `string_map.dat` and `display_format.dat`. Handles are
/// opened here and closed on drop.
impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader").field("dir", &self.dir).finish()
    }
}

pub struct Reader {
    dir: PathBuf,
    record_file: FileStream,
    index_file: FileStream,
    map_file: FileStream,
    data_file: FileStream,
    string_file: FileStream,
    display_file: FileStream,
    callback: Box<dyn PipelineDataCallback>,
    version: u32,
    heartbeat: u64,
    /// Offset of the first index entry, just past the header and
    /// heartbeat words.
    first_index: u64,
    index_size: u64,
    record_size: u64,
    lowest_cycle: u64,
    highest_cycle: u64,
    lock: Rc<Cell<bool>>,
    file_updated: bool,
    tables: SchemaTables,
}

impl Reader {
    pub fn open(
        dir: impl Into<PathBuf>,
        callback: Box<dyn PipelineDataCallback>,
    ) -> Result<Self, Error> {
        let dir = dir.into();
        let record_file = FileStream::open(dir.join("record.bin"))?;
        let mut index_file = FileStream::open(dir.join("index.bin"))?;
        let map_file = FileStream::open(dir.join("map.dat"))?;
        let data_file = FileStream::open(dir.join("data.dat"))?;
        let string_file = FileStream::open(dir.join("string_map.dat"))?;
        let display_file = FileStream::open(dir.join("display_format.dat"))?;

        debug!("pipeout reader opened: {}", dir.display());

        let version = Self::sniff_version(&mut index_file)?;
        if !(1..=FILE_VERSION).contains(&version) {
            return Err(Error::UnsupportedVersion {
                found: version,
                max: FILE_VERSION,
            });
        }

        // First integer after the header, if any: the index sampling
        // granularity.
        let heartbeat = index_file.read_u64()?;
        if heartbeat == 0 {
            return Err(Error::ZeroHeartbeat);
        }
        debug!("heartbeat is {heartbeat}");
        let first_index = index_file.position()?;

        let index_size = index_file.size()?;
        let record_size = record_file.size()?;

        let mut reader = Self {
            dir,
            record_file,
            index_file,
            map_file,
            data_file,
            string_file,
            display_file,
            callback,
            version,
            heartbeat,
            first_index,
            index_size,
            record_size,
            lowest_cycle: 0,
            highest_cycle: 0,
            lock: Rc::new(Cell::new(false)),
            file_updated: false,
            tables: SchemaTables::default(),
        };

        reader.lowest_cycle = reader.find_cycle_first()?;
        reader.highest_cycle = reader.find_cycle_last()?;

        let map_text = reader.map_file.read_all_text()?;
        let data_text = reader.data_file.read_all_text()?;
        let format_text = reader.display_file.read_all_text()?;
        let string_text = reader.string_file.read_all_text()?;
        reader.tables = SchemaTables::parse(&map_text, &data_text, &format_text, &string_text)?;

        Ok(reader)
    }

    /// Match the optional ASCII header; without one the file is
    /// format 1 and starts directly with the heartbeat.
    fn sniff_version(index_file: &mut FileStream) -> Result<u32, Error> {
        let mut header = [0u8; HEADER_SIZE];
        let got = index_file.read_up_to(&mut header)?;
        if got != HEADER_SIZE || !header.starts_with(HEADER_PREFIX.as_bytes()) {
            index_file.seek(0)?;
            return Ok(1);
        }
        let tail = &header[HEADER_PREFIX.len()..];
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        let text = std::str::from_utf8(&tail[..end])
            .map_err(|_| Error::BadHeader("version is not ASCII".to_owned()))?;
        text.trim()
            .parse()
            .map_err(|_| Error::BadHeader(format!("cannot parse version from `{text}`")))
    }

    fn acquire_lock(&self) -> Result<QueryGuard, Error> {
        if self.lock.get() {
            return Err(Error::QueryInProgress);
        }
        self.lock.set(true);
        Ok(QueryGuard {
            flag: Rc::clone(&self.lock),
        })
    }

    /// Round up to the next heartbeat multiple; 4600 becomes 5000 at
    /// a heartbeat of 1000.
    fn round_up(&self, num: u64) -> u64 {
        let sub_sum = num + self.heartbeat - 1;
        sub_sum - (sub_sum % self.heartbeat)
    }

    /// Byte position in the record file at which records for `start`
    /// begin. Past the last indexed bucket the position clamps to the
    /// record file size, which makes such queries read zero records.
    fn find_record_read_pos(&mut self, start: u64) -> Result<u64, Error> {
        let step = self.first_index + (start / self.heartbeat) * 8;
        self.index_file.seek(step)?;
        // The final index entry only points at the start of the last
        // record; it is not a bucket boundary.
        if (step as i64) >= (self.index_size as i64) - 8 {
            return Ok(self.record_size);
        }
        Ok(self.index_file.read_u64()?)
    }

    /// Earliest `time_start` in the file.
    fn find_cycle_first(&mut self) -> Result<u64, Error> {
        let _guard = self.acquire_lock()?;
        self.record_file.seek(0)?;
        let txn = Txn::read_from(&mut self.record_file)?;
        Ok(txn.time_start)
    }

    /// Latest `time_end - 1` in the file, read through the final index
    /// entry. Falls back to the cached value when the record is
    /// unreadable (e.g. mid-append).
    fn find_cycle_last(&mut self) -> Result<u64, Error> {
        let _guard = self.acquire_lock()?;
        self.index_file
            .seek(self.index_size.saturating_sub(8))?;
        let pos = self.index_file.read_u64()?;
        self.record_file.seek(pos)?;
        match Txn::read_from(&mut self.record_file) {
            Ok(txn) => Ok(txn.time_end - 1),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(self.highest_cycle),
            Err(err) => Err(Error::Io(err)),
        }
    }

    /// Deliver, via the callback, every record whose end time is at or
    /// after `start` and whose start time is at or before `end`
    /// (instruction, memory and pair records skip the window filter;
    /// sinks that care must filter). Records arrive in record-file
    /// order. Re-entry from a callback is a contract error.
    pub fn get_window(&mut self, start: u64, end: u64) -> Result<(), Error> {
        debug!("returning window [{start}, {end})");
        let _guard = self.acquire_lock()?;
        if self.version != FILE_VERSION {
            return Err(Error::UnsupportedVersion {
                found: self.version,
                max: FILE_VERSION,
            });
        }

        let chunk_end = self.round_up(end);
        let read_pos = self.find_record_read_pos(start)?;
        self.record_file.seek(read_pos)?;
        let end_pos = self.find_record_read_pos(chunk_end)?;
        trace!("window spans record bytes [{read_pos}, {end_pos})");

        let mut pos = read_pos;
        while pos < end_pos {
            self.read_one_record(start, end)?;
            pos = self.record_file.position()?;
        }
        Ok(())
    }

    /// Read one record at the record-file cursor and dispatch it.
    fn read_one_record(&mut self, start: u64, end: u64) -> Result<(), Error> {
        let header = match Txn::read_from(&mut self.record_file) {
            Ok(header) => header,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(Error::TruncatedRecord)
            }
            Err(err) => return Err(Error::Io(err)),
        };

        match header.kind() {
            Some(RecordKind::Annotation) => {
                let length = self.record_file.read_u16()?;
                let mut text = vec![0u8; usize::from(length)];
                self.record_file.read_exact(&mut text)?;
                if header.time_end < start || header.time_start > end {
                    trace!(
                        "skipped annotation outside of window [{start}, {end}): start {} end {}",
                        header.time_start,
                        header.time_end
                    );
                } else {
                    let record = AnnotationRecord {
                        header,
                        text: String::from_utf8_lossy(&text).into_owned(),
                    };
                    self.callback.on_annotation(&record);
                }
            }
            Some(RecordKind::Instruction) => {
                let record = InstructionRecord {
                    header,
                    op_code: self.record_file.read_u32()?,
                    virtual_addr: self.record_file.read_u64()?,
                    real_addr: self.record_file.read_u64()?,
                };
                self.callback.on_instruction(&record);
            }
            Some(RecordKind::MemoryOp) => {
                let record = MemoryOpRecord {
                    header,
                    virtual_addr: self.record_file.read_u64()?,
                    real_addr: self.record_file.read_u64()?,
                };
                self.callback.on_memory(&record);
            }
            Some(RecordKind::Pair) => self.read_pair_record(header)?,
            None => return Err(Error::UnknownRecordKind(header.flags)),
        }
        Ok(())
    }

    /// Rebuild a variable-width pair record against the in-memory
    /// schema tables.
    fn read_pair_record(&mut self, header: Txn) -> Result<(), Error> {
        let pair_id = *self
            .tables
            .loc_map
            .get(&header.location_id)
            .ok_or(Error::UnknownLocation(header.location_id))?;
        let schema = self
            .tables
            .pair_schemas
            .get(&pair_id)
            .ok_or(Error::UnknownPairId(pair_id))?;

        let length = schema.length;
        let mut record = PairRecord {
            header,
            pair_id,
            length,
            names: schema.names.clone(),
            sizes: schema.sizes.clone(),
            formats: schema.formats.clone(),
            values: Vec::with_capacity(usize::from(length)),
            strings: Vec::with_capacity(usize::from(length)),
        };
        record.values.push((u64::from(pair_id), false));
        record.strings.push(pair_id.to_string());

        for i in 1..usize::from(length) {
            match PairFieldType::try_from(schema.types[i]) {
                Ok(PairFieldType::Int) => {
                    let size = schema.sizes[i];
                    if u64::from(size) > 8 {
                        return Err(Error::FieldTooWide { size });
                    }
                    let mut raw = [0u8; 8];
                    self.record_file.read_exact(&mut raw[..usize::from(size)])?;
                    let value = u64::from_le_bytes(raw);
                    record.values.push((value, true));

                    // The string-interning table does not count the
                    // synthetic field, hence i - 1.
                    let key = (u64::from(pair_id), (i - 1) as u64, value);
                    if let Some(display) = self.tables.string_map.get(&key) {
                        record.strings.push(display.clone());
                        record.values[i].1 = false;
                    } else if value == u64::MAX {
                        record.strings.push(String::new());
                    } else {
                        record.strings.push(match record.formats[i] {
                            PairFormat::Decimal => value.to_string(),
                            PairFormat::Hex => format!("{value:#x}"),
                            PairFormat::Octal => format!("0{value:o}"),
                        });
                    }
                }
                Ok(PairFieldType::Str) => {
                    let str_len = self.record_file.read_u16()?;
                    let mut raw = vec![0u8; usize::from(str_len)];
                    self.record_file.read_exact(&mut raw)?;
                    record
                        .strings
                        .push(String::from_utf8_lossy(&raw).into_owned());
                    record.values.push((u64::MAX, true));
                }
                Err(_) => {
                    record.strings.push("none".to_owned());
                    record.values.push((0, false));
                }
            }
        }

        self.callback.on_pair(&record);
        Ok(())
    }

    /// Compare current on-disk sizes against the cached sizes; when
    /// the producer appended anything other than whole heartbeats of
    /// records, re-open the data-bearing files in place and refresh
    /// the cached state.
    fn check_index_updates(&mut self) -> Result<(), Error> {
        let index_size = self.index_file.size()?;
        let record_size = self.record_file.size()?;

        if index_size != self.index_size && record_size != self.record_size {
            let record_remainder = record_size % self.heartbeat;
            if record_size - record_remainder == self.record_size {
                return Ok(());
            }

            self.record_file.reopen()?;
            self.index_file.reopen()?;
            self.map_file.reopen()?;
            self.data_file.reopen()?;
            self.string_file.reopen()?;

            self.index_size = index_size;
            self.record_size = if record_remainder != 0 {
                record_size - record_remainder
            } else {
                record_size
            };
            self.highest_cycle = self.find_cycle_last()?;
            self.file_updated = true;
        }
        Ok(())
    }

    /// Whether the producer has grown the database since the last
    /// acknowledgment. Refreshes the reader's view as a side effect.
    pub fn is_updated(&mut self) -> Result<bool, Error> {
        self.check_index_updates()?;
        Ok(self.file_updated)
    }

    pub fn ack_updated(&mut self) {
        self.file_updated = false;
    }

    /// Replay every heartbeat window under a bounds-checking sink,
    /// then scan for stray index entries. The caller's sink is
    /// restored afterwards, error or not.
    pub fn dump_index_transactions(&mut self) -> Result<AuditReport, Error> {
        let violations: Rc<Cell<Vec<BoundsViolation>>> = Rc::new(Cell::new(Vec::new()));
        let records = Rc::new(Cell::new(0u64));

        let original = std::mem::replace(
            &mut self.callback,
            Box::new(RecordChecker {
                start: 0,
                end: self.heartbeat,
                violations: Rc::clone(&violations),
                records: Rc::clone(&records),
            }),
        );
        let windows = self.replay_all_windows(&violations, &records);
        self.callback = original;
        let windows = windows?;

        let mut junk = Vec::new();
        while let Some(value) = self.index_file.try_read_u64()? {
            debug!("read junk at the end of the index file: {value}");
            junk.push(value);
        }

        Ok(AuditReport {
            windows,
            records: records.get(),
            violations: violations.take(),
            junk,
        })
    }

    fn replay_all_windows(
        &mut self,
        violations: &Rc<Cell<Vec<BoundsViolation>>>,
        records: &Rc<Cell<u64>>,
    ) -> Result<u64, Error> {
        let mut windows = 0u64;
        let mut tick = 0u64;
        self.index_file.seek(0)?;
        while tick <= self.highest_cycle + (self.heartbeat - 1) {
            self.callback = Box::new(RecordChecker {
                start: tick,
                end: tick + self.heartbeat,
                violations: Rc::clone(violations),
                records: Rc::clone(records),
            });

            let pos = self.find_record_read_pos(tick)?;
            let chunk_end = self.round_up(tick + self.heartbeat);
            self.record_file.seek(pos)?;
            let end_pos = self.find_record_read_pos(chunk_end)?;
            debug!("heartbeat at t={tick}: record bytes [{pos}, {end_pos})");

            let mut cur = self.record_file.position()?;
            while cur < end_pos {
                self.read_one_record(tick, chunk_end)?;
                cur = self.record_file.position()?;
            }

            windows += 1;
            tick += self.heartbeat;
        }
        Ok(windows)
    }

    /// Minimum query granularity in ticks; windows always begin at
    /// multiples of it.
    #[must_use]
    pub fn chunk_size(&self) -> u64 {
        self.heartbeat
    }

    #[must_use]
    pub fn cycle_first(&self) -> u64 {
        self.lowest_cycle
    }

    #[must_use]
    pub fn cycle_last(&self) -> u64 {
        self.highest_cycle
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn callback(&self) -> &dyn PipelineDataCallback {
        &*self.callback
    }

    pub fn callback_mut(&mut self) -> &mut dyn PipelineDataCallback {
        &mut *self.callback
    }

    #[must_use]
    pub fn tables(&self) -> &SchemaTables {
        &self.tables
    }
}
