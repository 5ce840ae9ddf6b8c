use std::io::SeekFrom;

use num_traits::FromPrimitive;

use crate::storage::File;
use crate::util::coding::decode_fixed_32;
use crate::util::crc32;
use crate::wal::{RecordType, BLOCK_SIZE, HEADER_SIZE};

enum ReportError {
    Eof,
    BadRecord,
}

struct Record {
    t: RecordType,
    data: Vec<u8>,
}

/// Receives notice of bytes the reader had to skip. `bytes` is the
/// approximate number of bytes dropped due to the corruption.
pub trait Reporter {
    fn corruption(&mut self, bytes: u64, reason: &str);
}

/// Reads logical records back out of a log file written by `Writer`,
/// reassembling fragments and skipping over corrupted regions.
pub struct Reader<F: File> {
    file: F,
    reporter: Option<Box<dyn Reporter>>,
    // Whether to verify record checksums.
    checksum: bool,
    buffer: Vec<u8>,
    // The valid data length in buffer.
    buffer_length: usize,
    // Last `read` indicated EOF by returning < BLOCK_SIZE.
    eof: bool,
    // Offset of the last record returned by `read_record`.
    last_record_offset: u64,
    // Offset of the first location past the end of buffer.
    end_of_buffer_offset: u64,
    // Offset at which to start looking for the first record to return.
    initial_offset: u64,
    // True while resynchronizing after a seek (initial_offset > 0). In
    // this mode a run of KMiddleType and KLastType records is silently
    // skipped.
    resyncing: bool,
}

impl<F: File> Reader<F> {
    pub fn new(
        file: F,
        reporter: Option<Box<dyn Reporter>>,
        checksum: bool,
        initial_offset: u64,
    ) -> Self {
        Reader {
            file,
            reporter,
            checksum,
            buffer: vec![],
            buffer_length: 0,
            eof: false,
            last_record_offset: 0,
            end_of_buffer_offset: 0,
            initial_offset,
            resyncing: initial_offset > 0,
        }
    }

    /// Reads the next logical record into `buf`, returning true on success
    /// and false at end of input. Records written after this reader's
    /// `initial_offset` are the only ones returned.
    pub fn read_record(&mut self, buf: &mut Vec<u8>) -> bool {
        if self.last_record_offset < self.initial_offset && !self.skip_to_initial_block() {
            return false;
        }
        buf.clear();
        let mut in_fragmented_record = false;
        // Offset of the logical record we are assembling. Zero is a dummy
        // value until a KFullType or KFirstType record sets it.
        let mut prospective_record_offset = 0;

        loop {
            match self.read_physical_record() {
                Ok(mut record) => {
                    if self.resyncing {
                        match record.t {
                            RecordType::KMiddleType => continue,
                            RecordType::KLastType => {
                                self.resyncing = false;
                                continue;
                            }
                            _ => self.resyncing = false,
                        }
                    }

                    let physical_record_offset = self.end_of_buffer_offset
                        - self.buffer_length as u64
                        - HEADER_SIZE as u64
                        - record.data.len() as u64;

                    match record.t {
                        RecordType::KFullType => {
                            if in_fragmented_record {
                                self.report_drop(buf.len() as u64, "partial record without end(1)");
                            }
                            prospective_record_offset = physical_record_offset;
                            buf.clear();
                            buf.append(&mut record.data);
                            self.last_record_offset = prospective_record_offset;
                            return true;
                        }
                        RecordType::KFirstType => {
                            if in_fragmented_record {
                                self.report_drop(buf.len() as u64, "partial record without end(2)");
                            }
                            prospective_record_offset = physical_record_offset;
                            buf.clear();
                            buf.append(&mut record.data);
                            in_fragmented_record = true;
                        }
                        RecordType::KMiddleType => {
                            if !in_fragmented_record {
                                self.report_drop(
                                    record.data.len() as u64,
                                    "missing start of fragmented record(1)",
                                );
                                // Keep scanning for a new full or first record.
                            } else {
                                buf.append(&mut record.data);
                            }
                        }
                        RecordType::KLastType => {
                            if !in_fragmented_record {
                                self.report_drop(
                                    record.data.len() as u64,
                                    "missing start of fragmented record(2)",
                                );
                            } else {
                                buf.append(&mut record.data);
                                // The logical record's offset was fixed by its
                                // first fragment.
                                self.last_record_offset = prospective_record_offset;
                                return true;
                            }
                        }
                        // read_physical_record never yields KZeroType.
                        RecordType::KZeroType => {}
                    }
                }
                Err(ReportError::Eof) => {
                    if in_fragmented_record {
                        // The writer died in the middle of the record; do not
                        // report it as corruption.
                        buf.clear();
                    }
                    return false;
                }
                Err(ReportError::BadRecord) => {
                    if in_fragmented_record {
                        self.report_drop(buf.len() as u64, "error in middle of record");
                        in_fragmented_record = false;
                        buf.clear();
                    }
                }
            }
        }
    }

    /// Offset of the last record returned by `read_record`.
    pub fn last_record_offset(&self) -> u64 {
        self.last_record_offset
    }

    fn read_physical_record(&mut self) -> Result<Record, ReportError> {
        loop {
            // Reached the end of a block without a complete header.
            if self.buffer_length < HEADER_SIZE {
                self.buffer = vec![0; BLOCK_SIZE];
                self.buffer_length = 0;
                if self.eof {
                    // A non-empty remnant here is a header truncated by a
                    // writer crash; treat it as EOF, not an error.
                    return Err(ReportError::Eof);
                }
                match self.file.read(&mut self.buffer) {
                    Ok(n) => {
                        self.end_of_buffer_offset += n as u64;
                        self.buffer_length = n;
                        if n < BLOCK_SIZE {
                            self.eof = true;
                        }
                    }
                    Err(e) => {
                        self.report_drop(BLOCK_SIZE as u64, &e.to_string());
                        self.eof = true;
                        return Err(ReportError::Eof);
                    }
                }
                continue;
            }

            // Parse the header.
            let header = &self.buffer[..HEADER_SIZE];
            let a = header[4] as usize & 0xff;
            let b = header[5] as usize & 0xff;
            let record_type = header[6];
            let length = a | (b << 8);
            // A physical record never straddles a block boundary.
            if HEADER_SIZE + length > self.buffer_length {
                let drop_size = self.buffer_length;
                self.buffer_length = 0;
                if !self.eof {
                    self.report_drop(drop_size as u64, "bad record length");
                    return Err(ReportError::BadRecord);
                }
                // Reaching EOF without `length` bytes of payload means the
                // writer died mid-record. Not a corruption.
                return Err(ReportError::Eof);
            }

            // Skip empty records generated by mmap-based preallocation.
            if record_type == RecordType::KZeroType as u8 && length == 0 {
                self.buffer_length = 0;
                return Err(ReportError::BadRecord);
            }

            if self.checksum {
                let expected_crc = crc32::unmask(decode_fixed_32(header));
                let actual_crc =
                    crc32::hash(&self.buffer[HEADER_SIZE - 1..HEADER_SIZE + length]);
                if actual_crc != expected_crc {
                    // Drop the rest of the buffer: `length` itself may be
                    // corrupted, and trusting it could surface a fragment of
                    // a real record that happens to look valid.
                    let drop_size = self.buffer_length;
                    self.buffer_length = 0;
                    self.report_drop(drop_size as u64, "checksum mismatch");
                    return Err(ReportError::BadRecord);
                }
            }

            let t = match RecordType::from_u8(record_type) {
                Some(RecordType::KZeroType) | None => {
                    let drop_size = self.buffer_length;
                    self.buffer_length = 0;
                    self.report_drop(drop_size as u64, "unknown record type");
                    return Err(ReportError::BadRecord);
                }
                Some(t) => t,
            };

            // Consume the header and payload from the buffer.
            let mut data: Vec<u8> = self.buffer.drain(..HEADER_SIZE + length).collect();
            self.buffer_length -= data.len();

            // Skip physical records that started before `initial_offset`.
            if (self.end_of_buffer_offset
                - self.buffer_length as u64
                - HEADER_SIZE as u64
                - length as u64)
                < self.initial_offset
            {
                return Err(ReportError::BadRecord);
            }

            data.drain(..HEADER_SIZE);
            return Ok(Record { t, data });
        }
    }

    /// Skips all blocks that end before `initial_offset`. Returns true on
    /// success. Handles reporting.
    fn skip_to_initial_block(&mut self) -> bool {
        let offset_in_block = self.initial_offset % BLOCK_SIZE as u64;
        let mut block_start_location = self.initial_offset - offset_in_block;

        // Don't search a block if we'd land in the trailer.
        if offset_in_block > (BLOCK_SIZE - 6) as u64 {
            block_start_location += BLOCK_SIZE as u64;
        }

        self.end_of_buffer_offset = block_start_location;

        if block_start_location > 0 {
            if let Err(e) = self.file.seek(SeekFrom::Start(block_start_location)) {
                self.report_drop(block_start_location, &e.to_string());
                return false;
            }
        }
        true
    }

    fn report_drop(&mut self, bytes: u64, reason: &str) {
        log::warn!("dropping {} bytes from log: {}", bytes, reason);
        if let Some(reporter) = self.reporter.as_mut() {
            // Only report drops past `initial_offset`; the special case is a
            // read error on the very first block.
            if self.end_of_buffer_offset == 0
                || self.end_of_buffer_offset - bytes >= self.initial_offset
            {
                reporter.corruption(bytes, reason);
            }
        }
    }

    /// Hands back ownership of the underlying file.
    #[inline]
    pub fn into_file(self) -> F {
        self.file
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::storage::mem::MemFile;
    use crate::wal::Writer;

    #[derive(Clone, Default)]
    struct CountingReporter {
        dropped: Rc<RefCell<u64>>,
        reasons: Rc<RefCell<Vec<String>>>,
    }

    impl Reporter for CountingReporter {
        fn corruption(&mut self, bytes: u64, reason: &str) {
            *self.dropped.borrow_mut() += bytes;
            self.reasons.borrow_mut().push(reason.to_string());
        }
    }

    fn write_records(records: &[Vec<u8>]) -> MemFile {
        let file = MemFile::default();
        let mut writer = Writer::new(file.clone());
        for r in records {
            writer.add_record(r).unwrap();
        }
        file
    }

    fn read_all(file: MemFile, reporter: Option<Box<dyn Reporter>>) -> Vec<Vec<u8>> {
        let mut reader = Reader::new(file, reporter, true, 0);
        let mut out = vec![];
        let mut buf = vec![];
        while reader.read_record(&mut buf) {
            out.push(buf.clone());
        }
        out
    }

    fn big_record(fill: u8, len: usize) -> Vec<u8> {
        vec![fill; len]
    }

    #[test]
    fn test_empty_log() {
        let file = MemFile::default();
        assert!(read_all(file, None).is_empty());
    }

    #[test]
    fn test_round_trip_various_sizes() {
        let records = vec![
            vec![],
            b"x".to_vec(),
            big_record(b'a', BLOCK_SIZE - HEADER_SIZE),
            big_record(b'b', 3 * BLOCK_SIZE),
            b"tail".to_vec(),
        ];
        let file = write_records(&records);
        assert_eq!(read_all(file, None), records);
    }

    #[test]
    fn test_resumed_append_stays_readable() {
        let file = write_records(&[b"one".to_vec(), b"two".to_vec()]);
        let len = file.len().unwrap();
        let mut writer = Writer::with_dest_length(file.clone(), len);
        writer.add_record(b"three").unwrap();
        writer
            .add_record(&big_record(b'z', 2 * BLOCK_SIZE))
            .unwrap();

        let records = read_all(file, None);
        assert_eq!(records.len(), 4);
        assert_eq!(records[0], b"one");
        assert_eq!(records[1], b"two");
        assert_eq!(records[2], b"three");
        assert_eq!(records[3], big_record(b'z', 2 * BLOCK_SIZE));
    }

    #[test]
    fn test_corrupt_payload_drops_only_that_block() {
        let records = vec![b"first".to_vec(), b"second".to_vec()];
        let file = write_records(&records);
        // Flip one payload byte of the first record.
        {
            let mut raw = vec![];
            let mut f = file.clone();
            f.read_all(&mut raw).unwrap();
            raw[HEADER_SIZE] ^= 0xff;
            let fresh = MemFile::default();
            let mut w = fresh.clone();
            w.write(&raw).unwrap();
            let reporter = CountingReporter::default();
            let got = read_all(fresh, Some(Box::new(reporter.clone())));
            // The checksum failure discards the rest of the block, taking
            // "second" with it.
            assert!(got.is_empty());
            assert!(*reporter.dropped.borrow() > 0);
            assert!(reporter
                .reasons
                .borrow()
                .iter()
                .any(|r| r.contains("checksum")));
        }
    }

    #[test]
    fn test_corruption_in_later_block_keeps_earlier_records() {
        // The first record fills block 0 exactly; the second starts block 1.
        let records = vec![
            big_record(b'a', BLOCK_SIZE - HEADER_SIZE),
            b"tail".to_vec(),
        ];
        let file = write_records(&records);
        let mut raw = vec![];
        let mut f = file.clone();
        f.read_all(&mut raw).unwrap();
        // A flipped byte in block 1 only takes down the records in block 1.
        raw[BLOCK_SIZE + HEADER_SIZE] ^= 0xff;
        let fresh = MemFile::default();
        let mut w = fresh.clone();
        w.write(&raw).unwrap();

        let reporter = CountingReporter::default();
        let got = read_all(fresh, Some(Box::new(reporter.clone())));
        assert_eq!(got, vec![big_record(b'a', BLOCK_SIZE - HEADER_SIZE)]);
        assert!(*reporter.dropped.borrow() > 0);
    }

    #[test]
    fn test_truncated_tail_is_eof_not_corruption() {
        let file = write_records(&[b"keep".to_vec(), b"truncated-away".to_vec()]);
        let mut raw = vec![];
        let mut f = file.clone();
        f.read_all(&mut raw).unwrap();
        // Cut the file in the middle of the second record's payload.
        raw.truncate(2 * HEADER_SIZE + 4 + 3);
        let fresh = MemFile::default();
        let mut w = fresh.clone();
        w.write(&raw).unwrap();

        let reporter = CountingReporter::default();
        let got = read_all(fresh, Some(Box::new(reporter.clone())));
        assert_eq!(got, vec![b"keep".to_vec()]);
        assert_eq!(*reporter.dropped.borrow(), 0);
    }

    #[test]
    fn test_initial_offset_skips_earlier_records() {
        let file = write_records(&[b"first".to_vec(), b"second".to_vec()]);
        // Start past the first physical record.
        let mut reader = Reader::new(file, None, true, HEADER_SIZE as u64 + 5);
        let mut buf = vec![];
        assert!(reader.read_record(&mut buf));
        assert_eq!(buf, b"second");
        assert!(!reader.read_record(&mut buf));
    }

    #[test]
    fn test_last_record_offset() {
        let file = write_records(&[b"first".to_vec(), b"second".to_vec()]);
        let mut reader = Reader::new(file, None, true, 0);
        let mut buf = vec![];
        assert!(reader.read_record(&mut buf));
        assert_eq!(reader.last_record_offset(), 0);
        assert!(reader.read_record(&mut buf));
        assert_eq!(reader.last_record_offset(), HEADER_SIZE as u64 + 5);
    }
}
