use crate::storage::File;
use crate::util::coding::encode_fixed_32;
use crate::util::crc32;
use crate::wal::{RecordType, BLOCK_SIZE, HEADER_SIZE, MAX_RECORD_TYPE};
use crate::IResult;

/// Appends records to a log file, fragmenting them across fixed-size
/// blocks so a reader can resynchronize after a crash.
pub struct Writer<F: File> {
    dest: F,
    /// Current offset in the block.
    block_offset: usize,

    /// Crc32 values for all supported record types. These are pre-computed
    /// to reduce the overhead of computing the crc of the record type
    /// stored in the header.
    type_crc: [u32; MAX_RECORD_TYPE + 1],
}

impl<F: File> Writer<F> {
    /// Creates a writer that starts at the beginning of an empty file.
    pub fn new(dest: F) -> Self {
        Self::with_dest_length(dest, 0)
    }

    /// Creates a writer that appends to a file whose first `dest_length`
    /// bytes were written by an earlier `Writer`. New records line up with
    /// the existing block layout, so the file stays readable end to end.
    pub fn with_dest_length(dest: F, dest_length: u64) -> Self {
        let mut type_crc = [0; MAX_RECORD_TYPE + 1];
        for (t, crc) in type_crc.iter_mut().enumerate() {
            *crc = crc32::hash(&[t as u8]);
        }
        Writer {
            dest,
            block_offset: (dest_length % BLOCK_SIZE as u64) as usize,
            type_crc,
        }
    }

    /// Appends a record to the underlying log file. An empty `s` still
    /// emits a single zero-length `KFullType` record.
    pub fn add_record(&mut self, s: &[u8]) -> IResult<()> {
        let mut left = s.len();
        let mut begin = true;
        // Fragment the record if necessary and emit it. Note that if the
        // slice is empty, we still want to iterate once to emit a single
        // zero-length record.
        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                // Switch to a new block.
                if leftover > 0 {
                    // Fill the trailer (literal below relies on HEADER_SIZE being 7).
                    self.dest.write(&[0; 6][..leftover])?;
                }
                self.block_offset = 0;
            }

            // Invariant: we never leave < HEADER_SIZE bytes in a block.
            assert!(
                BLOCK_SIZE - self.block_offset >= HEADER_SIZE,
                "block has {} bytes left, header needs {}",
                BLOCK_SIZE - self.block_offset,
                HEADER_SIZE
            );

            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_length = if left < avail { left } else { avail };
            let end = left == fragment_length;
            let record_type = if begin && end {
                RecordType::KFullType
            } else if begin {
                RecordType::KFirstType
            } else if end {
                RecordType::KLastType
            } else {
                RecordType::KMiddleType
            };

            let start = s.len() - left;
            self.emit_physical_record(record_type, &s[start..start + fragment_length])?;
            left -= fragment_length;
            begin = false;
            if left == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Forces written records onto stable storage.
    pub fn sync(&mut self) -> IResult<()> {
        self.dest.sync()
    }

    fn emit_physical_record(&mut self, t: RecordType, data: &[u8]) -> IResult<()> {
        let length = data.len();
        assert!(
            length <= 0xffff,
            "the data length in a record must fit 2 bytes but got {}",
            length
        );
        assert!(self.block_offset + HEADER_SIZE + length <= BLOCK_SIZE);

        // Format the header.
        let mut buf = [0u8; HEADER_SIZE];
        buf[4] = (length & 0xff) as u8;
        buf[5] = (length >> 8) as u8;
        buf[6] = t as u8;

        // Compute the crc of the record type and the payload.
        let crc = crc32::mask(crc32::extend(self.type_crc[t as usize], data));
        encode_fixed_32(&mut buf, crc);

        // Write the header and the payload.
        self.dest.write(&buf)?;
        self.dest.write(data)?;
        self.dest.flush()?;
        self.block_offset += HEADER_SIZE + length;
        Ok(())
    }
}
