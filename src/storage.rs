use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::IResult;

pub mod file;
pub mod mem;

/// The filesystem-like surface the engine runs on. Implementations must be
/// usable from multiple threads.
pub trait Storage: Sync + Send {
    type F: File + 'static;

    /// Creates a file, truncating it if it already exists.
    fn create<P: AsRef<Path>>(&self, name: P) -> IResult<Self::F>;

    /// Opens an existing file for reading and writing.
    fn open<P: AsRef<Path>>(&self, name: P) -> IResult<Self::F>;

    /// Deletes the named file.
    fn remove<P: AsRef<Path>>(&self, name: P) -> IResult<()>;

    /// Removes a directory. If `recursively`, removes its contents too.
    fn remove_dir<P: AsRef<Path>>(&self, dir: P, recursively: bool) -> IResult<()>;

    /// Returns true iff the named file or directory exists.
    fn exists<P: AsRef<Path>>(&self, name: P) -> bool;

    /// Paths of all files in `dir`.
    fn list<P: AsRef<Path>>(&self, dir: P) -> IResult<Vec<PathBuf>>;

    /// Renames a file or directory, replacing `target` if it exists.
    fn rename<P: AsRef<Path>>(&self, src: P, target: P) -> IResult<()>;

    /// Creates a directory and all missing parents.
    fn mkdir_all<P: AsRef<Path>>(&self, dir: P) -> IResult<()>;
}

/// A single open file: sequential read/append plus positioned reads. The
/// WAL writer appends through this; block readers use `read_at`.
pub trait File: Sync + Send {
    /// Locks the file for exclusive usage.
    fn lock_file(&self) -> IResult<()>;

    fn unlock_file(&self) -> IResult<()>;

    /// Reads into `buf` starting at `offset`, returning how many bytes
    /// were read. May yield fewer bytes than `buf` holds on interruption
    /// or EOF.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> IResult<usize>;

    /// Reads exactly `buf.len()` bytes starting at `offset`; errors if the
    /// file ends first.
    fn read_exact_at(&self, mut buf: &mut [u8], mut offset: u64) -> IResult<()> {
        while !buf.is_empty() {
            match self.read_at(buf, offset) {
                Ok(0) => break,
                Ok(n) => {
                    let tmp = buf;
                    buf = &mut tmp[n..];
                    offset += n as u64;
                }
                Err(Error::IO(e)) => {
                    if e.kind() != std::io::ErrorKind::Interrupted {
                        return Err(Error::IO(e));
                    }
                }
                Err(e) => return Err(e),
            }
        }
        if !buf.is_empty() {
            return Err(Error::IO(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "failed to fill whole buffer",
            )));
        }
        Ok(())
    }

    /// Reads from the current position, returning how many bytes were read.
    fn read(&mut self, buf: &mut [u8]) -> IResult<usize>;

    /// Reads everything from the current position to EOF into `buf`.
    fn read_all(&mut self, buf: &mut Vec<u8>) -> IResult<usize>;

    /// Appends all of `buf`, returning how many bytes were written.
    fn write(&mut self, buf: &[u8]) -> IResult<usize>;

    /// Pushes buffered bytes to the OS.
    fn flush(&mut self) -> IResult<()>;

    /// Forces written bytes onto stable storage.
    fn sync(&mut self) -> IResult<()>;

    fn seek(&mut self, pos: SeekFrom) -> IResult<u64>;

    fn len(&self) -> IResult<u64>;

    /// Closes the underlying descriptor.
    fn close(&mut self) -> IResult<()>;
}
