use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::storage::{File, Storage};
use crate::IResult;

fn not_found<P: AsRef<Path>>(name: P) -> Error {
    Error::IO(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("no such file: {:?}", name.as_ref()),
    ))
}

/// An in-memory `Storage`, used by tests and useful for ephemeral engines.
/// Cloning shares the underlying tree of files.
#[derive(Clone, Default)]
pub struct MemStorage {
    files: Arc<Mutex<HashMap<PathBuf, MemFile>>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemStorage {
    type F = MemFile;

    fn create<P: AsRef<Path>>(&self, name: P) -> IResult<Self::F> {
        let f = MemFile::default();
        self.files
            .lock()
            .unwrap()
            .insert(name.as_ref().to_path_buf(), f.clone());
        Ok(f)
    }

    fn open<P: AsRef<Path>>(&self, name: P) -> IResult<Self::F> {
        self.files
            .lock()
            .unwrap()
            .get(name.as_ref())
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    fn remove<P: AsRef<Path>>(&self, name: P) -> IResult<()> {
        self.files
            .lock()
            .unwrap()
            .remove(name.as_ref())
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }

    fn remove_dir<P: AsRef<Path>>(&self, dir: P, recursively: bool) -> IResult<()> {
        if recursively {
            self.files
                .lock()
                .unwrap()
                .retain(|p, _| !p.starts_with(dir.as_ref()));
        }
        Ok(())
    }

    fn exists<P: AsRef<Path>>(&self, name: P) -> bool {
        self.files.lock().unwrap().contains_key(name.as_ref())
    }

    fn list<P: AsRef<Path>>(&self, dir: P) -> IResult<Vec<PathBuf>> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .keys()
            .filter(|p| p.starts_with(dir.as_ref()))
            .cloned()
            .collect())
    }

    fn rename<P: AsRef<Path>>(&self, src: P, target: P) -> IResult<()> {
        let mut files = self.files.lock().unwrap();
        let f = files.remove(src.as_ref()).ok_or_else(|| not_found(src))?;
        files.insert(target.as_ref().to_path_buf(), f);
        Ok(())
    }

    fn mkdir_all<P: AsRef<Path>>(&self, _dir: P) -> IResult<()> {
        Ok(())
    }
}

/// A `File` backed by a shared byte vector. Clones share contents but keep
/// independent read cursors; writes always append.
#[derive(Clone, Default)]
pub struct MemFile {
    contents: Arc<Mutex<Vec<u8>>>,
    pos: usize,
}

impl File for MemFile {
    fn lock_file(&self) -> IResult<()> {
        Ok(())
    }

    fn unlock_file(&self) -> IResult<()> {
        Ok(())
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> IResult<usize> {
        let contents = self.contents.lock().unwrap();
        let offset = offset as usize;
        if offset >= contents.len() {
            return Ok(0);
        }
        let n = std::cmp::min(buf.len(), contents.len() - offset);
        buf[..n].copy_from_slice(&contents[offset..offset + n]);
        Ok(n)
    }

    fn read(&mut self, buf: &mut [u8]) -> IResult<usize> {
        let n = self.read_at(buf, self.pos as u64)?;
        self.pos += n;
        Ok(n)
    }

    fn read_all(&mut self, buf: &mut Vec<u8>) -> IResult<usize> {
        let contents = self.contents.lock().unwrap();
        let n = contents.len().saturating_sub(self.pos);
        buf.extend_from_slice(&contents[self.pos..]);
        self.pos = contents.len();
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> IResult<usize> {
        self.contents.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> IResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> IResult<()> {
        Ok(())
    }

    fn seek(&mut self, pos: SeekFrom) -> IResult<u64> {
        let len = self.contents.lock().unwrap().len() as i64;
        let new_pos = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => len + offset,
            SeekFrom::Current(offset) => self.pos as i64 + offset,
        };
        if new_pos < 0 {
            return Err(Error::IO(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek to a negative position",
            )));
        }
        self.pos = new_pos as usize;
        Ok(self.pos as u64)
    }

    fn len(&self) -> IResult<u64> {
        Ok(self.contents.lock().unwrap().len() as u64)
    }

    fn close(&mut self) -> IResult<()> {
        Ok(())
    }
}
