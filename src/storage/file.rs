use std::fs::{
    create_dir_all, read_dir, remove_dir, remove_dir_all, remove_file, rename, File as SysFile,
    OpenOptions,
};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::Error;
use crate::storage::{File, Storage};
use crate::IResult;

/// `Storage` over the real filesystem.
#[derive(Clone, Copy, Default)]
pub struct FileStorage;

impl Storage for FileStorage {
    type F = SysFile;

    fn create<P: AsRef<Path>>(&self, name: P) -> IResult<Self::F> {
        let f = OpenOptions::new()
            .write(true)
            .read(true)
            .create(true)
            .truncate(true)
            .open(name)?;
        Ok(f)
    }

    fn open<P: AsRef<Path>>(&self, name: P) -> IResult<Self::F> {
        let f = OpenOptions::new().write(true).read(true).open(name)?;
        Ok(f)
    }

    fn remove<P: AsRef<Path>>(&self, name: P) -> IResult<()> {
        remove_file(name).map_err(Error::IO)
    }

    fn remove_dir<P: AsRef<Path>>(&self, dir: P, recursively: bool) -> IResult<()> {
        if recursively {
            remove_dir_all(dir).map_err(Error::IO)
        } else {
            remove_dir(dir).map_err(Error::IO)
        }
    }

    fn exists<P: AsRef<Path>>(&self, name: P) -> bool {
        name.as_ref().exists()
    }

    fn list<P: AsRef<Path>>(&self, dir: P) -> IResult<Vec<PathBuf>> {
        if !dir.as_ref().is_dir() {
            return Ok(vec![]);
        }
        let mut v = vec![];
        for entry in read_dir(dir)? {
            v.push(entry?.path());
        }
        Ok(v)
    }

    fn rename<P: AsRef<Path>>(&self, src: P, target: P) -> IResult<()> {
        rename(src, target).map_err(Error::IO)
    }

    fn mkdir_all<P: AsRef<Path>>(&self, dir: P) -> IResult<()> {
        create_dir_all(dir).map_err(Error::IO)
    }
}

impl File for SysFile {
    fn lock_file(&self) -> IResult<()> {
        FileExt::try_lock_exclusive(self).map_err(Error::IO)
    }

    fn unlock_file(&self) -> IResult<()> {
        FileExt::unlock(self).map_err(Error::IO)
    }

    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> IResult<usize> {
        std::os::unix::prelude::FileExt::read_at(self, buf, offset).map_err(Error::IO)
    }

    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> IResult<usize> {
        std::os::windows::prelude::FileExt::seek_read(self, buf, offset).map_err(Error::IO)
    }

    fn read(&mut self, buf: &mut [u8]) -> IResult<usize> {
        Read::read(self, buf).map_err(Error::IO)
    }

    fn read_all(&mut self, buf: &mut Vec<u8>) -> IResult<usize> {
        Read::read_to_end(self, buf).map_err(Error::IO)
    }

    fn write(&mut self, buf: &[u8]) -> IResult<usize> {
        Write::write_all(self, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> IResult<()> {
        Write::flush(self).map_err(Error::IO)
    }

    fn sync(&mut self) -> IResult<()> {
        SysFile::sync_all(self).map_err(Error::IO)
    }

    fn seek(&mut self, pos: SeekFrom) -> IResult<u64> {
        Seek::seek(self, pos).map_err(Error::IO)
    }

    fn len(&self) -> IResult<u64> {
        Ok(SysFile::metadata(self)?.len())
    }

    fn close(&mut self) -> IResult<()> {
        Ok(())
    }
}
