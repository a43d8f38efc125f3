//! The I/O capabilities a Minidump is read through.
//!
//! Two traits live here:
//!
//! - [`FileIo`] is a file handle: open it, seek it, read from it, close it.
//!   [`LocalFile`] and [`MemoryFile`] implement it,
//!   as does [`StreamFile`], which lets a stream inside a dump
//!   pose as a file of its own.
//!
//! - [`RangedResource`] is what a [`Minidump`] actually reads from:
//!   "give me the bytes at this offset". Byte slices implement it directly.
//!   Anything implementing [`FileIo`] can be wrapped in a [`SharedFile`],
//!   which serializes each seek + read pair behind a lock so that
//!   many streams can share one cursor.
//!
//! [`FileIo`]: trait.FileIo.html
//! [`LocalFile`]: struct.LocalFile.html
//! [`MemoryFile`]: struct.MemoryFile.html
//! [`StreamFile`]: ../stream_file/struct.StreamFile.html
//! [`RangedResource`]: trait.RangedResource.html
//! [`Minidump`]: ../read/struct.Minidump.html
//! [`SharedFile`]: struct.SharedFile.html

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::ops::BitOr;
use std::sync::{Mutex, MutexGuard};

use camino::{Utf8Path, Utf8PathBuf};
use log::*;

use crate::result::*;

/// How a handle is opened
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct AccessFlags(u8);

impl AccessFlags {
    pub const READ: AccessFlags = AccessFlags(0x01);
    pub const WRITE: AccessFlags = AccessFlags(0x02);

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Returns true if every flag in `other` is set
    pub fn contains(self, other: AccessFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Everything in this crate is read-only:
    /// fail unless `self` is exactly [`AccessFlags::READ`].
    ///
    /// [`AccessFlags::READ`]: struct.AccessFlags.html#associatedconstant.READ
    pub fn require_read_only(self) -> MdmpResult<()> {
        if self != AccessFlags::READ {
            return Err(MdmpError::UnsupportedAccess(self));
        }
        Ok(())
    }
}

impl BitOr for AccessFlags {
    type Output = AccessFlags;

    fn bitor(self, rhs: AccessFlags) -> AccessFlags {
        AccessFlags(self.0 | rhs.0)
    }
}

/// A file-like handle
///
/// Handles start out closed. Everything but [`exists()`] and [`is_open()`]
/// fails with [`MdmpError::NotOpen`] until [`open()`] succeeds.
///
/// [`exists()`]: #tymethod.exists
/// [`is_open()`]: #tymethod.is_open
/// [`open()`]: #tymethod.open
/// [`MdmpError::NotOpen`]: ../result/enum.MdmpError.html#variant.NotOpen
pub trait FileIo {
    fn open(&mut self, access: AccessFlags) -> MdmpResult<()>;

    fn close(&mut self) -> MdmpResult<()>;

    fn is_open(&self) -> bool;

    /// Returns true if there's something behind the handle to open.
    fn exists(&self) -> MdmpResult<bool>;

    /// Reads up to `buf.len()` bytes from the current offset, advancing it.
    fn read(&mut self, buf: &mut [u8]) -> MdmpResult<usize>;

    /// Returns the number of bytes written.
    fn write(&mut self, buf: &[u8]) -> MdmpResult<usize>;

    /// Returns the new offset.
    fn seek(&mut self, pos: SeekFrom) -> MdmpResult<u64>;

    fn size(&self) -> MdmpResult<u64>;
}

/// A file on the local filesystem, opened by path
#[derive(Debug)]
pub struct LocalFile {
    path: Utf8PathBuf,
    file: Option<File>,
}

impl LocalFile {
    pub fn new<P: AsRef<Utf8Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_owned(),
            file: None,
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn file(&self) -> MdmpResult<&File> {
        self.file.as_ref().ok_or(MdmpError::NotOpen)
    }
}

/// A duplicate handle to the same path, closed.
impl Clone for LocalFile {
    fn clone(&self) -> Self {
        Self::new(&self.path)
    }
}

impl FileIo for LocalFile {
    fn open(&mut self, access: AccessFlags) -> MdmpResult<()> {
        if self.file.is_some() {
            return Err(MdmpError::AlreadyOpen);
        }
        access.require_read_only()?;
        debug!("Opening {}", self.path);
        self.file = Some(File::open(&self.path)?);
        Ok(())
    }

    fn close(&mut self) -> MdmpResult<()> {
        match self.file.take() {
            Some(_) => {
                debug!("Closed {}", self.path);
                Ok(())
            }
            None => Err(MdmpError::NotOpen),
        }
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn exists(&self) -> MdmpResult<bool> {
        Ok(self.path.try_exists()?)
    }

    fn read(&mut self, buf: &mut [u8]) -> MdmpResult<usize> {
        let mut file = self.file()?;
        loop {
            match file.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return Ok(other?),
            }
        }
    }

    fn write(&mut self, _buf: &[u8]) -> MdmpResult<usize> {
        self.file()?;
        // Opening enforces read-only access.
        Err(MdmpError::UnsupportedAccess(AccessFlags::WRITE))
    }

    fn seek(&mut self, pos: SeekFrom) -> MdmpResult<u64> {
        let mut file = self.file()?;
        file.seek(pos)
            .map_err(|e| MdmpError::SeekFailed(format!("{pos:?} in {}: {e}", self.path)))
    }

    fn size(&self) -> MdmpResult<u64> {
        Ok(self.file()?.metadata()?.len())
    }
}

/// A file-like handle over bytes already in memory:
/// a `Vec<u8>`, a `&[u8]`, a memory map...
#[derive(Debug)]
pub struct MemoryFile<T> {
    cursor: Cursor<T>,
    is_open: bool,
}

impl<T: AsRef<[u8]>> MemoryFile<T> {
    pub fn new(data: T) -> Self {
        Self {
            cursor: Cursor::new(data),
            is_open: false,
        }
    }

    pub fn into_inner(self) -> T {
        self.cursor.into_inner()
    }

    fn check_open(&self) -> MdmpResult<()> {
        if !self.is_open {
            return Err(MdmpError::NotOpen);
        }
        Ok(())
    }
}

/// A duplicate handle to a copy of the data, closed.
impl<T: AsRef<[u8]> + Clone> Clone for MemoryFile<T> {
    fn clone(&self) -> Self {
        Self::new(self.cursor.get_ref().clone())
    }
}

impl<T: AsRef<[u8]>> FileIo for MemoryFile<T> {
    fn open(&mut self, access: AccessFlags) -> MdmpResult<()> {
        if self.is_open {
            return Err(MdmpError::AlreadyOpen);
        }
        access.require_read_only()?;
        self.cursor.set_position(0);
        self.is_open = true;
        Ok(())
    }

    fn close(&mut self) -> MdmpResult<()> {
        self.check_open()?;
        self.is_open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }

    fn exists(&self) -> MdmpResult<bool> {
        Ok(true)
    }

    fn read(&mut self, buf: &mut [u8]) -> MdmpResult<usize> {
        self.check_open()?;
        Ok(self.cursor.read(buf)?)
    }

    fn write(&mut self, _buf: &[u8]) -> MdmpResult<usize> {
        self.check_open()?;
        Err(MdmpError::UnsupportedAccess(AccessFlags::WRITE))
    }

    fn seek(&mut self, pos: SeekFrom) -> MdmpResult<u64> {
        self.check_open()?;
        self.cursor
            .seek(pos)
            .map_err(|e| MdmpError::SeekFailed(format!("{pos:?}: {e}")))
    }

    fn size(&self) -> MdmpResult<u64> {
        self.check_open()?;
        Ok(self.cursor.get_ref().as_ref().len() as u64)
    }
}

/// Something we can read byte ranges out of.
///
/// Reads take `&self` so that many [`Stream`]s can share one resource.
/// Implementations that have a cursor (see [`SharedFile`])
/// are responsible for keeping each seek and read together.
///
/// [`Stream`]: ../stream/struct.Stream.html
/// [`SharedFile`]: struct.SharedFile.html
pub trait RangedResource: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns fewer bytes only at the end of the resource.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> MdmpResult<usize>;

    fn size(&self) -> MdmpResult<u64>;

    fn is_open(&self) -> MdmpResult<bool> {
        Ok(true)
    }

    fn open(&self, _access: AccessFlags) -> MdmpResult<()> {
        Ok(())
    }

    fn close(&self) -> MdmpResult<()> {
        Ok(())
    }
}

impl RangedResource for [u8] {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> MdmpResult<usize> {
        let start = match usize::try_from(offset) {
            Ok(start) if start < self.len() => start,
            _ => return Ok(0),
        };
        let count = buf.len().min(self.len() - start);
        buf[..count].copy_from_slice(&self[start..start + count]);
        Ok(count)
    }

    fn size(&self) -> MdmpResult<u64> {
        Ok(self.len() as u64)
    }
}

impl RangedResource for Vec<u8> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> MdmpResult<usize> {
        self.as_slice().read_at(offset, buf)
    }

    fn size(&self) -> MdmpResult<u64> {
        self.as_slice().size()
    }
}

impl<T: RangedResource + ?Sized> RangedResource for &T {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> MdmpResult<usize> {
        (**self).read_at(offset, buf)
    }

    fn size(&self) -> MdmpResult<u64> {
        (**self).size()
    }

    fn is_open(&self) -> MdmpResult<bool> {
        (**self).is_open()
    }

    fn open(&self, access: AccessFlags) -> MdmpResult<()> {
        (**self).open(access)
    }

    fn close(&self) -> MdmpResult<()> {
        (**self).close()
    }
}

/// A [`FileIo`] handle behind a lock, usable as a [`RangedResource`]
///
/// The handle has a single cursor, so every [`read_at()`]
/// takes the lock for its seek and all of its reads.
///
/// [`FileIo`]: trait.FileIo.html
/// [`RangedResource`]: trait.RangedResource.html
/// [`read_at()`]: trait.RangedResource.html#tymethod.read_at
#[derive(Debug)]
pub struct SharedFile<F> {
    inner: Mutex<F>,
}

impl<F: FileIo + Send> SharedFile<F> {
    pub fn new(file: F) -> Self {
        Self {
            inner: Mutex::new(file),
        }
    }

    /// Locks the handle for direct use.
    pub fn lock(&self) -> MdmpResult<MutexGuard<'_, F>> {
        self.inner.lock().map_err(|_| MdmpError::LockPoisoned)
    }

    pub fn into_inner(self) -> MdmpResult<F> {
        self.inner.into_inner().map_err(|_| MdmpError::LockPoisoned)
    }
}

impl<F: FileIo + Send> RangedResource for SharedFile<F> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> MdmpResult<usize> {
        let mut file = self.lock()?;
        file.seek(SeekFrom::Start(offset))?;

        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..])? {
                0 => break,
                n => total += n,
            }
        }
        Ok(total)
    }

    fn size(&self) -> MdmpResult<u64> {
        self.lock()?.size()
    }

    fn is_open(&self) -> MdmpResult<bool> {
        Ok(self.lock()?.is_open())
    }

    fn open(&self, access: AccessFlags) -> MdmpResult<()> {
        self.lock()?.open(access)
    }

    fn close(&self) -> MdmpResult<()> {
        self.lock()?.close()
    }
}
