//! A [`Stream`] dressed up as a file
//!
//! Some streams hold whole files: a module's PE image, an embedded dump...
//! [`StreamFile`] implements [`FileIo`] on top of a stream so that
//! whatever parses those files can be handed a "file" without
//! copying the stream's bytes out first. Wrap it in a [`SharedFile`]
//! and it's a [`RangedResource`], ready for another [`Minidump`].
//!
//! [`Stream`]: ../stream/struct.Stream.html
//! [`StreamFile`]: struct.StreamFile.html
//! [`FileIo`]: ../io/trait.FileIo.html
//! [`SharedFile`]: ../io/struct.SharedFile.html
//! [`RangedResource`]: ../io/trait.RangedResource.html
//! [`Minidump`]: ../read/struct.Minidump.html

use std::io::SeekFrom;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::io::{AccessFlags, FileIo};
use crate::result::*;
use crate::stream::{resolve_seek, Stream};

/// A stream shared between file handles
pub type SharedStream<'a> = Arc<Mutex<Stream<'a>>>;

/// A read-only [`FileIo`] handle over a [`Stream`]
///
/// Each handle keeps its own offset into the stream,
/// so clones can be read from different threads without
/// moving each other's cursor.
///
/// [`FileIo`]: ../io/trait.FileIo.html
/// [`Stream`]: ../stream/struct.Stream.html
#[derive(Debug, Default)]
pub struct StreamFile<'a> {
    stream: Option<SharedStream<'a>>,
    access: AccessFlags,
    is_open: bool,
    position: u64,
}

impl<'a> StreamFile<'a> {
    pub fn new(stream: Stream<'a>) -> Self {
        Self::from_shared(Arc::new(Mutex::new(stream)))
    }

    pub fn from_shared(stream: SharedStream<'a>) -> Self {
        Self {
            stream: Some(stream),
            access: AccessFlags::default(),
            is_open: false,
            position: 0,
        }
    }

    /// The stream behind this handle, if there is one
    pub fn stream(&self) -> Option<&SharedStream<'a>> {
        self.stream.as_ref()
    }

    fn lock_stream(&self) -> MdmpResult<MutexGuard<'_, Stream<'a>>> {
        self.stream
            .as_ref()
            .ok_or(MdmpError::MissingValue("stream"))?
            .lock()
            .map_err(|_| MdmpError::LockPoisoned)
    }

    fn check_open(&self) -> MdmpResult<()> {
        if self.stream.is_none() {
            return Err(MdmpError::MissingValue("stream"));
        }
        if !self.is_open {
            return Err(MdmpError::NotOpen);
        }
        Ok(())
    }
}

/// Another handle over the same stream, closed, with no access flags,
/// and at offset 0.
///
/// The stream is shared, not copied.
impl Clone for StreamFile<'_> {
    fn clone(&self) -> Self {
        Self {
            stream: self.stream.clone(),
            access: AccessFlags::default(),
            is_open: false,
            position: 0,
        }
    }
}

impl FileIo for StreamFile<'_> {
    fn open(&mut self, access: AccessFlags) -> MdmpResult<()> {
        if self.stream.is_none() {
            return Err(MdmpError::MissingValue("stream"));
        }
        if self.is_open {
            return Err(MdmpError::AlreadyOpen);
        }
        access.require_read_only()?;
        self.access = access;
        self.is_open = true;
        self.position = 0;
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
        Ok(self.stream.is_some())
    }

    fn read(&mut self, buf: &mut [u8]) -> MdmpResult<usize> {
        self.check_open()?;
        if !self.access.contains(AccessFlags::READ) {
            return Err(MdmpError::NoReadAccess);
        }
        // One lock for the seek and the read.
        let read_count = self.lock_stream()?.read_at(buf, self.position)?;
        self.position += read_count as u64;
        Ok(read_count)
    }

    /// Streams are read-only: nothing is ever written.
    fn write(&mut self, _buf: &[u8]) -> MdmpResult<usize> {
        self.check_open()?;
        Ok(0)
    }

    fn seek(&mut self, pos: SeekFrom) -> MdmpResult<u64> {
        self.check_open()?;
        let size = self.lock_stream()?.size()?;
        self.position = resolve_seek(pos, self.position, size)?;
        Ok(self.position)
    }

    fn size(&self) -> MdmpResult<u64> {
        self.check_open()?;
        self.lock_stream()?.size()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::io::{RangedResource, SharedFile};
    use crate::stream::StreamDescriptor;

    fn descriptor() -> StreamDescriptor {
        let mut d = StreamDescriptor::new(4);
        d.set_data_range(2, 6).unwrap();
        d
    }

    #[test]
    fn test_state_machine() {
        let data = b"xxstreamyy".to_vec();
        let d = descriptor();
        let mut file = StreamFile::new(Stream::new(&d, &data));

        assert!(file.exists().unwrap());
        assert!(!file.is_open());
        let err = file.read(&mut [0; 2]).unwrap_err();
        assert!(matches!(err, MdmpError::NotOpen));
        assert_eq!(err.domain(), ErrorDomain::Runtime);
        assert!(matches!(file.seek(SeekFrom::Start(0)), Err(MdmpError::NotOpen)));
        assert!(matches!(file.size(), Err(MdmpError::NotOpen)));
        assert!(matches!(file.write(b"a"), Err(MdmpError::NotOpen)));
        assert!(matches!(file.close(), Err(MdmpError::NotOpen)));

        assert!(matches!(
            file.open(AccessFlags::READ | AccessFlags::WRITE),
            Err(MdmpError::UnsupportedAccess(_))
        ));
        file.open(AccessFlags::READ).unwrap();
        let err = file.open(AccessFlags::READ).unwrap_err();
        assert!(matches!(err, MdmpError::AlreadyOpen));
        assert_eq!(err.domain(), ErrorDomain::Runtime);

        assert_eq!(file.size().unwrap(), 6);
        let mut buf = [0; 16];
        assert_eq!(file.read(&mut buf).unwrap(), 6);
        assert_eq!(&buf[..6], b"stream");
        assert_eq!(file.seek(SeekFrom::End(-3)).unwrap(), 3);
        assert_eq!(file.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"eam");
        assert_eq!(file.write(b"nope").unwrap(), 0);

        file.close().unwrap();
        assert!(matches!(file.close(), Err(MdmpError::NotOpen)));
    }

    #[test]
    fn test_clones_keep_their_own_offsets() {
        let data = b"xxstreamyy".to_vec();
        let d = descriptor();
        let mut file = StreamFile::new(Stream::new(&d, &data));
        file.open(AccessFlags::READ).unwrap();

        let mut copy = file.clone();
        assert!(!copy.is_open());
        assert!(matches!(copy.read(&mut [0; 2]), Err(MdmpError::NotOpen)));
        copy.open(AccessFlags::READ).unwrap();
        assert!(Arc::ptr_eq(
            file.stream().unwrap(),
            copy.stream().unwrap()
        ));

        let mut buf = [0; 2];
        file.read(&mut buf).unwrap();
        assert_eq!(&buf, b"st");
        // Same stream, separate cursors.
        copy.read(&mut buf).unwrap();
        assert_eq!(&buf, b"st");
        file.read(&mut buf).unwrap();
        assert_eq!(&buf, b"re");

        assert_eq!(copy.seek(SeekFrom::Current(2)).unwrap(), 4);
        copy.read(&mut buf).unwrap();
        assert_eq!(&buf, b"am");
    }

    #[test]
    fn test_clones_across_threads() {
        let data: Vec<u8> = (0..4096).map(|i| (i % 251) as u8).collect();
        let mut d = StreamDescriptor::new(4);
        d.set_data_range(96, 2048).unwrap();

        let first = StreamFile::new(Stream::new(&d, &data));
        let second = first.clone();
        let first = SharedFile::new(first);
        let second = SharedFile::new(second);
        RangedResource::open(&first, AccessFlags::READ).unwrap();
        RangedResource::open(&second, AccessFlags::READ).unwrap();

        let data = &data;
        std::thread::scope(|s| {
            for (file, offset) in [(&first, 0u64), (&second, 1000)] {
                s.spawn(move || {
                    let expected = data[96 + offset as usize];
                    for _ in 0..5000 {
                        let mut byte = [0; 1];
                        assert_eq!(file.read_at(offset, &mut byte).unwrap(), 1);
                        assert_eq!(byte[0], expected);
                    }
                });
            }
        });
    }

    #[test]
    fn test_unbound() {
        let mut file = StreamFile::default();
        assert!(!file.exists().unwrap());
        assert!(matches!(
            file.open(AccessFlags::READ),
            Err(MdmpError::MissingValue(_))
        ));
    }
}
