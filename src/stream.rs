//! Streams: typed byte ranges inside a Minidump
//!
//! A [`StreamDescriptor`] is what the streams directory tells us:
//! a type and where the data lives. A [`Stream`] is a cursor over
//! that data, reading lazily from the container's resource.
//!
//! [`StreamDescriptor`]: struct.StreamDescriptor.html
//! [`Stream`]: struct.Stream.html

use std::fmt;
use std::io::{self, SeekFrom};

use log::*;

use crate::arch::usize;
use crate::io::RangedResource;
use crate::result::*;
use crate::spec::StreamType;

/// A contiguous range of bytes in the underlying resource
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DataRange {
    pub offset: u64,
    pub size: u64,
}

impl DataRange {
    /// The (exclusive) end of the range
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.size)
    }

    /// Maps `len` bytes at `local` (relative to the range)
    /// to absolute resource coordinates, clamped to the end of the range.
    ///
    /// Returns `None` once `local` reaches the end.
    pub fn translate(&self, local: u64, len: u64) -> Option<(u64, u64)> {
        if local >= self.size {
            return None;
        }
        let len = len.min(self.size - local);
        Some((self.offset + local, len))
    }
}

/// A streams directory entry, as a type and a range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    stream_type: u32,
    data_range: Option<DataRange>,
}

impl StreamDescriptor {
    /// Creates a descriptor with no data range yet.
    pub fn new(stream_type: u32) -> Self {
        Self {
            stream_type,
            data_range: None,
        }
    }

    /// Binds the descriptor to its data. This can only happen once.
    pub fn set_data_range(&mut self, offset: u64, size: u64) -> MdmpResult<()> {
        if self.data_range.is_some() {
            return Err(MdmpError::ValueAlreadySet("stream data range"));
        }
        let range = DataRange { offset, size };
        if range.end().is_none() {
            return Err(MdmpError::RangeOutOfBounds {
                offset,
                size,
                resource_size: u64::MAX,
            });
        }
        self.data_range = Some(range);
        Ok(())
    }

    /// The raw type code from the directory
    pub fn stream_type(&self) -> u32 {
        self.stream_type
    }

    pub fn data_range(&self) -> Option<DataRange> {
        self.data_range
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", StreamType::from_u32(self.stream_type))?;
        match self.data_range {
            Some(range) => write!(f, " at {:#010x}, {} bytes", range.offset, range.size),
            None => write!(f, " (no data)"),
        }
    }
}

/// A seekable reader over one stream's data
///
/// Offsets are relative to the start of the stream, and the cursor
/// never leaves `[0, size]`. Reads near the end come back short
/// instead of running into whatever follows the stream in the file.
///
/// Streams borrow their descriptor and resource from the [`Minidump`]
/// they came from, and can be created and dropped as often as you like.
///
/// [`Minidump`]: ../read/struct.Minidump.html
pub struct Stream<'a> {
    descriptor: &'a StreamDescriptor,
    resource: &'a dyn RangedResource,
    position: u64,
    validated: bool,
}

impl<'a> Stream<'a> {
    pub fn new(descriptor: &'a StreamDescriptor, resource: &'a dyn RangedResource) -> Self {
        Self {
            descriptor,
            resource,
            position: 0,
            validated: false,
        }
    }

    pub fn descriptor(&self) -> &'a StreamDescriptor {
        self.descriptor
    }

    /// The raw type code of the stream
    pub fn stream_type(&self) -> u32 {
        self.descriptor.stream_type()
    }

    fn range(&self) -> MdmpResult<DataRange> {
        self.descriptor
            .data_range()
            .ok_or(MdmpError::MissingValue("stream descriptor data range"))
    }

    /// Makes sure the range fits in the resource.
    /// Done on the first read instead of while parsing the directory.
    fn validate(&mut self, range: DataRange) -> MdmpResult<()> {
        if self.validated {
            return Ok(());
        }
        let resource_size = self.resource.size()?;
        match range.end() {
            Some(end) if end <= resource_size => {}
            _ => {
                return Err(MdmpError::RangeOutOfBounds {
                    offset: range.offset,
                    size: range.size,
                    resource_size,
                })
            }
        }
        debug!("Validated {}", self.descriptor);
        self.validated = true;
        Ok(())
    }

    /// Reads up to `buf.len()` bytes from the current offset, advancing it.
    ///
    /// Reads come back short only at the end of the stream.
    pub fn read(&mut self, buf: &mut [u8]) -> MdmpResult<usize> {
        let range = self.range()?;
        self.validate(range)?;

        let (absolute, len) = match range.translate(self.position, buf.len() as u64) {
            Some(t) => t,
            None => return Ok(0),
        };
        let len = usize(len)?;
        let read_count = self.resource.read_at(absolute, &mut buf[..len])?;
        if read_count != len {
            return Err(MdmpError::ReadFailed {
                context: "stream data",
                expected: len,
                found: read_count,
            });
        }
        trace!(
            "Read {} bytes at {:#x} ({:#x} in file)",
            read_count,
            self.position,
            absolute
        );
        self.position += read_count as u64;
        Ok(read_count)
    }

    /// Seeks to `offset`, then reads.
    ///
    /// This is two operations, not one atomic one.
    pub fn read_at(&mut self, buf: &mut [u8], offset: u64) -> MdmpResult<usize> {
        self.seek(SeekFrom::Start(offset))?;
        self.read(buf)
    }

    /// Reads the whole stream, from the start, into a new buffer.
    ///
    /// The range is checked against the resource before anything is allocated,
    /// so a bogus size in the directory can't ask for gigabytes.
    pub fn read_to_vec(&mut self) -> MdmpResult<Vec<u8>> {
        let range = self.range()?;
        self.validate(range)?;
        let size = usize(range.size)?;

        let mut contents = Vec::new();
        contents.try_reserve_exact(size)?;
        contents.resize(size, 0);
        let read_count = self.read_at(&mut contents, 0)?;
        contents.truncate(read_count);
        Ok(contents)
    }

    /// Moves the cursor, relative to the stream's own bounds.
    ///
    /// Positions past the end are clamped to the end;
    /// positions before the start fail.
    /// Returns the new offset.
    pub fn seek(&mut self, pos: SeekFrom) -> MdmpResult<u64> {
        self.position = resolve_seek(pos, self.position, self.size()?)?;
        Ok(self.position)
    }

    /// The current offset, relative to the start of the stream
    pub fn offset(&self) -> u64 {
        self.position
    }

    pub fn size(&self) -> MdmpResult<u64> {
        Ok(self.range()?.size)
    }

    /// Where the stream starts in the underlying resource
    pub fn start_offset(&self) -> MdmpResult<u64> {
        Ok(self.range()?.offset)
    }
}

/// Resolves a seek against a cursor at `current` in a window of `size` bytes,
/// clamping to the end of the window.
pub(crate) fn resolve_seek(pos: SeekFrom, current: u64, size: u64) -> MdmpResult<u64> {
    let target: i128 = match pos {
        SeekFrom::Start(offset) => i128::from(offset),
        SeekFrom::Current(delta) => i128::from(current) + i128::from(delta),
        SeekFrom::End(delta) => i128::from(size) + i128::from(delta),
    };
    if target < 0 {
        return Err(MdmpError::SeekFailed(format!(
            "{pos:?} lands before the start of the stream"
        )));
    }
    // Clamping in i128 first keeps the cast lossless.
    Ok(target.min(i128::from(size)) as u64)
}

impl fmt::Debug for Stream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("descriptor", self.descriptor)
            .field("position", &self.position)
            .finish()
    }
}

impl io::Read for Stream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(Stream::read(self, buf)?)
    }
}

impl io::Seek for Stream<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(Stream::seek(self, pos)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Read;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn descriptor(offset: u64, size: u64) -> StreamDescriptor {
        let mut d = StreamDescriptor::new(4);
        d.set_data_range(offset, size).unwrap();
        d
    }

    #[test]
    fn test_set_data_range_once() {
        let mut d = StreamDescriptor::new(7);
        assert_eq!(d.data_range(), None);
        d.set_data_range(10, 20).unwrap();
        assert!(matches!(
            d.set_data_range(30, 40),
            Err(MdmpError::ValueAlreadySet(_))
        ));
        assert_eq!(d.data_range(), Some(DataRange { offset: 10, size: 20 }));
        assert!(StreamDescriptor::new(7).set_data_range(u64::MAX, 2).is_err());
    }

    #[test]
    fn test_read_at_offsets() {
        let data = pattern(300);
        let d = descriptor(100, 50);
        let mut stream = Stream::new(&d, &data);
        let mut buf = [0; 64];

        for k in [0u64, 1, 25, 49, 50] {
            let n = stream.read_at(&mut buf, k).unwrap();
            let expected = (50 - k) as usize;
            assert_eq!(n, expected);
            let start = 100 + k as usize;
            assert_eq!(&buf[..n], &data[start..start + n]);
        }
        // Past the end: nothing, not an error.
        assert_eq!(stream.read_at(&mut buf, 51).unwrap(), 0);
        assert_eq!(stream.read_at(&mut buf, 10_000).unwrap(), 0);
    }

    #[test]
    fn test_reads_advance() {
        let data = pattern(300);
        let d = descriptor(100, 10);
        let mut stream = Stream::new(&d, &data);
        let mut buf = [0; 4];
        assert_eq!(stream.read(&mut buf).unwrap(), 4);
        assert_eq!(stream.offset(), 4);
        assert_eq!(stream.read(&mut buf).unwrap(), 4);
        assert_eq!(stream.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &data[108..110]);
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert_eq!(stream.offset(), 10);
    }

    #[test]
    fn test_seek_stays_in_bounds() {
        let data = pattern(300);
        let d = descriptor(100, 50);
        let mut stream = Stream::new(&d, &data);

        assert_eq!(stream.seek(SeekFrom::End(-10)).unwrap(), 40);
        assert_eq!(stream.seek(SeekFrom::Current(5)).unwrap(), 45);
        assert_eq!(stream.seek(SeekFrom::Current(100)).unwrap(), 50);
        assert_eq!(stream.seek(SeekFrom::Start(u64::MAX)).unwrap(), 50);
        assert!(matches!(
            stream.seek(SeekFrom::End(-51)),
            Err(MdmpError::SeekFailed(_))
        ));
        // A failed seek leaves the cursor alone.
        assert_eq!(stream.offset(), 50);

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());
    }

    #[test]
    fn test_queries() {
        let data = pattern(300);
        let d = descriptor(100, 50);
        let stream = Stream::new(&d, &data);
        assert_eq!(stream.stream_type(), 4);
        assert_eq!(stream.size().unwrap(), 50);
        assert_eq!(stream.start_offset().unwrap(), 100);
        assert_eq!(stream.offset(), 0);

        let unbound = StreamDescriptor::new(4);
        let mut stream = Stream::new(&unbound, &data);
        assert!(matches!(
            stream.start_offset(),
            Err(MdmpError::MissingValue(_))
        ));
        assert!(matches!(
            stream.read(&mut [0; 4]),
            Err(MdmpError::MissingValue(_))
        ));
    }

    #[test]
    fn test_range_validated_on_first_read() {
        let data = pattern(120);
        // Runs 30 bytes past the end of the data.
        let d = descriptor(100, 50);
        let mut stream = Stream::new(&d, &data);
        // Queries don't touch the resource.
        assert_eq!(stream.size().unwrap(), 50);
        match stream.read(&mut [0; 4]) {
            Err(MdmpError::RangeOutOfBounds { resource_size, .. }) => {
                assert_eq!(resource_size, 120)
            }
            other => panic!("Expected an out-of-bounds range, got {:?}", other),
        }
    }

    #[test]
    fn test_read_to_vec_checks_range_first() {
        let data = pattern(128);
        let d = descriptor(100, u64::from(u32::MAX));
        let mut stream = Stream::new(&d, &data);
        match stream.read_to_vec() {
            Err(MdmpError::RangeOutOfBounds { size, resource_size, .. }) => {
                assert_eq!(size, u64::from(u32::MAX));
                assert_eq!(resource_size, 128);
            }
            other => panic!("Expected an out-of-bounds range, got {:?}", other),
        }
    }

    #[test]
    fn test_read_to_vec() {
        let data = pattern(300);
        let d = descriptor(150, 20);
        let mut stream = Stream::new(&d, &data);
        stream.seek(SeekFrom::Start(7)).unwrap();
        assert_eq!(stream.read_to_vec().unwrap(), &data[150..170]);
    }
}
