//! Tools for reading a Minidump.
//!
//! To start reading a dump, open a [`Minidump`] from a path,
//! a byte slice, or any [`RangedResource`].
//!
//! Nothing here interprets what's *in* the streams (threads, modules,
//! memory ranges...). That's left to whoever reads the [`Stream`]s.
//!
//! [`Minidump`]: struct.Minidump.html
//! [`RangedResource`]: ../io/trait.RangedResource.html
//! [`Stream`]: ../stream/struct.Stream.html

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use camino::Utf8Path;
use log::*;

use crate::io::{AccessFlags, LocalFile, RangedResource, SharedFile};
use crate::result::*;
use crate::spec::{self, DirectoryEntry, FileHeader};
use crate::stream::{Stream, StreamDescriptor};

/// Lets another thread ask an in-progress [`Minidump::open()`] to stop.
///
/// The request is checked between streams directory entries,
/// never in the middle of a read.
///
/// [`Minidump::open()`]: struct.Minidump.html#method.open
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn signal(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_signaled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Where the container's bytes come from, and who owns them
enum Resource<'a> {
    /// We made (and opened) it ourselves, so it's ours to close.
    Owned(Box<dyn RangedResource + 'a>),
    /// The caller's. We close it only if we opened it.
    Borrowed(&'a dyn RangedResource),
}

impl<'a> Resource<'a> {
    fn get(&self) -> &(dyn RangedResource + 'a) {
        match self {
            Resource::Owned(r) => r.as_ref(),
            Resource::Borrowed(r) => *r,
        }
    }
}

/// A Minidump to be read
///
/// ```no_run
/// # use mdmp::*;
/// let mut dump = Minidump::new();
/// dump.open("crash.dmp", AccessFlags::READ)?;
///
/// for mut stream in dump.streams()? {
///     println!("{} ({} bytes)", stream.descriptor(), stream.size()?);
///     let contents = stream.read_to_vec()?;
///     // Hand `contents` to something that understands this stream type.
/// }
///
/// dump.close()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Minidump<'a> {
    resource: Option<Resource<'a>>,
    /// Did we open the resource (and so have to close it)?
    opened_in_library: bool,
    header: Option<FileHeader>,
    /// Directory order, minus unused entries
    streams: Vec<StreamDescriptor>,
    abort: AbortHandle,
}

impl fmt::Debug for Minidump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Minidump")
            .field("is_open", &self.is_open())
            .field("header", &self.header)
            .field("streams", &self.streams)
            .finish()
    }
}

impl Default for Minidump<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Minidump<'a> {
    /// Creates a closed container. Open it with one of the `open` methods.
    pub fn new() -> Self {
        Self {
            resource: None,
            opened_in_library: false,
            header: None,
            streams: Vec::new(),
            abort: AbortHandle::default(),
        }
    }

    /// Reads a Minidump from a byte slice.
    ///
    /// ```no_run
    /// # use std::fs;
    /// # use mdmp::*;
    /// let bytes = fs::read("crash.dmp")?;
    /// let dump = Minidump::from_bytes(&bytes)?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    ///
    /// Memory maps work too:
    /// ```no_run
    /// # use std::fs::File;
    /// # use memmap2::Mmap;
    /// # use mdmp::*;
    /// let dump_file = File::open("crash.dmp")?;
    /// let mapping = unsafe { Mmap::map(&dump_file)? };
    /// let dump = Minidump::from_bytes(&mapping)?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_bytes(bytes: &'a [u8]) -> MdmpResult<Self> {
        let mut dump = Self::new();
        dump.open_with_owned_resource(bytes, AccessFlags::READ)?;
        Ok(dump)
    }

    /// Returns a handle that can abort [`open()`](#method.open) from another thread.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Asks the next (or current) open to stop between directory entries.
    pub fn signal_abort(&self) {
        self.abort.signal();
    }

    /// Opens the Minidump at the given path.
    pub fn open<P: AsRef<Utf8Path>>(&mut self, path: P, access: AccessFlags) -> MdmpResult<()> {
        self.check_closed()?;
        access.require_read_only()?;
        let path = path.as_ref();
        info!("Opening {}", path);

        let file = SharedFile::new(LocalFile::new(path));
        RangedResource::open(&file, access)?;
        self.opened_in_library = true;
        self.open_read(Resource::Owned(Box::new(file)))
    }

    /// Opens a Minidump from a caller-owned resource.
    ///
    /// If the resource isn't open yet, we open it here
    /// and close it again in [`close()`](#method.close).
    pub fn open_with_resource(
        &mut self,
        resource: &'a dyn RangedResource,
        access: AccessFlags,
    ) -> MdmpResult<()> {
        self.check_closed()?;
        access.require_read_only()?;

        if !resource.is_open()? {
            resource.open(access)?;
            self.opened_in_library = true;
        }
        self.open_read(Resource::Borrowed(resource))
    }

    /// Like [`open_with_resource()`](#method.open_with_resource),
    /// but the container takes ownership of the resource.
    pub fn open_with_owned_resource<R: RangedResource + 'a>(
        &mut self,
        resource: R,
        access: AccessFlags,
    ) -> MdmpResult<()> {
        self.check_closed()?;
        access.require_read_only()?;

        if !resource.is_open()? {
            resource.open(access)?;
            self.opened_in_library = true;
        }
        self.open_read(Resource::Owned(Box::new(resource)))
    }

    fn check_closed(&self) -> MdmpResult<()> {
        if self.resource.is_some() {
            return Err(MdmpError::AlreadyOpen);
        }
        Ok(())
    }

    /// Reads the header and directory, leaving `self` closed on any failure.
    fn open_read(&mut self, resource: Resource<'a>) -> MdmpResult<()> {
        let parsed = read_header(resource.get()).and_then(|header| {
            let streams = read_streams_directory(resource.get(), &header, &self.abort)?;
            Ok((header, streams))
        });
        // The abort request was for this open, whatever came of it.
        self.abort.reset();

        match parsed {
            Ok((header, streams)) => {
                info!(
                    "Opened Minidump version {:#06x} with {} streams",
                    header.version,
                    streams.len()
                );
                self.header = Some(header);
                self.streams = streams;
                self.resource = Some(resource);
                Ok(())
            }
            Err(e) => {
                if self.opened_in_library {
                    self.opened_in_library = false;
                    if let Err(close_error) = resource.get().close() {
                        warn!("Couldn't close resource after failed open: {close_error}");
                    }
                }
                Err(e)
            }
        }
    }

    /// Closes the Minidump, dropping its streams directory
    /// and closing the resource if we opened it.
    pub fn close(&mut self) -> MdmpResult<()> {
        let resource = self.resource.take().ok_or(MdmpError::NotOpen)?;
        self.header = None;
        self.streams = Vec::new();

        if self.opened_in_library {
            self.opened_in_library = false;
            resource.get().close()?;
        }
        info!("Closed Minidump");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.resource.is_some()
    }

    fn resource(&self) -> MdmpResult<&(dyn RangedResource + 'a)> {
        self.resource
            .as_ref()
            .map(Resource::get)
            .ok_or(MdmpError::NotOpen)
    }

    pub fn header(&self) -> MdmpResult<&FileHeader> {
        self.header.as_ref().ok_or(MdmpError::NotOpen)
    }

    /// Returns the number of (used) streams in the directory.
    ///
    /// This can be less than the header's `number_of_streams`,
    /// since unused entries are skipped.
    pub fn number_of_streams(&self) -> MdmpResult<usize> {
        self.resource()?;
        Ok(self.streams.len())
    }

    /// Returns the stream descriptors, in directory order.
    pub fn descriptors(&self) -> MdmpResult<&[StreamDescriptor]> {
        self.resource()?;
        Ok(&self.streams)
    }

    /// Returns the stream at the given index.
    pub fn stream(&self, index: usize) -> MdmpResult<Stream<'_>> {
        let resource = self.resource()?;
        let descriptor = self.streams.get(index).ok_or(MdmpError::OutOfBounds {
            index,
            count: self.streams.len(),
        })?;
        Ok(Stream::new(descriptor, resource))
    }

    /// Returns the first stream of the given type, if there is one.
    ///
    /// Any later streams with the same type can only be reached by index.
    pub fn stream_by_type<T: Into<u32>>(&self, stream_type: T) -> MdmpResult<Option<Stream<'_>>> {
        let resource = self.resource()?;
        let stream_type = stream_type.into();
        Ok(self
            .streams
            .iter()
            .find(|d| d.stream_type() == stream_type)
            .map(|d| Stream::new(d, resource)))
    }

    /// Returns an iterator over every stream, in directory order.
    pub fn streams(&self) -> MdmpResult<impl Iterator<Item = Stream<'_>>> {
        let resource: &dyn RangedResource = self.resource()?;
        Ok(self.streams.iter().map(move |d| Stream::new(d, resource)))
    }
}

impl Drop for Minidump<'_> {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(e) = self.close() {
                warn!("Couldn't close Minidump: {e}");
            }
        }
    }
}

/// Reads and validates the file header at offset 0.
fn read_header(resource: &dyn RangedResource) -> MdmpResult<FileHeader> {
    let mut header_bytes = [0; spec::FILE_HEADER_SIZE];
    let read_count = resource.read_at(0, &mut header_bytes)?;
    let header = FileHeader::parse(&header_bytes[..read_count])?;
    trace!("{:?}", header);
    Ok(header)
}

/// Reads the streams directory the header points to,
/// skipping unused (all-zero) entries.
fn read_streams_directory(
    resource: &dyn RangedResource,
    header: &FileHeader,
    abort: &AbortHandle,
) -> MdmpResult<Vec<StreamDescriptor>> {
    // Bounds-check before allocating anything.
    let directory_size = header.directory_size()?;
    let directory_offset = u64::from(header.streams_directory_offset);
    trace!(
        "{} directory entries at offset {:#x}",
        header.number_of_streams,
        directory_offset
    );

    let mut directory_data = Vec::new();
    directory_data.try_reserve_exact(directory_size)?;
    directory_data.resize(directory_size, 0);
    let read_count = resource.read_at(directory_offset, &mut directory_data)?;
    if read_count != directory_size {
        return Err(MdmpError::ReadFailed {
            context: "streams directory",
            expected: directory_size,
            found: read_count,
        });
    }

    let mut directory = directory_data.as_slice();
    let mut streams = Vec::new();
    let mut seen_types = HashSet::new();

    for index in 0..header.number_of_streams {
        if abort.is_signaled() {
            return Err(MdmpError::AbortRequested);
        }
        let entry = match DirectoryEntry::parse_and_consume(&mut directory)? {
            Some(entry) => entry,
            None => {
                debug!("Skipping unused directory entry {}", index);
                continue;
            }
        };
        trace!("{:?}", entry);

        let mut descriptor = StreamDescriptor::new(entry.stream_type);
        descriptor.set_data_range(u64::from(entry.data_offset), u64::from(entry.data_size))?;
        debug!("Stream {}: {}", streams.len(), descriptor);
        if !seen_types.insert(entry.stream_type) {
            warn!(
                "Duplicate {}; only the first is reachable by type",
                spec::StreamType::from_u32(entry.stream_type)
            );
        }
        streams.push(descriptor);
    }
    Ok(streams)
}
