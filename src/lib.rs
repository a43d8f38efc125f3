//! mdmp reads the container structure of Windows Minidump files:
//!
//! ```no_run
//! # use mdmp::*;
//! let mut dump = Minidump::new();
//! dump.open("crash.dmp", AccessFlags::READ)?;
//!
//! let header = dump.header()?;
//! println!("Version {:#06x}, flags {:?}", header.version, header.flags.names());
//!
//! // Streams can be looked up by index...
//! for i in 0..dump.number_of_streams()? {
//!     println!("{}", dump.stream(i)?.descriptor());
//! }
//! // ...or by type.
//! if let Some(mut modules) = dump.stream_by_type(StreamType::ModuleList)? {
//!     let module_list = modules.read_to_vec()?;
//!     // Decoding MINIDUMP_MODULE_LIST is up to you!
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! A Minidump is a small header and a directory of typed streams,
//! each one a contiguous byte range somewhere in the file.
//! mdmp decodes the header and directory, then hands out [`Stream`]s:
//! seekable readers over those ranges that only touch the file when read.
//!
//! Streams can also pose as files. Some hold whole files of their own
//! (a module's image, another dump...), and a [`StreamFile`] lets
//! those be parsed without copying them out of the dump first:
//! ```no_run
//! # use mdmp::*;
//! # let outer = Minidump::from_bytes(&[])?;
//! let embedded = SharedFile::new(StreamFile::new(outer.stream(3)?));
//! let mut inner = Minidump::new();
//! inner.open_with_resource(&embedded, AccessFlags::READ)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! What's *in* each stream (thread lists, module lists, memory ranges,
//! exception records...) is deliberately out of scope.
//! So are writing dumps and validating their checksums.
//!
//! [`Stream`]: stream/struct.Stream.html
//! [`StreamFile`]: stream_file/struct.StreamFile.html

pub mod io;
pub mod read;
pub mod result;
pub mod spec;
pub mod stream;
pub mod stream_file;

pub use io::{AccessFlags, FileIo, LocalFile, MemoryFile, RangedResource, SharedFile};
pub use read::{AbortHandle, Minidump};
pub use result::{ErrorDomain, MdmpError, MdmpResult};
pub use spec::{DumpFlags, FileHeader, StreamType};
pub use stream::{DataRange, Stream, StreamDescriptor};
pub use stream_file::StreamFile;

mod arch;

#[cfg(test)]
mod testing;
