//! Code specific to the Minidump file format.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`read`] module.
//!
//! A Minidump is a small fixed header, followed (somewhere) by a directory
//! of fixed-size entries. Each entry names a stream type and the
//! offset and size of its data. Everything is little-endian.
//! Microsoft documents the layout under [`MINIDUMP_HEADER`] and
//! [`MINIDUMP_DIRECTORY`].
//!
//! [`read`]: ../read/index.html
//! [`MINIDUMP_HEADER`]: https://learn.microsoft.com/en-us/windows/win32/api/minidumpapiset/ns-minidumpapiset-minidump_header
//! [`MINIDUMP_DIRECTORY`]: https://learn.microsoft.com/en-us/windows/win32/api/minidumpapiset/ns-minidumpapiset-minidump_directory

use std::convert::TryInto;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::result::*;

/// File header magic number
pub const SIGNATURE: [u8; 4] = *b"MDMP";

/// Size of the file header, in bytes
pub const FILE_HEADER_SIZE: usize = 28;

/// Size of one streams directory entry, in bytes
pub const DIRECTORY_ENTRY_SIZE: usize = 12;

/// The largest streams directory we'll allocate a buffer for.
///
/// Hostile or corrupt headers can claim billions of streams.
pub const MAXIMUM_DIRECTORY_SIZE: usize = 128 * 1024 * 1024;

/// Producers pad unused directory slots with zeroes.
const EMPTY_DIRECTORY_ENTRY: [u8; DIRECTORY_ENTRY_SIZE] = [0; DIRECTORY_ENTRY_SIZE];

/// Reads a little-endian u32 from the front of the provided slice, shrinking it.
fn read_u32(input: &mut &[u8]) -> u32 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u32>());
    *input = rest;
    u32::from_le_bytes(int_bytes.try_into().expect("less than four bytes for u32"))
}

/// Reads a little-endian u16 from the front of the provided slice, shrinking it.
fn read_u16(input: &mut &[u8]) -> u16 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u16>());
    *input = rest;
    u16::from_le_bytes(int_bytes.try_into().expect("less than two bytes for u16"))
}

/// Data from the file header
///
/// Only built once the signature checks out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u16,
    /// Producer-specific, ignored while parsing
    pub implementation_version: u16,
    pub number_of_streams: u32,
    /// The offset of the streams directory from the start of the file.
    /// (The format calls this an RVA, but it's just a file offset.)
    pub streams_directory_offset: u32,
    /// Exposed, but never validated
    pub checksum: u32,
    /// Seconds since the Unix epoch
    pub timestamp: u32,
    pub flags: DumpFlags,
}

impl FileHeader {
    pub fn parse(mut header: &[u8]) -> MdmpResult<Self> {
        // MINIDUMP_HEADER:
        //
        // signature                   4 bytes  ("MDMP")
        // version                     2 bytes
        // implementation version      2 bytes
        // number of streams           4 bytes
        // streams directory RVA       4 bytes
        // checksum                    4 bytes
        // time date stamp             4 bytes
        // flags                       4 bytes
        if header.len() < FILE_HEADER_SIZE {
            return Err(MdmpError::ReadFailed {
                context: "file header",
                expected: FILE_HEADER_SIZE,
                found: header.len(),
            });
        }
        let signature: [u8; 4] = header[..4].try_into().expect("four bytes for signature");
        if signature != SIGNATURE {
            return Err(MdmpError::SignatureMismatch(signature));
        }
        header = &header[4..];
        let version = read_u16(&mut header);
        let implementation_version = read_u16(&mut header);
        let number_of_streams = read_u32(&mut header);
        let streams_directory_offset = read_u32(&mut header);
        let checksum = read_u32(&mut header);
        let timestamp = read_u32(&mut header);
        let flags = DumpFlags(read_u32(&mut header));

        Ok(Self {
            version,
            implementation_version,
            number_of_streams,
            streams_directory_offset,
            checksum,
            timestamp,
            flags,
        })
    }

    /// When the dump was written, if the producer recorded it.
    pub fn last_written(&self) -> Option<DateTime<Utc>> {
        if self.timestamp == 0 {
            return None;
        }
        DateTime::from_timestamp(i64::from(self.timestamp), 0)
    }

    /// Size of the streams directory the header describes, in bytes.
    ///
    /// Fails for zero streams, or for more than fit in
    /// [`MAXIMUM_DIRECTORY_SIZE`](constant.MAXIMUM_DIRECTORY_SIZE.html).
    pub fn directory_size(&self) -> MdmpResult<usize> {
        if self.number_of_streams == 0 {
            return Err(MdmpError::EmptyDirectory);
        }
        let count = crate::arch::usize(self.number_of_streams)?;
        count
            .checked_mul(DIRECTORY_ENTRY_SIZE)
            .filter(|size| *size <= MAXIMUM_DIRECTORY_SIZE)
            .ok_or(MdmpError::DirectoryTooLarge(self.number_of_streams))
    }
}

/// Data from a streams directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub stream_type: u32,
    pub data_size: u32,
    pub data_offset: u32,
}

impl DirectoryEntry {
    /// Parses the entry at the front of `entry`, advancing past it.
    ///
    /// Returns `None` for an unused (all-zero) slot.
    pub fn parse_and_consume(entry: &mut &[u8]) -> MdmpResult<Option<Self>> {
        // MINIDUMP_DIRECTORY:
        //
        // stream type                 4 bytes
        // data size                   4 bytes
        // data RVA                    4 bytes
        if entry.len() < DIRECTORY_ENTRY_SIZE {
            return Err(MdmpError::ReadFailed {
                context: "streams directory entry",
                expected: DIRECTORY_ENTRY_SIZE,
                found: entry.len(),
            });
        }
        let is_empty = entry[..DIRECTORY_ENTRY_SIZE] == EMPTY_DIRECTORY_ENTRY;
        let stream_type = read_u32(entry);
        let data_size = read_u32(entry);
        let data_offset = read_u32(entry);

        if is_empty {
            return Ok(None);
        }
        Ok(Some(Self {
            stream_type,
            data_size,
            data_offset,
        }))
    }
}

/// Well-known stream types
///
/// Zero and the reserved values are legal in a directory;
/// what they mean is up to whoever wrote the dump.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StreamType {
    Unused,
    Reserved0,
    Reserved1,
    ThreadList,
    ModuleList,
    MemoryList,
    Exception,
    SystemInfo,
    ThreadExList,
    Memory64List,
    CommentA,
    CommentW,
    HandleData,
    FunctionTable,
    UnloadedModuleList,
    MiscInfo,
    MemoryInfoList,
    ThreadInfoList,
    HandleOperationList,
    Token,
    JavaScriptData,
    SystemMemoryInfo,
    ProcessVmCounters,
    IptTrace,
    ThreadNames,
    /// Anything else, including the 0x8000+ range
    /// that Breakpad and friends use for their own streams.
    Unknown(u32),
}

impl StreamType {
    pub fn from_u32(u: u32) -> Self {
        match u {
            0 => StreamType::Unused,
            1 => StreamType::Reserved0,
            2 => StreamType::Reserved1,
            3 => StreamType::ThreadList,
            4 => StreamType::ModuleList,
            5 => StreamType::MemoryList,
            6 => StreamType::Exception,
            7 => StreamType::SystemInfo,
            8 => StreamType::ThreadExList,
            9 => StreamType::Memory64List,
            10 => StreamType::CommentA,
            11 => StreamType::CommentW,
            12 => StreamType::HandleData,
            13 => StreamType::FunctionTable,
            14 => StreamType::UnloadedModuleList,
            15 => StreamType::MiscInfo,
            16 => StreamType::MemoryInfoList,
            17 => StreamType::ThreadInfoList,
            18 => StreamType::HandleOperationList,
            19 => StreamType::Token,
            20 => StreamType::JavaScriptData,
            21 => StreamType::SystemMemoryInfo,
            22 => StreamType::ProcessVmCounters,
            23 => StreamType::IptTrace,
            24 => StreamType::ThreadNames,
            v => StreamType::Unknown(v),
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            StreamType::Unused => 0,
            StreamType::Reserved0 => 1,
            StreamType::Reserved1 => 2,
            StreamType::ThreadList => 3,
            StreamType::ModuleList => 4,
            StreamType::MemoryList => 5,
            StreamType::Exception => 6,
            StreamType::SystemInfo => 7,
            StreamType::ThreadExList => 8,
            StreamType::Memory64List => 9,
            StreamType::CommentA => 10,
            StreamType::CommentW => 11,
            StreamType::HandleData => 12,
            StreamType::FunctionTable => 13,
            StreamType::UnloadedModuleList => 14,
            StreamType::MiscInfo => 15,
            StreamType::MemoryInfoList => 16,
            StreamType::ThreadInfoList => 17,
            StreamType::HandleOperationList => 18,
            StreamType::Token => 19,
            StreamType::JavaScriptData => 20,
            StreamType::SystemMemoryInfo => 21,
            StreamType::ProcessVmCounters => 22,
            StreamType::IptTrace => 23,
            StreamType::ThreadNames => 24,
            StreamType::Unknown(v) => v,
        }
    }

    /// The name Windows headers give this stream type
    pub fn name(self) -> &'static str {
        match self {
            StreamType::Unused => "UnusedStream",
            StreamType::Reserved0 => "ReservedStream0",
            StreamType::Reserved1 => "ReservedStream1",
            StreamType::ThreadList => "ThreadListStream",
            StreamType::ModuleList => "ModuleListStream",
            StreamType::MemoryList => "MemoryListStream",
            StreamType::Exception => "ExceptionStream",
            StreamType::SystemInfo => "SystemInfoStream",
            StreamType::ThreadExList => "ThreadExListStream",
            StreamType::Memory64List => "Memory64ListStream",
            StreamType::CommentA => "CommentStreamA",
            StreamType::CommentW => "CommentStreamW",
            StreamType::HandleData => "HandleDataStream",
            StreamType::FunctionTable => "FunctionTableStream",
            StreamType::UnloadedModuleList => "UnloadedModuleListStream",
            StreamType::MiscInfo => "MiscInfoStream",
            StreamType::MemoryInfoList => "MemoryInfoListStream",
            StreamType::ThreadInfoList => "ThreadInfoListStream",
            StreamType::HandleOperationList => "HandleOperationListStream",
            StreamType::Token => "TokenStream",
            StreamType::JavaScriptData => "JavaScriptDataStream",
            StreamType::SystemMemoryInfo => "SystemMemoryInfoStream",
            StreamType::ProcessVmCounters => "ProcessVmCountersStream",
            StreamType::IptTrace => "IptTraceStream",
            StreamType::ThreadNames => "ThreadNamesStream",
            StreamType::Unknown(_) => "UNKNOWN",
        }
    }
}

impl From<u32> for StreamType {
    fn from(u: u32) -> Self {
        StreamType::from_u32(u)
    }
}

impl From<StreamType> for u32 {
    fn from(t: StreamType) -> Self {
        t.to_u32()
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.to_u32(), self.name())
    }
}

/// The `MINIDUMP_TYPE` bits a dump was written with.
///
/// Purely informative: they describe what the producer tried to include,
/// and nothing here changes how the container is parsed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct DumpFlags(pub u32);

const DUMP_FLAG_NAMES: [(u32, &str); 21] = [
    (0x0000_0001, "MiniDumpWithDataSegs"),
    (0x0000_0002, "MiniDumpWithFullMemory"),
    (0x0000_0004, "MiniDumpWithHandleData"),
    (0x0000_0008, "MiniDumpFilterMemory"),
    (0x0000_0010, "MiniDumpScanMemory"),
    (0x0000_0020, "MiniDumpWithUnloadedModules"),
    (0x0000_0040, "MiniDumpWithIndirectlyReferencedMemory"),
    (0x0000_0080, "MiniDumpFilterModulePaths"),
    (0x0000_0100, "MiniDumpWithProcessThreadData"),
    (0x0000_0200, "MiniDumpWithPrivateReadWriteMemory"),
    (0x0000_0400, "MiniDumpWithoutOptionalData"),
    (0x0000_0800, "MiniDumpWithFullMemoryInfo"),
    (0x0000_1000, "MiniDumpWithThreadInfo"),
    (0x0000_2000, "MiniDumpWithCodeSegs"),
    (0x0000_4000, "MiniDumpWithoutAuxiliaryState"),
    (0x0000_8000, "MiniDumpWithFullAuxiliaryState"),
    (0x0001_0000, "MiniDumpWithPrivateWriteCopyMemory"),
    (0x0002_0000, "MiniDumpIgnoreInaccessibleMemory"),
    (0x0004_0000, "MiniDumpWithTokenInformation"),
    (0x0008_0000, "MiniDumpWithModuleHeaders"),
    (0x0010_0000, "MiniDumpFilterTriage"),
];

impl DumpFlags {
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every bit in `mask` is set
    pub fn contains(self, mask: u32) -> bool {
        self.0 & mask == mask
    }

    /// Names of the set bits, or `MiniDumpNormal` if none are.
    ///
    /// Bits without a well-known name are left out.
    pub fn names(self) -> Vec<&'static str> {
        if self.0 == 0 {
            return vec!["MiniDumpNormal"];
        }
        DUMP_FLAG_NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect()
    }
}
