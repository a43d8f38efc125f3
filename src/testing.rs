//! Synthetic dumps for unit tests

use crate::spec::{DIRECTORY_ENTRY_SIZE, FILE_HEADER_SIZE};

pub fn header_bytes(version: u16, number_of_streams: u32, directory_offset: u32) -> Vec<u8> {
    let mut header = Vec::with_capacity(FILE_HEADER_SIZE);
    header.extend_from_slice(b"MDMP");
    header.extend_from_slice(&version.to_le_bytes());
    header.extend_from_slice(&0u16.to_le_bytes());
    header.extend_from_slice(&number_of_streams.to_le_bytes());
    header.extend_from_slice(&directory_offset.to_le_bytes());
    header.resize(FILE_HEADER_SIZE, 0);
    header
}

pub fn entry_bytes(stream_type: u32, size: u32, offset: u32) -> [u8; DIRECTORY_ENTRY_SIZE] {
    let mut entry = [0; DIRECTORY_ENTRY_SIZE];
    entry[..4].copy_from_slice(&stream_type.to_le_bytes());
    entry[4..8].copy_from_slice(&size.to_le_bytes());
    entry[8..].copy_from_slice(&offset.to_le_bytes());
    entry
}

/// Builds a `total_len`-byte dump: header, then the directory right behind it,
/// then a recognizable byte pattern (`offset % 251`) everywhere else.
pub fn dump_with_entries(entries: &[[u8; DIRECTORY_ENTRY_SIZE]], total_len: usize) -> Vec<u8> {
    let mut dump: Vec<u8> = (0..total_len).map(|i| (i % 251) as u8).collect();
    let header = header_bytes(0xa793, entries.len() as u32, FILE_HEADER_SIZE as u32);
    dump[..FILE_HEADER_SIZE].copy_from_slice(&header);
    for (i, entry) in entries.iter().enumerate() {
        let start = FILE_HEADER_SIZE + i * DIRECTORY_ENTRY_SIZE;
        dump[start..start + DIRECTORY_ENTRY_SIZE].copy_from_slice(entry);
    }
    dump
}
