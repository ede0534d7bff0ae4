use std::io::Cursor;

use anyhow::Result;

use ozxread::*;

mod common;
use common::*;

fn five_files() -> ArchiveBuilder {
    ArchiveBuilder::new()
        .stored("file1.txt", b"one")
        .deflated("file2.txt", &sample_bytes(2000, 2))
        .stored("file3.txt", b"three")
        .stored("file4.txt", b"four")
        .stored("file5.txt", b"five")
}

fn open(bytes: Vec<u8>) -> ZipResult<ZipReader<Cursor<Vec<u8>>>> {
    ZipReader::new(Cursor::new(bytes))
}

fn expect_invalid<T>(result: ZipResult<T>, needle: &str) {
    match result {
        Err(e) if e.is_invalid_archive() => {
            assert!(e.to_string().contains(needle), "{e} should mention {needle}")
        }
        Err(other) => panic!("Expected InvalidArchive, got {other:?}"),
        Ok(_) => panic!("Expected InvalidArchive, got Ok"),
    }
}

fn put_u16(bytes: &mut [u8], at: u64, v: u16) {
    let at = at as usize;
    bytes[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(bytes: &mut [u8], at: u64, v: u32) {
    let at = at as usize;
    bytes[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

#[test]
fn not_a_zip() {
    init_logging();
    expect_invalid(open(Vec::new()), "End Of Central Directory");
    expect_invalid(open(b"PK".to_vec()), "End Of Central Directory");
    expect_invalid(open(sample_bytes(100_000, 1)), "End Of Central Directory");
}

#[test]
fn truncated_end_of_central_directory() {
    init_logging();
    let mut bytes = five_files().build();
    bytes.truncate(bytes.len() - 10);
    expect_invalid(open(bytes), "End Of Central Directory");
}

#[test]
fn short_comments_are_truncated() -> Result<()> {
    init_logging();
    let mut bytes = five_files().comment("a comment of some length").build();
    bytes.truncate(bytes.len() - 7);
    let mut reader = open(bytes)?;
    assert_eq!(reader.comment(), "a comment of some");
    assert_eq!(reader.read_file("file5.txt")?, b"five");
    Ok(())
}

#[test]
fn comments_containing_the_magic() -> Result<()> {
    init_logging();
    // The rightmost signature wins, and it's the real one.
    let bytes = five_files().comment("PK\u{5}\u{6} in a comment").build();
    let reader = open(bytes)?;
    assert_eq!(reader.comment(), "PK\u{5}\u{6} in a comment");
    assert_eq!(reader.cd_entries_count(), 5);
    Ok(())
}

#[test]
fn bad_central_directory_record() -> Result<()> {
    init_logging();
    let (mut bytes, layout) = five_files().build_with_layout();
    bytes[layout.records[2] as usize] = b'X';
    let mut reader = open(bytes)?;

    expect_invalid(reader.parse_central_directory(None).map(|_| ()), "index 2");
    // What came before the bad record survives.
    assert_eq!(reader.entries().len(), 2);
    assert_eq!(reader.directory_cursor().index(), 2);
    assert_eq!(reader.read_file("file2.txt")?, sample_bytes(2000, 2));

    // Asking again hits the same record.
    expect_invalid(reader.get_entry("file4.txt").map(|_| ()), "index 2");
    expect_invalid(reader.list_files("").map(|_| ()), "index 2");
    assert_eq!(reader.entries().len(), 2);
    Ok(())
}

#[test]
fn truncated_central_directory() -> Result<()> {
    init_logging();
    let (mut bytes, layout) = five_files().build_with_layout();
    // Claim a sixth entry that isn't there.
    put_u16(&mut bytes, layout.eocdr + 8, 6);
    put_u16(&mut bytes, layout.eocdr + 10, 6);
    let mut reader = open(bytes)?;

    expect_invalid(reader.parse_central_directory(None).map(|_| ()), "index 5");
    assert_eq!(reader.entries().len(), 5);
    assert!(!reader.is_fully_parsed());
    Ok(())
}

#[test]
fn directory_past_the_end() -> Result<()> {
    init_logging();
    let (mut bytes, layout) = five_files().build_with_layout();
    let len = bytes.len() as u32;
    put_u32(&mut bytes, layout.eocdr + 16, len + 1000);
    let mut reader = open(bytes)?;
    expect_invalid(reader.get_entry("file1.txt").map(|_| ()), "Truncated");
    Ok(())
}

#[test]
fn sentinel_without_zip64_field() -> Result<()> {
    init_logging();
    let (mut bytes, layout) = five_files().build_with_layout();
    // Compressed size of file3.txt
    put_u32(&mut bytes, layout.records[2] + 20, u32::MAX);
    let mut reader = open(bytes)?;
    expect_invalid(reader.get_entry("file3.txt").map(|_| ()), "Zip64 extra field");
    assert_eq!(reader.entries().len(), 2);
    Ok(())
}

#[test]
fn stored_range_past_the_archive() -> Result<()> {
    init_logging();
    let (mut bytes, layout) = ArchiveBuilder::new()
        .stored("s", b"small")
        .zip64()
        .build_with_layout();
    // The uncompressed size in the Zip64 extra field, after the record, the name,
    // and the extra field's own header
    let size_at = layout.records[0] as usize + 46 + "s".len() + 4;
    bytes[size_at..size_at + 8].copy_from_slice(&u64::MAX.to_le_bytes());
    let mut reader = open(bytes)?;
    assert_eq!(reader.get_entry("s")?.unwrap().uncompressed_size, u64::MAX);

    expect_invalid(
        reader
            .stream_file_range("s", u64::MAX - 10, u64::MAX - 1, 16)
            .map(|_| ()),
        "past the end of the archive",
    );
    expect_invalid(
        reader.stream_file_range("s", 100, 200, 16).map(|_| ()),
        "past the end of the archive",
    );
    // In-bounds bytes are still readable.
    let head = reader
        .stream_file_range("s", 0, 4, 16)?
        .collect::<ZipResult<Vec<_>>>()?
        .concat();
    assert_eq!(head, b"small");
    Ok(())
}

#[test]
fn bad_local_header() -> Result<()> {
    init_logging();
    let (mut bytes, layout) = five_files().build_with_layout();
    bytes[layout.local_headers[1] as usize + 2] = 0;
    let mut reader = open(bytes)?;

    expect_invalid(reader.read_file("file2.txt"), "local file header");
    expect_invalid(reader.stream_file("file2.txt", 100).map(|_| ()), "local file header");
    expect_invalid(
        reader.stream_file_range("file2.txt", 0, 10, 100).map(|_| ()),
        "local file header",
    );
    // Its neighbors are fine.
    assert_eq!(reader.read_file("file1.txt")?, b"one");
    assert_eq!(reader.read_file("file3.txt")?, b"three");
    Ok(())
}

#[test]
fn local_header_past_the_end() -> Result<()> {
    init_logging();
    let (mut bytes, layout) = five_files().build_with_layout();
    let len = bytes.len() as u32;
    put_u32(&mut bytes, layout.records[0] + 42, len - 10);
    let mut reader = open(bytes)?;
    expect_invalid(reader.read_file("file1.txt"), "local file header");
    Ok(())
}

#[cfg(feature = "check-local-metadata")]
#[test]
fn local_header_disagrees() -> Result<()> {
    init_logging();
    let (mut bytes, layout) = five_files().build_with_layout();
    // Rename file3.txt to file3.txx in its local header only
    bytes[layout.local_headers[2] as usize + 30 + 8] = b'x';
    // and give file4.txt's local header a different compression method.
    put_u16(&mut bytes, layout.local_headers[3] + 8, DEFLATE);
    let mut reader = open(bytes)?;

    expect_invalid(reader.read_file("file3.txt"), "doesn't match");
    expect_invalid(reader.read_file("file4.txt"), "doesn't match");
    assert_eq!(reader.read_file("file5.txt")?, b"five");
    Ok(())
}

#[test]
fn corrupt_deflate_stream() -> Result<()> {
    init_logging();
    let (mut bytes, layout) = five_files().build_with_layout();
    let data_start = layout.local_headers[1] as usize + 30 + "file2.txt".len();
    // 0b111 is a final block of the reserved (invalid) type.
    bytes[data_start] = 0xFF;
    let mut reader = open(bytes)?;
    expect_invalid(reader.read_file("file2.txt"), "Corrupt entry data");
    Ok(())
}

#[test]
fn broken_zip64_locator() {
    init_logging();
    let (mut bytes, layout) = five_files().zip64().build_with_layout();
    bytes[layout.eocdr as usize - 20] = b'X';
    expect_invalid(open(bytes), "Zip64");
}
