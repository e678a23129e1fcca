//! Zip archive assembly.

use std::io::{Cursor, Write};

use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

fn assemble(entries: &[(&str, &[u8])], method: CompressionMethod) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(method);
    for (name, data) in entries {
        writer.start_file(*name, options).expect("Failed to start zip entry");
        writer.write_all(data).expect("Failed to write zip entry");
    }
    writer.finish().expect("Failed to finish zip").into_inner()
}

/// Deflate every entry.
pub fn assemble_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    assemble(entries, CompressionMethod::Deflated)
}

/// Store every entry uncompressed.
pub fn assemble_zip_stored(entries: &[(&str, &[u8])]) -> Vec<u8> {
    assemble(entries, CompressionMethod::Stored)
}
