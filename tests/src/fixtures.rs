//! Test fixtures: archive builders and stream naming helpers.

use std::io::Write;
use std::path::Path;

use etl_core::StreamKey;
use zip::write::SimpleFileOptions;

/// A stream key for device `d01111111111`.
pub fn stream_key(type_id: &str, sensor_index: u16) -> StreamKey {
    StreamKey::new(type_id, "d01111111111", sensor_index).expect("valid test key")
}

/// A filename carrying `key`'s prefix.
pub fn stream_file(key: &StreamKey, suffix: &str) -> String {
    format!("{}_{suffix}", key.prefix())
}

/// Write a zip archive containing the given (name, contents) entries.
pub fn make_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).expect("create zip");
    let mut writer = zip::ZipWriter::new(file);
    for (name, data) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start zip entry");
        writer.write_all(data).expect("write zip entry");
    }
    writer.finish().expect("finish zip");
}

/// Write a zip archive containing a directory entry, which violates the
/// flat processing-area invariant.
pub fn make_zip_with_directory(path: &Path) {
    let file = std::fs::File::create(path).expect("create zip");
    let mut writer = zip::ZipWriter::new(file);
    writer
        .add_directory("nested", SimpleFileOptions::default())
        .expect("add dir entry");
    writer.finish().expect("finish zip");
}

/// Archive holding one file per (key, suffix) pair.
pub fn archive_of(path: &Path, files: &[(&StreamKey, &str)]) {
    let names: Vec<String> = files
        .iter()
        .map(|(key, suffix)| stream_file(key, suffix))
        .collect();
    let entries: Vec<(&str, &[u8])> = names
        .iter()
        .map(|name| (name.as_str(), b"payload".as_slice()))
        .collect();
    make_zip(path, &entries);
}
