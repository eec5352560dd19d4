use std::io::{self, Read};

use base64::{engine::general_purpose, Engine as _};

use crate::error::InsightError;

/// A file read out of a dataset archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    pub contents: Vec<u8>,
}

impl ArchiveEntry {
    /// Directory markers carry no data, however the archive encodes them.
    pub fn is_directory(&self) -> bool {
        self.path.ends_with('/')
    }
}

/// Turns an archive blob into the files it contains.
pub trait ArchiveReader: Send + Sync {
    fn unpack(&self, bytes: &[u8]) -> io::Result<Vec<ArchiveEntry>>;
}

/// Reads gzip-compressed tar archives.
#[derive(Clone, Copy, Debug, Default)]
pub struct TarGzReader;

impl ArchiveReader for TarGzReader {
    fn unpack(&self, bytes: &[u8]) -> io::Result<Vec<ArchiveEntry>> {
        let gz = flate2::read::GzDecoder::new(bytes);
        let mut archive = tar::Archive::new(gz);

        let mut entries = Vec::new();
        for entry in archive.entries()? {
            let mut entry = entry?;
            if entry.header().entry_type() == tar::EntryType::Directory {
                continue;
            }

            let path = entry.path()?.to_string_lossy().into_owned();
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            entries.push(ArchiveEntry { path, contents });
        }

        Ok(entries)
    }
}

pub fn decode_base64(content: &str) -> Result<Vec<u8>, InsightError> {
    Ok(general_purpose::STANDARD.decode(content.trim())?)
}

#[cfg(test)]
pub(crate) mod testing {
    use base64::{engine::general_purpose, Engine as _};
    use flate2::{write::GzEncoder, Compression};

    /// Builds a `.tar.gz` from `(path, contents)` pairs. Paths ending in
    /// `/` become directory entries.
    pub fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
        let gz = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(gz);
        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            if path.ends_with('/') {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_size(0);
                header.set_mode(0o755);
            } else {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_size(contents.len() as u64);
                header.set_mode(0o644);
            }
            header.set_mtime(0);
            header.set_cksum();
            builder.append_data(&mut header, path, contents.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    pub fn tar_gz_base64(files: &[(&str, &str)]) -> String {
        general_purpose::STANDARD.encode(tar_gz(files))
    }
}
