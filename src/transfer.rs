use flate2::read::MultiGzDecoder;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

fn is_http_source(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

fn is_gzip_source(source: &str) -> bool {
    source.to_ascii_lowercase().ends_with(".gz")
}

fn local_path(source: &str) -> PathBuf {
    match source.strip_prefix("file://") {
        Some(stripped) => PathBuf::from(stripped),
        None => PathBuf::from(source),
    }
}

/// Downloads (or copies) sources into a unit's workspace, decompressing
/// gzip content on the fly.
#[derive(Debug, Clone)]
pub struct Transfer {
    timeout: Duration,
}

impl Transfer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn open(&self, source: &str) -> Result<Box<dyn Read>, String> {
        if is_http_source(source) {
            let client = reqwest::blocking::Client::builder()
                .timeout(self.timeout)
                .build()
                .map_err(|e| format!("Could not build HTTP client: {e}"))?;
            let response = client
                .get(source)
                .send()
                .map_err(|e| format!("Could not fetch '{source}': {e}"))?
                .error_for_status()
                .map_err(|e| format!("Could not fetch '{source}': {e}"))?;
            return Ok(Box::new(response));
        }
        let path = local_path(source);
        let file = File::open(&path)
            .map_err(|e| format!("Could not open source file '{}': {e}", path.display()))?;
        Ok(Box::new(file))
    }

    /// Materializes `source` at `destination` and returns the number of bytes
    /// written. The destination only appears once the copy is complete.
    pub fn fetch(&self, source: &str, destination: &Path) -> Result<u64, String> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                format!(
                    "Could not create destination directory '{}': {e}",
                    parent.display()
                )
            })?;
        }
        let mut tmp_os: OsString = destination.as_os_str().to_os_string();
        tmp_os.push(".part");
        let tmp_path = PathBuf::from(tmp_os);

        let mut reader = BufReader::new(self.open(source)?);
        let peek = reader
            .fill_buf()
            .map_err(|e| format!("Could not read '{source}': {e}"))?;
        let gzipped = if peek.len() >= GZIP_MAGIC.len() {
            peek[..GZIP_MAGIC.len()] == GZIP_MAGIC
        } else {
            is_gzip_source(source)
        };

        let mut writer = BufWriter::new(
            File::create(&tmp_path)
                .map_err(|e| format!("Could not create '{}': {e}", tmp_path.display()))?,
        );
        let copy_result = if gzipped {
            let mut decoder = MultiGzDecoder::new(reader);
            std::io::copy(&mut decoder, &mut writer)
                .map_err(|e| format!("Could not decompress '{source}': {e}"))
        } else {
            std::io::copy(&mut reader, &mut writer)
                .map_err(|e| format!("Could not copy '{source}': {e}"))
        };
        let written = match copy_result {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };

        writer
            .flush()
            .map_err(|e| format!("Could not flush '{}': {e}", tmp_path.display()))?;
        drop(writer);
        fs::rename(&tmp_path, destination).map_err(|e| {
            format!(
                "Could not finalize destination '{}': {e}",
                destination.display()
            )
        })?;
        tracing::info!(
            "Downloaded {source} -> {} ({written} bytes)",
            destination.display()
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compression, write::GzEncoder};
    use tempfile::tempdir;

    fn write_gzip(path: &Path, text: &str) {
        let file = File::create(path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        encoder.finish().unwrap();
    }

    #[test]
    fn gzip_sources_are_decompressed() {
        let td = tempdir().unwrap();
        let source = td.path().join("toy.gff.gz");
        write_gzip(&source, "chr1\tsrc\tgene\t1\t12\t.\t+\t.\tID=g1\n");
        let dest = td.path().join("work").join("annotation.gff");

        let transfer = Transfer::new(Duration::from_secs(5));
        let written = transfer
            .fetch(&format!("file://{}", source.display()), &dest)
            .unwrap();
        let text = fs::read_to_string(&dest).unwrap();
        assert!(text.starts_with("chr1\tsrc\tgene"));
        assert_eq!(written as usize, text.len());
    }

    #[test]
    fn plain_sources_are_copied_even_with_gz_suffix_missing() {
        let td = tempdir().unwrap();
        let source = td.path().join("toy.fna");
        fs::write(&source, ">chr1\nACGT\n").unwrap();
        let dest = td.path().join("assembly.fna");
        Transfer::new(Duration::from_secs(5))
            .fetch(&source.to_string_lossy(), &dest)
            .unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), ">chr1\nACGT\n");
    }

    #[test]
    fn missing_source_leaves_no_partial_file() {
        let td = tempdir().unwrap();
        let dest = td.path().join("assembly.fna");
        let err = Transfer::new(Duration::from_secs(5))
            .fetch(&td.path().join("absent.fna.gz").to_string_lossy(), &dest)
            .unwrap_err();
        assert!(err.contains("Could not open source file"));
        assert!(!dest.exists());
    }
}
