//! Tarball extraction for published package artifacts.

use std::path::Path;

use flate2::read::GzDecoder;

use crate::RegistryError;

/// Extract a gzipped tarball into `dest`, creating it if needed.
///
/// Entry paths are sanitised by the archive reader; entries that would
/// escape `dest` are rejected as metadata errors.
pub fn extract_tar_gz(bytes: &[u8], dest: &Path) -> Result<(), RegistryError> {
    std::fs::create_dir_all(dest)?;

    let decoder = GzDecoder::new(bytes);
    let mut archive = tar::Archive::new(decoder);
    archive
        .unpack(dest)
        .map_err(|e| RegistryError::BadMetadata(format!("failed to extract tarball: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempfile::tempdir;

    use super::*;

    fn tar_gz_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_bytes())
                .expect("append");
        }
        builder
            .into_inner()
            .expect("finish tar")
            .finish()
            .expect("finish gzip")
    }

    #[test]
    fn extracts_nested_entries() {
        let bytes = tar_gz_with(&[
            ("package/package.json", r#"{"name":"demo"}"#),
            ("package/lib/index.js", "module.exports = 1;\n"),
        ]);

        let td = tempdir().expect("tempdir");
        extract_tar_gz(&bytes, td.path()).expect("extract");

        let manifest = std::fs::read_to_string(td.path().join("package/package.json"))
            .expect("read manifest");
        assert!(manifest.contains("demo"));
        assert!(td.path().join("package/lib/index.js").is_file());
    }

    #[test]
    fn rejects_garbage_bytes() {
        let td = tempdir().expect("tempdir");
        let err = extract_tar_gz(b"definitely not a tarball", td.path()).expect_err("must fail");
        assert!(matches!(err, RegistryError::BadMetadata(_)));
    }
}
