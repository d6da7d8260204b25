use crate::AcquireError;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::Path;

/// Structurally validates an archive and returns its content hash. Every
/// member is streamed to EOF, which checks its CRC32 against the central
/// directory; the SHA-256 is then computed over the enclosing zip bytes and
/// recorded to load metadata by the caller.
pub fn verify_archive(path: &Path) -> Result<String, AcquireError> {
    let file = fs::File::open(path)?;
    let mut zip = zip::ZipArchive::new(file)?;
    for index in 0..zip.len() {
        let mut member = zip.by_index(index)?;
        let name = member.name().to_string();
        if let Err(err) = io::copy(&mut member, &mut io::sink()) {
            return Err(AcquireError::ArchiveCorrupt {
                member: name,
                detail: err.to_string(),
            });
        }
    }

    let mut hasher = Sha256::new();
    let mut file = fs::File::open(path)?;
    io::copy(&mut file, &mut hasher)?;
    let digest = hex::encode(hasher.finalize());
    tracing::debug!(path = %path.display(), sha256 = %digest, "verified archive");
    Ok(digest)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn sample_zip() -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(io::Cursor::new(Vec::new()));
        writer.start_file("DEMO23Q1.TXT", FileOptions::default()).unwrap();
        writer
            .write_all(b"primaryid$caseid\n1001$100\n1002$100\n1010$101\n")
            .unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn valid_archives_hash_deterministically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.zip");
        fs::write(&path, sample_zip()).unwrap();

        let first = verify_archive(&path).unwrap();
        let second = verify_archive(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(64, first.len());
    }

    #[test]
    fn corrupted_member_bytes_are_detected() {
        let mut bytes = sample_zip();
        // Flip a byte inside the member's data, past the local header and
        // file name, leaving the central directory intact.
        let offset = 30 + "DEMO23Q1.TXT".len() + 4;
        bytes[offset] ^= 0xFF;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.zip");
        fs::write(&path, bytes).unwrap();

        let err = verify_archive(&path).unwrap_err();
        assert!(
            matches!(err, AcquireError::ArchiveCorrupt { .. }),
            "unexpected: {err}"
        );
    }
}
