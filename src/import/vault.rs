//! Retention of raw uploads next to the database, optionally encrypted.

use std::path::{Path, PathBuf};

/// At-rest encryption hook for retained raw uploads.
///
/// The default build ships [`PassthroughCipher`] only; an enabled cipher
/// without a loaded key is a hard error rather than a silent plaintext copy.
pub trait Cipher {
    fn is_enabled(&self) -> bool;
    fn has_key(&self) -> bool;
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, anyhow::Error>;
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, anyhow::Error>;
}

/// Disabled cipher; raw files are retained as plain copies.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCipher;

impl Cipher for PassthroughCipher {
    fn is_enabled(&self) -> bool {
        false
    }

    fn has_key(&self) -> bool {
        false
    }

    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
        Ok(data.to_vec())
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
        Ok(data.to_vec())
    }
}

/// Copy the uploaded file into `data_dir/raw/`, keyed by import id.
///
/// With an enabled cipher the retained file is `{import_id}.enc`; otherwise
/// the original extension is kept so the file stays recognizable.
pub fn retain_raw_upload(
    data_dir: &Path,
    import_id: &str,
    source_path: &Path,
    cipher: &dyn Cipher,
) -> Result<PathBuf, anyhow::Error> {
    let raw_dir = data_dir.join("raw");
    std::fs::create_dir_all(&raw_dir)?;

    if cipher.is_enabled() {
        anyhow::ensure!(
            cipher.has_key(),
            "encryption is enabled but no key is loaded"
        );
        let data = std::fs::read(source_path)?;
        let encrypted = cipher.encrypt(&data)?;
        let target = raw_dir.join(format!("{}.enc", import_id));
        std::fs::write(&target, encrypted)?;
        Ok(target)
    } else {
        let suffix = source_path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let target = raw_dir.join(format!("{}{}", import_id, suffix));
        std::fs::copy(source_path, &target)?;
        Ok(target)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    /// Byte-reversing stand-in for a real cipher.
    struct ReversingCipher {
        key_loaded: bool,
    }

    impl Cipher for ReversingCipher {
        fn is_enabled(&self) -> bool {
            true
        }

        fn has_key(&self) -> bool {
            self.key_loaded
        }

        fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
            Ok(data.iter().rev().copied().collect())
        }

        fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
            self.encrypt(data)
        }
    }

    #[test]
    fn plain_copy_keeps_extension() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let source = tmp_dir.path().join("upload.txt");
        std::fs::write(&source, "rs1 1 1 A A\n")?;

        let target = retain_raw_upload(tmp_dir.path(), "import-1", &source, &PassthroughCipher)?;
        assert_eq!(target, tmp_dir.path().join("raw").join("import-1.txt"));
        assert_eq!(std::fs::read_to_string(&target)?, "rs1 1 1 A A\n");

        Ok(())
    }

    #[test]
    fn plain_copy_without_extension() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let source = tmp_dir.path().join("upload");
        std::fs::write(&source, "data")?;

        let target = retain_raw_upload(tmp_dir.path(), "import-2", &source, &PassthroughCipher)?;
        assert_eq!(target, tmp_dir.path().join("raw").join("import-2"));

        Ok(())
    }

    #[test]
    fn enabled_cipher_writes_enc_file() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let source = tmp_dir.path().join("upload.txt");
        std::fs::write(&source, "abc")?;

        let cipher = ReversingCipher { key_loaded: true };
        let target = retain_raw_upload(tmp_dir.path(), "import-3", &source, &cipher)?;
        assert_eq!(target, tmp_dir.path().join("raw").join("import-3.enc"));

        let stored = std::fs::read(&target)?;
        assert_eq!(stored, b"cba");
        assert_eq!(cipher.decrypt(&stored)?, b"abc");

        Ok(())
    }

    #[test]
    fn enabled_cipher_without_key_is_an_error() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let source = tmp_dir.path().join("upload.txt");
        std::fs::write(&source, "abc")?;

        let cipher = ReversingCipher { key_loaded: false };
        let err = retain_raw_upload(tmp_dir.path(), "import-4", &source, &cipher).unwrap_err();
        assert!(err.to_string().contains("no key is loaded"));

        Ok(())
    }
}
