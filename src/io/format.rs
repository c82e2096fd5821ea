//! Shared file-header helpers for the on-disk formats in spec §6: a fixed
//! 16-byte zero-padded signature, self-describing size checks performed
//! before any offset in the header is trusted, and an mmap-based loader.
//!
//! Every persisted format ([`crate::suffix::array::SuffixArray`],
//! [`crate::index::bidirectional::BidirectionalIndex`],
//! [`crate::corpus::WordCorpus`], the buffer builder) shares this module
//! rather than duplicating signature/size-check logic, mirroring how the
//! teacher's I/O helpers are centralised rather than copy-pasted per
//! container.

use crate::error::{Error, Result};
use memmap2::Mmap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Length, in bytes, of every format signature.
pub const SIGNATURE_LEN: usize = 16;

/// Builds a zero-padded 16-byte signature from an ASCII tag (e.g.
/// `"\x7FBufBuild"`).
///
/// # Panics
/// Panics if `tag` is longer than [`SIGNATURE_LEN`] bytes.
pub const fn signature(tag: &[u8]) -> [u8; SIGNATURE_LEN] {
    assert!(tag.len() <= SIGNATURE_LEN);
    let mut sig = [0u8; SIGNATURE_LEN];
    let mut i = 0;
    while i < tag.len() {
        sig[i] = tag[i];
        i += 1;
    }
    sig
}

/// Verifies that `bytes` begins with the expected signature.
pub fn check_signature(bytes: &[u8], expected: &[u8; SIGNATURE_LEN]) -> Result<()> {
    if bytes.len() < SIGNATURE_LEN || &bytes[..SIGNATURE_LEN] != expected {
        return Err(Error::BadFormat);
    }
    Ok(())
}

/// Verifies a self-describing size field read from a header against the
/// size the in-memory type expects, before any offset derived from the
/// header is trusted.
pub fn check_size(on_disk: usize, expected: usize) -> Result<()> {
    if on_disk != expected {
        return Err(Error::BadFormat);
    }
    Ok(())
}

/// Memory-maps `path` read-only for an mmap-backed load.
pub fn mmap_readonly(path: &Path) -> Result<Mmap> {
    let file = File::open(path)?;
    // SAFETY: the caller accepts the usual mmap caveat that the file must
    // not be truncated or mutated by another process for the mapping's
    // lifetime; this matches every other read-only mmap load in the crate.
    unsafe { Mmap::map(&file) }.map_err(Error::from)
}

/// Writes a file "safely": the writer closure receives a handle to a
/// sibling temp file, which is only renamed over `path` if the closure
/// succeeds. A crash or error mid-write therefore never leaves a
/// partially-written file at `path` (spec §7, `IoFailure`: "caller must
/// discard the partially-written file").
pub fn save_atomically<F>(path: &Path, write_fn: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    let tmp_path = path.with_extension("tmp-write");
    let mut tmp = File::create(&tmp_path)?;
    match write_fn(&mut tmp) {
        Ok(()) => {
            tmp.flush()?;
            std::fs::rename(&tmp_path, path)?;
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::remove_file(&tmp_path);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_zero_padded() {
        let sig = signature(b"\x7FBufBuild");
        assert_eq!(sig.len(), SIGNATURE_LEN);
        assert_eq!(&sig[..9], b"\x7FBufBuild");
        assert!(sig[9..].iter().all(|&b| b == 0));
    }

    #[test]
    fn check_signature_rejects_mismatch() {
        let sig = signature(b"\x7FBufBuild");
        let other = signature(b"\x7FBiDIndex");
        assert!(check_signature(&other, &sig).is_err());
        assert!(check_signature(&sig, &sig).is_ok());
    }

    #[test]
    fn save_atomically_round_trips() {
        let dir = std::env::temp_dir().join(format!(
            "corpus-substrate-test-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.bin");
        save_atomically(&path, |f| f.write_all(b"hello").map_err(Error::from)).unwrap();
        let data = std::fs::read(&path).unwrap();
        assert_eq!(data, b"hello");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
