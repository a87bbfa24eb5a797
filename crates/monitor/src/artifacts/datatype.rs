#![forbid(unsafe_code)]

use std::io::Read;
use std::path::Path;
use tracing::debug;

const PROBE_LEN: usize = 512;

/// Human-readable content classification for a regular file. Magic-number
/// detection first, text probe as the fallback. The exact wording is not
/// part of the report contract.
pub fn classify(path: &Path) -> Option<String> {
    match infer::get_from_path(path) {
        Ok(Some(kind)) => return Some(kind.mime_type().to_string()),
        Ok(None) => {}
        Err(err) => {
            debug!(path = %path.display(), %err, "content probe failed");
            return None;
        }
    }

    let mut file = std::fs::File::open(path).ok()?;
    let mut buf = vec![0u8; PROBE_LEN];
    let len = file.read(&mut buf).ok()?;
    buf.truncate(len);
    Some(describe_bytes(&buf).to_string())
}

fn describe_bytes(buf: &[u8]) -> &'static str {
    if buf.is_empty() {
        "empty"
    } else if buf
        .iter()
        .all(|byte| byte.is_ascii_graphic() || byte.is_ascii_whitespace())
    {
        "ASCII text"
    } else if std::str::from_utf8(buf).is_ok() {
        "UTF-8 text"
    } else {
        "data"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn describes_byte_shapes() {
        assert_eq!(describe_bytes(b""), "empty");
        assert_eq!(describe_bytes(b"#!/bin/sh\necho hi\n"), "ASCII text");
        assert_eq!(describe_bytes("héllo wörld".as_bytes()), "UTF-8 text");
        assert_eq!(describe_bytes(&[0u8, 1, 2, 255]), "data");
    }

    #[test]
    fn classifies_elf_magic() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]).unwrap();
        file.write_all(&[0u8; 64]).unwrap();
        file.flush().unwrap();

        let label = classify(file.path()).unwrap();
        assert_eq!(label, "application/x-executable");
    }

    #[test]
    fn classifies_plain_text() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hostname=box\n").unwrap();
        file.flush().unwrap();

        assert_eq!(classify(file.path()).unwrap(), "ASCII text");
    }
}
