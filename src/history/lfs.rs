//! Git LFS pointer resolution against the clone's local object store.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::HistoryError;

/// Pointer files are tiny; anything larger is real content.
pub const MAX_POINTER_SIZE: usize = 1024;

const VERSION_LINES: [&str; 2] = [
    "version https://git-lfs.github.com/spec/v1",
    "version https://hawser.github.com/spec/v1",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pointer {
    /// Lowercase hex SHA-256 of the content.
    pub oid: String,
    pub size: u64,
}

impl Pointer {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > MAX_POINTER_SIZE {
            return None;
        }
        let text = std::str::from_utf8(bytes).ok()?;
        let mut lines = text.lines();
        let version = lines.next()?.trim_end();
        if !VERSION_LINES.contains(&version) {
            return None;
        }

        let mut oid = None;
        let mut size = None;
        for line in lines {
            let Some((key, value)) = line.split_once(' ') else {
                continue;
            };
            match key {
                "oid" => {
                    let hex = value.trim().strip_prefix("sha256:")?;
                    if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                        return None;
                    }
                    oid = Some(hex.to_ascii_lowercase());
                }
                "size" => size = value.trim().parse::<u64>().ok(),
                _ => {}
            }
        }
        Some(Self {
            oid: oid?,
            size: size?,
        })
    }
}

/// `<gitdir>/lfs/objects`, laid out as `aa/bb/<oid>`.
#[derive(Debug, Clone)]
pub struct LfsStore {
    objects: PathBuf,
}

impl LfsStore {
    pub fn new(git_dir: &Path) -> Self {
        Self {
            objects: git_dir.join("lfs").join("objects"),
        }
    }

    pub fn object_path(&self, oid: &str) -> PathBuf {
        let (a, b) = (&oid[..2.min(oid.len())], oid.get(2..4).unwrap_or(""));
        self.objects.join(a).join(b).join(oid)
    }

    /// Copy the object behind `pointer` into `out`, verifying size and digest.
    ///
    /// On a checksum error the bytes have already been written; callers must
    /// discard `out`.
    pub fn copy_object<W: Write + ?Sized>(
        &self,
        pointer: &Pointer,
        path: &str,
        out: &mut W,
    ) -> Result<u64, HistoryError> {
        let object = self.object_path(&pointer.oid);
        let mut file = match File::open(&object) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(HistoryError::LfsObjectMissing {
                    oid: pointer.oid.clone(),
                    path: path.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        let mut copied = 0u64;
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            out.write_all(&buf[..n])?;
            copied += n as u64;
        }

        let actual = to_hex(&hasher.finalize());
        if actual != pointer.oid || copied != pointer.size {
            return Err(HistoryError::LfsChecksumMismatch {
                oid: pointer.oid.clone(),
                actual,
                path: path.to_string(),
            });
        }
        tracing::debug!(path, oid = %pointer.oid, bytes = copied, "served lfs object");
        Ok(copied)
    }
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}
