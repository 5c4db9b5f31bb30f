//! On-disk representation of a single JSON document.

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tempfile::NamedTempFile;

use super::error::StoreError;

/// Parsed document content.
pub type Mapping = serde_json::Map<String, Value>;

/// What was found on disk.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DocStatus {
    Missing,
    Loaded,
    /// Unparseable; served as empty.
    Corrupt,
}

/// Whether the read observed the remote.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Freshness {
    Fresh,
    /// Pull failed transiently twice; content is the last local state.
    Stale,
}

/// One read of one document.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub path: String,
    pub content: Value,
    pub status: DocStatus,
    pub freshness: Freshness,
    /// Local branch tip the content was read at.
    pub head: Option<String>,
}

impl Snapshot {
    /// The content as a mapping. Documents that are valid JSON but not an
    /// object are treated like corrupt ones.
    pub fn into_mapping(self) -> Mapping {
        match self.content {
            Value::Object(map) => map,
            other => {
                tracing::warn!(
                    path = %self.path,
                    found = json_type(&other),
                    "document is not a JSON object; treating as empty"
                );
                Mapping::new()
            }
        }
    }

    /// Deserialize into a typed document. Missing, corrupt and mis-shaped
    /// documents all yield `T::default()`.
    pub fn decode<T: DeserializeOwned + Default>(self) -> T {
        if self.status != DocStatus::Loaded {
            return T::default();
        }
        match serde_json::from_value(self.content) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(
                    path = %self.path,
                    %error,
                    "document does not match its expected shape; treating as empty"
                );
                T::default()
            }
        }
    }
}

impl Snapshot {
    /// Deserialize for a read-modify-write. Unlike [`Snapshot::decode`],
    /// content that is present but unusable is an error, so a rewrite never
    /// replaces entries it could not read.
    pub fn decode_strict<T: DeserializeOwned + Default>(self) -> Result<T, String> {
        match self.status {
            DocStatus::Missing => Ok(T::default()),
            DocStatus::Corrupt => Err("document is not valid JSON".to_string()),
            DocStatus::Loaded => serde_json::from_value(self.content).map_err(|e| e.to_string()),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validate a repository-relative document path and normalize it to the
/// `/`-separated form the index uses.
pub fn validate_path(path: &str) -> Result<String, StoreError> {
    let invalid = |reason| StoreError::InvalidPath {
        path: path.to_string(),
        reason,
    };
    if path.trim().is_empty() {
        return Err(invalid("empty path"));
    }
    if path.contains('\\') {
        return Err(invalid("backslashes are not allowed"));
    }

    let mut parts = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| invalid("path is not valid UTF-8"))?;
                if part.eq_ignore_ascii_case(".git") {
                    return Err(invalid("paths inside .git are not allowed"));
                }
                parts.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(invalid("parent directory components are not allowed"));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("absolute paths are not allowed"));
            }
        }
    }
    if parts.is_empty() {
        return Err(invalid("empty path"));
    }
    Ok(parts.join("/"))
}

/// Pretty JSON, two-space indent, trailing newline.
pub fn encode<T: Serialize + ?Sized>(path: &str, value: &T) -> Result<Vec<u8>, StoreError> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serialize {
        path: path.to_string(),
        source,
    })?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Read and parse a document. Never fails on bad content; only on I/O.
pub fn load(abs: &Path, path: &str) -> Result<(Value, DocStatus), StoreError> {
    let bytes = match fs::read(abs) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok((Value::Object(Mapping::new()), DocStatus::Missing));
        }
        Err(source) => {
            return Err(StoreError::Io {
                path: abs.to_path_buf(),
                op: "read",
                source,
            });
        }
    };
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => Ok((value, DocStatus::Loaded)),
        Err(error) => {
            tracing::warn!(
                path,
                %error,
                bytes = bytes.len(),
                "document is not valid JSON; treating as empty"
            );
            Ok((Value::Object(Mapping::new()), DocStatus::Corrupt))
        }
    }
}

/// Replace `path` with `bytes` via a temp file in the same directory, so
/// readers see either the old or the new content.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
