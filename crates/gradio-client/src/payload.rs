//! Argument normalization: files are inlined as base64 data URIs.

use std::fmt;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::errors::ClientError;

const OCTET_STREAM: &str = "application/octet-stream";

/// One caller-supplied argument before normalization.
pub enum Argument {
    /// Passed through unchanged, unless it is a string naming an existing file.
    Value(Value),
    /// A file that must be readable.
    Path(PathBuf),
    /// An already open stream; `name` is reported to the server as the file name.
    Reader {
        name: String,
        reader: Box<dyn AsyncRead + Send + Unpin>,
    },
}

impl Argument {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn reader(name: impl Into<String>, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::Reader {
            name: name.into(),
            reader: Box::new(reader),
        }
    }
}

impl fmt::Debug for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Reader { name, .. } => f.debug_struct("Reader").field("name", name).finish(),
        }
    }
}

impl From<Value> for Argument {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for Argument {
    fn from(value: &str) -> Self {
        Self::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Argument {
    fn from(value: String) -> Self {
        Self::Value(Value::String(value))
    }
}

impl From<PathBuf> for Argument {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

/// The `{data, name}` object a file argument becomes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileData {
    pub data: String,
    pub name: String,
}

impl FileData {
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Self {
        let name = name.into();
        let mime = detect_mime(bytes, &name);
        Self {
            data: encode_data_uri(&mime, bytes),
            name,
        }
    }
}

/// Normalizes arguments in order, one output element per input element.
pub async fn prepare_payload(arguments: Vec<Argument>) -> Result<Vec<Value>, ClientError> {
    let mut payload = Vec::with_capacity(arguments.len());
    for argument in arguments {
        payload.push(prepare_argument(argument).await?);
    }
    Ok(payload)
}

async fn prepare_argument(argument: Argument) -> Result<Value, ClientError> {
    let file = match argument {
        Argument::Value(Value::String(candidate)) => {
            if !is_existing_file(&candidate).await {
                return Ok(Value::String(candidate));
            }
            read_path(Path::new(&candidate)).await?
        }
        Argument::Value(value) => return Ok(value),
        Argument::Path(path) => read_path(&path).await?,
        Argument::Reader { name, mut reader } => {
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes).await?;
            FileData::from_bytes(base_name(Path::new(&name)), &bytes)
        }
    };
    Ok(serde_json::to_value(file)?)
}

async fn is_existing_file(candidate: &str) -> bool {
    if candidate.is_empty() {
        return false;
    }
    tokio::fs::metadata(candidate)
        .await
        .map(|metadata| metadata.is_file())
        .unwrap_or(false)
}

async fn read_path(path: &Path) -> Result<FileData, ClientError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| ClientError::File {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(FileData::from_bytes(base_name(path), &bytes))
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

pub fn encode_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// A decoded `data:<mime>;base64,<bytes>` URI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataUri {
    pub mime: String,
    pub bytes: Vec<u8>,
}

pub fn decode_data_uri(uri: &str) -> Result<DataUri, ClientError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| ClientError::invalid_argument("data uri must start with 'data:'"))?;
    let (mime, encoded) = rest
        .split_once(";base64,")
        .ok_or_else(|| ClientError::invalid_argument("data uri is not base64 encoded"))?;
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|err| ClientError::invalid_argument(format!("data uri decode failed: {err}")))?;
    Ok(DataUri {
        mime: mime.to_string(),
        bytes,
    })
}

/// Content first, then the file name, then a text/binary split. Both intake
/// paths go through here so the server sees one MIME type per file.
pub fn detect_mime(bytes: &[u8], name: &str) -> String {
    if let Some(mime) = sniff_magic(bytes) {
        return mime.to_string();
    }
    if let Some(mime) = mime_guess::from_path(name).first_raw() {
        return mime.to_string();
    }
    if !bytes.contains(&0) && std::str::from_utf8(bytes).is_ok() {
        return "text/plain".to_string();
    }
    OCTET_STREAM.to_string()
}

fn sniff_magic(bytes: &[u8]) -> Option<&'static str> {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"%PDF-", "application/pdf"),
        (b"ID3", "audio/mpeg"),
        (b"OggS", "audio/ogg"),
        (b"fLaC", "audio/flac"),
        (b"PK\x03\x04", "application/zip"),
    ];
    if let Some(mime) = SIGNATURES
        .iter()
        .find(|(signature, _)| bytes.starts_with(signature))
        .map(|(_, mime)| *mime)
    {
        return Some(mime);
    }
    if bytes.len() >= 12 && bytes.starts_with(b"RIFF") {
        match &bytes[8..12] {
            b"WEBP" => return Some("image/webp"),
            b"WAVE" => return Some("audio/wav"),
            _ => {}
        }
    }
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        return Some("video/mp4");
    }
    None
}
