//! Request body sources.

use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::FetchError;

/// What gets uploaded with a request.
#[derive(Debug, Clone, Default)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Vec<u8>),
    /// Raw file contents.
    File(PathBuf),
    /// A single file part of a `multipart/form-data` form.
    Multipart { field: String, path: PathBuf },
}

/// An opened body: a reader plus what the request needs to announce it.
pub struct Payload {
    pub reader: Box<dyn Read + Send>,
    pub length: u64,
    pub content_type: Option<String>,
}

impl Body {
    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Bytes(b) => b.is_empty(),
            _ => false,
        }
    }

    /// Opens the source. Returns `None` for a bodiless request.
    pub fn open(self) -> Result<Option<Payload>, FetchError> {
        match self {
            Body::Empty => Ok(None),
            Body::Bytes(bytes) => Ok(Some(Payload {
                length: bytes.len() as u64,
                reader: Box::new(Cursor::new(bytes)),
                content_type: None,
            })),
            Body::File(path) => {
                let (file, length) = open_file(&path)?;
                Ok(Some(Payload {
                    reader: Box::new(file),
                    length,
                    content_type: None,
                }))
            }
            Body::Multipart { field, path } => {
                let (file, file_len) = open_file(&path)?;
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "file".to_string());
                let boundary = format!("spigot-{}", Uuid::new_v4().simple());
                let head = format!(
                    "--{boundary}\r\n\
                     Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n",
                    escape_quoted(&field),
                    escape_quoted(&filename),
                )
                .into_bytes();
                let tail = format!("\r\n--{boundary}--\r\n").into_bytes();
                let length = head.len() as u64 + file_len + tail.len() as u64;
                Ok(Some(Payload {
                    reader: Box::new(Cursor::new(head).chain(file).chain(Cursor::new(tail))),
                    length,
                    content_type: Some(format!("multipart/form-data; boundary={boundary}")),
                }))
            }
        }
    }
}

fn open_file(path: &Path) -> Result<(File, u64), FetchError> {
    let wrap = |source| FetchError::Body {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(wrap)?;
    let length = file.metadata().map_err(wrap)?.len();
    Ok((file, length))
}

fn escape_quoted(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Reader that copies everything it yields into a trace writer.
pub struct Tee<R, W> {
    inner: R,
    trace: W,
}

impl<R, W> Tee<R, W> {
    pub fn new(inner: R, trace: W) -> Self {
        Self { inner, trace }
    }

    pub fn into_parts(self) -> (R, W) {
        (self.inner, self.trace)
    }
}

impl<R: Read, W: Write> Read for Tee<R, W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.trace.write_all(&buf[..n])?;
        Ok(n)
    }
}
