//! Where a download ends up.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

/// Download destination, opened lazily right before the body is copied.
#[derive(Default)]
pub enum Sink {
    /// Keep the body in memory; it is returned in the response.
    #[default]
    Buffer,
    /// Create (or truncate) a file.
    File(PathBuf),
    /// Any writer the caller owns.
    Writer(Box<dyn Write + Send>),
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sink::Buffer => f.write_str("Buffer"),
            Sink::File(path) => f.debug_tuple("File").field(path).finish(),
            Sink::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

impl Sink {
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Sink::File(path) => Some(path),
            _ => None,
        }
    }

    pub fn open(self) -> io::Result<SinkWriter> {
        Ok(match self {
            Sink::Buffer => SinkWriter::Buffer(Vec::new()),
            Sink::File(path) => SinkWriter::File(BufWriter::new(File::create(path)?)),
            Sink::Writer(w) => SinkWriter::Writer(w),
        })
    }
}

/// An opened [`Sink`].
pub enum SinkWriter {
    Buffer(Vec<u8>),
    File(BufWriter<File>),
    Writer(Box<dyn Write + Send>),
}

impl SinkWriter {
    /// The in-memory body, if this sink was a buffer.
    pub fn into_body(self) -> Option<Vec<u8>> {
        match self {
            SinkWriter::Buffer(body) => Some(body),
            _ => None,
        }
    }
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            SinkWriter::Buffer(v) => v.write(buf),
            SinkWriter::File(f) => f.write(buf),
            SinkWriter::Writer(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            SinkWriter::Buffer(_) => Ok(()),
            SinkWriter::File(f) => f.flush(),
            SinkWriter::Writer(w) => w.flush(),
        }
    }
}
