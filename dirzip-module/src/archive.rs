// Copyright 2024 Wladimir Palant
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Streaming ZIP archives of directories
//!
//! Archives are produced without seeking: every member is stored uncompressed and followed by a
//! data descriptor, the central directory comes last. The walk happens on a blocking thread, data
//! is passed on in chunks through a bounded channel.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use log::{debug, trace};
use std::cell::Cell;
use std::fs::File;
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use walkdir::{DirEntry, WalkDir};
use zip::result::ZipError;
use zip::write::{SimpleFileOptions, ZipWriter};
use zip::CompressionMethod;

use crate::file_writer::BUFFER_SIZE;
use crate::path::is_hidden;

/// Errors producing an archive. Any of these means that the archive is incomplete.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Directory traversal failed
    #[error("failed walking directory")]
    Walk(#[from] walkdir::Error),
    /// A member file couldn’t be opened
    #[error("failed opening {path:?}")]
    Open {
        /// File path
        path: PathBuf,
        /// The underlying error
        #[source]
        source: io::Error,
    },
    /// A member file couldn’t be read
    #[error("failed reading {path:?}")]
    Read {
        /// File path
        path: PathBuf,
        /// The underlying error
        #[source]
        source: io::Error,
    },
    /// The sink didn’t accept data
    #[error("failed writing archive data")]
    Write(#[source] io::Error),
    /// The ZIP writer reported an error
    #[error("failed producing archive")]
    Zip(#[from] ZipError),
}

/// A file to be added to the archive
#[derive(Debug)]
pub struct ArchiveMember {
    /// Name within the archive, relative to the archived directory and separated by `/`
    pub relative_name: String,
    /// Last modification time if known
    pub modified: Option<SystemTime>,
    /// File size in bytes
    pub size: u64,
    /// The opened file
    pub content: File,
}

impl ArchiveMember {
    fn options(&self) -> SimpleFileOptions {
        let modified = self
            .modified
            .map(|modified| DateTime::<Utc>::from(modified).naive_utc())
            .and_then(|modified| zip::DateTime::try_from(modified).ok())
            .unwrap_or_default();

        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .last_modified_time(modified)
            .large_file(self.size >= u64::from(u32::MAX))
    }
}

/// Produces ZIP archives of a directory
#[derive(Debug, Clone)]
pub struct ArchiveStreamer {
    root: PathBuf,
}

/// Passes data on to the actual sink until a write fails or the archive is aborted. From that
/// point on all data is discarded, so that the ZIP writer can be dropped without emitting a
/// trailer.
struct AbortGate<W> {
    inner: W,
    aborted: Rc<Cell<bool>>,
}

impl<W: Write> Write for AbortGate<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.aborted.get() {
            return Ok(buf.len());
        }
        self.inner.write(buf).inspect_err(|_| self.aborted.set(true))
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.aborted.get() {
            return Ok(());
        }
        self.inner.flush().inspect_err(|_| self.aborted.set(true))
    }
}

impl ArchiveStreamer {
    /// Creates a streamer for the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory being archived
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn relative_name(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .iter()
            .map(|component| component.to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn open_member(&self, entry: &DirEntry) -> Result<ArchiveMember, ArchiveError> {
        let path = entry.path();
        let content = File::open(path).map_err(|source| ArchiveError::Open {
            path: path.to_owned(),
            source,
        })?;
        let meta = content.metadata().map_err(|source| ArchiveError::Read {
            path: path.to_owned(),
            source,
        })?;

        Ok(ArchiveMember {
            relative_name: self.relative_name(path),
            modified: meta.modified().ok(),
            size: meta.len(),
            content,
        })
    }

    /// Walks the directory depth-first in file name order, producing the regular files to be
    /// archived. Hidden entries are skipped and hidden directories aren’t descended into,
    /// symbolic links and special files are skipped as well.
    pub fn members(&self) -> impl Iterator<Item = Result<ArchiveMember, ArchiveError>> + '_ {
        WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !is_hidden(entry.file_name()))
            .filter_map(move |entry| match entry {
                Ok(entry) if entry.file_type().is_file() => Some(self.open_member(&entry)),
                Ok(entry) => {
                    trace!("Not archiving {:?}", entry.path());
                    None
                }
                Err(err) => Some(Err(err.into())),
            })
    }

    fn write_members<W: Write + Seek>(&self, zip: &mut ZipWriter<W>) -> Result<(), ArchiveError> {
        let mut buf = vec![0; BUFFER_SIZE];
        for member in self.members() {
            let mut member = member?;
            zip.start_file(member.relative_name.as_str(), member.options())?;

            loop {
                let len = member
                    .content
                    .read(&mut buf)
                    .map_err(|source| ArchiveError::Read {
                        path: self.root.join(&member.relative_name),
                        source,
                    })?;
                if len == 0 {
                    break;
                }
                zip.write_all(&buf[..len]).map_err(ArchiveError::Write)?;
            }
        }
        Ok(())
    }

    /// Writes the complete archive to the sink and returns the sink.
    ///
    /// If an error occurs, nothing is written to the sink past the point of failure. In
    /// particular, the central directory is omitted so that the result is recognizably broken.
    pub fn write_to<W: Write>(&self, sink: W) -> Result<W, ArchiveError> {
        let aborted = Rc::new(Cell::new(false));
        let mut zip = ZipWriter::new_stream(AbortGate {
            inner: sink,
            aborted: aborted.clone(),
        });

        if let Err(err) = self.write_members(&mut zip) {
            aborted.set(true);
            return Err(err);
        }

        let gate = zip.finish()?.into_inner();
        debug!("Finished archiving {:?}", self.root);
        Ok(gate.inner)
    }
}

/// A sink passing data on in chunks of up to 64 KiB through a channel. This has to be used on a
/// blocking thread.
#[derive(Debug)]
pub(crate) struct ChunkWriter {
    sender: mpsc::Sender<Bytes>,
    buffer: BytesMut,
}

impl ChunkWriter {
    pub(crate) fn new(sender: mpsc::Sender<Bytes>) -> Self {
        Self {
            sender,
            buffer: BytesMut::with_capacity(BUFFER_SIZE),
        }
    }

    fn send(&mut self, chunk: Bytes) -> io::Result<()> {
        self.sender
            .blocking_send(chunk)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response receiver gone"))
    }
}

impl Write for ChunkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        while self.buffer.len() >= BUFFER_SIZE {
            let chunk = self.buffer.split_to(BUFFER_SIZE).freeze();
            self.send(chunk)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buffer.is_empty() {
            let chunk = self.buffer.split().freeze();
            self.send(chunk)?;
        }
        Ok(())
    }
}
