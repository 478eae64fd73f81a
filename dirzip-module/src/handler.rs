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

//! Handler for the `request_filter` phase.

use async_trait::async_trait;
use bytes::Bytes;
use dirzip_module_utils::session::{ResponseHeader, Session};
use dirzip_module_utils::standard_response::{error_response, redirect_response};
use dirzip_module_utils::{
    Error, ErrorType, RequestFilter, RequestFilterResult, CONFIG_ERROR, STREAMING_FAILURE,
};
use http::{header, Method, StatusCode};
use log::{debug, info, warn};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::archive::{ArchiveError, ArchiveStreamer, ChunkWriter};
use crate::configuration::DirZipConf;
use crate::file_writer::file_response;
use crate::listing::Listing;
use crate::metadata::{attachment, Metadata};
use crate::mount::MountTable;
use crate::path::{is_hidden, RequestPath, ResolvedTarget, TargetKind};
use crate::range::{extract_range, Range};

/// Number of archive chunks queued up before the archiving thread has to wait
const ARCHIVE_CHANNEL_CAPACITY: usize = 4;

/// Handler serving files, directory listings and directory archives of all configured mounts
#[derive(Debug)]
pub struct DirZipHandler {
    mounts: MountTable,
    index_file: Vec<String>,
}

impl TryFrom<DirZipConf> for DirZipHandler {
    type Error = Box<Error>;

    fn try_from(conf: DirZipConf) -> Result<Self, Self::Error> {
        let mounts = MountTable::from_definitions(conf.mounts).map_err(|err| {
            Error::because(CONFIG_ERROR, "invalid mount configuration", err)
        })?;

        debug!(
            "Initialized directory export handler with {} mount(s), index files: {:?}",
            mounts.len(),
            conf.index_file
        );
        Ok(Self {
            mounts,
            index_file: conf.index_file,
        })
    }
}

impl DirZipHandler {
    /// Provides read-only access to the configured mounts.
    pub fn mounts(&self) -> &MountTable {
        &self.mounts
    }

    /// Finds the first index file in the directory that can be served.
    fn find_index_file(&self, dir: &Path) -> Option<PathBuf> {
        self.index_file
            .iter()
            .filter(|name| !name.is_empty() && !name.contains('/') && !is_hidden(name.as_str()))
            .map(|name| dir.join(name))
            .find(|candidate| {
                candidate
                    .symlink_metadata()
                    .is_ok_and(|meta| meta.is_file())
            })
    }

    async fn serve_file(&self, session: &mut Session, path: &Path) -> Result<(), Box<Error>> {
        let meta = match Metadata::from_path(path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("File {path:?} disappeared");
                return Err(Error::new(ErrorType::HTTPStatus(404)));
            }
            Err(err) => {
                return Err(Error::because(
                    ErrorType::FileReadError,
                    format!("failed retrieving metadata for path {path:?}"),
                    err,
                ));
            }
        };

        if meta.has_failed_precondition(session) {
            debug!("If-Match/If-Unmodified-Since precondition failed");
            let header = meta.to_custom_header(StatusCode::PRECONDITION_FAILED)?;
            session.write_response_header(header, true).await?;
            return Ok(());
        }

        if meta.is_not_modified(session) {
            debug!("If-None-Match/If-Modified-Since check resulted in Not Modified");
            let header = meta.to_custom_header(StatusCode::NOT_MODIFIED)?;
            session.write_response_header(header, true).await?;
            return Ok(());
        }

        let (header, range) = match extract_range(session, &meta) {
            Some(Range::Valid(start, end)) => {
                debug!("bytes range requested: {start}-{end}");
                (meta.to_partial_content_header(start, end)?, Some((start, end)))
            }
            Some(Range::OutOfBounds) => {
                debug!("requested bytes range is out of bounds");
                let header = meta.to_not_satisfiable_header()?;
                session.write_response_header(header, true).await?;
                return Ok(());
            }
            None => {
                // Range is either missing or cannot be parsed, produce the entire file.
                let range = meta.size.checked_sub(1).map(|end| (0, end));
                (meta.to_response_header()?, range)
            }
        };

        let range = range.filter(|_| session.req_header().method != Method::HEAD);
        file_response(session, path, header, range).await
    }

    async fn serve_listing(
        &self,
        session: &mut Session,
        target: &ResolvedTarget,
        archive_enabled: bool,
    ) -> Result<(), Box<Error>> {
        let listing = Listing::build(
            &target.real_path,
            &target.uri_path,
            archive_enabled,
            !target.is_mount_root,
        )
        .map_err(|err| {
            Error::because(
                ErrorType::FileReadError,
                format!("failed reading directory {:?}", target.real_path),
                err,
            )
        })?;
        let text = listing.render();

        let mut header = ResponseHeader::build(StatusCode::OK, Some(2))?;
        header.append_header(header::CONTENT_LENGTH, text.len().to_string())?;
        header.append_header(header::CONTENT_TYPE, "text/html; charset=utf-8")?;

        let send_body = session.req_header().method != Method::HEAD;
        session
            .write_response_header(Box::new(header), !send_body)
            .await?;
        if send_body {
            session
                .write_response_body(Some(Bytes::from(text)), true)
                .await?;
        }
        Ok(())
    }

    async fn serve_archive(
        &self,
        session: &mut Session,
        target: &ResolvedTarget,
    ) -> Result<(), Box<Error>> {
        let mut header = ResponseHeader::build(StatusCode::OK, Some(2))?;
        header.append_header(header::CONTENT_TYPE, "application/zip")?;
        header.append_header(
            header::CONTENT_DISPOSITION,
            attachment(&target.requested_name),
        )?;

        if session.req_header().method == Method::HEAD {
            session.write_response_header(Box::new(header), true).await?;
            return Ok(());
        }
        session.write_response_header(Box::new(header), false).await?;

        let (sender, mut receiver) = mpsc::channel(ARCHIVE_CHANNEL_CAPACITY);
        let streamer = ArchiveStreamer::new(&target.real_path);
        let task = tokio::task::spawn_blocking(move || {
            streamer
                .write_to(ChunkWriter::new(sender))?
                .flush()
                .map_err(ArchiveError::Write)
        });

        while let Some(chunk) = receiver.recv().await {
            session.write_response_body(Some(chunk), false).await?;
        }

        match task.await {
            Ok(Ok(())) => session.write_response_body(None, true).await,
            Ok(Err(err)) => Err(Error::because(
                STREAMING_FAILURE,
                format!("failed archiving {:?}", target.real_path),
                err,
            )),
            Err(err) => Err(Error::because(
                STREAMING_FAILURE,
                "archiving task failed",
                err,
            )),
        }
    }
}

#[async_trait]
impl RequestFilter for DirZipHandler {
    type Conf = DirZipConf;

    async fn request_filter(
        &self,
        session: &mut Session,
    ) -> Result<RequestFilterResult, Box<Error>> {
        let Some(request) = RequestPath::parse(session.uri()) else {
            debug!("Rejecting undecodable path {}", session.uri().path());
            return Ok(RequestFilterResult::Unhandled);
        };

        let resolved = self.mounts.resolve(&request).map_err(|err| {
            Error::because(
                ErrorType::InternalError,
                format!("failed resolving path {}", request.cleaned),
                err,
            )
        })?;
        let Some((mount, target)) = resolved else {
            debug!("No mount for path {}", request.cleaned);
            return Ok(RequestFilterResult::Unhandled);
        };

        if target.kind == TargetKind::NotFound {
            return Ok(RequestFilterResult::Unhandled);
        }

        match session.req_header().method {
            Method::GET | Method::HEAD => {
                // Allowed
            }
            _ => {
                warn!("Denying method {}", session.req_header().method);
                error_response(session, StatusCode::METHOD_NOT_ALLOWED).await?;
                return Ok(RequestFilterResult::ResponseSent);
            }
        }

        match target.kind {
            TargetKind::File => {
                debug!("Serving file {:?}", target.real_path);
                self.serve_file(session, &target.real_path).await?;
            }
            TargetKind::Directory => {
                if let Some(location) = &target.redirect {
                    info!("Redirecting to directory URI {location}");
                    redirect_response(session, StatusCode::MOVED_PERMANENTLY, location).await?;
                } else if let Some(index) = self.find_index_file(&target.real_path) {
                    debug!("Using directory index file {index:?}");
                    self.serve_file(session, &index).await?;
                } else {
                    debug!("Listing directory {:?}", target.real_path);
                    self.serve_listing(session, &target, mount.archive_enabled)
                        .await?;
                }
            }
            TargetKind::VirtualArchive => {
                debug!("Archiving directory {:?}", target.real_path);
                self.serve_archive(session, &target).await?;
            }
            TargetKind::NotFound => return Ok(RequestFilterResult::Unhandled),
        }

        Ok(RequestFilterResult::ResponseSent)
    }
}
