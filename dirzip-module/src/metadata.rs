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

//! File metadata and the response headers derived from it

use dirzip_module_utils::session::{ResponseHeader, Session};
use dirzip_module_utils::Error;
use http::{header, status::StatusCode};
use httpdate::fmt_http_date;
use mime_guess::mime;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use crate::path::ARCHIVE_SUFFIX;

/// Metadata of a file about to be served
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Value of the `Content-Type` header
    pub content_type: String,
    /// File size in bytes
    pub size: u64,
    /// Last modified time of the file in the format `Fri, 15 May 2015 15:34:21 GMT` if the time
    /// can be retrieved
    pub modified: Option<String>,
    /// ETag header for the file, encoding last modified time and file size
    pub etag: String,
    /// Value of the `Content-Disposition` header if the file should be downloaded
    pub disposition: Option<String>,
}

/// Produces a `Content-Disposition` value offering the file for download under the given name.
pub(crate) fn attachment(name: &str) -> String {
    let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
    format!("attachment; filename=\"{escaped}\"")
}

fn content_type(path: &Path) -> String {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if mime.type_() == mime::TEXT && mime.get_param(mime::CHARSET).is_none() {
        format!("{mime}; charset=utf-8")
    } else {
        mime.to_string()
    }
}

impl Metadata {
    /// Collects the metadata for a regular file.
    ///
    /// This method will return any errors produced by [`std::fs::symlink_metadata()`]. It will
    /// also result in an [`io::ErrorKind::InvalidInput`] error if the path doesn’t point to a
    /// regular file.
    pub fn from_path(path: &Path) -> Result<Self, io::Error> {
        let meta = path.symlink_metadata()?;
        if !meta.is_file() {
            return Err(io::ErrorKind::InvalidInput.into());
        }

        let modified = meta.modified().ok();
        let etag = format!(
            "\"{:x}-{:x}\"",
            modified
                .and_then(|modified| modified.duration_since(SystemTime::UNIX_EPOCH).ok())
                .map_or(0, |duration| duration.as_secs()),
            meta.len()
        );

        let disposition = path
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| name.ends_with(ARCHIVE_SUFFIX))
            .map(attachment);

        Ok(Self {
            content_type: content_type(path),
            size: meta.len(),
            modified: modified.map(fmt_http_date),
            etag,
            disposition,
        })
    }

    /// Checks `If-Match` and `If-Unmodified-Since` headers of the request to determine whether
    /// a `412 Precondition Failed` response should be produced.
    pub fn has_failed_precondition(&self, session: &Session) -> bool {
        let headers = &session.req_header().headers;
        if let Some(value) = headers
            .get(header::IF_MATCH)
            .and_then(|value| value.to_str().ok())
        {
            value != "*"
                && value
                    .split(',')
                    .map(str::trim)
                    .all(|value| value != self.etag)
        } else if let Some(value) = headers
            .get(header::IF_UNMODIFIED_SINCE)
            .and_then(|value| value.to_str().ok())
        {
            self.modified
                .as_ref()
                .is_some_and(|modified| modified != value)
        } else {
            false
        }
    }

    /// Checks `If-None-Match` and `If-Modified-Since` headers of the request to determine whether
    /// a `304 Not Modified` response should be produced.
    pub fn is_not_modified(&self, session: &Session) -> bool {
        let headers = &session.req_header().headers;
        if let Some(value) = headers
            .get(header::IF_NONE_MATCH)
            .and_then(|value| value.to_str().ok())
        {
            value == "*"
                || value
                    .split(',')
                    .map(str::trim)
                    .any(|value| value == self.etag)
        } else if let Some(value) = headers
            .get(header::IF_MODIFIED_SINCE)
            .and_then(|value| value.to_str().ok())
        {
            self.modified
                .as_ref()
                .is_some_and(|modified| modified == value)
        } else {
            false
        }
    }

    fn add_common_headers(&self, header: &mut ResponseHeader) -> Result<(), Box<Error>> {
        header.append_header(header::CONTENT_TYPE, &self.content_type)?;
        if let Some(modified) = &self.modified {
            header.append_header(header::LAST_MODIFIED, modified)?;
        }
        header.append_header(header::ETAG, &self.etag)?;
        if let Some(disposition) = &self.disposition {
            header.append_header(header::CONTENT_DISPOSITION, disposition)?;
        }
        Ok(())
    }

    /// Produces a `200 OK` response and adds headers according to file metadata.
    pub(crate) fn to_response_header(&self) -> Result<Box<ResponseHeader>, Box<Error>> {
        let mut header = ResponseHeader::build(StatusCode::OK, Some(8))?;
        header.append_header(header::CONTENT_LENGTH, self.size.to_string())?;
        header.append_header(header::ACCEPT_RANGES, "bytes")?;
        self.add_common_headers(&mut header)?;
        Ok(Box::new(header))
    }

    /// Produces a `206 Partial Content` response for the inclusive byte range.
    pub(crate) fn to_partial_content_header(
        &self,
        start: u64,
        end: u64,
    ) -> Result<Box<ResponseHeader>, Box<Error>> {
        let mut header = ResponseHeader::build(StatusCode::PARTIAL_CONTENT, Some(8))?;
        header.append_header(header::CONTENT_LENGTH, (end - start + 1).to_string())?;
        header.append_header(
            header::CONTENT_RANGE,
            format!("bytes {start}-{end}/{}", self.size),
        )?;
        self.add_common_headers(&mut header)?;
        Ok(Box::new(header))
    }

    /// Produces a `416 Range Not Satisfiable` response, it carries no response body.
    pub(crate) fn to_not_satisfiable_header(&self) -> Result<Box<ResponseHeader>, Box<Error>> {
        let mut header = ResponseHeader::build(StatusCode::RANGE_NOT_SATISFIABLE, Some(2))?;
        header.append_header(header::CONTENT_RANGE, format!("bytes */{}", self.size))?;
        header.append_header(header::CONTENT_LENGTH, "0")?;
        Ok(Box::new(header))
    }

    /// Produces a response with specified status code and no response body (all headers added
    /// except `Content-Length`).
    pub(crate) fn to_custom_header(
        &self,
        status: StatusCode,
    ) -> Result<Box<ResponseHeader>, Box<Error>> {
        let mut header = ResponseHeader::build(status, Some(4))?;
        self.add_common_headers(&mut header)?;
        Ok(Box::new(header))
    }
}
