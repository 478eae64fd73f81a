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

//! Writing files to the session

use bytes::BytesMut;
use dirzip_module_utils::session::{ResponseHeader, Session};
use dirzip_module_utils::{Error, ErrorType};
use std::cmp::min;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

pub(crate) const BUFFER_SIZE: usize = 64 * 1024;

/// Sends the response header followed by the inclusive byte range `start..=end` of a file. The
/// file is opened before the header is sent, so failing to open it still produces an error
/// response. With `body` unset (`HEAD` requests, empty files) only the header is sent.
pub(crate) async fn file_response(
    session: &mut Session,
    path: &Path,
    header: Box<ResponseHeader>,
    body: Option<(u64, u64)>,
) -> Result<(), Box<Error>> {
    let Some((start, end)) = body else {
        session.write_response_header(header, true).await?;
        return Ok(());
    };

    let mut file = File::open(path).map_err(|err| {
        Error::because(
            ErrorType::FileOpenError,
            format!("failed opening file {path:?}"),
            err,
        )
    })?;

    if start != 0 {
        file.seek(SeekFrom::Start(start)).map_err(|err| {
            Error::because(
                ErrorType::FileReadError,
                format!("failed seeking in file {path:?}"),
                err,
            )
        })?;
    }

    session.write_response_header(header, false).await?;

    let mut remaining = end - start + 1;
    while remaining > 0 {
        let mut buf = BytesMut::zeroed(min(remaining, BUFFER_SIZE as u64) as usize);
        let len = file.read(buf.as_mut()).map_err(|err| {
            Error::because(
                ErrorType::FileReadError,
                format!("failed reading data from {path:?}"),
                err,
            )
        })?;

        if len == 0 {
            return Err(Error::explain(
                ErrorType::FileReadError,
                format!("file {path:?} ended with {remaining} bytes left to be written"),
            ));
        }

        buf.truncate(len);
        remaining -= len as u64;
        session
            .write_response_body(Some(buf.freeze()), remaining == 0)
            .await?;
    }

    Ok(())
}
