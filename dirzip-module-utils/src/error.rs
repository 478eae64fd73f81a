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

//! Error classification shared by request filters and the server loop.
//!
//! The error type itself is [`pingora_error::Error`], always handled as `Box<Error>`. This module
//! adds the error types specific to the directory export server and maps errors to the status
//! code of the error response.

use http::StatusCode;

pub use pingora_error::{Error, ErrorType};

/// Invalid configuration, fatal at startup
pub const CONFIG_ERROR: ErrorType = ErrorType::Custom("ConfigError");

/// Producing a streamed response body failed after the response header was sent
pub const STREAMING_FAILURE: ErrorType = ErrorType::Custom("StreamingFailure");

/// The status code of the response to be produced for an error, provided that no response header
/// has been sent yet.
pub fn error_status(etype: &ErrorType) -> StatusCode {
    match etype {
        ErrorType::HTTPStatus(code) => {
            StatusCode::from_u16(*code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
