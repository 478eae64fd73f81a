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

//! # Startup module
//!
//! This crate dispatches requests to a [`RequestFilter`] and runs the HTTP server loop. The
//! [`DefaultApp`] takes care of the parts common to all requests: producing `404 Not Found` for
//! unhandled requests, turning errors into error responses (or aborting responses already under
//! way) and logging one line per request.
//!
//! ```rust,no_run
//! use clap::Parser;
//! use dirzip_module_utils::FromYaml;
//! use startup_module::{DefaultApp, StartupConf, StartupOpt};
//! # use async_trait::async_trait;
//! # use dirzip_module_utils::{Error, RequestFilter, RequestFilterResult};
//! # use dirzip_module_utils::session::Session;
//! # #[derive(Debug)]
//! # struct MyHandler;
//! # #[async_trait]
//! # impl RequestFilter for MyHandler {
//! #     type Conf = ();
//! #     async fn request_filter(&self, _: &mut Session) -> Result<RequestFilterResult, Box<Error>> {
//! #         Ok(RequestFilterResult::Unhandled)
//! #     }
//! # }
//!
//! let opt = StartupOpt::parse();
//! let conf = match &opt.conf {
//!     Some(path) => StartupConf::load_from_yaml(path).unwrap(),
//!     None => StartupConf::default(),
//! };
//!
//! let app = DefaultApp::new(MyHandler);
//! let server = conf.into_server(app, Some(opt)).unwrap();
//! server.run_forever().unwrap();
//! ```

mod configuration;
mod server;

pub use configuration::{StartupConf, StartupOpt, DEFAULT_LISTEN};
pub use server::Server;

use bytes::BytesMut;
use dirzip_module_utils::session::Session;
use dirzip_module_utils::standard_response::error_response;
use dirzip_module_utils::{error_status, Error, ErrorType, RequestFilter, RequestFilterResult};
use log::{error, info, warn};
use std::borrow::Cow;

/// Result of a test execution of the app
#[derive(Debug)]
pub struct AppResult {
    session: Session,
    err: Option<Box<Error>>,
    body: BytesMut,
}

impl AppResult {
    /// Produces the resulting session state of the request
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Retrieves the error if any
    pub fn err(&self) -> &Option<Box<Error>> {
        &self.err
    }

    /// Retrieves the response body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Retrieves the response body as string
    pub fn body_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Dispatches requests to a [`RequestFilter`], to be passed to [`StartupConf::into_server`]
#[derive(Debug)]
pub struct DefaultApp<H> {
    handler: H,
}

impl<H> DefaultApp<H> {
    /// Creates a new app from a [`RequestFilter`] instance.
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    /// Creates a new app from a [`RequestFilter`] configuration.
    ///
    /// Any errors occurring when converting configuration to handler will be passed on.
    pub fn from_conf<C>(conf: C) -> Result<Self, Box<Error>>
    where
        H: RequestFilter<Conf = C> + TryFrom<C, Error = Box<Error>>,
    {
        Ok(Self::new(conf.try_into()?))
    }

    /// Provides access to the request handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Processes a request to completion. Errors are handled here already, they are only returned
    /// for informational purposes.
    pub async fn process(&self, session: &mut Session) -> Result<(), Box<Error>>
    where
        H: RequestFilter + Sync,
    {
        let result = match self.handler.request_filter(session).await {
            Ok(RequestFilterResult::ResponseSent) => Ok(()),
            Ok(RequestFilterResult::Unhandled) => Err(Error::new(ErrorType::HTTPStatus(404))),
            Err(err) => Err(err),
        };

        if let Err(err) = &result {
            Self::handle_error(session, err).await;
        }
        Self::log_request(session);

        result
    }

    async fn handle_error(session: &mut Session, err: &Error) {
        match err.etype {
            ErrorType::HTTPStatus(_) => {}
            _ => error!(
                "failed processing request for {}: {err}",
                session.uri().path()
            ),
        }

        if session.response_written().is_none() {
            if let Err(err) = error_response(session, error_status(&err.etype)).await {
                warn!("failed sending error response: {err}");
            }
        } else {
            session.abort_response(err.etype.as_str()).await;
        }
    }

    fn log_request(session: &Session) {
        let client = session
            .client_addr()
            .map_or_else(|| "-".to_owned(), ToString::to_string);
        let status = session
            .response_written()
            .map_or(0, |header| header.status.as_u16());
        let request = session.req_header();
        info!(
            "{client} \"{} {}\" {status} {}{}",
            request.method,
            request.uri,
            session.body_bytes_sent(),
            if session.is_aborted() { " aborted" } else { "" }
        );
    }

    /// Handles a request like the server would do it.
    ///
    /// This method is meant for testing, the session should be created with
    /// [`create_test_session`](dirzip_module_utils::session::create_test_session).
    pub async fn handle_request(&self, mut session: Session) -> AppResult
    where
        H: RequestFilter + Sync,
    {
        let err = self.process(&mut session).await.err();
        let body = BytesMut::from(session.captured_body());
        AppResult { session, err, body }
    }
}
