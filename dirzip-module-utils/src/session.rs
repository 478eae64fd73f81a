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

//! HTTP session handling
//!
//! A [`Session`] is what request filters work with: it gives access to the request header and
//! accepts the response. For connections accepted by the server, the response is handed over to
//! hyper via [`PendingResponse`] as soon as the header is written, the body is then streamed
//! through a bounded channel. Sessions created via [`create_test_session`] capture the response
//! body instead.

use bytes::{Bytes, BytesMut};
use http::header::{self, HeaderValue};
use http::response::Parts;
use http::{Response, StatusCode, Uri};
use hyper::body::{Body, Frame, SizeHint};
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, ErrorType};

pub use pingora_http::{RequestHeader, ResponseHeader};

/// Number of body chunks that can be queued before the producer has to wait for the client
const BODY_CHANNEL_CAPACITY: usize = 8;

type BodyChunk = Result<Bytes, std::io::Error>;

#[derive(Debug)]
enum ResponseSink {
    Channel {
        header: Option<oneshot::Sender<Parts>>,
        body: Option<mpsc::Sender<BodyChunk>>,
    },
    Capture(BytesMut),
}

/// The state of a single request
#[derive(Debug)]
pub struct Session {
    req_header: RequestHeader,
    client_addr: Option<SocketAddr>,
    response_header: Option<ResponseHeader>,
    body_bytes: usize,
    aborted: bool,
    sink: ResponseSink,
}

impl Session {
    /// Creates a session for a request received from a client. The response will become available
    /// via the returned [`PendingResponse`].
    pub fn new(req_header: RequestHeader, client_addr: Option<SocketAddr>) -> (Self, PendingResponse) {
        let (header_sender, header_receiver) = oneshot::channel();
        let (body_sender, body_receiver) = mpsc::channel(BODY_CHANNEL_CAPACITY);
        let session = Self {
            req_header,
            client_addr,
            response_header: None,
            body_bytes: 0,
            aborted: false,
            sink: ResponseSink::Channel {
                header: Some(header_sender),
                body: Some(body_sender),
            },
        };
        let pending = PendingResponse {
            header: header_receiver,
            body: ResponseBody {
                receiver: Some(body_receiver),
            },
        };
        (session, pending)
    }

    /// Returns the request header.
    pub fn req_header(&self) -> &RequestHeader {
        &self.req_header
    }

    /// Returns the request header for modification.
    pub fn req_header_mut(&mut self) -> &mut RequestHeader {
        &mut self.req_header
    }

    /// Returns the request URI.
    pub fn uri(&self) -> &Uri {
        &self.req_header.uri
    }

    /// Returns the client (peer) address of the connection if known.
    pub fn client_addr(&self) -> Option<&SocketAddr> {
        self.client_addr.as_ref()
    }

    /// Returns the response header if one has been written already.
    pub fn response_written(&self) -> Option<&ResponseHeader> {
        self.response_header.as_ref()
    }

    /// Number of response body bytes written so far
    pub fn body_bytes_sent(&self) -> usize {
        self.body_bytes
    }

    /// Returns `true` if the response was aborted after the header had been sent.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Returns the response body captured by a test session. This is always empty for sessions
    /// connected to a client.
    pub fn captured_body(&self) -> &[u8] {
        match &self.sink {
            ResponseSink::Capture(body) => body,
            ResponseSink::Channel { .. } => &[],
        }
    }

    /// Sends the response header. If `end_of_stream` is set, the response is complete and no body
    /// will follow.
    pub async fn write_response_header(
        &mut self,
        resp: Box<ResponseHeader>,
        end_of_stream: bool,
    ) -> Result<(), Box<Error>> {
        if self.response_header.is_some() {
            return Err(Error::explain(
                ErrorType::InternalError,
                "response header already sent",
            ));
        }

        if let ResponseSink::Channel { header, body } = &mut self.sink {
            let sender = header.take().ok_or_else(|| {
                Error::explain(ErrorType::InternalError, "response header already sent")
            })?;
            sender.send(resp.as_owned_parts()).map_err(|_| {
                Error::explain(ErrorType::WriteError, "connection closed before response")
            })?;
            if end_of_stream {
                body.take();
            }
        }

        self.response_header = Some(*resp);
        Ok(())
    }

    /// Sends a chunk of the response body. If `end_of_stream` is set, the response is complete.
    pub async fn write_response_body(
        &mut self,
        data: Option<Bytes>,
        end_of_stream: bool,
    ) -> Result<(), Box<Error>> {
        if self.response_header.is_none() {
            return Err(Error::explain(
                ErrorType::InternalError,
                "response body written before response header",
            ));
        }

        if let Some(data) = data.filter(|data| !data.is_empty()) {
            self.body_bytes += data.len();
            match &mut self.sink {
                ResponseSink::Channel { body, .. } => {
                    let sender = body.as_ref().ok_or_else(|| {
                        Error::explain(ErrorType::InternalError, "response body already complete")
                    })?;
                    sender.send(Ok(data)).await.map_err(|_| {
                        Error::explain(ErrorType::WriteError, "client closed the connection")
                    })?;
                }
                ResponseSink::Capture(body) => body.extend_from_slice(&data),
            }
        }

        if end_of_stream {
            if let ResponseSink::Channel { body, .. } = &mut self.sink {
                body.take();
            }
        }
        Ok(())
    }

    /// Terminates a response that cannot be completed. The client will see the connection closed
    /// before the end of the response body.
    pub async fn abort_response(&mut self, reason: &str) {
        self.aborted = true;
        if let ResponseSink::Channel { header, body } = &mut self.sink {
            header.take();
            if let Some(sender) = body.take() {
                let _ = sender.send(Err(std::io::Error::other(reason.to_owned()))).await;
            }
        }
    }
}

/// Creates a new session for tests with given request header. The response body is captured and
/// can be retrieved via [`Session::captured_body`].
pub fn create_test_session(header: RequestHeader) -> Session {
    Session {
        req_header: header,
        client_addr: None,
        response_header: None,
        body_bytes: 0,
        aborted: false,
        sink: ResponseSink::Capture(BytesMut::new()),
    }
}

/// The receiving end of a session's response
#[derive(Debug)]
pub struct PendingResponse {
    header: oneshot::Receiver<Parts>,
    body: ResponseBody,
}

impl PendingResponse {
    /// Waits for the response header to be written. A session dropped without writing a response
    /// results in `500 Internal Server Error`.
    pub async fn into_response(self) -> Response<ResponseBody> {
        match self.header.await {
            Ok(parts) => Response::from_parts(parts, self.body),
            Err(_) => {
                let mut response = Response::new(ResponseBody::empty());
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                response
                    .headers_mut()
                    .insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
                response
            }
        }
    }
}

/// Streamed response body, fed by [`Session::write_response_body`]
#[derive(Debug)]
pub struct ResponseBody {
    receiver: Option<mpsc::Receiver<BodyChunk>>,
}

impl ResponseBody {
    /// Creates an empty response body.
    pub fn empty() -> Self {
        Self { receiver: None }
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = std::io::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Poll::Ready(None);
        };

        match receiver.poll_recv(cx) {
            Poll::Ready(Some(Ok(data))) => Poll::Ready(Some(Ok(Frame::data(data)))),
            Poll::Ready(Some(Err(err))) => {
                self.receiver = None;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                self.receiver = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.receiver.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        if self.receiver.is_none() {
            SizeHint::with_exact(0)
        } else {
            SizeHint::default()
        }
    }
}
