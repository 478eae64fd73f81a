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

//! The HTTP server loop

use dirzip_module_utils::session::{ResponseBody, Session};
use dirzip_module_utils::{Error, ErrorType, RequestFilter};
use http::{Request, Response};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use log::{debug, info, warn};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::runtime::Builder;

use crate::DefaultApp;

/// A configured server, produced by [`StartupConf::into_server`](crate::StartupConf::into_server)
#[derive(Debug)]
pub struct Server<H> {
    app: Arc<DefaultApp<H>>,
    listen: Vec<SocketAddr>,
    test: bool,
}

impl<H> Server<H>
where
    H: RequestFilter + Send + Sync + 'static,
{
    pub(crate) fn new(app: DefaultApp<H>, listen: Vec<SocketAddr>, test: bool) -> Self {
        Self {
            app: Arc::new(app),
            listen,
            test,
        }
    }

    /// Addresses the server will listen on
    pub fn listen_addrs(&self) -> &[SocketAddr] {
        &self.listen
    }

    /// Starts the runtime and serves requests until the process is terminated. In test mode this
    /// returns immediately.
    pub fn run_forever(self) -> Result<(), Box<Error>> {
        if self.test {
            info!("Configuration test successful");
            return Ok(());
        }

        let runtime = Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| {
                Error::because(ErrorType::InternalError, "failed creating runtime", err)
            })?;
        runtime.block_on(self.serve())
    }

    async fn serve(self) -> Result<(), Box<Error>> {
        let mut listeners = Vec::with_capacity(self.listen.len());
        for addr in &self.listen {
            let listener = TcpListener::bind(addr).await.map_err(|err| {
                Error::because(ErrorType::BindError, format!("failed binding {addr}"), err)
            })?;
            info!("Listening on {addr}");
            listeners.push(listener);
        }

        let tasks = listeners
            .into_iter()
            .map(|listener| tokio::spawn(accept_loop(listener, self.app.clone())))
            .collect::<Vec<_>>();
        for task in tasks {
            task.await.map_err(|err| {
                Error::because(ErrorType::InternalError, "listener task failed", err)
            })?;
        }
        Ok(())
    }
}

async fn accept_loop<H>(listener: TcpListener, app: Arc<DefaultApp<H>>)
where
    H: RequestFilter + Send + Sync + 'static,
{
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(connection) => connection,
            Err(err) => {
                warn!("Failed accepting connection: {err}");
                continue;
            }
        };

        let app = app.clone();
        tokio::spawn(async move {
            let service = service_fn(move |request| respond(app.clone(), request, peer));
            if let Err(err) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("Connection from {peer} terminated: {err}");
            }
        });
    }
}

/// Runs the request in its own task, the response is returned as soon as its header is known.
async fn respond<H>(
    app: Arc<DefaultApp<H>>,
    request: Request<Incoming>,
    peer: SocketAddr,
) -> Result<Response<ResponseBody>, Infallible>
where
    H: RequestFilter + Send + Sync + 'static,
{
    let (parts, _) = request.into_parts();
    let (mut session, pending) = Session::new(parts.into(), Some(peer));
    tokio::spawn(async move {
        let _ = app.process(&mut session).await;
    });
    Ok(pending.into_response().await)
}
