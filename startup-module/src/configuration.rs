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

use clap::Parser;
use dirzip_module_utils::{Error, RequestFilter, CONFIG_ERROR};
use serde::Deserialize;
use std::net::SocketAddr;

use crate::server::Server;
use crate::DefaultApp;

/// Address used if no listening address is configured
pub const DEFAULT_LISTEN: &str = "127.0.0.1:10666";

/// Run a directory export server
#[derive(Debug, Default, Parser)]
pub struct StartupOpt {
    /// Address and port to listen on, e.g. "127.0.0.1:8080". This command line flag can be
    /// specified multiple times.
    #[clap(short, long)]
    pub listen: Option<Vec<String>>,
    /// Test the configuration and exit. This is useful to validate the configuration before
    /// restarting the process.
    #[clap(short, long)]
    pub test: bool,
    /// The path to the configuration file.
    #[clap(short, long)]
    pub conf: Option<String>,
}

/// Configuration settings of the startup module
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StartupConf {
    /// List of address/port combinations to listen on, e.g. "127.0.0.1:8080".
    pub listen: Vec<String>,
}

impl StartupConf {
    /// Sets up a server with the given configuration and command line options. Command line
    /// options take precedence over configuration file settings.
    pub fn into_server<H>(
        self,
        app: DefaultApp<H>,
        opt: Option<StartupOpt>,
    ) -> Result<Server<H>, Box<Error>>
    where
        H: RequestFilter + Send + Sync + 'static,
    {
        let opt = opt.unwrap_or_default();

        let mut listen = opt.listen.unwrap_or(self.listen);
        if listen.is_empty() {
            listen.push(DEFAULT_LISTEN.to_owned());
        }

        let addrs = listen
            .iter()
            .map(|addr| {
                addr.parse::<SocketAddr>().map_err(|err| {
                    Error::because(
                        CONFIG_ERROR,
                        format!("invalid listening address {addr:?}"),
                        err,
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Server::new(app, addrs, opt.test))
    }
}
