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

//! # DirZip server
//!
//! Exports local directories via HTTP. Files are downloaded, directories produce HTML listings and
//! `<dir>.zip` produces a ZIP archive of the directory, generated while it is being downloaded.
//!
//! Mounts are configured via a YAML configuration file (`--conf`) or the command line:
//!
//! ```sh
//! dirzip-server --listen 127.0.0.1:8080 --mount /files=/srv/files --mount /photos=/srv/photos:nodirzip
//! ```
//!
//! The equivalent configuration file:
//!
//! ```yaml
//! listen:
//! - 127.0.0.1:8080
//! mounts:
//!     /files: /srv/files
//!     /photos: /srv/photos:nodirzip
//! sandbox: best-effort
//! ```
//!
//! Command line flags take precedence over configuration file settings. Log verbosity is
//! controlled via the `RUST_LOG` environment variable.

mod sandbox;

use clap::Parser;
use dirzip_module::{DirZipConf, DirZipHandler, DirZipOpt};
use dirzip_module_utils::{Error, FromYaml, CONFIG_ERROR};
use log::error;
use serde::Deserialize;
use startup_module::{DefaultApp, StartupConf, StartupOpt};
use std::process::ExitCode;

use crate::sandbox::{SandboxMode, SandboxOpt};

/// Export directories via HTTP, with directory listings and directories downloadable as ZIP
/// archives
#[derive(Debug, Parser)]
struct Opt {
    #[clap(flatten)]
    startup: StartupOpt,
    #[clap(flatten)]
    dirzip: DirZipOpt,
    #[clap(flatten)]
    sandbox: SandboxOpt,
}

/// The configuration file settings
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Conf {
    #[serde(flatten)]
    startup: StartupConf,
    #[serde(flatten)]
    dirzip: DirZipConf,
    sandbox: SandboxMode,
}

fn run(opt: Opt) -> Result<(), Box<Error>> {
    let mut conf = match &opt.startup.conf {
        Some(path) => Conf::load_from_yaml(path)?,
        None => Conf::default(),
    };
    conf.dirzip.merge_with_opt(opt.dirzip);
    if let Some(sandbox) = opt.sandbox.sandbox {
        conf.sandbox = sandbox;
    }

    let handler = DirZipHandler::try_from(conf.dirzip)?;
    let roots = handler
        .mounts()
        .mounts()
        .map(|mount| mount.root.clone())
        .collect::<Vec<_>>();

    let test = opt.startup.test;
    let server = conf
        .startup
        .into_server(DefaultApp::new(handler), Some(opt.startup))?;

    if !test {
        sandbox::restrict(conf.sandbox, &roots).map_err(|err| {
            Error::because(CONFIG_ERROR, "failed enabling sandbox", err)
        })?;
    }

    server.run_forever()
}

fn main() -> ExitCode {
    env_logger::init();

    match run(Opt::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
