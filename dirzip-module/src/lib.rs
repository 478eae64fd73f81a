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

//! # Directory export module
//!
//! This crate exports local directories over HTTP. Each mount maps a URL prefix to a directory,
//! everything below that prefix is served from the directory:
//!
//! * Regular files are downloaded, with support for conditional requests (`If-Modified-Since`,
//!   `If-Unmodified-Since`, `If-Match`, `If-None-Match`) and single byte ranges (`Range`,
//!   `If-Range`).
//! * Directories produce an HTML listing, or their index file if index files are configured.
//!   Requesting a directory without the trailing slash results in a redirect.
//! * Requesting `<dir>.zip` where no such file exists but a directory `<dir>` does produces a ZIP
//!   archive of the directory, generated on the fly while it is being downloaded.
//!
//! Entries with names starting with a dot are hidden: they don’t show up in listings and
//! archives, and requesting them produces `404 Not Found`. Symbolic links are never followed.
//!
//! ## Configuration
//!
//! Mounts are defined as a mapping of URL prefixes to directories. The directory can be followed
//! by a colon and a comma-separated list of options: `noautoindex` disables directory listings,
//! `nodirzip` disables directory archives.
//!
//! ```yaml
//! mounts:
//!     /files: /srv/files
//!     /photos: /srv/photos:nodirzip
//!     /downloads: /srv/downloads:noautoindex
//! index_file:
//! - index.html
//! ```
//!
//! ## Code example
//!
//! ```rust,no_run
//! use clap::Parser;
//! use dirzip_module::{DirZipConf, DirZipHandler, DirZipOpt};
//! use startup_module::{DefaultApp, StartupConf, StartupOpt};
//!
//! #[derive(Debug, Parser)]
//! struct Opt {
//!     #[clap(flatten)]
//!     startup: StartupOpt,
//!     #[clap(flatten)]
//!     dirzip: DirZipOpt,
//! }
//!
//! let opt = Opt::parse();
//! let mut conf = DirZipConf::default();
//! conf.merge_with_opt(opt.dirzip);
//!
//! let app = DefaultApp::<DirZipHandler>::from_conf(conf).unwrap();
//! let server = StartupConf::default()
//!     .into_server(app, Some(opt.startup))
//!     .unwrap();
//! server.run_forever().unwrap();
//! ```

pub mod archive;
mod configuration;
mod file_writer;
mod handler;
pub mod listing;
pub mod metadata;
pub mod mount;
pub mod path;
pub mod range;
#[cfg(test)]
mod tests;

pub use configuration::{DirZipConf, DirZipOpt};
pub use handler::DirZipHandler;
