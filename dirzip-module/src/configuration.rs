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

//! Data structures required for `DirZipHandler` configuration

use clap::Parser;
use serde::Deserialize;
use std::collections::BTreeMap;

fn parse_mount_arg(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((prefix, definition)) if !prefix.is_empty() => {
            Ok((prefix.to_owned(), definition.to_owned()))
        }
        _ => Err(format!(
            "expected PREFIX=ROOT[:OPTIONS], e.g. /files=/srv/files:nodirzip, got {value:?}"
        )),
    }
}

/// Command line options of the directory export module
#[derive(Debug, Default, Parser)]
pub struct DirZipOpt {
    /// Directory to export, e.g. /files=/srv/files or /files=/srv/files:noautoindex,nodirzip.
    /// Option noautoindex disables directory listings, nodirzip disables ZIP archives of
    /// directories. This command line flag can be specified multiple times.
    #[clap(short, long, value_parser = parse_mount_arg)]
    pub mount: Option<Vec<(String, String)>>,

    /// Index file to look for when displaying a directory. This command line flag can be specified
    /// multiple times.
    #[clap(long)]
    pub index_file: Option<Vec<String>>,
}

/// Configuration file settings of the directory export module
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DirZipConf {
    /// Mapping of URL prefixes to directories, optionally followed by a colon and a
    /// comma-separated list of options: `noautoindex`, `nodirzip`.
    pub mounts: BTreeMap<String, String>,

    /// List of index files to look for in a directory. If one of these exists, it is served
    /// instead of the directory listing. Empty by default.
    pub index_file: Vec<String>,
}

impl DirZipConf {
    /// Merges the command line options into the current configuration. Mounts given on the
    /// command line are added to the configured ones and replace mounts with the same prefix.
    pub fn merge_with_opt(&mut self, opt: DirZipOpt) {
        if let Some(mounts) = opt.mount {
            self.mounts.extend(mounts);
        }

        if let Some(index_file) = opt.index_file {
            self.index_file = index_file;
        }
    }
}
