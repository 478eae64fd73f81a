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

//! Mount configuration: URL prefixes mapped to directories
//!
//! A mount is defined by a URL prefix and a definition string of the form `root[:opt1,opt2]`.
//! Recognized options are `noautoindex` (directory requests are not served) and `nodirzip` (no
//! archives are produced for directories).

use dirzip_module_utils::router::Router;
use log::debug;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use crate::path::{clean_path, resolve_path, RequestPath, ResolveError, ResolvedTarget};

const OPTION_NO_AUTOINDEX: &str = "noautoindex";
const OPTION_NO_ARCHIVE: &str = "nodirzip";

/// Mount configuration errors
#[derive(Debug, thiserror::Error)]
pub enum MountError {
    /// No mounts configured at all
    #[error("no mounts configured")]
    NoMounts,
    /// Prefix not starting with a slash
    #[error("mount prefix {prefix:?} has to start with a slash")]
    InvalidPrefix {
        /// Configured prefix
        prefix: String,
    },
    /// Empty option, e.g. `root:` or `root:a,,b`
    #[error("mount {prefix:?} has an empty option")]
    EmptyOption {
        /// Configured prefix
        prefix: String,
    },
    /// Unrecognized option
    #[error("mount {prefix:?} has unknown option {option:?}")]
    UnknownOption {
        /// Configured prefix
        prefix: String,
        /// The option
        option: String,
    },
    /// Root directory cannot be accessed
    #[error("root {root:?} of mount {prefix:?} is inaccessible")]
    InaccessibleRoot {
        /// Configured prefix
        prefix: String,
        /// Configured root
        root: PathBuf,
        /// Error canonicalizing the root
        #[source]
        source: io::Error,
    },
    /// Root is not a directory
    #[error("root {root:?} of mount {prefix:?} is not a directory")]
    NotADirectory {
        /// Configured prefix
        prefix: String,
        /// Configured root
        root: PathBuf,
    },
    /// Two configured prefixes are identical after cleaning
    #[error("mount prefixes {first:?} and {second:?} both resolve to {prefix:?}")]
    DuplicatePrefix {
        /// Prefix configured first
        first: String,
        /// Prefix configured second
        second: String,
        /// Cleaned prefix
        prefix: String,
    },
}

/// A directory exported under a URL prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// URL prefix, cleaned
    pub prefix: String,
    /// Canonical path of the root directory
    pub root: PathBuf,
    /// Whether directory requests are served
    pub autoindex: bool,
    /// Whether `<dir>.zip` requests produce an archive of the directory
    pub archive_enabled: bool,
}

impl Mount {
    /// Parses a mount definition like `/srv/data:noautoindex,nodirzip` for the given prefix. The
    /// root directory has to exist.
    pub fn parse(prefix: &str, definition: &str) -> Result<Self, MountError> {
        if !prefix.starts_with('/') {
            return Err(MountError::InvalidPrefix {
                prefix: prefix.to_owned(),
            });
        }

        let (root, options) = match definition.split_once(':') {
            Some((root, options)) => (root, Some(options)),
            None => (definition, None),
        };

        let mut autoindex = true;
        let mut archive_enabled = true;
        for option in options.into_iter().flat_map(|options| options.split(',')) {
            match option {
                OPTION_NO_AUTOINDEX => autoindex = false,
                OPTION_NO_ARCHIVE => archive_enabled = false,
                "" => {
                    return Err(MountError::EmptyOption {
                        prefix: prefix.to_owned(),
                    })
                }
                other => {
                    return Err(MountError::UnknownOption {
                        prefix: prefix.to_owned(),
                        option: other.to_owned(),
                    })
                }
            }
        }

        let root = Path::new(root);
        let canonical = root
            .canonicalize()
            .map_err(|source| MountError::InaccessibleRoot {
                prefix: prefix.to_owned(),
                root: root.to_owned(),
                source,
            })?;
        if !canonical.is_dir() {
            return Err(MountError::NotADirectory {
                prefix: prefix.to_owned(),
                root: root.to_owned(),
            });
        }

        Ok(Self {
            prefix: clean_path(prefix),
            root: canonical,
            autoindex,
            archive_enabled,
        })
    }
}

/// All configured mounts
#[derive(Debug)]
pub struct MountTable {
    router: Router<Mount>,
}

impl MountTable {
    /// Creates the mount table from pairs of prefix and definition. Either all mounts are valid or
    /// an error is returned.
    pub fn from_definitions<I, K, V>(definitions: I) -> Result<Self, MountError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut definitions = definitions.into_iter().collect::<Vec<_>>();
        definitions.sort_by(|(a, _), (b, _)| a.as_ref().cmp(b.as_ref()));

        let mut configured = HashMap::new();
        let mut builder = Router::builder();
        for (prefix, definition) in &definitions {
            let mount = Mount::parse(prefix.as_ref(), definition.as_ref())?;
            if let Some(first) = configured.insert(mount.prefix.clone(), prefix.as_ref()) {
                return Err(MountError::DuplicatePrefix {
                    first: first.to_owned(),
                    second: prefix.as_ref().to_owned(),
                    prefix: mount.prefix,
                });
            }

            debug!(
                "Mounting {:?} at {} (autoindex: {}, archives: {})",
                mount.root, mount.prefix, mount.autoindex, mount.archive_enabled
            );
            let cleaned = mount.prefix.clone();
            builder.push(&cleaned, mount);
        }

        if configured.is_empty() {
            return Err(MountError::NoMounts);
        }

        Ok(Self {
            router: builder.build(),
        })
    }

    /// Finds the mount owning the given cleaned path. Returns the mount along with the path
    /// relative to the mount prefix.
    pub fn lookup<'a>(&self, path: &'a str) -> Option<(&Mount, &'a str)> {
        self.router.lookup(path)
    }

    /// Resolves a request path. Returns `None` if no mount owns the path.
    pub fn resolve(
        &self,
        request: &RequestPath,
    ) -> Result<Option<(&Mount, ResolvedTarget)>, ResolveError> {
        let Some((mount, relative)) = self.lookup(&request.cleaned) else {
            return Ok(None);
        };
        let target = resolve_path(mount, request, relative)?;
        Ok(Some((mount, target)))
    }

    /// Iterates over all mounts.
    pub fn mounts(&self) -> impl Iterator<Item = &Mount> {
        self.router.values()
    }

    /// Number of mounts
    pub fn len(&self) -> usize {
        self.router.len()
    }

    /// Returns `true` if there are no mounts, which cannot happen for a successfully created
    /// table.
    pub fn is_empty(&self) -> bool {
        self.router.is_empty()
    }
}
