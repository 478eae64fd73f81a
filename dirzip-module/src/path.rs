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

//! Path resolution logic
//!
//! Request paths are decoded and cleaned lexically before anything touches the filesystem. The
//! part following the mount prefix is then joined onto the mount's root and classified via
//! `lstat`, so that symbolic links are never followed. Anything that cannot be served results in
//! [`TargetKind::NotFound`], regardless of whether it is missing, hidden or disabled.

use http::Uri;
use log::{debug, warn};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::ffi::OsStr;
use std::fs::{self, Metadata};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use crate::mount::Mount;

/// Characters escaped within a single path segment. A colon has to be escaped, otherwise a
/// relative link like `javascript:x` would be parsed as a URL with a scheme.
const SEGMENT_ESC_CHARSET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b':')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Suffix of the URLs producing a directory archive
pub const ARCHIVE_SUFFIX: &str = ".zip";

/// Collapses `.` and `..` segments and duplicate separators without accessing the filesystem. The
/// result always starts with a slash, it only ends with one if it is the root path. `..` segments
/// at the root are dropped.
pub fn clean_path(path: &str) -> String {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }

    if segments.is_empty() {
        return "/".to_owned();
    }

    let mut cleaned = String::with_capacity(path.len());
    for segment in segments {
        cleaned.push('/');
        cleaned.push_str(segment);
    }
    cleaned
}

/// Percent-encodes a single file name for use in a URI.
pub fn encode_segment(name: &str) -> String {
    utf8_percent_encode(name, SEGMENT_ESC_CHARSET).to_string()
}

/// Percent-encodes all segments of a path for use in a URI.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}

/// Checks whether a file name denotes a hidden entry.
pub fn is_hidden(name: impl AsRef<OsStr>) -> bool {
    name.as_ref().as_encoded_bytes().starts_with(b".")
}

/// Path and query of a request, decoded and cleaned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPath {
    /// Decoded path as produced by [`clean_path`]
    pub cleaned: String,
    /// Whether the decoded path ended with a slash
    pub trailing_slash: bool,
    /// Query string if any
    pub query: Option<String>,
}

impl RequestPath {
    /// Decodes the path of a request URI.
    ///
    /// Returns `None` if the path doesn't decode to valid UTF-8 or contains NUL characters, such
    /// paths never refer to anything that can be served.
    pub fn parse(uri: &Uri) -> Option<Self> {
        let decoded = percent_decode_str(uri.path()).decode_utf8().ok()?;
        if decoded.contains('\0') {
            return None;
        }

        Some(Self {
            cleaned: clean_path(&decoded),
            trailing_slash: decoded.ends_with('/'),
            query: uri.query().map(str::to_owned),
        })
    }

    /// Produces the canonical URI of this path as a directory: percent-encoded, with a trailing
    /// slash and the query string of the request.
    pub fn directory_uri(&self) -> String {
        let mut uri = encode_path(&self.cleaned);
        if !uri.ends_with('/') {
            uri.push('/');
        }
        if let Some(query) = &self.query {
            uri.push('?');
            uri.push_str(query);
        }
        uri
    }
}

/// How a request is going to be served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// A regular file
    File,
    /// A directory, to be served as listing or via its index file
    Directory,
    /// A `.zip` URL corresponding to a directory rather than a file
    VirtualArchive,
    /// Anything that cannot be served
    NotFound,
}

/// Result of resolving a request path within a mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// Classification of the target
    pub kind: TargetKind,
    /// The file or directory to be served. For a virtual archive this is the directory to be
    /// archived. Empty if the target wasn't found.
    pub real_path: PathBuf,
    /// Last segment of the request path, e.g. `dir.zip` for a virtual archive
    pub requested_name: String,
    /// The cleaned request path
    pub uri_path: String,
    /// Whether the target is the mount's root directory
    pub is_mount_root: bool,
    /// Location to redirect directory requests without a trailing slash to
    pub redirect: Option<String>,
}

impl ResolvedTarget {
    fn new(
        kind: TargetKind,
        real_path: PathBuf,
        request: &RequestPath,
        is_mount_root: bool,
    ) -> Self {
        let redirect = if kind == TargetKind::Directory && !request.trailing_slash {
            Some(request.directory_uri())
        } else {
            None
        };

        Self {
            kind,
            real_path,
            requested_name: request
                .cleaned
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_owned(),
            uri_path: request.cleaned.clone(),
            is_mount_root,
            redirect,
        }
    }

    fn not_found(request: &RequestPath) -> Self {
        Self::new(TargetKind::NotFound, PathBuf::new(), request, false)
    }
}

/// Error inspecting the filesystem, other than the path not existing
#[derive(Debug, thiserror::Error)]
#[error("failed inspecting {path:?}")]
pub struct ResolveError {
    /// The path that could not be inspected
    pub path: PathBuf,
    /// The underlying error
    #[source]
    pub source: io::Error,
}

fn is_missing(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}

fn lstat(path: &Path) -> Result<Option<Metadata>, ResolveError> {
    match fs::symlink_metadata(path) {
        Ok(meta) => Ok(Some(meta)),
        Err(err) if is_missing(&err) => Ok(None),
        Err(source) => Err(ResolveError {
            path: path.to_owned(),
            source,
        }),
    }
}

/// For a missing `<name>.zip` path, returns the `<name>` directory if archives are enabled and it
/// exists.
fn archive_source(mount: &Mount, path: &Path) -> Result<Option<PathBuf>, ResolveError> {
    if !mount.archive_enabled {
        return Ok(None);
    }

    let Some(stem) = path
        .file_name()
        .and_then(OsStr::to_str)
        .and_then(|name| name.strip_suffix(ARCHIVE_SUFFIX))
        .filter(|stem| !stem.is_empty())
    else {
        return Ok(None);
    };

    let dir = path.with_file_name(stem);
    match lstat(&dir)? {
        Some(meta) if meta.is_dir() => Ok(Some(dir)),
        _ => Ok(None),
    }
}

/// Makes sure that the path is located within the mount's root and no symbolic links are
/// involved.
fn is_within_root(mount: &Mount, path: &Path) -> Result<bool, ResolveError> {
    let canonical = match fs::canonicalize(path) {
        Ok(canonical) => canonical,
        Err(err) if is_missing(&err) => return Ok(false),
        Err(source) => {
            return Err(ResolveError {
                path: path.to_owned(),
                source,
            })
        }
    };

    if !canonical.starts_with(&mount.root) {
        warn!(
            "Path {path:?} resolves to {canonical:?} outside of root {:?}",
            mount.root
        );
        Ok(false)
    } else if canonical != path {
        debug!("Path {path:?} traverses a symbolic link");
        Ok(false)
    } else {
        Ok(true)
    }
}

/// Resolves a request within a mount. `relative` is the part of the cleaned request path following
/// the mount prefix.
pub fn resolve_path(
    mount: &Mount,
    request: &RequestPath,
    relative: &str,
) -> Result<ResolvedTarget, ResolveError> {
    let segments = relative
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>();
    if segments.iter().any(is_hidden) {
        debug!("Request path {} refers to a hidden entry", request.cleaned);
        return Ok(ResolvedTarget::not_found(request));
    }

    let mut path = mount.root.clone();
    path.extend(&segments);

    let kind = match lstat(&path)? {
        Some(meta) if meta.is_file() => TargetKind::File,
        Some(meta) if meta.is_dir() => {
            if mount.autoindex {
                TargetKind::Directory
            } else {
                debug!("Directory listings are disabled for {}", mount.prefix);
                TargetKind::NotFound
            }
        }
        Some(_) => {
            debug!("Path {path:?} is neither a regular file nor a directory");
            TargetKind::NotFound
        }
        None => match archive_source(mount, &path)? {
            Some(dir) => {
                path = dir;
                TargetKind::VirtualArchive
            }
            None => TargetKind::NotFound,
        },
    };

    if kind == TargetKind::NotFound || !is_within_root(mount, &path)? {
        return Ok(ResolvedTarget::not_found(request));
    }

    Ok(ResolvedTarget::new(kind, path, request, segments.is_empty()))
}
