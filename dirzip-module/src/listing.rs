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

//! Directory listings
//!
//! A [`Listing`] collects the visible children of a directory: regular files and directories
//! whose names don’t start with a dot. It is rendered into an HTML page linking to each entry
//! and, where archives are enabled, to the `.zip` archive of each subdirectory.

use httpdate::fmt_http_date;
use log::warn;
use maud::{html, Markup, DOCTYPE};
use std::fs::{self, DirEntry};
use std::io;
use std::path::Path;
use std::time::SystemTime;

use crate::path::{encode_segment, is_hidden, ARCHIVE_SUFFIX};

const STYLE: &str = concat!(
    "body{font-family:monospace;padding:48px;}",
    "header{padding:4px 16px;font-size:24px;}",
    "ul{list-style-type:none;margin:0;padding:20px 0 0 0;display:flex;flex-wrap:wrap;}",
    "li{width:300px;padding:16px;}",
    "li a{display:block;overflow:hidden;white-space:nowrap;text-overflow:ellipsis;",
    "text-decoration:none;transition:opacity .25s;}",
    "li a:hover{opacity:.5;}",
    "li span{color:#707070;font-size:12px;}",
    ".dir{color:#e91e63;}",
    ".file{color:#673ab7;}",
    ".zip{color:#009688;font-size:12px;}",
);

/// A visible child of a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    /// File name, non-UTF-8 names are converted lossily
    pub name: String,
    /// Whether this is a directory
    pub is_dir: bool,
    /// File size in bytes, zero for directories
    pub size: u64,
    /// Last modification time if known
    pub modified: Option<SystemTime>,
}

/// Contents of a directory, ready to be rendered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    /// Name displayed as page title, the request path of the directory
    pub dir_name: String,
    /// Visible entries sorted by name
    pub entries: Vec<ListingEntry>,
    /// Whether archive links should be displayed for subdirectories
    pub archive_enabled: bool,
    /// Whether a link to the parent directory should be displayed
    pub show_parent: bool,
}

impl ListingEntry {
    /// Inspects a directory child. Returns `None` for hidden entries and anything that is neither
    /// a regular file nor a directory.
    fn from_dir_entry(entry: &DirEntry) -> io::Result<Option<Self>> {
        let name = entry.file_name();
        if is_hidden(&name) {
            return Ok(None);
        }

        // DirEntry::metadata() doesn’t follow symbolic links
        let meta = entry.metadata()?;
        let is_dir = if meta.is_dir() {
            true
        } else if meta.is_file() {
            false
        } else {
            return Ok(None);
        };

        Ok(Some(Self {
            name: name.to_string_lossy().into_owned(),
            is_dir,
            size: if is_dir { 0 } else { meta.len() },
            modified: meta.modified().ok(),
        }))
    }
}

impl Listing {
    /// Reads the directory at `path`. Only failing to read the directory itself is an error,
    /// children that cannot be inspected are skipped.
    pub fn build(
        path: &Path,
        dir_name: &str,
        archive_enabled: bool,
        show_parent: bool,
    ) -> Result<Self, io::Error> {
        let children = fs::read_dir(path)?
            .map(|entry| entry.and_then(|entry| ListingEntry::from_dir_entry(&entry)));
        let mut listing = Self {
            dir_name: dir_name.to_owned(),
            entries: Vec::new(),
            archive_enabled,
            show_parent,
        };
        listing.collect_entries(path, children);
        Ok(listing)
    }

    fn collect_entries<I>(&mut self, path: &Path, children: I)
    where
        I: IntoIterator<Item = io::Result<Option<ListingEntry>>>,
    {
        for child in children {
            match child {
                Ok(Some(entry)) => self.entries.push(entry),
                Ok(None) => {}
                Err(err) => warn!("Skipping an entry of directory {path:?} in listing: {err}"),
            }
        }
        self.entries.sort_by(|a, b| a.name.cmp(&b.name));
    }

    fn render_entry(&self, entry: &ListingEntry) -> Markup {
        let href = encode_segment(&entry.name);
        html! {
            li {
                @if entry.is_dir {
                    a class="dir" href={ (href) "/" } { (entry.name) "/" }
                    @if self.archive_enabled {
                        a class="zip" href={ (href) (ARCHIVE_SUFFIX) } download {
                            (entry.name) (ARCHIVE_SUFFIX)
                        }
                    }
                } @else {
                    a class="file" href=(href) { (entry.name) }
                    span { (entry.size) }
                    @if let Some(modified) = entry.modified {
                        " "
                        span { (fmt_http_date(modified)) }
                    }
                }
            }
        }
    }

    /// Produces the HTML page for this listing.
    pub fn render(&self) -> String {
        html! {
            (DOCTYPE)
            html lang="en" {
                head {
                    meta charset="utf-8";
                    meta name="viewport" content="width=device-width, initial-scale=1.0";
                    title { (self.dir_name) }
                    style { (STYLE) }
                }
                body {
                    header { (self.dir_name) }
                    ul {
                        @if self.show_parent {
                            li {
                                a class="dir" href="../" { "../" }
                            }
                        }
                        @for entry in &self.entries {
                            (self.render_entry(entry))
                        }
                    }
                }
            }
        }
        .into_string()
    }
}
