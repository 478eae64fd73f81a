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

//! Prefix routing on path segments.
//!
//! As far as the routing is concerned, a path is a list of file/directory names separated by
//! slashes. The number of separating slashes is irrelevant, so that `/dir`, `/dir/` and `//dir/`
//! will all match a route defined for `/dir/`. Note that `/dirabc` never matches a route defined
//! for `/dir`, only `/dir/abc` does.
//!
//! Only the best match is returned. If routes exist for `/`, `/dir/` and `/dir/subdir/` for
//! example, the path `/dir/subdir/file` will match `/dir/subdir/`.

const SEPARATOR: char = '/';

fn segments(path: &str) -> Vec<String> {
    path.split(SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Removes the route's segments from the start of the path, returns the remainder if the path is
/// within the route.
fn strip_segments<'a>(route: &[String], mut path: &'a str) -> Option<&'a str> {
    for segment in route {
        path = path.trim_start_matches(SEPARATOR);
        let rest = path.strip_prefix(segment.as_str())?;
        if !rest.is_empty() && !rest.starts_with(SEPARATOR) {
            return None;
        }
        path = rest;
    }
    Some(path)
}

/// Collects routes before building a [`Router`]
#[derive(Debug)]
pub struct RouterBuilder<V> {
    routes: Vec<(Vec<String>, V)>,
}

impl<V> RouterBuilder<V> {
    /// Adds a route for the given path. If a route for the same path existed already, it is
    /// replaced and the previous value returned.
    pub fn push(&mut self, path: &str, value: V) -> Option<V> {
        let path = segments(path);
        if let Some((_, existing)) = self.routes.iter_mut().find(|(route, _)| *route == path) {
            Some(std::mem::replace(existing, value))
        } else {
            self.routes.push((path, value));
            None
        }
    }

    /// Produces a router from the collected routes.
    pub fn build(mut self) -> Router<V> {
        // Longest routes first so that the first match is the best one
        self.routes
            .sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        Router {
            routes: self.routes,
        }
    }
}

/// Maps path prefixes to values
#[derive(Debug)]
pub struct Router<V> {
    routes: Vec<(Vec<String>, V)>,
}

impl<V> Router<V> {
    /// Creates a builder collecting the routes.
    pub fn builder() -> RouterBuilder<V> {
        RouterBuilder { routes: Vec::new() }
    }

    /// Looks up the best matching route for a path. Returns the route's value along with the part
    /// of the path following the route prefix: empty for an exact match, starting with a slash
    /// otherwise.
    pub fn lookup<'a>(&self, path: &'a str) -> Option<(&V, &'a str)> {
        self.routes.iter().find_map(|(route, value)| {
            strip_segments(route, path).map(|tail| (value, tail))
        })
    }

    /// Iterates over all values in the router.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.routes.iter().map(|(_, value)| value)
    }

    /// Number of routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no routes have been defined.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
