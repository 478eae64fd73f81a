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

//! Filesystem sandbox
//!
//! On Linux, Landlock restricts the process to reading files beneath the mount roots. Everything
//! else on the filesystem becomes inaccessible, as does writing anywhere.

use clap::{Args, ValueEnum};
use log::{info, warn};
use serde::Deserialize;
use std::path::PathBuf;

/// How to deal with the sandbox not being available
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum SandboxMode {
    /// Refuse to start if the sandbox cannot be fully enforced
    Required,
    /// Start with a warning if the sandbox cannot be fully enforced
    #[default]
    BestEffort,
    /// Don’t restrict filesystem access
    Disabled,
}

/// Command line options of the sandbox
#[derive(Debug, Default, Args)]
pub(crate) struct SandboxOpt {
    /// Restrict the process to read-only access of the exported directories.
    #[clap(long, value_enum)]
    pub(crate) sandbox: Option<SandboxMode>,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum SandboxError {
    #[cfg(not(target_os = "linux"))]
    #[error("filesystem sandbox is not supported on this platform")]
    Unsupported,
    #[cfg(target_os = "linux")]
    #[error("failed setting up Landlock ruleset")]
    Ruleset(#[from] landlock::RulesetError),
    #[error("Landlock restrictions are only partially enforced by the kernel")]
    PartiallyEnforced,
    #[error("Landlock is not supported by the kernel")]
    NotEnforced,
}

#[cfg(target_os = "linux")]
fn apply(roots: &[PathBuf]) -> Result<(), SandboxError> {
    use landlock::{
        path_beneath_rules, Access, AccessFs, Ruleset, RulesetAttr, RulesetCreatedAttr,
        RulesetStatus, ABI,
    };

    let abi = ABI::V5;
    let status = Ruleset::default()
        .handle_access(AccessFs::from_all(abi))?
        .create()?
        .add_rules(path_beneath_rules(roots, AccessFs::from_read(abi)))?
        .restrict_self()?;

    match status.ruleset {
        RulesetStatus::FullyEnforced => Ok(()),
        RulesetStatus::PartiallyEnforced => Err(SandboxError::PartiallyEnforced),
        RulesetStatus::NotEnforced => Err(SandboxError::NotEnforced),
    }
}

#[cfg(not(target_os = "linux"))]
fn apply(_roots: &[PathBuf]) -> Result<(), SandboxError> {
    Err(SandboxError::Unsupported)
}

/// Restricts filesystem access of the current process to reading beneath the given directories.
/// This has to happen before any threads are spawned, restrictions are not applied to threads
/// that exist already.
pub(crate) fn restrict(mode: SandboxMode, roots: &[PathBuf]) -> Result<(), SandboxError> {
    if mode == SandboxMode::Disabled {
        info!("Filesystem sandbox disabled");
        return Ok(());
    }

    match apply(roots) {
        Ok(()) => {
            info!("Filesystem access restricted to {roots:?}");
            Ok(())
        }
        Err(err) if mode == SandboxMode::Required => Err(err),
        Err(err) => {
            warn!("Filesystem sandbox not enforced: {err}");
            Ok(())
        }
    }
}
