// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use thiserror::Error;

/// Errors returned by the policy manager. Most decisions recover locally and only log; these
/// surface where a caller needs to know that the operation did not take effect.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("operation failed: {0}")]
    Failure(&'static str),
    #[error("invalid argument or state: {0}")]
    Inval(&'static str),
    #[error("no room left in {0}")]
    Resources(&'static str),
    #[error("entry already present")]
    Exists,
    #[error("vdev {0} not found")]
    NotFound(u8),
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("hw mode list is empty")]
    NoMem,
    #[error("collaborator error: {0}")]
    Collaborator(#[source] anyhow::Error),
}

impl PolicyError {
    /// Short status name used in log lines, matching the firmware-facing status taxonomy.
    pub fn status_code(&self) -> &'static str {
        match self {
            PolicyError::Failure(_) => "E_FAILURE",
            PolicyError::Inval(_) => "E_INVAL",
            PolicyError::Resources(_) => "E_RESOURCES",
            PolicyError::Exists => "E_EXISTS",
            PolicyError::NotFound(_) => "E_FAILURE",
            PolicyError::Timeout(_) => "E_TIMEOUT",
            PolicyError::NoMem => "E_NOMEM",
            PolicyError::Collaborator(_) => "E_FAILURE",
        }
    }
}

impl From<anyhow::Error> for PolicyError {
    fn from(e: anyhow::Error) -> Self {
        PolicyError::Collaborator(e)
    }
}
