// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::config::AlertAction,
    log::{error, LevelFilter},
};

/// Reports a broken connection table invariant and applies the configured reaction.
///
/// Execution always continues. `SuppressLogging` flushes the logger and silences every further
/// record so that the buffers leading up to the violation survive for a postmortem.
pub fn report_alert(action: AlertAction, violation: &str) {
    error!("policy manager invariant violated: {}", violation);
    match action {
        AlertAction::LogOnly => (),
        AlertAction::SuppressLogging => {
            log::logger().flush();
            log::set_max_level(LevelFilter::Off);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test: the max level is process-global.
    #[test]
    fn alert_actions() {
        let previous = log::max_level();
        log::set_max_level(LevelFilter::Debug);
        report_alert(AlertAction::LogOnly, "dup entry");
        assert_eq!(log::max_level(), LevelFilter::Debug);

        report_alert(AlertAction::SuppressLogging, "session count mismatch");
        let suppressed = log::max_level();
        log::set_max_level(previous);
        assert_eq!(suppressed, LevelFilter::Off);
        assert_eq!(log::max_level(), previous);
    }
}
