//
// reconnect.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

use std::time::Duration;

/// How many reconnection attempts are made before giving up.
pub const DEFAULT_RECONNECT_LIMIT: u32 = 7;

/// What to do after the connection is lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Make another attempt after `delay`.
    Retry { delay: Duration },

    /// Attempts are exhausted; the connection is dead.
    GiveUp { attempts: u32 },
}

/// Counts reconnection attempts and applies exponential backoff
/// (2^attempt seconds).
#[derive(Debug, Clone)]
pub struct ReconnectCounter {
    attempt: u32,
    limit: u32,
}

impl ReconnectCounter {
    pub fn new(limit: u32) -> Self {
        Self { attempt: 0, limit }
    }

    /// The number of attempts made since the last successful connection.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Called on a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Called when an attempt starts; returns its number (1-based).
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    /// Decide whether to schedule another attempt.
    pub fn decide(&self) -> ReconnectDecision {
        if self.attempt < self.limit {
            ReconnectDecision::Retry {
                delay: Duration::from_secs(1u64 << self.attempt.min(63)),
            }
        } else {
            ReconnectDecision::GiveUp {
                attempts: self.attempt,
            }
        }
    }
}

impl Default for ReconnectCounter {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_LIMIT)
    }
}
