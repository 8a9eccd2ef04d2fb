// SPDX-License-Identifier: Apache-2.0

//! Connection settings: timeouts, login methods and block limits.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Raw timeout value meaning "wait forever".
pub const TIMEOUT_INFINITE: u32 = u32::MAX;

/// Default upper bound for the size of a marshaled block.
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 1 << 20;

/// How long a host thread waits for the peer before abandoning a call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeout {
    #[default]
    Infinite,
    Millis(u32),
}

impl Timeout {
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            TIMEOUT_INFINITE => Timeout::Infinite,
            millis => Timeout::Millis(millis),
        }
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        match self {
            Timeout::Infinite => TIMEOUT_INFINITE,
            Timeout::Millis(millis) => millis,
        }
    }

    /// The wait as a [`Duration`], `None` when it is unbounded.
    #[inline]
    pub fn duration(self) -> Option<Duration> {
        match self {
            Timeout::Infinite | Timeout::Millis(TIMEOUT_INFINITE) => None,
            Timeout::Millis(millis) => Some(Duration::from_millis(millis.into())),
        }
    }
}

/// Login method a session is opened with.
///
/// [`Login::TrustedApp`] is reserved for sessions one trusted application opens to another and is
/// refused when a host asks for it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u32)]
pub enum Login {
    #[default]
    Public = 0x0,
    User = 0x1,
    Group = 0x2,
    Application = 0x4,
    UserApplication = 0x5,
    GroupApplication = 0x6,
    #[serde(skip)]
    TrustedApp = 0xF000_0000,
}

/// Settings shared by all sessions of a [`Context`](crate::host::Context).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Default timeout of forward calls.
    pub timeout: Timeout,
    /// Login method used when a session does not ask for one.
    pub login: Login,
    /// Largest block a call may be marshaled into.
    pub max_block_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout: Timeout::Infinite,
            login: Login::Public,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
        }
    }
}
