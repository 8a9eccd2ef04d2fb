// SPDX-License-Identifier: Apache-2.0

//! Configuration for the postern host
//!
//! A `Postern.toml` file sets the defaults a host [`Context`](wicket::Context) is created with.
//!
//! ```
//! use postern_config::Config;
//! use wicket::{Login, Timeout};
//!
//! const CONFIG: &str = r#"
//! timeout = { millis = 1500 }
//! login = "user-application"
//! "#;
//!
//! let config: Config = toml::from_str(CONFIG).unwrap();
//! assert_eq!(config.timeout, Timeout::Millis(1500));
//! assert_eq!(config.login, Login::UserApplication);
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(rust_2018_idioms)]

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use wicket::settings::DEFAULT_MAX_BLOCK_SIZE;
use wicket::{Login, Settings, Timeout};

/// Configuration file template
pub const CONFIG_TEMPLATE: &str = r#"## Configuration for the postern host

## How long to wait for the trusted peer before abandoning a call
timeout = "infinite"
# timeout = { millis = 5000 }

## Login method sessions are opened with: "public", "user", "group",
## "application", "user-application" or "group-application"
login = "public"

## Largest marshaled call, in bytes
# max_block_size = 1048576
"#;

const fn default_max_block_size() -> usize {
    DEFAULT_MAX_BLOCK_SIZE
}

/// The configuration for the postern host
///
/// See the [crate] documentation for an example.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Default timeout of forward calls
    #[serde(default)]
    pub timeout: Timeout,

    /// Default login method
    #[serde(default)]
    pub login: Login,

    /// Upper bound for the size of a marshaled call
    #[serde(default = "default_max_block_size")]
    pub max_block_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: Timeout::default(),
            login: Login::default(),
            max_block_size: default_max_block_size(),
        }
    }
}

/// Error loading a configuration file
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The file could not be read
    #[error("failed to read configuration")]
    Io(#[source] std::io::Error),
    /// The file is not a valid configuration
    #[error("invalid configuration")]
    Toml(#[source] toml::de::Error),
}

impl Config {
    /// Reads and parses the configuration file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&text).map_err(Error::Toml)
    }

    /// The context settings this configuration describes
    pub fn settings(&self) -> Settings {
        Settings {
            timeout: self.timeout,
            login: self.login,
            max_block_size: self.max_block_size,
        }
    }
}
