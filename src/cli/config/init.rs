// SPDX-License-Identifier: Apache-2.0

use std::fs::OpenOptions;
use std::io::prelude::*;
use std::path::PathBuf;

use anyhow::{bail, Context as _};
use clap::Args;
use log::info;
use postern_config::CONFIG_TEMPLATE;

/// Generate a `Postern.toml` template
#[derive(Args, Debug)]
pub struct Options {
    /// Where to write the template
    #[clap(default_value = "Postern.toml", parse(from_os_str))]
    path: PathBuf,
}

impl Options {
    pub fn execute(self) -> anyhow::Result<()> {
        let path = &self.path;
        if path.exists() {
            bail!("{path:?} does already exist.");
        }

        let mut postern_toml = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to create {path:?}"))?;

        postern_toml.write_all(CONFIG_TEMPLATE.as_bytes())?;
        info!("wrote configuration template to {path:?}");
        Ok(())
    }
}
