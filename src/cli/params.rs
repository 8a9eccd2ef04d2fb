// SPDX-License-Identifier: Apache-2.0

use super::HostOptions;
use crate::ta::{until_nul, OcallCommand, OCALL_TA_UUID};

use anyhow::Context as _;
use clap::Args;
use wicket::{Memref, Param, Params, Value};

const INPUT: &[u8] = b"This string was sent by the CA\0";
const RIDDLE: &[u8] = b"The CA thinks this is a fun riddle\0";
const INOUT_CAPACITY: usize = 128;

/// Pass each kind of parameter to the demo application and print what comes back
#[derive(Args, Debug)]
pub struct Options {
    #[clap(flatten)]
    pub host: HostOptions,
}

impl Options {
    pub fn execute(self) -> anyhow::Result<()> {
        let ctx = self.host.connect()?;
        let session = ctx
            .session(OCALL_TA_UUID)
            .open()
            .context("failed to open a session to the demo application")?;

        let mut riddle = RIDDLE.to_vec();
        riddle.resize(INOUT_CAPACITY, 0);
        let mut params = Params::new([
            Param::ValueInput(Value::new(3, 4)),
            Param::ValueInout(Value::new(5, 6)),
            Param::MemrefInput(Memref::new(INPUT.to_vec())),
            Param::MemrefInout(Memref::new(riddle)),
        ]);

        let outcome = session
            .invoke(OcallCommand::Params as u32, &mut params)
            .context("the params command failed");
        session.close().context("failed to close the session")?;
        outcome?;

        let value = params.value(1)?;
        let inout = params.memref(3)?;
        println!("inout values: ({:#x}, {:#x})", value.a, value.b);
        println!(
            "inout buffer ({} bytes): {:?}",
            inout.size(),
            String::from_utf8_lossy(until_nul(inout.data().unwrap_or_default()))
        );
        Ok(())
    }
}
