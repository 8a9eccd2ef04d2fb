// SPDX-License-Identifier: Apache-2.0

use super::HostOptions;
use crate::ta::{until_nul, OcallCommand, CA_CMD_REPLY, OCALL_TA_UUID};

use anyhow::Context as _;
use clap::Args;
use log::info;
use wicket::{Params, ResultCode, ReverseCall, Value};

/// The string the host answers call-backs with.
pub const CA_GREETING: &[u8] = b"This string was sent by the CA.\0";

/// Invoke the demo application's test command, which calls back into the host
#[derive(Args, Debug)]
pub struct Options {
    #[clap(flatten)]
    pub host: HostOptions,

    /// Open the session without a call-back handler
    #[clap(long)]
    pub no_handler: bool,
}

impl Options {
    pub fn execute(self) -> anyhow::Result<()> {
        let ctx = self.host.connect()?;

        let mut builder = ctx.session(OCALL_TA_UUID);
        if !self.no_handler {
            builder = builder.handler(reply);
        }
        let session = builder
            .open()
            .context("failed to open a session to the demo application")?;

        let mut params = Params::default();
        let outcome = session.invoke(OcallCommand::Test as u32, &mut params);
        session.close().context("failed to close the session")?;

        match outcome {
            Ok(()) => println!("The test command completed"),
            Err(error) => println!("The test command failed: {error}"),
        }
        Ok(())
    }
}

/// Serves the demo application's call-backs.
pub fn reply(call: ReverseCall<'_>) -> Result<(), ResultCode> {
    println!(
        "Received a call-back from {} with command {:#x} and types {:#010x}",
        call.caller, call.command_id, call.param_types
    );
    if call.command_id != CA_CMD_REPLY {
        return Err(ResultCode::BadParameters);
    }

    let text = call.params.memref(0)?.data().unwrap_or_default();
    println!("  input string: {:?}", String::from_utf8_lossy(until_nul(text)));

    let value = call.params.value_mut(1)?;
    println!("  input values: ({:#x}, {:#x})", value.a, value.b);
    *value = Value::new(0xE, 0xF);

    call.params.memref_mut(2)?.write(CA_GREETING)?;
    info!("answered call-back from {}", call.caller);
    Ok(())
}
