use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

mod board;
mod boot;
mod cli;
mod frame;
mod gmac;
mod link;
mod loopback;
mod regs;
mod stats;

use crate::cli::{Cli, EthCommand};
use crate::gmac::GmacLink;
use crate::link::{EthLink, LinkError};

fn main() -> ExitCode {
    let args = Cli::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err
                .downcast_ref::<LinkError>()
                .map(LinkError::code)
                .unwrap_or(-libc::EIO);
            eprintln!("error: {err:#} ({code})");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Cli) -> Result<()> {
    let cmd = EthCommand::from_tokens(&args.tokens)?;

    let mut link =
        GmacLink::open(&args.link).with_context(|| format!("opening {}", args.link.iface))?;
    if !link.is_active() {
        return Err(LinkError::NotActive(args.link.iface.clone()).into());
    }

    if args.link.debug {
        let hw = link.hwaddr();
        eprintln!("[eth] {}", board::summary());
        eprintln!(
            "[eth] iface={} hwaddr={:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x} settle={}us/{}us",
            args.link.iface,
            hw[0],
            hw[1],
            hw[2],
            hw[3],
            hw[4],
            hw[5],
            args.link.settle_mbit_us,
            args.link.settle_gbit_us
        );
    }

    match cmd {
        EthCommand::Help => {
            cli::print_eth_help();
            Ok(())
        }
        EthCommand::Test { speed, mode } => {
            loopback::run(&mut link, speed, mode, args.link.settle())?;
            Ok(())
        }
        EthCommand::DelayLine { tx, rx } => {
            loopback::program_delay_lines(&mut link, tx, rx)?;
            if args.link.debug {
                eprintln!("[eth] delay lines set tx=0x{tx:02x} rx=0x{rx:02x}");
            }
            Ok(())
        }
        EthCommand::Boot(cmdline) => {
            boot::run(&cmdline)?;
            Ok(())
        }
    }
}
