use std::time::Duration;

use clap::{Args, Parser};

use crate::board;
use crate::link::LinkError;
use crate::loopback::{MAX_RX_DELAY_LINE, Settle, Speed, TestMode};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "eth-hammer",
    about = "Ethernet PHY loopback tester (RGMII delay sweep) for board bring-up"
)]
pub struct Cli {
    #[command(flatten)]
    pub link: LinkOpts,
    /// loopback <speed> | delaytest | delayline <tx> <rx> | help | <net boot command...>
    #[arg(trailing_var_arg = true)]
    pub tokens: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct LinkOpts {
    /// Network interface wired to the PHY under test
    #[arg(long, default_value = "eth0")]
    pub iface: String,
    /// GMAC register block physical base
    #[arg(long, value_parser = parse_num_u64, default_value_t = board::GMAC_IOBASE)]
    pub iobase: u64,
    /// GRF physical base (RGMII delay-line fields)
    #[arg(long, value_parser = parse_num_u64, default_value_t = board::GRF_IOBASE)]
    pub grf: u64,
    /// Settle time after transmit at 10/100 Mbit, microseconds
    #[arg(long, default_value_t = board::SETTLE_MBIT_US)]
    pub settle_mbit_us: u64,
    /// Settle time after transmit at 1000 Mbit, microseconds
    #[arg(long, default_value_t = board::SETTLE_GBIT_US)]
    pub settle_gbit_us: u64,
    /// Print the board/link banner and per-step diagnostics
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

impl LinkOpts {
    pub fn settle(&self) -> Settle {
        Settle {
            mbit: Duration::from_micros(self.settle_mbit_us),
            gbit: Duration::from_micros(self.settle_gbit_us),
        }
    }
}

/// One parsed sub-command. Dispatch is by token count; anything that does
/// not fit the fixed shapes is re-joined and handed to the net boot
/// interpreter, which carries the cable-based DHCP/TFTP path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EthCommand {
    Test { speed: Speed, mode: TestMode },
    DelayLine { tx: u8, rx: u8 },
    Help,
    Boot(String),
}

impl EthCommand {
    pub fn from_tokens(tokens: &[String]) -> Result<Self, LinkError> {
        let toks: Vec<&str> = tokens.iter().map(String::as_str).collect();
        match toks.as_slice() {
            // the sweep is always a gigabit test
            ["delaytest"] => Ok(EthCommand::Test {
                speed: Speed::M1000,
                mode: TestMode::Sweep,
            }),
            ["help"] => Ok(EthCommand::Help),
            ["loopback", speed] => {
                let mbps = parse_num(speed)
                    .ok_or_else(|| LinkError::Invalid(format!("bad speed {speed:?}")))?;
                let speed = Speed::from_mbps(mbps).ok_or_else(|| {
                    LinkError::Invalid(format!("speed must be 10, 100 or 1000, got {mbps}"))
                })?;
                Ok(EthCommand::Test {
                    speed,
                    mode: TestMode::Single,
                })
            }
            ["delayline", tx, rx] => Ok(EthCommand::DelayLine {
                tx: parse_delay(tx)?,
                rx: parse_delay(rx)?,
            }),
            _ => Ok(EthCommand::Boot(tokens.join(" "))),
        }
    }
}

/// strtoul(,,0)-style: a leading 0x selects hex, plain digits are decimal.
pub fn parse_num(tok: &str) -> Option<u32> {
    if let Some(hex) = tok.strip_prefix("0x").or_else(|| tok.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        tok.parse().ok()
    }
}

fn parse_num_u64(tok: &str) -> Result<u64, String> {
    if let Some(hex) = tok.strip_prefix("0x").or_else(|| tok.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else {
        tok.parse().map_err(|e: std::num::ParseIntError| e.to_string())
    }
}

fn parse_delay(tok: &str) -> Result<u8, LinkError> {
    let val =
        parse_num(tok).ok_or_else(|| LinkError::Invalid(format!("bad delay value {tok:?}")))?;
    if val > MAX_RX_DELAY_LINE as u32 {
        return Err(LinkError::Invalid(format!(
            "delay value 0x{val:x} outside 0x00..=0x7f"
        )));
    }
    Ok(val as u8)
}

pub fn print_eth_help() {
    println!("Usage:");
    println!(
        "  eth-hammer loopback <speed>       PHY loopback test, speed is 1000/100/10, unplug the RJ45 cable first"
    );
    println!(
        "  eth-hammer delaytest              print the loopback-passed tx_delay/rx_delay grid, unplug the RJ45 cable first"
    );
    println!("  eth-hammer delayline <tx> <rx>    program the RGMII delay lines, values 0x00~0x7f");
    println!(
        "  eth-hammer <net boot command...>  forward to the system shell, e.g. a DHCP/TFTP fetch"
    );
}
