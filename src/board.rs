//! Z28 Pro (RK3328) board parameters.

/// DRAM fitted per bank.
pub const SDRAM_BANK_SIZE: u64 = 2 << 30;
/// Scrollback depth kept by the video console.
pub const CONSOLE_SCROLL_LINES: u32 = 10;
/// eMMC index holding the boot environment.
pub const MMC_ENV_DEV: u32 = 1;

/// DesignWare GMAC register block (GMAC2IO).
pub const GMAC_IOBASE: u64 = 0xff54_0000;
/// General register files; the RGMII delay-line fields live here.
pub const GRF_IOBASE: u64 = 0xff10_0000;

/// GRF MAC_CON0: tx delay in bits [6:0], rx delay in bits [13:7].
pub const GRF_MAC_CON0: u64 = 0x0900;
/// GRF MAC_CON1: interface mode and delay-line gate bits.
pub const GRF_MAC_CON1: u64 = 0x0904;
pub const GRF_RX_DL_SHIFT: u32 = 7;
pub const GRF_DELAY_MASK: u32 = 0x3fff;
/// MAC_CON1 gate bits for the two delay lines.
pub const GRF_DELAY_ENA: u32 = 0x3;

/// Settle time after transmit before polling receive, 10/100 Mbit.
pub const SETTLE_MBIT_US: u64 = 2_000;
/// Settle time at 1000 Mbit.
pub const SETTLE_GBIT_US: u64 = 200;

pub fn summary() -> String {
    format!(
        "z28pro rk3328: dram-bank={}MiB mmc-env-dev={} scroll={} gmac=0x{:08x} grf=0x{:08x}",
        SDRAM_BANK_SIZE >> 20,
        MMC_ENV_DEV,
        CONSOLE_SCROLL_LINES,
        GMAC_IOBASE,
        GRF_IOBASE
    )
}
