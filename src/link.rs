use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid argument: {0}")]
    Invalid(String),
    #[error("no frame received")]
    Busy,
    #[error("loopback frame mismatch")]
    Mismatch,
    #[error("no PHY responds on the MDIO bus")]
    NoPhy,
    #[error("device {0} is not active")]
    NotActive(String),
    #[error("net boot command failed with status {0}")]
    Boot(i32),
    #[error("link I/O: {0}")]
    Io(#[from] io::Error),
}

impl LinkError {
    /// Numeric code in the negative-errno convention of the boot firmware.
    pub fn code(&self) -> i32 {
        match self {
            LinkError::Invalid(_) | LinkError::Mismatch | LinkError::NotActive(_) => -libc::EINVAL,
            LinkError::Busy => -libc::EBUSY,
            LinkError::NoPhy => -libc::ENODEV,
            LinkError::Boot(_) => -libc::EIO,
            LinkError::Io(e) => -e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

/// Everything the loopback test needs from the hardware.
///
/// The production implementation is [`crate::gmac::GmacLink`]; tests drive
/// the runner against a scripted mock instead of a board.
pub trait EthLink {
    /// Interface name, for diagnostics.
    fn name(&self) -> &str;
    /// Station address used as the test frame source.
    fn hwaddr(&self) -> [u8; 6];
    /// Interface is selected and up.
    fn is_active(&self) -> bool;
    /// First PHY address answering on the MDIO bus. Must fail with
    /// [`LinkError::NoPhy`] when nothing answers; the test is not allowed
    /// to run against unconfigured hardware.
    fn resolve_phy(&mut self) -> Result<u8, LinkError>;
    fn phy_read(&mut self, reg: u8) -> Result<u16, LinkError>;
    fn phy_write(&mut self, reg: u8, val: u16) -> Result<(), LinkError>;
    fn mac_ctrl(&mut self) -> u32;
    fn set_mac_ctrl(&mut self, val: u32);
    /// Program the RGMII delay lines, both values in 0x00..=0x7f.
    fn set_rgmii_delay(&mut self, tx: u8, rx: u8);
    /// Restart the receive path; stale frames must not survive into a test.
    fn start(&mut self) -> Result<(), LinkError>;
    fn halt(&mut self);
    fn send(&mut self, frame: &[u8]) -> Result<(), LinkError>;
    /// One non-blocking poll. `Ok(None)` means nothing has arrived.
    fn recv(&mut self) -> Result<Option<Vec<u8>>, LinkError>;
}
