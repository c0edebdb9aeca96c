//! Real hardware backend: a DesignWare GMAC with a clause-22 PHY, reached
//! through the kernel's packet socket and MII ioctls plus `/dev/mem` for
//! the registers the kernel does not broker (MAC conf, GRF delay lines).

use std::ffi::CString;
use std::fs::OpenOptions;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr;

use crate::board;
use crate::cli::LinkOpts;
use crate::link::{EthLink, LinkError};
use crate::regs::{MAC_CONF, MII_PHYSID1, MII_PHYSID2, PHY_MAX_ADDR};

const SIOCGIFFLAGS: libc::c_ulong = 0x8913;
const SIOCSIFFLAGS: libc::c_ulong = 0x8914;
const SIOCGIFHWADDR: libc::c_ulong = 0x8927;
const SIOCGMIIPHY: libc::c_ulong = 0x8947;
const SIOCGMIIREG: libc::c_ulong = 0x8948;
const SIOCSMIIREG: libc::c_ulong = 0x8949;

const IFNAMSIZ: usize = 16;
const PACKET_OUTGOING: u8 = 4;

/// struct mii_ioctl_data; reads come back in `val_out`, writes go via
/// `val_in`.
#[repr(C)]
#[derive(Clone, Copy)]
struct MiiData {
    phy_id: u16,
    reg_num: u16,
    val_in: u16,
    val_out: u16,
}

#[repr(C)]
struct MiiIfreq {
    name: [u8; IFNAMSIZ],
    mii: MiiData,
    _pad: [u8; 16],
}

#[repr(C)]
struct FlagsIfreq {
    name: [u8; IFNAMSIZ],
    flags: libc::c_short,
    _pad: [u8; 22],
}

#[repr(C)]
struct HwaddrIfreq {
    name: [u8; IFNAMSIZ],
    family: libc::c_ushort,
    data: [u8; 14],
    _pad: [u8; 8],
}

fn ifreq_name(iface: &str) -> Result<[u8; IFNAMSIZ], LinkError> {
    let bytes = iface.as_bytes();
    if bytes.is_empty() || bytes.len() >= IFNAMSIZ || bytes.contains(&0) {
        return Err(LinkError::Invalid(format!("interface name {iface:?}")));
    }
    let mut name = [0u8; IFNAMSIZ];
    name[..bytes.len()].copy_from_slice(bytes);
    Ok(name)
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// A `/dev/mem` window. Volatile u32 access only.
struct Mmio {
    base: *mut u8,
    len: usize,
    off: usize,
}

impl Mmio {
    fn map(phys: u64, span: usize) -> Result<Self, LinkError> {
        let mem = OpenOptions::new().read(true).write(true).open("/dev/mem")?;
        let page = page_size();
        let aligned = phys & !(page as u64 - 1);
        let off = (phys - aligned) as usize;
        let len = (off + span + page - 1) & !(page - 1);
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                mem.as_raw_fd(),
                aligned as libc::off_t,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(LinkError::Io(io::Error::last_os_error()));
        }
        Ok(Self {
            base: base.cast(),
            len,
            off,
        })
    }

    fn read32(&self, reg: u64) -> u32 {
        unsafe { ptr::read_volatile(self.base.add(self.off + reg as usize).cast::<u32>()) }
    }

    fn write32(&self, reg: u64, val: u32) {
        unsafe { ptr::write_volatile(self.base.add(self.off + reg as usize).cast::<u32>(), val) }
    }
}

impl Drop for Mmio {
    fn drop(&mut self) {
        unsafe { libc::munmap(self.base.cast(), self.len) };
    }
}

pub struct GmacLink {
    iface: String,
    name: [u8; IFNAMSIZ],
    sock: OwnedFd,
    hwaddr: [u8; 6],
    phy_addr: Option<u8>,
    mac: Mmio,
    grf: Mmio,
}

impl GmacLink {
    pub fn open(opts: &LinkOpts) -> Result<Self, LinkError> {
        let name = ifreq_name(&opts.iface)?;

        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK,
                (libc::ETH_P_ALL as u16).to_be() as libc::c_int,
            )
        };
        if fd < 0 {
            return Err(LinkError::Io(io::Error::last_os_error()));
        }
        let sock = unsafe { OwnedFd::from_raw_fd(fd) };

        let cname = CString::new(opts.iface.as_str())
            .map_err(|_| LinkError::Invalid(format!("interface name {:?}", opts.iface)))?;
        let ifindex = unsafe { libc::if_nametoindex(cname.as_ptr()) };
        if ifindex == 0 {
            return Err(LinkError::Invalid(format!(
                "no such interface {}",
                opts.iface
            )));
        }

        let mut sll: libc::sockaddr_ll = unsafe { mem::zeroed() };
        sll.sll_family = libc::AF_PACKET as libc::c_ushort;
        sll.sll_protocol = (libc::ETH_P_ALL as u16).to_be();
        sll.sll_ifindex = ifindex as libc::c_int;
        let rc = unsafe {
            libc::bind(
                sock.as_raw_fd(),
                (&raw const sll).cast::<libc::sockaddr>(),
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(LinkError::Io(io::Error::last_os_error()));
        }

        let mac = Mmio::map(opts.iobase, 0x100)?;
        let grf = Mmio::map(opts.grf, 0x1000)?;

        let mut link = Self {
            iface: opts.iface.clone(),
            name,
            sock,
            hwaddr: [0; 6],
            phy_addr: None,
            mac,
            grf,
        };

        // station address doubles as the test frame source
        let mut req = HwaddrIfreq {
            name: link.name,
            family: 0,
            data: [0; 14],
            _pad: [0; 8],
        };
        link.ioctl(SIOCGIFHWADDR, &mut req)?;
        link.hwaddr.copy_from_slice(&req.data[..6]);

        Ok(link)
    }

    fn ioctl<T>(&self, req: libc::c_ulong, arg: &mut T) -> Result<(), LinkError> {
        let rc = unsafe { libc::ioctl(self.sock.as_raw_fd(), req as _, arg as *mut T) };
        if rc < 0 {
            Err(LinkError::Io(io::Error::last_os_error()))
        } else {
            Ok(())
        }
    }

    fn mii(&self, phy: u8, reg: u8, val: u16) -> MiiIfreq {
        MiiIfreq {
            name: self.name,
            mii: MiiData {
                phy_id: phy as u16,
                reg_num: reg as u16,
                val_in: val,
                val_out: 0,
            },
            _pad: [0; 16],
        }
    }

    fn flags(&self) -> Result<libc::c_short, LinkError> {
        let mut req = FlagsIfreq {
            name: self.name,
            flags: 0,
            _pad: [0; 22],
        };
        self.ioctl(SIOCGIFFLAGS, &mut req)?;
        Ok(req.flags)
    }

    /// A floating bus reads all ones; a PHY held in reset reads zero.
    fn phy_id_present(&self, addr: u8) -> bool {
        let read = |reg: u8| -> Option<u16> {
            let mut req = self.mii(addr, reg, 0);
            self.ioctl(SIOCGMIIREG, &mut req).ok()?;
            Some(req.mii.val_out)
        };
        match (read(MII_PHYSID1), read(MII_PHYSID2)) {
            (Some(id1), Some(id2)) => {
                !(id1 == 0xffff && id2 == 0xffff) && !(id1 == 0 && id2 == 0)
            }
            _ => false,
        }
    }
}

impl EthLink for GmacLink {
    fn name(&self) -> &str {
        &self.iface
    }

    fn hwaddr(&self) -> [u8; 6] {
        self.hwaddr
    }

    fn is_active(&self) -> bool {
        self.flags()
            .map(|f| f & libc::IFF_UP as libc::c_short != 0)
            .unwrap_or(false)
    }

    fn resolve_phy(&mut self) -> Result<u8, LinkError> {
        if let Some(addr) = self.phy_addr {
            return Ok(addr);
        }
        // the driver usually knows its PHY
        let mut req = self.mii(0, 0, 0);
        if self.ioctl(SIOCGMIIPHY, &mut req).is_ok() {
            let addr = (req.mii.phy_id & 0x1f) as u8;
            if self.phy_id_present(addr) {
                self.phy_addr = Some(addr);
                return Ok(addr);
            }
        }
        // otherwise the first address answering with a plausible ID wins
        for addr in 0..PHY_MAX_ADDR {
            if self.phy_id_present(addr) {
                self.phy_addr = Some(addr);
                return Ok(addr);
            }
        }
        Err(LinkError::NoPhy)
    }

    fn phy_read(&mut self, reg: u8) -> Result<u16, LinkError> {
        let addr = self.resolve_phy()?;
        let mut req = self.mii(addr, reg, 0);
        self.ioctl(SIOCGMIIREG, &mut req)?;
        Ok(req.mii.val_out)
    }

    fn phy_write(&mut self, reg: u8, val: u16) -> Result<(), LinkError> {
        let addr = self.resolve_phy()?;
        let mut req = self.mii(addr, reg, val);
        self.ioctl(SIOCSMIIREG, &mut req)
    }

    fn mac_ctrl(&mut self) -> u32 {
        self.mac.read32(MAC_CONF)
    }

    fn set_mac_ctrl(&mut self, val: u32) {
        self.mac.write32(MAC_CONF, val);
    }

    fn set_rgmii_delay(&mut self, tx: u8, rx: u8) {
        // hiword-mask write: the top half enables the bits being changed
        let val = (board::GRF_DELAY_MASK << 16)
            | ((rx as u32) << board::GRF_RX_DL_SHIFT)
            | tx as u32;
        self.grf.write32(board::GRF_MAC_CON0, val);
        self.grf.write32(
            board::GRF_MAC_CON1,
            (board::GRF_DELAY_ENA << 16) | board::GRF_DELAY_ENA,
        );
    }

    fn start(&mut self) -> Result<(), LinkError> {
        // raise the interface if it is down, then drop whatever the socket
        // buffered before the test
        let flags = self.flags()?;
        if flags & libc::IFF_UP as libc::c_short == 0 {
            let mut req = FlagsIfreq {
                name: self.name,
                flags: flags | libc::IFF_UP as libc::c_short,
                _pad: [0; 22],
            };
            self.ioctl(SIOCSIFFLAGS, &mut req)?;
        }
        while self.recv()?.is_some() {}
        Ok(())
    }

    fn halt(&mut self) {
        // register state is left in place for the operator to inspect
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        let n = unsafe { libc::send(self.sock.as_raw_fd(), frame.as_ptr().cast(), frame.len(), 0) };
        if n < 0 {
            return Err(LinkError::Io(io::Error::last_os_error()));
        }
        if n as usize != frame.len() {
            return Err(LinkError::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                "short send",
            )));
        }
        Ok(())
    }

    fn recv(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        let mut buf = [0u8; 2048];
        loop {
            let mut from: libc::sockaddr_ll = unsafe { mem::zeroed() };
            let mut from_len = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
            let n = unsafe {
                libc::recvfrom(
                    self.sock.as_raw_fd(),
                    buf.as_mut_ptr().cast(),
                    buf.len(),
                    0,
                    (&raw mut from).cast::<libc::sockaddr>(),
                    &mut from_len,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                return match err.kind() {
                    io::ErrorKind::WouldBlock => Ok(None),
                    _ => Err(LinkError::Io(err)),
                };
            }
            // the kernel also queues a copy of every frame we transmit;
            // only the PHY-looped copy may satisfy the compare
            if from.sll_pkttype == PACKET_OUTGOING {
                continue;
            }
            return Ok(Some(buf[..n as usize].to_vec()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ifreq_structs_match_kernel_layout() {
        assert_eq!(mem::size_of::<MiiIfreq>(), 40);
        assert_eq!(mem::size_of::<FlagsIfreq>(), 40);
        assert_eq!(mem::size_of::<HwaddrIfreq>(), 40);
    }

    #[test]
    fn interface_names_are_bounded() {
        assert!(ifreq_name("eth0").is_ok());
        assert!(ifreq_name("").is_err());
        assert!(ifreq_name("a-very-long-interface-name").is_err());
    }
}
