use std::io::{self, Write};
use std::thread;
use std::time::Duration;

use crate::frame::TestFrame;
use crate::link::{EthLink, LinkError};
use crate::regs::*;
use crate::stats::SweepStats;

pub const MAX_TX_DELAY_LINE: u8 = 0x7f;
pub const MAX_RX_DELAY_LINE: u8 = 0x7f;

/// Wait after the frame pattern is built before the first transmit.
const WARMUP: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    M10,
    M100,
    M1000,
}

impl Speed {
    pub fn from_mbps(mbps: u32) -> Option<Self> {
        match mbps {
            10 => Some(Speed::M10),
            100 => Some(Speed::M100),
            1000 => Some(Speed::M1000),
            _ => None,
        }
    }

    pub fn mbps(self) -> u32 {
        match self {
            Speed::M10 => 10,
            Speed::M100 => 100,
            Speed::M1000 => 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestMode {
    /// One (0,0) attempt, result returned directly.
    Single,
    /// Exhaustive delay-line characterization; the operator reads the
    /// passing window out of the printed grid.
    Sweep,
}

/// Post-transmit wait before polling receive. Heuristic margins; boards
/// with different timing adjust these from the command line.
#[derive(Debug, Clone, Copy)]
pub struct Settle {
    pub mbit: Duration,
    pub gbit: Duration,
}

impl Settle {
    pub fn for_speed(&self, speed: Speed) -> Duration {
        match speed {
            Speed::M1000 => self.gbit,
            _ => self.mbit,
        }
    }
}

/// Outcome of one transmit/poll attempt.
#[derive(Debug)]
pub enum Shot {
    Match,
    Mismatch,
    NoFrame,
    Fault(LinkError),
}

impl Shot {
    /// Grid glyph.
    pub fn glyph(&self) -> char {
        match self {
            Shot::Match => '*',
            Shot::Mismatch => 'x',
            Shot::NoFrame => '?',
            Shot::Fault(_) => ' ',
        }
    }

    fn error(self) -> Option<LinkError> {
        match self {
            Shot::Match => None,
            Shot::Mismatch => Some(LinkError::Mismatch),
            Shot::NoFrame => Some(LinkError::Busy),
            Shot::Fault(e) => Some(e),
        }
    }
}

/// Program the RGMII delay lines directly. No loopback configuration and
/// no test traffic; succeeds unconditionally once the values are written.
pub fn program_delay_lines(
    link: &mut dyn EthLink,
    tx: u8,
    rx: u8,
) -> Result<(), LinkError> {
    link.set_rgmii_delay(tx, rx);
    Ok(())
}

/// Program MAC and PHY for internal loopback at the requested speed.
///
/// The MAC side selects the MII port below 1000 Mbit and forces full
/// duplex; the PHY side drops autoneg and power-down, raises loopback and
/// sets the speed bits. Resolving the PHY comes first: a bus with no PHY
/// fails the whole test here instead of sweeping unconfigured hardware.
pub fn setup(link: &mut dyn EthLink, speed: Speed) -> Result<(), LinkError> {
    let addr = link.resolve_phy()?;
    eprintln!("[eth] phy at mdio address {addr}");

    let mut conf = link.mac_ctrl();
    if speed == Speed::M1000 {
        conf &= !MAC_MII_PORT_SELECT;
    } else {
        conf |= MAC_MII_PORT_SELECT;
    }
    if speed == Speed::M100 {
        conf |= MAC_FES_100;
    }
    conf |= MAC_FULL_DUPLEX;
    link.set_mac_ctrl(conf);

    let mut bmcr = link.phy_read(MII_BMCR)?;
    bmcr &= !(BMCR_ANENABLE | BMCR_PDOWN);
    bmcr |= BMCR_LOOPBACK | BMCR_FULLDPLX;
    match speed {
        Speed::M1000 => {
            bmcr |= BMCR_SPEED1000;
            bmcr &= !BMCR_SPEED100;
        }
        Speed::M100 => {
            bmcr &= !BMCR_SPEED1000;
            bmcr |= BMCR_SPEED100;
        }
        Speed::M10 => bmcr &= !(BMCR_SPEED1000 | BMCR_SPEED100),
    }
    link.phy_write(MII_BMCR, bmcr)
}

/// Configure loopback, restart the receive path and run the test.
pub fn run(
    link: &mut dyn EthLink,
    speed: Speed,
    mode: TestMode,
    settle: Settle,
) -> Result<(), LinkError> {
    if !link.is_active() {
        return Err(LinkError::NotActive(link.name().to_string()));
    }
    setup(link, speed)?;
    if let Err(e) = link.start() {
        link.halt();
        eprintln!("[eth] start failed: {e}");
        return Err(e);
    }

    eprintln!(
        "[eth] {} at {} Mbit",
        match mode {
            TestMode::Single => "single-shot loopback",
            TestMode::Sweep => "delay-line sweep",
        },
        speed.mbps()
    );
    run_frames(link, speed, mode, settle)
}

fn run_frames(
    link: &mut dyn EthLink,
    speed: Speed,
    mode: TestMode,
    settle: Settle,
) -> Result<(), LinkError> {
    let mut frame = TestFrame::new(link.hwaddr());
    thread::sleep(WARMUP);

    let sweep = mode == TestMode::Sweep;
    let mut stats = SweepStats::new();
    let mut last_err: Option<LinkError> = None;

    for tx in 0..MAX_TX_DELAY_LINE {
        if sweep {
            print!("[0x{tx:02x}]:");
        }
        for rx in 0..MAX_RX_DELAY_LINE {
            if sweep {
                link.set_rgmii_delay(tx, rx);
            }

            frame.tag(tx, rx);
            let shot = one_shot(link, &frame, settle.for_speed(speed));
            print!("{}", shot.glyph());
            stats.record(&shot);

            if !sweep {
                println!();
                return shot.error().map_or(Ok(()), Err);
            }
            if let Some(err) = shot.error() {
                last_err = Some(err);
            }
        }
        println!();
        let _ = io::stdout().flush();
    }

    stats.summary();
    if stats.matched > 0 {
        Ok(())
    } else {
        Err(last_err.unwrap_or(LinkError::Busy))
    }
}

fn one_shot(link: &mut dyn EthLink, frame: &TestFrame, settle: Duration) -> Shot {
    if let Err(e) = link.send(frame.as_bytes()) {
        return Shot::Fault(e);
    }
    // give the MAC time to loop the frame back
    thread::sleep(settle);
    match link.recv() {
        Ok(Some(echo)) => {
            if frame.matches(&echo) {
                Shot::Match
            } else {
                Shot::Mismatch
            }
        }
        Ok(None) => Shot::NoFrame,
        Err(e) => Shot::Fault(e),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// What the mock hands back on a receive poll.
    #[derive(Clone, Copy)]
    enum Rx {
        /// Echo the last transmitted frame.
        Echo,
        /// Echo with one byte flipped at the given index.
        Corrupt(usize),
        Nothing,
        Fault,
    }

    struct MockLink {
        phy_addr: Option<u8>,
        phy_regs: [u16; 32],
        mac_ctrl: u32,
        fail_start: bool,
        halted: bool,
        delays: Vec<(u8, u8)>,
        sent: Vec<Vec<u8>>,
        script: VecDeque<Rx>,
        fallback: Rx,
    }

    impl MockLink {
        fn new() -> Self {
            Self {
                phy_addr: Some(1),
                phy_regs: [0; 32],
                mac_ctrl: 0,
                fail_start: false,
                halted: false,
                delays: Vec::new(),
                sent: Vec::new(),
                script: VecDeque::new(),
                fallback: Rx::Nothing,
            }
        }

        fn bmcr(&self) -> u16 {
            self.phy_regs[MII_BMCR as usize]
        }
    }

    impl EthLink for MockLink {
        fn name(&self) -> &str {
            "mock0"
        }
        fn hwaddr(&self) -> [u8; 6] {
            [0x02, 0x00, 0x00, 0x00, 0x00, 0x01]
        }
        fn is_active(&self) -> bool {
            true
        }
        fn resolve_phy(&mut self) -> Result<u8, LinkError> {
            self.phy_addr.ok_or(LinkError::NoPhy)
        }
        fn phy_read(&mut self, reg: u8) -> Result<u16, LinkError> {
            Ok(self.phy_regs[reg as usize])
        }
        fn phy_write(&mut self, reg: u8, val: u16) -> Result<(), LinkError> {
            self.phy_regs[reg as usize] = val;
            Ok(())
        }
        fn mac_ctrl(&mut self) -> u32 {
            self.mac_ctrl
        }
        fn set_mac_ctrl(&mut self, val: u32) {
            self.mac_ctrl = val;
        }
        fn set_rgmii_delay(&mut self, tx: u8, rx: u8) {
            self.delays.push((tx, rx));
        }
        fn start(&mut self) -> Result<(), LinkError> {
            if self.fail_start {
                Err(LinkError::Io(std::io::Error::from_raw_os_error(libc::EIO)))
            } else {
                Ok(())
            }
        }
        fn halt(&mut self) {
            self.halted = true;
        }
        fn send(&mut self, frame: &[u8]) -> Result<(), LinkError> {
            self.sent.push(frame.to_vec());
            Ok(())
        }
        fn recv(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
            let action = self.script.pop_front().unwrap_or(self.fallback);
            match action {
                Rx::Echo => Ok(self.sent.last().cloned()),
                Rx::Corrupt(i) => {
                    let mut f = self.sent.last().cloned().unwrap_or_default();
                    if let Some(b) = f.get_mut(i) {
                        *b ^= 0x01;
                    }
                    Ok(Some(f))
                }
                Rx::Nothing => Ok(None),
                Rx::Fault => Err(LinkError::Io(std::io::Error::from_raw_os_error(libc::EIO))),
            }
        }
    }

    fn fast() -> Settle {
        Settle {
            mbit: Duration::ZERO,
            gbit: Duration::ZERO,
        }
    }

    const PAIRS: usize = MAX_TX_DELAY_LINE as usize * MAX_RX_DELAY_LINE as usize;

    #[test]
    fn single_shot_match_succeeds() {
        let mut link = MockLink::new();
        link.fallback = Rx::Echo;
        run(&mut link, Speed::M1000, TestMode::Single, fast()).unwrap();
        assert_eq!(link.sent.len(), 1);
        // a single shot never touches the delay lines
        assert!(link.delays.is_empty());
    }

    #[test]
    fn single_shot_mismatch_reports_invalid() {
        let mut link = MockLink::new();
        link.fallback = Rx::Corrupt(20);
        let err = run(&mut link, Speed::M1000, TestMode::Single, fast()).unwrap_err();
        assert!(matches!(err, LinkError::Mismatch));
        assert_eq!(err.code(), -libc::EINVAL);
    }

    #[test]
    fn single_shot_without_frame_reports_busy() {
        let mut link = MockLink::new();
        link.fallback = Rx::Nothing;
        let err = run(&mut link, Speed::M100, TestMode::Single, fast()).unwrap_err();
        assert!(matches!(err, LinkError::Busy));
        assert_eq!(err.code(), -libc::EBUSY);
    }

    #[test]
    fn single_shot_fault_is_propagated() {
        let mut link = MockLink::new();
        link.fallback = Rx::Fault;
        let err = run(&mut link, Speed::M1000, TestMode::Single, fast()).unwrap_err();
        assert_eq!(err.code(), -libc::EIO);
    }

    #[test]
    fn setup_programs_gigabit_bits() {
        let mut link = MockLink::new();
        link.phy_regs[MII_BMCR as usize] = BMCR_ANENABLE | BMCR_PDOWN | BMCR_SPEED100;
        setup(&mut link, Speed::M1000).unwrap();

        let bmcr = link.bmcr();
        assert_ne!(bmcr & BMCR_LOOPBACK, 0);
        assert_ne!(bmcr & BMCR_FULLDPLX, 0);
        assert_ne!(bmcr & BMCR_SPEED1000, 0);
        assert_eq!(bmcr & (BMCR_ANENABLE | BMCR_PDOWN | BMCR_SPEED100), 0);

        assert_eq!(link.mac_ctrl & MAC_MII_PORT_SELECT, 0);
        assert_ne!(link.mac_ctrl & MAC_FULL_DUPLEX, 0);
    }

    #[test]
    fn setup_programs_mii_speeds() {
        let mut link = MockLink::new();
        setup(&mut link, Speed::M100).unwrap();
        assert_ne!(link.bmcr() & BMCR_SPEED100, 0);
        assert_eq!(link.bmcr() & BMCR_SPEED1000, 0);
        assert_ne!(link.mac_ctrl & MAC_MII_PORT_SELECT, 0);
        assert_ne!(link.mac_ctrl & MAC_FES_100, 0);

        let mut link = MockLink::new();
        setup(&mut link, Speed::M10).unwrap();
        assert_eq!(link.bmcr() & (BMCR_SPEED1000 | BMCR_SPEED100), 0);
        assert_ne!(link.mac_ctrl & MAC_MII_PORT_SELECT, 0);
        assert_eq!(link.mac_ctrl & MAC_FES_100, 0);
    }

    #[test]
    fn missing_phy_fails_before_any_traffic() {
        let mut link = MockLink::new();
        link.phy_addr = None;
        let err = run(&mut link, Speed::M1000, TestMode::Sweep, fast()).unwrap_err();
        assert!(matches!(err, LinkError::NoPhy));
        assert!(link.sent.is_empty());
        assert!(link.delays.is_empty());
    }

    #[test]
    fn start_failure_halts_then_propagates() {
        let mut link = MockLink::new();
        link.fail_start = true;
        let err = run(&mut link, Speed::M1000, TestMode::Single, fast()).unwrap_err();
        assert_eq!(err.code(), -libc::EIO);
        assert!(link.halted);
        assert!(link.sent.is_empty());
    }

    #[test]
    fn sweep_succeeds_when_any_pair_matches() {
        let mut link = MockLink::new();
        // only the third attempt loops back
        link.script = VecDeque::from([Rx::Nothing, Rx::Nothing, Rx::Echo]);
        link.fallback = Rx::Nothing;
        run(&mut link, Speed::M1000, TestMode::Sweep, fast()).unwrap();

        assert_eq!(link.sent.len(), PAIRS);
        assert_eq!(link.delays.len(), PAIRS);
        assert_eq!(link.delays[0], (0x00, 0x00));
        assert_eq!(*link.delays.last().unwrap(), (0x7e, 0x7e));
    }

    #[test]
    fn sweep_with_no_pass_reports_last_error() {
        let mut link = MockLink::new();
        link.fallback = Rx::Nothing;
        let err = run(&mut link, Speed::M1000, TestMode::Sweep, fast()).unwrap_err();
        assert_eq!(err.code(), -libc::EBUSY);
    }

    #[test]
    fn sweep_tolerates_transport_faults() {
        let mut link = MockLink::new();
        link.script = VecDeque::from([Rx::Fault, Rx::Fault, Rx::Echo]);
        link.fallback = Rx::Nothing;
        run(&mut link, Speed::M1000, TestMode::Sweep, fast()).unwrap();
        assert_eq!(link.sent.len(), PAIRS);
    }

    #[test]
    fn delay_line_programming_sends_no_traffic() {
        let mut link = MockLink::new();
        program_delay_lines(&mut link, 0x10, 0x20).unwrap();
        assert_eq!(link.delays, vec![(0x10, 0x20)]);
        assert!(link.sent.is_empty());
        // not even the PHY is touched
        assert_eq!(link.bmcr(), 0);
    }

    #[test]
    fn sweep_retags_the_same_frame() {
        let mut link = MockLink::new();
        link.fallback = Rx::Echo;
        run(&mut link, Speed::M1000, TestMode::Sweep, fast()).unwrap();
        // second attempt carries the (0,1) sentinels on top of (0,0)
        let second = &link.sent[1];
        assert_eq!(second[crate::frame::HDR_SIZE + 750], 0xbe);
        assert_eq!(second[crate::frame::HDR_SIZE + 751], 0xaf);
    }
}
