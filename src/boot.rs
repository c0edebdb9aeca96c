use std::process::Command;

use crate::link::LinkError;

/// Hand a re-assembled command line to the system shell. This is the
/// userland stand-in for the firmware's simple command interpreter and
/// carries the cable-based DHCP/TFTP path.
pub fn run(cmd: &str) -> Result<(), LinkError> {
    if cmd.trim().is_empty() {
        return Err(LinkError::Invalid("empty net boot command".into()));
    }
    eprintln!("[boot] {cmd}");
    let status = Command::new("sh").arg("-c").arg(cmd).status()?;
    if status.success() {
        Ok(())
    } else {
        let code = status.code().unwrap_or(-1);
        eprintln!("net boot error: {code}");
        Err(LinkError::Boot(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_command_is_invalid() {
        let err = run("  ").unwrap_err();
        assert_eq!(err.code(), -libc::EINVAL);
    }

    #[test]
    fn exit_status_is_propagated() {
        assert!(run("true").is_ok());
        let err = run("exit 3").unwrap_err();
        assert!(matches!(err, LinkError::Boot(3)));
    }
}
