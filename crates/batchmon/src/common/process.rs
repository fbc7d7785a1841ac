use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

/// Answers whether an OS process still exists.
pub trait ProcessProbe: Send + Sync {
    fn process_exists(&self, pid: i64) -> std::io::Result<bool>;
}

/// Probes processes of the local host with a null signal.
#[derive(Default)]
pub struct SystemProcessProbe;

impl ProcessProbe for SystemProcessProbe {
    fn process_exists(&self, pid: i64) -> std::io::Result<bool> {
        // Zero and negative values address process groups.
        let pid = i32::try_from(pid).ok().filter(|pid| *pid > 0).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Invalid process id {pid}"),
            )
        })?;
        match kill(Pid::from_raw(pid), None) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            // The process exists, but belongs to somebody else
            Err(Errno::EPERM) => Ok(true),
            Err(errno) => Err(std::io::Error::from(errno)),
        }
    }
}
