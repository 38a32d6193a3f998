//! services/process.rs
//! Sondeo y señales sobre procesos del SO por pid.

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{kill, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// `true` si el pid existe y no es un zombie.
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    match kill(Pid::from_raw(pid as i32), None) {
        // EPERM: existe, pero es de otro usuario
        Ok(()) | Err(Errno::EPERM) => !is_zombie(pid),
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_alive(_pid: u32) -> bool {
    false
}

/// Estado `Z` en /proc/<pid>/stat. Sin /proc (macOS) se asume vivo.
#[cfg(unix)]
fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // El nombre del comando va entre paréntesis y puede contener espacios
    stat.rsplit_once(')')
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .map(|state| state == "Z")
        .unwrap_or(false)
}

/// Pide salida ordenada (SIGTERM).
#[cfg(unix)]
pub fn terminate(pid: u32) -> bool {
    send(pid, Signal::SIGTERM)
}

#[cfg(not(unix))]
pub fn terminate(_pid: u32) -> bool {
    false
}

/// SIGKILL.
#[cfg(unix)]
pub fn force_kill(pid: u32) -> bool {
    send(pid, Signal::SIGKILL)
}

#[cfg(not(unix))]
pub fn force_kill(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn send(pid: u32, signal: Signal) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    match kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) => true,
        Err(err) => {
            log::warn!("(process::send) {} a pid {} falló: {}", signal, pid, err);
            false
        }
    }
}
