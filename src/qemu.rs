//! Boot the final image in QEMU.

use anyhow::{bail, Context, Result};
use std::io::{Read, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

/// Debian live default credentials.
pub const LIVE_USER: &str = "user";
pub const LIVE_PASSWORD: &str = "live";

const DONE_MARKER: &str = "___RESPIN_CMD_DONE___";
const ADDRESS_COMMAND: &str = "hostname -I";

const OVMF_PATHS: &[&str] = &[
    // Debian/Ubuntu
    "/usr/share/OVMF/OVMF_CODE_4M.fd",
    "/usr/share/OVMF/OVMF_CODE.fd",
    "/usr/share/qemu/OVMF.fd",
    // Fedora
    "/usr/share/edk2/ovmf/OVMF_CODE.fd",
    // Arch
    "/usr/share/edk2-ovmf/x64/OVMF_CODE.fd",
];

/// Find OVMF firmware for UEFI boot
pub fn find_ovmf() -> Option<PathBuf> {
    OVMF_PATHS.iter().map(PathBuf::from).find(|p| p.exists())
}

/// QEMU arguments for booting `iso` from the CD drive.
pub fn qemu_args(iso: &Path, ovmf: Option<&Path>, headless: bool) -> Vec<String> {
    let mut args: Vec<String> = ["-m", "2G", "-smp", "2", "-boot", "d"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if Path::new("/dev/kvm").exists() {
        args.extend(["-enable-kvm".to_string(), "-cpu".to_string(), "host".to_string()]);
    }
    args.push("-cdrom".to_string());
    args.push(iso.display().to_string());
    // User-mode NIC so the guest gets a DHCP lease.
    args.extend([
        "-netdev".to_string(),
        "user,id=net0".to_string(),
        "-device".to_string(),
        "virtio-net-pci,netdev=net0".to_string(),
    ]);
    if let Some(fw) = ovmf {
        args.push("-drive".to_string());
        args.push(format!("if=pflash,format=raw,readonly=on,file={}", fw.display()));
    }
    if headless {
        args.extend([
            "-nographic".to_string(),
            "-serial".to_string(),
            "mon:stdio".to_string(),
            "-no-reboot".to_string(),
        ]);
    } else {
        args.extend(["-vga".to_string(), "std".to_string()]);
    }
    args
}

fn require_iso(iso: &Path) -> Result<()> {
    if !iso.is_file() {
        bail!(
            "Image not found at {}. Run 'respin build' first.",
            iso.display()
        );
    }
    Ok(())
}

/// Run the image in a QEMU window.
pub fn run_iso(iso: &Path, force_bios: bool) -> Result<()> {
    require_iso(iso)?;

    println!("Running image in QEMU...");
    println!("  ISO: {}", iso.display());

    let ovmf = if force_bios { None } else { find_ovmf() };
    match (&ovmf, force_bios) {
        (_, true) => println!("  Boot: BIOS (legacy)"),
        (Some(fw), _) => println!("  Boot: UEFI ({})", fw.display()),
        (None, _) => println!("  Boot: BIOS (OVMF not found, install ovmf for UEFI)"),
    }

    let status = Command::new("qemu-system-x86_64")
        .args(qemu_args(iso, ovmf.as_deref(), false))
        .status()
        .context("Failed to run qemu-system-x86_64. Is QEMU installed?")?;

    if !status.success() {
        bail!("QEMU exited with status: {}", status);
    }
    Ok(())
}

/// Where the serial conversation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Booting,
    SentUser,
    SentPassword,
    SentCommand,
    Done,
}

/// Scripted serial console login that runs one address query.
///
/// Fed raw console output; answers with the next thing to type.
#[derive(Debug)]
pub struct SerialSession {
    phase: Phase,
    pending: String,
    captured: String,
}

impl Default for SerialSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialSession {
    pub fn new() -> Self {
        Self {
            phase: Phase::Booting,
            pending: String::new(),
            captured: String::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Output seen after the address query was sent.
    pub fn captured(&self) -> &str {
        &self.captured
    }

    /// Consume console output; returns input to send, if any.
    pub fn feed(&mut self, chunk: &str) -> Option<String> {
        if self.phase == Phase::SentCommand {
            self.captured.push_str(chunk);
            if self.captured.lines().any(|l| l.trim() == DONE_MARKER) {
                self.phase = Phase::Done;
            }
            return None;
        }

        self.pending.push_str(chunk);
        let tail = self.pending.trim_end_matches(['\r', '\n']);
        let at_prompt = tail.ends_with("$ ") || tail.ends_with("# ");

        let reply = match self.phase {
            Phase::Booting if tail.ends_with("login:") || tail.ends_with("login: ") => {
                self.phase = Phase::SentUser;
                Some(format!("{}\n", LIVE_USER))
            }
            Phase::SentUser if tail.ends_with("Password:") || tail.ends_with("Password: ") => {
                self.phase = Phase::SentPassword;
                Some(format!("{}\n", LIVE_PASSWORD))
            }
            Phase::Booting | Phase::SentPassword if at_prompt => {
                self.phase = Phase::SentCommand;
                Some(format!("{}; echo {}\n", ADDRESS_COMMAND, DONE_MARKER))
            }
            _ => None,
        };
        if reply.is_some() {
            self.pending.clear();
        }
        reply
    }
}

/// Non-loopback addresses reported by `hostname -I` in `output`.
pub fn reported_addresses(output: &str) -> Vec<IpAddr> {
    output
        .lines()
        .take_while(|l| l.trim() != DONE_MARKER)
        .flat_map(str::split_whitespace)
        .filter_map(|t| t.parse::<IpAddr>().ok())
        .filter(|ip| !ip.is_loopback())
        .collect()
}

/// Boot the image headless, log in on the serial console and check that
/// the guest got a network address.
pub fn test_iso(iso: &Path, timeout_secs: u64) -> Result<()> {
    require_iso(iso)?;

    println!("Testing {} (timeout {}s)", iso.display(), timeout_secs);

    let mut child = Command::new("qemu-system-x86_64")
        .args(qemu_args(iso, find_ovmf().as_deref(), true))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .context("Failed to spawn QEMU")?;

    let mut stdin = child.stdin.take().context("QEMU stdin not captured")?;
    let mut stdout = child.stdout.take().context("QEMU stdout not captured")?;

    // Prompts have no trailing newline, so read raw chunks rather than lines.
    let (tx, rx) = mpsc::channel::<String>();
    let reader = std::thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match stdout.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(String::from_utf8_lossy(&buf[..n]).into_owned()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let start = Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    let mut session = SerialSession::new();

    println!("\n--- Waiting for boot ---");
    let outcome = loop {
        if start.elapsed() > timeout {
            break Err(anyhow::anyhow!("Timeout after {} seconds", timeout_secs));
        }
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(chunk) => {
                print!("{}", chunk);
                if let Some(input) = session.feed(&chunk) {
                    let sent = stdin.write_all(input.as_bytes()).and_then(|_| stdin.flush());
                    if let Err(e) = sent {
                        break Err(anyhow::Error::new(e).context("Failed to write to the serial console"));
                    }
                }
                if session.is_done() {
                    break Ok(());
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                break Err(anyhow::anyhow!("QEMU exited before the address query finished"))
            }
        }
    };

    let _ = child.kill();
    let _ = child.wait();
    let _ = reader.join();
    outcome?;

    let addresses = reported_addresses(session.captured());
    if addresses.is_empty() {
        bail!("Guest reported no network address ({} printed nothing usable)", ADDRESS_COMMAND);
    }
    println!(
        "\n--- Boot test passed: {} ---",
        addresses
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_conversation() {
        let mut s = SerialSession::new();
        assert_eq!(s.feed("[  OK  ] Reached target multi-user.target\n"), None);
        assert_eq!(s.feed("debian login: "), Some("user\n".to_string()));
        assert_eq!(s.feed("Password: "), Some("live\n".to_string()));
        let cmd = s.feed("user@debian:~$ ").unwrap();
        assert!(cmd.starts_with("hostname -I; echo "));

        s.feed("hostname -I; echo ___RESPIN_CMD_DONE___\r\n10.0.2.15 fec0::5054:ff:fe12:3456 \r\n");
        assert!(!s.is_done());
        s.feed("___RESPIN_CMD_DONE___\r\n");
        assert!(s.is_done());

        let addrs = reported_addresses(s.captured());
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[0].to_string(), "10.0.2.15");
    }

    #[test]
    fn test_autologin_prompt_skips_credentials() {
        let mut s = SerialSession::new();
        let cmd = s.feed("root@debian:~# ").unwrap();
        assert!(cmd.contains(DONE_MARKER));
    }

    #[test]
    fn test_loopback_only_is_empty() {
        assert!(reported_addresses("127.0.0.1 ::1\n").is_empty());
        assert!(reported_addresses("\n").is_empty());
    }

    #[test]
    fn test_headless_args_use_serial() {
        let args = qemu_args(Path::new("/w/respin.iso"), None, true);
        let cdrom = args.iter().position(|a| a == "-cdrom").unwrap();
        assert_eq!(args[cdrom + 1], "/w/respin.iso");
        assert!(args.iter().any(|a| a == "-nographic"));
        assert!(args.iter().any(|a| a == "mon:stdio"));
        assert!(!args.iter().any(|a| a.starts_with("if=pflash")));
    }

    #[test]
    fn test_uefi_args_add_pflash() {
        let args = qemu_args(Path::new("x.iso"), Some(Path::new("/fw/OVMF.fd")), false);
        assert!(args.iter().any(|a| a == "if=pflash,format=raw,readonly=on,file=/fw/OVMF.fd"));
        assert!(args.iter().any(|a| a == "std"));
    }
}
