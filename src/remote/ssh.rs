//! Remote channel backed by the system `ssh` client.
//!
//! One master connection is opened per channel (`ControlMaster`) and every
//! command is multiplexed over it. The host key is pinned through a
//! throwaway `known_hosts` file; the user's own known hosts and agent are
//! never consulted.

use std::fs::{self, File};
use std::io::{self, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use tempfile::TempDir;
use tracing::{debug, warn};

use super::channel::{Connector, RemoteChannel};
use super::error::{Result, TransportError};
use super::keys::{parse_host_key, parse_private_key, HostKey, PrivateKey};
use crate::api::ConnectionInfo;

const DEFAULT_SSH_PORT: u16 = 22;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub user: String,
    pub host: String,
    pub port: u16,
}

impl SshTarget {
    /// Parse `[user@]host[:port]`. IPv6 hosts must be bracketed when a port
    /// is given.
    pub fn parse(address: &str, default_user: &str) -> Result<Self> {
        let address = address.trim();
        let invalid = || TransportError::InvalidAddress(address.to_string());

        let (user, host_port) = match address.rsplit_once('@') {
            Some((user, rest)) if !user.is_empty() => (user.to_string(), rest),
            Some(_) => return Err(invalid()),
            None => (default_user.to_string(), address),
        };

        let (host, port) = if let Some(rest) = host_port.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            let port = match tail.strip_prefix(':') {
                Some(p) => p.parse().map_err(|_| invalid())?,
                None if tail.is_empty() => DEFAULT_SSH_PORT,
                None => return Err(invalid()),
            };
            (host.to_string(), port)
        } else if host_port.matches(':').count() == 1 {
            let (host, port) = host_port.split_once(':').ok_or_else(invalid)?;
            (host.to_string(), port.parse().map_err(|_| invalid())?)
        } else {
            (host_port.to_string(), DEFAULT_SSH_PORT)
        };

        if host.is_empty() || user.is_empty() {
            return Err(invalid());
        }

        Ok(Self { user, host, port })
    }

    /// Host pattern as `ssh` writes it into `known_hosts`.
    pub fn known_hosts_pattern(&self) -> String {
        if self.port == DEFAULT_SSH_PORT {
            self.host.clone()
        } else {
            format!("[{}]:{}", self.host, self.port)
        }
    }
}

impl std::fmt::Display for SshTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

pub struct SshConnector {
    default_user: String,
}

impl SshConnector {
    pub fn new(default_user: &str) -> Self {
        Self {
            default_user: default_user.to_string(),
        }
    }
}

impl Connector for SshConnector {
    fn connect(&self, info: &ConnectionInfo) -> Result<Box<dyn RemoteChannel>> {
        let key = parse_private_key(&info.private_user_key)?;
        let host_key = parse_host_key(&info.public_host_key)?;
        let target = SshTarget::parse(&info.address, &self.default_user)?;

        let channel = SshChannel::open(target, &key, &host_key)?;
        Ok(Box::new(channel))
    }
}

/// Backgrounded master connection. It exits on its own once idle, so a
/// process killed before `close` does not leave it running.
const MASTER_ARGS: [&str; 7] = [
    "-M",
    "-N",
    "-f",
    "-o",
    "ControlMaster=yes",
    "-o",
    "ControlPersist=60",
];

pub struct SshChannel {
    target: SshTarget,
    workdir: TempDir,
    open: bool,
}

impl SshChannel {
    pub fn open(target: SshTarget, key: &PrivateKey, host_key: &HostKey) -> Result<Self> {
        let workdir = tempfile::Builder::new().prefix("sandcastle-").tempdir()?;
        write_private(&workdir.path().join("id"), key.to_pem().as_bytes())?;
        fs::write(
            workdir.path().join("known_hosts"),
            host_key.known_hosts_entry(&target.known_hosts_pattern()),
        )?;

        let mut channel = Self {
            target,
            workdir,
            open: false,
        };

        let stderr_path = channel.workdir.path().join("master.log");
        let status = channel
            .base_command()
            .args(MASTER_ARGS)
            .arg(channel.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(File::create(&stderr_path)?)
            .status()?;

        if !status.success() {
            let reason = fs::read_to_string(&stderr_path).unwrap_or_default();
            let reason = match reason.trim() {
                "" => format!("ssh exited with {}", status),
                msg => msg.to_string(),
            };
            return Err(TransportError::Connect {
                address: channel.target.to_string(),
                reason,
            });
        }

        debug!("Opened ssh master connection to {}", channel.target);
        channel.open = true;
        Ok(channel)
    }

    fn control_path(&self) -> PathBuf {
        self.workdir.path().join("cm")
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.target.user, self.target.host)
    }

    fn base_command(&self) -> Command {
        let dir = self.workdir.path();
        let mut cmd = Command::new("ssh");
        cmd.arg("-i")
            .arg(dir.join("id"))
            .arg("-p")
            .arg(self.target.port.to_string())
            .args(["-o", "IdentitiesOnly=yes"])
            .args(["-o", "IdentityAgent=none"])
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "StrictHostKeyChecking=yes"])
            .args(["-o", "GlobalKnownHostsFile=/dev/null"])
            .arg("-o")
            .arg(format!("UserKnownHostsFile={}", dir.join("known_hosts").display()))
            .args(["-o", "LogLevel=ERROR"])
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path().display()));
        cmd
    }

    fn remote_command(&self, command: &str, tty: bool) -> Result<Command> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let mut cmd = self.base_command();
        cmd.arg(if tty { "-tt" } else { "-T" })
            .arg(self.destination())
            .arg(command);
        debug!("ssh {}: {}", self.target, command);
        Ok(cmd)
    }
}

impl RemoteChannel for SshChannel {
    fn exec(&mut self, command: &str) -> Result<i32> {
        let tty = io::stdin().is_terminal() && io::stdout().is_terminal();
        let status = self.remote_command(command, tty)?.status()?;
        exit_code(status)
    }

    fn exec_with_stdin(&mut self, command: &str, stdin: &mut dyn Read) -> Result<i32> {
        let mut child = self
            .remote_command(command, false)?
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()?;

        if let Some(mut pipe) = child.stdin.take() {
            // A remote command that exits early closes the pipe; its exit
            // code is more useful than the broken-pipe error.
            if let Err(e) = io::copy(stdin, &mut pipe) {
                if e.kind() != io::ErrorKind::BrokenPipe {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(e.into());
                }
            }
        }

        exit_code(child.wait()?)
    }

    fn exec_with_stdout(&mut self, command: &str, stdout: &mut dyn Write) -> Result<i32> {
        let mut child = self
            .remote_command(command, false)?
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        if let Some(mut pipe) = child.stdout.take() {
            if let Err(e) = io::copy(&mut pipe, stdout) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e.into());
            }
        }
        stdout.flush()?;

        exit_code(child.wait()?)
    }

    fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        let output = self
            .base_command()
            .args(["-O", "exit"])
            .arg(self.destination())
            .stdin(Stdio::null())
            .output()?;
        if !output.status.success() {
            debug!(
                "ssh -O exit for {} failed: {}",
                self.target,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

impl Drop for SshChannel {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close ssh connection to {}: {}", self.target, e);
        }
    }
}

fn exit_code(status: ExitStatus) -> Result<i32> {
    status.code().ok_or(TransportError::Terminated)
}

fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::keys::test_keys::{ed25519_host_blob, openssh_private_key};

    #[test]
    fn test_master_connection_expires_when_idle() {
        let persist = MASTER_ARGS
            .iter()
            .find_map(|a| a.strip_prefix("ControlPersist="))
            .unwrap();
        assert!(persist.parse::<u32>().unwrap() > 0);
    }

    #[test]
    fn test_parse_target_host_only() {
        let t = SshTarget::parse("sandbox.example.com", "root").unwrap();
        assert_eq!(
            t,
            SshTarget {
                user: "root".to_string(),
                host: "sandbox.example.com".to_string(),
                port: 22
            }
        );
        assert_eq!(t.known_hosts_pattern(), "sandbox.example.com");
    }

    #[test]
    fn test_parse_target_with_user_and_port() {
        let t = SshTarget::parse("dev@10.1.2.3:2200", "root").unwrap();
        assert_eq!(t.user, "dev");
        assert_eq!(t.host, "10.1.2.3");
        assert_eq!(t.port, 2200);
        assert_eq!(t.known_hosts_pattern(), "[10.1.2.3]:2200");
    }

    #[test]
    fn test_parse_target_ipv6() {
        let t = SshTarget::parse("[fd00::1]:2222", "root").unwrap();
        assert_eq!(t.host, "fd00::1");
        assert_eq!(t.port, 2222);

        let bare = SshTarget::parse("fd00::1", "root").unwrap();
        assert_eq!(bare.host, "fd00::1");
        assert_eq!(bare.port, 22);
    }

    #[test]
    fn test_parse_target_invalid() {
        assert!(SshTarget::parse("", "root").is_err());
        assert!(SshTarget::parse("host:notaport", "root").is_err());
        assert!(SshTarget::parse("@host", "root").is_err());
        assert!(SshTarget::parse("[::1", "root").is_err());
    }

    #[test]
    fn test_connect_rejects_bad_private_key_before_dialing() {
        let info = ConnectionInfo::ready(
            "127.0.0.1:1",
            "garbage",
            &format!("ssh-ed25519 {}", ed25519_host_blob("ssh-ed25519")),
        );
        let err = SshConnector::new("root").connect(&info).err().unwrap();
        assert!(matches!(err, TransportError::InvalidPrivateKey(_)));
    }

    #[test]
    fn test_connect_rejects_bad_host_key_before_dialing() {
        let info = ConnectionInfo::ready("127.0.0.1:1", &openssh_private_key("none"), "nope");
        let err = SshConnector::new("root").connect(&info).err().unwrap();
        assert!(matches!(err, TransportError::InvalidHostKey(_)));
    }

    #[test]
    fn test_write_private_sets_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id");
        write_private(&path, b"secret").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"secret");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
