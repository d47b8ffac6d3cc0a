//! Running commands on a remote host over SSH.

use std::{
    fmt,
    io::{self, Read},
    net::TcpStream,
    thread,
    time::Duration,
};

use async_trait::async_trait;
use snafu::{ResultExt, Snafu};

const SSH_PORT: u16 = 22;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("unable to connect to {address}: {source}"))]
    Connect {
        address: String,
        source: std::io::Error,
    },

    #[snafu(display("SSH handshake with {address} failed: {source}"))]
    Handshake {
        address: String,
        source: ssh2::Error,
    },

    #[snafu(display("authentication as {username:?} failed: {source}"))]
    Authenticate {
        username: String,
        source: ssh2::Error,
    },

    #[snafu(display("unable to run {command:?}: {source}"))]
    Exec {
        command: String,
        source: ssh2::Error,
    },

    #[snafu(display("unable to read output of {command:?}: {source}"))]
    Output {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("SSH task failed: {source}"))]
    Join { source: tokio::task::JoinError },
}

/// Where and as whom to run commands. Authentication is by password.
#[derive(Clone)]
pub struct RemoteHost {
    pub address: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for RemoteHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHost")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &"**REDACTED**")
            .finish()
    }
}

impl RemoteHost {
    /// `address` with the SSH port appended when none is given.
    fn socket_address(&self) -> String {
        let has_port = match self.address.rsplit_once(':') {
            // A bare IPv6 address has colons but no brackets.
            Some((host, port)) => {
                (!host.contains(':') || host.ends_with(']')) && port.parse::<u16>().is_ok()
            }
            None => false,
        };
        if has_port {
            self.address.clone()
        } else if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{SSH_PORT}", self.address)
        } else {
            format!("{}:{SSH_PORT}", self.address)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Runs `command` in a fresh session on `host` and waits for it to exit.
    async fn exec(&self, host: &RemoteHost, command: &str) -> Result<CommandOutput, Error>;
}

/// [`RemoteShell`] backed by libssh2. Host keys are not verified.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshShell;

#[async_trait]
impl RemoteShell for SshShell {
    async fn exec(&self, host: &RemoteHost, command: &str) -> Result<CommandOutput, Error> {
        let host = host.clone();
        let command = command.to_owned();
        tokio::task::spawn_blocking(move || exec_blocking(&host, &command))
            .await
            .context(JoinSnafu)?
    }
}

fn exec_blocking(host: &RemoteHost, command: &str) -> Result<CommandOutput, Error> {
    let address = host.socket_address();
    let tcp = TcpStream::connect(&address).context(ConnectSnafu {
        address: address.as_str(),
    })?;

    let mut session = ssh2::Session::new().context(HandshakeSnafu {
        address: address.as_str(),
    })?;
    session.set_tcp_stream(tcp);
    session.handshake().context(HandshakeSnafu {
        address: address.as_str(),
    })?;
    session
        .userauth_password(&host.username, &host.password)
        .context(AuthenticateSnafu {
            username: host.username.as_str(),
        })?;

    let mut channel = session.channel_session().context(ExecSnafu { command })?;
    channel.exec(command).context(ExecSnafu { command })?;

    session.set_blocking(false);
    let (stdout, stderr) =
        collect_output(&mut channel.stream(0), &mut channel.stderr(), || channel.eof())
            .context(OutputSnafu { command })?;
    session.set_blocking(true);

    channel.wait_close().context(ExecSnafu { command })?;
    let output = CommandOutput {
        exit_status: channel.exit_status().context(ExecSnafu { command })?,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    };

    Ok(output)
}

/// Reads both streams as data arrives, so a command filling one of them
/// never stalls waiting for the other to be read. The streams must be
/// non-blocking.
fn collect_output(
    stdout: &mut impl Read,
    stderr: &mut impl Read,
    finished: impl Fn() -> bool,
) -> io::Result<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    let mut err = Vec::new();
    loop {
        // Checked before draining so nothing sent ahead of EOF is left behind.
        let done = finished();
        let progressed = drain(stdout, &mut out)? | drain(stderr, &mut err)?;
        if done {
            return Ok((out, err));
        }
        if !progressed {
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Reads whatever is available right now. Returns whether anything was read.
fn drain(reader: &mut impl Read, buffer: &mut Vec<u8>) -> io::Result<bool> {
    let mut chunk = [0; 8192];
    let mut progressed = false;
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => return Ok(progressed),
            Ok(read) => {
                buffer.extend_from_slice(&chunk[..read]);
                progressed = true;
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(progressed),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
}
