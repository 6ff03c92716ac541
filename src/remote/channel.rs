use std::io::{Read, Write};

use super::error::Result;
use crate::api::ConnectionInfo;

/// An authenticated command channel into a sandbox.
///
/// Every method runs one shell command remotely and returns its exit code.
/// A non-zero exit code is not an error at this layer.
pub trait RemoteChannel {
    /// Run with the caller's terminal attached.
    fn exec(&mut self, command: &str) -> Result<i32>;

    /// Run with `stdin` streamed to the remote command's standard input.
    fn exec_with_stdin(&mut self, command: &str, stdin: &mut dyn Read) -> Result<i32>;

    /// Run with the remote standard output copied into `stdout`. Remote
    /// standard error is never written to `stdout`.
    fn exec_with_stdout(&mut self, command: &str, stdout: &mut dyn Write) -> Result<i32>;

    fn close(&mut self) -> Result<()>;
}

/// Run `command` and collect its standard output.
pub fn capture_stdout(channel: &mut dyn RemoteChannel, command: &str) -> Result<(i32, Vec<u8>)> {
    let mut buf = Vec::new();
    let code = channel.exec_with_stdout(command, &mut buf)?;
    Ok((code, buf))
}

pub trait Connector {
    fn connect(&self, info: &ConnectionInfo) -> Result<Box<dyn RemoteChannel>>;
}
