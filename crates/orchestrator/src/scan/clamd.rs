#![forbid(unsafe_code)]

use crate::error::Error;
use crate::scan::{ScanResult, Scanner};
use std::ffi::OsStr;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(String),
}

/// Talks to a running clamd using the NUL-delimited command form
/// (`zSCAN`, `zPING`), which carries any path byte-for-byte, newlines and
/// non-UTF-8 names included. One connection per command.
#[derive(Debug, Clone)]
pub struct ClamdScanner {
    endpoint: Endpoint,
    timeout: Duration,
}

impl ClamdScanner {
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }

    pub fn from_config(config: &config::Clamd) -> Result<Self, Error> {
        let endpoint = match (&config.address, &config.socket) {
            (Some(address), _) => Endpoint::Tcp(address.clone()),
            (None, Some(socket)) => Endpoint::Unix(socket.clone()),
            (None, None) => return Err(Error::NoEndpoint),
        };
        Ok(Self::new(endpoint, config.timeout))
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn ping(&self) -> Result<(), Error> {
        let reply = self.command(b"zPING\0")?;
        match reply.trim_ascii_end() {
            b"PONG" => Ok(()),
            other => Err(Error::Protocol(format!(
                "unexpected reply to PING: {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    fn command(&self, command: &[u8]) -> Result<Vec<u8>, Error> {
        trace!(endpoint = ?self.endpoint, command = %String::from_utf8_lossy(command), "clamd command");
        match &self.endpoint {
            Endpoint::Unix(path) => {
                let stream = UnixStream::connect(path)?;
                stream.set_read_timeout(Some(self.timeout))?;
                stream.set_write_timeout(Some(self.timeout))?;
                exchange(stream, command)
            }
            Endpoint::Tcp(address) => {
                let mut last_err = None;
                for addr in address.to_socket_addrs()? {
                    match TcpStream::connect_timeout(&addr, self.timeout) {
                        Ok(stream) => {
                            stream.set_read_timeout(Some(self.timeout))?;
                            stream.set_write_timeout(Some(self.timeout))?;
                            return exchange(stream, command);
                        }
                        Err(err) => last_err = Some(err),
                    }
                }
                Err(last_err
                    .map(Error::Io)
                    .unwrap_or_else(|| Error::Protocol(format!("{address} resolves to nothing"))))
            }
        }
    }
}

impl Scanner for ClamdScanner {
    fn scan(&self, path: &Path) -> Result<ScanResult, Error> {
        let raw = path.as_os_str().as_bytes();
        if raw.contains(&0) {
            return Err(Error::Scan {
                path: path.to_path_buf(),
                reason: "path contains a NUL byte".to_owned(),
            });
        }

        let mut command = Vec::with_capacity(raw.len() + 7);
        command.extend_from_slice(b"zSCAN ");
        command.extend_from_slice(raw);
        command.push(0);

        let reply = self.command(&command)?;
        let result = parse_reply(&reply)?;
        debug!(path = %path.display(), ok = result.is_ok(), "scanned");
        Ok(result)
    }
}

fn exchange<S: Read + Write>(mut stream: S, command: &[u8]) -> Result<Vec<u8>, Error> {
    stream.write_all(command)?;
    stream.flush()?;

    // Non-session commands get their whole reply followed by EOF.
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply)?;
    Ok(reply)
}

/// Parse the reply records of a SCAN command:
/// `<path>: OK`, `<path>: <signature> FOUND` or `<path>: <reason> ERROR`.
/// Records end with NUL, or newline when the reply has no NUL. Paths are kept as
/// raw bytes.
///
/// Signatures never contain `": "`, so OK and FOUND records split at the
/// last separator. Error reasons often do, so ERROR records split at the
/// first.
pub(crate) fn parse_reply(reply: &[u8]) -> Result<ScanResult, Error> {
    let mut result = ScanResult::clean();
    let mut seen = false;
    // The z form terminates records with NUL, which leaves newlines free to
    // appear inside a path.
    let delimiter = if reply.contains(&0) { 0 } else { b'\n' };
    let records = reply
        .split(|&b| b == delimiter)
        .map(<[u8]>::trim_ascii_end)
        .filter(|record| !record.is_empty());
    for record in records {
        let protocol_err = || Error::Protocol(String::from_utf8_lossy(record).into_owned());
        if let Some(rest) = record.strip_suffix(b" ERROR") {
            let (path, reason) = split_at_separator(rest, false).ok_or_else(protocol_err)?;
            return Err(Error::Scan {
                path: path_of(path),
                reason: String::from_utf8_lossy(reason).into_owned(),
            });
        }
        let (path, status) = split_at_separator(record, true).ok_or_else(protocol_err)?;
        if let Some(signature) = status.strip_suffix(b" FOUND") {
            result.add_virus(path_of(path), String::from_utf8_lossy(signature));
        } else if status != b"OK" {
            return Err(protocol_err());
        }
        seen = true;
    }
    if !seen {
        return Err(Error::Protocol("empty reply".to_owned()));
    }
    Ok(result)
}

/// Split around the first or last `": "`.
fn split_at_separator(record: &[u8], last: bool) -> Option<(&[u8], &[u8])> {
    let mut hits = record.windows(2).enumerate().filter(|(_, w)| *w == b": ");
    let (at, _) = if last { hits.last() } else { hits.next() }?;
    Some((&record[..at], &record[at + 2..]))
}

fn path_of(bytes: &[u8]) -> PathBuf {
    PathBuf::from(OsStr::from_bytes(bytes))
}
