//! Remote file service contract and its FTP implementation.
//!
//! A session handles one operation at a time, so concurrent transfers each
//! open their own session through a [`Connector`].

use crate::config::RemoteCredentials;
use crate::error::RemoteError;
use crate::types::RemoteEntry;
use std::io::{Read, Write};
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Status};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Size of the buffer used when streaming remote content to disk.
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// One logical connection to the remote service.
///
/// Dropping the session releases the connection.
pub trait RemoteSession: Send {
    /// Lists the immediate children of `dir`.
    fn list_dir(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// Returns the size of a remote file in bytes.
    fn size(&mut self, path: &str) -> Result<u64, RemoteError>;

    /// Returns the server's last-modified timestamp for a remote file.
    ///
    /// The value is opaque and only ever compared for equality.
    fn modified_at(&mut self, path: &str) -> Result<String, RemoteError>;

    /// Streams the full content of `path` into `sink`, returning the number
    /// of bytes written. Stops with [`RemoteError::Cancelled`] once `cancel`
    /// fires.
    fn retrieve(
        &mut self,
        path: &str,
        sink: &mut dyn Write,
        cancel: &CancellationToken,
    ) -> Result<u64, RemoteError>;
}

/// Opens fresh, independent sessions.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError>;
}

/// Connector for the FTP service.
#[derive(Debug, Clone)]
pub struct FtpConnector {
    credentials: RemoteCredentials,
}

impl FtpConnector {
    pub fn new(credentials: RemoteCredentials) -> Self {
        Self { credentials }
    }
}

impl Connector for FtpConnector {
    fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let address = self.credentials.address();
        debug!("Connecting to {}", address);
        let mut stream = FtpStream::connect(address.as_str())?;
        stream.login(
            self.credentials.user.as_str(),
            self.credentials.password.as_str(),
        )?;
        stream.transfer_type(FileType::Binary)?;
        Ok(Box::new(FtpSession { stream }))
    }
}

/// Logged-in FTP control connection.
struct FtpSession {
    stream: FtpStream,
}

impl RemoteSession for FtpSession {
    fn list_dir(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let lines = self
            .stream
            .mlsd(Some(dir))
            .map_err(|e| classify_ftp_error(dir, e))?;
        let mut entries = Vec::with_capacity(lines.len());
        for line in &lines {
            if let Some(entry) = parse_mlsd_line(dir, line)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn size(&mut self, path: &str) -> Result<u64, RemoteError> {
        let size = self
            .stream
            .size(path)
            .map_err(|e| classify_ftp_error(path, e))?;
        Ok(size as u64)
    }

    fn modified_at(&mut self, path: &str) -> Result<String, RemoteError> {
        // Re-render in the MDTM wire format so records stay comparable across runs.
        let modified = self
            .stream
            .mdtm(path)
            .map_err(|e| classify_ftp_error(path, e))?;
        Ok(modified.format("%Y%m%d%H%M%S").to_string())
    }

    fn retrieve(
        &mut self,
        path: &str,
        sink: &mut dyn Write,
        cancel: &CancellationToken,
    ) -> Result<u64, RemoteError> {
        let mut data = self
            .stream
            .retr_as_stream(path)
            .map_err(|e| classify_ftp_error(path, e))?;
        let copied = copy_with_cancel(&mut data, sink, cancel)?;
        self.stream.finalize_retr_stream(data)?;
        Ok(copied)
    }
}

impl Drop for FtpSession {
    fn drop(&mut self) {
        if let Err(e) = self.stream.quit() {
            warn!("Failed to close FTP session cleanly: {}", e);
        }
    }
}

/// Maps a `550` reply for `path` to [`RemoteError::NotFound`].
fn classify_ftp_error(path: &str, err: FtpError) -> RemoteError {
    match err {
        FtpError::UnexpectedResponse(ref response)
            if response.status == Status::FileUnavailable =>
        {
            RemoteError::NotFound(path.to_string())
        }
        other => RemoteError::Ftp(other),
    }
}

/// Copies `reader` into `writer`, checking for cancellation between chunks.
pub(crate) fn copy_with_cancel(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    cancel: &CancellationToken,
) -> Result<u64, RemoteError> {
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut copied = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(RemoteError::Cancelled);
        }
        let n = match reader.read(&mut buffer) {
            Ok(0) => return Ok(copied),
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        writer.write_all(&buffer[..n])?;
        copied += n as u64;
    }
}

/// Parses one MLSD line (`fact=value;fact=value; name`) found in `dir`.
///
/// Returns `Ok(None)` for the `cdir`/`pdir` self and parent entries.
pub fn parse_mlsd_line(dir: &str, line: &str) -> Result<Option<RemoteEntry>, RemoteError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (facts, name) = line
        .split_once(' ')
        .ok_or_else(|| RemoteError::MalformedListing(line.to_string()))?;
    if name.is_empty() {
        return Err(RemoteError::MalformedListing(line.to_string()));
    }

    let entry_type = facts
        .split(';')
        .filter_map(|fact| fact.split_once('='))
        .find(|(key, _)| key.eq_ignore_ascii_case("type"))
        .map(|(_, value)| value.to_ascii_lowercase())
        .ok_or_else(|| RemoteError::MalformedListing(line.to_string()))?;

    let (is_directory, is_file) = match entry_type.as_str() {
        "cdir" | "pdir" => return Ok(None),
        "dir" => (true, false),
        "file" => (false, true),
        // Links and OS-specific types are neither.
        _ => (false, false),
    };

    Ok(Some(RemoteEntry {
        absolute_path: join_remote(dir, name),
        name: name.to_string(),
        is_directory,
        is_file,
    }))
}

/// Joins a remote directory and a child name with exactly one `/`.
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", dir.trim_end_matches('/'), name)
}
