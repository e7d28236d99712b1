//! Frame I/O shared by the character-device backends.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::path::Path;
use std::time::Duration;

use etherlink_frame::{Frame, LinkPadding};

use crate::error::{OpenError, SendError};
use crate::sys;

pub(crate) fn open_rw(path: &Path) -> Result<File, OpenError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|source| OpenError::Device {
            path: path.to_path_buf(),
            source,
        })
}

pub(crate) fn set_nonblocking(file: &File, what: &'static str) -> Result<(), OpenError> {
    sys::set_nonblocking(file.as_fd()).map_err(|source| OpenError::NonBlocking { what, source })
}

pub(crate) fn write_frame(file: &File, padding: LinkPadding, frame: &[u8]) -> Result<(), SendError> {
    let wire = padding.apply(frame);
    let mut file = file;
    match file.write(&wire) {
        Ok(_) => Ok(()),
        Err(err) => Err(SendError::from_io(err)),
    }
}

/// Wait up to `timeout` for one frame on a non-blocking device.
pub(crate) fn read_frame(
    file: &File,
    padding: LinkPadding,
    timeout: Duration,
) -> io::Result<Option<Frame>> {
    if !sys::wait_readable(file.as_fd(), timeout)? {
        return Ok(None);
    }
    let mut buf = vec![0u8; padding.read_capacity()];
    let mut file = file;
    match file.read(&mut buf) {
        Ok(len) => {
            buf.truncate(len);
            Ok(Some(padding.strip(buf)))
        }
        Err(err)
            if matches!(
                err.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ) =>
        {
            Ok(None)
        }
        Err(err) => Err(err),
    }
}
