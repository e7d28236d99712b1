//! Thin wrappers over the host syscalls the device backends need.
#![allow(unsafe_code)]

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::time::Duration;

use etherlink_frame::MacAddr;

/// Millisecond timeout for `poll`, rounded up so short waits never degrade into spins.
pub(crate) fn timeout_ms(timeout: Duration) -> libc::c_int {
    let millis = timeout.as_micros().div_ceil(1000);
    millis.min(libc::c_int::MAX as u128) as libc::c_int
}

/// `poll(2)` over `fds`. An interrupted wait reports zero ready descriptors.
pub(crate) fn poll(fds: &mut [libc::pollfd], timeout: Duration) -> io::Result<usize> {
    // SAFETY: `fds` is an exclusively borrowed slice of initialized pollfd records that lives for
    // the whole call, and the length passed matches it.
    let rc = unsafe {
        libc::poll(
            fds.as_mut_ptr(),
            fds.len() as libc::nfds_t,
            timeout_ms(timeout),
        )
    };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            fds.iter_mut().for_each(|fd| fd.revents = 0);
            return Ok(0);
        }
        return Err(err);
    }
    Ok(rc as usize)
}

/// Wait up to `timeout` for `fd` to become readable (or report an error/hangup).
pub(crate) fn wait_readable(fd: BorrowedFd<'_>, timeout: Duration) -> io::Result<bool> {
    let mut fds = [libc::pollfd {
        fd: fd.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    }];
    let ready = poll(&mut fds, timeout)?;
    Ok(ready > 0 && fds[0].revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0)
}

pub(crate) fn set_nonblocking(fd: BorrowedFd<'_>) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: F_GETFL on a descriptor that the borrow keeps open.
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: F_SETFL with an integer argument on the same open descriptor.
    let rc = unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(target_os = "linux")]
mod imp {
    use super::*;
    use std::ffi::CString;

    const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
    const IFF_TAP: libc::c_short = 0x0002;
    const IFF_NO_PI: libc::c_short = 0x1000;

    // sheep_net driver requests.
    const SIOCSIFLINK: libc::c_ulong = 0x89f0;
    const SIOCGIFADDR: libc::c_ulong = 0x8915;
    const SIOCADDMULTI: libc::c_ulong = 0x8931;
    const SIOCDELMULTI: libc::c_ulong = 0x8932;

    /// `struct ifreq` restricted to the name and flags members.
    #[repr(C)]
    struct IfReq {
        name: [libc::c_char; libc::IFNAMSIZ],
        flags: libc::c_short,
        _pad: [u8; 22],
    }

    fn check(rc: libc::c_int) -> io::Result<()> {
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Turn an open `/dev/net/tun` descriptor into a tap interface without packet information.
    /// Returns the interface name the kernel picked for `template`.
    pub(crate) fn tun_set_iff(fd: BorrowedFd<'_>, template: &str) -> io::Result<String> {
        let mut req = IfReq {
            name: [0; libc::IFNAMSIZ],
            flags: IFF_TAP | IFF_NO_PI,
            _pad: [0; 22],
        };
        if template.len() >= libc::IFNAMSIZ {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "interface name template too long",
            ));
        }
        for (dst, src) in req.name.iter_mut().zip(template.bytes()) {
            *dst = src as libc::c_char;
        }
        // SAFETY: TUNSETIFF reads and writes exactly one ifreq; `req` is a properly sized,
        // initialized ifreq that outlives the call.
        check(unsafe { libc::ioctl(fd.as_raw_fd(), TUNSETIFF as _, &mut req as *mut IfReq) })?;
        let name: Vec<u8> = req
            .name
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        Ok(String::from_utf8_lossy(&name).into_owned())
    }

    pub(crate) fn sheep_net_attach(fd: BorrowedFd<'_>, interface: &str) -> io::Result<()> {
        let name = CString::new(interface)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        // SAFETY: the driver reads a NUL-terminated interface name from the pointer, which
        // `name` keeps alive for the call.
        check(unsafe { libc::ioctl(fd.as_raw_fd(), SIOCSIFLINK as _, name.as_ptr()) })
    }

    pub(crate) fn sheep_net_hw_addr(fd: BorrowedFd<'_>) -> io::Result<MacAddr> {
        let mut addr = [0u8; 6];
        // SAFETY: the driver writes six address bytes into the buffer.
        check(unsafe { libc::ioctl(fd.as_raw_fd(), SIOCGIFADDR as _, addr.as_mut_ptr()) })?;
        Ok(MacAddr::new(addr))
    }

    pub(crate) fn multicast(fd: BorrowedFd<'_>, add: bool, addr: MacAddr) -> io::Result<()> {
        let request = if add { SIOCADDMULTI } else { SIOCDELMULTI };
        let octets = addr.octets();
        // SAFETY: the driver reads six address bytes from the buffer.
        check(unsafe { libc::ioctl(fd.as_raw_fd(), request as _, octets.as_ptr()) })
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use super::*;

    fn unsupported() -> io::Error {
        io::Error::new(
            io::ErrorKind::Unsupported,
            "device request not supported on this host",
        )
    }

    pub(crate) fn tun_set_iff(_fd: BorrowedFd<'_>, _template: &str) -> io::Result<String> {
        Err(unsupported())
    }

    pub(crate) fn sheep_net_attach(_fd: BorrowedFd<'_>, _interface: &str) -> io::Result<()> {
        Err(unsupported())
    }

    pub(crate) fn sheep_net_hw_addr(_fd: BorrowedFd<'_>) -> io::Result<MacAddr> {
        Err(unsupported())
    }

    pub(crate) fn multicast(_fd: BorrowedFd<'_>, _add: bool, _addr: MacAddr) -> io::Result<()> {
        Err(unsupported())
    }
}

pub(crate) use imp::{multicast, sheep_net_attach, sheep_net_hw_addr, tun_set_iff};

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn sub_millisecond_timeouts_round_up() {
        assert_eq!(timeout_ms(Duration::ZERO), 0);
        assert_eq!(timeout_ms(Duration::from_micros(10)), 1);
        assert_eq!(timeout_ms(Duration::from_millis(20)), 20);
        assert_eq!(timeout_ms(Duration::from_secs(u64::MAX)), libc::c_int::MAX);
    }

    #[test]
    fn wait_readable_sees_pending_bytes() {
        let (mut a, b) = UnixStream::pair().unwrap();
        assert!(!wait_readable(b.as_fd(), Duration::from_millis(1)).unwrap());
        a.write_all(b"x").unwrap();
        assert!(wait_readable(b.as_fd(), Duration::from_millis(100)).unwrap());
    }

    #[test]
    fn nonblocking_read_would_block() {
        use std::io::Read;
        let (_a, b) = UnixStream::pair().unwrap();
        set_nonblocking(b.as_fd()).unwrap();
        let err = (&b).read(&mut [0u8; 4]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}
