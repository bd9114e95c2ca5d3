//! Descriptor transfer from the master to the workers.
//!
//! The shared FIFO channel carries the accepted descriptor as a 32-bit
//! integer, but an integer alone is only meaningful inside the master:
//! fork duplicates the file table at fork time, so descriptors accepted
//! *afterwards* exist in no worker's table. The actual kernel object
//! therefore travels over a unix-domain datagram pair created before the
//! first fork (every worker inherits the receiving end) using
//! `SCM_RIGHTS` ancillary data. The receiver gets a fresh descriptor
//! referring to the same connection; the master closes its own copy
//! right after sending.
//!
//! Each datagram carries the master-side descriptor number as its
//! payload, pairing it with the queue element for diagnostics. The
//! kernel hands each datagram to exactly one receiver, which preserves
//! the one-consumer ownership of every connection.

use std::io::{IoSlice, IoSliceMut};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::sys::socket::{
    self, AddressFamily, ControlMessage, ControlMessageOwned, MsgFlags, SockFlag, SockType,
    UnixAddr,
};

use crate::error::ServerResult;

/// Sending half, held by the master.
pub struct FdSender {
    fd: OwnedFd,
}

/// Receiving half, inherited by every worker.
pub struct FdReceiver {
    fd: OwnedFd,
}

/// Create the transfer channel. Must happen before the workers fork.
pub fn channel() -> ServerResult<(FdSender, FdReceiver)> {
    let (tx, rx) = socket::socketpair(
        AddressFamily::Unix,
        SockType::Datagram,
        None,
        SockFlag::empty(),
    )?;
    Ok((FdSender { fd: tx }, FdReceiver { fd: rx }))
}

impl FdSender {
    /// Ship one descriptor. The caller still owns (and must close) its
    /// copy afterwards.
    pub fn send(&self, fd: RawFd) -> ServerResult<()> {
        let payload = fd.to_ne_bytes();
        let iov = [IoSlice::new(&payload)];
        let fds = [fd];
        let cmsgs = [ControlMessage::ScmRights(&fds)];
        loop {
            match socket::sendmsg::<UnixAddr>(
                self.fd.as_raw_fd(),
                &iov,
                &cmsgs,
                MsgFlags::empty(),
                None,
            ) {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl FdReceiver {
    /// Receive one descriptor, blocking until a datagram arrives.
    ///
    /// Returns the adopted descriptor and the master-side number it was
    /// labelled with.
    pub fn recv(&self) -> ServerResult<(OwnedFd, RawFd)> {
        loop {
            let mut payload = [0u8; 4];
            let mut cmsg_buffer = nix::cmsg_space!([RawFd; 1]);

            let received = {
                let mut iov = [IoSliceMut::new(&mut payload)];
                let msg = match socket::recvmsg::<UnixAddr>(
                    self.fd.as_raw_fd(),
                    &mut iov,
                    Some(&mut cmsg_buffer),
                    MsgFlags::empty(),
                ) {
                    Ok(msg) => msg,
                    Err(Errno::EINTR) => continue,
                    Err(e) => return Err(e.into()),
                };

                let mut found = None;
                for cmsg in msg.cmsgs()? {
                    if let ControlMessageOwned::ScmRights(fds) = cmsg {
                        found = fds.first().copied();
                    }
                }
                found
            };

            if let Some(fd) = received {
                let token = RawFd::from_ne_bytes(payload);
                // SAFETY: the kernel just installed this fd in our table
                // for us; we are its only owner.
                return Ok((unsafe { OwnedFd::from_raw_fd(fd) }, token));
            }
            // A datagram without rights is a protocol violation from a
            // cooperating process; ignore it and keep waiting.
        }
    }
}
