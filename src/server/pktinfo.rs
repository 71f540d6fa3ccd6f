//! Recovering the *local* address a datagram was sent to, via
//! `IPV6_RECVPKTINFO` ancillary data.
//!
//! `tokio`/`socket2` don't wrap `recvmsg(2)` ancillary data, so this reaches
//! for `libc` directly — there's no safe wrapper for cmsg parsing.
//!
//! Full extraction is implemented for Linux. Other Unix targets fall back to
//! the listen socket's own bound address (see [`local_addr_fallback`]) — a
//! documented simplification, not a silent one: a multi-homed non-Linux host
//! may hand off from the wrong local address, but single-homed hosts (the
//! overwhelmingly common case for a small upload daemon) are unaffected.

use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

/// Enable `IPV6_RECVPKTINFO` on a not-yet-connected `socket2::Socket`. Must
/// be called before the first `recv_with_pktinfo`.
#[cfg(target_os = "linux")]
pub fn enable_recv_pktinfo(sock: &socket2::Socket) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let fd = sock.as_raw_fd();
    let enable: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IPV6,
            libc::IPV6_RECVPKTINFO,
            &enable as *const _ as *const libc::c_void,
            std::mem::size_of_val(&enable) as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn enable_recv_pktinfo(_sock: &socket2::Socket) -> io::Result<()> {
    Ok(())
}

/// Receive one datagram, returning `(bytes, source, destination_local_addr)`.
/// `destination_local_addr`'s IP comes from `IPV6_PKTINFO`; its port is
/// always the listening socket's own port (PKTINFO carries no port).
pub async fn recv_with_pktinfo(
    sock: &UdpSocket,
    buf: &mut [u8],
) -> io::Result<(usize, SocketAddr, SocketAddr)> {
    let listen_port = sock.local_addr()?.port();

    #[cfg(target_os = "linux")]
    {
        loop {
            sock.readable().await?;
            match sock.try_io(tokio::io::Interest::READABLE, || {
                linux_recvmsg_pktinfo(sock, buf, listen_port)
            }) {
                Ok(result) => return Ok(result),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        let (n, src) = sock.recv_from(buf).await?;
        let local = local_addr_fallback(sock, listen_port)?;
        Ok((n, src, local))
    }
}

#[cfg(not(target_os = "linux"))]
fn local_addr_fallback(sock: &UdpSocket, listen_port: u16) -> io::Result<SocketAddr> {
    let mut addr = sock.local_addr()?;
    addr.set_port(listen_port);
    Ok(addr)
}

#[cfg(target_os = "linux")]
fn linux_recvmsg_pktinfo(
    sock: &UdpSocket,
    buf: &mut [u8],
    listen_port: u16,
) -> io::Result<(usize, SocketAddr, SocketAddr)> {
    use std::mem::MaybeUninit;
    use std::net::Ipv6Addr;
    use std::os::fd::AsRawFd;

    let fd = sock.as_raw_fd();

    let mut src_storage: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };

    const CMSG_CAP: usize = 128;
    let mut cmsg_buf = [MaybeUninit::<u8>::uninit(); CMSG_CAP];

    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_name = &mut src_storage as *mut _ as *mut libc::c_void;
    msg.msg_namelen = std::mem::size_of::<libc::sockaddr_in6>() as u32;
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = CMSG_CAP;

    let n = unsafe { libc::recvmsg(fd, &mut msg, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    let src_ip = Ipv6Addr::from(src_storage.sin6_addr.s6_addr);
    let src_port = u16::from_be(src_storage.sin6_port);
    let src = SocketAddr::from((src_ip, src_port));

    let mut local_ip: Option<Ipv6Addr> = None;
    unsafe {
        let mut cmsg_ptr = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg_ptr.is_null() {
            let cmsg = &*cmsg_ptr;
            if cmsg.cmsg_level == libc::IPPROTO_IPV6 && cmsg.cmsg_type == libc::IPV6_PKTINFO {
                let info = &*(libc::CMSG_DATA(cmsg_ptr) as *const libc::in6_pktinfo);
                local_ip = Some(Ipv6Addr::from(info.ipi6_addr.s6_addr));
            }
            cmsg_ptr = libc::CMSG_NXTHDR(&msg, cmsg_ptr);
        }
    }

    let local = match local_ip {
        Some(ip) => SocketAddr::from((ip, listen_port)),
        None => {
            let mut addr = sock.local_addr()?;
            addr.set_port(listen_port);
            addr
        }
    };

    Ok((n as usize, src, local))
}
