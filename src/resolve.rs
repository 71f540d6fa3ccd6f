//! Hostname/service resolution, folded down to a single IPv6 endpoint.
//!
//! This wraps `getaddrinfo(3)` directly (via `libc`) instead of going through
//! `std`/`tokio`'s resolver helpers, because the contract here depends on
//! hint flags (`AI_PASSIVE`, `AI_V4MAPPED | AI_ALL`, `AI_ADDRCONFIG`) that
//! `ToSocketAddrs`/`lookup_host` don't expose. The blocking call runs on
//! tokio's blocking pool so it never stalls the reactor.

use std::ffi::{CStr, CString};
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::ptr;

use crate::error::TftpError;

/// How a caller wants resolution to behave: `passive` sets `AI_PASSIVE`
/// (server bind use — `NULL` host means "any"); `v6only` suppresses
/// `AI_V4MAPPED | AI_ALL` so only native IPv6 results are accepted.
#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    pub passive: bool,
    pub v6only: bool,
}

/// Resolve `host` (or `None` for "any"/"loopback" depending on `passive`)
/// and `port` to a single IPv6 socket address. Retries immediately and
/// unboundedly on `EAI_AGAIN`; any other failure is fatal.
pub async fn resolve(
    host: Option<&str>,
    port: u16,
    opts: ResolveOptions,
) -> Result<SocketAddr, TftpError> {
    let host = host.map(str::to_owned);
    loop {
        let host = host.clone();
        let result = tokio::task::spawn_blocking(move || getaddrinfo_v6(host.as_deref(), port, opts))
            .await
            .map_err(|e| TftpError::Resolve(format!("resolver task panicked: {e}")))?;

        match result {
            Ok(addr) => return Ok(addr),
            Err(ResolveErr::Again) => continue,
            Err(ResolveErr::Fatal(msg)) => return Err(TftpError::Resolve(msg)),
        }
    }
}

enum ResolveErr {
    /// `EAI_AGAIN`: a transient resolver failure, retried unboundedly.
    Again,
    Fatal(String),
}

#[cfg(unix)]
fn getaddrinfo_v6(host: Option<&str>, port: u16, opts: ResolveOptions) -> Result<SocketAddr, ResolveErr> {
    let mut hints: libc::addrinfo = unsafe { std::mem::zeroed() };
    hints.ai_socktype = libc::SOCK_DGRAM;
    hints.ai_family = libc::AF_INET6;

    let mut flags = libc::AI_NUMERICSERV | libc::AI_ADDRCONFIG;
    if opts.passive {
        flags |= libc::AI_PASSIVE;
    }
    if !opts.v6only {
        flags |= libc::AI_V4MAPPED | libc::AI_ALL;
    }
    hints.ai_flags = flags;

    let c_host = host.map(|h| CString::new(h).map_err(|_| ()));
    let c_host = match c_host {
        Some(Err(())) => return Err(ResolveErr::Fatal("host contains a NUL byte".into())),
        Some(Ok(c)) => Some(c),
        None => None,
    };
    let c_port = CString::new(port.to_string()).expect("port string never contains NUL");

    let mut results: *mut libc::addrinfo = ptr::null_mut();
    let rc = unsafe {
        libc::getaddrinfo(
            c_host.as_ref().map_or(ptr::null(), |c| c.as_ptr()),
            c_port.as_ptr(),
            &hints,
            &mut results,
        )
    };

    if rc != 0 {
        if rc == libc::EAI_AGAIN {
            return Err(ResolveErr::Again);
        }
        let msg = unsafe { CStr::from_ptr(libc::gai_strerror(rc)).to_string_lossy().into_owned() };
        return Err(ResolveErr::Fatal(format!("getaddrinfo failed: {msg}")));
    }

    struct Guard(*mut libc::addrinfo);
    impl Drop for Guard {
        fn drop(&mut self) {
            unsafe { libc::freeaddrinfo(self.0) };
        }
    }
    let _guard = Guard(results);

    if results.is_null() {
        return Err(ResolveErr::Fatal("getaddrinfo returned no results".into()));
    }

    let ai = unsafe { &*results };
    if ai.ai_family != libc::AF_INET6 || ai.ai_addr.is_null() {
        return Err(ResolveErr::Fatal(
            "getaddrinfo did not return an IPv6 address despite AF_INET6 hint".into(),
        ));
    }

    let sa6 = unsafe { &*(ai.ai_addr as *const libc::sockaddr_in6) };
    let ip = Ipv6Addr::from(sa6.sin6_addr.s6_addr);
    let resolved_port = u16::from_be(sa6.sin6_port);
    Ok(SocketAddr::V6(SocketAddrV6::new(
        ip,
        resolved_port,
        0,
        sa6.sin6_scope_id,
    )))
}

#[cfg(not(unix))]
fn getaddrinfo_v6(
    _host: Option<&str>,
    _port: u16,
    _opts: ResolveOptions,
) -> Result<SocketAddr, ResolveErr> {
    Err(ResolveErr::Fatal(
        "address resolution is only implemented for Unix targets".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_loopback_for_bind() {
        let addr = resolve(None, 0, ResolveOptions { passive: true, v6only: true })
            .await
            .unwrap();
        assert!(addr.is_ipv6());
    }

    #[tokio::test]
    async fn resolves_numeric_host() {
        let addr = resolve(
            Some("::1"),
            12345,
            ResolveOptions {
                passive: false,
                v6only: true,
            },
        )
        .await
        .unwrap();
        assert_eq!(addr.port(), 12345);
        assert!(addr.is_ipv6());
    }
}
