//! Port probing and monitor-address-vector derivation (spec.md §4.7's
//! pre-deploy port check and §4.8 state 5).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener};

use crate::error::AgentError;

/// Probe whether `port` is free on both `0.0.0.0` and `::`
/// (spec.md §4.7: "EADDRINUSE-style port probe on `0.0.0.0` and `::`").
/// Returns the first address found bound, if any.
pub fn probe_port(port: u16) -> Option<IpAddr> {
    let v4 = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    if TcpListener::bind(v4).is_err() {
        return Some(v4.ip());
    }
    let v6 = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port);
    if TcpListener::bind(v6).is_err() {
        return Some(v6.ip());
    }
    None
}

/// Check that `port` is free, returning [`AgentError::PortOccupied`] if
/// not.
pub fn check_port_free(port: u16) -> Result<(), AgentError> {
    if let Some(addr) = probe_port(port) {
        return Err(AgentError::PortOccupied { port, addr });
    }
    Ok(())
}

/// True if `s` parses as an IPv6 literal (no brackets, no port).
pub fn is_ipv6(s: &str) -> bool {
    s.parse::<Ipv6Addr>().is_ok()
}

/// Wrap an IPv6 literal in brackets if it is not already bracketed.
pub fn wrap_ipv6(s: &str) -> String {
    if s.starts_with('[') && s.ends_with(']') {
        s.to_string()
    } else {
        format!("[{s}]")
    }
}

/// The monitor address-vector derivation from spec.md §4.8 state 5 /
/// §8's boundary behaviors, recovered verbatim from
/// `prepare_mon_addresses` in the original implementation: port 6789 on
/// a bare address produces `[v1:...]`; port 3300 produces `[v2:...]`;
/// any other explicit port produces `[v2:...]` with a warning; no port
/// produces `[v2:ip:3300,v1:ip:6789]`. An already-bracketed `--mon-addrv`
/// value is validated and passed through unchanged (idempotence law L4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonAddrVec {
    /// The canonical `[v1:...]`/`[v2:...]`/`[v2:...,v1:...]` string.
    pub addr_arg: String,
    /// True if the base IP is an IPv6 literal.
    pub ipv6: bool,
    /// The bare base IP, with any port/protocol prefix stripped, used to
    /// infer the cluster CIDR network.
    pub base_ip: String,
}

/// Derive a [`MonAddrVec`] from an explicit `ip[:port]`. Returns the
/// warning message as `Some(..)` when an unrecognized explicit port
/// forces the msgr2-only fallback.
pub fn prepare_mon_addr_from_ip(mon_ip: &str) -> Result<(MonAddrVec, Option<String>), AgentError> {
    let ipv6 = is_ipv6(mon_ip);
    // Wrap before the trailing-port check: a bracketed IPv6 literal never
    // ends in bare digits, so it always falls into the "no port given"
    // branch below, matching the source's regex-on-the-wrapped-string
    // behavior exactly.
    let mon_ip = if ipv6 { wrap_ipv6(mon_ip) } else { mon_ip.to_string() };

    if let Some((host, port_str)) = trailing_port(&mon_ip) {
        let port: u16 = port_str
            .parse()
            .map_err(|_| AgentError::usage(format!("invalid port in --mon-ip {mon_ip:?}")))?;
        let (addr_arg, warning) = match port {
            6789 => (format!("[v1:{mon_ip}]"), None),
            3300 => (format!("[v2:{mon_ip}]"), None),
            other => (
                format!("[v2:{mon_ip}]"),
                Some(format!("using msgr2 protocol for unrecognized port {other}")),
            ),
        };
        check_port_free(port)?;
        Ok((
            MonAddrVec {
                addr_arg,
                ipv6,
                base_ip: host,
            },
            warning,
        ))
    } else {
        check_port_free(3300)?;
        check_port_free(6789)?;
        Ok((
            MonAddrVec {
                addr_arg: format!("[v2:{mon_ip}:3300,v1:{mon_ip}:6789]"),
                ipv6,
                base_ip: mon_ip,
            },
            None,
        ))
    }
}

/// Validate an already-bracketed `--mon-addrv` value and pass it
/// through unchanged (L4: parsing is idempotent).
pub fn prepare_mon_addr_from_addrv(addrv: &str) -> Result<MonAddrVec, AgentError> {
    if !addrv.starts_with('[') || !addrv.ends_with(']') {
        return Err(AgentError::usage(format!(
            "--mon-addrv value {addrv} must use square brackets"
        )));
    }
    let ipv6 = addrv.matches('[').count() > 1;
    let inner = &addrv[1..addrv.len() - 1];
    let mut base_ip = String::new();
    for addr in inner.split(',') {
        let stripped = addr.splitn(2, ':').nth(1).unwrap_or(addr);
        let (host, port) = trailing_port(stripped).ok_or_else(|| {
            AgentError::usage(format!("--mon-addrv value {addrv} must include port number"))
        })?;
        let _: u16 = port
            .parse()
            .map_err(|_| AgentError::usage(format!("invalid port in --mon-addrv {addrv}")))?;
        base_ip = host;
    }
    Ok(MonAddrVec {
        addr_arg: addrv.to_string(),
        ipv6,
        base_ip,
    })
}

/// Split a trailing `:<digits>` off the END of `s`, without stripping
/// brackets first — a bracket-wrapped IPv6 literal (`[::1]`) never ends
/// in bare digits, so it correctly reports no port.
fn trailing_port(s: &str) -> Option<(String, String)> {
    let idx = s.rfind(':')?;
    let (host, port) = s.split_at(idx);
    let port = &port[1..];
    if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((host.to_string(), port.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v1_port() {
        let (v, warn) = prepare_mon_addr_from_ip("10.0.0.1:6789").unwrap();
        assert_eq!(v.addr_arg, "[v1:10.0.0.1:6789]");
        assert!(warn.is_none());
    }

    #[test]
    fn test_v2_port() {
        let (v, warn) = prepare_mon_addr_from_ip("10.0.0.1:3300").unwrap();
        assert_eq!(v.addr_arg, "[v2:10.0.0.1:3300]");
        assert!(warn.is_none());
    }

    #[test]
    fn test_unrecognized_port_warns() {
        let (v, warn) = prepare_mon_addr_from_ip("10.0.0.1:1234").unwrap();
        assert_eq!(v.addr_arg, "[v2:10.0.0.1:1234]");
        assert!(warn.is_some());
    }

    #[test]
    fn test_no_port_both_default() {
        let (v, _) = prepare_mon_addr_from_ip("10.0.0.1").unwrap();
        assert_eq!(v.addr_arg, "[v2:10.0.0.1:3300,v1:10.0.0.1:6789]");
    }

    #[test]
    fn test_ipv6_autobracketed_and_no_port_uses_both_defaults() {
        let (v, _) = prepare_mon_addr_from_ip("::1").unwrap();
        assert_eq!(v.addr_arg, "[v2:[::1]:3300,v1:[::1]:6789]");
        assert!(v.ipv6);
    }

    #[test]
    fn test_already_bracketed_ipv6_not_double_bracketed() {
        assert_eq!(wrap_ipv6("[::1]"), "[::1]");
    }

    #[test]
    fn test_addrv_passthrough_idempotent() {
        let v = prepare_mon_addr_from_addrv("[v2:10.0.0.1:3300,v1:10.0.0.1:6789]").unwrap();
        assert_eq!(v.addr_arg, "[v2:10.0.0.1:3300,v1:10.0.0.1:6789]");
    }

    #[test]
    fn test_addrv_requires_brackets() {
        assert!(prepare_mon_addr_from_addrv("10.0.0.1:3300").is_err());
    }
}
