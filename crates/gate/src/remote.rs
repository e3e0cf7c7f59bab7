use std::net::SocketAddr;

use http::HeaderMap;

/// The client address a ban should be recorded against.
///
/// Forwarding headers win over the socket peer so that bans land on the real
/// client when the proxy itself sits behind a load balancer:
/// first `X-Forwarded-For` entry, then `X-Real-Ip`, then the peer address.
pub fn remote_address(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    peer.ip().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn peer() -> SocketAddr {
        "192.0.2.7:51234".parse().unwrap()
    }

    #[test]
    fn falls_back_to_peer_ip() {
        assert_eq!(remote_address(&HeaderMap::new(), peer()), "192.0.2.7");
    }

    #[test]
    fn forwarded_for_takes_first_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        assert_eq!(remote_address(&headers, peer()), "203.0.113.9");
    }

    #[test]
    fn real_ip_used_when_no_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));
        assert_eq!(remote_address(&headers, peer()), "198.51.100.4");
    }

    #[test]
    fn empty_forwarded_for_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(""));
        assert_eq!(remote_address(&headers, peer()), "192.0.2.7");
    }
}
