//! TCP probes for port availability and listener health.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::debug;

use crate::domain::{validate, PortNumber};

/// Range random suggestions are drawn from.
const SUGGESTION_RANGE: std::ops::RangeInclusive<u16> = 10000..=65535;

/// Random picks tried before giving up on a suggestion.
const SUGGESTION_ATTEMPTS: usize = 32;

/// Time allowed for a single connect attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Whether a port can be bound right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Free,
    InUse,
    /// The probe itself was not allowed (privileged port without root).
    Unknown,
}

/// Check whether `port` is free by trying to bind it on all interfaces.
pub async fn availability(port: PortNumber) -> Availability {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port.get()));
    match TcpListener::bind(addr).await {
        Ok(_) => Availability::Free,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => Availability::InUse,
        Err(e) => {
            debug!(port = %port, error = %e, "Availability probe inconclusive");
            Availability::Unknown
        }
    }
}

/// Whether something accepts TCP connections on `host:port`.
pub async fn is_listening(host: IpAddr, port: PortNumber) -> bool {
    let addr = SocketAddr::new(host, port.get());
    matches!(timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await, Ok(Ok(_)))
}

/// Pick a random unused high port.
pub async fn suggest_free_port() -> Option<PortNumber> {
    for _ in 0..SUGGESTION_ATTEMPTS {
        let candidate = rand::thread_rng().gen_range(SUGGESTION_RANGE);
        let Ok(port) = validate(i64::from(candidate)) else {
            continue;
        };
        if availability(port).await == Availability::Free {
            return Some(port);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn bound_port() -> (TcpListener, PortNumber) {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, PortNumber::try_from(port).unwrap())
    }

    #[tokio::test]
    async fn test_availability_detects_bound_port() {
        let (listener, port) = bound_port().await;
        assert_eq!(availability(port).await, Availability::InUse);

        drop(listener);
        assert_ne!(availability(port).await, Availability::InUse);
    }

    #[tokio::test]
    async fn test_is_listening() {
        let (listener, port) = bound_port().await;
        assert!(is_listening(IpAddr::V4(Ipv4Addr::LOCALHOST), port).await);
        drop(listener);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_is_listening_on_specific_address() {
        // Linux routes all of 127.0.0.0/8 to loopback.
        let host: IpAddr = "127.0.0.2".parse().unwrap();
        let listener = TcpListener::bind((host, 0)).await.unwrap();
        let port = PortNumber::try_from(listener.local_addr().unwrap().port()).unwrap();

        assert!(is_listening(host, port).await);
        assert!(!is_listening(IpAddr::V4(Ipv4Addr::LOCALHOST), port).await);
    }

    #[tokio::test]
    async fn test_suggest_free_port_in_range() {
        let port = suggest_free_port().await.unwrap();
        assert!(port.get() >= 10000);
    }
}
