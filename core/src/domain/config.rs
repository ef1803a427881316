//! Service configuration document and staged transactions.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::port::{validate, PortNumber};
use crate::error::{Error, Result};

/// Default location of the port field inside the proxy's config document.
pub const DEFAULT_PORT_POINTER: &str = "/local_port";

/// Default location of the listen address inside the proxy's config document.
pub const DEFAULT_LISTEN_POINTER: &str = "/local_addr";

// ============================================================================
// DocumentLayout
// ============================================================================

/// Formatting of the document as found on disk, reproduced on rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLayout {
    /// One indentation level, or `None` for a single-line document.
    pub indent: Option<String>,
    /// Whether the file ended with a newline.
    pub trailing_newline: bool,
}

impl DocumentLayout {
    /// Infer the layout from raw document text.
    pub fn detect(raw: &str) -> Self {
        let body = raw.trim_end();
        let indent = if body.contains('\n') {
            let unit = body
                .lines()
                .skip(1)
                .find(|line| !line.trim().is_empty())
                .map(|line| {
                    line.chars()
                        .take_while(|c| *c == ' ' || *c == '\t')
                        .collect::<String>()
                })
                .filter(|ws| !ws.is_empty())
                .unwrap_or_else(|| "  ".to_string());
            Some(unit)
        } else {
            None
        };

        Self {
            indent,
            trailing_newline: raw.ends_with('\n'),
        }
    }
}

impl Default for DocumentLayout {
    fn default() -> Self {
        Self {
            indent: Some("  ".to_string()),
            trailing_newline: true,
        }
    }
}

// ============================================================================
// ServiceConfig
// ============================================================================

/// The proxy's full configuration document.
///
/// The document is opaque except for the port field, which is located by a
/// JSON pointer and always holds a validated port.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    document: Value,
    port_pointer: String,
    port: PortNumber,
    layout: DocumentLayout,
}

impl ServiceConfig {
    /// Parse raw document text, locating the port at `port_pointer`.
    pub fn parse(raw: &str, port_pointer: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(raw)
            .map_err(|e| Error::ConfigUnreadable(format!("Invalid JSON: {}", e)))?;
        Self::from_document(document, port_pointer, DocumentLayout::detect(raw))
    }

    /// Wrap an already parsed document.
    pub fn from_document(
        document: Value,
        port_pointer: &str,
        layout: DocumentLayout,
    ) -> Result<Self> {
        if !document.is_object() {
            return Err(Error::ConfigUnreadable(
                "Top level of the document is not an object".to_string(),
            ));
        }
        if !port_pointer.starts_with('/') {
            return Err(Error::ConfigUnreadable(format!(
                "Port pointer {:?} must start with '/'",
                port_pointer
            )));
        }

        let raw_port = document.pointer(port_pointer).ok_or_else(|| {
            Error::ConfigUnreadable(format!("No port field at {}", port_pointer))
        })?;
        let port = raw_port
            .as_i64()
            .ok_or_else(|| {
                Error::ConfigUnreadable(format!(
                    "Port field at {} is not an integer: {}",
                    port_pointer, raw_port
                ))
            })
            .and_then(|n| {
                validate(n).map_err(|e| {
                    Error::ConfigUnreadable(format!(
                        "Port field at {} is {}: {}",
                        port_pointer, e, n
                    ))
                })
            })?;

        Ok(Self {
            document,
            port_pointer: port_pointer.to_string(),
            port,
            layout,
        })
    }

    /// The configured listening port.
    pub fn port(&self) -> PortNumber {
        self.port
    }

    /// The full document.
    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn port_pointer(&self) -> &str {
        &self.port_pointer
    }

    pub fn layout(&self) -> &DocumentLayout {
        &self.layout
    }

    /// Address a local client reaches the proxy on, from the field at `pointer`.
    ///
    /// A wildcard listen address maps to loopback of the same family. `None`
    /// when the field is missing or not an IP address.
    pub fn listen_host(&self, pointer: &str) -> Option<IpAddr> {
        let raw = self.document.pointer(pointer)?.as_str()?.trim();
        let addr = if raw.eq_ignore_ascii_case("localhost") {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            raw.trim_start_matches('[').trim_end_matches(']').parse().ok()?
        };
        Some(match addr {
            IpAddr::V4(v4) if v4.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(v6) if v6.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            other => other,
        })
    }

    /// Copy of this config with only the port replaced.
    pub fn with_port(&self, port: PortNumber) -> Self {
        let mut next = self.clone();
        if let Some(slot) = next.document.pointer_mut(&self.port_pointer) {
            *slot = Value::from(port.get());
        }
        next.port = port;
        next
    }

    /// Render the document using its original layout.
    pub fn render(&self) -> Result<String> {
        let mut out = match &self.layout.indent {
            Some(indent) => {
                let mut buf = Vec::new();
                let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
                let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
                self.document.serialize(&mut ser)?;
                String::from_utf8(buf).map_err(|e| {
                    Error::PersistFailure(format!("Rendered config is not UTF-8: {}", e))
                })?
            }
            None => serde_json::to_string(&self.document)?,
        };
        if self.layout.trailing_newline {
            out.push('\n');
        }
        Ok(out)
    }
}

// ============================================================================
// ConfigTransaction
// ============================================================================

/// A staged, not yet durable, replacement of the authoritative config.
///
/// Not `Clone`: a transaction belongs to exactly one attempt.
#[derive(Debug)]
pub struct ConfigTransaction {
    id: Uuid,
    base: ServiceConfig,
    candidate: ServiceConfig,
}

impl ConfigTransaction {
    /// Stage `base` with its port replaced by `new_port`.
    pub fn new(base: ServiceConfig, new_port: PortNumber) -> Self {
        let candidate = base.with_port(new_port);
        Self {
            id: Uuid::new_v4(),
            base,
            candidate,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The proposed replacement.
    pub fn candidate(&self) -> &ServiceConfig {
        &self.candidate
    }

    pub fn previous_port(&self) -> PortNumber {
        self.base.port()
    }

    pub fn new_port(&self) -> PortNumber {
        self.candidate.port()
    }

    /// Whether committing would leave the document unchanged.
    pub fn is_noop(&self) -> bool {
        self.base.document == self.candidate.document
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::parse;

    const TROJAN: &str = r#"{
    "run_type": "server",
    "local_addr": "0.0.0.0",
    "local_port": 443,
    "remote_addr": "127.0.0.1",
    "password": [
        "secret"
    ],
    "ssl": {
        "cert": "/etc/trojan/cert.pem"
    }
}
"#;

    #[test]
    fn test_parse_reads_port() {
        let config = ServiceConfig::parse(TROJAN, DEFAULT_PORT_POINTER).unwrap();
        assert_eq!(config.port().get(), 443);
        assert_eq!(config.layout().indent.as_deref(), Some("    "));
        assert!(config.layout().trailing_newline);
    }

    #[test]
    fn test_parse_nested_pointer() {
        let raw = r#"{"inbounds":[{"port":1080,"protocol":"socks"}]}"#;
        let config = ServiceConfig::parse(raw, "/inbounds/0/port").unwrap();
        assert_eq!(config.port().get(), 1080);
        assert_eq!(config.layout().indent, None);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let cases = [
            ("not json", DEFAULT_PORT_POINTER),
            ("[1, 2]", DEFAULT_PORT_POINTER),
            (r#"{"other": 1}"#, DEFAULT_PORT_POINTER),
            (r#"{"local_port": "443"}"#, DEFAULT_PORT_POINTER),
            (r#"{"local_port": 443.5}"#, DEFAULT_PORT_POINTER),
            (r#"{"local_port": 0}"#, DEFAULT_PORT_POINTER),
            (r#"{"local_port": 70000}"#, DEFAULT_PORT_POINTER),
            (r#"{"local_port": 443}"#, "local_port"),
        ];
        for (raw, pointer) in cases {
            let err = ServiceConfig::parse(raw, pointer).unwrap_err();
            assert!(matches!(err, Error::ConfigUnreadable(_)), "{}: {}", raw, err);
        }
    }

    #[test]
    fn test_with_port_changes_only_port() {
        let config = ServiceConfig::parse(TROJAN, DEFAULT_PORT_POINTER).unwrap();
        let next = config.with_port(parse("8443").unwrap());

        assert_eq!(next.port().get(), 8443);
        assert_eq!(next.document()["local_port"], 8443);

        let mut expected = config.document().clone();
        expected["local_port"] = Value::from(8443);
        assert_eq!(next.document(), &expected);
    }

    #[test]
    fn test_render_keeps_layout_and_key_order() {
        let config = ServiceConfig::parse(TROJAN, DEFAULT_PORT_POINTER).unwrap();
        assert_eq!(config.render().unwrap(), TROJAN);

        let rendered = config.with_port(parse("8443").unwrap()).render().unwrap();
        assert_eq!(rendered, TROJAN.replace("443,", "8443,"));
    }

    #[test]
    fn test_render_compact() {
        let raw = r#"{"local_port":443,"b":true}"#;
        let config = ServiceConfig::parse(raw, DEFAULT_PORT_POINTER).unwrap();
        assert_eq!(config.render().unwrap(), raw);
    }

    #[test]
    fn test_transaction() {
        let base = ServiceConfig::parse(TROJAN, DEFAULT_PORT_POINTER).unwrap();
        let tx = ConfigTransaction::new(base.clone(), parse("9999").unwrap());
        assert_eq!(tx.previous_port().get(), 443);
        assert_eq!(tx.new_port().get(), 9999);
        assert!(!tx.is_noop());

        let same = ConfigTransaction::new(base, parse("443").unwrap());
        assert!(same.is_noop());
        assert_ne!(tx.id(), same.id());
    }

    #[test]
    fn test_listen_host() {
        let config = ServiceConfig::parse(TROJAN, DEFAULT_PORT_POINTER).unwrap();
        assert_eq!(
            config.listen_host(DEFAULT_LISTEN_POINTER),
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST))
        );
        assert_eq!(config.listen_host("/remote_addr"), Some("127.0.0.1".parse().unwrap()));
        assert_eq!(config.listen_host("/missing"), None);
        assert_eq!(config.listen_host("/ssl/cert"), None);

        let raw = r#"{"local_addr": "10.0.0.5", "local_port": 443}"#;
        let config = ServiceConfig::parse(raw, DEFAULT_PORT_POINTER).unwrap();
        assert_eq!(
            config.listen_host(DEFAULT_LISTEN_POINTER),
            Some("10.0.0.5".parse().unwrap())
        );

        let raw = r#"{"local_addr": "::", "local_port": 443}"#;
        let config = ServiceConfig::parse(raw, DEFAULT_PORT_POINTER).unwrap();
        assert_eq!(
            config.listen_host(DEFAULT_LISTEN_POINTER),
            Some(IpAddr::V6(Ipv6Addr::LOCALHOST))
        );
    }
}
