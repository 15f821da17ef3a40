//! MQTT broker addressing and TLS material loading.

use anyhow::{anyhow, Context, Result};
use rumqttc::Transport;
use std::path::Path;

/// TLS certificate materials for the broker connection.
///
/// With no CA the system roots are used; client certificate and key come as
/// a pair for mutual TLS.
#[derive(Clone, Debug, Default)]
pub struct TlsMaterials {
    /// PEM-encoded CA certificate bytes.
    pub ca: Option<Vec<u8>>,
    /// PEM-encoded `(cert, key)`.
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterials {
    pub fn load(
        ca_path: Option<&Path>,
        client_cert_path: Option<&Path>,
        client_key_path: Option<&Path>,
    ) -> Result<Self> {
        let ca = match ca_path {
            Some(path) => Some(
                std::fs::read(path)
                    .with_context(|| format!("failed to read MQTT TLS CA '{}'", path.display()))?,
            ),
            None => None,
        };

        let client_auth = match (client_cert_path, client_key_path) {
            (Some(cert_path), Some(key_path)) => {
                let cert = std::fs::read(cert_path).with_context(|| {
                    format!("failed to read MQTT TLS client cert '{}'", cert_path.display())
                })?;
                let key = std::fs::read(key_path).with_context(|| {
                    format!("failed to read MQTT TLS client key '{}'", key_path.display())
                })?;
                Some((cert, key))
            }
            (None, None) => None,
            (Some(_), None) => {
                return Err(anyhow!("MQTT TLS client certificate provided without key"))
            }
            (None, Some(_)) => {
                return Err(anyhow!("MQTT TLS client key provided without certificate"))
            }
        };

        Ok(Self { ca, client_auth })
    }

    pub fn is_configured(&self) -> bool {
        self.ca.is_some() || self.client_auth.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl std::fmt::Display for MqttEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = if self.use_tls { "mqtts" } else { "mqtt" };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", scheme, self.host, self.port)
        }
    }
}

/// Parse a broker address.
///
/// Accepts `host:port`, `mqtt://`, `tcp://`, `mqtts://`, `ssl://` and
/// bracketed IPv6 hosts. A bare `host` takes `default_port`.
pub fn parse_mqtt_endpoint(addr: &str, default_port: u16, tls_override: bool) -> Result<MqttEndpoint> {
    let mut use_tls = tls_override;
    let mut remainder = addr.trim();

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme.to_ascii_lowercase().as_str() {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest.trim_end_matches('/');
    }
    if remainder.is_empty() {
        return Err(anyhow!("empty MQTT broker address"));
    }

    let (host, port) = split_host_port(remainder, default_port)?;
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str, default_port: u16) -> Result<(String, u16)> {
    // [::1]:1883
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = match rest.strip_prefix(':') {
            Some(port) => port
                .parse()
                .with_context(|| format!("invalid MQTT port in {}", addr))?,
            None if rest.is_empty() => default_port,
            None => return Err(anyhow!("invalid MQTT address: {}", addr)),
        };
        return Ok((host.to_string(), port));
    }

    match addr.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .with_context(|| format!("invalid MQTT port in {}", addr))?;
            Ok((host.to_string(), port))
        }
        None => Ok((addr.to_string(), default_port)),
    }
}

/// Plain TCP, TLS with system roots, or TLS with the configured materials.
pub fn build_transport(endpoint: &MqttEndpoint, materials: &TlsMaterials) -> Result<Transport> {
    if !endpoint.use_tls {
        if materials.is_configured() {
            return Err(anyhow!(
                "MQTT TLS materials provided but TLS is disabled; use an mqtts:// broker address"
            ));
        }
        return Ok(Transport::tcp());
    }
    if !materials.is_configured() {
        return Ok(Transport::tls_with_default_config());
    }
    let ca = materials.ca.clone().ok_or_else(|| {
        anyhow!("MQTT TLS CA certificate is required when providing client certificates")
    })?;
    Ok(Transport::tls(ca, materials.client_auth.clone(), None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_endpoint_plain() {
        let ep = parse_mqtt_endpoint("127.0.0.1:1883", 1883, false).unwrap();
        assert_eq!(ep.host, "127.0.0.1");
        assert_eq!(ep.port, 1883);
        assert!(!ep.use_tls);
    }

    #[test]
    fn parse_endpoint_bare_host_uses_default_port() {
        let ep = parse_mqtt_endpoint("localhost", 1884, false).unwrap();
        assert_eq!((ep.host.as_str(), ep.port), ("localhost", 1884));
        assert_eq!(ep.to_string(), "mqtt://localhost:1884");
    }

    #[test]
    fn parse_endpoint_tls_schemes() {
        let ep = parse_mqtt_endpoint("mqtts://broker.example.com:8883", 1883, false).unwrap();
        assert_eq!(ep.host, "broker.example.com");
        assert_eq!(ep.port, 8883);
        assert!(ep.use_tls);
        assert!(parse_mqtt_endpoint("ssl://b:8883", 1883, false).unwrap().use_tls);
        assert!(!parse_mqtt_endpoint("tcp://b:1883", 1883, false).unwrap().use_tls);
        assert!(parse_mqtt_endpoint("ws://b:80", 1883, false).is_err());
    }

    #[test]
    fn parse_endpoint_ipv6() {
        let ep = parse_mqtt_endpoint("[::1]:1883", 1883, false).unwrap();
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.port, 1883);
        assert_eq!(ep.to_string(), "mqtt://[::1]:1883");
        assert_eq!(parse_mqtt_endpoint("[::1]", 1999, false).unwrap().port, 1999);
    }

    #[test]
    fn parse_endpoint_rejects_bad_port() {
        assert!(parse_mqtt_endpoint("host:notaport", 1883, false).is_err());
        assert!(parse_mqtt_endpoint("  ", 1883, false).is_err());
    }

    #[test]
    fn tls_materials_requires_both_cert_and_key() {
        let cert_only = TlsMaterials::load(None, Some(Path::new("/nonexistent/cert.pem")), None);
        assert!(cert_only.unwrap_err().to_string().contains("without key"));
    }

    #[test]
    fn materials_without_tls_are_rejected() {
        let ep = parse_mqtt_endpoint("localhost:1883", 1883, false).unwrap();
        let materials = TlsMaterials {
            ca: Some(b"pem".to_vec()),
            client_auth: None,
        };
        assert!(build_transport(&ep, &materials).is_err());
        assert!(build_transport(&ep, &TlsMaterials::default()).is_ok());
    }
}
