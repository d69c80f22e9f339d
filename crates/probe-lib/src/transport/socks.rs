//! SOCKS5 client handshake (RFC 1928, no authentication, CONNECT only)

use crate::error::TransportError;
use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NONE_ACCEPTABLE: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Destination handed to the proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TargetAddr {
    Ip(SocketAddr),
    /// Resolved by the proxy, so the name never touches local DNS
    Domain(String, u16),
}

impl TargetAddr {
    pub(crate) fn from_host(host: &str, port: u16) -> Self {
        match host.parse::<IpAddr>() {
            Ok(ip) => TargetAddr::Ip(SocketAddr::new(ip, port)),
            Err(_) => TargetAddr::Domain(host.to_string(), port),
        }
    }

    fn encode(&self) -> Result<Vec<u8>, TransportError> {
        let mut out = Vec::with_capacity(22);
        match self {
            TargetAddr::Ip(SocketAddr::V4(addr)) => {
                out.push(ATYP_IPV4);
                out.extend_from_slice(&addr.ip().octets());
                out.extend_from_slice(&addr.port().to_be_bytes());
            }
            TargetAddr::Ip(SocketAddr::V6(addr)) => {
                out.push(ATYP_IPV6);
                out.extend_from_slice(&addr.ip().octets());
                out.extend_from_slice(&addr.port().to_be_bytes());
            }
            TargetAddr::Domain(name, port) => {
                let len = u8::try_from(name.len()).map_err(|_| {
                    TransportError::ProxyHandshake(format!("host name too long: {}", name.len()))
                })?;
                out.push(ATYP_DOMAIN);
                out.push(len);
                out.extend_from_slice(name.as_bytes());
                out.extend_from_slice(&port.to_be_bytes());
            }
        }
        Ok(out)
    }
}

/// Ask the proxy on `stream` to open a tunnel to `target`. On success the
/// stream carries raw bytes to and from the target.
pub(crate) async fn connect<S>(stream: &mut S, target: &TargetAddr) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&[VERSION, 1, METHOD_NO_AUTH]).await?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != VERSION {
        return Err(TransportError::ProxyHandshake(format!(
            "unexpected SOCKS version {}",
            choice[0]
        )));
    }
    match choice[1] {
        METHOD_NO_AUTH => {}
        METHOD_NONE_ACCEPTABLE => {
            return Err(TransportError::ProxyHandshake(
                "proxy requires authentication".to_string(),
            ))
        }
        other => {
            return Err(TransportError::ProxyHandshake(format!(
                "proxy selected unsupported method {}",
                other
            )))
        }
    }

    let mut request = vec![VERSION, CMD_CONNECT, 0x00];
    request.extend(target.encode()?);
    stream.write_all(&request).await?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;
    if reply[0] != VERSION {
        return Err(TransportError::ProxyHandshake(format!(
            "unexpected SOCKS version {} in reply",
            reply[0]
        )));
    }
    if reply[1] != 0x00 {
        return Err(TransportError::ProxyRejected {
            code: reply[1],
            reason: reply_reason(reply[1]),
        });
    }

    // Bound address is not used, but has to be consumed
    let addr_len = match reply[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        other => {
            return Err(TransportError::ProxyHandshake(format!(
                "unknown address type {} in reply",
                other
            )))
        }
    };
    let mut bound = vec![0u8; addr_len + 2];
    stream.read_exact(&mut bound).await?;

    Ok(())
}

fn reply_reason(code: u8) -> &'static str {
    match code {
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown failure",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn test_target_addr_from_host() {
        assert_eq!(
            TargetAddr::from_host("10.0.0.1", 80),
            TargetAddr::Ip("10.0.0.1:80".parse().unwrap())
        );
        assert_eq!(
            TargetAddr::from_host("example.onion", 443),
            TargetAddr::Domain("example.onion".to_string(), 443)
        );
    }

    #[test]
    fn test_domain_encoding() {
        let encoded = TargetAddr::Domain("ab.c".to_string(), 443).encode().unwrap();
        assert_eq!(encoded, vec![ATYP_DOMAIN, 4, b'a', b'b', b'.', b'c', 0x01, 0xBB]);
    }

    #[test]
    fn test_overlong_domain_rejected() {
        let name = "a".repeat(300);
        assert!(TargetAddr::Domain(name, 80).encode().is_err());
    }

    #[tokio::test]
    async fn test_handshake_success() {
        let (mut client, mut server) = duplex(256);

        let proxy = tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            server.read_exact(&mut greeting).await.unwrap();
            assert_eq!(greeting, [VERSION, 1, METHOD_NO_AUTH]);
            server.write_all(&[VERSION, METHOD_NO_AUTH]).await.unwrap();

            let mut request = [0u8; 4 + 1 + 7 + 2];
            server.read_exact(&mut request).await.unwrap();
            assert_eq!(&request[..5], &[VERSION, CMD_CONNECT, 0, ATYP_DOMAIN, 7]);
            assert_eq!(&request[5..12], b"foo.com");

            server
                .write_all(&[VERSION, 0, 0, ATYP_IPV4, 127, 0, 0, 1, 0, 80])
                .await
                .unwrap();
        });

        let target = TargetAddr::Domain("foo.com".to_string(), 80);
        connect(&mut client, &target).await.unwrap();
        proxy.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_rejected() {
        let (mut client, mut server) = duplex(256);

        tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            server.read_exact(&mut greeting).await.unwrap();
            server.write_all(&[VERSION, METHOD_NO_AUTH]).await.unwrap();
            let mut request = [0u8; 10];
            server.read_exact(&mut request).await.unwrap();
            server
                .write_all(&[VERSION, 0x05, 0, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        let target = TargetAddr::from_host("192.0.2.1", 443);
        match connect(&mut client, &target).await {
            Err(TransportError::ProxyRejected { code, reason }) => {
                assert_eq!(code, 0x05);
                assert_eq!(reason, "connection refused");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_auth_required_is_handshake_error() {
        let (mut client, mut server) = duplex(256);

        tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            server.read_exact(&mut greeting).await.unwrap();
            server
                .write_all(&[VERSION, METHOD_NONE_ACCEPTABLE])
                .await
                .unwrap();
        });

        let target = TargetAddr::from_host("192.0.2.1", 443);
        assert!(matches!(
            connect(&mut client, &target).await,
            Err(TransportError::ProxyHandshake(_))
        ));
    }
}
