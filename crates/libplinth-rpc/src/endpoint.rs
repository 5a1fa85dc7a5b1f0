//! Endpoint addressing
//!
//! Address strings have the form `<scheme>://<address>`:
//! - `unix:///var/run/plinth/plugins/group.sock`
//! - `tcp://127.0.0.1:24864`
//!
//! Listen strings for tcp servers may carry a crumb path after the port,
//! e.g. `tcp://:24864/var/run/plinth/plugins/group.listen`.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RpcError;

const SCHEME_SEPARATOR: &str = "://";

/// Transport scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Unix,
    Tcp,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Unix => "unix",
            Scheme::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a plugin can be reached
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    scheme: Scheme,
    address: String,
}

impl Endpoint {
    /// Endpoint for a unix socket file
    pub fn unix(path: impl AsRef<Path>) -> Self {
        Self {
            scheme: Scheme::Unix,
            address: path.as_ref().to_string_lossy().into_owned(),
        }
    }

    /// Endpoint for a bound tcp socket
    pub fn tcp(addr: SocketAddr) -> Self {
        Self {
            scheme: Scheme::Tcp,
            address: addr.to_string(),
        }
    }

    /// Parse a full address string. Any path after a tcp port is rejected;
    /// use [`ListenAddr::parse`] for listen strings.
    pub fn parse(s: &str) -> Result<Self, RpcError> {
        let listen = ListenAddr::parse(s)?;
        if listen.crumb.is_some() {
            return Err(RpcError::invalid_address(
                s,
                "unexpected path after tcp port",
            ));
        }
        Ok(listen.endpoint)
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Socket path for `unix`, `host:port` for `tcp`
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Socket path of a unix endpoint
    pub fn socket_path(&self) -> Option<&Path> {
        match self.scheme {
            Scheme::Unix => Some(Path::new(&self.address)),
            Scheme::Tcp => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.scheme, SCHEME_SEPARATOR, self.address)
    }
}

impl FromStr for Endpoint {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::parse(s)
    }
}

/// Address a server listens on, with the optional crumb path of a tcp server
///
/// The crumb receives the connectable address actually bound: the real
/// port when `0` was asked for, and loopback in place of an unspecified
/// host. It is written under a temporary name and renamed into place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddr {
    pub endpoint: Endpoint,
    pub crumb: Option<PathBuf>,
}

impl ListenAddr {
    pub fn parse(s: &str) -> Result<Self, RpcError> {
        let (scheme, rest) = s
            .split_once(SCHEME_SEPARATOR)
            .ok_or_else(|| RpcError::invalid_address(s, "missing scheme"))?;

        match scheme {
            "unix" => {
                if !rest.starts_with('/') {
                    return Err(RpcError::invalid_address(
                        s,
                        "unix socket path must be absolute",
                    ));
                }
                Ok(Self {
                    endpoint: Endpoint::unix(rest),
                    crumb: None,
                })
            }
            "tcp" => {
                let (host_port, crumb) = match rest.find('/') {
                    Some(idx) => (&rest[..idx], Some(PathBuf::from(&rest[idx..]))),
                    None => (rest, None),
                };
                let (_, port) = host_port
                    .rsplit_once(':')
                    .ok_or_else(|| RpcError::invalid_address(s, "missing port"))?;
                port.parse::<u16>()
                    .map_err(|_| RpcError::invalid_address(s, format!("invalid port '{}'", port)))?;
                Ok(Self {
                    endpoint: Endpoint {
                        scheme: Scheme::Tcp,
                        address: host_port.to_string(),
                    },
                    crumb,
                })
            }
            other => Err(RpcError::invalid_address(
                s,
                format!("unsupported scheme '{}'", other),
            )),
        }
    }

    /// Host and port to bind; an empty host binds every interface
    pub(crate) fn bind_address(&self) -> String {
        let address = self.endpoint.address();
        match address.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{}", port),
            None => address.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unix() {
        let ep = Endpoint::parse("unix:///tmp/plugins/group.sock").unwrap();
        assert_eq!(ep.scheme(), Scheme::Unix);
        assert_eq!(ep.address(), "/tmp/plugins/group.sock");
        assert_eq!(ep.socket_path(), Some(Path::new("/tmp/plugins/group.sock")));
        assert_eq!(ep.to_string(), "unix:///tmp/plugins/group.sock");
    }

    #[test]
    fn test_parse_tcp() {
        let ep: Endpoint = "tcp://127.0.0.1:24864".parse().unwrap();
        assert_eq!(ep.scheme(), Scheme::Tcp);
        assert_eq!(ep.address(), "127.0.0.1:24864");
        assert_eq!(ep.socket_path(), None);
    }

    #[test]
    fn test_rejects_bad_addresses() {
        for bad in [
            "/tmp/group.sock",
            "http://localhost:80",
            "UNIX:///tmp/x.sock",
            "unix://relative/path.sock",
            "tcp://localhost",
            "tcp://localhost:notaport",
            "tcp://localhost:80/crumb",
        ] {
            let err = Endpoint::parse(bad).unwrap_err();
            assert!(
                matches!(err, RpcError::InvalidAddress { .. }),
                "{} should be rejected, got {:?}",
                bad,
                err
            );
        }
    }

    #[test]
    fn test_listen_addr_with_crumb() {
        let listen = ListenAddr::parse("tcp://:24864/tmp/plugins/group.listen").unwrap();
        assert_eq!(listen.endpoint.address(), ":24864");
        assert_eq!(listen.crumb, Some(PathBuf::from("/tmp/plugins/group.listen")));
        assert_eq!(listen.bind_address(), "0.0.0.0:24864");
    }

    #[test]
    fn test_listen_addr_unix_has_no_crumb() {
        let listen = ListenAddr::parse("unix:///tmp/plugins/group.sock").unwrap();
        assert!(listen.crumb.is_none());
    }

    #[test]
    fn test_value_equality() {
        let a = Endpoint::parse("tcp://10.0.0.1:80").unwrap();
        let b = Endpoint::tcp("10.0.0.1:80".parse().unwrap());
        assert_eq!(a, b);
    }
}
