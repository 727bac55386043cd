//! Origin identity: scheme, host and port.

use std::fmt;
use std::str::FromStr;

use url::{Host, Url};

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// The `(scheme, host, port)` triple connections are keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl Origin {
    /// Plain-text origin for `host:port`.
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: Scheme::Http,
            host: host.into(),
            port,
        }
    }

    /// Origin part of a URL. Path, query and fragment are ignored.
    pub fn from_url(url: &Url) -> Result<Self, ClientError> {
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(ClientError::InvalidRequest(format!("unsupported scheme: {other}")));
            }
        };
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(ClientError::InvalidRequest(format!("url has no host: {url}"))),
        };
        let port = url.port().unwrap_or_else(|| scheme.default_port());
        Ok(Self { scheme, host, port })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Value for the `host` request header. The port is omitted when it is
    /// the scheme default.
    pub fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

impl FromStr for Origin {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(s).map_err(|e| ClientError::InvalidRequest(format!("invalid origin {s:?}: {e}")))?;
        Self::from_url(&url)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        write!(f, "{}://{}:{}", self.scheme.as_str(), host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_defaults_port() {
        let origin: Origin = "http://example.com/ignored?x=1".parse().unwrap();
        assert_eq!(origin.host(), "example.com");
        assert_eq!(origin.port(), 80);
        assert_eq!(origin.authority(), "example.com");
        assert_eq!(origin.to_string(), "http://example.com:80");

        let tls: Origin = "https://example.com".parse().unwrap();
        assert_eq!(tls.port(), 443);
        assert_eq!(tls.scheme(), Scheme::Https);
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        let origin: Origin = "http://[::1]:8080".parse().unwrap();
        assert_eq!(origin.host(), "::1");
        assert_eq!(origin.authority(), "[::1]:8080");
    }

    #[test]
    fn same_origin_compares_equal() {
        let a: Origin = "http://localhost:3000/a".parse().unwrap();
        let b = Origin::http("localhost", 3000);
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_other_schemes() {
        assert!("ftp://example.com".parse::<Origin>().is_err());
        assert!("not a url".parse::<Origin>().is_err());
    }
}
