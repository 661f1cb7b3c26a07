//! Outbound proxy selection from the `http_proxy` family of variables.

use std::collections::HashMap;
use std::fmt;

use percent_encoding::percent_decode_str;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProxyEnvError {
    #[error("proxy address {address} is not a valid URL")]
    InvalidAddress { address: String },
    #[error("invalid proxy protocol for {address}")]
    UnsupportedProtocol { address: String },
    #[error("no password given for proxy {address}")]
    MissingPassword { address: String },
    #[error("error parsing proxy port: {address}")]
    InvalidPort { address: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyScheme {
    Http,
    Https,
}

impl ProxyScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    pub username: String,
    /// Already percent-decoded
    pub password: String,
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .field("password", &"******")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
    pub credentials: Option<ProxyCredentials>,
}

impl ProxyEndpoint {
    /// Address without credentials, suitable for logs and the transport.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Chooses the proxy, if any, for each outbound request.
///
/// Built once at startup; holds only parsed configuration.
#[derive(Debug, Clone, Default)]
pub struct ProxySelector {
    no_proxy: Vec<String>,
    http: Option<ProxyEndpoint>,
    https: Option<ProxyEndpoint>,
}

impl ProxySelector {
    /// Never proxies.
    pub fn direct() -> Self {
        Self::default()
    }

    pub fn from_env() -> Result<Self, ProxyEnvError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ProxyEnvError> {
        let no_proxy = lookup(vars, "no_proxy")
            .map(|raw| {
                raw.split(',')
                    .map(|token| token.trim().to_ascii_lowercase())
                    .filter(|token| !token.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let http = lookup(vars, "http_proxy")
            .map(parse_proxy_address)
            .transpose()?
            .flatten();
        let https = lookup(vars, "https_proxy")
            .map(parse_proxy_address)
            .transpose()?
            .flatten();

        Ok(Self {
            no_proxy,
            http,
            https,
        })
    }

    pub fn http_proxy(&self) -> Option<&ProxyEndpoint> {
        self.http.as_ref()
    }

    pub fn https_proxy(&self) -> Option<&ProxyEndpoint> {
        self.https.as_ref()
    }

    pub fn no_proxy(&self) -> &[String] {
        &self.no_proxy
    }

    /// Whether `host` is covered by the exclusion list.
    pub fn is_excluded(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.no_proxy.iter().any(|token| {
            if token.starts_with('.') {
                host.ends_with(token.as_str())
            } else {
                host == *token || host.ends_with(&format!(".{token}"))
            }
        })
    }

    pub fn select(&self, url: &Url) -> Option<&ProxyEndpoint> {
        if let Some(host) = url.host_str()
            && self.is_excluded(host)
        {
            debug!(%host, "host excluded from proxying");
            return None;
        }

        match url.scheme() {
            "https" => self.https.as_ref(),
            "http" => self.http.as_ref(),
            _ => None,
        }
    }
}

// Lower-case name wins when set to something non-blank.
fn lookup<'a>(vars: &'a HashMap<String, String>, lower: &str) -> Option<&'a str> {
    let upper = lower.to_ascii_uppercase();
    [lower, upper.as_str()]
        .into_iter()
        .filter_map(|name| vars.get(name))
        .map(String::as_str)
        .find(|value| !value.trim().is_empty())
}

/// Parses `scheme://[user[:pass]@]host[:port][/]`.
///
/// A blank address means no proxy.
pub fn parse_proxy_address(raw: &str) -> Result<Option<ProxyEndpoint>, ProxyEnvError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let address = redact(raw);
    let invalid = || ProxyEnvError::InvalidAddress {
        address: address.clone(),
    };

    let (scheme, rest) = raw.split_once("://").ok_or_else(invalid)?;
    let scheme = match scheme {
        "http" => ProxyScheme::Http,
        "https" => ProxyScheme::Https,
        other if !other.is_empty() && other.chars().all(|c| c.is_ascii_alphanumeric()) => {
            return Err(ProxyEnvError::UnsupportedProtocol {
                address: address.clone(),
            });
        }
        _ => return Err(invalid()),
    };

    let rest = rest.strip_suffix('/').unwrap_or(rest);
    if rest.contains('/') {
        return Err(invalid());
    }

    let (userinfo, authority) = match rest.split_once('@') {
        Some((userinfo, authority)) => (Some(userinfo), authority),
        None => (None, rest),
    };

    let credentials = match userinfo {
        None => None,
        Some(userinfo) => {
            let (username, password) = match userinfo.split_once(':') {
                Some((username, password)) => (username, Some(password)),
                None => (userinfo, None),
            };
            if username.is_empty() || password.is_some_and(str::is_empty) {
                return Err(invalid());
            }
            let Some(password) = password else {
                return Err(ProxyEnvError::MissingPassword {
                    address: address.clone(),
                });
            };
            Some(ProxyCredentials {
                username: username.to_string(),
                password: percent_decode_str(password)
                    .decode_utf8_lossy()
                    .into_owned(),
            })
        }
    };

    let (host, port) = match authority.split_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| ProxyEnvError::InvalidPort {
                address: address.clone(),
            })?;
            (host, port)
        }
        None => (authority, scheme.default_port()),
    };
    if host.is_empty() || host.contains('@') {
        return Err(invalid());
    }

    Ok(Some(ProxyEndpoint {
        scheme,
        host: host.to_ascii_lowercase(),
        port,
        credentials,
    }))
}

fn redact(raw: &str) -> String {
    match raw.split_once("://") {
        Some((scheme, rest)) => match rest.rsplit_once('@') {
            Some((_, authority)) => format!("{scheme}://{authority}"),
            None => raw.to_string(),
        },
        None => match raw.rsplit_once('@') {
            Some((_, authority)) => authority.to_string(),
            None => raw.to_string(),
        },
    }
}
