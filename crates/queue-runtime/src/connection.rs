//! Service Bus connection string parsing.
//!
//! Accepts the format produced by the Azure portal:
//!
//! ```text
//! Endpoint=sb://<namespace>.servicebus.windows.net/;SharedAccessKeyName=<name>;SharedAccessKey=<key>
//! ```
//!
//! Keys are matched case-insensitively and unknown keys are ignored. The
//! shared access key is kept in a zeroizing buffer and never printed.

use crate::error::ConfigurationError;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use url::Url;
use zeroize::Zeroizing;

/// Parsed Service Bus connection string
#[derive(Clone)]
pub struct ConnectionString {
    host: String,
    port: Option<u16>,
    shared_access_key_name: String,
    shared_access_key: Zeroizing<String>,
    entity_path: Option<String>,
    use_development_emulator: bool,
}

impl ConnectionString {
    /// Parse a connection string
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Missing`] when `Endpoint`,
    /// `SharedAccessKeyName` or `SharedAccessKey` is absent and
    /// [`ConfigurationError::Parsing`] when a segment or the endpoint URL is
    /// malformed.
    pub fn parse(value: &str) -> Result<Self, ConfigurationError> {
        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;
        let mut entity_path = None;
        let mut use_development_emulator = false;

        for segment in value.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (name, val) = segment
                .split_once('=')
                .ok_or_else(|| ConfigurationError::Parsing {
                    message: "connection string segments must be key=value pairs".to_string(),
                })?;

            match name.trim().to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = Some(val.trim().to_string()),
                "sharedaccesskeyname" => key_name = Some(val.trim().to_string()),
                "sharedaccesskey" => key = Some(Zeroizing::new(val.trim().to_string())),
                "entitypath" => entity_path = Some(val.trim().to_string()),
                "usedevelopmentemulator" => {
                    use_development_emulator = val.trim().eq_ignore_ascii_case("true")
                }
                _ => {}
            }
        }

        let endpoint = endpoint.ok_or_else(|| ConfigurationError::Missing {
            key: "Endpoint".to_string(),
        })?;
        let shared_access_key_name = key_name
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigurationError::Missing {
                key: "SharedAccessKeyName".to_string(),
            })?;
        let shared_access_key = key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigurationError::Missing {
                key: "SharedAccessKey".to_string(),
            })?;

        let url = Url::parse(&endpoint).map_err(|e| ConfigurationError::Parsing {
            message: format!("invalid Endpoint '{}': {}", endpoint, e),
        })?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigurationError::Parsing {
                message: format!("Endpoint '{}' has no host", endpoint),
            })?
            .to_string();

        Ok(Self {
            host,
            port: url.port(),
            shared_access_key_name,
            shared_access_key,
            entity_path: entity_path.filter(|p| !p.is_empty()),
            use_development_emulator,
        })
    }

    /// Fully qualified host name of the namespace
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Short namespace name, e.g. `contoso` for `contoso.servicebus.windows.net`
    pub fn namespace(&self) -> &str {
        if self.host.parse::<IpAddr>().is_ok() {
            return &self.host;
        }
        self.host.split('.').next().unwrap_or(&self.host)
    }

    pub fn shared_access_key_name(&self) -> &str {
        &self.shared_access_key_name
    }

    /// Shared access key; only for immediate use when signing
    pub fn shared_access_key(&self) -> &str {
        &self.shared_access_key
    }

    pub fn entity_path(&self) -> Option<&str> {
        self.entity_path.as_deref()
    }

    pub fn use_development_emulator(&self) -> bool {
        self.use_development_emulator
    }

    /// Base URL of the REST endpoint (`https://host/`, `http://` for the emulator)
    pub fn http_base_url(&self) -> Result<Url, ConfigurationError> {
        let scheme = if self.use_development_emulator {
            "http"
        } else {
            "https"
        };
        let port = self.port.map(|p| format!(":{}", p)).unwrap_or_default();

        Url::parse(&format!("{}://{}{}/", scheme, self.host, port)).map_err(|e| {
            ConfigurationError::Parsing {
                message: format!("cannot build REST endpoint for '{}': {}", self.host, e),
            }
        })
    }
}

impl FromStr for ConnectionString {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("shared_access_key_name", &self.shared_access_key_name)
            .field("shared_access_key", &"<redacted>")
            .field("entity_path", &self.entity_path)
            .field("use_development_emulator", &self.use_development_emulator)
            .finish()
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
