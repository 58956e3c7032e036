//! Camera identity and validation
//!
//! A camera's identity is everything needed to relay its feed: where it
//! lives, how to log in, and which stream key it publishes to. The name is
//! the immutable key; every other field is rewritten as a whole on update.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// RTSP transport the relay uses to pull the camera feed
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    #[default]
    Tcp,
    Udp,
    #[value(name = "udp_multicast")]
    UdpMulticast,
    Http,
}

impl Transport {
    /// Value passed to the relay's `-rtsp_transport`
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
            Transport::UdpMulticast => "udp_multicast",
            Transport::Http => "http",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Transport::Tcp),
            "udp" => Ok(Transport::Udp),
            "udp_multicast" => Ok(Transport::UdpMulticast),
            "http" => Ok(Transport::Http),
            other => Err(Error::invalid(
                "transport",
                format!("unknown transport '{}'", other),
            )),
        }
    }
}

/// Everything the supervisor knows about one camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraIdentity {
    /// Unique key; names the control unit, the log and the schedule entry
    pub name: String,
    /// Hostname or IP literal of the camera
    pub address: String,
    /// RTSP user
    pub user: String,
    /// RTSP password
    pub secret: String,
    /// RTSP port
    pub port: u16,
    /// RTSP transport mode
    pub transport: Transport,
    /// Destination stream key
    pub stream_key: String,
}

impl CameraIdentity {
    /// Validate every field
    ///
    /// Runs before any file is written or process launched.
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        validate_address(&self.address)?;

        if self.port == 0 {
            return Err(Error::invalid("port", "must be between 1 and 65535"));
        }

        if self.stream_key.is_empty() {
            return Err(Error::invalid("stream_key", "must not be empty"));
        }
        if self.stream_key.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(Error::invalid(
                "stream_key",
                "must not contain whitespace or control characters",
            ));
        }

        for (field, value) in [("user", &self.user), ("secret", &self.secret)] {
            if value.chars().any(char::is_control) {
                return Err(Error::invalid(field, "must not contain control characters"));
            }
        }

        Ok(())
    }

    /// Copy with the secret masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.secret.is_empty() {
            copy.secret = "********".to_string();
        }
        copy
    }
}

/// Partial update of a camera's mutable fields
///
/// Unset fields keep their current value. The result is always validated
/// and written as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraUpdate {
    pub address: Option<String>,
    pub user: Option<String>,
    pub secret: Option<String>,
    pub port: Option<u16>,
    pub transport: Option<Transport>,
    pub stream_key: Option<String>,
}

impl CameraUpdate {
    /// True when no field would change
    pub fn is_empty(&self) -> bool {
        *self == CameraUpdate::default()
    }

    /// Apply this update on top of an identity
    pub fn apply(&self, current: &CameraIdentity) -> CameraIdentity {
        CameraIdentity {
            name: current.name.clone(),
            address: self.address.clone().unwrap_or_else(|| current.address.clone()),
            user: self.user.clone().unwrap_or_else(|| current.user.clone()),
            secret: self.secret.clone().unwrap_or_else(|| current.secret.clone()),
            port: self.port.unwrap_or(current.port),
            transport: self.transport.unwrap_or(current.transport),
            stream_key: self
                .stream_key
                .clone()
                .unwrap_or_else(|| current.stream_key.clone()),
        }
    }
}

/// Validate a camera name
///
/// Names become file names under the base directory and must be decodable
/// from crontab lines, so only `[A-Za-z0-9_-]` is accepted.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid("name", "must not be empty"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::invalid(
            "name",
            format!("'{}' may only contain letters, digits, '_' and '-'", name),
        ));
    }
    Ok(())
}

/// Validate a camera address
pub fn validate_address(address: &str) -> Result<()> {
    if address.is_empty() {
        return Err(Error::invalid("address", "must not be empty"));
    }
    if !is_usable_address(address) {
        return Err(Error::invalid(
            "address",
            format!("'{}' is not a hostname or IP address", address),
        ));
    }
    Ok(())
}

/// Whether an address is specific enough to match processes by
///
/// Short or wildcard-like addresses would match unrelated command lines and
/// must never reach a kill sweep.
pub fn is_usable_address(address: &str) -> bool {
    address.len() >= 3
        && !address.starts_with('-')
        && address
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '-'))
        && address.chars().any(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
pub(crate) fn sample(name: &str, address: &str) -> CameraIdentity {
    CameraIdentity {
        name: name.to_string(),
        address: address.to_string(),
        user: "admin".to_string(),
        secret: "s3cret".to_string(),
        port: 554,
        transport: Transport::Tcp,
        stream_key: format!("key-{}", name),
    }
}
