//! Management link configuration

use crate::error::{LinkError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Kernel parameter carrying the provisioning endpoint descriptor
pub const DEFAULT_KERNEL_PARAM: &str = "zlayer.link.api";

/// Default WireGuard interface name for the management link
pub const DEFAULT_LINK_NAME: &str = "zl-link0";

/// Default persistent keepalive interval (seconds)
pub const DEFAULT_KEEPALIVE_SECS: u64 = 25;

/// Default kernel command line location
pub const DEFAULT_CMDLINE_PATH: &str = "/proc/cmdline";

/// Default SMBIOS system UUID location
pub const DEFAULT_PRODUCT_UUID_PATH: &str = "/sys/class/dmi/id/product_uuid";

/// Kernel limit for interface names (IFNAMSIZ minus the trailing NUL)
const MAX_LINK_NAME_LEN: usize = 15;

mod duration {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Human-readable durations (`25s`, `1m 30s`) for required fields
    pub mod required {
        use super::*;

        pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.serialize_str(&humantime::format_duration(*duration).to_string())
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = String::deserialize(deserializer)?;
            humantime::parse_duration(&s)
                .map_err(|e| D::Error::custom(format!("invalid duration {s:?}: {e}")))
        }
    }

    /// Human-readable durations for optional fields
    pub mod option {
        use super::*;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Option::<String>::deserialize(deserializer)? {
                Some(s) => humantime::parse_duration(&s)
                    .map(Some)
                    .map_err(|e| D::Error::custom(format!("invalid duration {s:?}: {e}"))),
                None => Ok(None),
            }
        }
    }
}

/// Management link configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkConfig {
    /// Kernel parameter that enables the link and names the endpoint
    #[serde(default = "LinkConfig::default_kernel_param")]
    pub kernel_param: String,

    /// WireGuard interface name
    #[serde(default = "LinkConfig::default_link_name")]
    pub link_name: String,

    /// Persistent keepalive sent from this node to the server (e.g. `25s`)
    #[serde(
        default = "LinkConfig::default_keepalive",
        with = "duration::required"
    )]
    pub keepalive: Duration,

    /// Kernel command line location
    #[serde(default = "LinkConfig::default_cmdline_path")]
    pub cmdline_path: PathBuf,

    /// SMBIOS system UUID location
    #[serde(default = "LinkConfig::default_product_uuid_path")]
    pub product_uuid_path: PathBuf,

    /// Connect timeout for the provisioning channel
    #[serde(default, with = "duration::option")]
    pub connect_timeout: Option<Duration>,
}

impl LinkConfig {
    fn default_kernel_param() -> String {
        DEFAULT_KERNEL_PARAM.to_string()
    }

    fn default_link_name() -> String {
        DEFAULT_LINK_NAME.to_string()
    }

    fn default_keepalive() -> Duration {
        Duration::from_secs(DEFAULT_KEEPALIVE_SECS)
    }

    fn default_cmdline_path() -> PathBuf {
        PathBuf::from(DEFAULT_CMDLINE_PATH)
    }

    fn default_product_uuid_path() -> PathBuf {
        PathBuf::from(DEFAULT_PRODUCT_UUID_PATH)
    }

    /// Check the configuration before a controller is built from it
    pub fn validate(&self) -> Result<()> {
        if self.kernel_param.trim().is_empty() {
            return Err(LinkError::Config("kernel_param must not be empty".into()));
        }

        if self.link_name.is_empty() || self.link_name.len() > MAX_LINK_NAME_LEN {
            return Err(LinkError::Config(format!(
                "link name '{}' must be 1-{} characters",
                self.link_name, MAX_LINK_NAME_LEN
            )));
        }

        if self
            .link_name
            .chars()
            .any(|c| c.is_whitespace() || c == '/' || c == ':')
        {
            return Err(LinkError::Config(format!(
                "link name '{}' contains invalid characters",
                self.link_name
            )));
        }

        Ok(())
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            kernel_param: Self::default_kernel_param(),
            link_name: Self::default_link_name(),
            keepalive: Self::default_keepalive(),
            cmdline_path: Self::default_cmdline_path(),
            product_uuid_path: Self::default_product_uuid_path(),
            connect_timeout: None,
        }
    }
}
