//! Hardware ids for client software.
//!
//! The verification engine treats an hwid as an opaque string. Clients that
//! have no fingerprint of their own can use [`DeviceFingerprint::generate`],
//! which hashes stable machine identifiers into a short URL-safe string that
//! survives reboots but changes when the machine does.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::env;

/// Descriptive information about the current machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub os_name: String,
    pub arch: String,
    pub hostname: String,
    pub machine_id: Option<String>,
}

impl DeviceInfo {
    /// Collects information about the current machine.
    #[must_use]
    pub fn collect() -> Self {
        Self {
            os_name: env::consts::OS.to_string(),
            arch: env::consts::ARCH.to_string(),
            hostname: hostname_or_unknown(),
            machine_id: machine_id(),
        }
    }

    fn components(&self) -> Vec<&str> {
        let mut parts = vec![self.os_name.as_str(), self.arch.as_str(), self.hostname.as_str()];
        if let Some(id) = &self.machine_id {
            parts.push(id.as_str());
        }
        parts
    }
}

/// A stable hardware id suitable for `VerifyRequest::with_hwid`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceFingerprint(String);

impl DeviceFingerprint {
    /// Fingerprints the current machine.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_info(&DeviceInfo::collect())
    }

    /// Fingerprints previously collected device information.
    #[must_use]
    pub fn from_info(info: &DeviceInfo) -> Self {
        Self::from_components(&info.components())
    }

    /// Fingerprints an arbitrary list of identifiers.
    #[must_use]
    pub fn from_components(components: &[&str]) -> Self {
        let digest = Sha256::digest(components.join("|").as_bytes());
        Self(URL_SAFE_NO_PAD.encode(&digest[..16]))
    }

    /// Returns the hwid string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this fingerprint was taken on the current machine.
    #[must_use]
    pub fn matches_current(&self) -> bool {
        *self == Self::generate()
    }
}

impl From<DeviceFingerprint> for String {
    fn from(fp: DeviceFingerprint) -> Self {
        fp.0
    }
}

fn hostname_or_unknown() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

fn machine_id() -> Option<String> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("ioreg")
            .args(["-rd1", "-c", "IOPlatformExpertDevice"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|output| {
                output
                    .lines()
                    .find(|l| l.contains("IOPlatformUUID"))
                    .and_then(|l| l.split('"').nth(3))
                    .map(String::from)
            })
    }

    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/etc/machine-id")
            .or_else(|_| std::fs::read_to_string("/var/lib/dbus/machine-id"))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        None
    }
}
