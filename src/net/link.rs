//! Network link seam, device identity and the profile connection pass.
//!
//! [`WifiLink`] is the narrow interface the agent needs from a radio:
//! associate with one profile under a deadline, report whether the link is
//! still up, and expose the hardware address the device id is derived from.
//! [`connect`] walks the stored profiles in order and stops at the first
//! one that associates.
//!
//! On a host there is no radio.  [`HostLink`] treats "associated" as "the
//! controller's TCP port answers within the deadline", which is what the
//! agent actually depends on.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpStream;

use crate::config::ProfileEntry;

use super::profiles::{KeyValueStore, NetworkProfile, ProfileStore};

// ---------------------------------------------------------------------------
// LinkError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LinkError {
    /// Association did not complete before the per-profile deadline.
    #[error("association timed out after {0:?}")]
    Timeout(Duration),

    /// The network (or, on a host, the controller) refused us.
    #[error("association rejected: {0}")]
    Rejected(String),

    /// Every candidate profile failed.
    #[error("no network reachable ({attempted} profile(s) tried)")]
    AllFailed { attempted: usize },

    #[error("invalid hardware address {0:?}, expected aa:bb:cc:dd:ee:ff")]
    BadHardwareAddress(String),

    #[error("cannot derive a probe address from {0:?}")]
    BadServerUrl(String),
}

// ---------------------------------------------------------------------------
// DeviceId
// ---------------------------------------------------------------------------

/// Identity string the controller knows this device by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    /// `esp32-` followed by the hex of the last four address bytes.
    ///
    /// ```
    /// use capture_agent::net::DeviceId;
    ///
    /// let id = DeviceId::from_hardware_address([0x24, 0x6f, 0xa1, 0xb2, 0xc3, 0xd4]);
    /// assert_eq!(id.as_str(), "esp32-a1b2c3d4");
    /// ```
    pub fn from_hardware_address(addr: [u8; 6]) -> Self {
        Self(format!(
            "esp32-{:02x}{:02x}{:02x}{:02x}",
            addr[2], addr[3], addr[4], addr[5]
        ))
    }

    /// The configured override if present and non-blank, else the derived id.
    pub fn resolve(configured: Option<&str>, addr: [u8; 6]) -> Self {
        match configured.map(str::trim) {
            Some(id) if !id.is_empty() => Self(id.to_string()),
            _ => Self::from_hardware_address(addr),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse `aa:bb:cc:dd:ee:ff` (or `-`-separated) into six bytes.
pub fn parse_hardware_address(text: &str) -> Result<[u8; 6], LinkError> {
    let bad = || LinkError::BadHardwareAddress(text.to_string());

    let mut out = [0u8; 6];
    let mut parts = text.trim().split([':', '-']);
    for byte in out.iter_mut() {
        let part = parts.next().ok_or_else(bad)?;
        if part.len() != 2 {
            return Err(bad());
        }
        *byte = u8::from_str_radix(part, 16).map_err(|_| bad())?;
    }
    if parts.next().is_some() {
        return Err(bad());
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// WifiLink trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait WifiLink: Send {
    /// Try to associate with `profile`, giving up after `timeout`.
    async fn associate(
        &mut self,
        profile: &NetworkProfile,
        timeout: Duration,
    ) -> Result<(), LinkError>;

    fn is_connected(&self) -> bool;

    /// Re-check the link after a status poll went unanswered and return
    /// whether it is still up.  Links that learn about loss on their own
    /// only report their current state.
    async fn check(&mut self, _timeout: Duration) -> bool {
        self.is_connected()
    }

    fn hardware_address(&self) -> [u8; 6];
}

// ---------------------------------------------------------------------------
// connect
// ---------------------------------------------------------------------------

/// One connection pass over the stored profiles.
///
/// Profiles are tried in insertion order, each bounded by `timeout`.  With an
/// empty store the `fallback` profile is tried instead and written to the
/// store once it works.  No retry happens here; the caller owns the cadence.
pub async fn connect<L, S>(
    link: &mut L,
    store: &mut ProfileStore<S>,
    fallback: &ProfileEntry,
    timeout: Duration,
) -> Result<NetworkProfile, LinkError>
where
    L: WifiLink + ?Sized,
    S: KeyValueStore,
{
    let profiles = store.list();

    if profiles.is_empty() {
        let profile = NetworkProfile {
            name: fallback.name.clone(),
            credential: fallback.credential.clone(),
            position: 0,
        };
        log::info!("link: no stored networks, trying fallback {:?}", profile.name);
        return match link.associate(&profile, timeout).await {
            Ok(()) => {
                log::info!("link: connected via fallback {:?}", profile.name);
                if !store.upsert(&profile.name, &profile.credential) {
                    log::warn!("link: could not persist fallback {:?}", profile.name);
                }
                Ok(profile)
            }
            Err(e) => {
                log::warn!("link: fallback {:?} failed: {e}", profile.name);
                Err(LinkError::AllFailed { attempted: 1 })
            }
        };
    }

    let attempted = profiles.len();
    for profile in profiles {
        log::info!(
            "link: trying {:?} ({}/{attempted})",
            profile.name,
            profile.position + 1
        );
        match link.associate(&profile, timeout).await {
            Ok(()) => {
                log::info!("link: connected via {:?}", profile.name);
                return Ok(profile);
            }
            Err(e) => log::warn!("link: {:?} failed: {e}", profile.name),
        }
    }

    log::error!("link: all {attempted} stored network(s) failed");
    Err(LinkError::AllFailed { attempted })
}

// ---------------------------------------------------------------------------
// HostLink
// ---------------------------------------------------------------------------

/// Host stand-in for the radio: association is a TCP reachability probe of
/// the controller.  The profile name is only used for logging.
pub struct HostLink {
    probe_host: String,
    probe_port: u16,
    hardware_address: [u8; 6],
    connected: bool,
}

impl HostLink {
    pub fn new(server_url: &str, hardware_address: [u8; 6]) -> Result<Self, LinkError> {
        let bad = || LinkError::BadServerUrl(server_url.to_string());
        let url = reqwest::Url::parse(server_url).map_err(|_| bad())?;
        let probe_host = url.host_str().ok_or_else(bad)?.to_string();
        let probe_port = url.port_or_known_default().ok_or_else(bad)?;

        Ok(Self {
            probe_host,
            probe_port,
            hardware_address,
            connected: false,
        })
    }

    pub fn probe_target(&self) -> (&str, u16) {
        (&self.probe_host, self.probe_port)
    }

    async fn probe(&self, timeout: Duration) -> Result<(), LinkError> {
        let target = (self.probe_host.as_str(), self.probe_port);
        match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(LinkError::Rejected(e.to_string())),
            Err(_) => Err(LinkError::Timeout(timeout)),
        }
    }
}

#[async_trait]
impl WifiLink for HostLink {
    async fn associate(
        &mut self,
        profile: &NetworkProfile,
        timeout: Duration,
    ) -> Result<(), LinkError> {
        log::debug!(
            "link: probing {}:{} for {:?}",
            self.probe_host,
            self.probe_port,
            profile.name
        );
        let result = self.probe(timeout).await;
        self.connected = result.is_ok();
        result
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn check(&mut self, timeout: Duration) -> bool {
        if !self.connected {
            return false;
        }
        if let Err(e) = self.probe(timeout).await {
            log::warn!(
                "link: {}:{} no longer reachable: {e}",
                self.probe_host,
                self.probe_port
            );
            self.connected = false;
        }
        self.connected
    }

    fn hardware_address(&self) -> [u8; 6] {
        self.hardware_address
    }
}

// ---------------------------------------------------------------------------
// ScriptedLink  (test-only)
// ---------------------------------------------------------------------------

/// Link whose association succeeds only for the listed network names.
#[cfg(test)]
pub struct ScriptedLink {
    pub reachable: Vec<String>,
    pub attempts: Vec<String>,
    pub connected: bool,
}

#[cfg(test)]
impl ScriptedLink {
    pub fn new(reachable: &[&str]) -> Self {
        Self {
            reachable: reachable.iter().map(|s| s.to_string()).collect(),
            attempts: Vec::new(),
            connected: false,
        }
    }
}

#[cfg(test)]
#[async_trait]
impl WifiLink for ScriptedLink {
    async fn associate(
        &mut self,
        profile: &NetworkProfile,
        timeout: Duration,
    ) -> Result<(), LinkError> {
        self.attempts.push(profile.name.clone());
        self.connected = self.reachable.contains(&profile.name);
        if self.connected {
            Ok(())
        } else {
            Err(LinkError::Timeout(timeout))
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn hardware_address(&self) -> [u8; 6] {
        [0x24, 0x6f, 0xa1, 0xb2, 0xc3, 0xd4]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
