//! Network side of the agent: stored profiles and the link they bring up.

pub mod link;
pub mod profiles;

pub use link::{connect, parse_hardware_address, DeviceId, HostLink, LinkError, WifiLink};
pub use profiles::{
    FileKvStore, KeyValueStore, MemoryKvStore, NetworkProfile, ProfileStore, StoreError,
    MAX_NAME_LEN,
};
