//! Accessory descriptors as reported by a device directory.
//!
//! A [`DeviceDescriptor`] is a snapshot of one OS-visible, paired accessory:
//! its directory-scoped id, its name, the protocols it speaks and (when the
//! directory knows it) its Bluetooth address.  Descriptors are cheap values;
//! the directory hands out a fresh list on every enumeration.

use serde::{Deserialize, Serialize};

/// Directory-scoped accessory handle (the client's `peripheralId`).
pub type DeviceId = u64;

/// RSSI value meaning "signal strength is not available on this transport".
pub const RSSI_UNSUPPORTED: i32 = 127;

/// Protocol identifier advertised by LEGO MINDSTORMS EV3 bricks.
pub const EV3_PROTOCOL: &str = "COM.LEGO.MINDSTORMS.EV3";

/// Display name used for any accessory that advertises [`EV3_PROTOCOL`].
pub const EV3_DISPLAY_NAME: &str = "LEGO MINDSTORMS EV3";

/// One accessory visible in the device directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Directory-scoped handle; stable while the accessory stays connected.
    pub id: DeviceId,
    /// Name reported by the OS.
    pub name: String,
    /// Signal strength, [`RSSI_UNSUPPORTED`] on Bluetooth Classic.
    #[serde(default = "default_rssi")]
    pub rssi: i32,
    /// Protocol identifiers in preference order.  The first one is used
    /// when binding streams.
    #[serde(default)]
    pub protocols: Vec<String>,
    /// Bluetooth address (`AA:BB:CC:DD:EE:FF`) if the directory knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

fn default_rssi() -> i32 {
    RSSI_UNSUPPORTED
}

impl DeviceDescriptor {
    /// Creates a descriptor with unsupported RSSI and no known address.
    pub fn new(id: DeviceId, name: impl Into<String>, protocols: Vec<String>) -> Self {
        Self {
            id,
            name: name.into(),
            rssi: RSSI_UNSUPPORTED,
            protocols,
            address: None,
        }
    }

    /// Sets the Bluetooth address.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Name to show in the client's device chooser.
    ///
    /// EV3 bricks report a user-chosen name to the OS; the chooser shows the
    /// product name instead so the extension can recognise them.
    pub fn display_name(&self) -> &str {
        if self.protocols.iter().any(|p| p == EV3_PROTOCOL) {
            EV3_DISPLAY_NAME
        } else {
            &self.name
        }
    }

    /// The protocol used to open streams: the first advertised one.
    pub fn preferred_protocol(&self) -> Option<&str> {
        self.protocols.first().map(String::as_str)
    }
}

// ── Discovery filter ──────────────────────────────────────────────────────────

/// Criteria taken from a `discover` call.
///
/// Device classes are retained for logging; accessories enumerated through
/// the connected-accessories directory are already paired and filtered by
/// the OS, and the directory does not expose their class of device.
///
/// The OUI prefix is applied to accessories whose address is known.
/// Accessories without a known address are always reported, since excluding
/// them would hide every device on directories that never expose addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryFilter {
    /// Major device class requested by the client.
    pub major_device_class: u32,
    /// Minor device class requested by the client.
    pub minor_device_class: u32,
    /// Normalised vendor prefix (uppercase hex digits only), if any.
    oui_prefix: Option<String>,
}

impl DiscoveryFilter {
    /// Builds a filter.  An empty or separator-only prefix means "no filter".
    pub fn new(major_device_class: u32, minor_device_class: u32, oui_prefix: Option<&str>) -> Self {
        let oui_prefix = oui_prefix
            .map(normalise_address)
            .filter(|prefix| !prefix.is_empty());
        Self {
            major_device_class,
            minor_device_class,
            oui_prefix,
        }
    }

    /// The normalised OUI prefix, if one is in effect.
    pub fn oui_prefix(&self) -> Option<&str> {
        self.oui_prefix.as_deref()
    }

    /// Returns `true` if `device` should be reported to the client.
    pub fn matches(&self, device: &DeviceDescriptor) -> bool {
        match (&self.oui_prefix, &device.address) {
            (Some(prefix), Some(address)) => normalise_address(address).starts_with(prefix),
            _ => true,
        }
    }
}

/// Strips separators and uppercases an address or address prefix.
fn normalise_address(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
