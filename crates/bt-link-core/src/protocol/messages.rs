//! Method names and parameter types of the BT session protocol.
//!
//! Field names follow the camelCase convention of the client-side API, so
//! every struct carries `#[serde(rename_all = "camelCase")]`.
//!
//! | method                  | direction        | params                                   |
//! |-------------------------|------------------|------------------------------------------|
//! | `discover`              | client → bridge  | [`DiscoverParams`]                       |
//! | `connect`               | client → bridge  | [`ConnectParams`]                        |
//! | `send`                  | client → bridge  | buffer (see [`crate::protocol::buffer`]) |
//! | `getVersion`            | client → bridge  | none                                     |
//! | `pingMe`                | client → bridge  | none                                     |
//! | `didDiscoverPeripheral` | bridge → client  | [`PeripheralDiscovered`]                 |
//! | `didReceiveMessage`     | bridge → client  | buffer                                   |
//! | `ping`                  | bridge → client  | none                                     |

use serde::{Deserialize, Serialize};

use crate::domain::device::{DeviceDescriptor, DeviceId};

// ── Method names ──────────────────────────────────────────────────────────────

/// Client call: start discovery.
pub const METHOD_DISCOVER: &str = "discover";
/// Client call: bind an accessory.
pub const METHOD_CONNECT: &str = "connect";
/// Client call: write bytes to the bound accessory.
pub const METHOD_SEND: &str = "send";
/// Client call: report the protocol version.
pub const METHOD_GET_VERSION: &str = "getVersion";
/// Client call: ask the bridge to ping back.
pub const METHOD_PING_ME: &str = "pingMe";
/// Bridge notification: one visible accessory.
pub const NOTIFY_DID_DISCOVER_PERIPHERAL: &str = "didDiscoverPeripheral";
/// Bridge notification: bytes read from the accessory.
pub const NOTIFY_DID_RECEIVE_MESSAGE: &str = "didReceiveMessage";
/// Bridge notification: reply to `pingMe`.
pub const NOTIFY_PING: &str = "ping";

/// Protocol version reported by `getVersion`.
pub const PROTOCOL_VERSION: &str = "1.3";

// ── Client → bridge parameters ────────────────────────────────────────────────

/// Parameters of a `discover` call.
///
/// ```json
/// {"majorDeviceClass":8,"minorDeviceClass":1,"ouiPrefix":"00:16:53"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverParams {
    /// Bluetooth Classic major device class.  Required.
    pub major_device_class: u32,
    /// Bluetooth Classic minor device class.  Required.
    pub minor_device_class: u32,
    /// Optional vendor prefix of the device address, e.g. `"00:16:53"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oui_prefix: Option<String>,
}

/// Parameters of a `connect` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// The `peripheralId` from a previous `didDiscoverPeripheral`.
    pub peripheral_id: DeviceId,
}

// ── Bridge → client parameters ────────────────────────────────────────────────

/// Payload of a `didDiscoverPeripheral` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeripheralDiscovered {
    /// Directory-scoped handle to pass back in `connect`.
    pub peripheral_id: DeviceId,
    /// Name to show in the device chooser.
    pub name: String,
    /// Signal strength, or [`crate::RSSI_UNSUPPORTED`].
    pub rssi: i32,
}

impl From<&DeviceDescriptor> for PeripheralDiscovered {
    fn from(device: &DeviceDescriptor) -> Self {
        Self {
            peripheral_id: device.id,
            name: device.display_name().to_string(),
            rssi: device.rssi,
        }
    }
}

/// Result of `getVersion`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Protocol version string, currently [`PROTOCOL_VERSION`].
    pub protocol: String,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            protocol: PROTOCOL_VERSION.to_string(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
