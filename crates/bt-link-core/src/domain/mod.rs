//! Domain entities for BT-Link.
//!
//! This module contains pure types with no infrastructure dependencies: how
//! an accessory is described to the client and how a `discover` call narrows
//! the set of reported accessories.
//!
//! Code in outer layers (the session bridge, the directory implementations)
//! depends on these types, but they never depend on outer layers.

/// Accessory descriptors and discovery filtering.
pub mod device;
