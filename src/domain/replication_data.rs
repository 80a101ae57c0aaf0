//! Replication driver data
//!
//! A volume's `replication_driver_data` map holds both the replication
//! driver's private strings and a few keys owned by the control plane. The
//! reserved keys are listed here; drivers must not write them.

use super::model::DriverData;

/// `"true"` on the primary side of a pair, `"false"` on the secondary
pub const KEY_IS_PRIMARY: &str = "IsPrimary";

/// Bridging attachment used by a host-based replication mover
pub const KEY_ATTACHMENT_ID: &str = "AttachmentId";

/// Pair this volume belongs to
pub const KEY_REPLICATION_ID: &str = "ReplicationId";

/// Volume on the other side of the pair
pub const KEY_PEER_VOLUME_ID: &str = "PeerVolumeId";

pub const RESERVED_KEYS: [&str; 4] = [
    KEY_IS_PRIMARY,
    KEY_ATTACHMENT_ID,
    KEY_REPLICATION_ID,
    KEY_PEER_VOLUME_ID,
];

pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// `None` when the marker is absent or unparsable
pub fn is_primary(data: &DriverData) -> Option<bool> {
    data.get(KEY_IS_PRIMARY).and_then(|v| v.parse().ok())
}

pub fn set_primary(data: &mut DriverData, primary: bool) {
    data.insert(KEY_IS_PRIMARY.to_string(), primary.to_string());
}

pub fn attachment_id(data: &DriverData) -> Option<&str> {
    data.get(KEY_ATTACHMENT_ID).map(String::as_str)
}

pub fn set_attachment_id(data: &mut DriverData, attachment_id: &str) {
    data.insert(KEY_ATTACHMENT_ID.to_string(), attachment_id.to_string());
}

pub fn replication_id(data: &DriverData) -> Option<&str> {
    data.get(KEY_REPLICATION_ID).map(String::as_str)
}

pub fn peer_volume_id(data: &DriverData) -> Option<&str> {
    data.get(KEY_PEER_VOLUME_ID).map(String::as_str)
}

/// Markers written onto each participating volume once a pair is live
pub fn pair_markers(replication_id: &str, peer_volume_id: &str, primary: bool) -> DriverData {
    let mut data = DriverData::new();
    set_primary(&mut data, primary);
    data.insert(KEY_REPLICATION_ID.to_string(), replication_id.to_string());
    data.insert(KEY_PEER_VOLUME_ID.to_string(), peer_volume_id.to_string());
    data
}

/// Copy driver-returned entries into `target`, skipping reserved keys
pub fn merge_driver_entries(target: &mut DriverData, returned: &DriverData) {
    for (key, value) in returned {
        if !is_reserved(key) {
            target.insert(key.clone(), value.clone());
        }
    }
}
