//! Push-notification device registrations.
//!
//! Device ids can be long and are not bounded by the push vendors, so rows
//! are keyed by a fixed-length hash of the id instead of the id itself.

use std::collections::HashMap;

use rusqlite::{params, params_from_iter, Transaction};

use brook_types::Uid;

use crate::error::Result;
use crate::models::{opt_ts_col, ts_col, Device};
use crate::store::Store;
use crate::tags::placeholders;

/// Fixed-length key for a device id: first 8 bytes of its blake3 digest,
/// hex-encoded.
fn device_hash(device_id: &str) -> String {
    let digest = blake3::hash(device_id.as_bytes());
    hex::encode(&digest.as_bytes()[..8])
}

impl Store {
    /// Register a device or refresh an existing registration.  A device id
    /// previously registered to another user migrates to the new owner.
    pub fn upsert_device(&mut self, uid: Uid, dev: &Device) -> Result<()> {
        let hash = device_hash(&dev.device_id);
        let tx = self.conn_mut().transaction()?;
        tx.execute("DELETE FROM devices WHERE hash=?1", params![hash])?;
        tx.execute(
            "INSERT INTO devices(userid,hash,deviceid,platform,lastseen,lang)
             VALUES(?1,?2,?3,?4,?5,?6)",
            params![
                uid.raw(),
                hash,
                dev.device_id,
                dev.platform,
                dev.last_seen.to_rfc3339(),
                dev.lang,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Load the registered devices of the given users, grouped by user.
    pub fn get_devices(&self, uids: &[Uid]) -> Result<HashMap<Uid, Vec<Device>>> {
        let mut devices: HashMap<Uid, Vec<Device>> = HashMap::new();
        if uids.is_empty() {
            return Ok(devices);
        }

        let mut stmt = self.conn().prepare(&format!(
            "SELECT userid,deviceid,platform,lastseen,lang FROM devices WHERE userid IN ({})",
            placeholders(uids.len(), 1)
        ))?;
        let rows = stmt.query_map(params_from_iter(uids.iter().map(|u| u.raw())), |row| {
            Ok((
                Uid(row.get(0)?),
                Device {
                    device_id: row.get(1)?,
                    platform: row.get(2)?,
                    last_seen: ts_col(row, 3)?,
                    lang: row.get(4)?,
                },
            ))
        })?;

        for row in rows {
            let (uid, dev) = row?;
            devices.entry(uid).or_default().push(dev);
        }
        Ok(devices)
    }

    /// Remove one device registration, or all of the user's registrations
    /// when `device_id` is `None`.
    pub fn delete_device(&mut self, uid: Uid, device_id: Option<&str>) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        device_delete(&tx, uid, device_id)?;
        tx.commit()?;
        Ok(())
    }
}

/// Device deletion inside the caller's transaction.
pub(crate) fn device_delete(
    tx: &Transaction<'_>,
    uid: Uid,
    device_id: Option<&str>,
) -> Result<()> {
    match device_id {
        Some(id) => {
            tx.execute(
                "DELETE FROM devices WHERE userid=?1 AND hash=?2",
                params![uid.raw(), device_hash(id)],
            )?;
        }
        None => {
            tx.execute("DELETE FROM devices WHERE userid=?1", params![uid.raw()])?;
        }
    }
    Ok(())
}
