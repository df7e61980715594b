//! Validated contact credentials (email, phone and similar).
//!
//! Uniqueness is enforced through the `synthetic` column.  While a credential
//! awaits confirmation the synthetic key is `user:method:value`, so several
//! users may try to claim the same address at once.  Confirmation rewrites it
//! to `method:value`, at which point the claim becomes exclusive.

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Transaction};

use brook_types::Uid;

use crate::error::{dupe_check, is_unique_violation, Result, StoreError};
use crate::models::{opt_ts_col, ts_col, Credential};
use crate::store::Store;

impl Store {
    /// Insert or revive a credential.  Returns `true` when a new row was
    /// inserted, `false` when an existing unconfirmed row was revived.
    ///
    /// An unconfirmed upsert fails with [`StoreError::Duplicate`] when some
    /// user already confirmed the same value; a confirmed upsert fails the
    /// same way when the value is confirmed elsewhere.
    pub fn upsert_credential(&mut self, cred: &Credential) -> Result<bool> {
        if cred.user.is_zero() {
            return Err(StoreError::Malformed("credential requires a user"));
        }

        let tx = self.conn_mut().transaction()?;
        let confirmed_synth = format!("{}:{}", cred.method, cred.value);
        let shadow_synth = format!("{}:{}", cred.user.raw(), confirmed_synth);
        let now = Utc::now().to_rfc3339();

        let inserted = if !cred.done {
            let taken: Option<i64> = tx
                .query_row(
                    "SELECT userid FROM credentials WHERE synthetic=?1",
                    params![confirmed_synth],
                    |row| row.get(0),
                )
                .optional()?;
            if taken.is_some() {
                return Err(StoreError::Duplicate);
            }

            // Retire earlier unconfirmed attempts with the same method.
            // Confirmed rows are untouched.
            tx.execute(
                "UPDATE credentials SET updatedat=?1, deletedat=?1
                 WHERE userid=?2 AND method=?3 AND done=0",
                params![now, cred.user.raw(), cred.method],
            )?;

            // Revive keeps the retry counter: re-creating a credential must
            // not reset the attempt budget.
            let revived = tx.execute(
                "UPDATE credentials
                 SET updatedat=?1, deletedat=NULL, resp=?2
                 WHERE synthetic=?3",
                params![now, cred.resp, shadow_synth],
            )?;
            if revived > 0 {
                false
            } else {
                tx.execute(
                    "INSERT INTO credentials(createdat,updatedat,method,value,synthetic,userid,resp,done)
                     VALUES(?1,?2,?3,?4,?5,?6,?7,0)",
                    params![
                        cred.created_at.to_rfc3339(),
                        cred.updated_at.to_rfc3339(),
                        cred.method,
                        cred.value,
                        shadow_synth,
                        cred.user.raw(),
                        cred.resp,
                    ],
                )?;
                true
            }
        } else {
            // A pre-validated credential replaces its own unconfirmed shadow.
            tx.execute(
                "DELETE FROM credentials WHERE synthetic=?1",
                params![shadow_synth],
            )?;
            tx.execute(
                "INSERT INTO credentials(createdat,updatedat,method,value,synthetic,userid,resp,done)
                 VALUES(?1,?2,?3,?4,?5,?6,?7,1)",
                params![
                    cred.created_at.to_rfc3339(),
                    cred.updated_at.to_rfc3339(),
                    cred.method,
                    cred.value,
                    confirmed_synth,
                    cred.user.raw(),
                    cred.resp,
                ],
            )
            .map_err(dupe_check)?;
            true
        };

        tx.commit()?;
        Ok(inserted)
    }

    /// Mark the user's pending credential of the given method as confirmed
    /// and promote its synthetic key to the exclusive form.
    pub fn confirm_credential(&self, uid: Uid, method: &str) -> Result<()> {
        let updated = self
            .conn()
            .execute(
                "UPDATE credentials
                 SET updatedat=?1, done=1, synthetic=method||':'||value
                 WHERE userid=?2 AND method=?3 AND deletedat IS NULL AND done=0",
                params![Utc::now().to_rfc3339(), uid.raw(), method],
            )
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::Duplicate
                } else {
                    err.into()
                }
            })?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Count a failed confirmation attempt.
    pub fn fail_credential(&self, uid: Uid, method: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE credentials SET updatedat=?1, retries=retries+1
             WHERE userid=?2 AND method=?3 AND deletedat IS NULL AND done=0",
            params![Utc::now().to_rfc3339(), uid.raw(), method],
        )?;
        Ok(())
    }

    /// The user's pending credential of the given method, if any.
    pub fn get_active_credential(&self, uid: Uid, method: &str) -> Result<Option<Credential>> {
        self.conn()
            .query_row(
                "SELECT userid,createdat,updatedat,deletedat,method,value,resp,done,retries
                 FROM credentials
                 WHERE userid=?1 AND method=?2 AND deletedat IS NULL AND done=0",
                params![uid.raw(), method],
                row_to_credential,
            )
            .optional()
            .map_err(StoreError::from)
    }

    /// List the user's credentials, optionally restricted to one method or
    /// to confirmed ones.
    pub fn get_credentials(
        &self,
        uid: Uid,
        method: Option<&str>,
        confirmed_only: bool,
    ) -> Result<Vec<Credential>> {
        let mut query = String::from(
            "SELECT userid,createdat,updatedat,deletedat,method,value,resp,done,retries
             FROM credentials WHERE userid=?1",
        );
        let mut args: Vec<Value> = vec![Value::Integer(uid.raw())];
        if let Some(method) = method {
            args.push(Value::Text(method.to_string()));
            query.push_str(&format!(" AND method=?{}", args.len()));
        }
        if confirmed_only {
            query.push_str(" AND done=1");
        } else {
            query.push_str(" AND deletedat IS NULL");
        }

        let mut stmt = self.conn().prepare(&query)?;
        let rows = stmt.query_map(params_from_iter(args), row_to_credential)?;

        let mut creds = Vec::new();
        for row in rows {
            creds.push(row?);
        }
        Ok(creds)
    }

    /// Delete the user's credentials; see [`cred_delete`] for the rules.
    pub fn delete_credential(
        &mut self,
        uid: Uid,
        method: Option<&str>,
        value: Option<&str>,
    ) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        cred_delete(&tx, uid, method, value)?;
        tx.commit()?;
        Ok(())
    }

    /// Whether the user holds a confirmed credential of the given method.
    pub fn is_credential_confirmed(&self, uid: Uid, method: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM credentials WHERE userid=?1 AND method=?2 AND done=1",
                params![uid.raw(), method],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

/// Credential deletion inside the caller's transaction.
///
/// With no method everything goes, hard.  With a method (and optionally a
/// value): confirmed rows and rows never used in a confirmation attempt are
/// hard-deleted; rows with failed attempts are soft-deleted so the retry
/// count survives.
pub(crate) fn cred_delete(
    tx: &Transaction<'_>,
    uid: Uid,
    method: Option<&str>,
    value: Option<&str>,
) -> Result<()> {
    let Some(method) = method else {
        tx.execute("DELETE FROM credentials WHERE userid=?1", params![uid.raw()])?;
        return Ok(());
    };

    let mut cond = String::from("userid=?1 AND method=?2");
    let mut args: Vec<Value> = vec![
        Value::Integer(uid.raw()),
        Value::Text(method.to_string()),
    ];
    if let Some(value) = value {
        args.push(Value::Text(value.to_string()));
        cond.push_str(&format!(" AND value=?{}", args.len()));
    }

    tx.execute(
        &format!("DELETE FROM credentials WHERE {cond} AND (done=1 OR retries=0)"),
        params_from_iter(args.iter().cloned()),
    )?;

    let now_pos = args.len() + 1;
    args.push(Value::Text(Utc::now().to_rfc3339()));
    tx.execute(
        &format!("UPDATE credentials SET updatedat=?{now_pos}, deletedat=?{now_pos} WHERE {cond}"),
        params_from_iter(args),
    )?;

    Ok(())
}

fn row_to_credential(row: &rusqlite::Row<'_>) -> rusqlite::Result<Credential> {
    Ok(Credential {
        user: Uid(row.get(0)?),
        created_at: ts_col(row, 1)?,
        updated_at: ts_col(row, 2)?,
        deleted_at: opt_ts_col(row, 3)?,
        method: row.get(4)?,
        value: row.get(5)?,
        resp: row.get(6)?,
        done: row.get::<_, i64>(7)? != 0,
        retries: row.get(8)?,
    })
}
