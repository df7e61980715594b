//! Uploaded-file metadata and message attachment links.
//!
//! The store tracks upload lifecycle and which messages reference which
//! uploads; the blobs themselves live elsewhere.  An upload with no links is
//! an orphan and can be garbage-collected.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension};

use brook_types::Uid;

use crate::error::{dupe_check, Result, StoreError};
use crate::models::{ts_col, FileUpload, UPLOAD_COMPLETED, UPLOAD_FAILED};
use crate::store::Store;
use crate::tags::placeholders;

impl Store {
    /// Record the start of an upload.
    pub fn file_start_upload(&self, fd: &FileUpload) -> Result<()> {
        if fd.id.is_zero() {
            return Err(StoreError::Malformed("file upload requires an id"));
        }
        self.conn()
            .execute(
                "INSERT INTO fileuploads(id,createdat,updatedat,userid,status,mimetype,size,location)
                 VALUES(?1,?2,?3,?4,?5,?6,?7,?8)",
                params![
                    fd.id.raw(),
                    fd.created_at.to_rfc3339(),
                    fd.updated_at.to_rfc3339(),
                    fd.user.raw(),
                    fd.status,
                    fd.mime_type,
                    fd.size,
                    fd.location,
                ],
            )
            .map_err(dupe_check)?;
        Ok(())
    }

    /// Mark an upload as finished and record its final size.  Returns the
    /// updated record.
    pub fn file_finish_upload(&self, id: Uid, success: bool, size: i64) -> Result<FileUpload> {
        if id.is_zero() {
            return Err(StoreError::Malformed("file upload requires an id"));
        }
        let status = if success { UPLOAD_COMPLETED } else { UPLOAD_FAILED };
        let updated = self.conn().execute(
            "UPDATE fileuploads SET updatedat=?1, status=?2, size=?3 WHERE id=?4",
            params![Utc::now().to_rfc3339(), status, size, id.raw()],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        self.file_get(id)?.ok_or(StoreError::NotFound)
    }

    /// Fetch upload metadata by id.
    pub fn file_get(&self, id: Uid) -> Result<Option<FileUpload>> {
        self.conn()
            .query_row(
                "SELECT id,createdat,updatedat,userid,status,mimetype,size,location
                 FROM fileuploads WHERE id=?1",
                params![id.raw()],
                row_to_file,
            )
            .optional()
            .map_err(StoreError::from)
    }

    /// Link uploads to the message that references them.
    pub fn message_attachments(&mut self, msg_id: i64, file_ids: &[Uid]) -> Result<()> {
        if file_ids.is_empty() || file_ids.iter().any(Uid::is_zero) {
            return Err(StoreError::Malformed("attachment list is empty or invalid"));
        }

        let now = Utc::now().to_rfc3339();
        let tx = self.conn_mut().transaction()?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO filemsglinks(createdat,fileid,msgid) VALUES(?1,?2,?3)",
            )?;
            for fid in file_ids {
                insert.execute(params![now, fid.raw(), msg_id])?;
            }
        }
        // Refresh updatedat so a freshly linked upload is not collected as
        // stale by an age-bounded sweep.
        tx.execute(
            &format!(
                "UPDATE fileuploads SET updatedat=?1 WHERE id IN ({})",
                placeholders(file_ids.len(), 2)
            ),
            params_from_iter(
                std::iter::once(rusqlite::types::Value::Text(now))
                    .chain(file_ids.iter().map(|f| rusqlite::types::Value::Integer(f.raw()))),
            ),
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Delete uploads that no message links to, optionally only those not
    /// touched since `older_than`.  Returns the locations of the deleted
    /// blobs so the caller can remove them from storage.
    pub fn file_delete_unused(
        &mut self,
        older_than: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<String>> {
        let mut query = String::from(
            "SELECT fu.id, fu.location FROM fileuploads AS fu
             LEFT JOIN filemsglinks AS fml ON fml.fileid=fu.id
             WHERE fml.id IS NULL",
        );
        let mut args: Vec<rusqlite::types::Value> = Vec::new();
        if let Some(ts) = older_than {
            args.push(rusqlite::types::Value::Text(ts.to_rfc3339()));
            query.push_str(&format!(" AND fu.updatedat<?{}", args.len()));
        }
        args.push(rusqlite::types::Value::Integer(self.limit(limit) as i64));
        query.push_str(&format!(" LIMIT ?{}", args.len()));

        let tx = self.conn_mut().transaction()?;
        let mut ids: Vec<i64> = Vec::new();
        let mut locations: Vec<String> = Vec::new();
        {
            let mut stmt = tx.prepare(&query)?;
            let rows = stmt.query_map(params_from_iter(args), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (id, location) = row?;
                ids.push(id);
                locations.push(location);
            }
        }

        if !ids.is_empty() {
            tracing::debug!(count = ids.len(), "collecting orphaned uploads");
            tx.execute(
                &format!(
                    "DELETE FROM fileuploads WHERE id IN ({})",
                    placeholders(ids.len(), 1)
                ),
                params_from_iter(ids),
            )?;
        }
        tx.commit()?;
        Ok(locations)
    }
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileUpload> {
    Ok(FileUpload {
        id: Uid(row.get(0)?),
        created_at: ts_col(row, 1)?,
        updated_at: ts_col(row, 2)?,
        user: Uid(row.get(3)?),
        status: row.get(4)?,
        mime_type: row.get(5)?,
        size: row.get(6)?,
        location: row.get(7)?,
    })
}
