//! User lifecycle and lookup operations.

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension};

use brook_types::Uid;

use crate::devices::device_delete;
use crate::error::{dupe_check, Result, StoreError};
use crate::models::{
    access_col, access_text, json_col, json_text, opt_text_value, opt_ts_col, tags_col, tags_text,
    ts_col, ts_value, DefaultAccess, DeleteMode, FoundEntity, SetBuilder, User,
};
use crate::store::Store;
use crate::subscriptions::subs_delete_for_user;
use crate::tags::{add_tags, all_tags, clear_tags, placeholders, remove_tags, TagOwner};

/// Partial update of a user row.  Absent fields are left untouched; `public`
/// distinguishes "unchanged" (`None`) from "cleared" (`Some(None)`).
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub updated_at: Option<DateTime<Utc>>,
    pub state: Option<i32>,
    pub access: Option<DefaultAccess>,
    pub last_seen: Option<DateTime<Utc>>,
    pub user_agent: Option<String>,
    pub public: Option<Option<serde_json::Value>>,
    /// Resets the tag index alongside the inline column.
    pub tags: Option<Vec<String>>,
}

impl Store {
    /// Insert a new user together with its tag-index rows.
    pub fn create_user(&mut self, user: &User) -> Result<()> {
        if user.uid.is_zero() {
            return Err(StoreError::Malformed("zero user id"));
        }

        let tx = self.conn_mut().transaction()?;

        tx.execute(
            "INSERT INTO users(id,createdat,updatedat,state,access,public,tags)
             VALUES(?1,?2,?3,?4,?5,?6,?7)",
            params![
                user.uid.raw(),
                user.created_at.to_rfc3339(),
                user.updated_at.to_rfc3339(),
                user.state,
                access_text(&user.access),
                json_text(&user.public),
                tags_text(&user.tags),
            ],
        )
        .map_err(dupe_check)?;

        // Tags also go to the index table to make the user findable.
        add_tags(&tx, &TagOwner::User(user.uid), &user.tags, false)?;

        tx.commit()?;
        Ok(())
    }

    /// Fetch a single user.  Soft-deleted users read as absent.
    pub fn get_user(&self, uid: Uid) -> Result<Option<User>> {
        self.conn()
            .query_row(
                "SELECT id,createdat,updatedat,deletedat,state,access,lastseen,useragent,public,tags
                 FROM users WHERE id=?1 AND deletedat IS NULL",
                params![uid.raw()],
                row_to_user,
            )
            .optional()
            .map_err(StoreError::from)
    }

    /// Fetch several users at once.  Soft-deleted users are omitted.
    pub fn get_users(&self, uids: &[Uid]) -> Result<Vec<User>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn().prepare(&format!(
            "SELECT id,createdat,updatedat,deletedat,state,access,lastseen,useragent,public,tags
             FROM users WHERE id IN ({}) AND deletedat IS NULL",
            placeholders(uids.len(), 1)
        ))?;
        let rows = stmt.query_map(
            params_from_iter(uids.iter().map(|u| u.raw())),
            row_to_user,
        )?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// Apply a partial update; resets the tag index when tags are present.
    pub fn update_user(&mut self, uid: Uid, update: &UserUpdate) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        let mut set = SetBuilder::new();
        if let Some(ts) = &update.updated_at {
            set.push("updatedat", ts_value(ts));
        }
        if let Some(state) = update.state {
            set.push("state", Value::Integer(state as i64));
        }
        if let Some(access) = &update.access {
            set.push("access", opt_text_value(access_text(access)));
        }
        if let Some(ts) = &update.last_seen {
            set.push("lastseen", ts_value(ts));
        }
        if let Some(ua) = &update.user_agent {
            set.push("useragent", Value::Text(ua.clone()));
        }
        if let Some(public) = &update.public {
            set.push("public", opt_text_value(json_text(public)));
        }
        if let Some(tags) = &update.tags {
            set.push("tags", opt_text_value(tags_text(tags)));
        }

        if !set.is_empty() {
            let (clause, mut args) = set.finish();
            let key_pos = args.len() + 1;
            args.push(Value::Integer(uid.raw()));
            tx.execute(
                &format!("UPDATE users SET {clause} WHERE id=?{key_pos}"),
                params_from_iter(args),
            )?;
        }

        if let Some(tags) = &update.tags {
            let owner = TagOwner::User(uid);
            clear_tags(&tx, &owner)?;
            add_tags(&tx, &owner, tags, false)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Add, remove or reset the user's tags.  Returns the resulting tag set
    /// and rewrites the denormalized column to match the index.
    pub fn update_user_tags(
        &mut self,
        uid: Uid,
        add: &[String],
        remove: &[String],
        reset: Option<&[String]>,
    ) -> Result<Vec<String>> {
        let tx = self.conn_mut().transaction()?;
        let owner = TagOwner::User(uid);

        let (add, remove): (&[String], &[String]) = if let Some(reset) = reset {
            clear_tags(&tx, &owner)?;
            (reset, &[])
        } else {
            (add, remove)
        };

        // Ignore duplicates when resetting.
        add_tags(&tx, &owner, add, reset.is_some())?;
        remove_tags(&tx, &owner, remove)?;

        let tags = all_tags(&tx, &owner)?;
        tx.execute(
            "UPDATE users SET tags=?1 WHERE id=?2",
            params![tags_text(&tags), uid.raw()],
        )?;

        tx.commit()?;
        Ok(tags)
    }

    /// Delete a user: soft-delete disables the user, its subscriptions and
    /// owned topics; hard-delete cascades over devices, subscriptions,
    /// per-user deletion-log entries, owned topics with their messages and
    /// tags, credentials and tag rows.
    pub fn delete_user(&mut self, uid: Uid, mode: DeleteMode) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        match mode {
            DeleteMode::Hard => {
                tracing::info!(user = %uid, "hard-deleting user");

                device_delete(&tx, uid, None)?;
                subs_delete_for_user(&tx, uid, DeleteMode::Hard)?;

                // Records of messages soft-deleted for the user.
                tx.execute("DELETE FROM dellog WHERE deletedfor=?1", params![uid.raw()])?;

                // Messages of the user in other topics stay, attributed to a
                // no-longer-resolvable sender.  Owned topics go entirely.
                tx.execute(
                    "DELETE FROM dellog WHERE topic IN (SELECT name FROM topics WHERE owner=?1)",
                    params![uid.raw()],
                )?;
                tx.execute(
                    "DELETE FROM messages WHERE topic IN (SELECT name FROM topics WHERE owner=?1)",
                    params![uid.raw()],
                )?;
                tx.execute(
                    "DELETE FROM subscriptions WHERE topic IN (SELECT name FROM topics WHERE owner=?1)",
                    params![uid.raw()],
                )?;
                tx.execute(
                    "DELETE FROM topictags WHERE topic IN (SELECT name FROM topics WHERE owner=?1)",
                    params![uid.raw()],
                )?;
                tx.execute("DELETE FROM topics WHERE owner=?1", params![uid.raw()])?;

                crate::credentials::cred_delete(&tx, uid, None, None)?;

                tx.execute("DELETE FROM usertags WHERE userid=?1", params![uid.raw()])?;
                tx.execute("DELETE FROM users WHERE id=?1", params![uid.raw()])?;
            }
            DeleteMode::Soft => {
                let now = Utc::now().to_rfc3339();

                // Disable the user's subscriptions, including p2p ones.
                subs_delete_for_user(&tx, uid, DeleteMode::Soft)?;

                // Disable subscriptions to topics the user owns, then the
                // topics themselves.
                tx.execute(
                    "UPDATE subscriptions SET updatedat=?1, deletedat=?1
                     WHERE topic IN (SELECT name FROM topics WHERE owner=?2)",
                    params![now, uid.raw()],
                )?;
                tx.execute(
                    "UPDATE topics SET updatedat=?1, deletedat=?1 WHERE owner=?2",
                    params![now, uid.raw()],
                )?;

                tx.execute(
                    "UPDATE users SET updatedat=?1, deletedat=?1 WHERE id=?2",
                    params![now, uid.raw()],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Resolve a user by a credential's synthetic key (`method:value`).
    /// Returns the zero uid when no such credential exists.
    pub fn get_user_by_credential(&self, method: &str, value: &str) -> Result<Uid> {
        let uid: Option<i64> = self
            .conn()
            .query_row(
                "SELECT userid FROM credentials WHERE synthetic=?1",
                params![format!("{method}:{value}")],
                |row| row.get(0),
            )
            .optional()?;
        Ok(uid.map(Uid).unwrap_or(Uid::ZERO))
    }

    /// Users soft-deleted at or after the given instant.
    pub fn users_disabled_since(&self, since: DateTime<Utc>) -> Result<Vec<Uid>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id FROM users WHERE deletedat>=?1")?;
        let rows = stmt.query_map(params![since.to_rfc3339()], |row| {
            row.get::<_, i64>(0).map(Uid)
        })?;

        let mut uids = Vec::new();
        for row in rows {
            uids.push(row?);
        }
        Ok(uids)
    }

    /// Total number of unread messages across topics the user can read.
    pub fn unread_count(&self, uid: Uid) -> Result<i64> {
        let count: Option<i64> = self.conn().query_row(
            "SELECT SUM(t.seqid)-SUM(s.readseqid) FROM topics AS t, subscriptions AS s
             WHERE s.userid=?1 AND t.name=s.topic
               AND s.deletedat IS NULL AND t.deletedat IS NULL
               AND INSTR(s.modewant,'R')>0 AND INSTR(s.modegiven,'R')>0",
            params![uid.raw()],
            |row| row.get(0),
        )?;
        Ok(count.unwrap_or(0))
    }

    /// Find users matching the given tags, ranked by match count descending.
    /// An entity must carry every tag in `required`; `optional` tags only add
    /// to the ranking.  The caller is excluded from the results.
    pub fn find_users(
        &self,
        caller: Uid,
        required: &[String],
        optional: &[String],
    ) -> Result<Vec<FoundEntity>> {
        let queried: Vec<&String> = required.iter().chain(optional.iter()).collect();
        if queried.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = format!(
            "SELECT u.id,u.createdat,u.updatedat,u.access,u.public,u.tags,COUNT(*) AS matches
             FROM users AS u JOIN usertags AS ut ON ut.userid=u.id
             WHERE ut.tag IN ({}) AND u.deletedat IS NULL
             GROUP BY u.id,u.createdat,u.updatedat,u.access,u.public,u.tags",
            placeholders(queried.len(), 1)
        );
        let mut args: Vec<Value> = queried
            .iter()
            .map(|t| Value::Text((*t).clone()))
            .collect();

        // The join fans out one row per matching tag, so the all-required
        // check is a count over the aggregated group, not a per-tag lookup.
        if !required.is_empty() {
            let start = args.len() + 1;
            query.push_str(&format!(
                " HAVING SUM(CASE WHEN ut.tag IN ({}) THEN 1 ELSE 0 END)>=?{}",
                placeholders(required.len(), start),
                start + required.len()
            ));
            args.extend(required.iter().map(|t| Value::Text(t.clone())));
            args.push(Value::Integer(required.len() as i64));
        }

        let limit_pos = args.len() + 1;
        query.push_str(&format!(" ORDER BY matches DESC LIMIT ?{limit_pos}"));
        args.push(Value::Integer(self.limit(None) as i64));

        let mut stmt = self.conn().prepare(&query)?;
        let rows = stmt.query_map(params_from_iter(args), |row| {
            let id: i64 = row.get(0)?;
            Ok((
                Uid(id),
                FoundEntity {
                    id: Uid(id).to_opaque(),
                    created_at: ts_col(row, 1)?,
                    updated_at: ts_col(row, 2)?,
                    access: access_col(row, 3)?,
                    public: json_col(row, 4)?,
                    matched_tags: tags_col(row, 5)?,
                },
            ))
        })?;

        let mut found = Vec::new();
        for row in rows {
            let (uid, mut entity) = row?;
            if uid == caller {
                // Skip the searching user.
                continue;
            }
            entity
                .matched_tags
                .retain(|t| queried.iter().any(|q| *q == t));
            found.push(entity);
        }
        Ok(found)
    }
}

/// Map a row to a [`User`].  Column order:
/// id,createdat,updatedat,deletedat,state,access,lastseen,useragent,public,tags.
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        uid: Uid(row.get(0)?),
        created_at: ts_col(row, 1)?,
        updated_at: ts_col(row, 2)?,
        deleted_at: opt_ts_col(row, 3)?,
        state: row.get(4)?,
        access: access_col(row, 5)?,
        last_seen: opt_ts_col(row, 6)?,
        user_agent: row.get(7)?,
        public: json_col(row, 8)?,
        tags: tags_col(row, 9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{new_user, store};

    #[test]
    fn create_and_get_round_trip() {
        let mut store = store();
        let user = new_user(1, &["email:alice@example.com"]);
        store.create_user(&user).unwrap();

        let loaded = store.get_user(Uid(1)).unwrap().unwrap();
        assert_eq!(loaded.uid, Uid(1));
        assert_eq!(loaded.tags, user.tags);
    }

    #[test]
    fn duplicate_user_id_reports_duplicate() {
        let mut store = store();
        store.create_user(&new_user(1, &[])).unwrap();
        let err = store.create_user(&new_user(1, &[])).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate));
    }

    #[test]
    fn soft_deleted_user_is_invisible() {
        let mut store = store();
        store.create_user(&new_user(1, &[])).unwrap();
        store.delete_user(Uid(1), DeleteMode::Soft).unwrap();

        assert!(store.get_user(Uid(1)).unwrap().is_none());
        assert_eq!(
            store
                .users_disabled_since(Utc::now() - chrono::Duration::minutes(1))
                .unwrap(),
            vec![Uid(1)]
        );
    }

    #[test]
    fn hard_delete_removes_dependents() {
        let mut store = store();
        store.create_user(&new_user(1, &["a"])).unwrap();
        store.delete_user(Uid(1), DeleteMode::Hard).unwrap();

        assert!(store.get_user(Uid(1)).unwrap().is_none());
        let tag_rows: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM usertags", [], |r| r.get(0))
            .unwrap();
        assert_eq!(tag_rows, 0);
    }

    #[test]
    fn tag_update_resets_index_and_column() {
        let mut store = store();
        store.create_user(&new_user(1, &["old"])).unwrap();

        let tags = store
            .update_user_tags(Uid(1), &[], &[], Some(&["x".into(), "y".into()]))
            .unwrap();
        let mut sorted = tags.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["x", "y"]);

        let loaded = store.get_user(Uid(1)).unwrap().unwrap();
        let mut loaded_tags = loaded.tags;
        loaded_tags.sort();
        assert_eq!(loaded_tags, vec!["x", "y"]);
    }

    #[test]
    fn find_users_requires_all_required_tags() {
        let mut store = store();
        store.create_user(&new_user(1, &["rust", "chess"])).unwrap();
        store.create_user(&new_user(2, &["rust"])).unwrap();
        store.create_user(&new_user(3, &["chess"])).unwrap();

        let found = store
            .find_users(Uid(9), &["rust".into()], &["chess".into()])
            .unwrap();
        let ids: Vec<String> = found.iter().map(|f| f.id.clone()).collect();

        // Both rust users match; the one also carrying the optional tag
        // ranks first.  User 3 misses the required tag.
        assert_eq!(
            ids,
            vec![Uid(1).to_opaque(), Uid(2).to_opaque()]
        );
    }

    #[test]
    fn find_users_skips_caller() {
        let mut store = store();
        store.create_user(&new_user(1, &["rust"])).unwrap();
        store.create_user(&new_user(2, &["rust"])).unwrap();

        let found = store.find_users(Uid(1), &["rust".into()], &[]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, Uid(2).to_opaque());
    }
}
