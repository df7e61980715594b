//! Subscription operations: the link between one user and one topic.

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Transaction};

use brook_types::{AccessMode, Uid};

use crate::error::{is_unique_violation, Result, StoreError};
use crate::models::{
    json_col, json_text, mode_col, opt_text_value, opt_ts_col, ts_col, ts_value, DeleteMode,
    ListOpts, SetBuilder, Subscription, Visibility,
};
use crate::store::Store;

/// Partial update of a subscription row.
#[derive(Debug, Clone, Default)]
pub struct SubUpdate {
    pub updated_at: Option<DateTime<Utc>>,
    pub mode_want: Option<AccessMode>,
    pub mode_given: Option<AccessMode>,
    pub recv_seq_id: Option<u32>,
    pub read_seq_id: Option<u32>,
    pub private: Option<Option<serde_json::Value>>,
}

impl Store {
    /// Fetch one subscription.  Soft-deleted subscriptions read as absent.
    pub fn get_subscription(&self, topic: &str, user: Uid) -> Result<Option<Subscription>> {
        let sub = self
            .conn()
            .query_row(
                "SELECT createdat,updatedat,deletedat,userid,topic,delid,recvseqid,readseqid,
                        modewant,modegiven,private,lastseen,useragent
                 FROM subscriptions WHERE topic=?1 AND userid=?2",
                params![topic, user.raw()],
                row_to_sub,
            )
            .optional()?;

        Ok(sub.filter(|s| s.deleted_at.is_none()))
    }

    /// Subscriptions of one user.  Does not load public profiles; used for
    /// presence fan-out.
    pub fn subs_for_user(
        &self,
        user: Uid,
        vis: Visibility,
        opts: &ListOpts,
    ) -> Result<Vec<Subscription>> {
        let mut query = String::from(
            "SELECT createdat,updatedat,deletedat,userid,topic,delid,recvseqid,readseqid,
                    modewant,modegiven,private,lastseen,useragent
             FROM subscriptions WHERE userid=?1",
        );
        let mut args: Vec<Value> = vec![Value::Integer(user.raw())];

        if !vis.keep_deleted() {
            query.push_str(" AND deletedat IS NULL");
        }
        if let Some(topic) = &opts.topic {
            args.push(Value::Text(topic.clone()));
            query.push_str(&format!(" AND topic=?{}", args.len()));
        }
        args.push(Value::Integer(self.limit(opts.limit) as i64));
        query.push_str(&format!(" LIMIT ?{}", args.len()));

        let mut stmt = self.conn().prepare(&query)?;
        let rows = stmt.query_map(params_from_iter(args), row_to_sub)?;

        let mut subs = Vec::new();
        for row in rows {
            subs.push(row?);
        }
        Ok(subs)
    }

    /// Subscriptions to one topic.  Does not load public profiles.
    pub fn subs_for_topic(
        &self,
        topic: &str,
        vis: Visibility,
        opts: &ListOpts,
    ) -> Result<Vec<Subscription>> {
        let mut query = String::from(
            "SELECT createdat,updatedat,deletedat,userid,topic,delid,recvseqid,readseqid,
                    modewant,modegiven,private,lastseen,useragent
             FROM subscriptions WHERE topic=?1",
        );
        let mut args: Vec<Value> = vec![Value::Text(topic.to_string())];

        if !vis.keep_deleted() {
            query.push_str(" AND deletedat IS NULL");
        }
        if let Some(user) = opts.user {
            args.push(Value::Integer(user.raw()));
            query.push_str(&format!(" AND userid=?{}", args.len()));
        }
        args.push(Value::Integer(self.limit(opts.limit) as i64));
        query.push_str(&format!(" LIMIT ?{}", args.len()));

        let mut stmt = self.conn().prepare(&query)?;
        let rows = stmt.query_map(params_from_iter(args), row_to_sub)?;

        let mut subs = Vec::new();
        for row in rows {
            subs.push(row?);
        }
        Ok(subs)
    }

    /// Update one subscription, or every subscription of the topic when
    /// `user` is `None`.
    pub fn update_subscription(
        &mut self,
        topic: &str,
        user: Option<Uid>,
        update: &SubUpdate,
    ) -> Result<()> {
        let mut set = SetBuilder::new();
        if let Some(ts) = &update.updated_at {
            set.push("updatedat", ts_value(ts));
        }
        if let Some(mode) = &update.mode_want {
            set.push("modewant", Value::Text(mode.to_string()));
        }
        if let Some(mode) = &update.mode_given {
            set.push("modegiven", Value::Text(mode.to_string()));
        }
        if let Some(seq) = update.recv_seq_id {
            set.push("recvseqid", Value::Integer(seq as i64));
        }
        if let Some(seq) = update.read_seq_id {
            set.push("readseqid", Value::Integer(seq as i64));
        }
        if let Some(private) = &update.private {
            set.push("private", opt_text_value(json_text(private)));
        }
        if set.is_empty() {
            return Ok(());
        }

        let (clause, mut args) = set.finish();
        args.push(Value::Text(topic.to_string()));
        let mut query = format!("UPDATE subscriptions SET {clause} WHERE topic=?{}", args.len());
        if let Some(user) = user {
            args.push(Value::Integer(user.raw()));
            query.push_str(&format!(" AND userid=?{}", args.len()));
        }

        let tx = self.conn_mut().transaction()?;
        tx.execute(&query, params_from_iter(args))?;
        tx.commit()?;
        Ok(())
    }

    /// Soft-delete one subscription.  Reports [`StoreError::NotFound`] when
    /// no active subscription matched.
    pub fn delete_subscription(&mut self, topic: &str, user: Uid) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let affected = self.conn().execute(
            "UPDATE subscriptions SET updatedat=?1, deletedat=?1
             WHERE topic=?2 AND userid=?3 AND deletedat IS NULL",
            params![now, topic, user.raw()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Delete all subscriptions to a topic.
    pub fn delete_subs_for_topic(&mut self, topic: &str, mode: DeleteMode) -> Result<()> {
        match mode {
            DeleteMode::Hard => {
                self.conn()
                    .execute("DELETE FROM subscriptions WHERE topic=?1", params![topic])?;
            }
            DeleteMode::Soft => {
                let now = Utc::now().to_rfc3339();
                self.conn().execute(
                    "UPDATE subscriptions SET updatedat=?1, deletedat=?1
                     WHERE topic=?2 AND deletedat IS NULL",
                    params![now, topic],
                )?;
            }
        }
        Ok(())
    }

    /// Record the user's last presence in a topic, for member listings.
    pub fn update_sub_last_seen(
        &self,
        topic: &str,
        user: Uid,
        when: DateTime<Utc>,
        user_agent: &str,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE subscriptions SET lastseen=?1, useragent=?2 WHERE topic=?3 AND userid=?4",
            params![when.to_rfc3339(), user_agent, topic, user.raw()],
        )?;
        Ok(())
    }

    /// Delete all subscriptions of a user.
    pub fn delete_subs_for_user(&mut self, user: Uid, mode: DeleteMode) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        subs_delete_for_user(&tx, user, mode)?;
        tx.commit()?;
        Ok(())
    }
}

/// Delete or disable every subscription of the user, inside the caller's
/// transaction.
pub(crate) fn subs_delete_for_user(
    tx: &Transaction<'_>,
    user: Uid,
    mode: DeleteMode,
) -> Result<()> {
    match mode {
        DeleteMode::Hard => {
            tx.execute(
                "DELETE FROM subscriptions WHERE userid=?1",
                params![user.raw()],
            )?;
        }
        DeleteMode::Soft => {
            let now = Utc::now().to_rfc3339();
            tx.execute(
                "UPDATE subscriptions SET updatedat=?1, deletedat=?1 WHERE userid=?2",
                params![now, user.raw()],
            )?;
        }
    }
    Ok(())
}

/// Insert a subscription, reviving a soft-deleted row on conflict.  With
/// `undelete` only the given mode is refreshed; otherwise the whole row is
/// rewritten.  When the effective mode carries ownership the topic's owner is
/// updated as well.
pub(crate) fn create_subscription(
    tx: &Transaction<'_>,
    sub: &Subscription,
    undelete: bool,
) -> Result<()> {
    let is_owner = sub.mode_given.intersect(sub.mode_want).is_owner();
    let private = json_text(&sub.private);

    let inserted = tx.execute(
        "INSERT INTO subscriptions(createdat,updatedat,deletedat,userid,topic,modewant,modegiven,private)
         VALUES(?1,?2,NULL,?3,?4,?5,?6,?7)",
        params![
            sub.created_at.to_rfc3339(),
            sub.updated_at.to_rfc3339(),
            sub.user.raw(),
            sub.topic,
            sub.mode_want.to_string(),
            sub.mode_given.to_string(),
            private,
        ],
    );

    match inserted {
        Ok(_) => {}
        Err(err) if is_unique_violation(&err) => {
            if undelete {
                tx.execute(
                    "UPDATE subscriptions SET createdat=?1,updatedat=?2,deletedat=NULL,modegiven=?3
                     WHERE topic=?4 AND userid=?5",
                    params![
                        sub.created_at.to_rfc3339(),
                        sub.updated_at.to_rfc3339(),
                        sub.mode_given.to_string(),
                        sub.topic,
                        sub.user.raw(),
                    ],
                )?;
            } else {
                tx.execute(
                    "UPDATE subscriptions SET createdat=?1,updatedat=?2,deletedat=NULL,
                            modewant=?3,modegiven=?4,private=?5
                     WHERE topic=?6 AND userid=?7",
                    params![
                        sub.created_at.to_rfc3339(),
                        sub.updated_at.to_rfc3339(),
                        sub.mode_want.to_string(),
                        sub.mode_given.to_string(),
                        private,
                        sub.topic,
                        sub.user.raw(),
                    ],
                )?;
            }
        }
        Err(err) => return Err(err.into()),
    }

    if is_owner {
        tx.execute(
            "UPDATE topics SET owner=?1 WHERE name=?2",
            params![sub.user.raw(), sub.topic],
        )?;
    }
    Ok(())
}

/// Map a bare subscription row.  Column order:
/// createdat,updatedat,deletedat,userid,topic,delid,recvseqid,readseqid,
/// modewant,modegiven,private,lastseen,useragent.
pub(crate) fn row_to_sub(row: &rusqlite::Row<'_>) -> rusqlite::Result<Subscription> {
    Ok(Subscription {
        created_at: ts_col(row, 0)?,
        updated_at: ts_col(row, 1)?,
        deleted_at: opt_ts_col(row, 2)?,
        user: Uid(row.get(3)?),
        topic: row.get(4)?,
        del_id: row.get(5)?,
        recv_seq_id: row.get(6)?,
        read_seq_id: row.get(7)?,
        mode_want: mode_col(row, 8)?,
        mode_given: mode_col(row, 9)?,
        private: json_col(row, 10)?,
        public: None,
        seq_id: 0,
        touched_at: None,
        with_user: None,
        default_access: None,
        last_seen: opt_ts_col(row, 11)?,
        user_agent: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{new_sub, new_topic, new_user, store};

    #[test]
    fn unique_topic_user_pair_revived_not_duplicated() {
        let mut store = store();
        store.create_user(&new_user(1, &[])).unwrap();
        store.create_topic(&new_topic("grptest", Uid(1))).unwrap();

        let sub = new_sub(Uid(1), "grptest");
        {
            let tx = store.conn_mut().transaction().unwrap();
            create_subscription(&tx, &sub, false).unwrap();
            tx.commit().unwrap();
        }
        store.delete_subscription("grptest", Uid(1)).unwrap();
        {
            let tx = store.conn_mut().transaction().unwrap();
            create_subscription(&tx, &sub, true).unwrap();
            tx.commit().unwrap();
        }

        let count: i64 = store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM subscriptions WHERE topic='grptest'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert!(store.get_subscription("grptest", Uid(1)).unwrap().is_some());
    }

    #[test]
    fn delete_missing_subscription_is_not_found() {
        let mut store = store();
        let err = store.delete_subscription("nosuch", Uid(1)).unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn soft_deleted_sub_hidden_unless_kept() {
        let mut store = store();
        store.create_user(&new_user(1, &[])).unwrap();
        store.create_topic(&new_topic("grpx", Uid(1))).unwrap();
        {
            let tx = store.conn_mut().transaction().unwrap();
            create_subscription(&tx, &new_sub(Uid(1), "grpx"), false).unwrap();
            tx.commit().unwrap();
        }
        store.delete_subscription("grpx", Uid(1)).unwrap();

        assert!(store.get_subscription("grpx", Uid(1)).unwrap().is_none());
        let active = store
            .subs_for_user(Uid(1), Visibility::ActiveOnly, &ListOpts::default())
            .unwrap();
        assert!(active.is_empty());
        let all = store
            .subs_for_user(Uid(1), Visibility::KeepDeleted, &ListOpts::default())
            .unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].deleted_at.is_some());
    }

    #[test]
    fn last_seen_recorded_per_subscription() {
        let mut store = store();
        store.create_user(&new_user(1, &[])).unwrap();
        store.create_topic(&new_topic("grpseen", Uid(1))).unwrap();
        {
            let tx = store.conn_mut().transaction().unwrap();
            create_subscription(&tx, &new_sub(Uid(1), "grpseen"), false).unwrap();
            tx.commit().unwrap();
        }

        let sub = store.get_subscription("grpseen", Uid(1)).unwrap().unwrap();
        assert!(sub.last_seen.is_none());

        let when = Utc::now();
        store
            .update_sub_last_seen("grpseen", Uid(1), when, "brook/0.1")
            .unwrap();

        let sub = store.get_subscription("grpseen", Uid(1)).unwrap().unwrap();
        assert_eq!(sub.last_seen, Some(when));
        assert_eq!(sub.user_agent.as_deref(), Some("brook/0.1"));
    }

    #[test]
    fn update_watermarks() {
        let mut store = store();
        store.create_user(&new_user(1, &[])).unwrap();
        store.create_topic(&new_topic("grpy", Uid(1))).unwrap();
        {
            let tx = store.conn_mut().transaction().unwrap();
            create_subscription(&tx, &new_sub(Uid(1), "grpy"), false).unwrap();
            tx.commit().unwrap();
        }

        store
            .update_subscription(
                "grpy",
                Some(Uid(1)),
                &SubUpdate {
                    read_seq_id: Some(5),
                    recv_seq_id: Some(7),
                    ..Default::default()
                },
            )
            .unwrap();

        let sub = store.get_subscription("grpy", Uid(1)).unwrap().unwrap();
        assert_eq!(sub.read_seq_id, 5);
        assert_eq!(sub.recv_seq_id, 7);
    }
}
