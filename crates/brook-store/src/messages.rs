//! Message storage and the deletion-range log.
//!
//! Deleting messages "for everyone" blanks the rows in place (`delid` set,
//! head and content cleared); deleting "for me" only records ranges in the
//! `dellog` table and the rows stay untouched.  Reads consult the log so each
//! user sees their own view of the conversation.

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Transaction};

use brook_types::{DelRange, Uid};

use crate::error::{dupe_check, Result, StoreError};
use crate::models::{json_col, json_text, opt_ts_col, ts_col, DelEvent, ListOpts, Message};
use crate::store::Store;

impl Store {
    /// Persist a new message and record its storage key in `msg.id`.  The
    /// (topic, seq id) pair must be unique.
    pub fn save_message(&mut self, msg: &mut Message) -> Result<()> {
        if msg.seq_id == 0 {
            return Err(StoreError::Malformed("message seq id must be positive"));
        }
        self.conn()
            .execute(
                "INSERT INTO messages(createdat,updatedat,seqid,topic,sender,head,content)
                 VALUES(?1,?2,?3,?4,?5,?6,?7)",
                params![
                    msg.created_at.to_rfc3339(),
                    msg.updated_at.to_rfc3339(),
                    msg.seq_id,
                    msg.topic,
                    msg.from.raw(),
                    json_text(&msg.head),
                    json_text(&msg.content),
                ],
            )
            .map_err(dupe_check)?;
        msg.id = self.conn().last_insert_rowid();
        Ok(())
    }

    /// Load messages of a topic as seen by `for_user`: rows blanked by an
    /// all-users deletion are excluded via `delid`, rows the user deleted for
    /// themselves are excluded by an anti-join against their dellog ranges.
    /// Newest first.
    pub fn get_messages(&self, topic: &str, for_user: Uid, opts: &ListOpts) -> Result<Vec<Message>> {
        let since = opts.since.unwrap_or(1);
        let before = opts.before.unwrap_or(u32::MAX);

        let mut stmt = self.conn().prepare(
            "SELECT m.id,m.createdat,m.updatedat,m.deletedat,m.delid,m.seqid,m.topic,m.sender,
                    m.head,m.content
             FROM messages AS m
             LEFT JOIN dellog AS d
               ON d.topic=m.topic AND m.seqid>=d.low AND m.seqid<d.hi AND d.deletedfor=?4
             WHERE m.delid=0 AND m.topic=?1 AND m.seqid>=?2 AND m.seqid<?3 AND d.id IS NULL
             ORDER BY m.seqid DESC LIMIT ?5",
        )?;
        let rows = stmt.query_map(
            params![topic, since, before, for_user.raw(), self.limit(opts.limit) as i64],
            row_to_message,
        )?;

        let mut msgs = Vec::new();
        for row in rows {
            msgs.push(row?);
        }
        Ok(msgs)
    }

    /// Load deletion events of a topic visible to `for_user`: all-users
    /// events plus the user's own.  Rows sharing a `delid` are folded back
    /// into one event; `since`/`before` bound the event ids.
    pub fn get_del_log(&self, topic: &str, for_user: Uid, opts: &ListOpts) -> Result<Vec<DelEvent>> {
        let since = opts.since.unwrap_or(1);
        let before = opts.before.unwrap_or(u32::MAX);

        let mut stmt = self.conn().prepare(
            "SELECT deletedfor,delid,low,hi FROM dellog
             WHERE topic=?1 AND delid>=?2 AND delid<?3 AND deletedfor IN (0, ?4)
             ORDER BY delid, id LIMIT ?5",
        )?;
        let rows = stmt.query_map(
            params![topic, since, before, for_user.raw(), self.limit(opts.limit) as i64],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, u32>(3)?,
                ))
            },
        )?;

        let mut events: Vec<DelEvent> = Vec::new();
        for row in rows {
            let (deleted_for, del_id, low, hi) = row?;
            let range = DelRange::from_log(low, hi);
            match events.last_mut() {
                Some(last) if last.del_id == del_id => last.ranges.push(range),
                _ => events.push(DelEvent {
                    topic: topic.to_string(),
                    del_id,
                    deleted_for: if deleted_for == 0 {
                        None
                    } else {
                        Some(Uid(deleted_for))
                    },
                    ranges: vec![range],
                }),
            }
        }
        Ok(events)
    }

    /// Record a deletion event, or purge the whole topic history when
    /// `to_del` is `None`.
    pub fn delete_message_list(&mut self, topic: &str, to_del: Option<&DelEvent>) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        message_delete_list(&tx, topic, to_del)?;
        tx.commit()?;
        Ok(())
    }
}

/// Deletion-event write path, shared with topic hard-deletion.
///
/// `None` removes the topic's messages and log outright.  `Some` appends the
/// event's ranges to the log verbatim, one row per range, and when the event
/// applies to all users additionally blanks the covered message rows and
/// unlinks their attachments.
pub(crate) fn message_delete_list(
    tx: &Transaction<'_>,
    topic: &str,
    to_del: Option<&DelEvent>,
) -> Result<()> {
    let Some(event) = to_del else {
        tx.execute("DELETE FROM dellog WHERE topic=?1", params![topic])?;
        tx.execute("DELETE FROM messages WHERE topic=?1", params![topic])?;
        return Ok(());
    };

    if event.del_id == 0 {
        return Err(StoreError::Malformed("deletion event id must be positive"));
    }
    if event.ranges.is_empty() {
        return Ok(());
    }

    let deleted_for = event.deleted_for.map(|u| u.raw()).unwrap_or(0);
    let now = chrono::Utc::now().to_rfc3339();

    let mut insert = tx.prepare(
        "INSERT INTO dellog(topic,deletedfor,delid,low,hi) VALUES(?1,?2,?3,?4,?5)",
    )?;
    for range in &event.ranges {
        let (low, hi) = range.for_write();
        insert.execute(params![topic, deleted_for, event.del_id, low, hi])?;
    }

    if event.deleted_for.is_none() {
        let (range_cond, range_args) = range_condition(&event.ranges, 2);

        // Unlink attachments of the rows about to be blanked.
        let mut args: Vec<Value> = vec![Value::Text(topic.to_string())];
        args.extend(range_args.iter().cloned());
        tx.execute(
            &format!(
                "DELETE FROM filemsglinks WHERE msgid IN
                   (SELECT id FROM messages WHERE topic=?1 AND delid=0 AND ({range_cond}))"
            ),
            params_from_iter(args),
        )?;

        let mut args: Vec<Value> = vec![
            Value::Text(topic.to_string()),
            Value::Text(now.clone()),
            Value::Integer(event.del_id as i64),
        ];
        args.extend(range_args);
        let (range_cond, _) = range_condition(&event.ranges, 4);
        tx.execute(
            &format!(
                "UPDATE messages SET deletedat=?2, delid=?3, head=NULL, content=NULL
                 WHERE topic=?1 AND delid=0 AND ({range_cond})"
            ),
            params_from_iter(args),
        )?;
    }

    tx.execute(
        "UPDATE topics SET delid=MAX(delid,?1) WHERE name=?2",
        params![event.del_id, topic],
    )?;

    Ok(())
}

/// Render an OR-joined seq id condition over the ranges with placeholders
/// starting at `start`.
fn range_condition(ranges: &[DelRange], start: usize) -> (String, Vec<Value>) {
    let mut parts = Vec::new();
    let mut args = Vec::new();
    let mut pos = start;
    for range in ranges {
        let (low, hi) = range.for_write();
        parts.push(format!("(seqid>=?{} AND seqid<?{})", pos, pos + 1));
        args.push(Value::Integer(low as i64));
        args.push(Value::Integer(hi as i64));
        pos += 2;
    }
    (parts.join(" OR "), args)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        created_at: ts_col(row, 1)?,
        updated_at: ts_col(row, 2)?,
        deleted_at: opt_ts_col(row, 3)?,
        del_id: row.get(4)?,
        seq_id: row.get(5)?,
        topic: row.get(6)?,
        from: Uid(row.get(7)?),
        head: json_col(row, 8)?,
        content: json_col(row, 9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{new_message, new_topic, new_user, store};

    fn seed_messages(store: &mut Store, topic: &str, count: u32) {
        store.create_user(&new_user(1, &[])).unwrap();
        store.create_user(&new_user(2, &[])).unwrap();
        store.create_topic(&new_topic(topic, Uid(1))).unwrap();
        for seq in 1..=count {
            let mut msg = new_message(topic, Uid(1), seq);
            store.save_message(&mut msg).unwrap();
            store
                .topic_update_on_message(topic, seq, msg.created_at)
                .unwrap();
        }
    }

    #[test]
    fn duplicate_seq_id_rejected() {
        let mut store = store();
        seed_messages(&mut store, "grpdup", 1);

        let mut msg = new_message("grpdup", Uid(1), 1);
        let err = store.save_message(&mut msg).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate));
    }

    #[test]
    fn delete_for_me_hides_only_from_me() {
        let mut store = store();
        seed_messages(&mut store, "grphide", 5);

        // User 2 deletes seq ids 2 and 3 for themselves.
        let event = DelEvent {
            topic: "grphide".into(),
            del_id: 1,
            deleted_for: Some(Uid(2)),
            ranges: vec![DelRange { low: 2, hi: 4 }],
        };
        store.delete_message_list("grphide", Some(&event)).unwrap();

        let seen: Vec<u32> = store
            .get_messages("grphide", Uid(2), &ListOpts::default())
            .unwrap()
            .iter()
            .map(|m| m.seq_id)
            .collect();
        assert_eq!(seen, vec![5, 4, 1]);

        // User 1 still sees everything.
        let seen: Vec<u32> = store
            .get_messages("grphide", Uid(1), &ListOpts::default())
            .unwrap()
            .iter()
            .map(|m| m.seq_id)
            .collect();
        assert_eq!(seen, vec![5, 4, 3, 2, 1]);
    }

    #[test]
    fn delete_for_everyone_blanks_rows() {
        let mut store = store();
        seed_messages(&mut store, "grpblank", 3);

        let event = DelEvent {
            topic: "grpblank".into(),
            del_id: 1,
            deleted_for: None,
            ranges: vec![DelRange::single(2)],
        };
        store.delete_message_list("grpblank", Some(&event)).unwrap();

        for uid in [Uid(1), Uid(2)] {
            let seen: Vec<u32> = store
                .get_messages("grpblank", uid, &ListOpts::default())
                .unwrap()
                .iter()
                .map(|m| m.seq_id)
                .collect();
            assert_eq!(seen, vec![3, 1]);
        }

        let (delid, content): (u32, Option<String>) = store
            .conn()
            .query_row(
                "SELECT delid,content FROM messages WHERE topic='grpblank' AND seqid=2",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(delid, 1);
        assert!(content.is_none());

        let topic = store.get_topic("grpblank").unwrap().unwrap();
        assert_eq!(topic.del_id, 1);
    }

    #[test]
    fn del_log_folds_rows_into_events() {
        let mut store = store();
        seed_messages(&mut store, "grplog", 9);

        let event = DelEvent {
            topic: "grplog".into(),
            del_id: 1,
            deleted_for: Some(Uid(2)),
            ranges: vec![DelRange::single(1), DelRange { low: 5, hi: 8 }],
        };
        store.delete_message_list("grplog", Some(&event)).unwrap();

        // Another user's private deletion stays invisible to user 2.
        let other = DelEvent {
            topic: "grplog".into(),
            del_id: 2,
            deleted_for: Some(Uid(1)),
            ranges: vec![DelRange::single(9)],
        };
        store.delete_message_list("grplog", Some(&other)).unwrap();

        let log = store
            .get_del_log("grplog", Uid(2), &ListOpts::default())
            .unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].del_id, 1);
        assert_eq!(log[0].deleted_for, Some(Uid(2)));
        assert_eq!(
            log[0].ranges,
            vec![DelRange::single(1), DelRange { low: 5, hi: 8 }]
        );
    }

    #[test]
    fn overlapping_ranges_are_kept_verbatim() {
        let mut store = store();
        seed_messages(&mut store, "grpverbatim", 6);

        let event = DelEvent {
            topic: "grpverbatim".into(),
            del_id: 1,
            deleted_for: Some(Uid(2)),
            ranges: vec![DelRange { low: 1, hi: 4 }, DelRange { low: 3, hi: 6 }],
        };
        store
            .delete_message_list("grpverbatim", Some(&event))
            .unwrap();

        // No merging on write or read: both ranges come back as written.
        let log = store
            .get_del_log("grpverbatim", Uid(2), &ListOpts::default())
            .unwrap();
        assert_eq!(
            log[0].ranges,
            vec![DelRange { low: 1, hi: 4 }, DelRange { low: 3, hi: 6 }]
        );
    }

    #[test]
    fn purge_removes_messages_and_log() {
        let mut store = store();
        seed_messages(&mut store, "grppurge", 3);
        let event = DelEvent {
            topic: "grppurge".into(),
            del_id: 1,
            deleted_for: Some(Uid(1)),
            ranges: vec![DelRange::single(1)],
        };
        store.delete_message_list("grppurge", Some(&event)).unwrap();

        store.delete_message_list("grppurge", None).unwrap();

        let msgs: i64 = store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM messages WHERE topic='grppurge'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        let log: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM dellog WHERE topic='grppurge'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!((msgs, log), (0, 0));

        // The topic itself survives a history purge.
        assert!(store.get_topic("grppurge").unwrap().is_some());
    }
}
