//! Topic operations: creation (group and P2P), contact and member listings,
//! tag search and the monotonic sequence counters.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension};

use brook_types::{p2p_topic_name, TopicCat, Uid};

use crate::error::{dupe_check, Result, StoreError};
use crate::messages::message_delete_list;
use crate::models::{
    access_col, access_text, json_col, json_text, opt_text_value, opt_ts_col, tags_col, tags_text,
    ts_col, ts_value, DeleteMode, FoundEntity, ListOpts, SetBuilder, Subscription, Topic,
    Visibility,
};
use crate::store::Store;
use crate::subscriptions::{create_subscription, row_to_sub};
use crate::tags::{add_tags, clear_tags, placeholders, TagOwner};

/// Partial update of a topic row.
#[derive(Debug, Clone, Default)]
pub struct TopicUpdate {
    pub updated_at: Option<DateTime<Utc>>,
    pub touched_at: Option<DateTime<Utc>>,
    pub access: Option<crate::models::DefaultAccess>,
    pub public: Option<Option<serde_json::Value>>,
    /// Resets the tag index alongside the inline column.
    pub tags: Option<Vec<String>>,
}

impl Store {
    /// Insert a new topic together with its tag-index rows.
    pub fn create_topic(&mut self, topic: &Topic) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        topic_create(&tx, topic)?;
        tx.commit()?;
        Ok(())
    }

    /// Create a P2P topic: both subscriptions plus the topic row, one
    /// transaction.  The invited side may hold a soft-deleted subscription
    /// from an earlier conversation; it is revived rather than duplicated.
    pub fn create_p2p_topic(
        &mut self,
        initiator: &Subscription,
        invited: &Subscription,
    ) -> Result<()> {
        if initiator.topic != invited.topic {
            return Err(StoreError::Malformed("mismatched p2p topic names"));
        }

        let tx = self.conn_mut().transaction()?;

        create_subscription(&tx, initiator, false)?;
        create_subscription(&tx, invited, true)?;

        let topic = Topic {
            name: initiator.topic.clone(),
            created_at: initiator.created_at,
            updated_at: initiator.updated_at,
            deleted_at: None,
            touched_at: initiator.touched_at.or(Some(initiator.updated_at)),
            owner: Uid::ZERO,
            access: Default::default(),
            seq_id: 0,
            del_id: 0,
            public: None,
            tags: Vec::new(),
        };
        topic_create(&tx, &topic)?;

        tx.commit()?;
        Ok(())
    }

    /// Fetch a topic by name, soft-deleted or not; absence reads as `None`.
    pub fn get_topic(&self, name: &str) -> Result<Option<Topic>> {
        self.conn()
            .query_row(
                "SELECT createdat,updatedat,deletedat,touchedat,name,owner,access,seqid,delid,public,tags
                 FROM topics WHERE name=?1",
                params![name],
                row_to_topic,
            )
            .optional()
            .map_err(StoreError::from)
    }

    /// Load the user's contact list: p2p and grp subscriptions enriched with
    /// topic state.  'me' and 'fnd' subscriptions are skipped.  P2P entries
    /// have no public profile of their own; they borrow the counterpart
    /// user's profile and default access.
    pub fn topics_for_user(
        &self,
        uid: Uid,
        vis: Visibility,
        opts: &ListOpts,
    ) -> Result<Vec<Subscription>> {
        let mut query = String::from(
            "SELECT createdat,updatedat,deletedat,userid,topic,delid,recvseqid,readseqid,
                    modewant,modegiven,private,lastseen,useragent
             FROM subscriptions WHERE userid=?1",
        );
        let mut args: Vec<Value> = vec![Value::Integer(uid.raw())];
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

        // Split into topic-joined and user-joined halves: grp entries take
        // state from the topics table, p2p entries additionally borrow the
        // counterpart's user record.
        let mut join: HashMap<String, Subscription> = HashMap::new();
        let mut topic_names: Vec<String> = Vec::new();
        let mut peer_uids: Vec<Uid> = Vec::new();
        for row in rows {
            let sub = row?;
            match TopicCat::of(&sub.topic) {
                TopicCat::Me | TopicCat::Fnd => continue,
                TopicCat::P2P => {
                    let Some(peer) = uid.p2p_peer(&sub.topic) else {
                        continue;
                    };
                    peer_uids.push(peer);
                    topic_names.push(sub.topic.clone());
                }
                TopicCat::Grp => {
                    topic_names.push(sub.topic.clone());
                }
            }
            join.insert(sub.topic.clone(), sub);
        }

        let mut subs: Vec<Subscription> = Vec::new();

        if !topic_names.is_empty() {
            let mut stmt = self.conn().prepare(&format!(
                "SELECT createdat,updatedat,deletedat,touchedat,name,owner,access,seqid,delid,public,tags
                 FROM topics WHERE name IN ({})",
                placeholders(topic_names.len(), 1)
            ))?;
            let rows = stmt.query_map(
                params_from_iter(topic_names.iter().map(|n| Value::Text(n.clone()))),
                row_to_topic,
            )?;

            for row in rows {
                let top = row?;
                let Some(sub) = join.get_mut(&top.name) else {
                    continue;
                };
                if top.updated_at > sub.updated_at {
                    sub.updated_at = top.updated_at;
                }
                sub.touched_at = top.touched_at;
                sub.seq_id = top.seq_id;
                if TopicCat::of(&top.name) == TopicCat::Grp {
                    sub.public = top.public.clone();
                    subs.push(sub.clone());
                }
            }
        }

        if !peer_uids.is_empty() {
            let mut stmt = self.conn().prepare(&format!(
                "SELECT id,createdat,updatedat,deletedat,state,access,lastseen,useragent,public,tags
                 FROM users WHERE id IN ({})",
                placeholders(peer_uids.len(), 1)
            ))?;
            let rows = stmt.query_map(
                params_from_iter(peer_uids.iter().map(|u| u.raw())),
                |row| {
                    Ok((
                        Uid(row.get::<_, i64>(0)?),
                        opt_ts_col(row, 3)?,
                        access_col(row, 5)?,
                        opt_ts_col(row, 6)?,
                        row.get::<_, String>(7)?,
                        json_col(row, 8)?,
                    ))
                },
            )?;

            for row in rows {
                let (peer, deleted_at, access, last_seen, user_agent, public) = row?;
                if deleted_at.is_some() && !vis.keep_deleted() {
                    continue;
                }
                let name = p2p_topic_name(uid, peer);
                if let Some(sub) = join.get_mut(&name) {
                    sub.public = public;
                    sub.with_user = Some(peer);
                    sub.default_access = Some(access);
                    sub.last_seen = last_seen;
                    sub.user_agent = Some(user_agent);
                    subs.push(sub.clone());
                }
            }
        }

        Ok(subs)
    }

    /// Load the subscribers of a topic with their public profiles.  For a P2P
    /// topic the two members' profiles are swapped pairwise; if only one
    /// member remains resolvable the profile is cleared rather than guessed.
    pub fn users_for_topic(
        &self,
        topic: &str,
        vis: Visibility,
        opts: &ListOpts,
    ) -> Result<Vec<Subscription>> {
        let tcat = TopicCat::of(topic);

        let mut query = String::from(
            "SELECT s.createdat,s.updatedat,s.deletedat,s.userid,s.topic,s.delid,s.recvseqid,
                    s.readseqid,s.modewant,s.modegiven,s.private,s.lastseen,s.useragent,u.public
             FROM subscriptions AS s JOIN users AS u ON s.userid=u.id
             WHERE s.topic=?1",
        );
        let mut args: Vec<Value> = vec![Value::Text(topic.to_string())];

        if !vis.keep_deleted() {
            query.push_str(" AND u.deletedat IS NULL");
            // For p2p topics all subscriptions must load, deleted included,
            // otherwise the profiles cannot be swapped.
            if tcat != TopicCat::P2P {
                query.push_str(" AND s.deletedat IS NULL");
            }
        }

        let one_user = opts.user.filter(|u| !u.is_zero());
        if let Some(user) = one_user {
            // Same reason: both p2p members are needed for the swap.
            if tcat != TopicCat::P2P {
                args.push(Value::Integer(user.raw()));
                query.push_str(&format!(" AND s.userid=?{}", args.len()));
            }
        }
        args.push(Value::Integer(self.limit(opts.limit) as i64));
        query.push_str(&format!(" LIMIT ?{}", args.len()));

        let mut stmt = self.conn().prepare(&query)?;
        let rows = stmt.query_map(params_from_iter(args), |row| {
            let mut sub = row_to_sub(row)?;
            sub.public = json_col(row, 13)?;
            Ok(sub)
        })?;

        let mut subs = Vec::new();
        for row in rows {
            subs.push(row?);
        }

        if tcat == TopicCat::P2P && !subs.is_empty() {
            if subs.len() == 1 {
                // The other member is gone; nothing to borrow.
                subs[0].public = None;
            } else {
                let pub0 = subs[0].public.take();
                subs[0].public = subs[1].public.take();
                subs[1].public = pub0;
            }

            // Drop deleted and unrequested rows only after the swap.
            if !vis.keep_deleted() || one_user.is_some() {
                subs.retain(|s| {
                    if s.deleted_at.is_some() && !vis.keep_deleted() {
                        return false;
                    }
                    match one_user {
                        Some(user) => s.user == user,
                        None => true,
                    }
                });
            }
        }

        Ok(subs)
    }

    /// Names of topics owned by the user.
    pub fn own_topics(&self, uid: Uid) -> Result<Vec<String>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT name FROM topics WHERE owner=?1")?;
        let rows = stmt.query_map(params![uid.raw()], |row| row.get::<_, String>(0))?;

        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    /// Subscribe a batch of users to a topic, reviving soft-deleted
    /// subscriptions.  Returns the number of subscriptions processed.
    pub fn share_topic(&mut self, shares: &[Subscription]) -> Result<usize> {
        let tx = self.conn_mut().transaction()?;
        for sub in shares {
            create_subscription(&tx, sub, true)?;
        }
        tx.commit()?;
        Ok(shares.len())
    }

    /// Delete a topic: soft-delete disables it and its subscriptions;
    /// hard-delete removes subscriptions, messages, the deletion log, tag
    /// rows and the topic itself.
    pub fn delete_topic(&mut self, name: &str, mode: DeleteMode) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        match mode {
            DeleteMode::Hard => {
                tracing::info!(topic = name, "hard-deleting topic");
                tx.execute("DELETE FROM subscriptions WHERE topic=?1", params![name])?;
                message_delete_list(&tx, name, None)?;
                tx.execute("DELETE FROM topictags WHERE topic=?1", params![name])?;
                tx.execute("DELETE FROM topics WHERE name=?1", params![name])?;
            }
            DeleteMode::Soft => {
                let now = Utc::now().to_rfc3339();
                tx.execute(
                    "UPDATE subscriptions SET updatedat=?1,deletedat=?1 WHERE topic=?2",
                    params![now, name],
                )?;
                tx.execute(
                    "UPDATE topics SET updatedat=?1,deletedat=?1 WHERE name=?2",
                    params![now, name],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Advance the topic's message counter after a message was saved.  The
    /// MAX keeps the counter monotonic under concurrent writers; the update
    /// happens engine-side, never read-modify-write.
    pub fn topic_update_on_message(
        &self,
        name: &str,
        seq_id: u32,
        touched_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE topics SET seqid=MAX(seqid,?1), touchedat=?2 WHERE name=?3",
            params![seq_id, touched_at.to_rfc3339(), name],
        )?;
        Ok(())
    }

    /// Apply a partial update; resets the tag index when tags are present.
    pub fn update_topic(&mut self, name: &str, update: &TopicUpdate) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        let mut set = SetBuilder::new();
        if let Some(ts) = &update.updated_at {
            set.push("updatedat", ts_value(ts));
        }
        if let Some(ts) = &update.touched_at {
            set.push("touchedat", ts_value(ts));
        }
        if let Some(access) = &update.access {
            set.push("access", opt_text_value(access_text(access)));
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
            args.push(Value::Text(name.to_string()));
            tx.execute(
                &format!("UPDATE topics SET {clause} WHERE name=?{key_pos}"),
                params_from_iter(args),
            )?;
        }

        if let Some(tags) = &update.tags {
            let owner = TagOwner::Topic(name);
            clear_tags(&tx, &owner)?;
            add_tags(&tx, &owner, tags, false)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Transfer topic ownership.
    pub fn topic_owner_change(&self, name: &str, new_owner: Uid) -> Result<()> {
        self.conn().execute(
            "UPDATE topics SET owner=?1 WHERE name=?2",
            params![new_owner.raw(), name],
        )?;
        Ok(())
    }

    /// Find topics matching the given tags, ranked by match count descending.
    pub fn find_topics(&self, required: &[String], optional: &[String]) -> Result<Vec<FoundEntity>> {
        let queried: Vec<&String> = required.iter().chain(optional.iter()).collect();
        if queried.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = format!(
            "SELECT t.name,t.createdat,t.updatedat,t.access,t.public,t.tags,COUNT(*) AS matches
             FROM topics AS t JOIN topictags AS tt ON tt.topic=t.name
             WHERE tt.tag IN ({}) AND t.deletedat IS NULL
             GROUP BY t.name,t.createdat,t.updatedat,t.access,t.public,t.tags",
            placeholders(queried.len(), 1)
        );
        let mut args: Vec<Value> = queried
            .iter()
            .map(|t| Value::Text((*t).clone()))
            .collect();

        if !required.is_empty() {
            let start = args.len() + 1;
            query.push_str(&format!(
                " HAVING SUM(CASE WHEN tt.tag IN ({}) THEN 1 ELSE 0 END)>=?{}",
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
            Ok(FoundEntity {
                id: row.get(0)?,
                created_at: ts_col(row, 1)?,
                updated_at: ts_col(row, 2)?,
                access: access_col(row, 3)?,
                public: json_col(row, 4)?,
                matched_tags: tags_col(row, 5)?,
            })
        })?;

        let mut found = Vec::new();
        for row in rows {
            let mut entity = row?;
            entity
                .matched_tags
                .retain(|t| queried.iter().any(|q| *q == t));
            found.push(entity);
        }
        Ok(found)
    }
}

/// Insert the topic row and its tag-index rows inside the caller's
/// transaction.
fn topic_create(tx: &rusqlite::Transaction<'_>, topic: &Topic) -> Result<()> {
    tx.execute(
        "INSERT INTO topics(createdat,updatedat,touchedat,name,owner,access,public,tags)
         VALUES(?1,?2,?3,?4,?5,?6,?7,?8)",
        params![
            topic.created_at.to_rfc3339(),
            topic.updated_at.to_rfc3339(),
            topic.touched_at.map(|ts| ts.to_rfc3339()),
            topic.name,
            topic.owner.raw(),
            access_text(&topic.access),
            json_text(&topic.public),
            tags_text(&topic.tags),
        ],
    )
    .map_err(dupe_check)?;

    add_tags(tx, &TagOwner::Topic(&topic.name), &topic.tags, false)
}

/// Map a row to a [`Topic`].  Column order:
/// createdat,updatedat,deletedat,touchedat,name,owner,access,seqid,delid,public,tags.
fn row_to_topic(row: &rusqlite::Row<'_>) -> rusqlite::Result<Topic> {
    Ok(Topic {
        created_at: ts_col(row, 0)?,
        updated_at: ts_col(row, 1)?,
        deleted_at: opt_ts_col(row, 2)?,
        touched_at: opt_ts_col(row, 3)?,
        name: row.get(4)?,
        owner: Uid(row.get(5)?),
        access: access_col(row, 6)?,
        seq_id: row.get(7)?,
        del_id: row.get(8)?,
        public: json_col(row, 9)?,
        tags: tags_col(row, 10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{new_p2p_sub, new_sub, new_topic, new_user, store};
    use serde_json::json;

    #[test]
    fn create_and_get_topic() {
        let mut store = store();
        store.create_user(&new_user(1, &[])).unwrap();
        store.create_topic(&new_topic("grpgeneral", Uid(1))).unwrap();

        let topic = store.get_topic("grpgeneral").unwrap().unwrap();
        assert_eq!(topic.owner, Uid(1));
        assert_eq!(topic.seq_id, 0);
        assert!(store.get_topic("nosuch").unwrap().is_none());
    }

    #[test]
    fn seq_id_only_increases() {
        let mut store = store();
        store.create_user(&new_user(1, &[])).unwrap();
        store.create_topic(&new_topic("grpseq", Uid(1))).unwrap();

        store
            .topic_update_on_message("grpseq", 5, Utc::now())
            .unwrap();
        // A stale writer cannot move the counter backwards.
        store
            .topic_update_on_message("grpseq", 3, Utc::now())
            .unwrap();

        let topic = store.get_topic("grpseq").unwrap().unwrap();
        assert_eq!(topic.seq_id, 5);
    }

    #[test]
    fn p2p_contact_list_borrows_peer_profile() {
        let mut store = store();
        let alice = Uid(1);
        let bob = Uid(2);
        let mut user_b = new_user(2, &[]);
        user_b.public = Some(json!({"fn": "Bob"}));
        store.create_user(&new_user(1, &[])).unwrap();
        store.create_user(&user_b).unwrap();

        let name = p2p_topic_name(alice, bob);
        store
            .create_p2p_topic(&new_p2p_sub(alice, &name), &new_p2p_sub(bob, &name))
            .unwrap();

        let contacts = store
            .topics_for_user(alice, Visibility::ActiveOnly, &ListOpts::default())
            .unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].topic, name);
        assert_eq!(contacts[0].with_user, Some(bob));
        assert_eq!(contacts[0].public, Some(json!({"fn": "Bob"})));
    }

    #[test]
    fn me_and_fnd_subscriptions_are_skipped() {
        let mut store = store();
        store.create_user(&new_user(1, &[])).unwrap();
        store.create_topic(&new_topic("me", Uid(1))).unwrap();
        store.create_topic(&new_topic("grpvisible", Uid(1))).unwrap();
        {
            let tx = store.conn_mut().transaction().unwrap();
            create_subscription(&tx, &new_sub(Uid(1), "me"), false).unwrap();
            create_subscription(&tx, &new_sub(Uid(1), "grpvisible"), false).unwrap();
            tx.commit().unwrap();
        }

        let contacts = store
            .topics_for_user(Uid(1), Visibility::ActiveOnly, &ListOpts::default())
            .unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].topic, "grpvisible");
    }

    #[test]
    fn p2p_member_profiles_are_swapped() {
        let mut store = store();
        let alice = Uid(1);
        let bob = Uid(2);
        let mut user_a = new_user(1, &[]);
        user_a.public = Some(json!({"fn": "Alice"}));
        let mut user_b = new_user(2, &[]);
        user_b.public = Some(json!({"fn": "Bob"}));
        store.create_user(&user_a).unwrap();
        store.create_user(&user_b).unwrap();

        let name = p2p_topic_name(alice, bob);
        store
            .create_p2p_topic(&new_p2p_sub(alice, &name), &new_p2p_sub(bob, &name))
            .unwrap();

        let members = store
            .users_for_topic(&name, Visibility::ActiveOnly, &ListOpts::default())
            .unwrap();
        assert_eq!(members.len(), 2);
        for member in &members {
            let expected = if member.user == alice {
                json!({"fn": "Bob"})
            } else {
                json!({"fn": "Alice"})
            };
            assert_eq!(member.public, Some(expected));
        }
    }

    #[test]
    fn lone_p2p_member_gets_cleared_profile() {
        let mut store = store();
        let alice = Uid(1);
        let bob = Uid(2);
        let mut user_a = new_user(1, &[]);
        user_a.public = Some(json!({"fn": "Alice"}));
        store.create_user(&user_a).unwrap();
        store.create_user(&new_user(2, &[])).unwrap();

        let name = p2p_topic_name(alice, bob);
        store
            .create_p2p_topic(&new_p2p_sub(alice, &name), &new_p2p_sub(bob, &name))
            .unwrap();
        store.delete_user(bob, DeleteMode::Hard).unwrap();

        let members = store
            .users_for_topic(&name, Visibility::ActiveOnly, &ListOpts::default())
            .unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user, alice);
        assert_eq!(members[0].public, None);
    }

    #[test]
    fn hard_topic_delete_removes_everything() {
        let mut store = store();
        store.create_user(&new_user(1, &[])).unwrap();
        let mut topic = new_topic("grpgone", Uid(1));
        topic.tags = vec!["findme".into()];
        store.create_topic(&topic).unwrap();
        {
            let tx = store.conn_mut().transaction().unwrap();
            create_subscription(&tx, &new_sub(Uid(1), "grpgone"), false).unwrap();
            tx.commit().unwrap();
        }

        store.delete_topic("grpgone", DeleteMode::Hard).unwrap();

        assert!(store.get_topic("grpgone").unwrap().is_none());
        let subs: i64 = store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM subscriptions WHERE topic='grpgone'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(subs, 0);
        let tags: i64 = store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM topictags WHERE topic='grpgone'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(tags, 0);
    }

    #[test]
    fn find_topics_ranked_by_matches() {
        let mut store = store();
        store.create_user(&new_user(1, &[])).unwrap();
        let mut t1 = new_topic("grpboth", Uid(1));
        t1.tags = vec!["rust".into(), "chess".into()];
        let mut t2 = new_topic("grpone", Uid(1));
        t2.tags = vec!["rust".into()];
        store.create_topic(&t1).unwrap();
        store.create_topic(&t2).unwrap();

        let found = store
            .find_topics(&["rust".into()], &["chess".into()])
            .unwrap();
        let ids: Vec<&str> = found.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["grpboth", "grpone"]);
    }
}
