//! Auxiliary tag index.
//!
//! Tags live in a separate per-entity table (`usertags`, `topictags`) so they
//! can be searched independently of the denormalized JSON tag column on the
//! owning row.  All writes here run inside the owning entity's transaction:
//! the index and the inline attribute must never diverge.

use rusqlite::types::Value;
use rusqlite::Transaction;

use brook_types::Uid;

use crate::error::{is_unique_violation, Result, StoreError};

/// Statically known (table, key column) pair for a tag owner.  Replaces
/// stringly-typed table dispatch with an explicit descriptor.
#[derive(Debug, Clone)]
pub(crate) enum TagOwner<'a> {
    User(Uid),
    Topic(&'a str),
}

impl TagOwner<'_> {
    fn table(&self) -> &'static str {
        match self {
            TagOwner::User(_) => "usertags",
            TagOwner::Topic(_) => "topictags",
        }
    }

    fn key_col(&self) -> &'static str {
        match self {
            TagOwner::User(_) => "userid",
            TagOwner::Topic(_) => "topic",
        }
    }

    fn key(&self) -> Value {
        match self {
            TagOwner::User(uid) => Value::Integer(uid.raw()),
            TagOwner::Topic(name) => Value::Text((*name).to_string()),
        }
    }
}

/// Insert one row per tag.  On a uniqueness violation: skip the tag when
/// `ignore_dups` is set (used when resetting), otherwise report
/// [`StoreError::Duplicate`].  An empty tag list is a no-op.
pub(crate) fn add_tags(
    tx: &Transaction<'_>,
    owner: &TagOwner<'_>,
    tags: &[String],
    ignore_dups: bool,
) -> Result<()> {
    if tags.is_empty() {
        return Ok(());
    }

    let mut insert = tx.prepare(&format!(
        "INSERT INTO {}({},tag) VALUES(?1, ?2)",
        owner.table(),
        owner.key_col()
    ))?;

    for tag in tags {
        if let Err(err) = insert.execute((owner.key(), tag)) {
            if is_unique_violation(&err) {
                if ignore_dups {
                    continue;
                }
                return Err(StoreError::Duplicate);
            }
            return Err(err.into());
        }
    }

    Ok(())
}

/// Delete only the named tags.  An empty list is a no-op.
pub(crate) fn remove_tags(
    tx: &Transaction<'_>,
    owner: &TagOwner<'_>,
    tags: &[String],
) -> Result<()> {
    if tags.is_empty() {
        return Ok(());
    }

    let placeholders = (0..tags.len())
        .map(|i| format!("?{}", i + 2))
        .collect::<Vec<_>>()
        .join(",");
    let mut stmt = tx.prepare(&format!(
        "DELETE FROM {} WHERE {}=?1 AND tag IN ({})",
        owner.table(),
        owner.key_col(),
        placeholders
    ))?;

    let mut args: Vec<Value> = vec![owner.key()];
    args.extend(tags.iter().map(|t| Value::Text(t.clone())));
    stmt.execute(rusqlite::params_from_iter(args))?;

    Ok(())
}

/// Delete every tag of the owner; the first half of a reset.
pub(crate) fn clear_tags(tx: &Transaction<'_>, owner: &TagOwner<'_>) -> Result<()> {
    tx.execute(
        &format!("DELETE FROM {} WHERE {}=?1", owner.table(), owner.key_col()),
        [owner.key()],
    )?;
    Ok(())
}

/// Read back the owner's full tag set.
pub(crate) fn all_tags(tx: &Transaction<'_>, owner: &TagOwner<'_>) -> Result<Vec<String>> {
    let mut stmt = tx.prepare(&format!(
        "SELECT tag FROM {} WHERE {}=?1",
        owner.table(),
        owner.key_col()
    ))?;
    let rows = stmt.query_map([owner.key()], |row| row.get::<_, String>(0))?;

    let mut tags = Vec::new();
    for row in rows {
        tags.push(row?);
    }
    Ok(tags)
}

/// Render `?N,?N+1,…` for an IN list of `n` values starting at `start`.
pub(crate) fn placeholders(n: usize, start: usize) -> String {
    (0..n)
        .map(|i| format!("?{}", start + i))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use brook_types::Uid;
    use chrono::Utc;

    fn store_with_user(uid: Uid) -> Store {
        let mut store = Store::open_in_memory().unwrap();
        let now = Utc::now().to_rfc3339();
        store
            .conn()
            .execute(
                "INSERT INTO users(id,createdat,updatedat) VALUES(?1,?2,?2)",
                rusqlite::params![uid.raw(), now],
            )
            .unwrap();
        store
    }

    #[test]
    fn duplicate_tag_reported_unless_resetting() {
        let uid = Uid(1);
        let mut store = store_with_user(uid);
        let tx = store.conn_mut().transaction().unwrap();
        let owner = TagOwner::User(uid);

        add_tags(&tx, &owner, &["alpha".into()], false).unwrap();
        let err = add_tags(&tx, &owner, &["alpha".into()], false).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate));

        // Same insert with ignore_dups silently skips.
        add_tags(&tx, &owner, &["alpha".into(), "beta".into()], true).unwrap();
        let mut tags = all_tags(&tx, &owner).unwrap();
        tags.sort();
        assert_eq!(tags, vec!["alpha", "beta"]);
    }

    #[test]
    fn remove_only_named_tags() {
        let uid = Uid(2);
        let mut store = store_with_user(uid);
        let tx = store.conn_mut().transaction().unwrap();
        let owner = TagOwner::User(uid);

        add_tags(&tx, &owner, &["a".into(), "b".into(), "c".into()], false).unwrap();
        remove_tags(&tx, &owner, &["b".into()]).unwrap();

        let mut tags = all_tags(&tx, &owner).unwrap();
        tags.sort();
        assert_eq!(tags, vec!["a", "c"]);
    }

    #[test]
    fn empty_lists_are_no_ops() {
        let uid = Uid(3);
        let mut store = store_with_user(uid);
        let tx = store.conn_mut().transaction().unwrap();
        let owner = TagOwner::User(uid);

        add_tags(&tx, &owner, &[], false).unwrap();
        remove_tags(&tx, &owner, &[]).unwrap();
        assert!(all_tags(&tx, &owner).unwrap().is_empty());
    }
}
