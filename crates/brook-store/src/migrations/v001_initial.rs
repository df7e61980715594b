//! v001 -- Initial schema creation.
//!
//! Creates the core tables: `users`, `usertags`, `topics`, `topictags`,
//! `subscriptions`, `messages`, `dellog`, `credentials`, `devices`,
//! `fileuploads` and `filemsglinks`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id        INTEGER PRIMARY KEY NOT NULL,  -- decoded numeric uid
    createdat TEXT NOT NULL,                 -- ISO-8601 / RFC-3339
    updatedat TEXT NOT NULL,
    deletedat TEXT,
    state     INTEGER NOT NULL DEFAULT 0,
    access    TEXT,                          -- JSON default access modes
    lastseen  TEXT,
    useragent TEXT NOT NULL DEFAULT '',
    public    TEXT,                          -- JSON public profile
    tags      TEXT                           -- JSON array, denormalized copy
);

CREATE INDEX IF NOT EXISTS idx_users_deletedat ON users(deletedat);

-- Indexed user tags, normalized into a separate table for search.
CREATE TABLE IF NOT EXISTS usertags (
    id     INTEGER PRIMARY KEY AUTOINCREMENT,
    userid INTEGER NOT NULL,
    tag    TEXT NOT NULL,

    FOREIGN KEY (userid) REFERENCES users(id),
    UNIQUE (userid, tag)
);

CREATE INDEX IF NOT EXISTS idx_usertags_tag ON usertags(tag);

-- ----------------------------------------------------------------
-- Topics
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS topics (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    createdat TEXT NOT NULL,
    updatedat TEXT NOT NULL,
    deletedat TEXT,
    touchedat TEXT,
    name      TEXT NOT NULL UNIQUE,
    owner     INTEGER NOT NULL DEFAULT 0,
    access    TEXT,
    seqid     INTEGER NOT NULL DEFAULT 0,    -- highest issued message seq id
    delid     INTEGER NOT NULL DEFAULT 0,    -- highest deletion-log event id
    public    TEXT,
    tags      TEXT
);

CREATE INDEX IF NOT EXISTS idx_topics_owner ON topics(owner);

-- Indexed topic tags.
CREATE TABLE IF NOT EXISTS topictags (
    id    INTEGER PRIMARY KEY AUTOINCREMENT,
    topic TEXT NOT NULL,
    tag   TEXT NOT NULL,

    FOREIGN KEY (topic) REFERENCES topics(name),
    UNIQUE (topic, tag)
);

CREATE INDEX IF NOT EXISTS idx_topictags_tag ON topictags(tag);

-- ----------------------------------------------------------------
-- Subscriptions
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS subscriptions (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    createdat TEXT NOT NULL,
    updatedat TEXT NOT NULL,
    deletedat TEXT,
    userid    INTEGER NOT NULL,
    topic     TEXT NOT NULL,
    delid     INTEGER NOT NULL DEFAULT 0,
    recvseqid INTEGER NOT NULL DEFAULT 0,
    readseqid INTEGER NOT NULL DEFAULT 0,
    modewant  TEXT,
    modegiven TEXT,
    private   TEXT,
    lastseen  TEXT,                          -- last presence in this topic
    useragent TEXT,

    FOREIGN KEY (userid) REFERENCES users(id),
    UNIQUE (topic, userid)
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_topic ON subscriptions(topic);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    createdat TEXT NOT NULL,
    updatedat TEXT NOT NULL,
    deletedat TEXT,
    delid     INTEGER NOT NULL DEFAULT 0,
    seqid     INTEGER NOT NULL,
    topic     TEXT NOT NULL,
    sender    INTEGER NOT NULL,
    head      TEXT,
    content   TEXT,

    FOREIGN KEY (topic) REFERENCES topics(name),
    UNIQUE (topic, seqid)
);

-- Log of deleted message ranges, global (deletedfor = 0) or per user.
CREATE TABLE IF NOT EXISTS dellog (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    topic      TEXT NOT NULL,
    deletedfor INTEGER NOT NULL DEFAULT 0,
    delid      INTEGER NOT NULL,
    low        INTEGER NOT NULL,
    hi         INTEGER NOT NULL,

    FOREIGN KEY (topic) REFERENCES topics(name)
);

CREATE INDEX IF NOT EXISTS idx_dellog_topic_delid ON dellog(topic, delid, deletedfor);
CREATE INDEX IF NOT EXISTS idx_dellog_topic_range ON dellog(topic, deletedfor, low, hi);
CREATE INDEX IF NOT EXISTS idx_dellog_deletedfor ON dellog(deletedfor);

-- ----------------------------------------------------------------
-- Credentials
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS credentials (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    createdat TEXT NOT NULL,
    updatedat TEXT NOT NULL,
    deletedat TEXT,
    method    TEXT NOT NULL,
    value     TEXT NOT NULL,
    synthetic TEXT NOT NULL UNIQUE,          -- method:value once confirmed,
                                             -- user:method:value before
    userid    INTEGER NOT NULL,
    resp      TEXT,
    done      INTEGER NOT NULL DEFAULT 0,    -- boolean 0/1
    retries   INTEGER NOT NULL DEFAULT 0,

    FOREIGN KEY (userid) REFERENCES users(id)
);

-- ----------------------------------------------------------------
-- Devices (push-notification registrations)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS devices (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    userid   INTEGER NOT NULL,
    hash     TEXT NOT NULL UNIQUE,           -- fixed-length hash of deviceid
    deviceid TEXT NOT NULL,
    platform TEXT,
    lastseen TEXT NOT NULL,
    lang     TEXT,

    FOREIGN KEY (userid) REFERENCES users(id)
);

-- ----------------------------------------------------------------
-- File uploads
-- ----------------------------------------------------------------
-- No FOREIGN KEY on userid: uploads outlive user deletion.
CREATE TABLE IF NOT EXISTS fileuploads (
    id        INTEGER PRIMARY KEY NOT NULL,
    createdat TEXT NOT NULL,
    updatedat TEXT NOT NULL,
    userid    INTEGER NOT NULL,
    status    INTEGER NOT NULL,
    mimetype  TEXT NOT NULL,
    size      INTEGER NOT NULL,
    location  TEXT NOT NULL
);

-- Links between uploads and the messages they are attached to.
CREATE TABLE IF NOT EXISTS filemsglinks (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    createdat TEXT NOT NULL,
    fileid    INTEGER NOT NULL,
    msgid     INTEGER NOT NULL,

    FOREIGN KEY (fileid) REFERENCES fileuploads(id) ON DELETE CASCADE,
    FOREIGN KEY (msgid) REFERENCES messages(id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
