//! Shared builders for unit tests.

use chrono::Utc;

use brook_types::{AccessMode, Uid};

use crate::models::{
    Credential, Device, FileUpload, Message, Subscription, Topic, User, UPLOAD_STARTED,
};
use crate::Store;

pub(crate) fn store() -> Store {
    Store::open_in_memory().unwrap()
}

pub(crate) fn new_user(id: i64, tags: &[&str]) -> User {
    let now = Utc::now();
    User {
        uid: Uid(id),
        created_at: now,
        updated_at: now,
        deleted_at: None,
        state: 0,
        access: Default::default(),
        last_seen: None,
        user_agent: String::new(),
        public: None,
        tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

pub(crate) fn new_topic(name: &str, owner: Uid) -> Topic {
    let now = Utc::now();
    Topic {
        name: name.to_string(),
        created_at: now,
        updated_at: now,
        deleted_at: None,
        touched_at: Some(now),
        owner,
        access: Default::default(),
        seq_id: 0,
        del_id: 0,
        public: None,
        tags: Vec::new(),
    }
}

pub(crate) fn new_sub(user: Uid, topic: &str) -> Subscription {
    let now = Utc::now();
    Subscription {
        created_at: now,
        updated_at: now,
        deleted_at: None,
        user,
        topic: topic.to_string(),
        del_id: 0,
        recv_seq_id: 0,
        read_seq_id: 0,
        mode_want: AccessMode::parse("JRWPS"),
        mode_given: AccessMode::parse("JRWPS"),
        private: None,
        public: None,
        seq_id: 0,
        touched_at: None,
        with_user: None,
        default_access: None,
        last_seen: None,
        user_agent: None,
    }
}

pub(crate) fn new_p2p_sub(user: Uid, topic: &str) -> Subscription {
    let mut sub = new_sub(user, topic);
    sub.mode_want = AccessMode::parse("JRWPA");
    sub.mode_given = AccessMode::parse("JRWPA");
    sub
}

pub(crate) fn new_message(topic: &str, from: Uid, seq: u32) -> Message {
    let now = Utc::now();
    Message {
        id: 0,
        created_at: now,
        updated_at: now,
        deleted_at: None,
        del_id: 0,
        seq_id: seq,
        topic: topic.to_string(),
        from,
        head: None,
        content: Some(serde_json::json!({"txt": format!("message {seq}")})),
    }
}

pub(crate) fn new_credential(user: Uid, method: &str, value: &str) -> Credential {
    let now = Utc::now();
    Credential {
        user,
        created_at: now,
        updated_at: now,
        deleted_at: None,
        method: method.to_string(),
        value: value.to_string(),
        resp: Some("123456".to_string()),
        done: false,
        retries: 0,
    }
}

pub(crate) fn new_device(device_id: &str) -> Device {
    Device {
        device_id: device_id.to_string(),
        platform: Some("android".to_string()),
        last_seen: Utc::now(),
        lang: Some("en".to_string()),
    }
}

pub(crate) fn new_upload(id: Uid, user: Uid) -> FileUpload {
    let now = Utc::now();
    FileUpload {
        id,
        created_at: now,
        updated_at: now,
        user,
        status: UPLOAD_STARTED,
        mime_type: "image/png".to_string(),
        size: 0,
        location: format!("blobs/{}", id.raw()),
    }
}
