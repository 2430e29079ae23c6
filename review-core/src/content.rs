use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Author/user info nested inside every content object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub level: i64,
    #[serde(default)]
    pub portrait: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: i64,
    pub fid: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    pub author: Author,
    #[serde(default)]
    pub create_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub fid: i64,
    pub tid: i64,
    #[serde(default)]
    pub text: String,
    pub author: Author,
    #[serde(default)]
    pub create_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub fid: i64,
    pub tid: i64,
    pub pid: i64,
    #[serde(default)]
    pub text: String,
    pub author: Author,
    #[serde(default)]
    pub create_time: i64,
}

/// A content event: one of the three known shapes, or an untyped fallback
/// for payloads that don't match them. The fallback keeps `payload`
/// decoding total rather than rejecting unrecognized events outright.
///
/// Built only via [`ContentObject::from_typed`], which dispatches on an
/// authoritative `target_type` rather than guessing the variant from shape
/// — an untagged `Deserialize` here would let a `Post` payload (every
/// `Thread` field but `tid` has a default) silently parse as a `Thread`.
#[derive(Debug, Clone)]
pub enum ContentObject {
    Thread(Thread),
    Post(Post),
    Comment(Comment),
    Other(Value),
}

impl ContentObject {
    /// Deserialize `payload` into the variant named by `target_type`,
    /// rather than `#[serde(untagged)]`'s try-each-in-order guessing —
    /// a `Post` payload would otherwise satisfy `Thread` too (every
    /// `Thread` field but `tid` has a default), making `Post`/`Comment`
    /// unreachable behind `Thread`.
    pub fn from_typed(target_type: TargetType, payload: Value) -> Result<Self, serde_json::Error> {
        match target_type {
            TargetType::Thread => Ok(ContentObject::Thread(serde_json::from_value(payload)?)),
            TargetType::Post => Ok(ContentObject::Post(serde_json::from_value(payload)?)),
            TargetType::Comment => Ok(ContentObject::Comment(serde_json::from_value(payload)?)),
            TargetType::All => Ok(ContentObject::Other(payload)),
        }
    }

    /// `title + text` for threads, `text` alone otherwise — mirrors the
    /// original source's `full_text` accessor.
    pub fn full_text(&self) -> String {
        match self {
            ContentObject::Thread(t) => format!("{}{}", t.title, t.text),
            ContentObject::Post(p) => p.text.clone(),
            ContentObject::Comment(c) => c.text.clone(),
            ContentObject::Other(v) => v
                .get("full_text")
                .or_else(|| v.get("text"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }

    pub fn text(&self) -> String {
        match self {
            ContentObject::Thread(t) => t.text.clone(),
            ContentObject::Post(p) => p.text.clone(),
            ContentObject::Comment(c) => c.text.clone(),
            ContentObject::Other(v) => v
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }

    /// Serialize to a `serde_json::Value` for dotted-path field access and
    /// for embedding in a `ReviewResult`.
    pub fn to_value(&self) -> Value {
        match self {
            ContentObject::Thread(t) => serde_json::to_value(t).unwrap_or(Value::Null),
            ContentObject::Post(p) => serde_json::to_value(p).unwrap_or(Value::Null),
            ContentObject::Comment(c) => serde_json::to_value(c).unwrap_or(Value::Null),
            ContentObject::Other(v) => v.clone(),
        }
    }
}

/// The `target_type` a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Thread,
    Post,
    Comment,
    All,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Thread => "thread",
            TargetType::Post => "post",
            TargetType::Comment => "comment",
            TargetType::All => "all",
        }
    }
}

impl std::str::FromStr for TargetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thread" => Ok(TargetType::Thread),
            "post" => Ok(TargetType::Post),
            "comment" => Ok(TargetType::Comment),
            "all" => Ok(TargetType::All),
            other => Err(format!("unknown target_type: {other}")),
        }
    }
}

impl ContentObject {
    pub fn target_type(&self) -> TargetType {
        match self {
            ContentObject::Thread(_) => TargetType::Thread,
            ContentObject::Post(_) => TargetType::Post,
            ContentObject::Comment(_) => TargetType::Comment,
            ContentObject::Other(_) => TargetType::All,
        }
    }

    pub fn fid(&self) -> i64 {
        match self {
            ContentObject::Thread(t) => t.fid,
            ContentObject::Post(p) => p.fid,
            ContentObject::Comment(c) => c.fid,
            ContentObject::Other(v) => v.get("fid").and_then(Value::as_i64).unwrap_or_default(),
        }
    }
}
