//! User-facing description of a download before it is resolved into a
//! concrete file path and task list.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What to do when the resolved destination path already exists on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Leave the existing file alone; the mission finishes as `Skipped`.
    Skip,
    /// Truncate and replace the existing file.
    Overwrite,
    /// Pick a sibling name like `file(1).bin` that does not yet exist.
    #[default]
    Rename,
    /// Append the new bytes onto the end of the existing file.
    Add,
}

/// HTTP method. Derived automatically from whether a request body is
/// present unless the caller names one explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// A request body: either URL-encoded form fields or a raw JSON document.
#[derive(Debug, Clone)]
pub enum Body {
    Form(HashMap<String, String>),
    Json(serde_json::Value),
}

/// Everything the caller supplies about a single download. Immutable once
/// handed to [`crate::Engine::submit`]; the engine derives a [`Method`],
/// resolves a destination path, and builds the task list from this.
#[derive(Debug, Clone)]
pub struct MissionData {
    pub url: String,
    pub goal_dir: PathBuf,
    /// Caller-supplied filename override. When absent the resolver derives
    /// one from `Content-Disposition`, then the URL path, then a
    /// synthesized `untitled_<ts>_<rand>` name.
    pub rename: Option<String>,
    pub conflict_policy: ConflictPolicy,
    /// Whether this mission is eligible for multi-task splitting. Forced
    /// to `false` regardless of this flag when the server does not
    /// advertise `Accept-Ranges: bytes` or withholds `Content-Length`.
    pub allow_split: bool,
    pub method: Option<Method>,
    pub body: Option<BodyInner>,
    pub headers: HashMap<String, String>,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
}

/// Boxed so `MissionData` stays cheap to move around before `serde_json`
/// is pulled in by a caller that never sends JSON bodies.
pub type BodyInner = Body;

impl MissionData {
    pub fn new(url: impl Into<String>, goal_dir: impl Into<PathBuf>) -> Self {
        MissionData {
            url: url.into(),
            goal_dir: goal_dir.into(),
            rename: None,
            conflict_policy: ConflictPolicy::default(),
            allow_split: true,
            method: None,
            body: None,
            headers: HashMap::new(),
            connect_timeout: None,
            read_timeout: None,
        }
    }

    pub fn with_rename(mut self, name: impl Into<String>) -> Self {
        self.rename = Some(name.into());
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn with_allow_split(mut self, allow: bool) -> Self {
        self.allow_split = allow;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_form_body(mut self, fields: HashMap<String, String>) -> Self {
        self.body = Some(Body::Form(fields));
        self
    }

    pub fn with_json_body(mut self, value: serde_json::Value) -> Self {
        self.body = Some(Body::Json(value));
        self
    }

    /// The effective method: whatever the caller named, or `Post` iff a
    /// body is attached, else `Get`.
    pub fn effective_method(&self) -> Method {
        self.method.unwrap_or(match self.body {
            Some(_) => Method::Post,
            None => Method::Get,
        })
    }

    pub fn goal_dir(&self) -> &Path {
        &self.goal_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_defaults_to_get_without_a_body() {
        let m = MissionData::new("https://example.com/a", "/tmp");
        assert_eq!(m.effective_method(), Method::Get);
    }

    #[test]
    fn method_defaults_to_post_with_a_body() {
        let m = MissionData::new("https://example.com/a", "/tmp")
            .with_json_body(serde_json::json!({"a": 1}));
        assert_eq!(m.effective_method(), Method::Post);
    }

    #[test]
    fn explicit_method_overrides_body_inference() {
        let mut m = MissionData::new("https://example.com/a", "/tmp")
            .with_json_body(serde_json::json!({}));
        m.method = Some(Method::Get);
        assert_eq!(m.effective_method(), Method::Get);
    }

    #[test]
    fn conflict_policy_defaults_to_rename() {
        assert_eq!(ConflictPolicy::default(), ConflictPolicy::Rename);
    }
}
