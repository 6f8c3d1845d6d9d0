//! Domain models shared across the API, session, and thread-cache layers.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Backend identifier of a professor.
pub type ProfessorId = u64;

/// Backend identifier of a review.
pub type ReviewId = u64;

/// Backend identifier of a reply.
pub type ReplyId = u64;

/// A star rating between 1.0 and 5.0 in half-star steps.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rating(f64);

impl Rating {
    pub const MIN: f64 = 1.0;
    pub const MAX: f64 = 5.0;

    /// Returns a rating when `value` is within range and on a half step.
    pub fn new(value: f64) -> Option<Self> {
        let in_range = (Self::MIN..=Self::MAX).contains(&value);
        let half_step = (value * 2.0).fract() == 0.0;
        (in_range && half_step).then_some(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}/5", self.0)
    }
}

/// A review of a professor for one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    #[serde(default)]
    pub prof_id: ProfessorId,
    #[serde(rename = "username", default)]
    pub author_username: String,
    #[serde(default)]
    pub module_code: String,
    #[serde(default)]
    pub module_name: String,
    #[serde(default)]
    pub text: String,
    pub rating: Rating,
    #[serde(default, alias = "timestamp")]
    pub created_at: String,
    #[serde(default)]
    pub likes_count: u32,
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_liked: bool,
    #[serde(default)]
    pub reply_count: u32,
    /// Derived locally from the signed-in viewer; never sent by the server.
    #[serde(skip)]
    pub can_edit: bool,
}

/// A reply in a review's flat, time-ordered reply list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: ReplyId,
    #[serde(default)]
    pub review_id: ReviewId,
    #[serde(rename = "username", default)]
    pub author_username: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, alias = "timestamp")]
    pub created_at: String,
    #[serde(default)]
    pub likes_count: u32,
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_liked: bool,
    #[serde(skip)]
    pub can_edit: bool,
    /// Presentational `@mention` target; not a structural parent.
    #[serde(default)]
    pub addressed_to: Option<String>,
}

impl Reply {
    /// Fills `addressed_to` from a leading `@mention` when the server omitted it.
    pub fn with_derived_mention(mut self) -> Self {
        if self.addressed_to.is_none() {
            self.addressed_to = leading_mention(&self.text).map(str::to_owned);
        }
        self
    }
}

/// Server-authoritative like state returned by a like toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LikeState {
    pub liked: bool,
    pub likes_count: u32,
}

/// Aggregate review statistics for a professor.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct ProfessorSummary {
    #[serde(default)]
    pub average_rating: Option<f64>,
    #[serde(default)]
    pub review_count: u32,
}

/// One semester in which a professor taught a module.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TeachingEntry {
    pub module_code: String,
    #[serde(default)]
    pub module_name: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub semester: String,
    #[serde(default)]
    pub academic_year: Option<String>,
}

/// Professor detail as served by `/professors/{id}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Professor {
    pub id: ProfessorId,
    pub name: String,
    #[serde(default)]
    pub faculty: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub teaching: Vec<TeachingEntry>,
}

/// Modules a professor taught, grouped by module code in first-seen order.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleGroup {
    pub module_code: String,
    pub module_name: String,
    pub offerings: Vec<String>,
}

impl Professor {
    pub fn teaching_by_module(&self) -> Vec<ModuleGroup> {
        let mut groups: Vec<ModuleGroup> = Vec::new();

        for entry in &self.teaching {
            let offering = match entry.academic_year.as_deref() {
                Some(year) if !year.is_empty() => format!("Semester {} ({year})", entry.semester),
                _ => format!("Semester {}", entry.semester),
            };

            match groups
                .iter_mut()
                .find(|group| group.module_code == entry.module_code)
            {
                Some(group) => group.offerings.push(offering),
                None => groups.push(ModuleGroup {
                    module_code: entry.module_code.clone(),
                    module_name: entry.module_name.clone(),
                    offerings: vec![offering],
                }),
            }
        }

        groups
    }
}

/// Resolves a module name from grouped teaching history.
pub fn module_name_for<'a>(groups: &'a [ModuleGroup], module_code: &str) -> Option<&'a str> {
    groups
        .iter()
        .find(|group| group.module_code == module_code)
        .map(|group| group.module_name.as_str())
}

/// A professor row in search results and rankings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProfessorListing {
    pub id: ProfessorId,
    pub name: String,
    #[serde(default)]
    pub faculty: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub average_rating: Option<f64>,
    #[serde(default)]
    pub review_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Department {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Faculty {
    pub name: String,
    #[serde(default)]
    pub departments: Vec<Department>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModuleListing {
    pub module_code: String,
    #[serde(default)]
    pub name: String,
}

/// Per-semester comparison of professors teaching one module.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModuleComparison {
    #[serde(default)]
    pub module_code: Option<String>,
    #[serde(default)]
    pub semesters: serde_json::Map<String, serde_json::Value>,
}

/// The signed-in account as reported by `/auth/whoami`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CurrentUser {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Returns every `@mention` in `text`, without the `@`.
pub fn mentions(text: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find('@') {
        let tail = &rest[start + 1..];
        let end = tail
            .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
            .unwrap_or(tail.len());
        if end > 0 {
            found.push(&tail[..end]);
        }
        rest = &tail[end..];
    }

    found
}

/// Returns the mention at the very start of `text`, if any.
pub fn leading_mention(text: &str) -> Option<&str> {
    let trimmed = text.trim_start();
    if !trimmed.starts_with('@') {
        return None;
    }
    mentions(trimmed).into_iter().next()
}

/// Prefixes `@username ` to `text` unless it already opens with that mention.
pub fn with_mention_prefix(text: &str, username: &str) -> String {
    if leading_mention(text) == Some(username) {
        text.to_owned()
    } else {
        format!("@{username} {}", text.trim_start())
    }
}

fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(value) => value,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}
