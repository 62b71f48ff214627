//! Narrative sentences for audit records
//!
//! A [`Narrator`] walks an ordered list of [`NarrationRule`]s and renders the
//! first one whose (method, URL) matcher accepts the record. Later rules are
//! never consulted once one has matched, even if it renders nothing.

use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};

use super::record::AuditRecord;

/// Marker line opening a narrative block
pub const BLOCK_BEGIN: &str = "=== BEGIN REQUEST ===";

/// Marker line closing a narrative block
pub const BLOCK_END: &str = "=== END REQUEST ===";

const MAX_BLOCK_PAYLOAD_CHARS: usize = 2048;

/// Everything a rule may draw on
#[derive(Debug)]
pub struct NarrationContext<'a> {
    /// The record being narrated
    pub record: &'a AuditRecord,
    /// Resolved display name of the acting user
    pub user: &'a str,
    /// Resource path parsed from the URL
    pub route: Route<'a>,
}

impl NarrationContext<'_> {
    /// `[YYYY-MM-DD HH:MM:SS UTC] <user>` sentence prefix
    pub fn subject(&self) -> String {
        format!(
            "[{}] {}",
            self.record.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            one_line(self.user)
        )
    }

    /// First string/number field found in the request body, then the response
    pub fn field(&self, names: &[&str]) -> Option<String> {
        lookup(&self.record.body, names).or_else(|| {
            self.record
                .response_body
                .as_json()
                .and_then(|response| lookup(response, names).or_else(|| nested_data(response, names)))
        })
    }

    /// First string/number field found in the request body only
    pub fn body_field(&self, names: &[&str]) -> Option<String> {
        lookup(&self.record.body, names)
    }

    /// `folder 42`, or `a folder` when the URL carries no id
    pub fn target(&self) -> String {
        match self.route.id {
            Some(id) => format!("{} {}", self.route.resource, id),
            None => format!("a {}", self.route.resource),
        }
    }
}

/// Resource, id and trailing action parsed from `/api/<resource>/<id>/<action>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route<'a> {
    /// Singular resource name (`folders` → `folder`), `item` when absent
    pub resource: String,
    /// Second path segment
    pub id: Option<&'a str>,
    /// Segments after the id
    pub rest: Vec<&'a str>,
    /// Whether the URL names only the collection
    pub collection: bool,
}

impl<'a> Route<'a> {
    /// Parse a request path
    pub fn parse(url: &'a str) -> Self {
        let mut segments: Vec<&str> = url.split('/').filter(|s| !s.is_empty()).collect();
        if segments.first() == Some(&"api") {
            segments.remove(0);
        }
        if segments.first().is_some_and(|s| is_version(s)) {
            segments.remove(0);
        }

        let resource = segments
            .first()
            .map(|s| singular(s))
            .unwrap_or_else(|| "item".to_string());
        let id = segments.get(1).copied();
        let rest = segments.iter().skip(2).copied().collect();
        let collection = segments.len() == 1;

        Self {
            resource,
            id,
            rest,
            collection,
        }
    }
}

/// Decides whether a rule applies to (method, url)
pub type RuleMatcher = fn(&str, &str) -> bool;

/// Renders the sentence for a matched record
pub type RuleRenderer = fn(&NarrationContext<'_>) -> Option<String>;

/// One narration rule
#[derive(Clone, Copy)]
pub struct NarrationRule {
    /// Rule name, for logs
    pub name: &'static str,
    /// Match on (HTTP method, URL)
    pub matches: RuleMatcher,
    /// Build the sentence
    pub render: RuleRenderer,
}

impl std::fmt::Debug for NarrationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NarrationRule")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Rule engine turning a record into an optional sentence
#[derive(Debug, Clone)]
pub struct Narrator {
    rules: Vec<NarrationRule>,
}

impl Default for Narrator {
    fn default() -> Self {
        Self::new(builtin_rules())
    }
}

impl Narrator {
    /// Narrator with an explicit, ordered rule list
    pub fn new(rules: Vec<NarrationRule>) -> Self {
        Self { rules }
    }

    /// Rule names in evaluation order
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name).collect()
    }

    /// Sentence for `record`, performed by `user`
    ///
    /// Returns `None` when no rule matches or the matching rule cannot render.
    pub fn narrate(&self, record: &AuditRecord, user: &str) -> Option<String> {
        let method = record.method.to_ascii_uppercase();
        let rule = self
            .rules
            .iter()
            .find(|rule| (rule.matches)(&method, &record.url))?;

        let ctx = NarrationContext {
            record,
            user,
            route: Route::parse(&record.url),
        };

        let sentence = match catch_unwind(AssertUnwindSafe(|| (rule.render)(&ctx))) {
            Ok(sentence) => sentence,
            Err(_) => {
                tracing::warn!(rule = rule.name, url = %record.url, "Narration rule panicked");
                None
            }
        }?;

        if record.status_code >= 400 {
            Some(format!(
                "{sentence} (failed with status {})",
                record.status_code
            ))
        } else {
            Some(sentence)
        }
    }
}

/// Human-readable block for the narrative file
///
/// The narrator's sentence, when there is one, opens the block. Every
/// interpolated value is kept on its own line, so the only marker lines in
/// the file are the ones written here.
pub fn narrative_block(record: &AuditRecord, user: &str, sentence: Option<&str>) -> String {
    let mut lines = vec![BLOCK_BEGIN.to_string()];
    if let Some(sentence) = sentence {
        lines.push(one_line(sentence));
    }

    let user_line = match record.user_id.as_deref() {
        Some(id) if id != user => format!("{} ({})", one_line(user), one_line(id)),
        _ => one_line(user),
    };

    let mut request_line = format!("{} {}", record.method, record.url);
    if !record.query.is_empty() {
        let query: Vec<String> = record
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", one_line(k), one_line(v.as_str().unwrap_or_default())))
            .collect();
        request_line.push('?');
        request_line.push_str(&query.join("&"));
    }

    lines.push(format!(
        "Time:     {}",
        record.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ")
    ));
    lines.push(format!("Request:  {}", one_line(&record.request_id)));
    lines.push(format!("User:     {user_line}"));
    lines.push(format!("Action:   {request_line}"));
    lines.push(format!(
        "Status:   {} in {} ms",
        record.status_code, record.duration_ms
    ));
    lines.push(format!(
        "Client:   {} ({})",
        one_line(record.ip.as_deref().unwrap_or("unknown")),
        one_line(record.user_agent.as_deref().unwrap_or("unknown agent"))
    ));
    if !record.body.is_null() {
        lines.push(format!("Body:     {}", clip(&record.body.to_string())));
    }
    let response: Value = record.response_body.clone().into();
    lines.push(format!("Response: {}", clip(&response.to_string())));
    lines.push(BLOCK_END.to_string());

    lines.join("\n") + "\n"
}

/// The fixed, ordered rule set
pub fn builtin_rules() -> Vec<NarrationRule> {
    vec![
        NarrationRule {
            name: "create",
            matches: |method, url| method == "POST" && Route::parse(url).collection,
            render: render_create,
        },
        NarrationRule {
            name: "delete",
            matches: |method, url| method == "DELETE" && Route::parse(url).id.is_some(),
            render: render_delete,
        },
        NarrationRule {
            name: "rename",
            matches: |method, url| {
                is_write(method)
                    && (url.contains("rename") || url.contains("/name") || url.contains("/title"))
            },
            render: render_rename,
        },
        NarrationRule {
            name: "move",
            matches: |method, url| is_write(method) && url.contains("/move"),
            render: render_move,
        },
        NarrationRule {
            name: "approve",
            matches: |method, url| is_write(method) && url.contains("/approve"),
            render: render_approve,
        },
        NarrationRule {
            name: "generic",
            matches: |method, _| matches!(method, "POST" | "PUT" | "PATCH" | "DELETE"),
            render: render_generic,
        },
    ]
}

fn render_create(ctx: &NarrationContext<'_>) -> Option<String> {
    let sentence = match ctx.field(&["name", "title", "filename", "label"]) {
        Some(name) => format!(
            "{} created {} \"{}\"",
            ctx.subject(),
            ctx.route.resource,
            name
        ),
        None => format!("{} created a new {}", ctx.subject(), ctx.route.resource),
    };
    Some(sentence)
}

fn render_delete(ctx: &NarrationContext<'_>) -> Option<String> {
    let id = ctx.route.id?;
    let mut sentence = format!("{} deleted {} {}", ctx.subject(), ctx.route.resource, id);
    if let Some(name) = ctx.field(&["name", "title"]) {
        sentence.push_str(&format!(" (\"{name}\")"));
    }
    Some(sentence)
}

fn render_rename(ctx: &NarrationContext<'_>) -> Option<String> {
    let new_name = ctx.body_field(&["newName", "new_name", "name", "title"]);
    Some(match new_name {
        Some(name) => format!(
            "{} renamed {} to \"{}\"",
            ctx.subject(),
            ctx.target(),
            name
        ),
        None => format!("{} renamed {}", ctx.subject(), ctx.target()),
    })
}

fn render_move(ctx: &NarrationContext<'_>) -> Option<String> {
    let folder = ctx.body_field(&["parentId", "parent_id", "folderId", "folder_id", "targetFolderId"]);
    let destination = ctx.body_field(&["destination", "target", "targetId", "path"]);
    Some(match (folder, destination) {
        (Some(folder), _) => format!(
            "{} moved {} to folder {}",
            ctx.subject(),
            ctx.target(),
            folder
        ),
        (None, Some(destination)) => format!(
            "{} moved {} to {}",
            ctx.subject(),
            ctx.target(),
            destination
        ),
        (None, None) => format!("{} moved {}", ctx.subject(), ctx.target()),
    })
}

fn render_approve(ctx: &NarrationContext<'_>) -> Option<String> {
    Some(format!("{} approved {}", ctx.subject(), ctx.target()))
}

fn render_generic(ctx: &NarrationContext<'_>) -> Option<String> {
    let url = &ctx.record.url;
    let sentence = match ctx.record.method.to_ascii_uppercase().as_str() {
        "POST" => format!("{} performed an action on {}", ctx.subject(), url),
        "PUT" | "PATCH" => match ctx.route.id {
            Some(_) if ctx.route.rest.is_empty() => {
                format!("{} updated {}", ctx.subject(), ctx.target())
            }
            _ => format!("{} updated {}", ctx.subject(), url),
        },
        "DELETE" => format!("{} deleted {}", ctx.subject(), url),
        _ => return None,
    };
    Some(sentence)
}

fn is_write(method: &str) -> bool {
    matches!(method, "POST" | "PUT" | "PATCH")
}

fn is_version(segment: &str) -> bool {
    segment.len() > 1
        && segment.starts_with('v')
        && segment[1..].chars().all(|c| c.is_ascii_digit())
}

fn singular(segment: &str) -> String {
    let segment = segment.to_ascii_lowercase();
    if let Some(stem) = segment.strip_suffix("ies") {
        format!("{stem}y")
    } else if segment.ends_with("ss") {
        segment
    } else if let Some(stem) = segment.strip_suffix('s') {
        stem.to_string()
    } else {
        segment
    }
}

fn lookup(value: &Value, names: &[&str]) -> Option<String> {
    let object = value.as_object()?;
    names.iter().find_map(|name| match object.get(*name)? {
        Value::String(s) if !s.trim().is_empty() && s != super::redact::REDACTED => {
            Some(one_line(s))
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Many APIs wrap the payload in `{"data": {...}}`
fn nested_data(response: &Value, names: &[&str]) -> Option<String> {
    response.get("data").and_then(|data| lookup(data, names))
}

fn clip(text: &str) -> String {
    if text.chars().count() <= MAX_BLOCK_PAYLOAD_CHARS {
        return text.to_string();
    }
    let clipped: String = text.chars().take(MAX_BLOCK_PAYLOAD_CHARS).collect();
    format!("{clipped}... (truncated)")
}

/// Escape control characters so a value cannot break a line
fn one_line(text: &str) -> String {
    if !text.chars().any(char::is_control) {
        return text.to_string();
    }
    text.chars()
        .map(|c| {
            if c.is_control() {
                c.escape_default().to_string()
            } else {
                c.to_string()
            }
        })
        .collect()
}
