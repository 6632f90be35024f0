//! Name-agnostic request parameter resolution
//!
//! Every logical parameter can arrive as one of several header aliases or as
//! a lowercase query-string key; the first non-empty, trimmed value wins.
//! A lookup table beats scattered conditionals here.

use std::collections::HashMap;

use axum::http::HeaderMap;

/// (logical name, header aliases, query key)
const ALIASES: &[(&str, &[&str], &str)] = &[
    ("message", &["X-Message", "Message", "m"], "message"),
    ("title", &["X-Title", "Title", "t"], "title"),
    ("priority", &["X-Priority", "Priority", "prio", "p"], "priority"),
    ("tags", &["X-Tags", "Tags", "Tag", "ta"], "tags"),
    ("delay", &["X-Delay", "Delay", "X-At", "At", "X-In", "In"], "delay"),
    ("click", &["X-Click", "Click"], "click"),
    ("filename", &["X-Filename", "Filename", "file", "f"], "filename"),
    ("attach", &["X-Attach", "Attach", "a"], "attach"),
    ("email", &["X-Email", "X-E-Mail", "Email", "E-Mail", "mail", "e"], "email"),
    ("cache", &["X-Cache", "Cache"], "cache"),
    ("firebase", &["X-Firebase", "Firebase"], "firebase"),
    ("poll-id", &["X-Poll-ID", "Poll-ID"], "poll_id"),
    ("poll", &["X-Poll", "Poll", "po"], "poll"),
    ("scheduled", &["X-Scheduled", "Scheduled", "sched"], "scheduled"),
    ("since", &["X-Since", "Since"], "since"),
];

pub struct Params<'a> {
    headers: &'a HeaderMap,
    query: &'a HashMap<String, String>,
}

impl<'a> Params<'a> {
    pub fn new(headers: &'a HeaderMap, query: &'a HashMap<String, String>) -> Self {
        Self { headers, query }
    }

    /// Resolve a logical parameter by its alias table entry
    pub fn get(&self, name: &str) -> Option<String> {
        let (_, header_aliases, query_key) = ALIASES
            .iter()
            .find(|(logical, _, _)| *logical == name)
            .expect("unknown logical parameter");

        for alias in *header_aliases {
            if let Some(value) = self.headers.get(*alias) {
                if let Ok(value) = value.to_str() {
                    let value = value.trim();
                    if !value.is_empty() {
                        return Some(value.to_string());
                    }
                }
            }
        }
        self.query
            .get(*query_key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// Boolean parameter: 1/yes/true enable, everything else does not
    pub fn get_bool(&self, name: &str) -> bool {
        self.get(name)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "yes" | "true"))
            .unwrap_or(false)
    }

    /// Explicit opt-out: value 0/no/false
    pub fn is_disabled(&self, name: &str) -> bool {
        self.get(name)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "0" | "no" | "false"))
            .unwrap_or(false)
    }

    /// Comma-separated list parameter, entries trimmed, empties dropped
    pub fn get_list(&self, name: &str) -> Vec<String> {
        self.get(name)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}
