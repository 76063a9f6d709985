//! Extraction of the CSRF token and client revision from the home page and
//! from `jsmods.define` blocks of ordinary responses.

use std::{collections::HashMap, sync::LazyLock};

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    error::SessionError,
    service::{REVISION_DEFINE, REVISION_KEY, TOKEN_DEFINES},
};

static DEFINE_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:"define":|handleDefines\()"#).expect("static pattern"));
static TOKEN_INPUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"name="fb_dtsg" value="([^"]*)""#).expect("static pattern"));
static REVISION_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""client_revision":(\d+)"#).expect("static pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapData {
    pub token: String,
    pub revision: String,
}

/// Collects every `[name, deps, data, id]` entry of the define arrays on a page.
/// Later blobs override earlier ones.
pub fn collect_defines(html: &str) -> HashMap<String, Value> {
    let mut defines = HashMap::new();
    for found in DEFINE_START.find_iter(html) {
        let rest = html[found.end()..].trim_start();
        let Some(Ok(Value::Array(entries))) = serde_json::Deserializer::from_str(rest)
            .into_iter::<Value>()
            .next()
        else {
            continue;
        };
        absorb_defines(&entries, &mut defines);
    }
    defines
}

fn absorb_defines(entries: &[Value], defines: &mut HashMap<String, Value>) {
    for entry in entries {
        let Some(name) = entry.get(0).and_then(Value::as_str) else {
            continue;
        };
        if let Some(data) = entry.get(2) {
            defines.insert(name.to_string(), data.clone());
        }
    }
}

fn token_from(defines: &HashMap<String, Value>) -> Option<String> {
    TOKEN_DEFINES.iter().find_map(|name| {
        defines
            .get(*name)
            .and_then(|data| data.get("token"))
            .and_then(Value::as_str)
            .map(str::to_string)
    })
}

fn revision_from(defines: &HashMap<String, Value>) -> Option<String> {
    match defines.get(REVISION_DEFINE)?.get(REVISION_KEY)? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Reads token and revision from the home page, falling back to a plain
/// text scan when the page carries no usable define blob.
pub fn parse_home_page(html: &str) -> Result<BootstrapData, SessionError> {
    let defines = collect_defines(html);
    debug!(defines = defines.len(), "parsed define blobs");

    let token = token_from(&defines).or_else(|| {
        TOKEN_INPUT
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    });
    let Some(token) = token else {
        return Err(SessionError::parse("could not find fb_dtsg on the home page", html));
    };
    if token.is_empty() {
        return Err(SessionError::NotLoggedIn(
            "home page carries an empty fb_dtsg".into(),
        ));
    }

    let revision = revision_from(&defines).or_else(|| {
        REVISION_LITERAL
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    });
    let Some(revision) = revision else {
        warn!("home page has a token but no client revision");
        return Err(SessionError::parse("could not find client_revision", html));
    };

    Ok(BootstrapData { token, revision })
}

/// Token pushed in a response's `jsmods.define`, if any.
pub fn token_from_response(body: &Value) -> Option<String> {
    let entries = body.get("jsmods")?.get("define")?.as_array()?;
    let mut defines = HashMap::new();
    absorb_defines(entries, &mut defines);
    token_from(&defines).filter(|token| !token.is_empty())
}

#[cfg(test)]
#[path = "tests/bootstrap_tests.rs"]
mod tests;
