//! Form extraction and screen classification for the login checkpoint.
//!
//! The network side of the challenge lives in [`crate::session`]; this module
//! only decides what a page is and what to send back.

use std::collections::BTreeMap;

use crate::{
    error::SessionError,
    markup::MarkupParser,
    service::{CheckpointMarkup, FORM_VALUE_MISSING},
};

/// Upper bound on form submissions before giving up on a challenge.
pub const MAX_CHECKPOINT_STEPS: usize = 5;

/// The single form on a checkpoint page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeForm {
    pub action: String,
    pub fields: BTreeMap<String, String>,
}

impl ChallengeForm {
    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }
}

/// Known checkpoint sub-screens, in the order they are tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointScreen {
    /// Asks for a two-factor code.
    ApprovalCode,
    /// Offers to remember the browser.
    RememberDevice,
    /// "Was this you?" review of the login attempt.
    ReviewLogin,
    /// The account must be unlocked in a browser.
    Locked,
}

/// Parses the page's only form. `origin` prefixes root-relative actions.
pub fn extract_form(
    parser: &dyn MarkupParser,
    html: &str,
    origin: &str,
) -> Result<ChallengeForm, SessionError> {
    let forms = parser
        .forms(html)
        .map_err(|err| SessionError::parse(err.to_string(), html))?;
    let [form] = forms.as_slice() else {
        return Err(SessionError::parse(
            format!("expected exactly one form, found {}", forms.len()),
            html,
        ));
    };

    let mut fields = BTreeMap::new();
    for control in &form.controls {
        let Some(name) = control.attr("name") else {
            continue;
        };
        let value = control.attr("value").unwrap_or(FORM_VALUE_MISSING);
        // A control with a value wins over a same-named one without.
        if value == FORM_VALUE_MISSING && fields.contains_key(name) {
            continue;
        }
        fields.insert(name.to_string(), value.to_string());
    }

    let action = match form.action.as_deref() {
        Some(action) if action.starts_with('/') => {
            format!("{}{action}", origin.trim_end_matches('/'))
        }
        Some(action) if !action.is_empty() => action.to_string(),
        _ => return Err(SessionError::parse("checkpoint form has no action", html)),
    };

    Ok(ChallengeForm { action, fields })
}

/// Matches a form against the markup table. No match is drift, never a guess.
pub fn classify(
    form: &ChallengeForm,
    markup: &CheckpointMarkup,
) -> Result<CheckpointScreen, SessionError> {
    if form.has(markup.code_field) {
        Ok(CheckpointScreen::ApprovalCode)
    } else if form.has(markup.remember_device_field) {
        Ok(CheckpointScreen::RememberDevice)
    } else if form.has(markup.review_confirm_field) && form.has(markup.review_deny_field) {
        Ok(CheckpointScreen::ReviewLogin)
    } else if form.has(markup.locked_field) {
        Ok(CheckpointScreen::Locked)
    } else {
        Err(SessionError::drift(
            format!("checkpoint (markup v{})", markup.version),
            form.field_names(),
        ))
    }
}

/// Fields to post back for a screen. `code` is only read for
/// [`CheckpointScreen::ApprovalCode`].
pub fn submission(
    form: &ChallengeForm,
    screen: CheckpointScreen,
    markup: &CheckpointMarkup,
    code: Option<&str>,
) -> Result<Vec<(String, String)>, SessionError> {
    let mut fields = form.fields.clone();
    match screen {
        CheckpointScreen::ApprovalCode => {
            let code = code.ok_or_else(|| {
                SessionError::NotLoggedIn("two-factor code required but no provider given".into())
            })?;
            fields.insert(markup.code_field.to_string(), code.to_string());
        }
        CheckpointScreen::RememberDevice => {
            fields.insert(
                markup.remember_device_field.to_string(),
                markup.remember_device_decline.to_string(),
            );
        }
        CheckpointScreen::ReviewLogin => {
            fields.insert(
                markup.review_confirm_field.to_string(),
                markup.review_confirm_value.to_string(),
            );
            fields.remove(markup.review_deny_field);
        }
        CheckpointScreen::Locked => {
            return Err(SessionError::NotLoggedIn(
                "account is locked; verify the login in a browser".into(),
            ));
        }
    }
    Ok(fields.into_iter().collect())
}

#[cfg(test)]
#[path = "tests/checkpoint_tests.rs"]
mod tests;
