//! Mini-application launch URL
//!
//! The `start` command hands the caller a link to the mini-application with
//! the panels their stored role may see. The panels are a UI hint only; every
//! action is re-authorized server-side.

use attendance_common::db::Role;
use url::Url;

/// Role parameter and visible panels for a stored role
pub fn panels_for(role: Role) -> &'static [&'static str] {
    match role {
        Role::Student | Role::Rating => &["student"],
        Role::Speaker => &["student", "speaker"],
        Role::Admin => &["student", "speaker", "admin"],
    }
}

/// Add or replace `role` and `panels` in the query of `base_url`
///
/// Existing parameters keep their position; new ones are appended.
pub fn build_webapp_url(base_url: &str, role: Role) -> Result<String, url::ParseError> {
    let panels = panels_for(role).join(",");
    let params = [("role", role.as_str().to_string()), ("panels", panels)];
    merge_query(base_url, &params)
}

fn merge_query(base_url: &str, params: &[(&str, String)]) -> Result<String, url::ParseError> {
    let mut url = Url::parse(base_url)?;

    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    for (key, value) in params {
        match pairs.iter_mut().find(|(k, _)| k == key) {
            Some(existing) => existing.1 = value.clone(),
            None => pairs.push((key.to_string(), value.clone())),
        }
    }

    url.query_pairs_mut().clear().extend_pairs(pairs.iter());
    Ok(url.to_string())
}
