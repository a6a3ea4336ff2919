use std::path::Path;

use reqwest::Url;

use crate::error::CoreError;

/// Resolve node credentials.
///
/// Precedence: explicit user + password, then the node's cookie file
/// (`username:password` on its first line), then no auth.
pub(super) fn resolve_auth(
    user: Option<&str>,
    pass: Option<&str>,
    cookie_file: Option<&Path>,
) -> Result<Option<(String, String)>, CoreError> {
    match (user, pass) {
        (Some(u), Some(p)) => return Ok(Some((u.to_owned(), p.to_owned()))),
        (Some(_), None) | (None, Some(_)) => {
            return Err(CoreError::Config(
                "rpc user and rpc password must be set together".to_owned(),
            ));
        }
        (None, None) => {}
    }

    let Some(cookie_file) = cookie_file else {
        return Ok(None);
    };

    let content = std::fs::read_to_string(cookie_file).map_err(|e| {
        CoreError::Config(format!(
            "read rpc cookie file {}: {e}",
            cookie_file.display()
        ))
    })?;
    let (cookie_user, cookie_pass) = content
        .lines()
        .next()
        .map(str::trim)
        .and_then(|line| line.split_once(':'))
        .filter(|(u, p)| !u.is_empty() && !p.is_empty())
        .ok_or_else(|| {
            CoreError::Config(format!(
                "rpc cookie file {} must start with a non-empty `username:password` line",
                cookie_file.display()
            ))
        })?;

    Ok(Some((cookie_user.to_owned(), cookie_pass.to_owned())))
}

/// Accept only HTTP(S) node endpoints.
pub(super) fn parse_endpoint(endpoint: &str) -> Result<String, CoreError> {
    let parsed = Url::parse(endpoint).map_err(|e| {
        CoreError::Config(format!(
            "invalid rpc endpoint `{endpoint}`: expected HTTP(S) URL ({e})"
        ))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(endpoint.to_owned()),
        other => Err(CoreError::Config(format!(
            "unsupported rpc endpoint scheme `{other}`; expected http or https"
        ))),
    }
}
