// src/registry/redirect.rs

use url::Url;

/// Checks a supplied redirect URI against a client's registered ones.
///
/// Scheme, host, port and userinfo must match exactly and the registered path must be
/// a prefix of the supplied path ending on a segment boundary. The supplied URI may
/// carry a query, but never a fragment.
pub fn redirect_uri_allowed<S: AsRef<str>>(registered: &[S], supplied: &str) -> bool {
    let Ok(supplied) = Url::parse(supplied) else {
        return false;
    };
    if supplied.fragment().is_some() {
        return false;
    }
    registered
        .iter()
        .filter_map(|uri| Url::parse(uri.as_ref()).ok())
        .any(|registered| matches(&registered, &supplied))
}

fn matches(registered: &Url, supplied: &Url) -> bool {
    if registered.scheme() != supplied.scheme()
        || registered.host_str() != supplied.host_str()
        || registered.port_or_known_default() != supplied.port_or_known_default()
        || registered.username() != supplied.username()
        || registered.password() != supplied.password()
    {
        return false;
    }

    let base = registered.path();
    let path = supplied.path();
    match path.strip_prefix(base) {
        Some(rest) => base.ends_with('/') || rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
