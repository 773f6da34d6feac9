//! `Cache-Control`, `ETag` and `If-None-Match` handling.
use crate::config::{CacheControl, CacheProfile, CacheProfileKind};

/// Cache headers computed for one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHeaders {
    pub cache_control: Option<String>,
    pub etag: String,
}

/// Requests without a user get the most shareable profile. Synthetic users stand for a cohort, so
/// they get their own profile.
pub fn select_profile(has_user: bool, synthetic_user: bool) -> CacheProfileKind {
    match (has_user, synthetic_user) {
        (false, _) => CacheProfileKind::NoUserSpecified,
        (true, true) => CacheProfileKind::SyntheticUserSpecified,
        (true, false) => CacheProfileKind::UserSpecified,
    }
}

/// Render a profile as a `Cache-Control` value.
///
/// `max-age` is appended to directives unless the directives already carry one.
pub fn cache_control_value(profile: &CacheProfile) -> Option<String> {
    match (profile.max_age, profile.directives.as_deref()) {
        (Some(max_age), None | Some("")) => Some(format!("max-age={max_age}")),
        (Some(max_age), Some(directives)) if !directives.contains("max-age=") => {
            Some(format!("{directives},max-age={max_age}"))
        }
        (_, Some(directives)) if !directives.is_empty() => Some(directives.to_owned()),
        _ => None,
    }
}

/// Strong entity tag: quoted hex MD5 of the response body.
pub fn etag(body: &[u8]) -> String {
    format!("\"{:x}\"", md5::compute(body))
}

/// Whether an `If-None-Match` header value matches `etag`.
///
/// Accepts a comma-separated list, weak validators and `*`.
pub fn is_not_modified(if_none_match: Option<&str>, etag: &str) -> bool {
    let Some(if_none_match) = if_none_match else {
        return false;
    };

    if_none_match.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.strip_prefix("W/").unwrap_or(candidate) == etag
    })
}

pub fn compute_cache_headers(
    policy: &CacheControl,
    has_user: bool,
    synthetic_user: bool,
    body: &[u8],
) -> CacheHeaders {
    let cache_control = policy
        .profile(select_profile(has_user, synthetic_user))
        .and_then(cache_control_value);

    CacheHeaders {
        cache_control,
        etag: etag(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(max_age: Option<u64>, directives: Option<&str>) -> CacheProfile {
        CacheProfile {
            max_age,
            directives: directives.map(str::to_owned),
        }
    }

    #[test]
    fn profile_selection() {
        assert_eq!(select_profile(true, false), CacheProfileKind::UserSpecified);
        assert_eq!(
            select_profile(true, true),
            CacheProfileKind::SyntheticUserSpecified
        );
        assert_eq!(select_profile(false, false), CacheProfileKind::NoUserSpecified);
        assert_eq!(select_profile(false, true), CacheProfileKind::NoUserSpecified);
    }

    #[test]
    fn cache_control_rendering() {
        assert_eq!(
            cache_control_value(&profile(Some(10), None)),
            Some("max-age=10".to_owned())
        );
        assert_eq!(
            cache_control_value(&profile(Some(10), Some("private"))),
            Some("private,max-age=10".to_owned())
        );
        assert_eq!(
            cache_control_value(&profile(Some(10), Some("public,max-age=60"))),
            Some("public,max-age=60".to_owned())
        );
        assert_eq!(
            cache_control_value(&profile(None, Some("no-store"))),
            Some("no-store".to_owned())
        );
        assert_eq!(cache_control_value(&profile(None, None)), None);
    }

    #[test]
    fn etag_is_deterministic_and_sensitive() {
        let a = etag(br#"{"itemList":[{"itemId":"1"}]}"#);
        let b = etag(br#"{"itemList":[{"itemId":"1"}]}"#);
        let c = etag(br#"{"itemList":[{"itemId":"2"}]}"#);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with('"') && a.ends_with('"'));
    }

    #[test]
    fn conditional_matching() {
        let tag = etag(b"body");

        assert!(is_not_modified(Some(&tag), &tag));
        assert!(is_not_modified(Some(&format!("W/{tag}")), &tag));
        assert!(is_not_modified(Some(&format!("\"other\", {tag}")), &tag));
        assert!(is_not_modified(Some("*"), &tag));
        assert!(!is_not_modified(Some("\"other\""), &tag));
        assert!(!is_not_modified(None, &tag));
    }

    #[test]
    fn headers_use_selected_profile() {
        let policy = CacheControl {
            user_specified: Some(profile(Some(10), Some("private"))),
            synthetic_user_specified: Some(profile(Some(300), Some("public"))),
            no_user_specified: Some(profile(Some(3600), Some("public"))),
        };

        let headers = compute_cache_headers(&policy, true, true, b"{}");
        assert_eq!(headers.cache_control.as_deref(), Some("public,max-age=300"));
        assert_eq!(headers.etag, etag(b"{}"));

        let headers = compute_cache_headers(&CacheControl::default(), true, false, b"{}");
        assert_eq!(headers.cache_control, None);
    }
}
