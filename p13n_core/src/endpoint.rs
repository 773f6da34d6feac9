use reqwest::Url;

use crate::{Error, Result};

/// Append percent-encoded path `segments` to `base`. A trailing slash on `base` is ignored.
pub(crate) fn endpoint_url(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(base).map_err(Error::InvalidBaseUrl)?;
    url.path_segments_mut()
        .map_err(|_| Error::InvalidBaseUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::endpoint_url;
    use crate::Error;

    #[test]
    fn appends_encoded_segments() {
        assert_eq!(
            endpoint_url("https://gateway.internal/v1/", &["projects", "my store", "events"])
                .unwrap()
                .as_str(),
            "https://gateway.internal/v1/projects/my%20store/events"
        );
        assert_eq!(
            endpoint_url("https://gateway.internal", &["events"])
                .unwrap()
                .as_str(),
            "https://gateway.internal/events"
        );
    }

    #[test]
    fn rejects_invalid_base() {
        assert!(matches!(
            endpoint_url("not a url", &["x"]),
            Err(Error::InvalidBaseUrl(_))
        ));
        assert!(matches!(
            endpoint_url("mailto:someone@example.com", &["x"]),
            Err(Error::InvalidBaseUrl(_))
        ));
    }
}
