use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;

use super::{BackendRequest, RecommendationBackend, Subject};
use crate::response::RecommendationResponse;
use crate::{Error, Result};

/// Plain HTTP JSON variations. The variation `url` is a template whose `{name}` placeholders are
/// filled from the request query string, falling back to `userId`, `itemId` and `numResults` of
/// the request itself. The filled URL is fetched with `GET`.
pub struct HttpBackend {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(timeout: Duration) -> HttpBackend {
        HttpBackend {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl RecommendationBackend for HttpBackend {
    async fn invoke(&self, request: &BackendRequest<'_>) -> Result<RecommendationResponse> {
        let template = request.variation.variation.url.as_deref().ok_or_else(|| {
            Error::not_found(
                "UrlNotConfigured",
                "Variation URL has not been configured for this namespace and recommender name",
            )
        })?;
        let url = fill_template(template, |name| template_value(request, name))?;

        log::debug!(target: "p13n", recommender = request.recommender_path(), variation = request.variation.key; "calling http recommendation backend");

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| Error::BackendUnavailable(err.without_url().to_string()))?;

        response
            .json()
            .await
            .map_err(|err| Error::BackendUnavailable(err.without_url().to_string()))
    }
}

fn template_value<'a>(request: &'a BackendRequest<'_>, name: &str) -> Option<Cow<'a, str>> {
    if let Some(value) = request.query.get(name) {
        return Some(Cow::Borrowed(value));
    }

    match (name, request.subject) {
        ("userId", subject) => subject.user_id().map(Cow::Borrowed),
        ("itemId", Subject::Item { item_id, .. }) => Some(Cow::Borrowed(item_id)),
        ("numResults", _) => Some(Cow::Owned(request.num_results.to_string())),
        _ => None,
    }
}

/// Substitute every `{name}` in `template`. Values are form-encoded.
fn fill_template<'a>(
    template: &str,
    lookup: impl Fn(&str) -> Option<Cow<'a, str>>,
) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after.find('}').ok_or_else(|| {
            Error::invalid_configuration(
                "InvalidVariationUrl",
                "Variation URL has an unterminated placeholder",
            )
        })?;

        let name = &after[..end];
        let value = lookup(name).ok_or_else(|| {
            Error::validation(
                "MissingUrlParameter",
                format!("Query parameter {name} is required by this recommender"),
            )
        })?;
        out.extend(url::form_urlencoded::byte_serialize(value.as_bytes()));

        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}
