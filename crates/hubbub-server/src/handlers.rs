use axum::{
    Form,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
};
use hubbub_core::{Subscription, hub_location};
use serde::Deserialize;
use url::Url;

use crate::error::ApiError;
use crate::server::AppState;

const INVALID_PARAMETERS: &str = "invalid parameters";
const MISSING_HEADERS: &str = "missing required headers";

/// Subscriber request body (`application/x-www-form-urlencoded`).
#[derive(Debug, Default, Deserialize)]
pub struct HubRequest {
    #[serde(rename = "hub.topic")]
    pub topic: Option<String>,
    #[serde(rename = "hub.callback")]
    pub callback: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.secret")]
    pub secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PublishQuery {
    pub topic: Option<String>,
}

pub async fn health() -> &'static str {
    "ok"
}

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// `POST /hub`: subscriber requests.
pub async fn hub_request(
    State(state): State<AppState>,
    Form(form): Form<HubRequest>,
) -> Result<StatusCode, ApiError> {
    let (Some(topic), Some(callback), Some(verify_token), Some(mode)) = (
        required(form.topic),
        required(form.callback),
        required(form.verify_token),
        required(form.mode),
    ) else {
        return Err(ApiError::bad_request(INVALID_PARAMETERS));
    };

    match mode.as_str() {
        "subscribe" => {}
        "unsubscribe" => {
            return Err(ApiError::NotImplemented(
                "unsubscribe is not supported".into(),
            ));
        }
        other => return Err(ApiError::NotFound(format!("unknown hub.mode '{other}'"))),
    }

    let callback = Url::parse(&callback)
        .map_err(|e| ApiError::bad_request(format!("invalid hub.callback: {e}")))?;
    let subscription = Subscription::new(topic, callback, form.secret)?;

    let result = state.hub.subscribe(subscription, &verify_token).await?;
    if result.succeeded {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(ApiError::BadRequest(result.reason))
    }
}

/// `POST /hub/publish?topic=...`: publisher notifications.
///
/// The raw body is the payload; `Link` headers must name this hub and the topic.
pub async fn publish(
    State(state): State<AppState>,
    Query(query): Query<PublishQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let links = headers
        .get_all(header::LINK)
        .iter()
        .filter_map(|v| v.to_str().ok());
    let Ok(Some(location)) = hub_location(links) else {
        return Err(ApiError::bad_request(MISSING_HEADERS));
    };

    let Some(topic) = required(query.topic) else {
        return Err(ApiError::bad_request("topic is required"));
    };

    // An unconfigured hub accepts whatever hub the publisher advertises
    let requested = state.hub.location().is_some().then_some(location);
    state.hub.publish(&topic, Some(body), requested)?;
    Ok(StatusCode::ACCEPTED)
}
