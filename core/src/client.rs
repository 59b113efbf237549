//! Stateless HTTP request builder and response parser for the study API.
//!
//! # Design
//! `VincaClient` holds only the base URL and carries no mutable state between
//! calls. Each endpoint is split into a `build_*` method that produces an
//! `HttpRequest` and a `parse_*` method that consumes an `HttpResponse`.
//! Authenticated builders take the caller's `Session` and copy its bearer
//! token into the request they return; nothing is cached across calls.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::error::{ApiError, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::session::Session;
use crate::types::{
    Card, CardId, Credentials, Criteria, Filters, Grade, MediaBlob, MediaId, Metadata,
    NextTwoDue, Sort, TokenResponse, UnixDay, UploadedMedia,
};

pub const DEFAULT_BASE_URL: &str = "https://api.vinca.study/";

const JSON: &str = "application/json";
const FORM: &str = "application/x-www-form-urlencoded";

#[derive(Serialize)]
struct CommitCardPayload<'a> {
    card: &'a Card,
    metadata: Metadata,
}

#[derive(Serialize)]
struct ReviewParams<'a> {
    card_id: &'a CardId,
    grade: &'a Grade,
}

#[derive(Serialize)]
struct ReviewPayload<'a> {
    review: ReviewParams<'a>,
    metadata: Metadata,
}

#[derive(Serialize)]
struct MediaPayload<'a> {
    content: &'a str,
    base64: bool,
}

#[derive(Serialize)]
struct SortCrit<'a> {
    sort: &'a Sort,
}

#[derive(Serialize)]
struct CriteriaPayload<'a> {
    crit: SortCrit<'a>,
    filters: &'a Filters,
}

#[derive(Serialize)]
struct FiltersPayload<'a> {
    filters: &'a Filters,
}

/// Synchronous, stateless client for the study API.
#[derive(Debug, Clone)]
pub struct VincaClient {
    base_url: Url,
}

impl VincaClient {
    /// `base_url` may be given with or without a trailing slash.
    pub fn new(base_url: &str) -> Result<Self> {
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized).map_err(|e| ApiError::InvalidUrl(format!("{base_url}: {e}")))?;
        Ok(Self { base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<String> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| ApiError::InvalidUrl(format!("{path}: {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url.into())
    }

    fn get(&self, session: &Session, path: &str, query: &[(&str, String)]) -> Result<HttpRequest> {
        Ok(HttpRequest {
            method: HttpMethod::Get,
            url: self.endpoint(path, query)?,
            headers: vec![
                ("content-type".to_string(), JSON.to_string()),
                ("authorization".to_string(), session.authorization()),
            ],
            body: None,
        })
    }

    fn post_json<B: Serialize>(&self, session: Option<&Session>, path: &str, body: &B) -> Result<HttpRequest> {
        let body = serde_json::to_string(body).map_err(|e| ApiError::Serialization(e.to_string()))?;
        let mut headers = vec![("content-type".to_string(), JSON.to_string())];
        if let Some(session) = session {
            headers.push(("authorization".to_string(), session.authorization()));
        }
        Ok(HttpRequest {
            method: HttpMethod::Post,
            url: self.endpoint(path, &[])?,
            headers,
            body: Some(body),
        })
    }

    pub fn build_users_list(&self, session: &Session) -> Result<HttpRequest> {
        self.get(session, "auth/users_list", &[])
    }

    /// Login posts form-encoded credentials and carries no bearer token.
    pub fn build_login(&self, username: &str, password: &str) -> Result<HttpRequest> {
        let form = Credentials {
            username: username.to_string(),
            password: password.to_string(),
        };
        let body = serde_urlencoded::to_string(&form).map_err(|e| ApiError::Serialization(e.to_string()))?;
        Ok(HttpRequest {
            method: HttpMethod::Post,
            url: self.endpoint("auth/token", &[])?,
            headers: vec![("content-type".to_string(), FORM.to_string())],
            body: Some(body),
        })
    }

    pub fn build_register(&self, username: &str, password: &str) -> Result<HttpRequest> {
        let body = Credentials {
            username: username.to_string(),
            password: password.to_string(),
        };
        self.post_json(None, "auth/register", &body)
    }

    pub fn build_commit_card(&self, session: &Session, card: &Card, metadata: Metadata) -> Result<HttpRequest> {
        self.post_json(Some(session), "commit_card", &CommitCardPayload { card, metadata })
    }

    pub fn build_commit_grade(
        &self,
        session: &Session,
        card_id: &CardId,
        grade: &Grade,
        metadata: Metadata,
    ) -> Result<HttpRequest> {
        let payload = ReviewPayload {
            review: ReviewParams { card_id, grade },
            metadata,
        };
        self.post_json(Some(session), "review", &payload)
    }

    pub fn build_upload_media(&self, session: &Session, content: &str, base64: bool) -> Result<HttpRequest> {
        self.post_json(Some(session), "upload_media", &MediaPayload { content, base64 })
    }

    pub fn build_next_two_due(&self, session: &Session, criteria: &Criteria) -> Result<HttpRequest> {
        self.post_json(Some(session), "next_two_due", &criteria_payload(criteria))
    }

    pub fn build_due_count(&self, session: &Session, filters: &Filters) -> Result<HttpRequest> {
        self.post_json(Some(session), "due_count", &FiltersPayload { filters })
    }

    pub fn build_created_count(&self, session: &Session, filters: &Filters) -> Result<HttpRequest> {
        self.post_json(Some(session), "created_count", &FiltersPayload { filters })
    }

    pub fn build_card_list(&self, session: &Session, criteria: &Criteria) -> Result<HttpRequest> {
        self.post_json(Some(session), "cardlist", &criteria_payload(criteria))
    }

    pub fn build_hypothetical_due_dates(&self, session: &Session, card_id: &CardId, date: UnixDay) -> Result<HttpRequest> {
        let query = [("card_id", card_id.to_string()), ("date", date.to_string())];
        self.get(session, "hypothetical_due_dates", &query)
    }

    pub fn build_collection_tags(&self, session: &Session) -> Result<HttpRequest> {
        self.get(session, "collection_tags", &[])
    }

    pub fn build_protected_media(&self, session: &Session, media_id: &MediaId) -> Result<HttpRequest> {
        self.get(session, "get_media", &[("media_id", media_id.to_string())])
    }

    pub fn build_occlusion_data(&self, session: &Session, media_id: &MediaId) -> Result<HttpRequest> {
        self.get(session, "get_occlusion_data", &[("media_id", media_id.to_string())])
    }

    /// The filter set is the whole body here, not wrapped in `{filters}`.
    pub fn build_purge(&self, session: &Session, filters: &Filters) -> Result<HttpRequest> {
        self.post_json(Some(session), "purge", filters)
    }

    pub fn parse_users_list(&self, response: HttpResponse) -> Result<Vec<Value>> {
        decode_json(&response)
    }

    /// Shared by login and registration.
    pub fn parse_token(&self, response: HttpResponse) -> Result<TokenResponse> {
        decode_json(&response)
    }

    /// Merge the server's canonical card onto `card`. On any error `card` is
    /// left as it was.
    pub fn parse_commit_card(&self, response: HttpResponse, card: &mut Card) -> Result<()> {
        let canonical: Card = decode_json(&response)?;
        card.merge_from(canonical);
        Ok(())
    }

    pub fn parse_commit_grade(&self, response: HttpResponse) -> Result<()> {
        check_status(&response)
    }

    pub fn parse_upload_media(&self, response: HttpResponse) -> Result<MediaId> {
        let uploaded: UploadedMedia = decode_json(&response)?;
        Ok(uploaded.media_id)
    }

    pub fn parse_next_two_due(&self, response: HttpResponse) -> Result<NextTwoDue> {
        decode_json(&response)
    }

    pub fn parse_count(&self, response: HttpResponse) -> Result<u64> {
        decode_json(&response)
    }

    pub fn parse_card_list(&self, response: HttpResponse) -> Result<Vec<Card>> {
        decode_json(&response).map_err(|e| ApiError::CardRetrieval(Box::new(e)))
    }

    pub fn parse_hypothetical_due_dates(&self, response: HttpResponse) -> Result<Value> {
        decode_json(&response)
    }

    pub fn parse_collection_tags(&self, response: HttpResponse) -> Result<Vec<String>> {
        decode_json(&response)
    }

    pub fn parse_protected_media(&self, response: HttpResponse) -> Result<MediaBlob> {
        check_status(&response)?;
        Ok(MediaBlob {
            content_type: response.header("content-type").map(str::to_string),
            bytes: response.body,
        })
    }

    /// Occlusion layouts are stored as JSON text inside a media record, so
    /// the response is a JSON string whose contents are JSON again.
    pub fn parse_occlusion_data(&self, response: HttpResponse) -> Result<Value> {
        match decode_json::<Value>(&response)? {
            Value::String(inner) => {
                serde_json::from_str(&inner).map_err(|e| ApiError::Deserialization(e.to_string()))
            }
            other => Ok(other),
        }
    }

    pub fn parse_purge(&self, response: HttpResponse) -> Result<()> {
        check_status(&response)
    }
}

fn criteria_payload(criteria: &Criteria) -> CriteriaPayload<'_> {
    CriteriaPayload {
        crit: SortCrit { sort: &criteria.sort },
        filters: &criteria.filters,
    }
}

/// Any status outside 200..=299 becomes `ApiError::Status`.
fn check_status(response: &HttpResponse) -> Result<()> {
    if response.is_success() {
        return Ok(());
    }
    let reason = ureq::http::StatusCode::from_u16(response.status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown Status");
    Err(ApiError::Status {
        status: response.status,
        reason: reason.to_string(),
        body: String::from_utf8_lossy(&response.body).into_owned(),
    })
}

fn decode_json<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    check_status(response)?;
    serde_json::from_slice(&response.body).map_err(|e| ApiError::Deserialization(e.to_string()))
}
