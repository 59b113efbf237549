//! In-memory implementation of the study API for tests and local runs.
//!
//! Every collection is scoped to the user owning the bearer token. Scheduling
//! is a fixed interval per grade; filters understand `tags` only.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use base64::Engine;
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub type CardFields = Map<String, Value>;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Metadata {
    pub seconds: u32,
    pub date: i64,
}

#[derive(Deserialize)]
pub struct CommitCard {
    pub card: CardFields,
    pub metadata: Metadata,
}

#[derive(Deserialize)]
pub struct ReviewParams {
    pub card_id: Value,
    pub grade: String,
}

#[derive(Deserialize)]
pub struct ReviewRequest {
    pub review: ReviewParams,
    pub metadata: Metadata,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReviewRecord {
    pub card_id: u64,
    pub grade: String,
    pub seconds: u32,
    pub date: i64,
}

#[derive(Deserialize)]
pub struct UploadMedia {
    pub content: String,
    #[serde(default = "default_base64")]
    pub base64: bool,
}

fn default_base64() -> bool {
    true
}

#[derive(Default, Deserialize)]
pub struct Crit {
    #[serde(default)]
    pub sort: Value,
}

#[derive(Deserialize)]
pub struct Listing {
    #[serde(default)]
    pub crit: Crit,
    #[serde(default)]
    pub filters: Value,
}

#[derive(Deserialize)]
pub struct Counting {
    #[serde(default)]
    pub filters: Value,
}

#[derive(Deserialize)]
pub struct HypotheticalQuery {
    pub card_id: String,
    pub date: i64,
}

#[derive(Deserialize)]
pub struct MediaQuery {
    pub media_id: i64,
}

#[derive(Debug, Default)]
pub struct Collection {
    pub cards: BTreeMap<u64, CardFields>,
    pub reviews: Vec<ReviewRecord>,
    pub media: HashMap<i64, Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct Store {
    pub users: HashMap<String, String>,
    pub tokens: HashMap<String, String>,
    pub collections: HashMap<String, Collection>,
    next_card_id: u64,
    next_media_id: i64,
}

impl Store {
    /// Register `username` directly, bypassing the HTTP endpoint.
    pub fn add_user(&mut self, username: &str, password: &str) {
        self.users.insert(username.to_string(), password.to_string());
    }

    fn issue_token(&mut self, username: &str) -> TokenResponse {
        let access_token = Uuid::new_v4().simple().to_string();
        self.tokens.insert(access_token.clone(), username.to_string());
        TokenResponse {
            access_token,
            token_type: "bearer".to_string(),
        }
    }
}

pub type Db = Arc<RwLock<Store>>;

pub fn app() -> Router {
    app_with_state(Db::default())
}

pub fn app_with_state(db: Db) -> Router {
    Router::new()
        .route("/auth/users_list", get(users_list))
        .route("/auth/token", post(login))
        .route("/auth/register", post(register))
        .route("/commit_card", post(commit_card))
        .route("/review", post(review))
        .route("/upload_media", post(upload_media))
        .route("/next_two_due", post(next_two_due))
        .route("/due_count", post(due_count))
        .route("/created_count", post(created_count))
        .route("/cardlist", post(cardlist))
        .route("/hypothetical_due_dates", get(hypothetical_due_dates))
        .route("/collection_tags", get(collection_tags))
        .route("/get_media", get(get_media))
        .route("/get_occlusion_data", get(get_occlusion_data))
        .route("/purge", post(purge))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "mock study API listening");
    }
    axum::serve(listener, app()).await
}

/// Days since the epoch in the server's local time zone.
pub fn today() -> i64 {
    let now = Local::now();
    (now.timestamp() + i64::from(now.offset().local_minus_utc())).div_euclid(86_400)
}

/// Days until the next review for a grade.
pub fn interval(grade: &str) -> i64 {
    match grade {
        "again" => 0,
        "hard" => 1,
        "good" => 3,
        "easy" => 7,
        _ => 1,
    }
}

async fn authorize(db: &Db, headers: &HeaderMap) -> Result<String, StatusCode> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;
    db.read()
        .await
        .tokens
        .get(token)
        .cloned()
        .ok_or(StatusCode::UNAUTHORIZED)
}

fn parse_card_id(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn card_tags(card: &CardFields) -> impl Iterator<Item = &str> {
    card.get("tags")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}

/// A card matches when the filter names no tags or shares at least one.
fn matches_filters(card: &CardFields, filters: &Value) -> bool {
    let wanted: Vec<&str> = filters
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| tags.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    wanted.is_empty() || card_tags(card).any(|t| wanted.contains(&t))
}

fn is_due(card: &CardFields, today: i64) -> bool {
    card.get("due_date")
        .and_then(Value::as_i64)
        .is_some_and(|d| d <= today)
}

fn compare_field(a: &CardFields, b: &CardFields, field: &str) -> Ordering {
    match (a.get(field), b.get(field)) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// `sort` is a field name, `-` prefixed for descending. Anything else keeps
/// id order.
fn sort_cards(cards: &mut [CardFields], sort: &Value) {
    let Some(key) = sort.as_str() else {
        return;
    };
    let (field, descending) = match key.strip_prefix('-') {
        Some(field) => (field, true),
        None => (key, false),
    };
    cards.sort_by(|a, b| {
        let ord = compare_field(a, b, field);
        if descending {
            ord.reverse()
        } else {
            ord
        }
    });
}

async fn users_list(State(db): State<Db>, headers: HeaderMap) -> Result<Json<Vec<String>>, StatusCode> {
    authorize(&db, &headers).await?;
    let store = db.read().await;
    let mut users: Vec<String> = store.users.keys().cloned().collect();
    users.sort();
    Ok(Json(users))
}

async fn login(State(db): State<Db>, Form(input): Form<Credentials>) -> Result<Json<TokenResponse>, StatusCode> {
    let mut store = db.write().await;
    if store.users.get(&input.username) != Some(&input.password) {
        debug!(username = %input.username, "login rejected");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(Json(store.issue_token(&input.username)))
}

async fn register(State(db): State<Db>, Json(input): Json<Credentials>) -> Result<Json<TokenResponse>, StatusCode> {
    if input.username.is_empty() || input.password.is_empty() {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    let mut store = db.write().await;
    if store.users.contains_key(&input.username) {
        return Err(StatusCode::CONFLICT);
    }
    store.add_user(&input.username, &input.password);
    Ok(Json(store.issue_token(&input.username)))
}

/// Insert or update a card. Ids the server never issued are treated as
/// temporary and replaced.
async fn commit_card(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(input): Json<CommitCard>,
) -> Result<Json<CardFields>, StatusCode> {
    let user = authorize(&db, &headers).await?;
    let mut store = db.write().await;
    let existing = input
        .card
        .get("id")
        .and_then(parse_card_id)
        .filter(|id| {
            store
                .collections
                .get(&user)
                .is_some_and(|c| c.cards.contains_key(id))
        });

    let id = match existing {
        Some(id) => id,
        None => {
            store.next_card_id += 1;
            store.next_card_id
        }
    };
    let collection = store.collections.entry(user).or_default();
    let mut card = collection.cards.remove(&id).unwrap_or_else(|| {
        let mut fresh = CardFields::new();
        fresh.insert("create_date".to_string(), json!(input.metadata.date));
        fresh.insert("due_date".to_string(), json!(input.metadata.date));
        fresh
    });
    for (key, value) in input.card {
        card.insert(key, value);
    }
    card.insert("id".to_string(), Value::String(id.to_string()));
    card.insert("edit_date".to_string(), json!(input.metadata.date));
    collection.cards.insert(id, card.clone());
    Ok(Json(card))
}

async fn review(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(input): Json<ReviewRequest>,
) -> Result<StatusCode, StatusCode> {
    let user = authorize(&db, &headers).await?;
    let id = parse_card_id(&input.review.card_id).ok_or(StatusCode::UNPROCESSABLE_ENTITY)?;
    let mut store = db.write().await;
    let collection = store.collections.get_mut(&user).ok_or(StatusCode::NOT_FOUND)?;
    let card = collection.cards.get_mut(&id).ok_or(StatusCode::NOT_FOUND)?;
    let due = input.metadata.date + interval(&input.review.grade);
    card.insert("due_date".to_string(), json!(due));
    collection.reviews.push(ReviewRecord {
        card_id: id,
        grade: input.review.grade,
        seconds: input.metadata.seconds,
        date: input.metadata.date,
    });
    Ok(StatusCode::OK)
}

async fn upload_media(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(input): Json<UploadMedia>,
) -> Result<Json<Value>, StatusCode> {
    let user = authorize(&db, &headers).await?;
    let bytes = if input.base64 {
        base64::engine::general_purpose::STANDARD
            .decode(input.content.as_bytes())
            .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?
    } else {
        input.content.into_bytes()
    };
    let mut store = db.write().await;
    store.next_media_id += 1;
    let media_id = store.next_media_id;
    store
        .collections
        .entry(user)
        .or_default()
        .media
        .insert(media_id, bytes);
    Ok(Json(json!({ "media_id": media_id })))
}

async fn matching_cards(db: &Db, user: &str, filters: &Value) -> Vec<CardFields> {
    let store = db.read().await;
    store
        .collections
        .get(user)
        .map(|c| {
            c.cards
                .values()
                .filter(|card| matches_filters(card, filters))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

async fn next_two_due(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(input): Json<Listing>,
) -> Result<Json<Vec<Option<CardFields>>>, StatusCode> {
    let user = authorize(&db, &headers).await?;
    let today = today();
    let mut due: Vec<CardFields> = matching_cards(&db, &user, &input.filters)
        .await
        .into_iter()
        .filter(|card| is_due(card, today))
        .collect();
    let sort = if input.crit.sort.is_null() {
        Value::String("due_date".to_string())
    } else {
        input.crit.sort
    };
    sort_cards(&mut due, &sort);
    let mut due = due.into_iter();
    Ok(Json(vec![due.next(), due.next()]))
}

async fn due_count(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(input): Json<Counting>,
) -> Result<Json<usize>, StatusCode> {
    let user = authorize(&db, &headers).await?;
    let today = today();
    let cards = matching_cards(&db, &user, &input.filters).await;
    Ok(Json(cards.iter().filter(|card| is_due(card, today)).count()))
}

async fn created_count(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(input): Json<Counting>,
) -> Result<Json<usize>, StatusCode> {
    let user = authorize(&db, &headers).await?;
    Ok(Json(matching_cards(&db, &user, &input.filters).await.len()))
}

async fn cardlist(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(input): Json<Listing>,
) -> Result<Json<Vec<CardFields>>, StatusCode> {
    let user = authorize(&db, &headers).await?;
    let mut cards = matching_cards(&db, &user, &input.filters).await;
    sort_cards(&mut cards, &input.crit.sort);
    Ok(Json(cards))
}

async fn hypothetical_due_dates(
    State(db): State<Db>,
    headers: HeaderMap,
    Query(query): Query<HypotheticalQuery>,
) -> Result<Json<Value>, StatusCode> {
    let user = authorize(&db, &headers).await?;
    let id: u64 = query.card_id.parse().map_err(|_| StatusCode::NOT_FOUND)?;
    let store = db.read().await;
    let known = store
        .collections
        .get(&user)
        .is_some_and(|c| c.cards.contains_key(&id));
    if !known {
        return Err(StatusCode::NOT_FOUND);
    }
    let dates: Map<String, Value> = ["again", "hard", "good", "easy"]
        .into_iter()
        .map(|grade| (grade.to_string(), json!(query.date + interval(grade))))
        .collect();
    Ok(Json(Value::Object(dates)))
}

async fn collection_tags(State(db): State<Db>, headers: HeaderMap) -> Result<Json<Vec<String>>, StatusCode> {
    let user = authorize(&db, &headers).await?;
    let store = db.read().await;
    let tags: BTreeSet<String> = store
        .collections
        .get(&user)
        .map(|c| {
            c.cards
                .values()
                .flat_map(card_tags)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Ok(Json(tags.into_iter().collect()))
}

async fn media_bytes(db: &Db, user: &str, media_id: i64) -> Result<Vec<u8>, StatusCode> {
    let store = db.read().await;
    store
        .collections
        .get(user)
        .and_then(|c| c.media.get(&media_id))
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_media(
    State(db): State<Db>,
    headers: HeaderMap,
    Query(query): Query<MediaQuery>,
) -> Result<Response, StatusCode> {
    let user = authorize(&db, &headers).await?;
    let bytes = media_bytes(&db, &user, query.media_id).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response())
}

/// Occlusion layouts are returned as a JSON string holding the stored JSON.
async fn get_occlusion_data(
    State(db): State<Db>,
    headers: HeaderMap,
    Query(query): Query<MediaQuery>,
) -> Result<Json<String>, StatusCode> {
    let user = authorize(&db, &headers).await?;
    let bytes = media_bytes(&db, &user, query.media_id).await?;
    Ok(Json(String::from_utf8_lossy(&bytes).into_owned()))
}

async fn purge(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(filters): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let user = authorize(&db, &headers).await?;
    let mut store = db.write().await;
    let deleted = match store.collections.get_mut(&user) {
        Some(collection) => {
            let before = collection.cards.len();
            collection.cards.retain(|_, card| !matches_filters(card, &filters));
            before - collection.cards.len()
        }
        None => 0,
    };
    Ok(Json(json!({ "deleted": deleted })))
}
