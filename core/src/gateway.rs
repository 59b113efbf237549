//! Remote service gateway: builds a request, executes it, checks the status
//! and decodes the body in one call.
//!
//! # Design
//! `Gateway` glues the stateless `VincaClient` to a `Transport` and a
//! `CredentialStore`. Every operation returns a typed `Result`; nothing is
//! reported to the user from here. Login and registration are the only
//! operations that write to the store, and they write only after the server
//! accepted the credentials.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::VincaClient;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::http::{HttpRequest, HttpResponse};
use crate::session::{Credential, CredentialStore, FileCredentialStore, Session};
use crate::transport::{Transport, UreqTransport};
use crate::types::{
    Card, CardId, Criteria, Filters, Grade, MediaBlob, MediaId, Metadata, NextTwoDue, UnixDay,
};

pub struct Gateway<T = UreqTransport, S = FileCredentialStore> {
    client: VincaClient,
    transport: T,
    store: S,
}

impl Gateway<UreqTransport, FileCredentialStore> {
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Ok(Self::new(
            VincaClient::new(&config.base_url)?,
            UreqTransport::new(),
            FileCredentialStore::new(&config.credentials_path),
        ))
    }
}

impl<T: Transport, S: CredentialStore> Gateway<T, S> {
    pub fn new(client: VincaClient, transport: T, store: S) -> Self {
        Self {
            client,
            transport,
            store,
        }
    }

    pub fn client(&self) -> &VincaClient {
        &self.client
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!(method = request.method.as_str(), url = %request.url, "sending request");
        let response = self.transport.execute(&request)?;
        debug!(url = %request.url, status = response.status, "response received");
        Ok(response)
    }

    /// Single place where failed operations are logged.
    fn report<R>(operation: &'static str, result: Result<R>) -> Result<R> {
        if let Err(e) = &result {
            warn!(operation, error = %e, "request failed");
        }
        result
    }

    pub fn users_list(&self, session: &Session) -> Result<Vec<Value>> {
        let result = self
            .client
            .build_users_list(session)
            .and_then(|req| self.send(req))
            .and_then(|resp| self.client.parse_users_list(resp));
        Self::report("users_list", result)
    }

    /// Exchange username and password for a token and persist it.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Session> {
        let result = self
            .client
            .build_login(username, password)
            .and_then(|req| self.send(req))
            .and_then(|resp| self.client.parse_token(resp))
            .and_then(|token| self.start_session(username, token.access_token));
        Self::report("authenticate", result)
    }

    /// Create an account and persist the token it comes with.
    pub fn register(&self, username: &str, password: &str) -> Result<Session> {
        let result = self
            .client
            .build_register(username, password)
            .and_then(|req| self.send(req))
            .and_then(|resp| self.client.parse_token(resp))
            .and_then(|token| self.start_session(username, token.access_token));
        Self::report("register", result)
    }

    fn start_session(&self, username: &str, access_token: String) -> Result<Session> {
        let credential = Credential {
            access_token,
            username: username.to_string(),
        };
        self.store.save(&credential)?;
        info!(username, "session started");
        Ok(Session::new(credential))
    }

    /// Session from a previously persisted credential, if any.
    pub fn restore_session(&self) -> Result<Option<Session>> {
        Ok(self.store.load()?.map(Session::new))
    }

    pub fn logout(&self) -> Result<()> {
        self.store.clear()
    }

    /// Save `card` and merge the server's canonical record back onto it.
    /// A new card's temporary id is replaced by the server-assigned one.
    pub fn commit_card(&self, session: &Session, card: &mut Card, seconds: u32) -> Result<()> {
        let result = self
            .client
            .build_commit_card(session, card, Metadata::today(seconds))
            .and_then(|req| self.send(req))
            .and_then(|resp| self.client.parse_commit_card(resp, card));
        Self::report("commit_card", result)
    }

    pub fn commit_grade(&self, session: &Session, card_id: &CardId, grade: &Grade, seconds: u32) -> Result<()> {
        let result = self
            .client
            .build_commit_grade(session, card_id, grade, Metadata::today(seconds))
            .and_then(|req| self.send(req))
            .and_then(|resp| self.client.parse_commit_grade(resp));
        Self::report("commit_grade", result)
    }

    pub fn upload_media(&self, session: &Session, content: &str, base64: bool) -> Result<MediaId> {
        let result = self
            .client
            .build_upload_media(session, content, base64)
            .and_then(|req| self.send(req))
            .and_then(|resp| self.client.parse_upload_media(resp));
        Self::report("upload_media", result)
    }

    pub fn next_two_due(&self, session: &Session, criteria: &Criteria) -> Result<NextTwoDue> {
        let result = self
            .client
            .build_next_two_due(session, criteria)
            .and_then(|req| self.send(req))
            .and_then(|resp| self.client.parse_next_two_due(resp));
        Self::report("next_two_due", result)
    }

    pub fn due_count(&self, session: &Session, filters: &Filters) -> Result<u64> {
        let result = self
            .client
            .build_due_count(session, filters)
            .and_then(|req| self.send(req))
            .and_then(|resp| self.client.parse_count(resp));
        Self::report("due_count", result)
    }

    pub fn created_count(&self, session: &Session, filters: &Filters) -> Result<u64> {
        let result = self
            .client
            .build_created_count(session, filters)
            .and_then(|req| self.send(req))
            .and_then(|resp| self.client.parse_count(resp));
        Self::report("created_count", result)
    }

    pub fn card_list(&self, session: &Session, criteria: &Criteria) -> Result<Vec<Card>> {
        let result = self
            .client
            .build_card_list(session, criteria)
            .and_then(|req| self.send(req))
            .and_then(|resp| self.client.parse_card_list(resp));
        Self::report("card_list", result)
    }

    pub fn collection_tags(&self, session: &Session) -> Result<Vec<String>> {
        let result = self
            .client
            .build_collection_tags(session)
            .and_then(|req| self.send(req))
            .and_then(|resp| self.client.parse_collection_tags(resp));
        Self::report("collection_tags", result)
    }

    pub fn hypothetical_due_dates(&self, session: &Session, card_id: &CardId, date: UnixDay) -> Result<Value> {
        let result = self
            .client
            .build_hypothetical_due_dates(session, card_id, date)
            .and_then(|req| self.send(req))
            .and_then(|resp| self.client.parse_hypothetical_due_dates(resp));
        Self::report("hypothetical_due_dates", result)
    }

    pub fn protected_media(&self, session: &Session, media_id: &MediaId) -> Result<MediaBlob> {
        let result = self
            .client
            .build_protected_media(session, media_id)
            .and_then(|req| self.send(req))
            .and_then(|resp| self.client.parse_protected_media(resp));
        Self::report("protected_media", result)
    }

    pub fn occlusion_data(&self, session: &Session, media_id: &MediaId) -> Result<Value> {
        let result = self
            .client
            .build_occlusion_data(session, media_id)
            .and_then(|req| self.send(req))
            .and_then(|resp| self.client.parse_occlusion_data(resp));
        Self::report("occlusion_data", result)
    }

    pub fn purge(&self, session: &Session, filters: &Filters) -> Result<()> {
        let result = self
            .client
            .build_purge(session, filters)
            .and_then(|req| self.send(req))
            .and_then(|resp| self.client.parse_purge(resp));
        Self::report("purge", result)
    }
}
