//! In-memory emulation of the Open Cloud endpoints the engine uses.
//!
//! [`MemoryRemote`] implements [`HttpTransport`] over local maps: standard
//! datastores, memory-store sorted maps, and the username lookup endpoint.
//! Faults (arbitrary statuses, 429s) can be scripted per route and key, and
//! every call is recorded for assertions. Available under `cfg(test)` and
//! the `test-util` feature.
//!
//! Keys are listed in lexicographic order and the cursor is the last key of
//! the previous page, so deleting keys between pages never skips entries.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use http::{Method, StatusCode};
use parking_lot::Mutex;
use serde_json::{json, Value};
use sweep_core::EntryValue;

use super::{HttpRequest, HttpResponse, HttpTransport, API_KEY_HEADER};
use crate::config::MAX_PAGE_LIMIT;
use crate::error::SweepError;

/// Endpoint family a request was routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    ListEntries,
    Entry,
    SortedMapEntry { map_name: String },
    Usernames,
    Unknown,
}

impl Route {
    fn of(url: &str) -> Self {
        let path = url.split('?').next().unwrap_or(url);
        if path.ends_with("/standard-datastores/datastore/entries") {
            Self::ListEntries
        } else if path.ends_with("/standard-datastores/datastore/entries/entry") {
            Self::Entry
        } else if let Some(rest) = path
            .split_once("/sorted-maps/")
            .map(|(_, rest)| rest)
            .filter(|rest| rest.ends_with("/entries/entry"))
        {
            Self::SortedMapEntry {
                map_name: rest.trim_end_matches("/entries/entry").to_string(),
            }
        } else if path.ends_with("/v1/usernames/users") {
            Self::Usernames
        } else {
            Self::Unknown
        }
    }
}

/// A call observed by the remote, with the status it answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub method: Method,
    pub route: Route,
    pub store: Option<String>,
    pub key: Option<String>,
    pub cursor: Option<String>,
    pub status: StatusCode,
}

/// A scripted failure returned instead of the normal response.
#[derive(Debug, Clone)]
pub struct Fault {
    method: Method,
    list: bool,
    store: String,
    key: Option<String>,
    cursor: Option<String>,
    status: StatusCode,
    body: String,
    remaining: usize,
}

impl Fault {
    /// Fault on list-entries calls for `store`.
    #[must_use]
    pub fn list(store: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            list: true,
            store: store.into(),
            key: None,
            cursor: None,
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: "injected failure".to_string(),
            remaining: 1,
        }
    }

    /// Fault on entry calls with `method` for `store`/`key`.
    #[must_use]
    pub fn entry(method: Method, store: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            method,
            list: false,
            store: store.into(),
            key: Some(key.into()),
            cursor: None,
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: "injected failure".to_string(),
            remaining: 1,
        }
    }

    /// Restricts a list fault to calls carrying `cursor`.
    #[must_use]
    pub fn at_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    #[must_use]
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Number of matching calls the fault applies to. Defaults to one.
    #[must_use]
    pub fn times(mut self, times: usize) -> Self {
        self.remaining = times;
        self
    }

    /// Shorthand for a 429 fault.
    #[must_use]
    pub fn rate_limited(self) -> Self {
        self.status(StatusCode::TOO_MANY_REQUESTS).body("too many requests")
    }

    fn matches(&self, req: &HttpRequest, route: &Route) -> bool {
        if self.remaining == 0 || self.method != req.method {
            return false;
        }
        let route_matches = match route {
            Route::ListEntries => self.list,
            Route::Entry => !self.list,
            _ => false,
        };
        route_matches
            && req.query_value("datastoreName") == Some(self.store.as_str())
            && (self.key.is_none() || req.query_value("entryKey") == self.key.as_deref())
            && (self.cursor.is_none() || req.query_value("cursor") == self.cursor.as_deref())
    }
}

#[derive(Debug, Default)]
struct RemoteState {
    stores: BTreeMap<String, BTreeMap<String, EntryValue>>,
    sorted_maps: BTreeMap<String, BTreeMap<String, (Value, i64)>>,
    users: HashMap<String, u64>,
    faults: Vec<Fault>,
    calls: Vec<RecordedCall>,
}

/// In-memory Open Cloud emulation.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
    api_key: Option<String>,
}

impl MemoryRemote {
    /// Remote that accepts any (or no) API key.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote that answers 401 unless requests carry `api_key`.
    #[must_use]
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            state: Mutex::default(),
            api_key: Some(api_key.into()),
        }
    }

    pub fn insert_json(&self, store: &str, key: &str, value: Value) {
        self.insert(store, key, EntryValue::Json(value));
    }

    pub fn insert_text(&self, store: &str, key: &str, value: impl Into<String>) {
        self.insert(store, key, EntryValue::Text(value.into()));
    }

    pub fn insert(&self, store: &str, key: &str, value: EntryValue) {
        self.state
            .lock()
            .stores
            .entry(store.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn add_user(&self, username: &str, user_id: u64) {
        self.state.lock().users.insert(username.to_lowercase(), user_id);
    }

    /// Queues a scripted fault. Faults are consumed in insertion order.
    pub fn inject(&self, fault: Fault) {
        self.state.lock().faults.push(fault);
    }

    #[must_use]
    pub fn entry(&self, store: &str, key: &str) -> Option<EntryValue> {
        self.state
            .lock()
            .stores
            .get(store)
            .and_then(|entries| entries.get(key))
            .cloned()
    }

    #[must_use]
    pub fn keys(&self, store: &str) -> Vec<String> {
        self.state
            .lock()
            .stores
            .get(store)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Record and sort key stored in a sorted map.
    #[must_use]
    pub fn ranked(&self, map_name: &str, key: &str) -> Option<(Value, i64)> {
        self.state
            .lock()
            .sorted_maps
            .get(map_name)
            .and_then(|entries| entries.get(key))
            .cloned()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    /// Number of recorded calls with `method` on `route`.
    #[must_use]
    pub fn count_calls(&self, method: &Method, route: &Route) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| &c.method == method && &c.route == route)
            .count()
    }

    fn handle(state: &mut RemoteState, req: &HttpRequest, route: &Route) -> HttpResponse {
        match (route, &req.method) {
            (Route::ListEntries, &Method::GET) => Self::list_entries(state, req),
            (Route::Entry, &Method::GET) => Self::get_entry(state, req),
            (Route::Entry, &Method::POST) => Self::set_entry(state, req),
            (Route::Entry, &Method::DELETE) => Self::delete_entry(state, req),
            (Route::SortedMapEntry { map_name }, &Method::POST) => {
                Self::upsert_sorted(state, map_name, req)
            }
            (Route::Usernames, &Method::POST) => Self::lookup_users(state, req),
            (Route::Unknown, _) => HttpResponse::text(StatusCode::NOT_FOUND, "no such endpoint"),
            _ => HttpResponse::text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
        }
    }

    fn list_entries(state: &RemoteState, req: &HttpRequest) -> HttpResponse {
        let Some(store) = req.query_value("datastoreName").filter(|s| !s.is_empty()) else {
            return bad_request("datastoreName is required");
        };
        let limit = match req.query_value("limit").map(str::parse::<usize>) {
            None => MAX_PAGE_LIMIT as usize,
            Some(Ok(limit)) if (1..=MAX_PAGE_LIMIT as usize).contains(&limit) => limit,
            Some(_) => return bad_request("limit must be between 1 and 100"),
        };
        let lower = match req.query_value("cursor") {
            Some(cursor) if !cursor.is_empty() => Bound::Excluded(cursor.to_string()),
            _ => Bound::Unbounded,
        };

        let empty = BTreeMap::new();
        let entries = state.stores.get(store).unwrap_or(&empty);
        let mut remaining = entries.range((lower, Bound::Unbounded)).map(|(k, _)| k);
        let keys: Vec<&String> = remaining.by_ref().take(limit).collect();
        let more = remaining.next().is_some();

        let mut body = json!({
            "keys": keys.iter().map(|k| json!({"key": k})).collect::<Vec<_>>(),
        });
        if more {
            if let Some(last) = keys.last() {
                body["nextPageCursor"] = json!(last);
            }
        }
        HttpResponse::json(StatusCode::OK, &body)
    }

    fn get_entry(state: &RemoteState, req: &HttpRequest) -> HttpResponse {
        let (store, key) = match entry_params(req) {
            Ok(params) => params,
            Err(response) => return response,
        };
        match state.stores.get(store).and_then(|entries| entries.get(key)) {
            Some(EntryValue::Json(value)) => HttpResponse::json(StatusCode::OK, value),
            Some(EntryValue::Text(text)) => HttpResponse::text(StatusCode::OK, text.clone()),
            None => not_found(),
        }
    }

    fn set_entry(state: &mut RemoteState, req: &HttpRequest) -> HttpResponse {
        let (store, key) = match entry_params(req) {
            Ok((store, key)) => (store.to_string(), key.to_string()),
            Err(response) => return response,
        };
        let Some(body) = req.body.clone() else {
            return bad_request("entry body is required");
        };
        state
            .stores
            .entry(store)
            .or_default()
            .insert(key, EntryValue::Json(body));
        HttpResponse::json(StatusCode::OK, &json!({"version": "1"}))
    }

    fn delete_entry(state: &mut RemoteState, req: &HttpRequest) -> HttpResponse {
        let (store, key) = match entry_params(req) {
            Ok(params) => params,
            Err(response) => return response,
        };
        let removed = state
            .stores
            .get_mut(store)
            .and_then(|entries| entries.remove(key));
        match removed {
            Some(_) => HttpResponse::empty(StatusCode::NO_CONTENT),
            None => not_found(),
        }
    }

    fn upsert_sorted(state: &mut RemoteState, map_name: &str, req: &HttpRequest) -> HttpResponse {
        let Some(body) = &req.body else {
            return bad_request("body is required");
        };
        let (Some(key), Some(sort_key)) = (
            body.get("key").and_then(Value::as_str),
            body.get("sortKey").and_then(Value::as_i64),
        ) else {
            return bad_request("key and sortKey are required");
        };
        let value = body.get("value").cloned().unwrap_or(Value::Null);
        state
            .sorted_maps
            .entry(map_name.to_string())
            .or_default()
            .insert(key.to_string(), (value, sort_key));
        HttpResponse::json(StatusCode::OK, body)
    }

    fn lookup_users(state: &RemoteState, req: &HttpRequest) -> HttpResponse {
        let names = req
            .body
            .as_ref()
            .and_then(|b| b.get("usernames"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let data: Vec<Value> = names
            .iter()
            .filter_map(Value::as_str)
            .filter_map(|name| {
                state
                    .users
                    .get(&name.to_lowercase())
                    .map(|id| json!({"requestedUsername": name, "name": name, "id": id}))
            })
            .collect();
        HttpResponse::json(StatusCode::OK, &json!({ "data": data }))
    }
}

fn bad_request(message: &str) -> HttpResponse {
    HttpResponse::json(
        StatusCode::BAD_REQUEST,
        &json!({"error": "INVALID_ARGUMENT", "message": message}),
    )
}

fn not_found() -> HttpResponse {
    HttpResponse::json(
        StatusCode::NOT_FOUND,
        &json!({"error": "NOT_FOUND", "message": "Entry not found in the datastore."}),
    )
}

fn entry_params(req: &HttpRequest) -> Result<(&str, &str), HttpResponse> {
    match (req.query_value("datastoreName"), req.query_value("entryKey")) {
        (Some(store), Some(key)) if !store.is_empty() => Ok((store, key)),
        _ => Err(bad_request("datastoreName and entryKey are required")),
    }
}

#[async_trait]
impl HttpTransport for MemoryRemote {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SweepError> {
        let route = Route::of(&request.url);
        let mut state = self.state.lock();

        let unauthorized = matches!(
            route,
            Route::ListEntries | Route::Entry | Route::SortedMapEntry { .. }
        ) && self
            .api_key
            .as_deref()
            .is_some_and(|expected| request.header_value(API_KEY_HEADER) != Some(expected));

        let injected = state
            .faults
            .iter_mut()
            .find(|fault| fault.matches(&request, &route))
            .map(|fault| {
                fault.remaining -= 1;
                HttpResponse::text(fault.status, fault.body.clone())
            });

        let response = if unauthorized {
            HttpResponse::json(StatusCode::UNAUTHORIZED, &json!({"error": "UNAUTHENTICATED"}))
        } else if let Some(response) = injected {
            response
        } else {
            Self::handle(&mut state, &request, &route)
        };

        state.calls.push(RecordedCall {
            method: request.method.clone(),
            route,
            store: request.query_value("datastoreName").map(str::to_string),
            key: request.query_value("entryKey").map(str::to_string),
            cursor: request.query_value("cursor").map(str::to_string),
            status: response.status,
        });
        Ok(response)
    }
}
