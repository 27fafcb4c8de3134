use crate::error::Result;
use crate::session::{CookieStore, SessionState};
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

/// Source of booking data.
pub trait BookingClient {
    /// `Ok(None)` when the upstream answered without usable JSON.
    fn fetch_bookings(&mut self) -> Result<Option<Value>>;
}

/// Fetches bookings over HTTP, carrying the session cookies.
pub struct HttpBookingClient {
    http: Client,
    url: String,
    session: SessionState,
}

impl HttpBookingClient {
    pub fn new(url: impl Into<String>, session: SessionState) -> HttpBookingClient {
        HttpBookingClient {
            http: Client::new(),
            url: url.into(),
            session,
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn into_session(self) -> SessionState {
        self.session
    }
}

impl BookingClient for HttpBookingClient {
    fn fetch_bookings(&mut self) -> Result<Option<Value>> {
        let mut request = self.http.get(&self.url);
        if let Some(cookies) = self.session.jar.header_value() {
            request = request.header(COOKIE, cookies);
        }

        let response = request.send()?;

        for header in response.headers().get_all(SET_COOKIE) {
            if let Ok(header) = header.to_str() {
                self.session.jar.absorb_set_cookie(header);
            }
        }

        let status = response.status();
        if status != StatusCode::OK {
            warn!("Bookings endpoint answered {}", status);
            return Ok(None);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.contains("application/json") {
            warn!(
                "Bookings endpoint returned '{}' instead of JSON, is the session cookie still valid?",
                content_type
            );
            return Ok(None);
        }

        Ok(Some(response.json::<Value>()?))
    }
}

/// Wraps an [`HttpBookingClient`] and persists its session after every
/// successful fetch.
pub struct PersistentClient {
    inner: HttpBookingClient,
    store: CookieStore,
}

impl PersistentClient {
    /// Restores the stored session before building the inner client.
    pub fn open(url: impl Into<String>, seed: &str, store: CookieStore) -> PersistentClient {
        let session = store.load(seed);
        PersistentClient {
            inner: HttpBookingClient::new(url, session),
            store,
        }
    }

    pub fn session(&self) -> &SessionState {
        self.inner.session()
    }
}

impl BookingClient for PersistentClient {
    fn fetch_bookings(&mut self) -> Result<Option<Value>> {
        let body = self.inner.fetch_bookings()?;
        if body.is_some() {
            debug!("Saving session cookies");
            self.store.save(self.inner.session());
        }
        Ok(body)
    }
}
