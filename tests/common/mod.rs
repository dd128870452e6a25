#![allow(dead_code)]

use agora::api::{
    auth::password::PasswordHasher,
    email::{EmailMessage, EmailSender},
    router,
    state::{AppState, AuthConfig},
    store::MemoryStore,
};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use secrecy::SecretString;
use serde_json::Value;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};
use tower::ServiceExt;

pub const ADMIN_EMAIL: &str = "root@agora.dev";
pub const PASSWORD: &str = "correct horse";

/// Captures every message instead of delivering it.
#[derive(Default)]
pub struct Outbox {
    sent: Mutex<Vec<EmailMessage>>,
}

impl Outbox {
    pub fn messages(&self) -> Vec<EmailMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// Last path segment of the newest link sent to `to_email`.
    pub fn last_token_for(&self, to_email: &str) -> Option<String> {
        self.messages()
            .into_iter()
            .rev()
            .find(|message| message.to_email == to_email)
            .and_then(|message| message.action_url.rsplit('/').next().map(str::to_string))
    }
}

impl EmailSender for Outbox {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow!("outbox poisoned"))?
            .push(message.clone());
        Ok(())
    }
}

/// A router over an in-memory store with a cookie jar, like a single browser.
pub struct TestApp {
    pub router: Router,
    pub outbox: Arc<Outbox>,
    pub cookies: BTreeMap<String, String>,
}

pub struct Page {
    pub status: StatusCode,
    pub location: Option<String>,
    pub set_cookies: Vec<String>,
    pub body: Value,
}

impl Page {
    /// Messages flashed for the next request, decoded from `Set-Cookie`.
    pub fn flashed(&self) -> Vec<String> {
        self.set_cookies
            .iter()
            .filter_map(|cookie| cookie.strip_prefix("agora_flash="))
            .filter_map(|rest| rest.split(';').next())
            .filter(|value| !value.is_empty())
            .filter_map(|value| Base64UrlUnpadded::decode_vec(value).ok())
            .filter_map(|bytes| serde_json::from_slice::<Vec<String>>(&bytes).ok())
            .flatten()
            .collect()
    }

    pub fn view(&self) -> Option<&str> {
        self.body.get("view").and_then(Value::as_str)
    }

    pub fn flashes(&self) -> Vec<String> {
        self.body
            .get("flashes")
            .and_then(|flashes| serde_json::from_value(flashes.clone()).ok())
            .unwrap_or_default()
    }

    pub fn error(&self, field: &str) -> Option<String> {
        self.body
            .pointer(&format!("/errors/{field}/0"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

impl TestApp {
    pub fn new() -> Result<Self> {
        Self::with_config(AuthConfig::new("http://localhost:8080".to_string()))
    }

    pub fn with_config(config: AuthConfig) -> Result<Self> {
        let outbox = Arc::new(Outbox::default());
        let state = AppState::new(
            config.with_admin_email(Some(ADMIN_EMAIL.to_string())),
            SecretString::from("integration-secret"),
            Arc::new(MemoryStore::new()),
            outbox.clone(),
        )
        .with_password_hasher(PasswordHasher::with_params(1024, 1, 1)?);

        Ok(Self {
            router: router(Arc::new(state)),
            outbox,
            cookies: BTreeMap::new(),
        })
    }

    pub fn session_cookie(&self) -> Option<String> {
        self.cookies.get("agora_session").cloned()
    }

    pub async fn get(&mut self, uri: &str) -> Result<Page> {
        let request = self.request("GET", uri).body(Body::empty())?;
        self.send(request).await
    }

    pub async fn post_form(&mut self, uri: &str, fields: &[(&str, &str)]) -> Result<Page> {
        let body = serde_urlencoded_body(fields);
        let request = self
            .request("POST", uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))?;
        self.send(request).await
    }

    pub async fn post_multipart(
        &mut self,
        uri: &str,
        fields: &[(&str, &str)],
        file: Option<&[u8]>,
    ) -> Result<Page> {
        let boundary = "agora-test-boundary";
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some(bytes) = file {
            body.extend_from_slice(
                format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"topic.png\"\r\nContent-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

        let request = self
            .request("POST", uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))?;
        self.send(request).await
    }

    /// Register, confirm with the mailed token and stay signed in.
    pub async fn sign_up_confirmed(&mut self, email: &str, username: &str) -> Result<()> {
        let page = self.register(email, username).await?;
        anyhow::ensure!(page.status == StatusCode::SEE_OTHER, "register failed: {}", page.body);
        self.sign_in(email, PASSWORD, false).await?;
        let token = self
            .outbox
            .last_token_for(email)
            .context("no confirmation mail")?;
        let page = self.get(&format!("/confirm/{token}")).await?;
        anyhow::ensure!(
            page.flashed().iter().any(|msg| msg.contains("confirmed")),
            "confirmation failed"
        );
        Ok(())
    }

    pub async fn register(&mut self, email: &str, username: &str) -> Result<Page> {
        self.post_form(
            "/login",
            &[
                ("submit", "register"),
                ("email", email),
                ("username", username),
                ("password", PASSWORD),
                ("password2", PASSWORD),
            ],
        )
        .await
    }

    pub async fn sign_in(&mut self, email: &str, password: &str, remember: bool) -> Result<Page> {
        let mut fields = vec![("submit", "login"), ("email", email), ("password", password)];
        if remember {
            fields.push(("remember_me", "y"));
        }
        self.post_form("/login", &fields).await
    }

    fn request(&self, method: &str, uri: &str) -> axum::http::request::Builder {
        let builder = Request::builder().method(method).uri(uri);
        if self.cookies.is_empty() {
            return builder;
        }
        let cookie = self
            .cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        builder.header(header::COOKIE, cookie)
    }

    async fn send(&mut self, request: Request<Body>) -> Result<Page> {
        let response = self.router.clone().oneshot(request).await?;
        self.read(response).await
    }

    async fn read(&mut self, response: Response<Body>) -> Result<Page> {
        let status = response.status();
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let set_cookies: Vec<String> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(str::to_string)
            .collect();
        for cookie in &set_cookies {
            self.store_cookie(cookie);
        }

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Ok(Page {
            status,
            location,
            set_cookies,
            body,
        })
    }

    fn store_cookie(&mut self, cookie: &str) {
        let Some((name, rest)) = cookie.split_once('=') else {
            return;
        };
        let value = rest.split(';').next().unwrap_or_default();
        if value.is_empty() || cookie.contains("Max-Age=0") {
            self.cookies.remove(name);
        } else {
            self.cookies.insert(name.to_string(), value.to_string());
        }
    }
}

fn serde_urlencoded_body(fields: &[(&str, &str)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields)
        .finish()
}
