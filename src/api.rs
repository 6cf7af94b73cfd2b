// API client module: a small blocking HTTP client for the Canary API.
// A client negotiates the protocol version once when it is built, then
// keeps a cookie-backed session that is re-established on demand when the
// server answers 401.

use std::fmt;

use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};
use url::Url;

use crate::error::{Error, Result};
use crate::model::{Environment, Peo, Selection, Version};

/// Protocol version a server without an `apis` list must report.
const LEGACY_API_VERSION: &str = "1.1.0";

/// Path-versioned protocol this client speaks.
const CURRENT_API: &str = "v2";

/// Client for the Canary selection API.
///
/// The protocol version and base URL are fixed once the handshake in
/// [`ClientBuilder::build`] succeeds; the only state that changes afterwards
/// is the session cookie jar, which reqwest guards internally.
///
/// ```no_run
/// use canarymd::{Client, Peo, Purpose, Transport};
///
/// # fn example() -> canarymd::Result<()> {
/// let client = Client::builder()
///     .principal("partner")
///     .credential("secret")
///     .environment("stg")
///     .build()?;
///
/// let peo = Peo::new(Transport::Site, Purpose::Prepare).with_recipient("PID|1||123");
/// if let Some(selection) = client.select("clinic-42", &peo, None)? {
///     println!("{}", selection.content);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Client {
    http: HttpClient,
    principal: String,
    credential: String,
    environment: Environment,
    base_url: String,
    version: Version,
}

/// Login payload for `POST /auth/session`.
#[derive(Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

/// Shape of `GET /version`. Older servers report a single `api` version;
/// newer ones list the path-versioned protocols they serve in `apis`.
#[derive(Deserialize, Debug)]
struct VersionResponse {
    apis: Option<Vec<String>>,
    api: Option<String>,
    server: Option<String>,
}

#[derive(Serialize)]
struct SelectionRequest<'a> {
    selection: SelectionParams<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<f64>,
}

#[derive(Serialize)]
struct SelectionParams<'a> {
    context: &'a str,
    peo: &'a Peo,
}

/// Error body the server returns alongside non-success statuses.
#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    field: Option<Value>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connect to `environment` with the default base URL.
    pub fn new(
        principal: impl Into<String>,
        credential: impl Into<String>,
        environment: Environment,
    ) -> Result<Self> {
        Self::builder()
            .principal(principal)
            .credential(credential)
            .environment(environment)
            .build()
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Base URL including the negotiated protocol path.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Versions agreed during the handshake. Makes no network call.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Send `body` as JSON to `{base}{path}`, authenticating and retrying
    /// once if the session is not authorized.
    ///
    /// Any status other than 401 is returned as-is for the caller to
    /// interpret. A failed login, or a 401/403 on the retry, is an
    /// [`Error::Authorization`].
    pub fn request<B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<Response>
    where
        B: Serialize + ?Sized,
    {
        let payload = body.map(|b| serde_json::to_vec(b)).transpose()?;

        let response = self.send(&method, path, payload.as_deref())?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        info!(principal = %self.principal, "session not authorized, authenticating");
        self.authenticate()?;

        let response = self.send(&method, path, payload.as_deref())?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let err = describe_failure(response);
                error!("post-authentication authorization failure: {err}");
                Err(Error::Authorization(err))
            }
            _ => Ok(response),
        }
    }

    /// Request a message selection for `peo` under `context`.
    ///
    /// Returns `Ok(None)` when the server found no applicable message.
    /// `timeout` (seconds) is forwarded to the server; it does not bound
    /// the local HTTP call.
    pub fn select(
        &self,
        context: &str,
        peo: &Peo,
        timeout: Option<f64>,
    ) -> Result<Option<Selection>> {
        let request = SelectionRequest {
            selection: SelectionParams { context, peo },
            timeout,
        };
        let response = self.request(Method::POST, "/selection", Some(&request))?;

        if response.status() != StatusCode::OK {
            let err = describe_failure(response);
            error!("selection failure: {err}");
            return Err(Error::Protocol(err));
        }

        let body: Value = response.json()?;
        match body.get("selection") {
            None => {
                error!(%body, "no `selection` attribute in selection response");
                Err(Error::Protocol(
                    "unexpected error: no `selection` attribute in selection response".into(),
                ))
            }
            Some(Value::Null) => {
                debug!("no applicable message found");
                Ok(None)
            }
            Some(_) => Selection::from_response(body).map(Some),
        }
    }

    /// Like [`Client::select`], for a PEO given as a free-form JSON object.
    /// The transport and purpose are validated before anything is sent.
    pub fn select_json(
        &self,
        context: &str,
        peo: Value,
        timeout: Option<f64>,
    ) -> Result<Option<Selection>> {
        let peo = Peo::try_from(peo)?;
        self.select(context, &peo, timeout)
    }

    fn send(&self, method: &Method, path: &str, payload: Option<&[u8]>) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "sending request");

        let mut request = self.http.request(method.clone(), &url);
        if let Some(payload) = payload {
            request = request.body(payload.to_vec());
        }
        let response = request.send()?;

        debug!(status = %response.status(), %url, "received response");
        Ok(response)
    }

    fn authenticate(&self) -> Result<()> {
        let url = format!("{}/auth/session", self.base_url);
        let credentials = Credentials {
            username: &self.principal,
            password: &self.credential,
        };
        let response = self.http.post(&url).json(&credentials).send()?;

        if response.status() != StatusCode::OK {
            let err = describe_failure(response);
            error!("authentication failure: {err}");
            return Err(Error::Authorization(err));
        }
        debug!(principal = %self.principal, "authenticated");
        Ok(())
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("principal", &self.principal)
            .field("environment", &self.environment)
            .field("base_url", &self.base_url)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Client`]. Building performs the version handshake.
#[derive(Debug, Default)]
pub struct ClientBuilder {
    principal: String,
    credential: String,
    environment: Option<String>,
    base_url: Option<String>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Username to authenticate as.
    pub fn principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = principal.into();
        self
    }

    /// Password or token for the principal.
    pub fn credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = credential.into();
        self
    }

    /// Deployment tier, either an [`Environment`] or its name. Defaults to
    /// production. Unknown names fail at [`ClientBuilder::build`].
    pub fn environment(mut self, environment: impl ToString) -> Self {
        self.environment = Some(environment.to_string());
        self
    }

    /// Override the tier's unversioned API root, e.g. `http://localhost:8899/api`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Validate the configuration and negotiate the protocol version.
    pub fn build(self) -> Result<Client> {
        let environment = match &self.environment {
            Some(name) => Environment::parse(name)?,
            None => Environment::default(),
        };
        let root = match &self.base_url {
            Some(url) => normalize_base_url(url)?,
            None => environment.base_url(),
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let http = HttpClient::builder()
            .default_headers(headers)
            .cookie_store(true)
            .user_agent(format!("canarymd/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        let (base_url, version) = negotiate(&http, &root)?;
        info!(
            %environment,
            %base_url,
            api = %version.api,
            server = version.server.as_deref().unwrap_or("unknown"),
            "negotiated protocol version"
        );

        Ok(Client {
            http,
            principal: self.principal,
            credential: self.credential,
            environment,
            base_url,
            version,
        })
    }
}

fn normalize_base_url(raw: &str) -> Result<String> {
    let url = Url::parse(raw)
        .map_err(|e| Error::Configuration(format!("invalid base URL {raw:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Configuration(format!(
            "invalid base URL {raw:?}: unsupported scheme {:?}",
            url.scheme()
        )));
    }
    Ok(raw.trim_end_matches('/').to_string())
}

/// Unauthenticated `GET {root}/version`; returns the versioned base URL.
fn negotiate(http: &HttpClient, root: &str) -> Result<(String, Version)> {
    let url = format!("{root}/version");
    debug!(%url, "checking server version");

    let response = http.get(&url).send()?;
    if !response.status().is_success() {
        let err = describe_failure(response);
        error!("version check failure: {err}");
        return Err(Error::Protocol(format!("version check failed: {err}")));
    }
    let reported: VersionResponse = response.json()?;

    let (api, base_url) = match &reported.apis {
        None if reported.api.as_deref() == Some(LEGACY_API_VERSION) => ("v1", root.to_string()),
        Some(apis) if apis.iter().any(|api| api == CURRENT_API) => {
            (CURRENT_API, format!("{root}/{CURRENT_API}"))
        }
        _ => {
            error!(?reported, "incompatible client/server versions");
            return Err(Error::Protocol("incompatible client/server versions".into()));
        }
    };

    Ok((
        base_url,
        Version {
            api: api.to_string(),
            server: reported.server,
            client: env!("CARGO_PKG_VERSION").to_string(),
        },
    ))
}

/// Render a failed response as `"{status}: {message} (field: detail, ...)"`.
fn describe_failure(response: Response) -> String {
    let status = response.status();
    let text = response.text().unwrap_or_default();
    format_failure(status, &text)
}

fn format_failure(status: StatusCode, text: &str) -> String {
    let code = status.as_u16();
    let reason = status.canonical_reason().unwrap_or("unknown error");

    let Ok(body) = serde_json::from_str::<ErrorBody>(text) else {
        let detail = text.trim();
        return if detail.is_empty() {
            format!("{code}: {reason}")
        } else {
            format!("{code}: {detail}")
        };
    };

    let mut message = format!("{code}: {}", body.message.as_deref().unwrap_or(reason));
    if let Some(field) = body.field {
        let mut entries = Vec::new();
        flatten_fields("", &field, &mut entries);
        if !entries.is_empty() {
            let details: Vec<String> = entries
                .iter()
                .map(|(key, value)| format!("{key}: {value}"))
                .collect();
            message.push_str(&format!(" ({})", details.join(", ")));
        }
    }
    message
}

// Nested objects become dotted keys, list entries `key[i]`.
fn flatten_fields(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (key, value) in map {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_fields(&key, value, out);
            }
        }
        Value::Array(items) => {
            for (index, value) in items.iter().enumerate() {
                flatten_fields(&format!("{prefix}[{index}]"), value, out);
            }
        }
        Value::String(text) => out.push((prefix.to_string(), text.clone())),
        other => out.push((prefix.to_string(), other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_message_and_field_errors() {
        let body = r#"{
            "message": "invalid parameters",
            "field": {"peo": {"recipient": "required", "width": "must be positive"}}
        }"#;
        assert_eq!(
            format_failure(StatusCode::BAD_REQUEST, body),
            "400: invalid parameters (peo.recipient: required, peo.width: must be positive)"
        );
    }

    #[test]
    fn formats_list_fields_with_indices() {
        let body = r#"{"message": "bad", "field": {"items": ["missing", {"id": 7}]}}"#;
        assert_eq!(
            format_failure(StatusCode::BAD_REQUEST, body),
            "400: bad (items[0]: missing, items[1].id: 7)"
        );
    }

    #[test]
    fn formats_message_without_fields() {
        assert_eq!(
            format_failure(StatusCode::UNAUTHORIZED, r#"{"message": "bad credentials"}"#),
            "401: bad credentials"
        );
    }

    #[test]
    fn falls_back_for_non_json_bodies() {
        assert_eq!(
            format_failure(StatusCode::BAD_GATEWAY, "  upstream down\n"),
            "502: upstream down"
        );
        assert_eq!(
            format_failure(StatusCode::INTERNAL_SERVER_ERROR, ""),
            "500: Internal Server Error"
        );
    }

    #[test]
    fn unknown_environment_fails_before_any_request() {
        let err = Client::builder()
            .environment("production")
            .base_url("http://127.0.0.1:9/api")
            .build()
            .unwrap_err();
        assert!(err.is_configuration(), "{err}");
    }

    #[test]
    fn invalid_base_url_is_configuration_error() {
        let err = Client::builder().base_url("not a url").build().unwrap_err();
        assert!(err.is_configuration(), "{err}");

        let err = Client::builder()
            .base_url("ftp://example.com/api")
            .build()
            .unwrap_err();
        assert!(err.is_configuration(), "{err}");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        assert_eq!(
            normalize_base_url("http://localhost:8899/api/").unwrap(),
            "http://localhost:8899/api"
        );
    }
}
