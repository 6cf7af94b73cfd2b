// Shared harness: a wiremock server driven from a dedicated tokio runtime,
// so the blocking client under test runs on the plain test thread.
#![allow(dead_code)]

use canarymd::Client;
use serde_json::{json, Value};
use tokio::runtime::Runtime;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const PRINCIPAL: &str = "partner";
pub const CREDENTIAL: &str = "secret";

pub struct Harness {
    // Dropped before the runtime that started it.
    server: MockServer,
    runtime: Runtime,
}

impl Harness {
    pub fn start() -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("tokio runtime");
        let server = runtime.block_on(MockServer::start());
        Self { server, runtime }
    }

    /// Unversioned API root to hand to `ClientBuilder::base_url`.
    pub fn api_root(&self) -> String {
        format!("{}/api", self.server.uri())
    }

    pub fn mount(&self, mock: Mock) {
        self.runtime.block_on(mock.mount(&self.server));
    }

    pub fn requests(&self) -> Vec<Request> {
        self.runtime
            .block_on(self.server.received_requests())
            .expect("mock server should record received requests")
    }

    pub fn requests_to(&self, route: &str) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|request| request.url.path() == route)
            .collect()
    }

    pub fn verify(&self) {
        self.runtime.block_on(self.server.verify());
    }

    /// Serve a `/version` that advertises the path-versioned protocol.
    pub fn serve_v2(&self) {
        self.serve_version(json!({"apis": ["v1", "v2"], "server": "2.3.0"}));
    }

    pub fn serve_version(&self, body: Value) {
        self.mount(
            Mock::given(method("GET"))
                .and(path("/api/version"))
                .respond_with(ResponseTemplate::new(200).set_body_json(body)),
        );
    }

    pub fn connect(&self) -> canarymd::Result<Client> {
        Client::builder()
            .principal(PRINCIPAL)
            .credential(CREDENTIAL)
            .environment("stg")
            .base_url(self.api_root())
            .build()
    }
}

pub fn selection_body() -> Value {
    json!({
        "selection": {"id": "0b6f4b1e-1f7a-4a7e-9a43-6f3f2d6c9c11"},
        "content": "<div>Bring your insurance card.</div>",
        "selectionitems": [
            {"channel_id": "reminders", "message_id": "m-1"},
            {"channel_id": "education"},
        ],
    })
}
