// Library root
// ------------
// Client library for the Canary Health message selection API, plus the
// command-line front end the `canarymd` binary runs.
//
// Module responsibilities:
// - `api`: the `Client`, its version handshake, the authenticate-and-retry
//   request wrapper and the selection call.
// - `model`: environments, transports, purposes, the PEO and the records
//   the server hands back.
// - `error`: the error taxonomy shared by everything above.
// - `cli`: flag parsing, data-file loading and exit codes for the binary.
pub mod api;
pub mod cli;
pub mod error;
pub mod model;

pub use api::{Client, ClientBuilder};
pub use error::{Error, Result};
pub use model::{Environment, Peo, Purpose, Selection, SelectionItem, Transport, Version};
pub use reqwest::Method;
