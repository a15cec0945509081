//! `outgate` is a non-blocking outbound HTTP gateway: one chokepoint through
//! which a service issues every outbound call, uniformly applying timeout,
//! retry, and error-normalization policy regardless of call site.
//!
//! The gateway knows nothing about endpoints or payload semantics — only
//! method, url, body, and the JSON shape to decode into.
//!
//! # Quick Start
//!
//! ```no_run
//! use outgate::prelude::{Gateway, PolicyOverrides, RequestDescriptor};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Person {
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gateway = Gateway::new();
//!
//!     let person: Person = gateway
//!         .execute_single_with(
//!             &RequestDescriptor::get("https://swapi.dev/api/people/2"),
//!             PolicyOverrides::new().timeout_secs(5).retries(3),
//!         )
//!         .await?;
//!
//!     println!("fetched {}", person.name);
//!     Ok(())
//! }
//! ```
//!
//! # Policy Defaults
//!
//! - Aggregate timeout of 5 seconds per call, bounding the whole retry loop.
//! - 3 retries (4 total attempts), immediate, applied to every failure kind.
//! - Per-call overrides via [`PolicyOverrides`]; no call shares state with
//!   another.

mod body;
mod error;
mod executor;
mod gateway;
mod policy;
mod request;
mod stream;
mod swapi;
mod util;

pub use crate::error::{ErrorCode, GatewayError, TransportErrorKind};
pub use crate::gateway::Gateway;
pub use crate::policy::{GatewayPolicy, PolicyOverrides};
pub use crate::request::RequestDescriptor;
pub use crate::stream::JsonSequence;
pub use crate::swapi::{Person, SwapiService};

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

pub mod prelude {
    pub use crate::{
        ErrorCode, Gateway, GatewayError, GatewayPolicy, GatewayResult, JsonSequence, Person,
        PolicyOverrides, RequestDescriptor, SwapiService, TransportErrorKind,
    };
}
