use serde::Deserialize;

use crate::GatewayResult;
use crate::gateway::Gateway;
use crate::request::RequestDescriptor;
use crate::util::join_base_path;

/// A Star Wars API character, as much of it as the demo cares about.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Person {
    pub name: String,
}

/// Thin consumer of the gateway for the Star Wars API. Owns the base url and
/// endpoint shapes; all transport policy stays in the gateway.
#[derive(Clone, Debug)]
pub struct SwapiService {
    gateway: Gateway,
    base_url: String,
}

impl SwapiService {
    pub fn new(gateway: Gateway, base_url: impl Into<String>) -> Self {
        Self {
            gateway,
            base_url: base_url.into(),
        }
    }

    /// Fetches one character by id (`GET {base}/people/{id}`).
    pub async fn person(&self, id: u32) -> GatewayResult<Person> {
        let url = join_base_path(&self.base_url, &format!("people/{id}"));
        self.gateway
            .execute_single(&RequestDescriptor::get(url))
            .await
    }
}
