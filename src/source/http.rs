use reqwest::Client;

use crate::{config::SourceConfig, schema::Record};

use super::{FetchError, RecordSource};

/// HTTP record source
///
/// Issues one `GET` per fetch against a JSON endpoint that returns a
/// single quote per request (quotable.io style).
///
/// FAILURE MAPPING:
/// - connect / read failures  -> `FetchError::Transport`
/// - non-2xx responses        -> `FetchError::Status`
/// - unparsable body          -> `FetchError::Decode`
///
/// The body is read fully before decoding so a broken payload is
/// always reported as a decode error, never as a transport one.
pub struct HttpSource {
    client: Client,
    url: String,
}

impl HttpSource {
    pub fn new(cfg: &SourceConfig) -> anyhow::Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = cfg.timeout() {
            builder = builder.timeout(timeout);
        }
        if let Some(agent) = &cfg.user_agent {
            builder = builder.user_agent(agent.clone());
        }

        Ok(Self {
            client: builder.build()?,
            url: cfg.url.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl RecordSource for HttpSource {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, worker: usize) -> Result<Record, FetchError> {
        log::debug!("worker {worker} GET {}", self.url);

        let response = self.client.get(&self.url).send().await?;
        let response = response.error_for_status()?;
        let body = response.text().await?;

        Ok(serde_json::from_str(&body)?)
    }
}
