use crate::report::Report;
use reqwest::Client;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to POST report to {url}: {source}")]
    Request {
        url: String,
        source: reqwest::Error,
    },
    #[error("report POST to {url} returned {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}

pub fn build_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(concat!("servcheck/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// POSTs the report as JSON. The response body is ignored; a non-2xx status
/// still counts as a delivery failure for the caller to log.
pub async fn deliver(client: &Client, url: &str, report: &Report) -> Result<(), DeliveryError> {
    info!(url = %url, results = report.results.len(), "sending report");

    let response = client
        .post(url)
        .json(report)
        .send()
        .await
        .map_err(|source| DeliveryError::Request {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(DeliveryError::Status {
            url: url.to_string(),
            status,
        });
    }
    Ok(())
}
