use std::time::Duration;

use anyhow::{Result, anyhow, bail};

use super::{DvfMutation, MutationsResponse};
use crate::cadastre::SectionKey;

/// HTTP client for the DVF open-data API.
///
/// The provider exposes one endpoint per cadastral section; non-2xx or a
/// transport error is the only failure signal, there is no structured error
/// body.
#[derive(Debug, Clone)]
pub struct DvfClient {
  base_url: String,
  client: surf::Client,
}

impl DvfClient {
  #[must_use]
  pub fn new(base_url: String) -> Self {
    let client: surf::Client = surf::Config::new()
      .set_timeout(Some(Duration::from_secs(5)))
      .try_into()
      .expect("client");
    Self { base_url, client }
  }

  fn mutations_url(&self, key: &SectionKey) -> String {
    format!(
      "{}/mutations/{}/{}{}",
      self.base_url, key.commune, key.prefixe, key.section
    )
  }

  /// Fetches all mutations of a cadastral section.
  pub async fn fetch_section(&self, key: &SectionKey) -> Result<Vec<DvfMutation>> {
    let url = self.mutations_url(key);
    let mut response = self
      .client
      .get(&url)
      .await
      .map_err(|e| anyhow!("DVF request for section {key} failed: {e}"))?;

    if response.status() != 200 {
      bail!(
        "DVF request for section {key} returned status {}",
        response.status()
      );
    }

    let parsed: MutationsResponse = response
      .body_json()
      .await
      .map_err(|e| anyhow!("DVF response for section {key} was not valid JSON: {e}"))?;
    Ok(parsed.data)
  }

  /// The on-demand fetch path gets a single retry on failure; the bounds
  /// refresh does not, to avoid a retry storm across many sections.
  pub async fn fetch_section_with_retry(&self, key: &SectionKey) -> Result<Vec<DvfMutation>> {
    match self.fetch_section(key).await {
      Ok(data) => Ok(data),
      Err(first) => {
        log::debug!("Retrying DVF fetch for section {key} after: {first}");
        self.fetch_section(key).await
      }
    }
  }
}
