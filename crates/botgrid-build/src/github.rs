//! GitHub team repository listing.

use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use botgrid_core::config::SourceConfig;

const GITHUB_API: &str = "https://api.github.com";
const PER_PAGE: u32 = 100;

#[derive(Debug, Deserialize)]
struct TeamRepository {
    clone_url: String,
}

/// Lists the clone URLs of every repository a team can access.
pub struct GitHubTeamClient {
    http: Client,
    api_base: String,
    organization: String,
    team: String,
    token: SecretString,
}

impl GitHubTeamClient {
    pub fn new(organization: &str, team: &str, token: SecretString) -> Self {
        Self {
            http: Client::new(),
            api_base: GITHUB_API.to_string(),
            organization: organization.to_string(),
            team: team.to_string(),
            token,
        }
    }

    /// Client for the `[source]` organization and team. `None` unless both
    /// are configured and a token is available.
    pub fn from_config(config: &SourceConfig, token: Option<SecretString>) -> Option<Self> {
        let (organization, team) = match (&config.organization, &config.team) {
            (Some(organization), Some(team)) => (organization, team),
            _ => return None,
        };
        let Some(token) = token else {
            warn!(%organization, %team, "team configured but no token available");
            return None;
        };
        Some(Self::new(organization, team, token).with_api_base(&config.github_api))
    }

    /// Point at a GitHub Enterprise (or test) API root.
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// Clone URLs of all team repositories.
    ///
    /// Pages until an empty page. A failed request ends the listing and
    /// whatever was collected so far is returned.
    pub async fn list_repositories(&self) -> Vec<String> {
        let mut urls = Vec::new();
        let mut page = 1u32;
        loop {
            match self.fetch_page(page).await {
                Ok(batch) if batch.is_empty() => break,
                Ok(batch) => {
                    debug!(page, count = batch.len(), "team repositories page");
                    urls.extend(batch.into_iter().map(|r| r.clone_url));
                    page += 1;
                }
                Err(e) => {
                    warn!(
                        organization = %self.organization,
                        team = %self.team,
                        page,
                        error = %e,
                        "listing team repositories stopped"
                    );
                    break;
                }
            }
        }
        urls
    }

    fn page_url(&self) -> String {
        format!(
            "{}/orgs/{}/teams/{}/repos",
            self.api_base, self.organization, self.team
        )
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<TeamRepository>, reqwest::Error> {
        self.http
            .get(self.page_url())
            .query(&[("per_page", PER_PAGE), ("page", page)])
            .header(AUTHORIZATION, format!("token {}", self.token.expose_secret()))
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, "botgrid")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}
