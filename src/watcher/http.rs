/// HTTP implementation of [`SessionApi`] against a running server
use crate::{
    auth::extract::SESSION_COOKIE,
    error::{AppError, AppResult},
    watcher::SessionApi,
};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use url::Url;

pub struct HttpSessionApi {
    client: Client,
    refresh_url: Url,
    logout_url: Url,
    session_token: String,
}

impl HttpSessionApi {
    pub fn new(base_url: &str, session_token: impl Into<String>) -> AppResult<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| AppError::Validation(format!("Invalid server URL: {}", e)))?;
        let join = |path: &str| {
            base.join(path)
                .map_err(|e| AppError::Validation(format!("Invalid server URL: {}", e)))
        };

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            refresh_url: join("/api/auth/refresh")?,
            logout_url: join("/api/auth/logout")?,
            session_token: session_token.into(),
        })
    }

    async fn post(&self, url: &Url) -> AppResult<StatusCode> {
        let response = self
            .client
            .post(url.clone())
            .header(header::COOKIE, format!("{}={}", SESSION_COOKIE, self.session_token))
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Request to {} failed: {}", url, e)))?;

        Ok(response.status())
    }
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    async fn refresh(&self) -> AppResult<()> {
        let status = self.post(&self.refresh_url).await?;
        if !status.is_success() {
            return Err(AppError::Authentication(format!(
                "Session refresh rejected with status {}",
                status
            )));
        }
        Ok(())
    }

    async fn logout(&self) -> AppResult<()> {
        let status = self.post(&self.logout_url).await?;
        if !status.is_success() {
            tracing::debug!(%status, "Logout returned non-success status");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_urls() {
        let api = HttpSessionApi::new("http://localhost:3001/", "abc").unwrap();
        assert_eq!(api.refresh_url.as_str(), "http://localhost:3001/api/auth/refresh");
        assert_eq!(api.logout_url.as_str(), "http://localhost:3001/api/auth/logout");
    }

    #[test]
    fn test_rejects_bad_base_url() {
        assert!(matches!(
            HttpSessionApi::new("not a url", "abc"),
            Err(AppError::Validation(_))
        ));
    }
}
