//! Client for the worker agent's container info endpoint.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Port the worker agent serves container info on.
pub const DEFAULT_CONTAINER_INFO_PORT: u16 = 10250;

#[derive(Debug, Error)]
pub enum ContainerInfoError {
    #[error("container info request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("container info request returned {status}")]
    Status { status: u16 },
}

/// Fetches runtime information about a container from the machine running it.
#[async_trait]
pub trait ContainerInfo: Send + Sync {
    async fn get_container_info(
        &self,
        host: &str,
        container: &str,
    ) -> Result<serde_json::Value, ContainerInfoError>;
}

/// Queries `GET http://{host}:{port}/containerInfo?container={name}`.
pub struct HttpContainerInfo {
    client: reqwest::Client,
    port: u16,
}

impl HttpContainerInfo {
    pub fn new(port: u16) -> Result<Self, ContainerInfoError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, port })
    }

    fn url(&self, host: &str) -> String {
        format!("http://{}:{}/containerInfo", host, self.port)
    }
}

#[async_trait]
impl ContainerInfo for HttpContainerInfo {
    async fn get_container_info(
        &self,
        host: &str,
        container: &str,
    ) -> Result<serde_json::Value, ContainerInfoError> {
        let response = self
            .client
            .get(self.url(host))
            .query(&[("container", container)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ContainerInfoError::Status {
                status: response.status().as_u16(),
            });
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Returns a fixed blob, or an error if none is set.
    #[derive(Default)]
    pub struct FakeContainerInfo {
        pub data: Option<serde_json::Value>,
    }

    #[async_trait]
    impl ContainerInfo for FakeContainerInfo {
        async fn get_container_info(
            &self,
            _host: &str,
            _container: &str,
        ) -> Result<serde_json::Value, ContainerInfoError> {
            self.data
                .clone()
                .ok_or(ContainerInfoError::Status { status: 500 })
        }
    }
}
