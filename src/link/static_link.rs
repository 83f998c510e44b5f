//! Link driver for hosts whose network is managed elsewhere

use super::{LinkDriver, LinkStatus};
use crate::config::NetworkCredential;
use crate::error::NetworkError;
use async_trait::async_trait;
use tracing::debug;

/// Always associated: wired hosts, containers, or a supplicant run by the OS
#[derive(Debug, Clone, Default)]
pub struct StaticLink;

#[async_trait]
impl LinkDriver for StaticLink {
    async fn begin(&self, credential: &NetworkCredential) -> Result<(), NetworkError> {
        debug!(ssid = %credential.ssid, "Static link ignores association request");
        Ok(())
    }

    async fn status(&self) -> Result<LinkStatus, NetworkError> {
        Ok(LinkStatus::Associated)
    }

    async fn disconnect(&self) -> Result<(), NetworkError> {
        Ok(())
    }
}
