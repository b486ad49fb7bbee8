//! Service discovery hook
//!
//! The server announces its endpoint through a [`DiscoveryPublisher`] once
//! it is listening and withdraws it on stop. Actual network announcement
//! (DNS-SD) is provided by the deployment. [`LogPublisher`] only records the
//! advert in the log.

use std::net::SocketAddr;

use thiserror::Error;
use tracing::info;

/// Endpoint description published for discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAdvert {
    pub instance_id: String,
    pub service_type: String,
    pub address: String,
    pub port: u16,
}

impl ServiceAdvert {
    pub fn new(
        instance_id: impl Into<String>,
        service_type: impl Into<String>,
        addr: SocketAddr,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            service_type: service_type.into(),
            address: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

/// Errors reported by discovery publishers
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Failed to publish {service_type} for '{instance_id}': {reason}")]
    Publish {
        instance_id: String,
        service_type: String,
        reason: String,
    },

    #[error("Failed to withdraw '{instance_id}': {reason}")]
    Withdraw { instance_id: String, reason: String },
}

/// Advertises the directory on the network
pub trait DiscoveryPublisher: Send + Sync {
    fn publish(&self, advert: &ServiceAdvert) -> Result<(), DiscoveryError>;

    fn withdraw(&self, advert: &ServiceAdvert) -> Result<(), DiscoveryError>;
}

/// Publisher that writes adverts to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

impl DiscoveryPublisher for LogPublisher {
    fn publish(&self, advert: &ServiceAdvert) -> Result<(), DiscoveryError> {
        info!(
            instance = %advert.instance_id,
            service = %advert.service_type,
            "Discoverable at {}:{}",
            advert.address,
            advert.port
        );
        Ok(())
    }

    fn withdraw(&self, advert: &ServiceAdvert) -> Result<(), DiscoveryError> {
        info!(instance = %advert.instance_id, "Discovery advert withdrawn");
        Ok(())
    }
}
