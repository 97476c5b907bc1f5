//! Web Push relay: delivers notification surface actions to every browser
//! that registered a push subscription.

use std::sync::Arc;

use async_trait::async_trait;
use base64::URL_SAFE_NO_PAD;
use futures_util::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};
use web_push::{
    ContentEncoding, SubscriptionInfo, VapidSignatureBuilder, WebPushClient, WebPushError,
    WebPushMessageBuilder,
};

use crate::{
    config::Config,
    db::{StoreError, SubscriptionStore},
    models::PushSubscription,
    notifications::Notification,
    worker::NotificationSurface,
};

/// Message the browser-side service worker receives through Web Push.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    Show { notification: Notification },
    Close { tag: String },
    OpenWindow { url: String },
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("subscription expired")]
    Expired,
    #[error("push payload too large")]
    PayloadTooLarge,
    #[error("push failed: {0}")]
    Push(String),
}

pub struct PushRelay {
    store: Arc<SubscriptionStore>,
    cfg: Arc<Config>,
    client: WebPushClient,
}

impl PushRelay {
    pub fn new(store: Arc<SubscriptionStore>, cfg: Arc<Config>, client: WebPushClient) -> Self {
        Self { store, cfg, client }
    }

    pub fn subscriber_count(&self) -> Result<u64, StoreError> {
        self.store.count()
    }

    /// Sends `message` to every stored subscription and returns how many
    /// accepted it. Expired subscriptions are removed on the way.
    pub async fn broadcast(&self, message: &RelayMessage) -> anyhow::Result<usize> {
        let payload = serde_json::to_vec(message)?;
        let subscribers = self.store.list()?;
        if subscribers.is_empty() {
            warn!("no push subscribers, dropping relay message");
            return Ok(0);
        }

        let sends = subscribers.iter().map(|(id, stored)| {
            let payload = payload.as_slice();
            async move { (id, self.send(&stored.subscription, payload).await) }
        });

        let mut delivered = 0;
        for (id, result) in join_all(sends).await {
            match result {
                Ok(()) => delivered += 1,
                Err(SendError::Expired) => {
                    warn!("subscription {id} expired, removing");
                    if let Err(err) = self.store.remove(id) {
                        error!("failed to remove expired subscription {id}: {err}");
                    }
                }
                Err(err) => error!("push to {id} failed: {err}"),
            }
        }

        Ok(delivered)
    }

    async fn send(&self, subscription: &PushSubscription, payload: &[u8]) -> Result<(), SendError> {
        let subscription_info = SubscriptionInfo::new(
            subscription.endpoint.clone(),
            subscription.keys.p256dh.clone(),
            subscription.keys.auth.clone(),
        );

        let mut builder = WebPushMessageBuilder::new(&subscription_info)
            .map_err(|err| SendError::Push(format!("push builder error: {err}")))?;
        builder.set_payload(ContentEncoding::Aes128Gcm, payload);
        builder.set_ttl(60);

        let mut vapid_builder = VapidSignatureBuilder::from_base64(
            &self.cfg.vapid_private_key,
            URL_SAFE_NO_PAD,
            &subscription_info,
        )
        .map_err(|err| SendError::Push(err.to_string()))?;
        vapid_builder.add_claim("sub", self.cfg.vapid_subject.as_str());
        let signature = vapid_builder
            .build()
            .map_err(|err| SendError::Push(err.to_string()))?;
        builder.set_vapid_signature(signature);

        let message = builder
            .build()
            .map_err(|err| SendError::Push(err.to_string()))?;

        match self.client.send(message).await {
            Ok(()) => Ok(()),
            Err(WebPushError::EndpointNotValid) | Err(WebPushError::EndpointNotFound) => {
                Err(SendError::Expired)
            }
            Err(WebPushError::PayloadTooLarge) => Err(SendError::PayloadTooLarge),
            Err(err) => Err(SendError::Push(err.to_string())),
        }
    }
}

#[async_trait]
impl NotificationSurface for PushRelay {
    async fn claim_clients(&self) -> anyhow::Result<()> {
        let subscribers = self.subscriber_count()?;
        info!(subscribers, "worker controls all subscribed clients");
        Ok(())
    }

    async fn show(&self, notification: &Notification) -> anyhow::Result<()> {
        let delivered = self
            .broadcast(&RelayMessage::Show {
                notification: notification.clone(),
            })
            .await?;
        info!(tag = %notification.tag, delivered, "notification relayed");
        Ok(())
    }

    async fn close(&self, tag: &str) -> anyhow::Result<()> {
        self.broadcast(&RelayMessage::Close {
            tag: tag.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn open_window(&self, url: &str) -> anyhow::Result<()> {
        let base = self.cfg.public_base_url.trim_end_matches('/');
        self.broadcast(&RelayMessage::OpenWindow {
            url: format!("{base}{url}"),
        })
        .await?;
        Ok(())
    }
}
