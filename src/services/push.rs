//! Push fanout over FCM topics.
//!
//! The engine only knows the topic-fanout abstraction: send a message to a
//! named topic, add/remove a device token's topic membership. The FCM
//! implementation uses the legacy HTTP endpoint for sends and the Instance ID
//! API for topic membership.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;

use crate::error::{Error, Result};

/// A message addressed to every subscriber of a topic.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicMessage {
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

#[async_trait]
pub trait PushFanout: Send + Sync {
    /// Deliver to all subscribers of `topic`. Returns the delivery receipt id.
    async fn send_to_topic(&self, topic: &str, message: &TopicMessage) -> Result<String>;

    async fn subscribe(&self, token: &str, topic: &str) -> Result<()>;

    async fn unsubscribe(&self, token: &str, topic: &str) -> Result<()>;
}

pub struct FcmFanout {
    client: Client,
    api_key: Option<String>,
}

impl FcmFanout {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
        }
    }
}

#[async_trait]
impl PushFanout for FcmFanout {
    async fn send_to_topic(&self, topic: &str, message: &TopicMessage) -> Result<String> {
        let api_key = match &self.api_key {
            Some(k) => k,
            None => {
                tracing::debug!(topic, "FCM not configured, skipping push notification");
                return Ok("fcm-disabled".to_string());
            }
        };

        let payload = json!({
            "to": format!("/topics/{topic}"),
            "notification": {
                "title": message.title,
                "body": message.body,
            },
            "data": message.data,
        });

        let response = self
            .client
            .post("https://fcm.googleapis.com/fcm/send")
            .header("Authorization", format!("key={}", api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Push(format!("FCM send to {topic} failed: {status} {text}")));
        }

        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let delivery_id = body
            .get("message_id")
            .map(|v| v.to_string())
            .unwrap_or_else(|| format!("topic:{topic}"));
        Ok(delivery_id)
    }

    async fn subscribe(&self, token: &str, topic: &str) -> Result<()> {
        let api_key = match &self.api_key {
            Some(k) => k,
            None => {
                tracing::debug!(topic, "FCM not configured, skipping topic subscribe");
                return Ok(());
            }
        };

        let response = self
            .client
            .post(format!(
                "https://iid.googleapis.com/iid/v1/{token}/rel/topics/{topic}"
            ))
            .header("Authorization", format!("key={}", api_key))
            .header("Content-Length", "0")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::Push(format!("subscribe to {topic} failed: {status}")));
        }
        Ok(())
    }

    async fn unsubscribe(&self, token: &str, topic: &str) -> Result<()> {
        let api_key = match &self.api_key {
            Some(k) => k,
            None => {
                tracing::debug!(topic, "FCM not configured, skipping topic unsubscribe");
                return Ok(());
            }
        };

        let response = self
            .client
            .post("https://iid.googleapis.com/iid/v1:batchRemove")
            .header("Authorization", format!("key={}", api_key))
            .json(&json!({
                "to": format!("/topics/{topic}"),
                "registration_tokens": [token],
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::Push(format!(
                "unsubscribe from {topic} failed: {status}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod fake {
    //! Recording fake used by the service tests.

    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct FakeFanout {
        pub sent: Mutex<Vec<(String, TopicMessage)>>,
        /// Active (token, topic) memberships.
        pub memberships: Mutex<Vec<(String, String)>>,
        pub fail_send: AtomicBool,
        pub fail_subscribe: AtomicBool,
        pub fail_unsubscribe: AtomicBool,
        next_delivery: AtomicU64,
    }

    impl FakeFanout {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent_topics(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(topic, _)| topic.clone())
                .collect()
        }

        pub fn topics_for(&self, token: &str) -> Vec<String> {
            self.memberships
                .lock()
                .unwrap()
                .iter()
                .filter(|(t, _)| t == token)
                .map(|(_, topic)| topic.clone())
                .collect()
        }
    }

    #[async_trait]
    impl PushFanout for FakeFanout {
        async fn send_to_topic(&self, topic: &str, message: &TopicMessage) -> Result<String> {
            if self.fail_send.load(Ordering::SeqCst) {
                return Err(Error::Push("simulated send failure".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((topic.to_string(), message.clone()));
            let n = self.next_delivery.fetch_add(1, Ordering::SeqCst);
            Ok(format!("fake-delivery-{n}"))
        }

        async fn subscribe(&self, token: &str, topic: &str) -> Result<()> {
            if self.fail_subscribe.load(Ordering::SeqCst) {
                return Err(Error::Push("simulated subscribe failure".into()));
            }
            let mut memberships = self.memberships.lock().unwrap();
            let entry = (token.to_string(), topic.to_string());
            if !memberships.contains(&entry) {
                memberships.push(entry);
            }
            Ok(())
        }

        async fn unsubscribe(&self, token: &str, topic: &str) -> Result<()> {
            if self.fail_unsubscribe.load(Ordering::SeqCst) {
                return Err(Error::Push("simulated unsubscribe failure".into()));
            }
            self.memberships
                .lock()
                .unwrap()
                .retain(|(t, top)| !(t == token && top == topic));
            Ok(())
        }
    }
}
