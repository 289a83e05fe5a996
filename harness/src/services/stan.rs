//! Bypass client for the durable streaming layer
//!
//! The streaming server speaks protobuf request/reply over the pub/sub broker.
//! This client covers what tests need from a bypass connection: connect,
//! publish with acknowledgement, subscribe from the first or next message, and
//! close. Server heartbeats are answered from a background task.

use async_nats::Client;
use bytes::Bytes;
use futures_util::StreamExt;
use prost::Message;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use shared::bridge_conf::DEFAULT_DISCOVER_PREFIX;
use shared::{component_debug, ClientId, ClusterId, Component};

use crate::error::{HarnessError, HarnessResult};

const PROTOCOL_VERSION: i32 = 1;
const PING_INTERVAL_SECS: i32 = 5;
const PING_MAX_OUT: i32 = 88;
const DEFAULT_MAX_IN_FLIGHT: i32 = 1024;
const DEFAULT_ACK_WAIT_SECS: i32 = 30;

mod proto {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ConnectRequest {
        #[prost(string, tag = "1")]
        pub client_id: String,
        #[prost(string, tag = "2")]
        pub heartbeat_inbox: String,
        #[prost(int32, tag = "3")]
        pub protocol: i32,
        #[prost(bytes = "vec", tag = "4")]
        pub conn_id: Vec<u8>,
        #[prost(int32, tag = "5")]
        pub ping_interval: i32,
        #[prost(int32, tag = "6")]
        pub ping_max_out: i32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ConnectResponse {
        #[prost(string, tag = "1")]
        pub pub_prefix: String,
        #[prost(string, tag = "2")]
        pub sub_requests: String,
        #[prost(string, tag = "3")]
        pub unsub_requests: String,
        #[prost(string, tag = "4")]
        pub close_requests: String,
        #[prost(string, tag = "5")]
        pub error: String,
        #[prost(string, tag = "6")]
        pub sub_close_requests: String,
        #[prost(string, tag = "7")]
        pub ping_requests: String,
        #[prost(int32, tag = "8")]
        pub ping_interval: i32,
        #[prost(int32, tag = "9")]
        pub ping_max_out: i32,
        #[prost(int32, tag = "10")]
        pub protocol: i32,
        #[prost(string, tag = "100")]
        pub public_key: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PubMsg {
        #[prost(string, tag = "1")]
        pub client_id: String,
        #[prost(string, tag = "2")]
        pub guid: String,
        #[prost(string, tag = "3")]
        pub subject: String,
        #[prost(string, tag = "4")]
        pub reply: String,
        #[prost(bytes = "vec", tag = "5")]
        pub data: Vec<u8>,
        #[prost(bytes = "vec", tag = "6")]
        pub conn_id: Vec<u8>,
        #[prost(bytes = "vec", tag = "10")]
        pub sha256: Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PubAck {
        #[prost(string, tag = "1")]
        pub guid: String,
        #[prost(string, tag = "2")]
        pub error: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SubscriptionRequest {
        #[prost(string, tag = "1")]
        pub client_id: String,
        #[prost(string, tag = "2")]
        pub subject: String,
        #[prost(string, tag = "3")]
        pub q_group: String,
        #[prost(string, tag = "4")]
        pub inbox: String,
        #[prost(int32, tag = "5")]
        pub max_in_flight: i32,
        #[prost(int32, tag = "6")]
        pub ack_wait_in_secs: i32,
        #[prost(string, tag = "7")]
        pub durable_name: String,
        #[prost(enumeration = "super::StartPosition", tag = "10")]
        pub start_position: i32,
        #[prost(uint64, tag = "11")]
        pub start_sequence: u64,
        #[prost(int64, tag = "12")]
        pub start_time_delta: i64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SubscriptionResponse {
        #[prost(string, tag = "2")]
        pub ack_inbox: String,
        #[prost(string, tag = "3")]
        pub error: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct UnsubscribeRequest {
        #[prost(string, tag = "1")]
        pub client_id: String,
        #[prost(string, tag = "2")]
        pub subject: String,
        #[prost(string, tag = "3")]
        pub inbox: String,
        #[prost(string, tag = "4")]
        pub durable_name: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct MsgProto {
        #[prost(uint64, tag = "1")]
        pub sequence: u64,
        #[prost(string, tag = "2")]
        pub subject: String,
        #[prost(string, tag = "3")]
        pub reply: String,
        #[prost(bytes = "vec", tag = "4")]
        pub data: Vec<u8>,
        #[prost(int64, tag = "5")]
        pub timestamp: i64,
        #[prost(bool, tag = "6")]
        pub redelivered: bool,
        #[prost(uint32, tag = "7")]
        pub redelivery_count: u32,
        #[prost(uint32, tag = "10")]
        pub crc32: u32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Ack {
        #[prost(string, tag = "1")]
        pub subject: String,
        #[prost(uint64, tag = "2")]
        pub sequence: u64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct CloseRequest {
        #[prost(string, tag = "1")]
        pub client_id: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct CloseResponse {
        #[prost(string, tag = "1")]
        pub error: String,
    }
}

/// Where a new subscription starts in the channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum StartPosition {
    NewOnly = 0,
    LastReceived = 1,
    TimeDeltaStart = 2,
    SequenceStart = 3,
    First = 4,
}

#[derive(Debug, Clone)]
pub struct StreamingOptions {
    pub discover_prefix: String,
    pub connect_wait: Duration,
    pub pub_ack_wait: Duration,
}

impl Default for StreamingOptions {
    fn default() -> Self {
        Self {
            discover_prefix: DEFAULT_DISCOVER_PREFIX.to_string(),
            connect_wait: Duration::from_millis(2000),
            pub_ack_wait: Duration::from_millis(5000),
        }
    }
}

/// A message delivered on a streaming subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingMessage {
    pub sequence: u64,
    pub subject: String,
    pub data: Vec<u8>,
    pub timestamp: i64,
    pub redelivered: bool,
}

fn decode_error(e: prost::DecodeError) -> HarnessError {
    HarnessError::lifecycle(Component::BypassStreaming, format!("malformed server reply: {e}"))
}

fn server_error(context: &str, error: &str) -> HarnessResult<()> {
    if error.is_empty() {
        Ok(())
    } else {
        Err(HarnessError::lifecycle(
            Component::BypassStreaming,
            format!("{context} rejected: {error}"),
        ))
    }
}

async fn request(client: &Client, subject: String, payload: Vec<u8>, wait: Duration) -> HarnessResult<Bytes> {
    match tokio::time::timeout(wait, client.request(subject.clone(), payload.into())).await {
        Ok(Ok(message)) => Ok(message.payload),
        Ok(Err(e)) => Err(HarnessError::connectivity(subject, e)),
        Err(_) => Err(HarnessError::connectivity(
            subject,
            format!("no reply within {wait:?}"),
        )),
    }
}

/// Bypass streaming connection
pub struct StreamingConnection {
    nats: Client,
    cluster_id: ClusterId,
    client_id: ClientId,
    conn_id: Vec<u8>,
    pub_prefix: String,
    sub_requests: String,
    unsub_requests: String,
    close_requests: String,
    options: StreamingOptions,
    heartbeat: JoinHandle<()>,
}

impl StreamingConnection {
    /// Perform the connect handshake over an existing pub/sub connection
    pub async fn connect(
        nats: Client,
        cluster_id: &ClusterId,
        client_id: &ClientId,
        options: StreamingOptions,
    ) -> HarnessResult<Self> {
        let heartbeat_inbox = nats.new_inbox();
        let mut heartbeats = nats
            .subscribe(heartbeat_inbox.clone())
            .await
            .map_err(|e| HarnessError::connectivity(&heartbeat_inbox, e))?;

        let responder = nats.clone();
        let heartbeat = tokio::spawn(async move {
            while let Some(message) = heartbeats.next().await {
                if let Some(reply) = message.reply {
                    let _ = responder.publish(reply, Bytes::new()).await;
                }
            }
        });

        let conn_id = Uuid::new_v4().as_bytes().to_vec();
        let request_msg = proto::ConnectRequest {
            client_id: client_id.to_string(),
            heartbeat_inbox,
            protocol: PROTOCOL_VERSION,
            conn_id: conn_id.clone(),
            ping_interval: PING_INTERVAL_SECS,
            ping_max_out: PING_MAX_OUT,
        };
        let discover = format!("{}.{}", options.discover_prefix, cluster_id);

        let response = match request(&nats, discover, request_msg.encode_to_vec(), options.connect_wait)
            .await
            .and_then(|payload| proto::ConnectResponse::decode(payload).map_err(decode_error))
        {
            Ok(response) => response,
            Err(e) => {
                heartbeat.abort();
                return Err(e);
            }
        };

        if let Err(e) = server_error("connect", &response.error) {
            heartbeat.abort();
            return Err(e);
        }

        component_debug!(
            Component::BypassStreaming,
            "🔗 Connected to cluster '{}' as '{}'",
            cluster_id,
            client_id
        );

        Ok(Self {
            nats,
            cluster_id: cluster_id.clone(),
            client_id: client_id.clone(),
            conn_id,
            pub_prefix: response.pub_prefix,
            sub_requests: response.sub_requests,
            unsub_requests: response.unsub_requests,
            close_requests: response.close_requests,
            options,
            heartbeat,
        })
    }

    pub fn cluster_id(&self) -> &ClusterId {
        &self.cluster_id
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Publish to a channel and wait for the server's acknowledgement
    pub async fn publish(&self, subject: &str, data: &[u8]) -> HarnessResult<()> {
        let guid = Uuid::new_v4().to_string();
        let msg = proto::PubMsg {
            client_id: self.client_id.to_string(),
            guid: guid.clone(),
            subject: subject.to_string(),
            reply: String::new(),
            data: data.to_vec(),
            conn_id: self.conn_id.clone(),
            sha256: Vec::new(),
        };

        let payload = request(
            &self.nats,
            format!("{}.{}", self.pub_prefix, subject),
            msg.encode_to_vec(),
            self.options.pub_ack_wait,
        )
        .await?;
        let ack = proto::PubAck::decode(payload).map_err(decode_error)?;
        server_error("publish", &ack.error)?;

        if ack.guid != guid {
            return Err(HarnessError::lifecycle(
                Component::BypassStreaming,
                format!("ack for unexpected message {}", ack.guid),
            ));
        }
        Ok(())
    }

    /// Subscribe to a channel; delivered messages are acknowledged as they are read
    pub async fn subscribe(&self, subject: &str, start: StartPosition) -> HarnessResult<StreamingSubscription> {
        let inbox = self.nats.new_inbox();
        let subscriber = self
            .nats
            .subscribe(inbox.clone())
            .await
            .map_err(|e| HarnessError::connectivity(&inbox, e))?;

        let msg = proto::SubscriptionRequest {
            client_id: self.client_id.to_string(),
            subject: subject.to_string(),
            q_group: String::new(),
            inbox: inbox.clone(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            ack_wait_in_secs: DEFAULT_ACK_WAIT_SECS,
            durable_name: String::new(),
            start_position: start as i32,
            start_sequence: 0,
            start_time_delta: 0,
        };

        let payload = request(
            &self.nats,
            self.sub_requests.clone(),
            msg.encode_to_vec(),
            self.options.connect_wait,
        )
        .await?;
        let response = proto::SubscriptionResponse::decode(payload).map_err(decode_error)?;
        server_error("subscribe", &response.error)?;

        Ok(StreamingSubscription {
            nats: self.nats.clone(),
            subscriber,
            client_id: self.client_id.to_string(),
            subject: subject.to_string(),
            inbox,
            ack_inbox: response.ack_inbox,
            unsub_requests: self.unsub_requests.clone(),
            wait: self.options.connect_wait,
        })
    }

    /// Tell the server this client is leaving
    pub async fn close(self) -> HarnessResult<()> {
        let msg = proto::CloseRequest {
            client_id: self.client_id.to_string(),
        };
        let result = request(
            &self.nats,
            self.close_requests.clone(),
            msg.encode_to_vec(),
            self.options.connect_wait,
        )
        .await
        .and_then(|payload| proto::CloseResponse::decode(payload).map_err(decode_error))
        .and_then(|response| server_error("close", &response.error));

        self.heartbeat.abort();
        result
    }
}

impl Drop for StreamingConnection {
    fn drop(&mut self) {
        self.heartbeat.abort();
    }
}

pub struct StreamingSubscription {
    nats: Client,
    subscriber: async_nats::Subscriber,
    client_id: String,
    subject: String,
    inbox: String,
    ack_inbox: String,
    unsub_requests: String,
    wait: Duration,
}

impl StreamingSubscription {
    /// Next message, or `None` if none arrives within `timeout`
    pub async fn next_message(&mut self, timeout: Duration) -> HarnessResult<Option<StreamingMessage>> {
        let message = match tokio::time::timeout(timeout, self.subscriber.next()).await {
            Err(_) => return Ok(None),
            Ok(None) => {
                return Err(HarnessError::lifecycle(
                    Component::BypassStreaming,
                    "subscription closed",
                ))
            }
            Ok(Some(message)) => message,
        };

        let delivered = proto::MsgProto::decode(message.payload).map_err(decode_error)?;
        let ack = proto::Ack {
            subject: delivered.subject.clone(),
            sequence: delivered.sequence,
        };
        self.nats
            .publish(self.ack_inbox.clone(), ack.encode_to_vec().into())
            .await
            .map_err(|e| HarnessError::connectivity(&self.ack_inbox, e))?;

        Ok(Some(StreamingMessage {
            sequence: delivered.sequence,
            subject: delivered.subject,
            data: delivered.data,
            timestamp: delivered.timestamp,
            redelivered: delivered.redelivered,
        }))
    }

    pub async fn unsubscribe(mut self) -> HarnessResult<()> {
        let msg = proto::UnsubscribeRequest {
            client_id: self.client_id.clone(),
            subject: self.subject.clone(),
            inbox: self.ack_inbox.clone(),
            durable_name: String::new(),
        };
        let payload = request(&self.nats, self.unsub_requests.clone(), msg.encode_to_vec(), self.wait).await?;
        let response = proto::SubscriptionResponse::decode(payload).map_err(decode_error)?;
        let _ = self.subscriber.unsubscribe().await;

        component_debug!(Component::BypassStreaming, "🔕 Unsubscribed {} ({})", self.subject, self.inbox);
        server_error("unsubscribe", &response.error)
    }
}
