use std::{
    collections::HashMap,
    str::FromStr,
    sync::{Arc, Mutex, OnceLock},
    time::Duration,
};

use anyhow::anyhow;
use harvest_core::{BuyerId, ChatRoomId, MessageId, SellerId, UserId};
use pasetors::{keys::SymmetricKey, version4::V4};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, watch, RwLock};
use uuid::Uuid;

use super::{rate_limit::FixedWindowLimiter, registry::ConnectionRegistry, store::ChatStore};

type RoomListeners = HashMap<Uuid, mpsc::Sender<String>>;
pub(crate) type RoomGroups = HashMap<ChatRoomId, RoomListeners>;

pub const DEFAULT_JSON_BODY_LIMIT_BYTES: usize = 1_048_576;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE: u32 = 60;
pub const DEFAULT_MESSAGE_RATE_WINDOW_SECS: u64 = 30;
pub const DEFAULT_MESSAGE_RATE_MAX_PER_WINDOW: u32 = 20;
pub const DEFAULT_GATEWAY_OUTBOUND_QUEUE: usize = 256;
pub const DEFAULT_MAX_GATEWAY_EVENT_BYTES: usize = harvest_protocol::MAX_EVENT_BYTES;
pub(crate) const METRICS_TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub(crate) static METRICS_STATE: OnceLock<MetricsState> = OnceLock::new();

#[derive(Default)]
pub(crate) struct MetricsState {
    pub(crate) auth_failures: Mutex<HashMap<&'static str, u64>>,
    pub(crate) rate_limit_hits: Mutex<HashMap<(&'static str, &'static str), u64>>,
    pub(crate) ws_disconnects: Mutex<HashMap<&'static str, u64>>,
    pub(crate) gateway_events_emitted: Mutex<HashMap<(String, String), u64>>,
    pub(crate) gateway_events_dropped: Mutex<HashMap<(String, String, String), u64>>,
    pub(crate) gateway_events_parse_rejected: Mutex<HashMap<(String, String), u64>>,
}

/// Runtime mode. Only non-production modes accept the development
/// identity bypass during the gateway handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
}

impl Environment {
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "production" => Ok(Self::Production),
            "development" => Ok(Self::Development),
            other => Err(anyhow!(
                "unknown environment {other:?}: expected `production` or `development`"
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
    pub rate_limit_requests_per_minute: u32,
    pub message_rate_window: Duration,
    pub message_rate_max_per_window: u32,
    pub gateway_outbound_queue: usize,
    pub max_gateway_event_bytes: usize,
    pub allowed_origins: Vec<String>,
    pub token_secret: Option<String>,
    pub environment: Environment,
    pub database_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_JSON_BODY_LIMIT_BYTES,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            rate_limit_requests_per_minute: DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE,
            message_rate_window: Duration::from_secs(DEFAULT_MESSAGE_RATE_WINDOW_SECS),
            message_rate_max_per_window: DEFAULT_MESSAGE_RATE_MAX_PER_WINDOW,
            gateway_outbound_queue: DEFAULT_GATEWAY_OUTBOUND_QUEUE,
            max_gateway_event_bytes: DEFAULT_MAX_GATEWAY_EVENT_BYTES,
            allowed_origins: Vec::new(),
            token_secret: None,
            environment: Environment::Production,
            database_url: None,
        }
    }
}

#[derive(Clone)]
pub(crate) struct RuntimeConfig {
    pub(crate) gateway_outbound_queue: usize,
    pub(crate) max_gateway_event_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionControl {
    Open,
    Close,
}

#[derive(Clone)]
pub struct AppState {
    pub(crate) store: ChatStore,
    pub(crate) token_key: Option<Arc<SymmetricKey<V4>>>,
    pub(crate) environment: Environment,
    pub(crate) registry: Arc<RwLock<ConnectionRegistry>>,
    pub(crate) room_groups: Arc<RwLock<RoomGroups>>,
    pub(crate) message_limiter: Arc<RwLock<FixedWindowLimiter>>,
    pub(crate) connection_controls: Arc<RwLock<HashMap<Uuid, watch::Sender<ConnectionControl>>>>,
    pub(crate) runtime: Arc<RuntimeConfig>,
}

impl AppState {
    pub(crate) fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let token_key = match config.token_secret.as_deref().map(str::trim) {
            Some("") => return Err(anyhow!("token secret cannot be blank")),
            Some(secret) => {
                // Stretch the operator-supplied secret to the 32-byte
                // symmetric key pasetors requires.
                let digest = Sha256::digest(secret.as_bytes());
                let key = SymmetricKey::<V4>::from(digest.as_slice())
                    .map_err(|e| anyhow!("token key init failed: {e}"))?;
                Some(Arc::new(key))
            }
            None => None,
        };
        let store = ChatStore::new(config.database_url.as_deref())?;

        Ok(Self {
            store,
            token_key,
            environment: config.environment,
            registry: Arc::new(RwLock::new(ConnectionRegistry::default())),
            room_groups: Arc::new(RwLock::new(HashMap::new())),
            message_limiter: Arc::new(RwLock::new(FixedWindowLimiter::new(
                config.message_rate_window,
                config.message_rate_max_per_window,
            ))),
            connection_controls: Arc::new(RwLock::new(HashMap::new())),
            runtime: Arc::new(RuntimeConfig {
                gateway_outbound_queue: config.gateway_outbound_queue,
                max_gateway_event_bytes: config.max_gateway_event_bytes,
            }),
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct BuyerRecord {
    pub(crate) buyer_id: BuyerId,
    pub(crate) owner_user_id: UserId,
    pub(crate) created_at_unix: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct SellerRecord {
    pub(crate) seller_id: SellerId,
    pub(crate) owner_user_id: UserId,
    pub(crate) created_at_unix: i64,
}

/// A chat room together with its participants' owning identities, the
/// full context every authorization decision needs.
#[derive(Debug, Clone)]
pub(crate) struct RoomContext {
    pub(crate) chat_room_id: ChatRoomId,
    pub(crate) buyer_id: BuyerId,
    pub(crate) seller_id: SellerId,
    pub(crate) buyer_owner_user_id: UserId,
    pub(crate) seller_owner_user_id: UserId,
    pub(crate) product_ref: Option<String>,
    pub(crate) created_at_unix: i64,
}

impl RoomContext {
    pub(crate) fn is_participant_owner(&self, user: &UserId) -> bool {
        self.buyer_owner_user_id == *user || self.seller_owner_user_id == *user
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MessageRecord {
    pub(crate) message_id: MessageId,
    pub(crate) chat_room_id: ChatRoomId,
    pub(crate) sender_id: UserId,
    pub(crate) content: String,
    pub(crate) image_url: Option<String>,
    pub(crate) image_mime: Option<String>,
    pub(crate) is_read: bool,
    pub(crate) created_at_unix: i64,
}
