use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use anyhow::anyhow;
use harvest_core::{BuyerId, ChatRoomId, MessageId, SellerId, UserId};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tokio::sync::{OnceCell, RwLock};

use super::{
    core::{BuyerRecord, MessageRecord, RoomContext, SellerRecord},
    errors::ChatFailure,
};

#[derive(Debug, Clone)]
struct RoomRecord {
    chat_room_id: ChatRoomId,
    buyer_id: BuyerId,
    seller_id: SellerId,
    product_ref: Option<String>,
    created_at_unix: i64,
}

#[derive(Default)]
struct RoomTable {
    by_id: HashMap<ChatRoomId, RoomRecord>,
    by_pair: HashMap<(BuyerId, SellerId), ChatRoomId>,
}

/// Persistence access for participants, rooms, and messages. Backed by
/// Postgres when a database url is configured, otherwise by in-process
/// maps with the same semantics (uniqueness of the buyer/seller pair
/// included), which is what the test suites run against.
#[derive(Clone)]
pub(crate) struct ChatStore {
    pool: Option<PgPool>,
    init: Arc<OnceCell<()>>,
    buyers: Arc<RwLock<HashMap<BuyerId, BuyerRecord>>>,
    sellers: Arc<RwLock<HashMap<SellerId, SellerRecord>>>,
    rooms: Arc<RwLock<RoomTable>>,
    messages: Arc<RwLock<HashMap<ChatRoomId, Vec<MessageRecord>>>>,
}

impl ChatStore {
    pub(crate) fn new(database_url: Option<&str>) -> anyhow::Result<Self> {
        let pool = if let Some(database_url) = database_url {
            Some(
                PgPoolOptions::new()
                    .max_connections(10)
                    .connect_lazy(database_url)
                    .map_err(|e| anyhow!("postgres pool init failed: {e}"))?,
            )
        } else {
            None
        };

        Ok(Self {
            pool,
            init: Arc::new(OnceCell::new()),
            buyers: Arc::new(RwLock::new(HashMap::new())),
            sellers: Arc::new(RwLock::new(HashMap::new())),
            rooms: Arc::new(RwLock::new(RoomTable::default())),
            messages: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    async fn ensure_schema(&self) -> Result<(), ChatFailure> {
        const SCHEMA_INIT_LOCK_ID: i64 = 0x4841_5256_4553_5421;
        let Some(pool) = &self.pool else {
            return Ok(());
        };

        self.init
            .get_or_try_init(|| async move {
                let mut tx = pool.begin().await?;
                sqlx::query("SELECT pg_advisory_xact_lock($1)")
                    .bind(SCHEMA_INIT_LOCK_ID)
                    .execute(&mut *tx)
                    .await?;

                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS buyers (
                        buyer_id TEXT PRIMARY KEY,
                        owner_user_id TEXT NOT NULL,
                        created_at_unix BIGINT NOT NULL
                    )",
                )
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS sellers (
                        seller_id TEXT PRIMARY KEY,
                        owner_user_id TEXT NOT NULL,
                        created_at_unix BIGINT NOT NULL
                    )",
                )
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS chat_rooms (
                        chat_room_id TEXT PRIMARY KEY,
                        buyer_id TEXT NOT NULL REFERENCES buyers(buyer_id) ON DELETE CASCADE,
                        seller_id TEXT NOT NULL REFERENCES sellers(seller_id) ON DELETE CASCADE,
                        product_ref TEXT NULL,
                        created_at_unix BIGINT NOT NULL
                    )",
                )
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "CREATE UNIQUE INDEX IF NOT EXISTS idx_chat_rooms_pair_unique
                        ON chat_rooms(buyer_id, seller_id)",
                )
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS messages (
                        message_id TEXT PRIMARY KEY,
                        chat_room_id TEXT NOT NULL
                            REFERENCES chat_rooms(chat_room_id) ON DELETE CASCADE,
                        sender_id TEXT NOT NULL,
                        content TEXT NOT NULL DEFAULT '',
                        image_url TEXT NULL,
                        image_mime TEXT NULL,
                        is_read BOOLEAN NOT NULL DEFAULT FALSE,
                        created_at_unix BIGINT NOT NULL
                    )",
                )
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS idx_messages_room_created
                        ON messages(chat_room_id, created_at_unix)",
                )
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(internal)?;
        Ok(())
    }

    pub(crate) async fn create_buyer(
        &self,
        owner_user_id: &UserId,
        now_unix: i64,
    ) -> Result<BuyerRecord, ChatFailure> {
        let record = BuyerRecord {
            buyer_id: BuyerId::new(),
            owner_user_id: owner_user_id.clone(),
            created_at_unix: now_unix,
        };

        if let Some(pool) = &self.pool {
            self.ensure_schema().await?;
            sqlx::query(
                "INSERT INTO buyers (buyer_id, owner_user_id, created_at_unix)
                 VALUES ($1, $2, $3)",
            )
            .bind(record.buyer_id.to_string())
            .bind(record.owner_user_id.to_string())
            .bind(record.created_at_unix)
            .execute(pool)
            .await
            .map_err(internal)?;
            return Ok(record);
        }

        self.buyers
            .write()
            .await
            .insert(record.buyer_id, record.clone());
        Ok(record)
    }

    pub(crate) async fn create_seller(
        &self,
        owner_user_id: &UserId,
        now_unix: i64,
    ) -> Result<SellerRecord, ChatFailure> {
        let record = SellerRecord {
            seller_id: SellerId::new(),
            owner_user_id: owner_user_id.clone(),
            created_at_unix: now_unix,
        };

        if let Some(pool) = &self.pool {
            self.ensure_schema().await?;
            sqlx::query(
                "INSERT INTO sellers (seller_id, owner_user_id, created_at_unix)
                 VALUES ($1, $2, $3)",
            )
            .bind(record.seller_id.to_string())
            .bind(record.owner_user_id.to_string())
            .bind(record.created_at_unix)
            .execute(pool)
            .await
            .map_err(internal)?;
            return Ok(record);
        }

        self.sellers
            .write()
            .await
            .insert(record.seller_id, record.clone());
        Ok(record)
    }

    pub(crate) async fn find_buyer(
        &self,
        buyer_id: BuyerId,
    ) -> Result<Option<BuyerRecord>, ChatFailure> {
        if let Some(pool) = &self.pool {
            self.ensure_schema().await?;
            let row = sqlx::query(
                "SELECT owner_user_id, created_at_unix FROM buyers WHERE buyer_id = $1",
            )
            .bind(buyer_id.to_string())
            .fetch_optional(pool)
            .await
            .map_err(internal)?;
            let Some(row) = row else {
                return Ok(None);
            };
            return Ok(Some(BuyerRecord {
                buyer_id,
                owner_user_id: user_id_from_row(&row, "owner_user_id")?,
                created_at_unix: row.try_get("created_at_unix").map_err(internal)?,
            }));
        }

        Ok(self.buyers.read().await.get(&buyer_id).cloned())
    }

    pub(crate) async fn find_seller(
        &self,
        seller_id: SellerId,
    ) -> Result<Option<SellerRecord>, ChatFailure> {
        if let Some(pool) = &self.pool {
            self.ensure_schema().await?;
            let row = sqlx::query(
                "SELECT owner_user_id, created_at_unix FROM sellers WHERE seller_id = $1",
            )
            .bind(seller_id.to_string())
            .fetch_optional(pool)
            .await
            .map_err(internal)?;
            let Some(row) = row else {
                return Ok(None);
            };
            return Ok(Some(SellerRecord {
                seller_id,
                owner_user_id: user_id_from_row(&row, "owner_user_id")?,
                created_at_unix: row.try_get("created_at_unix").map_err(internal)?,
            }));
        }

        Ok(self.sellers.read().await.get(&seller_id).cloned())
    }

    /// Return the single room for the pair, creating it on first
    /// contact. The insert races against concurrent first contacts by
    /// design: the unique pair index makes the insert a no-op for the
    /// loser, and the follow-up lookup returns the winner's row.
    pub(crate) async fn find_or_create_room(
        &self,
        buyer: &BuyerRecord,
        seller: &SellerRecord,
        now_unix: i64,
    ) -> Result<RoomContext, ChatFailure> {
        if let Some(pool) = &self.pool {
            self.ensure_schema().await?;
            sqlx::query(
                "INSERT INTO chat_rooms (chat_room_id, buyer_id, seller_id, created_at_unix)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (buyer_id, seller_id) DO NOTHING",
            )
            .bind(ChatRoomId::new().to_string())
            .bind(buyer.buyer_id.to_string())
            .bind(seller.seller_id.to_string())
            .bind(now_unix)
            .execute(pool)
            .await
            .map_err(internal)?;

            let row = sqlx::query(
                "SELECT chat_room_id, product_ref, created_at_unix
                 FROM chat_rooms
                 WHERE buyer_id = $1 AND seller_id = $2",
            )
            .bind(buyer.buyer_id.to_string())
            .bind(seller.seller_id.to_string())
            .fetch_one(pool)
            .await
            .map_err(internal)?;

            let chat_room_id: String = row.try_get("chat_room_id").map_err(internal)?;
            return Ok(RoomContext {
                chat_room_id: ChatRoomId::try_from(chat_room_id)
                    .map_err(|_| ChatFailure::Internal)?,
                buyer_id: buyer.buyer_id,
                seller_id: seller.seller_id,
                buyer_owner_user_id: buyer.owner_user_id.clone(),
                seller_owner_user_id: seller.owner_user_id.clone(),
                product_ref: row.try_get("product_ref").map_err(internal)?,
                created_at_unix: row.try_get("created_at_unix").map_err(internal)?,
            });
        }

        let mut rooms = self.rooms.write().await;
        let pair = (buyer.buyer_id, seller.seller_id);
        let existing = rooms.by_pair.get(&pair).copied();
        let record = if let Some(chat_room_id) = existing {
            rooms
                .by_id
                .get(&chat_room_id)
                .cloned()
                .ok_or(ChatFailure::Internal)?
        } else {
            let record = RoomRecord {
                chat_room_id: ChatRoomId::new(),
                buyer_id: buyer.buyer_id,
                seller_id: seller.seller_id,
                product_ref: None,
                created_at_unix: now_unix,
            };
            rooms.by_pair.insert(pair, record.chat_room_id);
            rooms.by_id.insert(record.chat_room_id, record.clone());
            record
        };
        drop(rooms);

        Ok(RoomContext {
            chat_room_id: record.chat_room_id,
            buyer_id: record.buyer_id,
            seller_id: record.seller_id,
            buyer_owner_user_id: buyer.owner_user_id.clone(),
            seller_owner_user_id: seller.owner_user_id.clone(),
            product_ref: record.product_ref,
            created_at_unix: record.created_at_unix,
        })
    }

    pub(crate) async fn find_room(
        &self,
        chat_room_id: ChatRoomId,
    ) -> Result<Option<RoomContext>, ChatFailure> {
        if let Some(pool) = &self.pool {
            self.ensure_schema().await?;
            let row = sqlx::query(
                "SELECT r.buyer_id, r.seller_id, r.product_ref, r.created_at_unix,
                        b.owner_user_id AS buyer_owner_user_id,
                        s.owner_user_id AS seller_owner_user_id
                 FROM chat_rooms r
                 JOIN buyers b ON b.buyer_id = r.buyer_id
                 JOIN sellers s ON s.seller_id = r.seller_id
                 WHERE r.chat_room_id = $1",
            )
            .bind(chat_room_id.to_string())
            .fetch_optional(pool)
            .await
            .map_err(internal)?;
            let Some(row) = row else {
                return Ok(None);
            };
            return Ok(Some(room_context_from_row(chat_room_id, &row)?));
        }

        let rooms = self.rooms.read().await;
        let Some(record) = rooms.by_id.get(&chat_room_id).cloned() else {
            return Ok(None);
        };
        drop(rooms);

        let buyer_owner_user_id = self
            .buyers
            .read()
            .await
            .get(&record.buyer_id)
            .map(|buyer| buyer.owner_user_id.clone())
            .ok_or(ChatFailure::Internal)?;
        let seller_owner_user_id = self
            .sellers
            .read()
            .await
            .get(&record.seller_id)
            .map(|seller| seller.owner_user_id.clone())
            .ok_or(ChatFailure::Internal)?;

        Ok(Some(RoomContext {
            chat_room_id: record.chat_room_id,
            buyer_id: record.buyer_id,
            seller_id: record.seller_id,
            buyer_owner_user_id,
            seller_owner_user_id,
            product_ref: record.product_ref,
            created_at_unix: record.created_at_unix,
        }))
    }

    pub(crate) async fn list_rooms_for_owner(
        &self,
        owner_user_id: &UserId,
    ) -> Result<Vec<RoomContext>, ChatFailure> {
        if let Some(pool) = &self.pool {
            self.ensure_schema().await?;
            let rows = sqlx::query(
                "SELECT r.chat_room_id, r.buyer_id, r.seller_id, r.product_ref,
                        r.created_at_unix,
                        b.owner_user_id AS buyer_owner_user_id,
                        s.owner_user_id AS seller_owner_user_id
                 FROM chat_rooms r
                 JOIN buyers b ON b.buyer_id = r.buyer_id
                 JOIN sellers s ON s.seller_id = r.seller_id
                 WHERE b.owner_user_id = $1 OR s.owner_user_id = $1
                 ORDER BY r.created_at_unix ASC, r.chat_room_id ASC",
            )
            .bind(owner_user_id.to_string())
            .fetch_all(pool)
            .await
            .map_err(internal)?;

            let mut contexts = Vec::with_capacity(rows.len());
            for row in rows {
                let chat_room_id: String = row.try_get("chat_room_id").map_err(internal)?;
                let chat_room_id =
                    ChatRoomId::try_from(chat_room_id).map_err(|_| ChatFailure::Internal)?;
                contexts.push(room_context_from_row(chat_room_id, &row)?);
            }
            return Ok(contexts);
        }

        let rooms = self.rooms.read().await;
        let records: Vec<RoomRecord> = rooms.by_id.values().cloned().collect();
        drop(rooms);
        let buyers = self.buyers.read().await;
        let sellers = self.sellers.read().await;

        let mut contexts = Vec::new();
        for record in records {
            let Some(buyer) = buyers.get(&record.buyer_id) else {
                continue;
            };
            let Some(seller) = sellers.get(&record.seller_id) else {
                continue;
            };
            if buyer.owner_user_id != *owner_user_id && seller.owner_user_id != *owner_user_id {
                continue;
            }
            contexts.push(RoomContext {
                chat_room_id: record.chat_room_id,
                buyer_id: record.buyer_id,
                seller_id: record.seller_id,
                buyer_owner_user_id: buyer.owner_user_id.clone(),
                seller_owner_user_id: seller.owner_user_id.clone(),
                product_ref: record.product_ref,
                created_at_unix: record.created_at_unix,
            });
        }
        contexts.sort_by_key(|context| (context.created_at_unix, context.chat_room_id.to_string()));
        Ok(contexts)
    }

    pub(crate) async fn set_room_product(
        &self,
        chat_room_id: ChatRoomId,
        product_ref: Option<&str>,
    ) -> Result<(), ChatFailure> {
        if let Some(pool) = &self.pool {
            self.ensure_schema().await?;
            sqlx::query("UPDATE chat_rooms SET product_ref = $2 WHERE chat_room_id = $1")
                .bind(chat_room_id.to_string())
                .bind(product_ref)
                .execute(pool)
                .await
                .map_err(internal)?;
            return Ok(());
        }

        let mut rooms = self.rooms.write().await;
        if let Some(record) = rooms.by_id.get_mut(&chat_room_id) {
            record.product_ref = product_ref.map(ToOwned::to_owned);
        }
        Ok(())
    }

    pub(crate) async fn create_message(
        &self,
        chat_room_id: ChatRoomId,
        sender_id: &UserId,
        content: String,
        image_url: Option<String>,
        image_mime: Option<String>,
        now_unix: i64,
    ) -> Result<MessageRecord, ChatFailure> {
        let record = MessageRecord {
            message_id: MessageId::new(),
            chat_room_id,
            sender_id: sender_id.clone(),
            content,
            image_url,
            image_mime,
            is_read: false,
            created_at_unix: now_unix,
        };

        if let Some(pool) = &self.pool {
            self.ensure_schema().await?;
            sqlx::query(
                "INSERT INTO messages
                    (message_id, chat_room_id, sender_id, content, image_url, image_mime,
                     is_read, created_at_unix)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(record.message_id.to_string())
            .bind(record.chat_room_id.to_string())
            .bind(record.sender_id.to_string())
            .bind(&record.content)
            .bind(record.image_url.as_deref())
            .bind(record.image_mime.as_deref())
            .bind(record.is_read)
            .bind(record.created_at_unix)
            .execute(pool)
            .await
            .map_err(internal)?;
            return Ok(record);
        }

        self.messages
            .write()
            .await
            .entry(chat_room_id)
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    /// Bulk conditional read-marking: only messages of the room that the
    /// reader did not author and that are still unread flip, in one
    /// statement. Returns how many actually changed.
    pub(crate) async fn mark_messages_read(
        &self,
        chat_room_id: ChatRoomId,
        reader_user_id: &UserId,
        message_ids: &[MessageId],
    ) -> Result<u64, ChatFailure> {
        if let Some(pool) = &self.pool {
            self.ensure_schema().await?;
            let ids: Vec<String> = message_ids.iter().map(ToString::to_string).collect();
            let result = sqlx::query(
                "UPDATE messages
                 SET is_read = TRUE
                 WHERE chat_room_id = $1
                   AND message_id = ANY($2::text[])
                   AND sender_id <> $3
                   AND is_read = FALSE",
            )
            .bind(chat_room_id.to_string())
            .bind(&ids)
            .bind(reader_user_id.to_string())
            .execute(pool)
            .await
            .map_err(internal)?;
            return Ok(result.rows_affected());
        }

        let requested: HashSet<MessageId> = message_ids.iter().copied().collect();
        let mut messages = self.messages.write().await;
        let Some(room_messages) = messages.get_mut(&chat_room_id) else {
            return Ok(0);
        };
        let mut changed = 0;
        for message in room_messages.iter_mut() {
            if requested.contains(&message.message_id)
                && message.sender_id != *reader_user_id
                && !message.is_read
            {
                message.is_read = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    pub(crate) async fn list_messages(
        &self,
        chat_room_id: ChatRoomId,
    ) -> Result<Vec<MessageRecord>, ChatFailure> {
        if let Some(pool) = &self.pool {
            self.ensure_schema().await?;
            let rows = sqlx::query(
                "SELECT message_id, sender_id, content, image_url, image_mime, is_read,
                        created_at_unix
                 FROM messages
                 WHERE chat_room_id = $1
                 ORDER BY created_at_unix ASC, message_id ASC",
            )
            .bind(chat_room_id.to_string())
            .fetch_all(pool)
            .await
            .map_err(internal)?;

            let mut records = Vec::with_capacity(rows.len());
            for row in rows {
                let message_id: String = row.try_get("message_id").map_err(internal)?;
                records.push(MessageRecord {
                    message_id: MessageId::try_from(message_id)
                        .map_err(|_| ChatFailure::Internal)?,
                    chat_room_id,
                    sender_id: user_id_from_row(&row, "sender_id")?,
                    content: row.try_get("content").map_err(internal)?,
                    image_url: row.try_get("image_url").map_err(internal)?,
                    image_mime: row.try_get("image_mime").map_err(internal)?,
                    is_read: row.try_get("is_read").map_err(internal)?,
                    created_at_unix: row.try_get("created_at_unix").map_err(internal)?,
                });
            }
            return Ok(records);
        }

        Ok(self
            .messages
            .read()
            .await
            .get(&chat_room_id)
            .cloned()
            .unwrap_or_default())
    }
}

fn room_context_from_row(
    chat_room_id: ChatRoomId,
    row: &sqlx::postgres::PgRow,
) -> Result<RoomContext, ChatFailure> {
    let buyer_id: String = row.try_get("buyer_id").map_err(internal)?;
    let seller_id: String = row.try_get("seller_id").map_err(internal)?;
    Ok(RoomContext {
        chat_room_id,
        buyer_id: BuyerId::try_from(buyer_id).map_err(|_| ChatFailure::Internal)?,
        seller_id: SellerId::try_from(seller_id).map_err(|_| ChatFailure::Internal)?,
        buyer_owner_user_id: user_id_from_row(row, "buyer_owner_user_id")?,
        seller_owner_user_id: user_id_from_row(row, "seller_owner_user_id")?,
        product_ref: row.try_get("product_ref").map_err(internal)?,
        created_at_unix: row.try_get("created_at_unix").map_err(internal)?,
    })
}

fn user_id_from_row(row: &sqlx::postgres::PgRow, column: &str) -> Result<UserId, ChatFailure> {
    let value: String = row.try_get(column).map_err(internal)?;
    UserId::try_from(value).map_err(|_| ChatFailure::Internal)
}

fn internal<E: std::fmt::Display>(error: E) -> ChatFailure {
    tracing::error!(event = "store.query", error = %error);
    ChatFailure::Internal
}
