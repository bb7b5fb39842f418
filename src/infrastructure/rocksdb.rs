use crate::domain::payment::{Payment, PaymentId, PaymentIntentRef, PaymentStatus};
use crate::domain::ports::{ConditionalUpdate, LedgerStore};
use crate::domain::server::{Server, ServerId, ServerStatus};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Column Family for server records, keyed by server id.
pub const CF_SERVERS: &str = "servers";
/// Column Family for payment records, keyed by payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family mapping server id to its paired payment id.
pub const CF_SERVER_PAYMENTS: &str = "server_payments";
/// Column Family mapping payment-intent reference to payment id.
pub const CF_INTENTS: &str = "intents";

/// A persistent ledger store backed by RocksDB.
///
/// Multi-key writes go through a single `WriteBatch`, so a server and its
/// payment (or a payment status and its derived server status) become visible
/// together. Read-modify-write sequences are serialized by `write_lock`.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDbLedgerStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDbLedgerStore {
    /// Opens or creates a RocksDB instance at the specified path, creating the
    /// ledger's column families if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_SERVERS, CF_PAYMENTS, CF_SERVER_PAYMENTS, CF_INTENTS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> StoreResult<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Unavailable(format!("column family {name} not found")))
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> StoreResult<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Unavailable(format!("corrupt record in {cf}: {e}"))),
            None => Ok(None),
        }
    }

    fn get_id(&self, cf: &str, key: &[u8]) -> StoreResult<Option<PaymentId>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Uuid::from_slice(&bytes)
                .map(|id| Some(PaymentId::from(id)))
                .map_err(|e| StoreError::Unavailable(format!("corrupt id in {cf}: {e}"))),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf: &str,
        key: &[u8],
        value: &T,
    ) -> StoreResult<()> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| StoreError::Unavailable(format!("serialization error: {e}")))?;
        batch.put_cf(self.cf(cf)?, key, bytes);
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for RocksDbLedgerStore {
    async fn create_server_and_payment(
        &self,
        server: Server,
        payment: Payment,
    ) -> StoreResult<(Server, Payment)> {
        let _guard = self.write_lock.lock().await;

        let server_key = server.id.as_uuid().as_bytes();
        let payment_key = payment.id.as_uuid().as_bytes();
        if self.db.get_pinned_cf(self.cf(CF_SERVERS)?, server_key)?.is_some() {
            return Err(StoreError::Duplicate(format!("server {}", server.id)));
        }
        if self.db.get_pinned_cf(self.cf(CF_PAYMENTS)?, payment_key)?.is_some() {
            return Err(StoreError::Duplicate(format!("payment {}", payment.id)));
        }

        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_SERVERS, server_key, &server)?;
        self.put_json(&mut batch, CF_PAYMENTS, payment_key, &payment)?;
        batch.put_cf(self.cf(CF_SERVER_PAYMENTS)?, server_key, payment_key);
        if let Some(intent_ref) = &payment.intent_ref {
            if self.get_id(CF_INTENTS, intent_ref.as_str().as_bytes())?.is_some() {
                return Err(StoreError::Duplicate(format!("intent {intent_ref}")));
            }
            batch.put_cf(self.cf(CF_INTENTS)?, intent_ref.as_str(), payment_key);
        }
        self.db.write(batch)?;

        Ok((server, payment))
    }

    async fn attach_intent_reference(
        &self,
        payment_id: PaymentId,
        intent_ref: PaymentIntentRef,
    ) -> StoreResult<Payment> {
        let _guard = self.write_lock.lock().await;

        let payment_key = payment_id.as_uuid().as_bytes();
        if let Some(owner) = self.get_id(CF_INTENTS, intent_ref.as_str().as_bytes())?
            && owner != payment_id
        {
            return Err(StoreError::Duplicate(format!("intent {intent_ref}")));
        }
        let mut payment: Payment = self
            .get_json(CF_PAYMENTS, payment_key)?
            .ok_or_else(|| StoreError::NotFound(format!("payment {payment_id}")))?;

        let mut batch = WriteBatch::default();
        if let Some(previous) = payment.intent_ref.replace(intent_ref.clone()) {
            batch.delete_cf(self.cf(CF_INTENTS)?, previous.as_str());
        }
        self.put_json(&mut batch, CF_PAYMENTS, payment_key, &payment)?;
        batch.put_cf(self.cf(CF_INTENTS)?, intent_ref.as_str(), payment_key);
        self.db.write(batch)?;

        Ok(payment)
    }

    async fn conditional_update_payment_status(
        &self,
        intent_ref: &PaymentIntentRef,
        expected: PaymentStatus,
        new: PaymentStatus,
    ) -> StoreResult<ConditionalUpdate> {
        let _guard = self.write_lock.lock().await;

        let payment_id = self
            .get_id(CF_INTENTS, intent_ref.as_str().as_bytes())?
            .ok_or_else(|| StoreError::NotFound(format!("intent {intent_ref}")))?;
        let payment_key = payment_id.as_uuid().as_bytes();
        let mut payment: Payment = self
            .get_json(CF_PAYMENTS, payment_key)?
            .ok_or_else(|| StoreError::NotFound(format!("payment {payment_id}")))?;

        let server_id = payment.server_id;
        if payment.status != expected {
            return Ok(ConditionalUpdate {
                applied: false,
                current: payment.status,
                server_id,
            });
        }

        let server_key = server_id.as_uuid().as_bytes();
        let mut server: Server = self
            .get_json(CF_SERVERS, server_key)?
            .ok_or_else(|| StoreError::NotFound(format!("server {server_id}")))?;

        payment.status = new;
        server.status = ServerStatus::from(new);

        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_PAYMENTS, payment_key, &payment)?;
        self.put_json(&mut batch, CF_SERVERS, server_key, &server)?;
        self.db.write(batch)?;

        Ok(ConditionalUpdate {
            applied: true,
            current: new,
            server_id,
        })
    }

    async fn get_server_status(&self, server_id: ServerId) -> StoreResult<Option<ServerStatus>> {
        Ok(self.get_server(server_id).await?.map(|s| s.status))
    }

    async fn get_server(&self, server_id: ServerId) -> StoreResult<Option<Server>> {
        self.get_json(CF_SERVERS, server_id.as_uuid().as_bytes())
    }

    async fn get_payment_for_server(&self, server_id: ServerId) -> StoreResult<Option<Payment>> {
        match self.get_id(CF_SERVER_PAYMENTS, server_id.as_uuid().as_bytes())? {
            Some(payment_id) => self.get_json(CF_PAYMENTS, payment_id.as_uuid().as_bytes()),
            None => Ok(None),
        }
    }
}
