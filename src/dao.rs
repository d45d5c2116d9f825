use crate::model::{GiftField, GiftRecord, GiftSpecification};
use chrono::{DateTime, Utc};
use sqlx::error::ErrorKind;
use sqlx::types::Json;
use sqlx::{Error, Pool, Postgres};
use std::future::Future;

/// Storage collaborator of the share flow.
///
/// `insert_if_absent` must be atomic at the storage layer: two callers racing on the
/// same id see exactly one `true`.
pub trait GiftStore: Clone + Send + Sync + 'static {
    /// Claims `id`. `Ok(false)` means the id is already taken.
    fn insert_if_absent(
        &self,
        id: &str,
        created_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, Error>> + Send;

    fn publish(
        &self,
        id: &str,
        gift: &GiftSpecification,
    ) -> impl Future<Output = Result<GiftRecord, Error>> + Send;

    /// Frees a claimed id whose gift was never published. Published gifts are kept.
    fn release(&self, id: &str) -> impl Future<Output = Result<(), Error>> + Send;

    /// Reads a gift, ignoring ids that were claimed but never published.
    fn get_published(&self, id: &str)
        -> impl Future<Output = Result<Option<GiftRecord>, Error>> + Send;
}

#[derive(Clone)]
pub struct PgGiftStore {
    db_connection_pool: Pool<Postgres>,
}

impl PgGiftStore {
    pub fn new(db_connection_pool: Pool<Postgres>) -> Self {
        Self { db_connection_pool }
    }
}

impl GiftStore for PgGiftStore {
    async fn insert_if_absent(&self, id: &str, created_at: DateTime<Utc>) -> Result<bool, Error> {
        let inserted = sqlx::query("insert into gifts(unique_id, created_at) values ($1, $2)")
            .bind(id)
            .bind(created_at)
            .execute(&self.db_connection_pool)
            .await;
        match inserted {
            Ok(_) => Ok(true),
            Err(Error::Database(db_err)) if db_err.kind() == ErrorKind::UniqueViolation => {
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    async fn publish(&self, id: &str, gift: &GiftSpecification) -> Result<GiftRecord, Error> {
        sqlx::query_as(
            r#"
              with published_gift as (
                  update gifts set title = $1, template = $2, fields = $3, published = true
                  where unique_id = $4
                  returning unique_id, title, template, fields, published, created_at
              )
              select unique_id, title, template, fields, published, created_at from published_gift
            "#,
        )
        .bind(&gift.title)
        .bind(gift.template.as_str())
        .bind(Json(&gift.fields))
        .bind(id)
        .fetch_one(&self.db_connection_pool)
        .await
    }

    async fn release(&self, id: &str) -> Result<(), Error> {
        sqlx::query("delete from gifts where unique_id = $1 and not published")
            .bind(id)
            .execute(&self.db_connection_pool)
            .await?;
        Ok(())
    }

    async fn get_published(&self, id: &str) -> Result<Option<GiftRecord>, Error> {
        sqlx::query_as(
            r#"
              select unique_id, title, template, fields, published, created_at
              from gifts where unique_id = $1 and published
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db_connection_pool)
        .await
    }
}

#[cfg(test)]
pub use memory::MemoryGiftStore;


#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TemplateKind;

    fn birthday() -> GiftSpecification {
        GiftSpecification {
            template: TemplateKind::Birthday,
            title: "Happy birthday".into(),
            fields: vec![GiftField::Size {
                name: "candles".into(),
                value: 30,
            }],
        }
    }

    #[tokio::test]
    async fn second_claim_of_same_id_is_a_collision() {
        let store = MemoryGiftStore::default();
        assert!(store.insert_if_absent("abc123def456", Utc::now()).await.unwrap());
        assert!(!store.insert_if_absent("abc123def456", Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn unpublished_ids_are_not_readable() {
        let store = MemoryGiftStore::default();
        store.insert_if_absent("abc123def456", Utc::now()).await.unwrap();
        assert!(store.get_published("abc123def456").await.unwrap().is_none());

        let record = store.publish("abc123def456", &birthday()).await.unwrap();
        assert!(record.published);
        assert_eq!(record.template, "birthday");

        let read = store.get_published("abc123def456").await.unwrap().unwrap();
        assert_eq!(read.title, "Happy birthday");
        assert_eq!(read.fields.0.len(), 1);
    }

    #[tokio::test]
    async fn publishing_an_unclaimed_id_fails() {
        let store = MemoryGiftStore::default();
        let result = store.publish("never-claimed", &birthday()).await;
        assert!(matches!(result, Err(Error::RowNotFound)));
    }

    #[tokio::test]
    async fn release_frees_only_unpublished_ids() {
        let store = MemoryGiftStore::default();
        store.insert_if_absent("abc123def456", Utc::now()).await.unwrap();
        store.insert_if_absent("xyz789ghi012", Utc::now()).await.unwrap();
        store.publish("xyz789ghi012", &birthday()).await.unwrap();

        store.release("abc123def456").await.unwrap();
        store.release("xyz789ghi012").await.unwrap();
        store.release("never-claimed").await.unwrap();

        assert_eq!(store.claimed_ids(), vec!["xyz789ghi012".to_string()]);
        assert!(store.insert_if_absent("abc123def456", Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn transient_failures_are_reported_as_errors() {
        let store = MemoryGiftStore::default();
        store.fail_next(1);
        assert!(store.insert_if_absent("abc123def456", Utc::now()).await.is_err());
        assert!(store.insert_if_absent("abc123def456", Utc::now()).await.unwrap());
    }
}
