use mongodb::bson::{self, doc, Document};
use mongodb::error::{Error as MongoDbError, ErrorKind, WriteFailure};
use mongodb::options::FindOptions;
use mongodb::Database;

use futures::StreamExt;
use serde::{de::DeserializeOwned, Serialize};

use somnia_common::CryptoHash;

/// Returns true when the server rejected a write because of a unique index
/// violation. Callers use this to turn racing inserts into retries.
pub fn is_duplicate_key_error(err: &MongoDbError) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == 11000,
        ErrorKind::BulkWrite(failure) => failure
            .write_errors
            .as_ref()
            .map_or(false, |errors| errors.iter().any(|e| e.code == 11000)),
        ErrorKind::Command(command_error) => command_error.code == 11000,
        _ => false,
    }
}

#[allow(async_fn_in_trait)]
pub trait MongoDbObject:
    Sized + Serialize + DeserializeOwned + Sync + Unpin + Send + Clone
{
    const COLLECTION_NAME: &'static str;
    type Error: From<MongoDbError> + From<bson::ser::Error> + From<bson::de::Error>;

    fn populate_id(&mut self);
    fn get_id(&self) -> CryptoHash;

    async fn save_many(db: &Database, mut objs: Vec<Self>) -> Result<(), Self::Error> {
        if objs.is_empty() {
            return Ok(());
        }
        let col = db.collection::<Self>(Self::COLLECTION_NAME);
        objs.iter_mut().for_each(|obj| obj.populate_id());
        col.insert_many(objs, None).await?;
        Ok(())
    }

    async fn save(self, db: &Database) -> Result<(), Self::Error> {
        Self::save_many(db, vec![self]).await
    }

    async fn update(&self, db: &Database) -> Result<(), Self::Error> {
        let col = db.collection::<Document>(Self::COLLECTION_NAME);
        col.replace_one(
            doc! { "_id": self.get_id().to_hex_string() },
            bson::to_document(&self).map_err(Self::Error::from)?,
            None,
        )
        .await?;
        Ok(())
    }

    /// Conditional write: applies `update` only to the document matching
    /// `filter`, and reports whether anything matched. This is the guard
    /// used for phase transitions, where the filter pins the expected
    /// current state.
    async fn update_one_guarded(
        db: &Database, filter: Document, update: Document,
    ) -> Result<bool, Self::Error> {
        let col = db.collection::<Document>(Self::COLLECTION_NAME);
        let result = col.update_one(filter, update, None).await?;
        Ok(result.matched_count == 1)
    }

    async fn delete(self, db: &Database) -> Result<(), Self::Error> {
        let col = db.collection::<Document>(Self::COLLECTION_NAME);
        col.delete_one(doc! { "_id": self.get_id().to_hex_string() }, None)
            .await?;
        Ok(())
    }

    async fn select_one_by_index(
        db: &Database, index: &CryptoHash,
    ) -> Result<Option<Self>, Self::Error> {
        Self::select_one_by_filter(db, doc! { "_id": index.to_hex_string() }).await
    }

    async fn select_one_by_filter(
        db: &Database, filter: Document,
    ) -> Result<Option<Self>, Self::Error> {
        let col = db.collection::<Document>(Self::COLLECTION_NAME);
        let maybe_doc = col.find_one(filter, None).await?;
        match maybe_doc {
            Some(d) => Ok(Some(bson::from_document(d).map_err(Self::Error::from)?)),
            None => Ok(None),
        }
    }

    async fn select_many_simple(db: &Database, filter: Document) -> Result<Vec<Self>, Self::Error> {
        Self::select_many(db, filter, None, None).await
    }

    async fn select_many(
        db: &Database, filter: Document,
        sort: Option<Document>, limit: Option<i64>,
    ) -> Result<Vec<Self>, Self::Error> {
        let col = db.collection::<Document>(Self::COLLECTION_NAME);
        let options = FindOptions::builder().sort(sort).limit(limit).build();

        let mut docs = col.find(filter, Some(options)).await?;
        let mut vec = Vec::new();
        while let Some(d) = docs.next().await {
            vec.push(bson::from_document(d?).map_err(Self::Error::from)?);
        }
        Ok(vec)
    }

    async fn total_count(db: &Database, filter: Document) -> Result<u64, Self::Error> {
        let col = db.collection::<Document>(Self::COLLECTION_NAME);
        Ok(col.count_documents(filter, None).await?)
    }
}
