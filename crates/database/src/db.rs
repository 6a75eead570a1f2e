use anyhow::Result;
use mongodb::bson::Document;
use mongodb::options::IndexOptions;
use mongodb::{Client, Database, IndexModel};

pub async fn get_db(uri: &str, db_name: &str) -> Result<Database> {
    let client = Client::with_uri_str(uri).await?;
    Ok(client.database(db_name))
}

/// Creates a unique index if it does not exist yet. Index creation is
/// idempotent on the server side, so this is safe to run at every startup.
pub async fn ensure_unique_index(
    db: &Database, collection: &str, keys: Document,
) -> Result<()> {
    let model = IndexModel::builder()
        .keys(keys.clone())
        .options(IndexOptions::builder().unique(true).build())
        .build();

    db.collection::<Document>(collection)
        .create_index(model, None)
        .await?;

    tracing::debug!("unique index ensured on {}: {:?}", collection, keys);
    Ok(())
}
