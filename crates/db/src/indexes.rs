use mongodb::error::ErrorKind;
use mongodb::options::IndexOptions;
use mongodb::{Database, IndexModel};
use tracing::{info, warn};

/// Server code for IndexKeySpecsConflict: an index with this name already
/// exists but was built with different options.
const INDEX_KEY_SPECS_CONFLICT: i32 = 86;

pub async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    ensure(
        db,
        "stt_jobs",
        vec![
            unique(bson::doc! { "job_id": 1 }),
            plain(bson::doc! { "job_type": 1, "status": 1 }),
            plain(bson::doc! { "room_id": 1, "member_id": 1 }),
        ],
    )
    .await?;

    ensure(
        db,
        "stt_segments",
        vec![
            plain(bson::doc! { "job_id": 1, "segment_number": 1 }),
            plain(bson::doc! { "job_id": 1, "start_time": 1 }),
        ],
    )
    .await?;

    ensure(
        db,
        "stt_error_logs",
        vec![
            plain(bson::doc! { "job_id": 1, "created_at": -1 }),
            plain(bson::doc! { "stage": 1 }),
        ],
    )
    .await?;

    ensure(db, "stt_rooms", vec![unique(bson::doc! { "room_id": 1 })]).await?;

    info!("job store indexes ready");
    Ok(())
}

fn plain(keys: bson::Document) -> IndexModel {
    IndexModel::builder().keys(keys).build()
}

fn unique(keys: bson::Document) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

fn is_spec_conflict(error: &mongodb::error::Error) -> bool {
    matches!(&*error.kind, ErrorKind::Command(cmd) if cmd.code == INDEX_KEY_SPECS_CONFLICT)
}

async fn ensure(
    db: &Database,
    collection: &str,
    indexes: Vec<IndexModel>,
) -> Result<(), mongodb::error::Error> {
    let coll = db.collection::<bson::Document>(collection);
    match coll.create_indexes(indexes.clone()).await {
        Ok(_) => Ok(()),
        // A definition changed since the collection was first indexed;
        // rebuild this collection's indexes from scratch and try again.
        Err(e) if is_spec_conflict(&e) => {
            warn!(collection, "index definition changed, rebuilding");
            coll.drop_indexes().await?;
            coll.create_indexes(indexes).await?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}
