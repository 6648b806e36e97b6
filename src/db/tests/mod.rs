use super::*;
use tempfile::NamedTempFile;


/// Fresh database in a temp file; keep the file alive for the test's duration
async fn setup_db() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

async fn follow(db: &Database, name: &str, episode: u32) {
    db.upsert_subscription(UpsertSubscriptionParams {
        name,
        status: SubscriptionStatus::Following,
        episode,
        source: "mikan",
    })
    .await
    .unwrap();
}

fn new_entry(subscription: &str, episode: u32) -> NewDownloadEntry {
    NewDownloadEntry {
        subscription: subscription.to_string(),
        episode,
        title: format!("[LoliHouse] {subscription} - {episode:02} [1080p]"),
        locator: format!("magnet:?xt=urn:btih:{subscription}{episode}"),
    }
}
