use chrono::Utc;
use dotenv::dotenv;
use stale_sweep::config::{StorageBackend, StorageSettings};
use stale_sweep::prelude::*;
use stale_sweep::storage::{S3Storage, Storage};
use stale_sweep::sweep::{ExecutorSettings, Sweeper};
use std::env;
use std::sync::Arc;

// Needs AWS credentials and AWS_REGION in the environment or a .env file.
#[tokio::test]
#[ignore]
async fn test_s3_connectivity() -> Result<()> {
    dotenv().ok();

    let settings = StorageSettings {
        backend: StorageBackend::S3,
        region: Some(env::var("AWS_REGION").expect("AWS_REGION must be set")),
        endpoint_url: env::var("AWS_ENDPOINT_URL").ok(),
        force_path_style: env::var("AWS_ENDPOINT_URL").is_ok(),
        local_root: None,
    };
    let s3_storage = Arc::new(S3Storage::new(&settings).await?);

    let containers = s3_storage.list_containers().await?;
    println!("Found {} buckets", containers.len());

    // Dry run only: decisions are computed but nothing is deleted.
    let sweeper = Sweeper::new(s3_storage, ExecutorSettings::default());
    let summary = sweeper.run_sweep(Utc::now(), 180, 4).await?;
    assert!(summary.dry_run);
    assert_eq!(summary.evaluated, containers.len());
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
