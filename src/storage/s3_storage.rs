use crate::config::StorageSettings;
use crate::error::{StorageError, StorageResult};
use crate::prelude::*;
use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::DateTime as SmithyDateTime;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::{config::Region, Client};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Mutex;
use tracing::{debug, info};

use super::{BatchDeleteResult, Container, FailedKey, ObjectPage, Storage, StorageObject};

const LIST_BUCKETS_PAGE: i32 = 1000;
const BUCKET_REGION_HEADER: &str = "x-amz-bucket-region";

pub struct S3Storage {
    client: Client,
    /// Off when a custom endpoint is configured; S3-compatible services
    /// answer every bucket on that one endpoint.
    route_by_region: bool,
    bucket_regions: Mutex<HashMap<String, String>>,
    regional_clients: Mutex<HashMap<String, Client>>,
}

impl S3Storage {
    pub async fn new(settings: &StorageSettings) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::v2024_03_28());
        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&config);
        if let Some(endpoint) = &settings.endpoint_url {
            if endpoint.trim().is_empty() {
                return Err(StorageError::S3Config("endpoint_url is empty".into()).into());
            }
            builder = builder.endpoint_url(endpoint);
        }
        builder = builder.force_path_style(settings.force_path_style);

        info!(
            region = settings.region.as_deref().unwrap_or("default"),
            endpoint = settings.endpoint_url.as_deref().unwrap_or("aws"),
            "Initialized S3 client"
        );

        Ok(Self {
            route_by_region: settings.endpoint_url.is_none(),
            ..Self::from_client(Client::from_conf(builder.build()))
        })
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            route_by_region: true,
            bucket_regions: Mutex::new(HashMap::new()),
            regional_clients: Mutex::new(HashMap::new()),
        }
    }

    fn home_region(&self) -> Option<&str> {
        self.client.config().region().map(|r| r.as_ref())
    }

    fn remember_region(&self, bucket: &str, region: &str) {
        self.bucket_regions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(bucket.to_string(), region.to_string());
    }

    /// The client that talks to the region `bucket` lives in.
    fn client_for(&self, bucket: &str) -> Client {
        if !self.route_by_region {
            return self.client.clone();
        }
        let region = self
            .bucket_regions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(bucket)
            .cloned();

        match region {
            Some(region) if self.home_region() != Some(region.as_str()) => {
                self.regional_client(&region)
            }
            _ => self.client.clone(),
        }
    }

    fn regional_client(&self, region: &str) -> Client {
        let mut clients = self
            .regional_clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        clients
            .entry(region.to_string())
            .or_insert_with(|| {
                debug!(region, "Creating regional S3 client");
                let conf = self
                    .client
                    .config()
                    .to_builder()
                    .region(Region::new(region.to_string()))
                    .build();
                Client::from_conf(conf)
            })
            .clone()
    }

    /// Runs a bucket-scoped call on the bucket's regional client. A redirect
    /// naming another region is followed once.
    async fn routed<T, E, F, Fut>(&self, operation: &str, bucket: &str, call: F) -> StorageResult<T>
    where
        F: Fn(Client) -> Fut + Send + Sync,
        Fut: Future<Output = std::result::Result<T, SdkError<E, HttpResponse>>> + Send,
        T: Send,
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        let err = match call(self.client_for(bucket)).await {
            Ok(output) => return Ok(output),
            Err(err) => err,
        };

        match redirect_region(&err) {
            Some(region) if self.route_by_region => {
                info!(bucket, region = %region, "Following S3 region redirect");
                self.remember_region(bucket, &region);
                call(self.client_for(bucket))
                    .await
                    .map_err(|e| classify(operation, e))
            }
            _ => Err(classify(operation, err)),
        }
    }
}

fn redirect_region<E>(err: &SdkError<E, HttpResponse>) -> Option<String> {
    let response = err.raw_response()?;
    if response.status().as_u16() != 301 {
        return None;
    }
    response
        .headers()
        .get(BUCKET_REGION_HEADER)
        .map(str::to_string)
}

fn to_chrono(ts: &SmithyDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.secs(), ts.subsec_nanos())
}

fn classify<E>(operation: &str, err: SdkError<E, HttpResponse>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StorageError::service_unavailable(operation, message)
        }
        SdkError::ServiceError(ctx) => {
            let code = ctx.err().code().unwrap_or("Unknown");
            classify_code(operation, code, ctx.raw().status().as_u16(), message)
        }
        _ => StorageError::S3Config(message),
    }
}

/// Maps an S3 error code and HTTP status onto the sweep's error taxonomy.
pub(crate) fn classify_code(operation: &str, code: &str, status: u16, message: String) -> StorageError {
    let operation = operation.to_string();
    match (code, status) {
        ("SlowDown" | "InternalError" | "ServiceUnavailable" | "RequestTimeout", _) => {
            StorageError::ServiceUnavailable { operation, message }
        }
        ("AccessDenied" | "AllAccessDisabled" | "InvalidAccessKeyId" | "SignatureDoesNotMatch", _)
        | (_, 401 | 403) => StorageError::PermissionDenied { operation, message },
        ("NoSuchBucket", _) | (_, 404) => StorageError::NotFound(message),
        (_, 429) | (_, 500..=599) => StorageError::ServiceUnavailable { operation, message },
        _ => StorageError::PreconditionFailed {
            operation,
            code: code.to_string(),
            message,
        },
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn list_containers(&self) -> StorageResult<Vec<Container>> {
        let mut containers = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_buckets()
                .max_buckets(LIST_BUCKETS_PAGE)
                .set_continuation_token(token.clone())
                .send()
                .await
                .map_err(|e| classify("list_containers", e))?;

            for bucket in output.buckets() {
                let Some(name) = bucket.name() else { continue };
                if let Some(region) = bucket.bucket_region() {
                    self.remember_region(name, region);
                }
                containers.push(Container::new(name));
            }

            match output.continuation_token() {
                Some(next) if token.as_deref() == Some(next) => {
                    return Err(StorageError::service_unavailable(
                        "list_containers",
                        format!("bucket listing repeated continuation token {}", next),
                    ));
                }
                Some(next) => token = Some(next.to_string()),
                None => break,
            }
        }

        debug!("Listed {} buckets", containers.len());
        Ok(containers)
    }

    async fn list_objects(
        &self,
        container: &str,
        continuation_token: Option<&str>,
    ) -> StorageResult<ObjectPage> {
        let output = self
            .routed("list_objects", container, move |client| async move {
                client
                    .list_objects_v2()
                    .bucket(container)
                    .set_continuation_token(continuation_token.map(str::to_string))
                    .send()
                    .await
            })
            .await?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|o| {
                Some(StorageObject {
                    key: o.key()?.to_string(),
                    last_modified: o.last_modified().and_then(to_chrono),
                })
            })
            .collect();

        let next_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ObjectPage {
            objects,
            next_token,
        })
    }

    async fn delete_objects(
        &self,
        container: &str,
        keys: &[String],
    ) -> StorageResult<BatchDeleteResult> {
        if keys.is_empty() {
            return Ok(BatchDeleteResult::default());
        }

        let identifiers = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| StorageError::S3Config(e.to_string()))?;
        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(true)
            .build()
            .map_err(|e| StorageError::S3Config(e.to_string()))?;

        let output = self
            .routed("delete_objects", container, move |client| {
                let delete = delete.clone();
                async move {
                    client
                        .delete_objects()
                        .bucket(container)
                        .delete(delete)
                        .send()
                        .await
                }
            })
            .await?;

        let failed: Vec<FailedKey> = output
            .errors()
            .iter()
            .map(|e| FailedKey {
                key: e.key().unwrap_or_default().to_string(),
                code: e.code().unwrap_or("Unknown").to_string(),
                message: e.message().unwrap_or_default().to_string(),
            })
            .collect();

        // Quiet mode only reports failures; everything else went through.
        let failed_keys: HashSet<&str> = failed.iter().map(|f| f.key.as_str()).collect();
        let deleted = keys
            .iter()
            .filter(|k| !failed_keys.contains(k.as_str()))
            .cloned()
            .collect();

        Ok(BatchDeleteResult { deleted, failed })
    }

    async fn delete_container(&self, container: &str) -> StorageResult<()> {
        self.routed("delete_container", container, move |client| async move {
            client.delete_bucket().bucket(container).send().await
        })
        .await?;

        info!("Deleted S3 bucket: {}", container);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("SlowDown", 503 ; "throttled")]
    #[test_case("InternalError", 500 ; "internal error")]
    #[test_case("Whatever", 502 ; "bad gateway")]
    #[test_case("TooManyRequests", 429 ; "rate limited")]
    fn transient_codes(code: &str, status: u16) {
        let err = classify_code("list_objects", code, status, "boom".into());
        assert!(matches!(err, StorageError::ServiceUnavailable { .. }));
        assert!(err.is_transient());
    }

    #[test_case("AccessDenied", 403 ; "access denied")]
    #[test_case("InvalidAccessKeyId", 403 ; "bad key")]
    fn permission_codes(code: &str, status: u16) {
        let err = classify_code("delete_container", code, status, "nope".into());
        assert!(matches!(err, StorageError::PermissionDenied { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn bucket_not_empty_is_a_precondition() {
        let err = classify_code("delete_container", "BucketNotEmpty", 409, "not empty".into());
        match err {
            StorageError::PreconditionFailed { code, .. } => assert_eq!(code, "BucketNotEmpty"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_bucket_is_not_found() {
        let err = classify_code("list_objects", "NoSuchBucket", 404, "gone".into());
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn region_redirect_is_a_precondition() {
        let err = classify_code("list_objects", "PermanentRedirect", 301, "moved".into());
        match &err {
            StorageError::PreconditionFailed { code, .. } => assert_eq!(code, "PermanentRedirect"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!err.is_transient());
    }

    fn client_in(region: &str) -> Client {
        let conf = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .build();
        Client::from_conf(conf)
    }

    fn region_of(client: &Client) -> Option<String> {
        client.config().region().map(|r| r.as_ref().to_string())
    }

    #[test]
    fn buckets_are_routed_to_their_region() {
        let storage = S3Storage::from_client(client_in("us-east-1"));
        storage.remember_region("eu-logs", "eu-west-1");
        storage.remember_region("eu-archive", "eu-west-1");
        storage.remember_region("home-bucket", "us-east-1");

        assert_eq!(region_of(&storage.client_for("eu-logs")).as_deref(), Some("eu-west-1"));
        assert_eq!(region_of(&storage.client_for("eu-archive")).as_deref(), Some("eu-west-1"));
        assert_eq!(region_of(&storage.client_for("home-bucket")).as_deref(), Some("us-east-1"));
        assert_eq!(region_of(&storage.client_for("unknown")).as_deref(), Some("us-east-1"));
        assert_eq!(storage.regional_clients.lock().unwrap().len(), 1);
    }

    #[test]
    fn custom_endpoints_keep_a_single_client() {
        let storage = S3Storage {
            route_by_region: false,
            ..S3Storage::from_client(client_in("us-east-1"))
        };
        storage.remember_region("eu-logs", "eu-west-1");

        assert_eq!(region_of(&storage.client_for("eu-logs")).as_deref(), Some("us-east-1"));
        assert!(storage.regional_clients.lock().unwrap().is_empty());
    }

    #[test]
    fn converts_smithy_timestamps() {
        let ts = SmithyDateTime::from_secs_and_nanos(1_700_000_000, 500);
        let converted = to_chrono(&ts).unwrap();
        assert_eq!(converted.timestamp(), 1_700_000_000);
        assert_eq!(converted.timestamp_subsec_nanos(), 500);
    }
}
