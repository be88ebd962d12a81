use anyhow::{Context, Result};
use object_store::ObjectStore;
use object_store::aws::{AmazonS3Builder, AmazonS3ConfigKey};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;

/// Property controlling how many objects go into one bulk-delete request.
pub const DELETE_BATCH_SIZE_PROPERTY: &str = "s3.delete.batch-size";

pub const DEFAULT_DELETE_BATCH_SIZE: usize = 250;

/// S3 rejects `DeleteObjects` requests with more keys than this.
pub const MAX_DELETE_BATCH_SIZE: usize = 1000;

/// Create an S3 client for `bucket` from a flat property mapping.
pub fn create_s3_store(
    bucket: &str,
    properties: &HashMap<String, String>,
) -> Result<Arc<dyn ObjectStore>> {
    let store = create_s3_builder(bucket, properties)?
        .build()
        .with_context(|| format!("Failed to build S3 client for bucket '{bucket}'"))?;
    Ok(Arc::new(store))
}

/// Create an S3 builder for `bucket`.
///
/// Starts from the `AWS_*` environment, then applies the properties. Iceberg style
/// names (`s3.endpoint`, `s3.access-key-id`, `s3.secret-access-key`,
/// `s3.session-token`, `s3.path-style-access`, `s3.region`, `client.region`) are
/// translated, any other key that `object_store` recognizes is passed through and
/// the rest is ignored.
pub fn create_s3_builder(
    bucket: &str,
    properties: &HashMap<String, String>,
) -> Result<AmazonS3Builder> {
    if bucket.is_empty() {
        return Err(anyhow::anyhow!("S3 location must specify a bucket"));
    }

    let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);

    // Sorted so that a native key and its Iceberg alias resolve the same way every time
    let sorted: BTreeMap<&String, &String> = properties.iter().collect();
    for (key, value) in sorted {
        builder = match key.as_str() {
            "s3.endpoint" => {
                let builder = builder.with_endpoint(value);
                if value.starts_with("http://") {
                    builder.with_allow_http(true)
                } else {
                    builder
                }
            }
            "s3.access-key-id" => builder.with_access_key_id(value),
            "s3.secret-access-key" => builder.with_secret_access_key(value),
            "s3.session-token" => builder.with_token(value),
            "s3.region" | "client.region" => builder.with_region(value),
            "s3.path-style-access" => {
                let path_style: bool = parse_property(key, value)?;
                builder.with_virtual_hosted_style_request(!path_style)
            }
            DELETE_BATCH_SIZE_PROPERTY => builder,
            other => match other.parse::<AmazonS3ConfigKey>() {
                Ok(config_key) => builder.with_config(config_key, value),
                Err(_) => {
                    tracing::trace!(property = %other, "Ignoring unknown S3 property");
                    builder
                }
            },
        };
    }

    Ok(builder)
}

/// Bulk-delete batch size from `s3.delete.batch-size`, clamped to what S3 accepts.
pub fn delete_batch_size(properties: &HashMap<String, String>) -> Result<usize> {
    match properties.get(DELETE_BATCH_SIZE_PROPERTY) {
        Some(value) => {
            let size: usize = parse_property(DELETE_BATCH_SIZE_PROPERTY, value)?;
            Ok(size.clamp(1, MAX_DELETE_BATCH_SIZE))
        }
        None => Ok(DEFAULT_DELETE_BATCH_SIZE),
    }
}

fn parse_property<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {key}: '{value}'"))
}
