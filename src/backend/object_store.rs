//! S3 backend built on the `object_store` crate.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use common::storage::create_s3_store;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use object_store::ObjectStore;
use object_store::path::Path as ObjectPath;
use tokio::sync::Mutex;
use url::Url;

use super::{BackendKind, FileBackend, FileReferenceStream};
use crate::delete::{DeleteResult, DeleteSummary};
use crate::error::{Result, StorageError};
use crate::file_reference::FileReference;

/// Builds the client for one bucket.
pub type StoreProvider = Arc<dyn Fn(&str) -> anyhow::Result<Arc<dyn ObjectStore>> + Send + Sync>;

pub fn store_provider<F>(provider: F) -> StoreProvider
where
    F: Fn(&str) -> anyhow::Result<Arc<dyn ObjectStore>> + Send + Sync + 'static,
{
    Arc::new(provider)
}

/// Lists and deletes objects in `s3://bucket/key` locations.
///
/// One client per bucket is created on first use and shared by all later calls
/// until [`FileBackend::close`].
pub struct ObjectStoreBackend {
    provider: StoreProvider,
    delete_batch_size: usize,
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl ObjectStoreBackend {
    /// Backend talking to S3, configured from client properties.
    pub fn new(properties: HashMap<String, String>) -> anyhow::Result<Self> {
        let delete_batch_size = common::storage::delete_batch_size(&properties)?;
        let provider = store_provider(move |bucket| create_s3_store(bucket, &properties));
        Ok(Self::with_provider(provider, delete_batch_size))
    }

    pub fn with_provider(provider: StoreProvider, delete_batch_size: usize) -> Self {
        Self {
            provider,
            delete_batch_size: delete_batch_size.max(1),
            stores: Mutex::new(HashMap::new()),
        }
    }

    pub fn delete_batch_size(&self) -> usize {
        self.delete_batch_size
    }

    async fn store_for(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        let mut stores = self.stores.lock().await;
        if let Some(store) = stores.get(bucket) {
            return Ok(Arc::clone(store));
        }

        let store = (self.provider)(bucket).map_err(|source| StorageError::Setup {
            backend: BackendKind::ObjectStore.name(),
            source,
        })?;
        tracing::debug!(bucket = %bucket, "Instantiated object store client");
        stores.insert(bucket.to_string(), Arc::clone(&store));
        Ok(store)
    }

    async fn try_delete(&self, location: &Url) -> Result<()> {
        let (bucket, path) = split_location(location)?;
        let store = self.store_for(&bucket).await?;
        store.delete(&path).await?;
        Ok(())
    }

    async fn delete_chunk(&self, chunk: Vec<Url>) -> DeleteSummary {
        let mut summary = DeleteSummary::EMPTY;
        let mut by_bucket: BTreeMap<String, Vec<ObjectPath>> = BTreeMap::new();

        for location in chunk {
            match split_location(&location) {
                Ok((bucket, path)) => by_bucket.entry(bucket).or_default().push(path),
                Err(e) => {
                    tracing::debug!(location = %location, error = %e, "Invalid location");
                    summary = summary + DeleteResult::Failure;
                }
            }
        }

        for (bucket, paths) in by_bucket {
            summary = summary + self.bulk_delete(&bucket, paths).await;
        }
        summary
    }

    /// One bulk request for `paths`. Everything the store did not confirm counts as
    /// failed; a request that fails as a whole fails every path in it.
    async fn bulk_delete(&self, bucket: &str, paths: Vec<ObjectPath>) -> DeleteSummary {
        let total = paths.len() as u64;
        let store = match self.store_for(bucket).await {
            Ok(store) => store,
            Err(e) => {
                tracing::debug!(bucket = %bucket, error = %e, "No client for bulk delete");
                return DeleteSummary::of(0, total);
            }
        };

        let requested = paths.into_iter().map(Ok::<_, object_store::Error>);
        let outcomes = store.delete_stream(stream::iter(requested).boxed());
        let summary = summarize_bulk_delete(total, outcomes).await;

        if summary.failed_count() > 0 {
            tracing::debug!(
                bucket = %bucket,
                failed = summary.failed_count(),
                total = total,
                "Failed to delete {} objects (no further details available)",
                summary.failed_count()
            );
        }
        summary
    }
}

#[async_trait]
impl FileBackend for ObjectStoreBackend {
    fn name(&self) -> &'static str {
        BackendKind::ObjectStore.name()
    }

    async fn list_recursively(&self, base_path: &Url) -> Result<FileReferenceStream> {
        let (bucket, prefix) = split_location(base_path)?;
        let store = self.store_for(&bucket).await?;
        let prefix = (!prefix.as_ref().is_empty()).then_some(prefix);

        Ok(list_objects(store, prefix, base_path.clone()).boxed())
    }

    async fn delete(&self, location: &Url) -> DeleteResult {
        match self.try_delete(location).await {
            Ok(()) => DeleteResult::Success,
            Err(e) => {
                tracing::debug!(location = %location, error = %e, "Failed to delete object");
                DeleteResult::Failure
            }
        }
    }

    async fn delete_multiple(&self, locations: BoxStream<'_, Url>) -> DeleteSummary {
        let mut chunks = locations.chunks(self.delete_batch_size);
        let mut summary = DeleteSummary::EMPTY;
        while let Some(chunk) = chunks.next().await {
            summary = summary + self.delete_chunk(chunk).await;
        }
        summary
    }

    async fn close(&self) -> Result<()> {
        let mut stores = self.stores.lock().await;
        let clients = stores.len();
        stores.clear();
        tracing::debug!(clients = clients, "Closed object store clients");
        Ok(())
    }
}

fn list_objects(
    store: Arc<dyn ObjectStore>,
    prefix: Option<ObjectPath>,
    base_path: Url,
) -> impl Stream<Item = Result<FileReference>> + Send + 'static {
    try_stream! {
        let mut objects = store.list(prefix.as_ref());
        while let Some(meta) = objects.next().await {
            let meta = meta?;
            let location = object_url(&base_path, &meta.location)?;
            let last_modified = meta.last_modified.timestamp_millis();
            yield FileReference::relativize(&base_path, &location, last_modified)?;
        }
    }
}

/// URL of `key` in the bucket of `base_path`.
///
/// Every key segment is percent-encoded, `%` included, so [`split_location`]
/// decodes the URL back to exactly `key`.
fn object_url(base_path: &Url, key: &ObjectPath) -> Result<Url> {
    let mut location = base_path.clone();
    location
        .path_segments_mut()
        .map_err(|()| StorageError::invalid_location(base_path, "not a hierarchical location"))?
        .clear()
        .extend(key.as_ref().split('/'));
    Ok(location)
}

/// Count what a bulk delete of `total` objects confirmed.
///
/// The store may report fewer outcomes than requested when a whole request fails,
/// so failures are `total - confirmed` rather than the number of errors seen.
async fn summarize_bulk_delete(
    total: u64,
    outcomes: BoxStream<'_, object_store::Result<ObjectPath>>,
) -> DeleteSummary {
    let confirmed = outcomes
        .fold(0u64, |confirmed, outcome| async move {
            match outcome {
                Ok(_) => confirmed + 1,
                Err(e) => {
                    tracing::debug!(error = %e, "Object store rejected delete");
                    confirmed
                }
            }
        })
        .await
        .min(total);

    DeleteSummary::of(confirmed, total - confirmed)
}

/// Split `s3://bucket/key` into the bucket and the object key.
fn split_location(location: &Url) -> Result<(String, ObjectPath)> {
    let bucket = location
        .host_str()
        .filter(|bucket| !bucket.is_empty())
        .ok_or_else(|| StorageError::invalid_location(location, "missing bucket"))?;
    let path = ObjectPath::from_url_path(location.path())
        .map_err(|e| StorageError::invalid_location(location, e.to_string()))?;
    Ok((bucket.to_string(), path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use object_store::PutPayload;
    use object_store::local::LocalFileSystem;
    use object_store::memory::InMemory;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn key_of(location: &str) -> (String, ObjectPath) {
        split_location(&url(location)).unwrap()
    }

    fn backend_with(store: Arc<dyn ObjectStore>, batch_size: usize) -> ObjectStoreBackend {
        let provider = store_provider(move |_| Ok(Arc::clone(&store)));
        ObjectStoreBackend::with_provider(provider, batch_size)
    }

    fn local_store(dir: &tempfile::TempDir) -> Arc<dyn ObjectStore> {
        Arc::new(LocalFileSystem::new_with_prefix(dir.path()).unwrap())
    }

    async fn put_at(store: &dyn ObjectStore, path: &ObjectPath) {
        store
            .put(path, PutPayload::from_static(b"data"))
            .await
            .unwrap();
    }

    async fn put(store: &dyn ObjectStore, key: &str) {
        put_at(store, &ObjectPath::from(key)).await;
    }

    async fn exists(store: &dyn ObjectStore, path: &ObjectPath) -> bool {
        store.head(path).await.is_ok()
    }

    async fn list_all(backend: &ObjectStoreBackend, base: &Url) -> Vec<FileReference> {
        backend
            .list_recursively(base)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap()
    }

    #[test]
    fn test_split_location() {
        let (bucket, path) = key_of("s3://bucket/prefix/dir/b.txt");
        assert_eq!(bucket, "bucket");
        assert_eq!(path.as_ref(), "prefix/dir/b.txt");

        let (_, root) = key_of("s3://bucket/");
        assert_eq!(root.as_ref(), "");

        let (_, trailing) = key_of("s3://bucket/prefix/");
        assert_eq!(trailing.as_ref(), "prefix");
    }

    #[test]
    fn test_split_location_decodes_keys() {
        let (_, path) = key_of("s3://bucket/my%20dir/a.txt");
        assert_eq!(path.as_ref(), "my dir/a.txt");
    }

    #[test]
    fn test_object_url_escapes_percent() {
        let base = url("s3://bucket/prefix/");
        let key = ObjectPath::parse("prefix/a%20b.txt").unwrap();

        let location = object_url(&base, &key).unwrap();
        assert_eq!(location.as_str(), "s3://bucket/prefix/a%2520b.txt");
        assert_eq!(split_location(&location).unwrap().1, key);
    }

    #[tokio::test]
    async fn test_list_recursively() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        put(store.as_ref(), "prefix/a.txt").await;
        put(store.as_ref(), "prefix/dir/b.txt").await;
        put(store.as_ref(), "prefix2/c.txt").await;
        put(store.as_ref(), "other/d.txt").await;
        let backend = backend_with(store, 10);

        let base = url("s3://bucket/prefix/");
        let listed = list_all(&backend, &base).await;

        let mut relative: Vec<&str> = listed.iter().map(|f| f.relative_path()).collect();
        relative.sort();
        assert_eq!(relative, vec!["a.txt", "dir/b.txt"]);
        for reference in &listed {
            let absolute = reference.absolute_path().as_str();
            assert!(absolute.starts_with("s3://bucket/prefix/"));
            assert_eq!(reference.base_path(), &base);
            assert!(reference.last_modified_millis() > 0);
        }
    }

    #[tokio::test]
    async fn test_list_bucket_root_and_missing_prefix() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        put(store.as_ref(), "a.txt").await;
        put(store.as_ref(), "dir/b.txt").await;
        let backend = backend_with(store, 10);

        let all = list_all(&backend, &url("s3://bucket/")).await;
        assert_eq!(all.len(), 2);

        let none = list_all(&backend, &url("s3://bucket/nothing-here/")).await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_listed_escaped_keys_delete_the_listed_object() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        // A raw key with a literal escape and one that object_store encodes itself
        let raw = ObjectPath::parse("prefix/a%20b.txt").unwrap();
        let hashed = ObjectPath::from("prefix/c#d.txt");
        put_at(store.as_ref(), &raw).await;
        put_at(store.as_ref(), &hashed).await;
        let decoy = ObjectPath::from("prefix/a b.txt");
        put_at(store.as_ref(), &decoy).await;
        let backend = backend_with(Arc::clone(&store), 10);

        let base = url("s3://bucket/prefix/");
        let mut listed = list_all(&backend, &base).await;
        listed.sort_by_key(|f| split_location(f.absolute_path()).unwrap().1);
        let keys: Vec<ObjectPath> = listed
            .iter()
            .map(|f| split_location(f.absolute_path()).unwrap().1)
            .collect();
        assert_eq!(keys, vec![decoy.clone(), raw.clone(), hashed.clone()]);
        for reference in &listed {
            let resolved = base.join(reference.relative_path()).unwrap();
            assert_eq!(&resolved, reference.absolute_path());
        }

        let single = listed[1].absolute_path();
        assert_eq!(backend.delete(single).await, DeleteResult::Success);
        assert!(!exists(store.as_ref(), &raw).await);
        assert!(exists(store.as_ref(), &decoy).await);

        let bulk = vec![listed[2].absolute_path().clone()];
        let summary = backend.delete_multiple(stream::iter(bulk).boxed()).await;
        assert_eq!(summary, DeleteSummary::of(1, 0));
        assert!(!exists(store.as_ref(), &hashed).await);
        assert!(exists(store.as_ref(), &decoy).await);
    }

    #[tokio::test]
    async fn test_delete_single() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        put(store.as_ref(), "prefix/a.txt").await;
        let backend = backend_with(Arc::clone(&store), 10);

        let result = backend.delete(&url("s3://bucket/prefix/a.txt")).await;
        assert_eq!(result, DeleteResult::Success);
        let key = ObjectPath::from("prefix/a.txt");
        assert!(!exists(store.as_ref(), &key).await);
    }

    #[tokio::test]
    async fn test_delete_single_failure_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_with(local_store(&dir), 10);

        let missing = backend.delete(&url("s3://bucket/missing.txt")).await;
        assert_eq!(missing, DeleteResult::Failure);
        let no_bucket = backend.delete(&url("s3:///no-bucket.txt")).await;
        assert_eq!(no_bucket, DeleteResult::Failure);
    }

    #[tokio::test]
    async fn test_delete_multiple_all_succeed() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        put(store.as_ref(), "prefix/a.txt").await;
        put(store.as_ref(), "prefix/dir/b.txt").await;
        let backend = backend_with(Arc::clone(&store), 10);

        let locations = vec![
            url("s3://bucket/prefix/a.txt"),
            url("s3://bucket/prefix/dir/b.txt"),
        ];
        let summary = backend
            .delete_multiple(stream::iter(locations).boxed())
            .await;

        assert_eq!(summary, DeleteSummary::of(2, 0));
        let remaining: Vec<_> = store.list(None).try_collect().await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn test_delete_multiple_counts_reported_failures() {
        let dir = tempfile::tempdir().unwrap();
        let store = local_store(&dir);
        for key in ["prefix/a", "prefix/b", "prefix/c"] {
            put(store.as_ref(), key).await;
        }
        // Small batches so the failures spread over several bulk requests
        let backend = backend_with(store, 2);

        let locations: Vec<Url> = ["a", "missing-1", "b", "c", "missing-2"]
            .iter()
            .map(|key| url(&format!("s3://bucket/prefix/{key}")))
            .collect();
        let summary = backend
            .delete_multiple(stream::iter(locations).boxed())
            .await;

        assert_eq!(summary, DeleteSummary::of(3, 2));
    }

    #[tokio::test]
    async fn test_summarize_partial_failure() {
        let outcomes = stream::iter(vec![
            Ok(ObjectPath::from("a")),
            Err(object_store::Error::NotFound {
                path: "b".to_string(),
                source: "gone".into(),
            }),
            Ok(ObjectPath::from("c")),
        ])
        .boxed();

        let summary = summarize_bulk_delete(3, outcomes).await;
        assert_eq!(summary, DeleteSummary::of(2, 1));
    }

    #[tokio::test]
    async fn test_summarize_failed_request_fails_whole_batch() {
        let outcomes = stream::iter(vec![Err(object_store::Error::Generic {
            store: "S3",
            source: "connection reset".into(),
        })])
        .boxed();

        let summary = summarize_bulk_delete(5, outcomes).await;
        assert_eq!(summary, DeleteSummary::of(0, 5));
    }

    #[tokio::test]
    async fn test_client_created_once_per_bucket_and_dropped_on_close() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let provider = store_provider(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(InMemory::new()) as Arc<dyn ObjectStore>)
        });
        let backend = ObjectStoreBackend::with_provider(provider, 10);

        backend.delete(&url("s3://one/a")).await;
        backend.delete(&url("s3://one/b")).await;
        backend.delete(&url("s3://two/a")).await;
        assert_eq!(created.load(Ordering::SeqCst), 2);

        backend.close().await.unwrap();
        assert!(backend.stores.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_is_setup_error() {
        let provider = store_provider(|bucket| Err(anyhow::anyhow!("no credentials for {bucket}")));
        let backend = ObjectStoreBackend::with_provider(provider, 10);

        let result = backend.list_recursively(&url("s3://bucket/prefix/")).await;
        assert!(matches!(result, Err(StorageError::Setup { .. })));

        let locations = vec![url("s3://bucket/a"), url("s3://bucket/b")];
        let summary = backend
            .delete_multiple(stream::iter(locations).boxed())
            .await;
        assert_eq!(summary, DeleteSummary::of(0, 2));
    }

    #[test]
    fn test_new_reads_batch_size() {
        let key = common::storage::DELETE_BATCH_SIZE_PROPERTY.to_string();

        let properties = HashMap::from([(key.clone(), "50".to_string())]);
        let backend = ObjectStoreBackend::new(properties).unwrap();
        assert_eq!(backend.delete_batch_size(), 50);

        let invalid = HashMap::from([(key, "many".to_string())]);
        assert!(ObjectStoreBackend::new(invalid).is_err());
    }
}
