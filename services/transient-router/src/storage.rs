use crate::config::StorageConfig;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use bytes::Bytes;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, instrument};
use url::Url;

/// Characters left as-is in a copy source; `/` keeps the key's hierarchy
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Errors returned by the object storage collaborator
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid object URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Container/object pair addressed by a storage URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub host: String,
    pub container: String,
    pub name: String,
}

impl ObjectRef {
    /// Parse `https://{host}/{container}/{object/name}`
    pub fn from_url(raw: &str) -> Result<Self, StorageError> {
        let invalid = |reason: &str| StorageError::InvalidUrl {
            url: raw.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        let host = url.host_str().ok_or_else(|| invalid("no host"))?.to_string();

        let mut segments = url
            .path_segments()
            .ok_or_else(|| invalid("no path"))?
            .map(|segment| {
                percent_decode_str(segment)
                    .decode_utf8()
                    .map(|decoded| decoded.into_owned())
                    .map_err(|_| invalid("object name is not valid UTF-8 once decoded"))
            })
            .collect::<Result<Vec<String>, StorageError>>()?
            .into_iter();

        let container = segments.next().unwrap_or_default();
        let name = segments.collect::<Vec<_>>().join("/");

        if container.is_empty() || name.is_empty() || name.ends_with('/') {
            return Err(invalid("empty container or object name"));
        }

        Ok(Self {
            host,
            container,
            name,
        })
    }

    /// Last path segment of the object name
    pub fn filename(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// `{container}/{name}` with the name encoded for the copy-source header
    pub fn copy_source(&self) -> String {
        format!(
            "{}/{}",
            self.container,
            utf8_percent_encode(&self.name, COPY_SOURCE)
        )
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.name)
    }
}

/// Object storage operations the router depends on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Whether the object currently exists
    async fn exists(&self, object: &ObjectRef) -> Result<bool, StorageError>;

    /// Download the whole object
    async fn read_all(&self, object: &ObjectRef) -> Result<Bytes, StorageError>;

    /// Move an object to `dst_container/dst_key`, returning the destination URI
    async fn move_object(
        &self,
        source: &ObjectRef,
        dst_container: &str,
        dst_key: &str,
    ) -> Result<String, StorageError>;

    /// Write a new object, returning its URI
    async fn put(
        &self,
        container: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<String, StorageError>;
}

/// S3-compatible implementation of [`ObjectStorage`]
pub struct S3ObjectStorage {
    client: S3Client,
    endpoint_url: Option<String>,
}

impl S3ObjectStorage {
    /// Create a new S3 client
    pub async fn new(config: &StorageConfig) -> anyhow::Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        // Credential reference selects a named profile
        if let Some(ref identity) = config.identity {
            loader = loader.profile_name(identity);
        }

        let aws_config = loader.load().await;
        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            region = %config.region,
            endpoint = config.endpoint_url.as_deref().unwrap_or("default"),
            "Object storage client initialized"
        );

        Ok(Self {
            client,
            endpoint_url: config.endpoint_url.clone(),
        })
    }

    fn object_uri(&self, container: &str, key: &str) -> String {
        object_uri(self.endpoint_url.as_deref(), container, key)
    }
}

/// URI of an object, endpoint-based when one is configured
fn object_uri(endpoint_url: Option<&str>, container: &str, key: &str) -> String {
    match endpoint_url {
        Some(endpoint) => format!("{}/{}/{}", endpoint.trim_end_matches('/'), container, key),
        None => format!("s3://{}/{}", container, key),
    }
}

fn backend<E: std::error::Error + Send + Sync + 'static>(context: &str, err: E) -> StorageError {
    StorageError::Backend(format!("{}: {:#}", context, anyhow::Error::new(err)))
}

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
    #[instrument(skip(self), fields(object = %object))]
    async fn exists(&self, object: &ObjectRef) -> Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&object.container)
            .key(&object.name)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(backend("Failed to check object existence", e))
                }
            }
        }
    }

    #[instrument(skip(self), fields(object = %object))]
    async fn read_all(&self, object: &ObjectRef) -> Result<Bytes, StorageError> {
        let response = match self
            .client
            .get_object()
            .bucket(&object.container)
            .key(&object.name)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    return Err(StorageError::NotFound(object.to_string()));
                }
                return Err(backend("Failed to download object", e));
            }
        };

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| backend("Failed to read object body", e))?
            .into_bytes();

        debug!(size_bytes = body.len(), "Object downloaded");
        Ok(body)
    }

    #[instrument(skip(self), fields(source = %source))]
    async fn move_object(
        &self,
        source: &ObjectRef,
        dst_container: &str,
        dst_key: &str,
    ) -> Result<String, StorageError> {
        self.client
            .copy_object()
            .copy_source(source.copy_source())
            .bucket(dst_container)
            .key(dst_key)
            .send()
            .await
            .map_err(|e| backend("Failed to copy object", e))?;

        self.client
            .delete_object()
            .bucket(&source.container)
            .key(&source.name)
            .send()
            .await
            .map_err(|e| backend("Failed to delete source object", e))?;

        let uri = self.object_uri(dst_container, dst_key);
        info!(destination = %uri, "Object moved");
        Ok(uri)
    }

    #[instrument(skip(self, body), fields(size_bytes = body.len()))]
    async fn put(
        &self,
        container: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<String, StorageError> {
        self.client
            .put_object()
            .bucket(container)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| backend("Failed to upload object", e))?;

        Ok(self.object_uri(container, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ref_from_url() {
        let object = ObjectRef::from_url(
            "https://lake.blob.core.windows.net/transient/cafmet/FIELD1EC_TABLE2_Raw_2023_07_15_1200.dat",
        )
        .unwrap();

        assert_eq!(object.host, "lake.blob.core.windows.net");
        assert_eq!(object.container, "transient");
        assert_eq!(object.name, "cafmet/FIELD1EC_TABLE2_Raw_2023_07_15_1200.dat");
        assert_eq!(object.filename(), "FIELD1EC_TABLE2_Raw_2023_07_15_1200.dat");
        assert_eq!(
            object.to_string(),
            "transient/cafmet/FIELD1EC_TABLE2_Raw_2023_07_15_1200.dat"
        );
    }

    #[test]
    fn test_object_ref_rejects_bad_urls() {
        for url in [
            "not a url",
            "https://lake.blob.core.windows.net/",
            "https://lake.blob.core.windows.net/transient",
            "https://lake.blob.core.windows.net/transient/",
            "https://lake.blob.core.windows.net/transient/dir/",
            "https://lake.blob.core.windows.net/transient/%FF%FE.dat",
        ] {
            assert!(
                matches!(ObjectRef::from_url(url), Err(StorageError::InvalidUrl { .. })),
                "expected {} to be rejected",
                url
            );
        }
    }

    #[test]
    fn test_object_ref_decodes_name() {
        let object = ObjectRef::from_url(
            "https://lake.blob.core.windows.net/transient/in%20box/My%20Site_T_Raw_2023_07_15_1200.dat",
        )
        .unwrap();

        assert_eq!(object.container, "transient");
        assert_eq!(object.name, "in box/My Site_T_Raw_2023_07_15_1200.dat");
        assert_eq!(object.filename(), "My Site_T_Raw_2023_07_15_1200.dat");

        let object =
            ObjectRef::from_url("https://lake.blob.core.windows.net/transient/Estaci%C3%B3n_T.dat")
                .unwrap();
        assert_eq!(object.name, "Estaci\u{f3}n_T.dat");
    }

    #[test]
    fn test_copy_source_is_encoded() {
        let object = ObjectRef {
            host: "lake".to_string(),
            container: "transient".to_string(),
            name: "in box/My Site+1_T~2.dat".to_string(),
        };
        assert_eq!(
            object.copy_source(),
            "transient/in%20box/My%20Site%2B1_T~2.dat"
        );

        let plain = ObjectRef::from_url("https://h/transient/a/FIELD1EC_T_Raw_2023_07_15_1200.dat")
            .unwrap();
        assert_eq!(
            plain.copy_source(),
            "transient/a/FIELD1EC_T_Raw_2023_07_15_1200.dat"
        );
    }

    #[test]
    fn test_object_uri() {
        assert_eq!(
            object_uri(None, "raw", "p/d/2023/07/f.dat"),
            "s3://raw/p/d/2023/07/f.dat"
        );
        assert_eq!(
            object_uri(Some("https://lake.example.com/"), "raw", "p/f.dat"),
            "https://lake.example.com/raw/p/f.dat"
        );
    }
}
