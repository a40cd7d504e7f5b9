//! Object-store cache backend over HTTP
//!
//! Speaks the path-style subset of the S3 protocol: `HEAD`, `GET` and `PUT`
//! on `<url>/<bucket>/<object>`. Authentication is an optional bearer token.
//! Requests are blocking and run on tokio's blocking pool.

use super::backend::{CacheBackend, CachedArtifact};
use super::key::CacheKey;
use crate::config::schema::RemoteConfig;
use crate::error::{AccelError, AccelResult};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// Header carrying the artifact digest, stored as user metadata
const DIGEST_HEADER: &str = "x-amz-meta-sha256";

/// Upper bound for one downloaded artifact
const MAX_ARTIFACT_BYTES: u64 = 2 * 1024 * 1024 * 1024;

const BACKEND_NAME: &str = "remote";

pub struct RemoteBackend {
    agent: ureq::Agent,
    bucket_url: String,
    prefix: Option<String>,
    token: Option<String>,
    readonly: bool,
}

impl RemoteBackend {
    /// Connect to the configured bucket
    ///
    /// Returns `Ok(None)` when no bucket is configured. A missing bucket is
    /// created when `create_bucket` is set, otherwise it is fatal.
    pub async fn connect(config: &RemoteConfig) -> AccelResult<Option<Self>> {
        let Some(ref bucket) = config.bucket else {
            return Ok(None);
        };

        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .http_status_as_error(false)
            .build()
            .into();

        let backend = Self {
            agent,
            bucket_url: format!("{}/{}", config.url.trim_end_matches('/'), bucket),
            prefix: config.prefix.clone(),
            token: config.token.clone(),
            readonly: config.readonly,
        };
        backend.ensure_bucket(bucket, config.create_bucket).await?;
        Ok(Some(backend))
    }

    async fn ensure_bucket(&self, bucket: &str, create: bool) -> AccelResult<()> {
        let status = self.status_of(Method::Head, self.bucket_url.clone()).await?;
        match status {
            200..=299 => Ok(()),
            404 if create && !self.readonly => {
                info!("Creating remote cache bucket {}", bucket);
                let status = self.status_of(Method::Put, self.bucket_url.clone()).await?;
                if (200..300).contains(&status) {
                    Ok(())
                } else {
                    Err(AccelError::backend(
                        BACKEND_NAME,
                        format!("creating bucket {} failed with HTTP {}", bucket, status),
                    ))
                }
            }
            404 => Err(AccelError::RemoteBucketMissing(bucket.to_string())),
            other => Err(AccelError::backend(
                BACKEND_NAME,
                format!("probing bucket {} failed with HTTP {}", bucket, other),
            )),
        }
    }

    fn object_url(&self, key: &CacheKey) -> String {
        format!("{}/{}", self.bucket_url, key.object_path(self.prefix.as_deref()))
    }

    fn authorize<B>(&self, request: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        match self.token {
            Some(ref token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }

    /// Issue a body-less request and return only the status code
    async fn status_of(&self, method: Method, url: String) -> AccelResult<u16> {
        let request = match method {
            Method::Head => Request::Head(self.authorize(self.agent.head(&url))),
            Method::Put => Request::Put(self.authorize(self.agent.put(&url))),
        };
        blocking(move || {
            let response = match request {
                Request::Head(r) => r.call(),
                Request::Put(r) => r.send_empty(),
            }
            .map_err(transport)?;
            Ok(response.status().as_u16())
        })
        .await
    }
}

enum Method {
    Head,
    Put,
}

enum Request {
    Head(ureq::RequestBuilder<ureq::typestate::WithoutBody>),
    Put(ureq::RequestBuilder<ureq::typestate::WithBody>),
}

fn transport(e: ureq::Error) -> AccelError {
    AccelError::backend(BACKEND_NAME, e.to_string())
}

async fn blocking<T, F>(f: F) -> AccelResult<T>
where
    F: FnOnce() -> AccelResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AccelError::Internal(format!("remote cache task failed: {}", e)))?
}

#[async_trait]
impl CacheBackend for RemoteBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn is_writable(&self) -> bool {
        !self.readonly
    }

    async fn get(&self, key: &CacheKey) -> AccelResult<Option<CachedArtifact>> {
        let url = self.object_url(key);
        let request = self.authorize(self.agent.get(&url));
        let key = key.clone();

        blocking(move || {
            let mut response = request.call().map_err(transport)?;
            match response.status().as_u16() {
                200 => {}
                404 => return Ok(None),
                other => {
                    return Err(AccelError::backend(
                        BACKEND_NAME,
                        format!("GET {} returned HTTP {}", url, other),
                    ))
                }
            }

            let header = |name: &str| {
                response
                    .headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.trim().to_string())
            };
            let expected_size = header("content-length").and_then(|v| v.parse::<u64>().ok());
            let expected_digest = header(DIGEST_HEADER);

            let bytes = response
                .body_mut()
                .with_config()
                .limit(MAX_ARTIFACT_BYTES)
                .read_to_vec()
                .map_err(transport)?;

            let artifact = CachedArtifact::new(bytes);
            artifact.verify(&key, expected_size, expected_digest.as_deref())?;
            debug!("Remote cache hit: {}", url);
            Ok(Some(artifact))
        })
        .await
    }

    async fn has(&self, key: &CacheKey) -> AccelResult<bool> {
        let url = self.object_url(key);
        match self.status_of(Method::Head, url.clone()).await? {
            200..=299 => Ok(true),
            404 => Ok(false),
            other => Err(AccelError::backend(
                BACKEND_NAME,
                format!("HEAD {} returned HTTP {}", url, other),
            )),
        }
    }

    async fn put(&self, key: &CacheKey, artifact: &CachedArtifact) -> AccelResult<()> {
        if self.readonly {
            info!("Remote cache is read-only, not uploading {}", key);
            return Ok(());
        }

        let url = self.object_url(key);
        let request = self
            .authorize(self.agent.put(&url))
            .header("Content-Type", "application/zstd")
            .header(DIGEST_HEADER, artifact.sha256());
        let bytes = artifact.bytes().to_vec();

        blocking(move || {
            let response = request.send(&bytes[..]).map_err(transport)?;
            let status = response.status().as_u16();
            if (200..300).contains(&status) {
                debug!("Uploaded {} ({} bytes)", url, bytes.len());
                Ok(())
            } else {
                Err(AccelError::backend(
                    BACKEND_NAME,
                    format!("PUT {} returned HTTP {}", url, status),
                ))
            }
        })
        .await
    }
}
