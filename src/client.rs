//! The top-level client facade.

use std::sync::Arc;

use crate::config::ClientConfig;
use crate::credential::CredentialPool;
use crate::credit::{self, CreditInfo};
use crate::error::Result;
use crate::generation::{
    degrade, ImageGenerator, ImageOptions, VideoGenerator, VideoOptions,
};
use crate::http::ApiClient;
use crate::upload::{FileSource, UploadPipeline, UploadedFile};

/// An authenticated client for the Jimeng generation service.
///
/// Holds one or more session tokens; every call picks one from the pool.
///
/// ```no_run
/// # use jimeng_client::{JimengClient, ImageOptions};
/// # async fn run() -> jimeng_client::Result<()> {
/// let client = JimengClient::new("token-a,token-b")?;
/// let urls = client
///     .generate_images("jimeng-4.5", "a lighthouse at dusk", ImageOptions::default())
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct JimengClient {
    api: ApiClient,
    pool: CredentialPool,
    images: ImageGenerator,
    videos: VideoGenerator,
    uploader: UploadPipeline,
}

impl JimengClient {
    /// Build a client with production defaults.
    ///
    /// `authorization` is one session token, or several separated by
    /// commas, with an optional `Bearer ` prefix.
    pub fn new(authorization: &str) -> Result<Self> {
        Self::with_config(ClientConfig::default(), authorization)
    }

    /// Build a client over an explicit configuration.
    pub fn with_config(config: ClientConfig, authorization: &str) -> Result<Self> {
        let pool = CredentialPool::from_authorization(authorization)?;
        let http = reqwest::Client::builder().build()?;
        let api = ApiClient::new(Arc::new(config), http);
        let uploader = UploadPipeline::new(api.clone());
        Ok(Self {
            images: ImageGenerator::new(api.clone(), uploader.clone()),
            videos: VideoGenerator::new(api.clone(), uploader.clone()),
            api,
            pool,
            uploader,
        })
    }

    /// Run one image job and return one URL per result item.
    pub async fn generate_images(
        &self,
        model: &str,
        prompt: &str,
        options: ImageOptions,
    ) -> Result<Vec<Option<String>>> {
        self.images
            .generate(model, prompt, options, self.pool.pick())
            .await
    }

    /// Run one video job at the requested quality and return its URL.
    pub async fn generate_video(
        &self,
        model: &str,
        prompt: &str,
        options: VideoOptions,
    ) -> Result<String> {
        self.videos
            .generate(model, prompt, options, self.pool.pick())
            .await
    }

    /// Run one video job, stepping down the quality ladder whenever the
    /// account cannot afford the current rung.
    pub async fn generate_video_with_retry(
        &self,
        model: &str,
        prompt: &str,
        options: VideoOptions,
    ) -> Result<String> {
        degrade::generate_video_with_retry(
            &self.videos,
            model,
            prompt,
            options,
            self.pool.pick(),
        )
        .await
    }

    /// Upload a file to the vendor's storage and return its handle.
    pub async fn upload_file(&self, source: FileSource) -> Result<UploadedFile> {
        self.uploader.upload(self.pool.pick(), source).await
    }

    /// Query the current credit balance.
    pub async fn get_credit(&self) -> Result<CreditInfo> {
        credit::get_credit(&self.api, self.pool.pick()).await
    }

    /// Claim today's free credits, returning the new total.
    pub async fn receive_credit(&self) -> Result<i64> {
        credit::receive_credit(&self.api, self.pool.pick()).await
    }

    /// Check whether the pool's tokens still map to a live session.
    /// Returns false as soon as any token fails the probe.
    pub async fn check_token(&self) -> bool {
        for credential in self.pool.iter() {
            if !credit::check_token(&self.api, credential).await {
                return false;
            }
        }
        true
    }
}
