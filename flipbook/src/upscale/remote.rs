use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use base64::Engine;
use rayon::prelude::*;
use reqwest::{
    blocking::{
        multipart::{Form, Part},
        Client,
    },
    header::ACCEPT,
    StatusCode,
};

use super::{images_in, output_for, TargetSize, Upscaler};
use crate::{config::ApiKey, pipeline::Stage, Error, Result};

pub const DEFAULT_STABILITY_HOST: &str = "https://api.stability.ai";

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StabilityEngine {
    #[default]
    #[value(name = "esrgan-v1-x2plus")]
    EsrganV1X2Plus,
}

impl StabilityEngine {
    pub fn id(self) -> &'static str {
        match self {
            StabilityEngine::EsrganV1X2Plus => "esrgan-v1-x2plus",
        }
    }
}

/// Upscales through the Stability AI REST API. Images are sent `jobs` at a time and the
/// whole batch fails on the first failed image.
pub struct StabilityUpscaler {
    client: Client,
    api_key: ApiKey,
    engine: StabilityEngine,
    host: String,
    target: Option<TargetSize>,
    jobs: NonZeroUsize,
}

#[derive(serde::Deserialize)]
struct UpscaleResponse {
    artifacts: Vec<Artifact>,
}

#[derive(serde::Deserialize)]
struct Artifact {
    base64: String,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

impl StabilityUpscaler {
    pub fn new(
        api_key: ApiKey,
        engine: StabilityEngine,
        host: impl Into<String>,
        target: Option<TargetSize>,
        jobs: NonZeroUsize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            Error::Configuration(format!("failed to create the HTTP client: {e}"))
        })?;
        Ok(Self {
            client,
            api_key,
            engine,
            host: host.into().trim_end_matches('/').to_string(),
            target,
            jobs,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/generation/{}/image-to-image/upscale",
            self.host,
            self.engine.id()
        )
    }

    fn upscale_one(&self, image: &Path, output: &Path) -> Result<()> {
        let failed = |source: reqwest::Error| Error::UpscaleFailed {
            image: image.to_owned(),
            source: source.into(),
        };

        let bytes = fs::read(image).map_err(Error::io(
            Stage::Upscaled,
            format!("failed to read '{}'", image.display()),
        ))?;
        let file_name = image
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("image/png")
            .map_err(failed)?;
        let mut form = Form::new().part("image", part);
        match self.target {
            Some(TargetSize::Width(width)) => form = form.text("width", width.to_string()),
            Some(TargetSize::Height(height)) => {
                form = form.text("height", height.to_string())
            }
            None => (),
        }

        let endpoint = self.endpoint();
        log::info!("POSTing '{}' to '{}'", image.display(), endpoint);
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(self.api_key.expose())
            .header(ACCEPT, "application/json")
            .multipart(form)
            .send()
            .map_err(failed)?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = readable_body(response.text(), image);
            return Err(Error::BadUpscaleResponse {
                image: image.to_owned(),
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().map_err(failed)?;
        let decoded =
            decode_artifact(&body).map_err(|reason| Error::MalformedUpscaleResponse {
                image: image.to_owned(),
                reason,
            })?;

        fs::write(output, decoded).map_err(Error::io(
            Stage::Upscaled,
            format!("failed to write '{}'", output.display()),
        ))?;
        log::debug!("Upscaled image saved to: {}", output.display());
        Ok(())
    }
}

impl Upscaler for StabilityUpscaler {
    fn describe(&self) -> String {
        format!("Stability AI engine '{}' at {}", self.engine.id(), self.host)
    }

    fn upscale_dir(&self, input: &Path, output: &Path) -> Result<usize> {
        let images = images_in(input)?;
        log::info!(
            "Upscaling {} images in {}, {} at a time",
            images.len(),
            input.display(),
            self.jobs
        );

        let mut jobs: Vec<(&PathBuf, PathBuf)> = Vec::with_capacity(images.len());
        for image in &images {
            jobs.push((image, output_for(image, output)?));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs.get())
            .thread_name(|i| format!("U{i:>02}"))
            .build()
            .map_err(|e| {
                Error::Configuration(format!("failed to start the upscale workers: {e}"))
            })?;

        pool.install(|| {
            jobs.par_iter()
                .try_for_each(|(image, out)| self.upscale_one(image, out))
        })?;

        Ok(images.len())
    }
}

/// The body of a failed response, or why it couldn't be read.
fn readable_body<E: std::fmt::Display>(
    body: std::result::Result<String, E>,
    image: &Path,
) -> String {
    match body {
        Ok(body) => body,
        Err(e) => {
            log::warn!(
                "Failed to read the error response for '{}': {}",
                image.display(),
                e
            );
            format!("<unreadable body: {e}>")
        }
    }
}

/// Pulls the image out of a successful response.
fn decode_artifact(body: &[u8]) -> std::result::Result<Vec<u8>, String> {
    let response: UpscaleResponse = serde_json::from_slice(body)
        .map_err(|e| format!("not the expected JSON: {e}"))?;
    let artifact = response
        .artifacts
        .into_iter()
        .next()
        .ok_or_else(|| "there are no artifacts".to_string())?;
    if let Some(reason) = artifact.finish_reason.as_deref() {
        if reason == "ERROR" {
            return Err("the artifact finished with an error".to_string());
        }
    }
    base64::engine::general_purpose::STANDARD
        .decode(artifact.base64)
        .map_err(|e| format!("invalid base64: {e}"))
}
