//! Render/deliver pipeline for qualified messages.
//!
//! Sessions hand finished HTML cards to a [`DeliveryPipeline`] and move on;
//! rendering and chat delivery happen on a worker task and never block the
//! protocol loop. Both external calls sit behind traits so tests can swap
//! in recorders.

use crate::error::Result;
use anyhow::Context as _;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One-shot HTML to image rendering.
#[async_trait]
pub trait HtmlRenderer: Send + Sync {
    async fn render(&self, html: &str) -> Result<Vec<u8>>;
}

/// Outbound chat delivery of a rendered card.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn deliver(&self, image: Vec<u8>, telegram_id: i64) -> Result<()>;
}

/// Renderer backed by an HTML-to-image HTTP service.
pub struct HttpRenderer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRenderer {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl HtmlRenderer for HttpRenderer {
    async fn render(&self, html: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "html": html }))
            .send()
            .await
            .context("render request failed")?
            .error_for_status()
            .context("render service returned an error status")?;

        let bytes = response
            .bytes()
            .await
            .context("failed to read rendered image")?;
        Ok(bytes.to_vec())
    }
}

/// Sender that posts the rendered card as a photo via the Telegram Bot API.
pub struct TelegramSender {
    client: reqwest::Client,
    bot_token: String,
}

impl TelegramSender {
    pub fn new(bot_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token,
        }
    }
}

impl std::fmt::Debug for TelegramSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSender")
            .field("bot_token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl NotificationSender for TelegramSender {
    async fn deliver(&self, image: Vec<u8>, telegram_id: i64) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendPhoto", self.bot_token);
        let photo = reqwest::multipart::Part::bytes(image)
            .file_name("message.png")
            .mime_str("image/png")
            .context("invalid photo mime type")?;
        let form = reqwest::multipart::Form::new()
            .text("chat_id", telegram_id.to_string())
            .part("photo", photo);

        self.client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .context("sendPhoto request failed")?
            .error_for_status()
            .context("telegram rejected the photo")?;

        Ok(())
    }
}

/// One card queued for rendering and delivery.
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    pub telegram_id: i64,
    pub html: String,
}

/// Fire-and-forget queue in front of the renderer and sender.
#[derive(Clone)]
pub struct DeliveryPipeline {
    jobs: mpsc::Sender<DeliveryJob>,
}

impl DeliveryPipeline {
    /// Spawn the worker task and return the submission handle.
    pub fn spawn(
        renderer: Arc<dyn HtmlRenderer>,
        sender: Arc<dyn NotificationSender>,
    ) -> Self {
        let (jobs_tx, mut jobs_rx) = mpsc::channel::<DeliveryJob>(256);

        tokio::spawn(async move {
            while let Some(job) = jobs_rx.recv().await {
                let renderer = Arc::clone(&renderer);
                let sender = Arc::clone(&sender);
                // Each job runs independently so one slow render does not
                // hold up the queue.
                tokio::spawn(async move {
                    if let Err(error) = process_job(&*renderer, &*sender, job).await {
                        tracing::warn!(%error, "message delivery failed");
                    }
                });
            }
            tracing::info!("delivery pipeline stopped");
        });

        Self { jobs: jobs_tx }
    }

    /// Queue a card. Errors are logged, never surfaced to the session loop.
    pub fn submit(&self, job: DeliveryJob) {
        if let Err(error) = self.jobs.try_send(job) {
            tracing::warn!(%error, "delivery queue full, dropping message");
        }
    }
}

async fn process_job(
    renderer: &dyn HtmlRenderer,
    sender: &dyn NotificationSender,
    job: DeliveryJob,
) -> Result<()> {
    let image = renderer.render(&job.html).await?;
    sender.deliver(image, job.telegram_id).await?;
    tracing::info!(telegram_id = job.telegram_id, "message delivered");
    Ok(())
}
