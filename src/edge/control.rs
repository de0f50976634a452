//! Control channel for the edge cache.
//!
//! External callers send [`ControlMessage`]s (JSON, e.g. over
//! `POST /__edge/control`). In process, the [`EdgeHandle`] turns each call
//! into an [`EdgeCommand`] consumed by a single actor loop; replies come back
//! over oneshot channels.
//!
//! Prefetch and preload run as their own tasks so a long prefetch never
//! delays a stats or clear request. Clear and stats run inline, in arrival
//! order.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::EdgeError;
use crate::hints::FetchPriority;

use super::manager::{CacheStats, EdgeCacheManager, PrefetchReport};

/// Default command queue depth.
pub const CONTROL_CHANNEL_CAPACITY: usize = 64;

/// Wire form of a control request.
///
/// ```json
/// {"type": "PREFETCH_IMAGES", "data": {"urls": ["/transcode?url=..."], "priority": "low"}}
/// {"type": "CLEAR_IMAGE_CACHE"}
/// {"type": "GET_CACHE_STATS"}
/// {"type": "PRELOAD_CRITICAL", "data": {"images": ["/transcode?url=..."]}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    PrefetchImages {
        urls: Vec<String>,
        #[serde(default)]
        priority: FetchPriority,
    },
    ClearImageCache,
    GetCacheStats,
    PreloadCritical {
        images: Vec<String>,
    },
}

/// Reply to a [`ControlMessage`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ControlReply {
    Prefetch(PrefetchReport),
    Cleared { cleared: bool },
    Stats(CacheStats),
}

/// Commands consumed by the control loop.
#[derive(Debug)]
pub enum EdgeCommand {
    Prefetch {
        urls: Vec<String>,
        priority: FetchPriority,
        reply: oneshot::Sender<PrefetchReport>,
    },
    PreloadCritical {
        images: Vec<String>,
        reply: oneshot::Sender<PrefetchReport>,
    },
    ClearCache {
        reply: oneshot::Sender<Result<(), EdgeError>>,
    },
    GetStats {
        reply: oneshot::Sender<Result<CacheStats, EdgeError>>,
    },
}

/// Cloneable sender side of the control loop.
#[derive(Debug, Clone)]
pub struct EdgeHandle {
    sender: mpsc::Sender<EdgeCommand>,
}

impl EdgeHandle {
    pub async fn prefetch(
        &self,
        urls: Vec<String>,
        priority: FetchPriority,
    ) -> Result<PrefetchReport, EdgeError> {
        self.request(|reply| EdgeCommand::Prefetch {
            urls,
            priority,
            reply,
        })
        .await
    }

    pub async fn preload_critical(&self, images: Vec<String>) -> Result<PrefetchReport, EdgeError> {
        self.request(|reply| EdgeCommand::PreloadCritical { images, reply })
            .await
    }

    pub async fn clear_cache(&self) -> Result<(), EdgeError> {
        self.request(|reply| EdgeCommand::ClearCache { reply })
            .await?
    }

    pub async fn stats(&self) -> Result<CacheStats, EdgeError> {
        self.request(|reply| EdgeCommand::GetStats { reply }).await?
    }

    /// Execute a wire-level control message.
    pub async fn dispatch(&self, message: ControlMessage) -> Result<ControlReply, EdgeError> {
        match message {
            ControlMessage::PrefetchImages { urls, priority } => {
                self.prefetch(urls, priority).await.map(ControlReply::Prefetch)
            }
            ControlMessage::PreloadCritical { images } => {
                self.preload_critical(images)
                    .await
                    .map(ControlReply::Prefetch)
            }
            ControlMessage::ClearImageCache => {
                self.clear_cache().await?;
                Ok(ControlReply::Cleared { cleared: true })
            }
            ControlMessage::GetCacheStats => self.stats().await.map(ControlReply::Stats),
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> EdgeCommand,
    ) -> Result<T, EdgeError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(command(reply))
            .await
            .map_err(|_| EdgeError::ChannelClosed)?;
        response.await.map_err(|_| EdgeError::ChannelClosed)
    }
}

/// Start the control loop for `manager`.
///
/// The loop ends once every [`EdgeHandle`] has been dropped.
pub fn spawn_control_loop(manager: Arc<EdgeCacheManager>) -> (EdgeHandle, JoinHandle<()>) {
    let (sender, receiver) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
    let task = tokio::spawn(run_control_loop(receiver, manager));
    (EdgeHandle { sender }, task)
}

/// Consume commands until the channel closes.
pub async fn run_control_loop(
    mut receiver: mpsc::Receiver<EdgeCommand>,
    manager: Arc<EdgeCacheManager>,
) {
    info!("Edge control loop started");

    while let Some(command) = receiver.recv().await {
        match command {
            EdgeCommand::Prefetch {
                urls,
                priority,
                reply,
            } => {
                debug!(count = urls.len(), %priority, "Prefetch requested");
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    let report = manager.prefetch(&urls, priority).await;
                    let _ = reply.send(report);
                });
            }
            EdgeCommand::PreloadCritical { images, reply } => {
                debug!(count = images.len(), "Critical preload requested");
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    let report = manager.preload_critical(&images).await;
                    let _ = reply.send(report);
                });
            }
            EdgeCommand::ClearCache { reply } => {
                let _ = reply.send(manager.clear_cache().await);
            }
            EdgeCommand::GetStats { reply } => {
                let _ = reply.send(manager.get_stats().await.map_err(EdgeError::from));
            }
        }
    }

    info!("Edge control loop stopped");
}
