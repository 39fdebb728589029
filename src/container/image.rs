//! Container image presence and pulling.

use crate::container::{ContainerRuntime, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Default tag applied to references that carry neither tag nor digest.
pub const DEFAULT_TAG: &str = "latest";

/// Append `:latest` to an image reference without tag or digest.
///
/// A `:` inside the registry part (`localhost:5000/app`) is not a tag.
pub fn normalize_image_reference(image: &str) -> String {
    let image = image.trim();
    if image.contains('@') {
        return image.to_string();
    }
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    if last_segment.contains(':') {
        image.to_string()
    } else {
        format!("{}:{}", image, DEFAULT_TAG)
    }
}

/// Ensures images are available locally before containers are created.
#[derive(Clone)]
pub struct ImageManager {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ImageManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Whether the image is present locally.
    ///
    /// # Errors
    ///
    /// Returns error if the runtime cannot be queried.
    pub async fn image_exists(&self, image: &str) -> Result<bool> {
        self.runtime
            .image_exists(&normalize_image_reference(image))
            .await
    }

    /// Pull the image unless it is already present.
    ///
    /// Returns `true` if a pull happened.
    ///
    /// # Errors
    ///
    /// Returns error if the existence check or the pull fails.
    pub async fn ensure_image(&self, image: &str) -> Result<bool> {
        let reference = normalize_image_reference(image);
        if self.runtime.image_exists(&reference).await? {
            debug!("Image {} already exists locally", reference);
            return Ok(false);
        }

        info!("Pulling image: {}", reference);
        self.runtime.pull_image(&reference).await?;
        info!("Successfully pulled image: {}", reference);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::MemoryRuntime;

    #[test]
    fn test_normalize_image_reference() {
        assert_eq!(normalize_image_reference("alpine"), "alpine:latest");
        assert_eq!(normalize_image_reference("alpine:3.20"), "alpine:3.20");
        assert_eq!(normalize_image_reference("library/mysql"), "library/mysql:latest");
        assert_eq!(
            normalize_image_reference("localhost:5000/app"),
            "localhost:5000/app:latest"
        );
        assert_eq!(
            normalize_image_reference("localhost:5000/app:v2"),
            "localhost:5000/app:v2"
        );
        assert_eq!(
            normalize_image_reference("alpine@sha256:abcd"),
            "alpine@sha256:abcd"
        );
    }

    #[tokio::test]
    async fn test_ensure_image_pulls_once() {
        let runtime = Arc::new(MemoryRuntime::new());
        let images = ImageManager::new(runtime.clone());

        assert!(images.ensure_image("alpine").await.unwrap());
        assert!(!images.ensure_image("alpine:latest").await.unwrap());
        assert_eq!(runtime.pulls(), ["alpine:latest"]);
    }

    #[tokio::test]
    async fn test_present_image_not_pulled() {
        let runtime = Arc::new(MemoryRuntime::new().with_image("mysql:latest"));
        let images = ImageManager::new(runtime.clone());

        assert!(images.image_exists("mysql").await.unwrap());
        assert!(!images.ensure_image("mysql").await.unwrap());
        assert!(runtime.pulls().is_empty());
    }
}
