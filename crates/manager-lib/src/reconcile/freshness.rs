//! Image freshness check
//!
//! Always pulls, even when the reference is cached locally, so registry-side
//! updates to a mutable tag are picked up. The verdict compares the running
//! container's image id with the id the reference resolves to afterwards.

use crate::engine::ContainerEngine;
use crate::error::{ManagerError, Result};
use crate::models::{DesiredContainerSpec, ImageSummary};
use std::sync::Arc;
use tracing::debug;

/// Whether a local tag names the same image as `reference`. An untagged
/// reference means `:latest`.
fn tag_matches(tag: &str, reference: &str) -> bool {
    if tag == reference {
        return true;
    }
    let last_segment = reference.rsplit('/').next().unwrap_or(reference);
    !last_segment.contains(':')
        && !reference.contains('@')
        && tag.strip_suffix(":latest") == Some(reference)
}

/// Id the local image index currently assigns to `reference`
pub fn resolve_image_id(images: &[ImageSummary], reference: &str) -> Option<String> {
    images
        .iter()
        .find(|image| image.repo_tags.iter().any(|tag| tag_matches(tag, reference)))
        .map(|image| image.id.clone())
}

#[derive(Clone)]
pub struct FreshnessChecker {
    engine: Arc<dyn ContainerEngine>,
}

impl FreshnessChecker {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    /// `Ok(false)` means stale. A reference that cannot be resolved after
    /// the pull is an error, never a stale verdict.
    pub async fn is_up_to_date(&self, engine_id: &str, desired: &DesiredContainerSpec) -> Result<bool> {
        let running_image_id = self.engine.inspect_container(engine_id).await?.image_id;

        self.engine.pull_image(&desired.image).await?;

        let images = self.engine.list_images().await?;
        let latest_image_id = resolve_image_id(&images, &desired.image)
            .ok_or_else(|| ManagerError::ImageUnresolved(desired.image.clone()))?;

        let up_to_date = running_image_id == latest_image_id;
        debug!(
            container = %desired.name,
            running = %running_image_id,
            latest = %latest_image_id,
            up_to_date,
            "Checked image freshness"
        );
        Ok(up_to_date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineCall, FakeEngine};

    fn web() -> DesiredContainerSpec {
        DesiredContainerSpec::new("web", "nginx:latest")
    }

    #[tokio::test]
    async fn test_up_to_date_when_ids_match() {
        let fake = FakeEngine::new().with_image("nginx:latest", "sha256:aaa");
        let id = fake.seed_container(&web(), true);
        let checker = FreshnessChecker::new(Arc::new(fake.clone()));

        assert!(checker.is_up_to_date(&id, &web()).await.unwrap());
        // The pull happens even though the image is cached
        assert_eq!(fake.count(|c| matches!(c, EngineCall::Pull(_))), 1);
    }

    #[tokio::test]
    async fn test_stale_after_registry_update() {
        let fake = FakeEngine::new().with_image("nginx:latest", "sha256:aaa");
        let id = fake.seed_container(&web(), true);
        fake.publish_image("nginx:latest", "sha256:bbb");
        let checker = FreshnessChecker::new(Arc::new(fake));

        assert!(!checker.is_up_to_date(&id, &web()).await.unwrap());
    }

    #[tokio::test]
    async fn test_unresolvable_reference_is_error_not_stale() {
        let fake = FakeEngine::new().with_image("nginx:latest", "sha256:aaa");
        let id = fake.seed_container(&web(), true);
        // The pull succeeds but leaves no local tag for the reference
        fake.publish_dangling("ghost:1");
        let checker = FreshnessChecker::new(Arc::new(fake));

        let spec = DesiredContainerSpec::new("web", "ghost:1");
        let err = checker.is_up_to_date(&id, &spec).await.unwrap_err();
        assert!(matches!(err, ManagerError::ImageUnresolved(_)));
    }

    #[tokio::test]
    async fn test_pull_failure_propagates() {
        let fake = FakeEngine::new().with_image("nginx:latest", "sha256:aaa");
        let id = fake.seed_container(&web(), true);
        fake.fail_on(EngineCall::Pull("nginx:latest".into()), "registry down");
        let checker = FreshnessChecker::new(Arc::new(fake));

        let err = checker.is_up_to_date(&id, &web()).await.unwrap_err();
        assert!(err.to_string().contains("registry down"));
    }

    #[test]
    fn test_untagged_reference_matches_latest() {
        let images = vec![ImageSummary {
            id: "sha256:aaa".into(),
            repo_tags: vec!["nginx:latest".into()],
        }];
        assert_eq!(resolve_image_id(&images, "nginx"), Some("sha256:aaa".into()));
        assert_eq!(resolve_image_id(&images, "nginx:1.25"), None);
        assert!(!tag_matches("registry:5000/web:latest", "registry:5000/web:v2"));
        assert!(tag_matches("registry:5000/web:latest", "registry:5000/web"));
    }
}
