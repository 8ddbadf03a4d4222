//! Working out which image an image-archive load produced.
//!
//! Loading a saved image does not report what was loaded, and the original
//! tag may or may not survive. Callers snapshot the image ids before the
//! load and hand them in; resolution then tries, in order: the original
//! reference, the single id that appeared during the load, an untagged
//! image, and finally the first image the engine lists.

use crate::CoreError;
use dockvault_engine::{ContainerEngine, ImageSummary};
use dockvault_schema::ImageId;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStep {
    OriginalReference,
    NewlyLoaded,
    Untagged,
    FirstImage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageResolution {
    /// What to pass as the image when creating the container.
    pub reference: String,
    pub step: ResolutionStep,
    pub warnings: Vec<String>,
}

pub fn image_ids(engine: &dyn ContainerEngine) -> Result<BTreeSet<ImageId>, CoreError> {
    Ok(engine.list_images()?.into_iter().map(|i| i.id).collect())
}

/// Give `image` the original reference back, if that reference is a tag.
/// Tagging is best-effort: on failure the raw id is used.
fn adopt(
    engine: &dyn ContainerEngine,
    image: &ImageSummary,
    original: &str,
    warnings: &mut Vec<String>,
) -> String {
    if original.is_empty() || original.starts_with("sha256:") {
        return image.id.to_string();
    }
    match engine.tag_image(&image.id, original) {
        Ok(()) => {
            debug!("tagged {} as {original}", image.id);
            original.to_owned()
        }
        Err(e) => {
            let msg = format!("could not tag image {} as {original}: {e}", image.id);
            warn!("{msg}");
            warnings.push(msg);
            image.id.to_string()
        }
    }
}

pub fn resolve_loaded_image(
    engine: &dyn ContainerEngine,
    original: &str,
    before: &BTreeSet<ImageId>,
) -> Result<ImageResolution, CoreError> {
    let mut warnings = Vec::new();

    if !original.is_empty() && engine.get_image(original)?.is_some() {
        return Ok(ImageResolution {
            reference: original.to_owned(),
            step: ResolutionStep::OriginalReference,
            warnings,
        });
    }

    let images = engine.list_images()?;

    let fresh: Vec<&ImageSummary> = images.iter().filter(|i| !before.contains(&i.id)).collect();
    if let [loaded] = fresh.as_slice() {
        let reference = adopt(engine, loaded, original, &mut warnings);
        return Ok(ImageResolution {
            reference,
            step: ResolutionStep::NewlyLoaded,
            warnings,
        });
    }
    if fresh.len() > 1 {
        debug!("{} images appeared during load, falling back to scan", fresh.len());
    }

    if let Some(untagged) = images.iter().find(|i| i.is_untagged()) {
        let reference = adopt(engine, untagged, original, &mut warnings);
        warn!("resolved loaded image by untagged scan: {reference}");
        return Ok(ImageResolution {
            reference,
            step: ResolutionStep::Untagged,
            warnings,
        });
    }

    match images.first() {
        Some(first) => {
            let msg = format!(
                "could not identify the loaded image; using {} ({})",
                first.reference(),
                first.id
            );
            warn!("{msg}");
            warnings.push(msg);
            Ok(ImageResolution {
                reference: first.id.to_string(),
                step: ResolutionStep::FirstImage,
                warnings,
            })
        }
        None => Err(CoreError::ImageNotFound(format!(
            "{original} (engine reports no images after load)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockvault_engine::{FailPoint, MockEngine};

    #[test]
    fn original_reference_wins() {
        let engine = MockEngine::new();
        engine.add_image(&["nginx:1.25"]);
        let r = resolve_loaded_image(&engine, "nginx:1.25", &BTreeSet::new()).unwrap();
        assert_eq!(r.reference, "nginx:1.25");
        assert_eq!(r.step, ResolutionStep::OriginalReference);
    }

    #[test]
    fn single_new_image_is_tagged() {
        let engine = MockEngine::new();
        engine.add_image(&["<none>:<none>"]);
        let before = image_ids(&engine).unwrap();
        let loaded = engine.add_image(&[]);

        let r = resolve_loaded_image(&engine, "app:2", &before).unwrap();
        assert_eq!(r.step, ResolutionStep::NewlyLoaded);
        assert_eq!(r.reference, "app:2");
        assert_eq!(engine.get_image("app:2").unwrap().unwrap().id, loaded);
    }

    #[test]
    fn tag_failure_falls_back_to_id() {
        let engine = MockEngine::new();
        let loaded = engine.add_image(&[]);
        engine.fail_on(FailPoint::Tag);

        let r = resolve_loaded_image(&engine, "app:2", &BTreeSet::new()).unwrap();
        assert_eq!(r.reference, loaded.as_str());
        assert_eq!(r.warnings.len(), 1);
    }

    #[test]
    fn untagged_scan_when_diff_is_ambiguous() {
        let engine = MockEngine::new();
        engine.add_image(&["other:1"]);
        let untagged = engine.add_image(&[]);

        // nothing known before: two "new" images, so the diff says nothing
        let r = resolve_loaded_image(&engine, "app:2", &BTreeSet::new()).unwrap();
        assert_eq!(r.step, ResolutionStep::Untagged);
        assert_eq!(engine.get_image("app:2").unwrap().unwrap().id, untagged);
    }

    #[test]
    fn first_image_is_last_resort() {
        let engine = MockEngine::new();
        let first = engine.add_image(&["a:1"]);
        let before = image_ids(&engine).unwrap();

        let r = resolve_loaded_image(&engine, "app:2", &before).unwrap();
        assert_eq!(r.step, ResolutionStep::FirstImage);
        assert_eq!(r.reference, first.as_str());
        assert!(!r.warnings.is_empty());
    }

    #[test]
    fn no_images_is_image_not_found() {
        let engine = MockEngine::new();
        let result = resolve_loaded_image(&engine, "app:2", &BTreeSet::new());
        assert!(matches!(result, Err(CoreError::ImageNotFound(_))));
    }
}
