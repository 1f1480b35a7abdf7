//! Tests for image resolution and selection logic.

use std::cell::Cell;
use std::rc::Rc;

use rstest::rstest;
use scaleway_rs::ScalewayImage;

use super::{ImageSpec, image, query};
use crate::scaleway::{ScalewayBackend, ScalewayBackendError};

#[test]
fn select_image_id_returns_newest_creation_date() {
    let images = vec![
        image(ImageSpec::available("older", "2025-01-01T00:00:00Z")),
        image(ImageSpec::available("newest", "2025-02-01T00:00:00Z")),
        image(ImageSpec::available("middle", "2025-01-15T00:00:00Z")),
    ];

    let id = ScalewayBackend::select_image_id(images, &query()).expect("image selected");
    assert_eq!(id, "newest");
}

#[test]
fn select_image_id_errors_on_empty() {
    let images: Vec<ScalewayImage> = Vec::new();
    let err = ScalewayBackend::select_image_id(images, &query())
        .expect_err("empty candidates should fail");
    assert!(matches!(
        err,
        ScalewayBackendError::ImageNotFound { ref label, ref zone, .. }
            if label == "Ubuntu 24.04 Noble Numbat" && zone == "fr-par-1"
    ));
}

#[rstest]
#[case::wrong_arch(ImageSpec { arch: "arm64", ..ImageSpec::available("arm", "2025-03-01") })]
#[case::not_available(ImageSpec { state: "creating", ..ImageSpec::available("new", "2025-03-01") })]
fn filter_images_drops_unusable_candidates(#[case] rejected: ImageSpec) {
    let images = vec![
        image(rejected),
        image(ImageSpec::available("usable", "2025-01-01")),
    ];

    let kept = ScalewayBackend::filter_images(images, &query());

    let ids: Vec<&str> = kept.iter().map(|candidate| candidate.id.as_str()).collect();
    assert_eq!(ids, vec!["usable"]);
}

#[tokio::test]
async fn resolve_image_id_prefers_project_results() {
    let project_called = Rc::new(Cell::new(false));
    let public_called = Rc::new(Cell::new(false));
    let project_flag = Rc::clone(&project_called);
    let public_flag = Rc::clone(&public_called);

    let result = ScalewayBackend::resolve_image_id_with(
        &query(),
        move || {
            project_flag.set(true);
            async {
                Ok(vec![image(ImageSpec::available(
                    "project-img",
                    "2025-02-01T00:00:00Z",
                ))])
            }
        },
        move || {
            public_flag.set(true);
            async {
                Ok(vec![image(ImageSpec::available(
                    "public-img",
                    "2025-03-01T00:00:00Z",
                ))])
            }
        },
    )
    .await
    .expect("project image should resolve");

    assert_eq!(result, "project-img");
    assert!(project_called.get());
    assert!(!public_called.get(), "public lookup should not be needed");
}

#[tokio::test]
async fn resolve_image_id_falls_back_to_public() {
    let result = ScalewayBackend::resolve_image_id_with(
        &query(),
        || async {
            Ok(vec![image(ImageSpec {
                state: "error",
                ..ImageSpec::available("broken", "2025-02-01T00:00:00Z")
            })])
        },
        || async {
            Ok(vec![image(ImageSpec::available(
                "public-img",
                "2025-01-01T00:00:00Z",
            ))])
        },
    )
    .await
    .expect("public fallback should resolve");

    assert_eq!(result, "public-img");
}

#[tokio::test]
async fn resolve_image_id_propagates_errors() {
    let err = ScalewayBackend::resolve_image_id_with(
        &query(),
        || async {
            Err(ScalewayBackendError::Provider {
                message: "boom".to_owned(),
            })
        },
        || async { Ok(Vec::new()) },
    )
    .await
    .expect_err("error should surface");

    assert!(matches!(err, ScalewayBackendError::Provider { message } if message == "boom"));
}

#[tokio::test]
async fn image_ids_pass_through_without_lookup() {
    let backend = super::backend_fixture();
    let id = "8b7a7ba5-3d52-4e33-9a1b-2b8d4a0f6c11";

    let resolved = backend.resolve_image_id(id).await.expect("uuid passes through");

    assert_eq!(resolved, id);
}
