//! Image resolution for the Scaleway backend.

use std::future::Future;

use scaleway_rs::{ScalewayImage, ScalewayListInstanceImagesBuilder};
use uuid::Uuid;

use super::super::{ScalewayBackend, ScalewayBackendError};

/// Label, architecture, and zone an image must match.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(in crate::scaleway) struct ImageQuery {
    pub(in crate::scaleway) label: String,
    pub(in crate::scaleway) arch: String,
    pub(in crate::scaleway) zone: String,
}

impl ScalewayBackend {
    fn image_query(&self, label: &str) -> ImageQuery {
        ImageQuery {
            label: label.to_owned(),
            arch: self.config.default_architecture.clone(),
            zone: self.zone.as_str().to_owned(),
        }
    }

    /// Resolves an image label to an image id. Ids pass through unchanged.
    pub(in crate::scaleway) async fn resolve_image_id(
        &self,
        image: &str,
    ) -> Result<String, ScalewayBackendError> {
        if Uuid::parse_str(image).is_ok() {
            return Ok(image.to_owned());
        }

        let query = &self.image_query(image);
        let project_id = self.config.default_project_id.as_str();
        let organization_id = self.config.default_organization_id.as_deref();
        Self::resolve_image_id_with(
            query,
            || async move {
                let mut scoped =
                    ScalewayListInstanceImagesBuilder::new(self.api.clone(), &query.zone)
                        .public(true)
                        .project(project_id)
                        .name(&query.label)
                        .arch(&query.arch);
                if let Some(org) = organization_id {
                    scoped = scoped.organization(org);
                }
                scoped.run_async().await.map_err(ScalewayBackendError::from)
            },
            || async move {
                ScalewayListInstanceImagesBuilder::new(self.api.clone(), &query.zone)
                    .public(true)
                    .name(&query.label)
                    .arch(&query.arch)
                    .run_async()
                    .await
                    .map_err(ScalewayBackendError::from)
            },
        )
        .await
    }

    /// Queries project images first and public images only when the project
    /// has none.
    pub(in crate::scaleway) async fn resolve_image_id_with<FutA, FutB, FetchA, FetchB>(
        query: &ImageQuery,
        project_fetch: FetchA,
        public_fetch: FetchB,
    ) -> Result<String, ScalewayBackendError>
    where
        FetchA: FnOnce() -> FutA,
        FetchB: FnOnce() -> FutB,
        FutA: Future<Output = Result<Vec<ScalewayImage>, ScalewayBackendError>>,
        FutB: Future<Output = Result<Vec<ScalewayImage>, ScalewayBackendError>>,
    {
        let project_images = Self::filter_images(project_fetch().await?, query);
        let candidates = if project_images.is_empty() {
            Self::filter_images(public_fetch().await?, query)
        } else {
            project_images
        };
        Self::select_image_id(candidates, query)
    }

    /// Picks the newest candidate.
    pub(in crate::scaleway) fn select_image_id(
        candidates: Vec<ScalewayImage>,
        query: &ImageQuery,
    ) -> Result<String, ScalewayBackendError> {
        candidates
            .into_iter()
            .max_by(|lhs, rhs| lhs.creation_date.cmp(&rhs.creation_date))
            .map(|image| image.id)
            .ok_or_else(|| ScalewayBackendError::ImageNotFound {
                label: query.label.clone(),
                arch: query.arch.clone(),
                zone: query.zone.clone(),
            })
    }

    pub(in crate::scaleway) fn filter_images(
        images: Vec<ScalewayImage>,
        query: &ImageQuery,
    ) -> Vec<ScalewayImage> {
        images
            .into_iter()
            .filter(|image| image.arch == query.arch && image.state == "available")
            .collect()
    }
}
