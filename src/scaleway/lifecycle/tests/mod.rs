//! Unit tests for Scaleway lifecycle helpers.

use std::collections::HashMap;

use scaleway_rs::ScalewayImage;

use super::ServerRecord;
use super::image::ImageQuery;
use crate::config::ScalewayConfig;
use crate::scaleway::types::Action;
use crate::scaleway::ScalewayBackend;

#[derive(Copy, Clone)]
struct ImageSpec {
    id: &'static str,
    arch: &'static str,
    state: &'static str,
    creation_date: &'static str,
}

impl ImageSpec {
    const fn available(id: &'static str, creation_date: &'static str) -> Self {
        Self {
            id,
            arch: "x86_64",
            state: "available",
            creation_date,
        }
    }
}

fn image(spec: ImageSpec) -> ScalewayImage {
    ScalewayImage {
        id: spec.id.to_owned(),
        name: String::new(),
        arch: spec.arch.to_owned(),
        creation_date: spec.creation_date.to_owned(),
        modification_date: String::new(),
        from_server: None,
        organization: String::new(),
        public: true,
        state: spec.state.to_owned(),
        project: String::new(),
        tags: vec![],
        zone: String::new(),
        root_volume: scaleway_rs::ScalewayImageRootVolume {
            id: String::new(),
            name: String::new(),
            size: 0,
            volume_type: String::new(),
        },
        default_bootscript: None,
        extra_volumes: scaleway_rs::ScalewayImageExtraVolumes {
            volumes: HashMap::new(),
        },
    }
}

fn dummy_config() -> ScalewayConfig {
    ScalewayConfig {
        access_key: None,
        secret_key: String::from("dummy"),
        default_organization_id: None,
        default_project_id: String::from("proj"),
        default_zone: String::from("fr-par-1"),
        default_instance_type: String::from("DEV1-L"),
        default_image: String::from("Ubuntu 24.04 Noble Numbat"),
        default_architecture: String::from("x86_64"),
    }
}

fn backend_fixture() -> ScalewayBackend {
    ScalewayBackend::new(dummy_config()).expect("dummy config should validate")
}

fn query() -> ImageQuery {
    ImageQuery {
        label: String::from("Ubuntu 24.04 Noble Numbat"),
        arch: String::from("x86_64"),
        zone: String::from("fr-par-1"),
    }
}

fn server(state: &str, allowed: &[&str]) -> ServerRecord {
    ServerRecord {
        id: String::from("srv-1"),
        state: state.to_owned(),
        tags: Vec::new(),
        public_ip: None,
        public_ips: Vec::new(),
        allowed_actions: allowed.iter().copied().map(Action::from).collect(),
    }
}

mod backend;
mod image;
