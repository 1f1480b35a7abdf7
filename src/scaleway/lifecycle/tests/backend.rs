//! Tests for backend operations that never reach the network.

use camino::Utf8Path;

use super::super::ssh_key::keygen_args_for_tests;
use super::{backend_fixture, server};
use crate::backend::CloudBackend;
use crate::scaleway::ScalewayBackendError;

#[tokio::test]
async fn power_on_skips_running_servers() {
    let result = backend_fixture()
        .power_on_if_needed(&server("running", &["poweroff"]))
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn power_on_errors_when_not_allowed() {
    let result = backend_fixture()
        .power_on_if_needed(&server("stopped", &[]))
        .await;
    assert!(matches!(
        result,
        Err(ScalewayBackendError::PowerOnNotAllowed { ref state, .. }) if state == "stopped"
    ));
}

#[tokio::test]
async fn spot_requests_are_unsupported() {
    let backend = backend_fixture();

    assert!(
        backend
            .list_spot_requests()
            .await
            .expect("listing is empty")
            .is_empty()
    );
    backend
        .cancel_spot_requests(&[])
        .await
        .expect("empty cancel is a no-op");
    let err = backend
        .cancel_spot_requests(&[String::from("sir-1")])
        .await
        .expect_err("cancel of real ids fails");
    assert!(matches!(err, ScalewayBackendError::Unsupported { .. }));
}

#[test]
fn keygen_arguments_request_passphraseless_ed25519() {
    let rendered: Vec<String> = keygen_args_for_tests("cms-demo", Utf8Path::new("/tmp/k/cms-demo"))
        .iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();

    assert_eq!(
        rendered,
        vec![
            "-q", "-t", "ed25519", "-N", "", "-C", "cms-demo", "-f", "/tmp/k/cms-demo"
        ]
    );
}

#[tokio::test]
async fn failing_keygen_is_reported() {
    let mut backend = backend_fixture();
    backend.keygen_bin = String::from("false");

    let err = backend
        .create_key_pair("cms-demo")
        .await
        .expect_err("keygen should fail");

    assert!(matches!(
        err,
        ScalewayBackendError::KeyGeneration { ref name, .. } if name == "cms-demo"
    ));
}

#[test]
fn backend_rejects_incomplete_config() {
    let mut config = super::dummy_config();
    config.secret_key = String::new();

    let result = crate::scaleway::ScalewayBackend::new(config);

    assert!(matches!(result, Err(ScalewayBackendError::Config(_))));
}
