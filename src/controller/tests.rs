//! Unit tests for the lifecycle controller.

use std::net::IpAddr;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::backend::{InstanceState, SpotState};
use crate::remote::SshConfig;
use crate::test_support::{MemoryCloud, ScriptedRunner};

struct Harness {
    cloud: MemoryCloud,
    runner: ScriptedRunner,
    controller: LifecycleController<MemoryCloud, ScriptedRunner>,
    _keys: TempDir,
}

fn ssh_config() -> SshConfig {
    SshConfig {
        ssh_bin: String::from("ssh"),
        rsync_bin: String::from("rsync"),
        scp_bin: String::from("scp"),
        ssh_user: String::from("root"),
        ssh_port: 22,
        ssh_batch_mode: true,
        ssh_strict_host_key_checking: false,
        ssh_known_hosts_file: String::from("/dev/null"),
        rsync_path: String::from("sudo rsync"),
    }
}

#[fixture]
fn harness() -> Harness {
    let keys = TempDir::new().expect("temp dir");
    let folder = Utf8PathBuf::from_path_buf(keys.path().to_path_buf()).expect("utf8 path");
    let cloud = MemoryCloud::new();
    let runner = ScriptedRunner::new();
    let channel = RemoteChannel::new(ssh_config(), runner.clone()).expect("config should validate");
    let controller = LifecycleController::new(
        cloud.clone(),
        channel,
        KeyStore::new("demo1", folder),
    )
    .with_policy(ControllerPolicy::immediate());
    Harness {
        cloud,
        runner,
        controller,
        _keys: keys,
    }
}

fn request() -> LaunchRequest {
    LaunchRequest::builder()
        .name("demo1")
        .image("img-a")
        .instance_type("typeX")
        .ports([22, 80])
        .build()
        .expect("request should build")
}

#[rstest]
#[tokio::test]
async fn connect_on_empty_provider_creates_and_binds(harness: Harness) {
    let Harness {
        cloud,
        runner,
        mut controller,
        _keys,
    } = harness;
    runner.push_success();

    let instance = controller.connect(&request()).await.expect("connect");

    let calls = cloud.calls();
    assert_eq!(calls.run_instances, 1);
    assert_eq!(
        calls.tags,
        vec![(instance.id.clone(), String::from("Name"), String::from("demo1"))]
    );
    assert_eq!(instance.state, InstanceState::Running);
    let session = controller.session().expect("bound");
    assert_eq!(session.instance_id, instance.id);
    assert_eq!(Some(session.host), instance.address);
    assert!(session.key_file.as_str().ends_with("demo1.pem"));
    let probe = runner.invocations();
    assert_eq!(probe.len(), 1);
    assert_eq!(
        probe.first().and_then(|call| call.last_arg()).as_deref(),
        Some(PROBE_COMMAND)
    );
}

#[rstest]
#[tokio::test]
async fn consecutive_connects_reuse_the_instance(harness: Harness) {
    let Harness {
        cloud,
        runner,
        mut controller,
        _keys,
    } = harness;
    runner.push_successes(2);

    let first = controller.connect(&request()).await.expect("first connect");
    let second = controller.connect(&request()).await.expect("second connect");

    assert_eq!(first.id, second.id);
    assert_eq!(cloud.calls().run_instances, 1);
    assert_eq!(cloud.calls().created_key_pairs, 1);
}

#[rstest]
#[tokio::test]
async fn connect_reuses_seeded_running_instance(harness: Harness) {
    let Harness {
        cloud,
        runner,
        mut controller,
        _keys,
    } = harness;
    let id = cloud.seed_instance("demo1", InstanceState::Running);
    let _other = cloud.seed_instance("demo1", InstanceState::Terminated);
    runner.push_success();

    let instance = controller.connect(&request()).await.expect("connect");

    assert_eq!(instance.id, id);
    assert_eq!(cloud.calls().run_instances, 0);
}

#[rstest]
#[tokio::test]
async fn duplicate_running_names_are_ambiguous(harness: Harness) {
    let Harness {
        cloud,
        mut controller,
        _keys,
        ..
    } = harness;
    let first = cloud.seed_instance("demo1", InstanceState::Running);
    let second = cloud.seed_instance("demo1", InstanceState::Running);

    let err = controller
        .connect(&request())
        .await
        .expect_err("ambiguous name should fail");

    assert!(matches!(
        err,
        ControllerError::AmbiguousInstance { ref instance_ids, .. }
            if *instance_ids == vec![first.clone(), second.clone()]
    ));
    assert_eq!(*controller.binding(), Binding::Unbound);
}

#[rstest]
#[tokio::test]
async fn probe_succeeds_on_sixth_attempt(harness: Harness) {
    let Harness {
        runner,
        mut controller,
        _keys,
        ..
    } = harness;
    for _ in 0..5 {
        runner.push_exit_code(255);
    }
    runner.push_success();

    controller.connect(&request()).await.expect("sixth probe should bind");

    assert_eq!(runner.invocations().len(), 6);
    assert!(matches!(controller.binding(), Binding::Bound(_)));
}

#[rstest]
#[tokio::test]
async fn probe_exhaustion_reports_unreachable(harness: Harness) {
    let Harness {
        runner,
        mut controller,
        _keys,
        ..
    } = harness;
    for _ in 0..6 {
        runner.push_exit_code(255);
    }

    let err = controller
        .connect(&request())
        .await
        .expect_err("probe should give up");

    assert!(matches!(err, ControllerError::SshUnreachable { attempts: 6, .. }));
    assert_eq!(runner.invocations().len(), 6);
    assert_eq!(*controller.binding(), Binding::Unbound);
}

#[rstest]
#[tokio::test]
async fn stray_key_file_blocks_connect(harness: Harness) {
    let Harness {
        cloud,
        mut controller,
        _keys: keys,
        ..
    } = harness;
    let key_path = keys.path().join("demo1.pem");
    std::fs::write(&key_path, "orphan").expect("write key");

    let err = controller
        .connect(&request())
        .await
        .expect_err("inconsistent key should fail");

    assert!(matches!(
        err,
        ControllerError::KeyStore(KeyStoreError::CredentialInconsistency { .. })
    ));
    assert_eq!(std::fs::read_to_string(&key_path).expect("read key"), "orphan");
    assert_eq!(cloud.instance_count(), 0);
}

#[rstest]
#[tokio::test]
async fn terminate_by_name_unbinds(harness: Harness) {
    let Harness {
        cloud,
        runner,
        mut controller,
        _keys,
    } = harness;
    runner.push_success();
    let instance = controller.connect(&request()).await.expect("connect");

    let terminated = controller
        .terminate(Some("demo1"))
        .await
        .expect("terminate");

    assert_eq!(terminated, Some(instance.id.clone()));
    let calls = cloud.calls();
    assert!(calls.cancellations.is_empty());
    assert_eq!(calls.terminated, vec![instance.id]);
    assert_eq!(*controller.binding(), Binding::Unbound);
}

#[rstest]
#[tokio::test]
async fn terminate_missing_name_is_a_no_op(harness: Harness) {
    let Harness {
        cloud,
        mut controller,
        _keys,
        ..
    } = harness;

    let terminated = controller
        .terminate(Some("ghost"))
        .await
        .expect("missing instance is fine");

    assert_eq!(terminated, None);
    assert!(cloud.calls().terminated.is_empty());
}

#[rstest]
#[tokio::test]
async fn terminate_without_name_requires_binding(harness: Harness) {
    let Harness {
        mut controller,
        _keys,
        ..
    } = harness;

    let err = controller.terminate(None).await.expect_err("unbound");

    assert!(matches!(err, ControllerError::NotConnected));
}

#[rstest]
#[tokio::test]
async fn terminate_cancels_outstanding_spot_requests_in_one_call(harness: Harness) {
    let Harness {
        cloud,
        mut controller,
        _keys,
        ..
    } = harness;
    let open = cloud.seed_spot_request("demo1", SpotState::Open);
    let active = cloud.seed_spot_request("demo1", SpotState::Active);
    let _closed = cloud.seed_spot_request("demo1", SpotState::Closed);
    let _foreign = cloud.seed_spot_request("other", SpotState::Open);

    controller
        .terminate(Some("demo1"))
        .await
        .expect("terminate");

    assert_eq!(cloud.calls().cancellations, vec![vec![open, active]]);
}

#[rstest]
#[tokio::test]
async fn terminate_other_instance_keeps_binding(harness: Harness) {
    let Harness {
        cloud,
        runner,
        mut controller,
        _keys,
    } = harness;
    runner.push_success();
    controller.connect(&request()).await.expect("connect");
    let other = cloud.seed_instance("sidecar", InstanceState::Running);

    controller
        .terminate(Some("sidecar"))
        .await
        .expect("terminate");

    assert_eq!(cloud.calls().terminated, vec![other]);
    assert!(matches!(controller.binding(), Binding::Bound(_)));
}

#[rstest]
fn remote_operations_require_binding(harness: Harness) {
    let Harness {
        controller, _keys, ..
    } = harness;

    assert!(matches!(
        controller.cmd("uptime", true),
        Err(ControllerError::NotConnected)
    ));
    assert!(matches!(
        controller.put(camino::Utf8Path::new("/tmp/x"), "/tmp/x", true),
        Err(ControllerError::NotConnected)
    ));
    assert!(matches!(
        controller.exec_script(camino::Utf8Path::new("/tmp/x.sh"), None, true, None),
        Err(ControllerError::NotConnected)
    ));
}

#[rstest]
#[tokio::test]
async fn cmd_forwards_to_bound_host(harness: Harness) {
    let Harness {
        runner,
        mut controller,
        _keys,
        ..
    } = harness;
    runner.push_success();
    let instance = controller.connect(&request()).await.expect("connect");
    runner.push_output(Some(0), "up 3 days\n", "");

    let output = controller.cmd("uptime", true).expect("cmd");

    assert_eq!(output.stdout, "up 3 days\n");
    let invocations = runner.invocations();
    let call = invocations.last().expect("ssh call");
    let host = instance.address.map(|addr: IpAddr| format!("root@{addr}"));
    assert!(call.command_string().contains(host.as_deref().unwrap_or("missing")));
    assert_eq!(call.last_arg().as_deref(), Some("uptime"));
}

#[rstest]
#[tokio::test]
async fn check_backend_surfaces_provider_errors(harness: Harness) {
    let Harness {
        cloud,
        controller,
        _keys,
        ..
    } = harness;

    controller.check_backend().await.expect("healthy backend");
    cloud.fail_list_instances();

    let err = controller
        .check_backend()
        .await
        .expect_err("failing backend");
    assert!(matches!(err, ControllerError::Provider(_)));
}

#[rstest]
#[tokio::test]
async fn unnamed_terminate_cancels_every_outstanding_spot_request(harness: Harness) {
    let Harness {
        cloud,
        runner,
        mut controller,
        _keys,
    } = harness;
    let foreign = cloud.seed_spot_request("other", SpotState::Open);
    cloud.script_spot_states([SpotState::Active]);
    runner.push_success();
    let spot_launch = LaunchRequest {
        bid_price: Some(0.1),
        ..request()
    };
    let instance = controller.connect(&spot_launch).await.expect("spot connect");

    controller.terminate(None).await.expect("terminate bound");

    let calls = cloud.calls();
    assert_eq!(calls.cancellations.len(), 1);
    let cancelled = calls.cancellations.first().expect("one cancel call");
    assert_eq!(cancelled.len(), 2);
    assert!(cancelled.contains(&foreign));
    assert_eq!(calls.terminated, vec![instance.id]);
    assert_eq!(*controller.binding(), Binding::Unbound);
}
