//! Tests for remote path and shell helpers.

use rstest::rstest;

use super::super::*;

#[rstest]
#[case("/root/app/", "setup.sh", "/root/app/setup.sh")]
#[case("/root/app", "setup.sh", "/root/app/setup.sh")]
#[case("/home/ubuntu/app//", "packages", "/home/ubuntu/app/packages")]
fn join_remote_path_uses_single_separator(
    #[case] dir: &str,
    #[case] file: &str,
    #[case] expected: &str,
) {
    assert_eq!(join_remote_path(dir, file), expected);
}

#[rstest]
#[case(true, "sudo chmod +x run.sh")]
#[case(false, "chmod +x run.sh")]
fn elevate_prefixes_sudo_only_when_requested(#[case] sudo: bool, #[case] expected: &str) {
    assert_eq!(elevate("chmod +x run.sh", sudo), expected);
}

#[test]
fn expand_tilde_leaves_relative_paths_alone() {
    assert_eq!(expand_tilde("keys/demo.pem"), "keys/demo.pem");
    assert_eq!(expand_tilde("~user/keys"), "~user/keys");
}
