//! End-to-end builds with a real container runtime.
//!
//! These pull an image with rpmbuild and download the tmux sources, so they
//! are ignored by default.
//!
//! Run with: cargo test --test integration_tests -- --ignored
//!
//! DRB_TEST_IMAGE selects the builder image; it needs rpmbuild, spectool and
//! yum-builddep or dnf builddep.

mod helpers;

use std::fs;
use std::os::unix::fs::MetadataExt;

use drb::container::ContainerInvocation;
use drb::{BuildError, BuildOrchestrator, BuildRequest, Config, OwnershipTarget, SystemRunner};
use helpers::*;

const DEFAULT_IMAGE: &str = "alanfranz/drb-epel-7-x86-64:latest";

fn image() -> String {
    std::env::var("DRB_TEST_IMAGE").unwrap_or_else(|_| DEFAULT_IMAGE.to_string())
}

fn arch() -> &'static str {
    if image().contains("i386") {
        "i386"
    } else {
        "x86_64"
    }
}

fn orchestrator() -> BuildOrchestrator<SystemRunner> {
    BuildOrchestrator::new(SystemRunner::new(), Config::load().container_runtime)
}

fn request(env: &TestEnv) -> BuildRequest {
    BuildRequest::new(image(), &env.src, &env.rpm).unwrap()
}

#[test]
#[ignore]
fn test_fails_if_sources_unavailable_and_downloads_disabled() {
    let env = TestEnv::new();
    env.write_src("tmux.spec", TMUX_SPEC);

    let err = orchestrator().run(&request(&env)).unwrap_err();
    assert!(matches!(err, BuildError::SourcesUnavailable { .. }));
}

#[test]
#[ignore]
fn test_builds_binary_and_debuginfo_from_spec() {
    let env = TestEnv::new();
    env.write_src("tmux.spec", TMUX_SPEC);

    orchestrator()
        .run(&request(&env).with_download_sources(true))
        .unwrap();
    assert_eq!(list_names(&env.rpm.join(arch())).len(), 2);
}

#[test]
#[ignore]
fn test_builds_from_override_directory() {
    let env = TestEnv::new();
    env.write_spec_override("tmux.spec", TMUX_SPEC);

    orchestrator()
        .run(
            &request(&env)
                .with_download_sources(true)
                .with_spec_override_dir(&env.specs),
        )
        .unwrap();
    assert_eq!(list_names(&env.rpm.join(arch())).len(), 2);
}

#[test]
#[ignore]
fn test_builds_from_spectemplate() {
    let env = TestEnv::new();
    env.write_src("tmux.spectemplate", TMUX_SPECTEMPLATE);

    orchestrator()
        .run(&request(&env).with_download_sources(true))
        .unwrap();
    assert_eq!(list_names(&env.rpm.join(arch())).len(), 2);
}

#[test]
#[ignore]
fn test_signed_packages_verify() {
    let env = TestEnv::new();
    env.write_src("tmux.spec", TMUX_SPEC);
    let key = env.write_src("sign.gpg", SIGN_PRIV);
    fs::write(env.rpm.join("sign.pub"), SIGN_PUB).unwrap();

    orchestrator()
        .run(
            &request(&env)
                .with_download_sources(true)
                .with_signing_key(&key)
                .with_verbose(true),
        )
        .unwrap();

    let runtime = Config::load().container_runtime;
    let result = ContainerInvocation::new()
        .with_auto_remove()
        .with_bind_mount(&env.rpm, "/rpm")
        .with_workdir(format!("/rpm/{}", arch()))
        .with_image(image())
        .with_command_and_args(
            "/bin/bash",
            ["-c", "rpm --import ../sign.pub && rpm -K *.rpm"],
        )
        .run(&SystemRunner::new(), &runtime)
        .unwrap();

    assert!(result.output.contains("pgp"), "{}", result.output);
    assert!(result.output.contains("OK"), "{}", result.output);
}

#[test]
#[ignore]
fn test_unsigned_packages_carry_no_signature() {
    let env = TestEnv::new();
    env.write_src("tmux.spec", TMUX_SPEC);

    orchestrator()
        .run(&request(&env).with_download_sources(true))
        .unwrap();

    let runtime = Config::load().container_runtime;
    let result = ContainerInvocation::new()
        .with_auto_remove()
        .with_bind_mount(&env.rpm, "/rpm")
        .with_workdir(format!("/rpm/{}", arch()))
        .with_image(image())
        .with_command_and_args("/bin/bash", ["-c", "rpm -K *.rpm"])
        .run(&SystemRunner::new(), &runtime)
        .unwrap();

    // Digests only: "sha1 md5 OK" on el7, "digests OK" on newer rpm.
    assert!(result.output.contains("OK"), "{}", result.output);
    assert!(!result.output.contains("pgp"), "{}", result.output);
    assert!(!result.output.contains("signatures"), "{}", result.output);
}

#[test]
#[ignore]
fn test_packages_get_target_ownership() {
    let env = TestEnv::new();
    env.write_src("tmux.spec", TMUX_SPEC);
    let target = OwnershipTarget::new(OwnershipTarget::current().uid, 1234);

    orchestrator()
        .run(
            &request(&env)
                .with_download_sources(true)
                .with_target_ownership(target),
        )
        .unwrap();

    let arch_dir = env.rpm.join(arch());
    for name in list_names(&arch_dir) {
        let meta = fs::metadata(arch_dir.join(name)).unwrap();
        assert_eq!(meta.uid(), target.uid);
        assert_eq!(meta.gid(), 1234);
    }
}
