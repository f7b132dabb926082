use assert_cmd::prelude::*;
use psys_dynamic::{
    process_group::process_group_sizeof, Generation, KernelBitmap, ProgramGroupManifest,
    ProgramGroupParam,
};
use std::{
    path::PathBuf,
    process::{Command, Output},
};

fn demo_manifest() -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("../demos/isp_pipeline.json");
    return path;
}

fn psys_tool(args: &[&str]) -> Output {
    return Command::cargo_bin("psys_tool")
        .expect("psys_tool binary should be built")
        .env("PSYS_CONFIG", "/nonexistent/psys.json")
        .env_remove("PSYS_GENERATION")
        .arg(demo_manifest())
        .args(args)
        .output()
        .expect("psys_tool should run");
}

fn stdout_of(output: &Output) -> String {
    return String::from_utf8(output.stdout.clone()).expect("stdout should be utf8");
}

#[test]
fn drives_demo_pipeline_to_running() {
    let output = psys_tool(&[]);
    assert!(output.status.success(), "{:?}", output);
    let stdout = stdout_of(&output);
    assert!(stdout.contains("process group 187: Running"), "{}", stdout);
    assert!(stdout.contains("valid: true"));
}

#[test]
fn ppg_protocol_enqueues_a_buffer_set() {
    let output = psys_tool(&["--protocol", "ppg", "--kernels", "0,1,3"]);
    assert!(output.status.success(), "{:?}", output);
    let stdout = stdout_of(&output);
    assert!(stdout.contains("enqueued buffer set on queue 0"), "{}", stdout);
}

#[test]
fn stops_at_requested_stage() {
    let output = psys_tool(&["--until", "blocked"]);
    assert!(output.status.success(), "{:?}", output);
    assert!(stdout_of(&output).contains("process group 187: Blocked"));
}

#[test]
fn size_only_matches_library_sizing() {
    let manifest: ProgramGroupManifest =
        serde_json::from_slice(&std::fs::read(demo_manifest()).expect("demo should be readable"))
            .expect("demo should parse");
    let param = ProgramGroupParam::new(KernelBitmap::from_kernels(&[0, 1, 3]));
    let size = process_group_sizeof(Generation::Ipu6ep.model(), &manifest, &param)
        .expect("demo should size");

    let output = psys_tool(&["--size-only", "--kernels", "0,1,3"]);
    assert!(output.status.success(), "{:?}", output);
    assert_eq!(
        format!("process group 187: {} bytes\n", size),
        stdout_of(&output)
    );
}

#[test]
fn rejects_kernels_outside_manifest() {
    let output = psys_tool(&["--kernels", "9"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).expect("stderr should be utf8");
    assert!(stderr.contains("InvalidArgument (status -22)"), "{}", stderr);
}

#[test]
fn rejects_generation_too_small_for_manifest() {
    let output = psys_tool(&["--generation", "ipu6se"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).expect("stderr should be utf8");
    assert!(stderr.contains("MalformedConfig"), "{}", stderr);
}
