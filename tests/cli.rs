use std::{
    path::Path,
    process::{Command, Output},
};

use image::{GrayImage, Luma};

/// Two frames with a bright square on the vehicle, saved as `frame00.png` and `frame01.png`
fn write_sequence(dir: &Path) {
    for index in 0..2u32 {
        let (left, top) = (600 + 3 * index, 240 + 2 * index);
        let image = GrayImage::from_fn(800, 400, |x, y| {
            let inside = (left..left + 30).contains(&x) && (top..top + 30).contains(&y);
            Luma([if inside { 220 } else { 30 }])
        });
        image
            .save(dir.join(format!("frame{:02}.png", index)))
            .unwrap();
    }
}

fn featurebench(dir: &Path, extra: &[&str]) -> Output {
    let data_path = dir.to_str().unwrap();
    let summary_path = dir.join("2dfeature.csv");
    Command::new(env!("CARGO_BIN_EXE_featurebench"))
        .env_remove("RUST_LOG")
        .args([
            "--data-path",
            data_path,
            "--img-prefix",
            "frame",
            "--img-suffix",
            ".png",
            "--start-index",
            "0",
            "--end-index",
            "1",
            "--fill-width",
            "2",
            "--summary-path",
            summary_path.to_str().unwrap(),
        ])
        .args(extra)
        .output()
        .unwrap()
}

#[test]
fn successful_run_prints_configuration_and_appends_summary() {
    let dir = tempfile::tempdir().unwrap();
    write_sequence(dir.path());

    let output = featurebench(
        dir.path(),
        &["--detector-type", "SHITOMASI", "--descriptor-type", "BRIEF"],
    );
    assert_eq!(output.status.code(), Some(0));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with(
        "Detector: SHITOMASI\nDescriptor: BRIEF\nMatcher: MAT_BF\nSelector: SEL_NN\n"
    ));
    assert!(stdout.contains("Average matches: "));

    // timing lines show up under the default log filter
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("SHITOMASI detection with n="));
    assert!(stderr.contains("BRIEF descriptor extraction in"));
    assert!(stderr.contains("SHITOMASI/BRIEF found"));

    let summary = std::fs::read_to_string(dir.path().join("2dfeature.csv")).unwrap();
    assert_eq!(summary.lines().count(), 1);
    assert!(summary.starts_with("SHITOMASI/BRIEF,"));
}

#[test]
fn akaze_descriptor_with_other_detector_exits_with_one() {
    let dir = tempfile::tempdir().unwrap();
    write_sequence(dir.path());

    let output = featurebench(
        dir.path(),
        &["--detector-type", "FAST", "--descriptor-type", "AKAZE"],
    );
    assert_eq!(output.status.code(), Some(1));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("error: invalid configuration"));
    assert!(stderr.contains("AKAZE descriptor can be used only with AKAZE detector"));
    assert!(output.stdout.is_empty());
    assert!(!dir.path().join("2dfeature.csv").exists());
}

#[test]
fn help_exits_with_one() {
    let output = Command::new(env!("CARGO_BIN_EXE_featurebench"))
        .arg("--help")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stdout).contains("--detector-type"));
}

#[test]
fn unknown_detector_exits_with_one() {
    let output = Command::new(env!("CARGO_BIN_EXE_featurebench"))
        .args(["--detector-type", "SURF"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn missing_image_is_reported_and_nothing_is_appended() {
    let dir = tempfile::tempdir().unwrap();
    write_sequence(dir.path());
    std::fs::remove_file(dir.path().join("frame01.png")).unwrap();

    let output = featurebench(dir.path(), &["--descriptor-type", "BRIEF"]);
    assert_eq!(output.status.code(), Some(1));

    let stderr = String::from_utf8_lossy(&output.stderr);
    let report = stderr
        .lines()
        .find(|line| line.starts_with("error: "))
        .unwrap();
    assert!(report.contains("frame01.png does not exist"));
    assert!(!dir.path().join("2dfeature.csv").exists());
}
