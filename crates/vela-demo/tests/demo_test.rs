//! End-to-end demo runs

use std::path::PathBuf;

use vela_demo::{Options, run};
use vela_view::{ScriptValue, SessionState};

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("vela-demo-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

// ============================================================================
// RUNS
// ============================================================================

#[test]
fn test_page_renders_to_png() {
    let dir = scratch("page");
    let page = dir.join("page.html");
    std::fs::write(
        &page,
        "<title>Demo</title><script>vela.setBackground([0, 128, 0]); vela.fillRect(1, 1, 2, 2, [255, 0, 0]);</script>",
    )
    .unwrap();
    let output = dir.join("frame.png");

    let options = Options {
        target: page.to_string_lossy().into_owned(),
        width: 32,
        height: 24,
        output: output.clone(),
        scripts: vec!["6 * 7".to_string()],
        config: None,
    };
    let report = run(&options).unwrap();

    assert_eq!(report.title, "Demo");
    assert_eq!(report.state, SessionState::Ready);
    assert_eq!(report.results, vec![ScriptValue::Number(42.0)]);
    assert_eq!((report.frame.width, report.frame.height), (32, 24));
    let png = std::fs::read(&output).unwrap();
    assert_eq!(&png[1..4], b"PNG");
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_config_file_is_applied() {
    let dir = scratch("config");
    let config = dir.join("engine.json");
    std::fs::write(&config, r#"{"thread_name": "demo-engine", "view": {"background": [0, 0, 0, 255]}}"#).unwrap();

    let options = Options {
        target: "about:blank".to_string(),
        width: 8,
        height: 8,
        output: dir.join("blank.png"),
        scripts: Vec::new(),
        config: Some(config),
    };
    let report = run(&options).unwrap();

    assert_eq!((report.frame.width, report.frame.height), (8, 8));
    assert!(report.output.exists());
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_missing_page_fails() {
    let dir = scratch("missing");
    let options = Options {
        target: dir.join("nope.html").to_string_lossy().into_owned(),
        width: 8,
        height: 8,
        output: dir.join("nope.png"),
        scripts: Vec::new(),
        config: None,
    };

    assert!(run(&options).is_err());
    std::fs::remove_dir_all(&dir).ok();
}
