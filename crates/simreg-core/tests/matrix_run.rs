//! End-to-end matrix execution against a temporary workspace.
//!
//! External tools are stub shell scripts: the "compiler" writes a fixed
//! binary, the "simulator" replays canned UART output with a terminal-status
//! marker. The engine itself runs unmodified.

use simreg_core::{
    MatrixExecutor, MatrixFilter, Registry, ReportFile, Summary, ToolchainConfig, Verdict,
    WorkspaceLayout,
};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

const CORE_JSON: &str = r#"{
    "name": "picorv32",
    "description": "PicoRV32 test core",
    "verilog_files": ["testbench.v"],
    "simulator": "iverilog",
    "memory": {"base_address": "0x00000000", "size": "64K", "word_size": 4},
    "uart": {"base_address": "0x02000000"}
}"#;

fn write_script(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn add_project(layout: &WorkspaceLayout, name: &str, test_config: &str) {
    let dir = layout.projects_dir.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("Cargo.toml"),
        format!("[package]\nname = \"{name}\"\nversion = \"0.1.0\"\n"),
    )
    .unwrap();
    fs::write(dir.join("test_config.json"), test_config).unwrap();
}

/// Workspace with one core and stub tools.
///
/// The stub compiler fails for any project named `broken` and logs every
/// invocation; the stub simulator emits the hello banner and traps, except
/// in `idle` simulation directories where it emits a prompt and then
/// exhausts the cycle budget.
fn workspace() -> (tempfile::TempDir, WorkspaceLayout, ToolchainConfig) {
    let tmp = tempfile::tempdir().unwrap();
    let layout = WorkspaceLayout::at(tmp.path());

    let core_dir = layout.cores_dir.join("picorv32");
    fs::create_dir_all(&core_dir).unwrap();
    fs::write(core_dir.join("core.json"), CORE_JSON).unwrap();
    fs::write(
        core_dir.join("testbench.v"),
        "initial $readmemh(\"firmware.hex\", mem);\n",
    )
    .unwrap();

    let bin_dir = tmp.path().join("bin");
    fs::create_dir_all(&bin_dir).unwrap();
    write_script(
        &bin_dir.join("cargo"),
        &format!(
            "echo \"$PWD\" >> {log}\n\
             case \"$(basename \"$PWD\")\" in\n\
             broken) echo 'error: linker blew up' >&2; exit 101 ;;\n\
             *)\n\
               mkdir -p target/riscv32i-unknown-none-elf/release\n\
               printf '\\001\\002\\003\\004' > \"target/riscv32i-unknown-none-elf/release/$(basename \"$PWD\" | tr - _)\"\n\
             ;;\n\
             esac",
            log = tmp.path().join("compiler.log").display()
        ),
    );
    write_script(&bin_dir.join("llvm-objcopy"), "cp \"$3\" \"$4\"");
    write_script(&bin_dir.join("iverilog"), "true");
    write_script(
        &bin_dir.join("vvp"),
        "case \"$(basename \"$PWD\")\" in\n\
         idle*)\n\
           printf 'idle loop ready\\r\\n'\n\
           echo 'TIMEOUT cycle=10000' >&2\n\
         ;;\n\
         *)\n\
           printf 'Hello, World from Rust on PicoRV32!\\r\\n'\n\
           echo 'TRAP cycle=900' >&2\n\
         ;;\n\
         esac",
    );

    (tmp, layout, ToolchainConfig::rooted_at(&bin_dir))
}

fn compiler_invocations(tmp: &tempfile::TempDir) -> usize {
    fs::read_to_string(tmp.path().join("compiler.log"))
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

const HELLO_TESTS: &str = r#"{
    "tests": [
        {
            "description": "hello banner",
            "cores": ["picorv32"],
            "expected_output": ["Hello, World from Rust on PicoRV32!"],
            "timeout": 10000
        }
    ]
}"#;

#[tokio::test]
async fn test_passing_matrix_and_report() {
    let (_tmp, layout, toolchain) = workspace();
    add_project(&layout, "hello-world", HELLO_TESTS);

    let registry = Registry::discover(&layout).unwrap();
    let executor = MatrixExecutor::new(layout.clone(), toolchain);
    let outcomes = executor
        .run(&registry, &MatrixFilter::default())
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].verdict, Verdict::Pass);
    assert!(outcomes[0].captured.contains("Hello, World"));

    let summary = Summary::aggregate(outcomes, 1234);
    assert!(summary.success());

    let report_path = layout.output_dir.join("report.json");
    ReportFile::from_summary(&summary).write(&report_path).unwrap();
    let report: ReportFile =
        serde_json::from_str(&fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report.total, 1);
    assert!(report.success);
    assert_eq!(report.records[0].project, "hello-world");
}

#[tokio::test]
async fn test_failing_build_is_isolated_from_siblings() {
    let (_tmp, layout, toolchain) = workspace();
    add_project(&layout, "hello-world", HELLO_TESTS);
    add_project(
        &layout,
        "broken",
        r#"{"tests": [{"description": "never builds", "cores": ["picorv32"],
            "expected_output": ["unreachable"], "timeout": 1000}]}"#,
    );

    let registry = Registry::discover(&layout).unwrap();
    let executor = MatrixExecutor::new(layout, toolchain).with_parallelism(2);
    let outcomes = executor
        .run(&registry, &MatrixFilter::default())
        .await
        .unwrap();

    // One outcome per expanded item, independent of the broken sibling.
    assert_eq!(outcomes.len(), 2);
    let broken = outcomes.iter().find(|o| o.project == "broken").unwrap();
    let hello = outcomes.iter().find(|o| o.project == "hello-world").unwrap();

    assert_eq!(broken.verdict, Verdict::Error);
    assert!(broken.message.contains("linker blew up"));
    assert_eq!(hello.verdict, Verdict::Pass);

    let summary = Summary::aggregate(outcomes, 0);
    assert!(!summary.success());
    assert_eq!(summary.count(Verdict::Error), 1);
}

#[tokio::test]
async fn test_shared_artifact_builds_once() {
    let (tmp, layout, toolchain) = workspace();
    add_project(
        &layout,
        "hello-world",
        r#"{"tests": [
            {"description": "banner once", "cores": ["picorv32"],
             "expected_output": ["Hello"], "timeout": 10000},
            {"description": "banner twice", "cores": ["picorv32"],
             "expected_output": ["PicoRV32"], "timeout": 10000}
        ]}"#,
    );

    let registry = Registry::discover(&layout).unwrap();
    let executor = MatrixExecutor::new(layout, toolchain).with_parallelism(2);
    let outcomes = executor
        .run(&registry, &MatrixFilter::default())
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.passed()));
    assert_eq!(
        compiler_invocations(&tmp),
        1,
        "two test cases on one (project, core) pair must share one build"
    );
}

#[tokio::test]
async fn test_idle_loop_timeout_passes_when_output_already_seen() {
    let (_tmp, layout, toolchain) = workspace();
    add_project(
        &layout,
        "idle",
        r#"{"tests": [{"description": "idle prompt", "cores": ["picorv32"],
            "expected_output": ["idle loop ready"], "timeout": 10000}]}"#,
    );

    let registry = Registry::discover(&layout).unwrap();
    let executor = MatrixExecutor::new(layout, toolchain);
    let outcomes = executor
        .run(&registry, &MatrixFilter::default())
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].verdict, Verdict::Pass);
    assert_eq!(outcomes[0].cycles, Some(10_000));
}

#[tokio::test]
async fn test_idle_loop_timeout_fails_when_output_missing() {
    let (_tmp, layout, toolchain) = workspace();
    add_project(
        &layout,
        "idle",
        r#"{"tests": [{"description": "idle prompt", "cores": ["picorv32"],
            "expected_output": ["banner that never appears"], "timeout": 10000}]}"#,
    );

    let registry = Registry::discover(&layout).unwrap();
    let executor = MatrixExecutor::new(layout, toolchain);
    let outcomes = executor
        .run(&registry, &MatrixFilter::default())
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert!(!outcomes[0].passed());
    assert_eq!(outcomes[0].verdict, Verdict::Timeout);
    // Diagnostics keep the partial output that did arrive.
    assert!(outcomes[0].captured.contains("idle loop ready"));
}

#[tokio::test]
async fn test_unknown_filter_runs_nothing() {
    let (tmp, layout, toolchain) = workspace();
    add_project(&layout, "hello-world", HELLO_TESTS);

    let registry = Registry::discover(&layout).unwrap();
    let executor = MatrixExecutor::new(layout, toolchain);
    let err = executor
        .run(
            &registry,
            &MatrixFilter {
                project: Some("missing".to_string()),
                core: None,
            },
        )
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(
        compiler_invocations(&tmp),
        0,
        "fail-fast validation must precede any subprocess launch"
    );
}
