use tokenshift::compiler::loader::load_process_from_yaml;
use tokenshift::dsl::builder::ProcessBuilder;
use std::fs;

#[test]
fn test_load_simple_yaml_process() {
    let yaml_content = r#"
id: "test-yaml-flow"
name: "YAML Test Process"
variables:
  env: "dev"
nodes:
  - id: "start"
    type: "Start"
  - id: "fork"
    type: "InclusiveGateway"
  - id: "review"
    type: "Task"
  - id: "sp"
    type: "SubProcess"
    nodes:
      - id: "spStart"
        type: "Start"
      - id: "spEnd"
        type: "End"
    edges:
      - source: "spStart"
        target: "spEnd"
  - id: "end"
    type: "End"
edges:
  - source: "start"
    target: "fork"
  - source: "fork"
    target: "review"
    condition: "${env == \"dev\"}"
  - source: "fork"
    target: "sp"
  - source: "review"
    target: "end"
  - source: "sp"
    target: "end"
"#;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file_path = temp_dir.path().join("process.yaml");
    fs::write(&file_path, yaml_content).expect("Failed to write temp file");

    let loaded = load_process_from_yaml(&file_path).expect("Failed to load process from YAML");

    let expected = ProcessBuilder::new("test-yaml-flow")
        .name("YAML Test Process")
        .var("env", "dev")
        .start("start")
        .inclusive_gateway("fork")
        .task("review")
        .sub_process("sp")
            .start("spStart")
            .end("spEnd")
            .connect("spStart", "spEnd")
            .done()
        .end("end")
        .connect("start", "fork")
        .connect_if("fork", "review", "${env == \"dev\"}")
        .connect("fork", "sp")
        .connect("review", "end")
        .connect("sp", "end")
        .build();

    assert_eq!(loaded, expected);

    temp_dir.close().expect("Failed to close temp dir");
}

#[test]
fn test_load_missing_file_fails() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let err = load_process_from_yaml(&temp_dir.path().join("absent.yaml")).expect_err("Missing file should fail");
    assert!(err.to_string().contains("Failed to read YAML file"));
}

#[test]
fn test_load_unknown_node_type_fails() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file_path = temp_dir.path().join("bad.yaml");
    fs::write(&file_path, "id: bad\nname: bad\nnodes:\n  - id: x\n    type: Timer\n").expect("Failed to write temp file");

    let err = load_process_from_yaml(&file_path).expect_err("Unknown type should fail");
    assert!(err.to_string().contains("Failed to deserialize"));
}
