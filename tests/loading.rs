use std::fs;

use quesynth::error::QuesynthError;
use quesynth::program::{NodeKind, ProgramNode};
use quesynth::scene::{load_scenes, Color, Shape};
use quesynth::template::{parse_templates, Constraint};

const VALID_TEMPLATE: &str = r#"[{
    "text": ["What color is the <Z> <M> <S>?"],
    "nodes": [
        {"type": "scene", "inputs": []},
        {"type": "filter_unique", "inputs": [0], "side_inputs": ["<Z>", "<C>", "<M>", "<S>"]},
        {"type": "query_color", "inputs": [1]}
    ],
    "params": [
        {"type": "Size", "name": "<Z>"},
        {"type": "Color", "name": "<C>"},
        {"type": "Material", "name": "<M>"},
        {"type": "Shape", "name": "<S>"}
    ],
    "constraints": [{"type": "NULL", "params": ["<C>"]}]
}]"#;

#[test]
fn well_formed_templates_parse() {
    let templates = parse_templates(VALID_TEMPLATE).expect("template should load");
    assert_eq!(templates.len(), 1);
    let t = &templates[0];
    assert_eq!(t.nodes.len(), 3);
    assert_eq!(t.params.len(), 4);
    assert_eq!(t.constraints, vec![Constraint::Null("<C>".to_string())]);
}

#[test]
fn unrecognized_constraint_type_is_fatal() {
    let json = VALID_TEMPLATE.replace("\"NULL\"", "\"MAYBE\"");
    let err = parse_templates(&json).unwrap_err();
    assert!(matches!(err, QuesynthError::Template(_)));
    assert!(err.to_string().contains("unrecognized constraint"));
}

#[test]
fn unrecognized_node_type_is_fatal() {
    let json = VALID_TEMPLATE.replace("\"query_color\"", "\"query_weight\"");
    let err = parse_templates(&json).unwrap_err();
    assert!(err.to_string().contains("unrecognized node type"));
}

#[test]
fn wrong_side_input_arity_is_fatal() {
    let json = r#"[{
        "text": ["Things <R> the thing?"],
        "nodes": [
            {"type": "scene", "inputs": []},
            {"type": "unique", "inputs": [0]},
            {"type": "relate", "inputs": [1], "side_inputs": ["<R>", "<R2>"]},
            {"type": "count", "inputs": [2]}
        ],
        "params": [
            {"type": "Relation", "name": "<R>"},
            {"type": "Relation", "name": "<R2>"}
        ],
        "constraints": []
    }]"#;
    let err = parse_templates(json).unwrap_err();
    assert!(err.to_string().contains("exactly one side input"));
}

#[test]
fn forward_node_references_are_fatal() {
    let json = VALID_TEMPLATE.replace(
        r#"{"type": "query_color", "inputs": [1]}"#,
        r#"{"type": "query_color", "inputs": [2]}"#,
    );
    let err = parse_templates(&json).unwrap_err();
    assert!(err.to_string().contains("at or after itself"));
}

#[test]
fn neq_constraints_must_compare_like_types() {
    let json = VALID_TEMPLATE.replace(
        r#"{"type": "NULL", "params": ["<C>"]}"#,
        r#"{"type": "NEQ", "params": ["<Z>", "<C>"]}"#,
    );
    let err = parse_templates(&json).unwrap_err();
    assert!(err.to_string().contains("differ in type"));
}

const SCENE_FILE: &str = r#"{
    "info": {"split": "new", "dataset": "CLEVR-v1.0"},
    "scenes": [
        {
            "image_index": 0,
            "image_filename": "CLEVR_new_000000.png",
            "objects": [
                {"size": "large", "color": "red", "material": "metal", "shape": "cube", "3d_coords": [0.0, 0.0, 0.0]},
                {"size": "small", "color": "blue", "material": "rubber", "shape": "sphere", "3d_coords": [1.0, 1.0, 0.0]}
            ],
            "relationships": {
                "left": [[], [0]],
                "right": [[1], []],
                "front": [[1], []],
                "behind": [[], [0]]
            }
        }
    ]
}"#;

#[test]
fn scene_files_load_with_the_supported_dataset() {
    let path = std::env::temp_dir().join("quesynth_scenes_ok.json");
    fs::write(&path, SCENE_FILE).expect("temp file is writable");
    let scene_file = load_scenes(&path).expect("scene file should load");
    assert_eq!(scene_file.scenes.len(), 1);
    let scene = &scene_file.scenes[0];
    assert_eq!(scene.objects.len(), 2);
    assert_eq!(scene.objects[0].color, Color::Red);
    assert_eq!(scene.objects[1].shape, Shape::Sphere);
    assert_eq!(scene.related(quesynth::scene::Relation::Left, 1), &[0]);
}

#[test]
fn unrecognized_datasets_are_fatal_at_startup() {
    let path = std::env::temp_dir().join("quesynth_scenes_bad.json");
    fs::write(&path, SCENE_FILE.replace("CLEVR-v1.0", "CLEVR-v2.0")).expect("temp file is writable");
    let err = load_scenes(&path).unwrap_err();
    assert!(matches!(err, QuesynthError::Dataset(d) if d == "CLEVR-v2.0"));
}

#[test]
fn programs_serialize_with_side_inputs() {
    let node = ProgramNode::new(NodeKind::FilterColor(Color::Red), vec![3]);
    let json = serde_json::to_value(&node).expect("serializable node");
    assert_eq!(json["type"], "filter_color");
    assert_eq!(json["inputs"][0], 3);
    assert_eq!(json["side_inputs"][0], "red");

    let plain = ProgramNode::new(NodeKind::Count, vec![1]);
    let json = serde_json::to_value(&plain).expect("serializable node");
    assert!(json.get("side_inputs").is_none());
}
