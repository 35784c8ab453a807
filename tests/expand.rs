use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::SeedableRng;

use quesynth::eval::{self, Answer, Output};
use quesynth::index::{relate_filter_options, FilterIndex, RelateFilterConfig};
use quesynth::program::{NodeKind, ProgramNode};
use quesynth::realize::{other_heuristic, realize, resolve_optionals, Synonyms};
use quesynth::scene::{Color, Material, Object, Relation, Scene, SceneFile, SceneInfo, Shape, Size};
use quesynth::search::{answer_counts_for, SearchConfig, TemplateDfs};
use quesynth::session::{generate, SessionConfig};
use quesynth::template::{parse_templates, SlotValue, Template};

pub const SEED: u64 = 7;

fn obj(size: Size, color: Color, material: Material, shape: Shape, x: f64, y: f64) -> Object {
    Object {
        size,
        color,
        material,
        shape,
        coords: [x, y, 0.0],
    }
}

/// Build relationship lists from coordinates: left/right order on x,
/// front/behind order on y.
fn scene_from(objects: Vec<Object>) -> Scene {
    let n = objects.len();
    let by = |cmp: &dyn Fn(&Object, &Object) -> bool| -> Vec<Vec<usize>> {
        (0..n)
            .map(|i| (0..n).filter(|&j| cmp(&objects[j], &objects[i])).collect())
            .collect()
    };
    let mut relationships = BTreeMap::new();
    relationships.insert(Relation::Left, by(&|b, a| b.coords[0] < a.coords[0]));
    relationships.insert(Relation::Right, by(&|b, a| b.coords[0] > a.coords[0]));
    relationships.insert(Relation::Behind, by(&|b, a| b.coords[1] < a.coords[1]));
    relationships.insert(Relation::Front, by(&|b, a| b.coords[1] > a.coords[1]));
    Scene {
        image_index: 0,
        image_filename: "CLEVR_new_000000.png".to_string(),
        objects,
        relationships,
    }
}

fn three_object_scene() -> Scene {
    scene_from(vec![
        obj(Size::Large, Color::Red, Material::Metal, Shape::Cube, 0.0, 0.0),
        obj(Size::Small, Color::Blue, Material::Rubber, Shape::Sphere, 1.0, 1.0),
        obj(Size::Large, Color::Green, Material::Rubber, Shape::Cylinder, 2.0, 0.0),
    ])
}

fn query_color_template() -> Template {
    let json = r#"[{
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
    parse_templates(json).expect("valid template").remove(0)
}

fn compare_size_template() -> Template {
    let json = r#"[{
        "text": ["Is the <Z> <C> <M> <S> the same size as the other <Z2> <C2> <M2> <S2>?"],
        "nodes": [
            {"type": "scene", "inputs": []},
            {"type": "filter_unique", "inputs": [0], "side_inputs": ["<Z>", "<C>", "<M>", "<S>"]},
            {"type": "query_size", "inputs": [1]},
            {"type": "scene", "inputs": []},
            {"type": "filter_unique", "inputs": [3], "side_inputs": ["<Z2>", "<C2>", "<M2>", "<S2>"]},
            {"type": "query_size", "inputs": [4]},
            {"type": "equal_size", "inputs": [2, 5]}
        ],
        "params": [
            {"type": "Size", "name": "<Z>"},
            {"type": "Color", "name": "<C>"},
            {"type": "Material", "name": "<M>"},
            {"type": "Shape", "name": "<S>"},
            {"type": "Size", "name": "<Z2>"},
            {"type": "Color", "name": "<C2>"},
            {"type": "Material", "name": "<M2>"},
            {"type": "Shape", "name": "<S2>"}
        ],
        "constraints": [{"type": "OUT_NEQ", "params": [1, 4]}]
    }]"#;
    parse_templates(json).expect("valid template").remove(0)
}

fn relate_count_template() -> Template {
    let json = r#"[{
        "text": ["How many <Z2> <C2> <M2> <S2>s are <R> the <Z> <C> <M> <S>?"],
        "nodes": [
            {"type": "scene", "inputs": []},
            {"type": "filter_unique", "inputs": [0], "side_inputs": ["<Z>", "<C>", "<M>", "<S>"]},
            {"type": "relate_filter_count", "inputs": [1], "side_inputs": ["<R>", "<Z2>", "<C2>", "<M2>", "<S2>"]}
        ],
        "params": [
            {"type": "Size", "name": "<Z>"},
            {"type": "Color", "name": "<C>"},
            {"type": "Material", "name": "<M>"},
            {"type": "Shape", "name": "<S>"},
            {"type": "Relation", "name": "<R>"},
            {"type": "Size", "name": "<Z2>"},
            {"type": "Color", "name": "<C2>"},
            {"type": "Material", "name": "<M2>"},
            {"type": "Shape", "name": "<S2>"}
        ],
        "constraints": []
    }]"#;
    parse_templates(json).expect("valid template").remove(0)
}

fn run_template(template: &Template, scene: &Scene, max_instances: usize, seed: u64) -> Vec<quesynth::search::Instantiation> {
    let index = FilterIndex::build(scene);
    let cfg = SearchConfig {
        max_instances,
        ..SearchConfig::default()
    };
    let mut counts = answer_counts_for(template);
    let mut rng = StdRng::seed_from_u64(seed);
    TemplateDfs::new(scene, &index, template, &cfg, &mut counts, &mut rng).run()
}

#[test]
fn search_is_deterministic_under_fixed_seed() {
    let scene = three_object_scene();
    let template = query_color_template();
    let first = run_template(&template, &scene, 5, SEED);
    let second = run_template(&template, &scene, 5, SEED);
    assert!(!first.is_empty());
    assert_eq!(first, second);

    let synonyms = Synonyms::new();
    let mut rng_a = StdRng::seed_from_u64(SEED);
    let mut rng_b = StdRng::seed_from_u64(SEED);
    for inst in &first {
        let a = realize(&template.text, &inst.vals, &synonyms, &mut rng_a);
        let b = realize(&template.text, &inst.vals, &synonyms, &mut rng_b);
        assert_eq!(a, b);
    }
}

#[test]
fn accepted_programs_evaluate_to_their_answer() {
    let scene = three_object_scene();
    for template in [query_color_template(), relate_count_template()] {
        let accepted = run_template(&template, &scene, 10, SEED);
        assert!(!accepted.is_empty());
        for inst in accepted {
            let answer = eval::final_answer(&inst.nodes, &scene);
            assert_eq!(answer.as_answer(), Some(inst.answer));
        }
    }
}

#[test]
fn null_constraint_holds_on_accepted_states() {
    let scene = three_object_scene();
    let template = query_color_template();
    let accepted = run_template(&template, &scene, 10, SEED);
    assert!(!accepted.is_empty());
    for inst in accepted {
        let color = inst.vals.get("<C>").expect("color slot is always bound");
        assert!(color.is_null(), "NULL constraint violated: {color:?}");
    }
}

#[test]
fn out_neq_constraint_holds_on_accepted_states() {
    let scene = three_object_scene();
    let template = compare_size_template();
    let accepted = run_template(&template, &scene, 10, SEED);
    assert!(!accepted.is_empty());
    for inst in accepted {
        let outputs = eval::evaluate(&inst.nodes, &scene);
        let uniques: Vec<&Output> = inst
            .nodes
            .iter()
            .zip(&outputs)
            .filter(|(n, _)| n.kind == NodeKind::Unique)
            .map(|(_, o)| o)
            .collect();
        assert_eq!(uniques.len(), 2);
        assert_ne!(uniques[0], uniques[1], "both referents resolve to one object");
    }
}

#[test]
fn acceptance_cap_is_respected() {
    let scene = three_object_scene();
    let template = query_color_template();
    let accepted = run_template(&template, &scene, 2, SEED);
    assert_eq!(accepted.len(), 2);
}

#[test]
fn overrepresented_answers_are_rejected() {
    let scene = three_object_scene();
    let template = query_color_template();
    let index = FilterIndex::build(&scene);
    let cfg = SearchConfig {
        max_instances: 10,
        ..SearchConfig::default()
    };
    let mut counts = answer_counts_for(&template);
    counts.insert(Answer::Color(Color::Red), 26);
    let mut rng = StdRng::seed_from_u64(SEED);
    let accepted = TemplateDfs::new(&scene, &index, &template, &cfg, &mut counts, &mut rng).run();
    assert!(!accepted.is_empty());
    for inst in &accepted {
        assert_ne!(inst.answer, Answer::Color(Color::Red));
    }
    // accepted answers were counted
    let total: usize = counts.values().sum();
    assert_eq!(total, 26 + accepted.len());
}

#[test]
fn trivial_fraction_matches_configured_rate() {
    // anchor 0 sits left of everything, so keys matching only the other
    // three objects are trivial for the "right" relation
    let scene = scene_from(vec![
        obj(Size::Large, Color::Gray, Material::Metal, Shape::Cube, 0.0, 0.0),
        obj(Size::Small, Color::Red, Material::Rubber, Shape::Sphere, 1.0, 0.0),
        obj(Size::Small, Color::Blue, Material::Rubber, Shape::Cube, 2.0, 0.0),
        obj(Size::Large, Color::Green, Material::Metal, Shape::Cylinder, 3.0, 0.0),
    ]);
    let index = FilterIndex::build(&scene);
    let options_at = |frac: f64, seed: u64| {
        let cfg = RelateFilterConfig {
            require_unique: false,
            include_empty: false,
            trivial_frac: frac,
        };
        let mut rng = StdRng::seed_from_u64(seed);
        relate_filter_options(&scene, &index, 0, &cfg, &mut rng).len()
    };

    let nontrivial = options_at(0.0, SEED);
    let trivial_total = options_at(1.0, SEED) - nontrivial;
    assert!(nontrivial > 0);
    assert!(trivial_total > 0);

    let f = 0.5;
    let expected = ((nontrivial as f64) * f / (1.0 - f)).round() as usize;
    let expected = expected.min(trivial_total);
    assert_eq!(options_at(f, SEED), nontrivial + expected);
}

#[test]
fn index_entries_agree_with_key_predicates() {
    let scene = three_object_scene();
    let index = FilterIndex::build(&scene);
    for (key, ids) in index.keys() {
        for (id, object) in scene.objects.iter().enumerate() {
            assert_eq!(
                key.matches(object),
                ids.contains(&id),
                "index disagrees with {key:?} on object {id}"
            );
        }
    }
    let everything = index
        .matching(&quesynth::scene::FilterKey::default())
        .expect("wildcard key is always present");
    assert_eq!(everything.len(), scene.objects.len());
}

#[test]
fn unique_relate_options_select_single_objects() {
    let scene = three_object_scene();
    let index = FilterIndex::build(&scene);
    let cfg = RelateFilterConfig {
        require_unique: true,
        include_empty: false,
        trivial_frac: 0.1,
    };
    let mut rng = StdRng::seed_from_u64(SEED);
    let options = relate_filter_options(&scene, &index, 1, &cfg, &mut rng);
    assert!(!options.is_empty());
    for (_, ids) in options {
        assert_eq!(ids.len(), 1);
    }
}

#[test]
fn resolve_optionals_is_identity_without_brackets() {
    let mut rng = StdRng::seed_from_u64(SEED);
    let text = "What color is the big sphere?";
    assert_eq!(resolve_optionals(text, &mut rng), text);
}

#[test]
fn resolve_optionals_keeps_or_drops_each_span() {
    let mut rng = StdRng::seed_from_u64(SEED);
    for _ in 0..32 {
        let resolved = resolve_optionals("A [aa] B [bb]", &mut rng);
        assert!(
            ["A aa B bb", "A  B bb", "A aa B ", "A  B "].contains(&resolved.as_str()),
            "unexpected resolution {resolved:?}"
        );
    }
}

fn comparison_vals(second_color: Color) -> BTreeMap<String, SlotValue> {
    let mut vals = BTreeMap::new();
    vals.insert("<Z>".to_string(), SlotValue::Size(Size::Large));
    vals.insert("<C>".to_string(), SlotValue::Color(Color::Red));
    vals.insert("<M>".to_string(), SlotValue::Material(Material::Metal));
    vals.insert("<S>".to_string(), SlotValue::Shape(Shape::Cube));
    vals.insert("<Z2>".to_string(), SlotValue::Size(Size::Large));
    vals.insert("<C2>".to_string(), SlotValue::Color(second_color));
    vals.insert("<M2>".to_string(), SlotValue::Material(Material::Metal));
    vals.insert("<S2>".to_string(), SlotValue::Shape(Shape::Cube));
    vals
}

#[test]
fn other_is_stripped_when_referents_are_distinguishable() {
    let text = "Is there another cube that is the same size as the other thing?".to_string();
    let out = other_heuristic(text, &comparison_vals(Color::Blue));
    assert!(!out.contains(" other "));
    assert!(!out.contains(" another "));
    assert!(out.contains(" a cube"));
}

#[test]
fn other_is_kept_when_referents_match() {
    let text = "Is there another cube that is the same size as the other thing?".to_string();
    let out = other_heuristic(text.clone(), &comparison_vals(Color::Red));
    assert_eq!(out, text);
}

#[test]
fn unique_over_non_singleton_set_is_invalid() {
    let scene = three_object_scene();
    let nodes = vec![
        ProgramNode::new(NodeKind::Scene, vec![]),
        ProgramNode::new(NodeKind::Unique, vec![0]),
        ProgramNode::new(NodeKind::QueryColor, vec![1]),
    ];
    let outputs = eval::evaluate(&nodes, &scene);
    assert!(outputs[1].is_invalid());
    assert!(outputs[2].is_invalid(), "invalid marker must propagate");
}

#[test]
fn degenerate_relational_programs_are_detected() {
    let relate_program = |rel: Relation| {
        vec![
            ProgramNode::new(NodeKind::Scene, vec![]),
            ProgramNode::new(NodeKind::FilterColor(Color::Blue), vec![0]),
            ProgramNode::new(NodeKind::Unique, vec![1]),
            ProgramNode::new(NodeKind::Relate(rel), vec![2]),
            ProgramNode::new(NodeKind::FilterShape(Shape::Cube), vec![3]),
            ProgramNode::new(NodeKind::Unique, vec![4]),
            ProgramNode::new(NodeKind::QueryColor, vec![5]),
        ]
    };

    // one cube in the whole scene: "the cube left of the sphere" reads the
    // same with or without the relation
    let ambiguous = scene_from(vec![
        obj(Size::Large, Color::Red, Material::Metal, Shape::Cube, 0.0, 0.0),
        obj(Size::Small, Color::Blue, Material::Rubber, Shape::Sphere, 1.0, 1.0),
    ]);
    let nodes = relate_program(Relation::Left);
    let answer = eval::final_answer(&nodes, &ambiguous);
    assert_eq!(answer, Output::Color(Color::Red));
    assert!(eval::is_degenerate(&nodes, &ambiguous, &answer));

    // a second cube on the other side makes the relation load-bearing
    let grounded = scene_from(vec![
        obj(Size::Large, Color::Red, Material::Metal, Shape::Cube, 0.0, 0.0),
        obj(Size::Small, Color::Blue, Material::Rubber, Shape::Sphere, 1.0, 1.0),
        obj(Size::Large, Color::Green, Material::Rubber, Shape::Cube, 2.0, 0.0),
    ]);
    let nodes = relate_program(Relation::Left);
    let answer = eval::final_answer(&nodes, &grounded);
    assert_eq!(answer, Output::Color(Color::Red));
    assert!(!eval::is_degenerate(&nodes, &grounded, &answer));
}

#[test]
fn generate_assembles_sequential_records() {
    let scene_file = SceneFile {
        info: SceneInfo {
            split: Some("new".to_string()),
            dataset: None,
        },
        scenes: vec![three_object_scene()],
    };
    let mut templates = BTreeMap::new();
    templates.insert(("one_hop".to_string(), 0), query_color_template());
    let synonyms = Synonyms::new();
    let cfg = SessionConfig {
        instances_per_template: 3,
        ..SessionConfig::default()
    };
    let mut rng = StdRng::seed_from_u64(SEED);
    let out = generate(&scene_file, &templates, &synonyms, &cfg, &mut rng);

    assert!(!out.questions.is_empty());
    for (i, q) in out.questions.iter().enumerate() {
        assert_eq!(q.question_index, i);
        assert_eq!(q.image, "CLEVR_new_000000");
        assert_eq!(q.split.as_deref(), Some("new"));
        assert!(!q.program.is_empty());
        assert!(!q.question.is_empty());
    }

    let json = serde_json::to_value(&out.questions[0]).expect("serializable record");
    assert_eq!(json["program"][0]["type"], "scene");
    assert!(json["answer"].is_string());
}
