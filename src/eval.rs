use serde::ser::{Serialize, Serializer};

use crate::program::{NodeKind, ProgramNode};
use crate::scene::{Color, Material, Scene, Shape, Size};

/// The output of one program node. `Invalid` is the designated marker for
/// semantically broken intermediate states (e.g. `unique` over a set that is
/// not a singleton) and propagates through every dependent node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    ObjectSet(Vec<usize>),
    Object(usize),
    Int(i64),
    Bool(bool),
    Size(Size),
    Color(Color),
    Material(Material),
    Shape(Shape),
    Invalid,
}

impl Output {
    pub fn is_invalid(&self) -> bool {
        matches!(self, Output::Invalid)
    }

    pub fn as_object_set(&self) -> Option<&[usize]> {
        match self {
            Output::ObjectSet(ids) => Some(ids),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<usize> {
        match self {
            Output::Object(id) => Some(*id),
            _ => None,
        }
    }

    /// Scalar answers are the only outputs a complete program may end in.
    pub fn as_answer(&self) -> Option<Answer> {
        match self {
            Output::Int(v) => Some(Answer::Int(*v)),
            Output::Bool(v) => Some(Answer::Bool(*v)),
            Output::Size(v) => Some(Answer::Size(*v)),
            Output::Color(v) => Some(Answer::Color(*v)),
            Output::Material(v) => Some(Answer::Material(*v)),
            Output::Shape(v) => Some(Answer::Shape(*v)),
            _ => None,
        }
    }
}

/// A final answer value, usable as a counting key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Answer {
    Bool(bool),
    Int(i64),
    Size(Size),
    Color(Color),
    Material(Material),
    Shape(Shape),
}

impl Answer {
    pub fn as_display(&self) -> String {
        match self {
            Answer::Bool(v) => v.to_string(),
            Answer::Int(v) => v.to_string(),
            Answer::Size(v) => v.as_str().to_string(),
            Answer::Color(v) => v.as_str().to_string(),
            Answer::Material(v) => v.as_str().to_string(),
            Answer::Shape(v) => v.as_str().to_string(),
        }
    }
}

impl Serialize for Answer {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Answer::Bool(v) => serializer.serialize_bool(*v),
            Answer::Int(v) => serializer.serialize_i64(*v),
            Answer::Size(v) => serializer.serialize_str(v.as_str()),
            Answer::Color(v) => serializer.serialize_str(v.as_str()),
            Answer::Material(v) => serializer.serialize_str(v.as_str()),
            Answer::Shape(v) => serializer.serialize_str(v.as_str()),
        }
    }
}

fn sorted(mut ids: Vec<usize>) -> Vec<usize> {
    ids.sort_unstable();
    ids.dedup();
    ids
}

fn filter_by<F: Fn(usize) -> bool>(ids: &[usize], pred: F) -> Vec<usize> {
    ids.iter().copied().filter(|&id| pred(id)).collect()
}

fn eval_node(node: &ProgramNode, outputs: &[Output], scene: &Scene) -> Output {
    if node.inputs.iter().any(|&i| outputs[i].is_invalid()) {
        return Output::Invalid;
    }
    let set = |slot: usize| outputs[node.inputs[slot]].as_object_set();
    let object = |slot: usize| outputs[node.inputs[slot]].as_object();

    match &node.kind {
        NodeKind::Scene => Output::ObjectSet((0..scene.objects.len()).collect()),
        NodeKind::FilterSize(v) => match set(0) {
            Some(ids) => Output::ObjectSet(filter_by(ids, |id| scene.objects[id].size == *v)),
            None => Output::Invalid,
        },
        NodeKind::FilterColor(v) => match set(0) {
            Some(ids) => Output::ObjectSet(filter_by(ids, |id| scene.objects[id].color == *v)),
            None => Output::Invalid,
        },
        NodeKind::FilterMaterial(v) => match set(0) {
            Some(ids) => Output::ObjectSet(filter_by(ids, |id| scene.objects[id].material == *v)),
            None => Output::Invalid,
        },
        NodeKind::FilterShape(v) => match set(0) {
            Some(ids) => Output::ObjectSet(filter_by(ids, |id| scene.objects[id].shape == *v)),
            None => Output::Invalid,
        },
        NodeKind::Unique => match set(0) {
            Some([id]) => Output::Object(*id),
            _ => Output::Invalid,
        },
        NodeKind::Relate(r) => match object(0) {
            Some(id) => Output::ObjectSet(sorted(scene.related(*r, id).to_vec())),
            None => Output::Invalid,
        },
        NodeKind::SameSize => match object(0) {
            Some(id) => Output::ObjectSet(
                (0..scene.objects.len())
                    .filter(|&o| o != id && scene.objects[o].size == scene.objects[id].size)
                    .collect(),
            ),
            None => Output::Invalid,
        },
        NodeKind::SameColor => match object(0) {
            Some(id) => Output::ObjectSet(
                (0..scene.objects.len())
                    .filter(|&o| o != id && scene.objects[o].color == scene.objects[id].color)
                    .collect(),
            ),
            None => Output::Invalid,
        },
        NodeKind::SameMaterial => match object(0) {
            Some(id) => Output::ObjectSet(
                (0..scene.objects.len())
                    .filter(|&o| o != id && scene.objects[o].material == scene.objects[id].material)
                    .collect(),
            ),
            None => Output::Invalid,
        },
        NodeKind::SameShape => match object(0) {
            Some(id) => Output::ObjectSet(
                (0..scene.objects.len())
                    .filter(|&o| o != id && scene.objects[o].shape == scene.objects[id].shape)
                    .collect(),
            ),
            None => Output::Invalid,
        },
        NodeKind::Count => match set(0) {
            Some(ids) => Output::Int(ids.len() as i64),
            None => Output::Invalid,
        },
        NodeKind::Exist => match set(0) {
            Some(ids) => Output::Bool(!ids.is_empty()),
            None => Output::Invalid,
        },
        NodeKind::QuerySize => match object(0) {
            Some(id) => Output::Size(scene.objects[id].size),
            None => Output::Invalid,
        },
        NodeKind::QueryColor => match object(0) {
            Some(id) => Output::Color(scene.objects[id].color),
            None => Output::Invalid,
        },
        NodeKind::QueryMaterial => match object(0) {
            Some(id) => Output::Material(scene.objects[id].material),
            None => Output::Invalid,
        },
        NodeKind::QueryShape => match object(0) {
            Some(id) => Output::Shape(scene.objects[id].shape),
            None => Output::Invalid,
        },
        NodeKind::Intersect => match (set(0), set(1)) {
            (Some(a), Some(b)) => Output::ObjectSet(filter_by(a, |id| b.contains(&id))),
            _ => Output::Invalid,
        },
        NodeKind::Union => match (set(0), set(1)) {
            (Some(a), Some(b)) => {
                let mut ids = a.to_vec();
                ids.extend_from_slice(b);
                Output::ObjectSet(sorted(ids))
            }
            _ => Output::Invalid,
        },
        NodeKind::EqualInteger => int_cmp(node, outputs, |a, b| a == b),
        NodeKind::LessThan => int_cmp(node, outputs, |a, b| a < b),
        NodeKind::GreaterThan => int_cmp(node, outputs, |a, b| a > b),
        NodeKind::EqualSize
        | NodeKind::EqualColor
        | NodeKind::EqualMaterial
        | NodeKind::EqualShape => {
            let (a, b) = (&outputs[node.inputs[0]], &outputs[node.inputs[1]]);
            match (a, b) {
                (Output::Size(x), Output::Size(y)) => Output::Bool(x == y),
                (Output::Color(x), Output::Color(y)) => Output::Bool(x == y),
                (Output::Material(x), Output::Material(y)) => Output::Bool(x == y),
                (Output::Shape(x), Output::Shape(y)) => Output::Bool(x == y),
                _ => Output::Invalid,
            }
        }
    }
}

fn int_cmp(node: &ProgramNode, outputs: &[Output], cmp: fn(i64, i64) -> bool) -> Output {
    match (&outputs[node.inputs[0]], &outputs[node.inputs[1]]) {
        (Output::Int(a), Output::Int(b)) => Output::Bool(cmp(*a, *b)),
        _ => Output::Invalid,
    }
}

/// Execute a node sequence against a scene, returning every node's output in
/// sequence order. The last entry is the program's answer.
pub fn evaluate(nodes: &[ProgramNode], scene: &Scene) -> Vec<Output> {
    let mut outputs: Vec<Output> = Vec::with_capacity(nodes.len());
    for node in nodes {
        let out = eval_node(node, &outputs, scene);
        outputs.push(out);
    }
    outputs
}

pub fn final_answer(nodes: &[ProgramNode], scene: &Scene) -> Output {
    evaluate(nodes, scene).pop().unwrap_or(Output::Invalid)
}

/// A program with a bare `relate` is degenerate when dropping the relational
/// restriction (replacing the node with `scene`) leaves the answer unchanged:
/// the question then has more than one valid reading.
pub fn is_degenerate(nodes: &[ProgramNode], scene: &Scene, answer: &Output) -> bool {
    for (idx, node) in nodes.iter().enumerate() {
        if !matches!(node.kind, NodeKind::Relate(_)) {
            continue;
        }
        let mut relaxed = nodes.to_vec();
        relaxed[idx] = ProgramNode::new(NodeKind::Scene, vec![]);
        if final_answer(&relaxed, scene) == *answer {
            return true;
        }
    }
    false
}
