use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{QuesynthError, Result};
use crate::eval::Answer;
use crate::program::{NodeKind, OutputType};
use crate::scene::{Color, Material, Relation, Shape, Size};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParamType {
    Size,
    Color,
    Material,
    Shape,
    Relation,
}

impl ParamType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "Size" => Some(ParamType::Size),
            "Color" => Some(ParamType::Color),
            "Material" => Some(ParamType::Material),
            "Shape" => Some(ParamType::Shape),
            "Relation" => Some(ParamType::Relation),
            _ => None,
        }
    }

    /// The textual sentinel an unbound parameter of this type realizes to.
    pub fn null_phrase(&self) -> &'static str {
        match self {
            ParamType::Shape => "thing",
            _ => "",
        }
    }
}

/// A value bound to a template parameter during instantiation. `Null` is the
/// wildcard binding a filter key's empty slot produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlotValue {
    Size(Size),
    Color(Color),
    Material(Material),
    Shape(Shape),
    Relation(Relation),
    Null(ParamType),
}

impl SlotValue {
    pub fn phrase(&self) -> &'static str {
        match self {
            SlotValue::Size(v) => v.as_str(),
            SlotValue::Color(v) => v.as_str(),
            SlotValue::Material(v) => v.as_str(),
            SlotValue::Shape(v) => v.as_str(),
            SlotValue::Relation(v) => v.as_str(),
            SlotValue::Null(ty) => ty.null_phrase(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SlotValue::Null(_))
    }

    /// All concrete values a parameter of the given type ranges over.
    pub fn domain(ty: ParamType) -> Vec<SlotValue> {
        match ty {
            ParamType::Size => Size::ALL.iter().map(|&v| SlotValue::Size(v)).collect(),
            ParamType::Color => Color::ALL.iter().map(|&v| SlotValue::Color(v)).collect(),
            ParamType::Material => Material::ALL.iter().map(|&v| SlotValue::Material(v)).collect(),
            ParamType::Shape => Shape::ALL.iter().map(|&v| SlotValue::Shape(v)).collect(),
            ParamType::Relation => Relation::ALL.iter().map(|&v| SlotValue::Relation(v)).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: ParamType,
}

/// Declarative restrictions over parameter bindings and node outputs.
///
/// `Neq` prunes a state once both parameters are bound to different values;
/// `Null` prunes once the parameter is bound to anything but its sentinel;
/// `OutNeq` prunes once both referenced template nodes are materialized with
/// equal outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    Neq(String, String),
    Null(String),
    OutNeq(usize, usize),
}

/// Template nodes that expand into several concrete nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeKind {
    Filter,
    FilterUnique,
    FilterCount,
    FilterExist,
    RelateFilter,
    RelateFilterUnique,
    RelateFilterCount,
    RelateFilterExist,
}

impl CompositeKind {
    pub fn is_relate(&self) -> bool {
        matches!(
            self,
            CompositeKind::RelateFilter
                | CompositeKind::RelateFilterUnique
                | CompositeKind::RelateFilterCount
                | CompositeKind::RelateFilterExist
        )
    }

    /// The concrete node appended after the filter chain, if any.
    pub fn trailing(&self) -> Option<NodeKind> {
        match self {
            CompositeKind::FilterUnique | CompositeKind::RelateFilterUnique => Some(NodeKind::Unique),
            CompositeKind::FilterCount | CompositeKind::RelateFilterCount => Some(NodeKind::Count),
            CompositeKind::FilterExist | CompositeKind::RelateFilterExist => Some(NodeKind::Exist),
            CompositeKind::Filter | CompositeKind::RelateFilter => None,
        }
    }

    pub fn output_type(&self) -> OutputType {
        match self.trailing() {
            Some(kind) => kind.output_type(),
            None => OutputType::ObjectSet,
        }
    }
}

/// Template nodes that map to exactly one concrete node, either plain or
/// carrying a single value parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveOp {
    Scene,
    Unique,
    Count,
    Exist,
    Relate,
    FilterSize,
    FilterColor,
    FilterMaterial,
    FilterShape,
    SameSize,
    SameColor,
    SameMaterial,
    SameShape,
    QuerySize,
    QueryColor,
    QueryMaterial,
    QueryShape,
    Intersect,
    Union,
    EqualInteger,
    LessThan,
    GreaterThan,
    EqualSize,
    EqualColor,
    EqualMaterial,
    EqualShape,
}

impl PrimitiveOp {
    /// `Some` for ops that take one value parameter, with its type.
    pub fn param_type(&self) -> Option<ParamType> {
        match self {
            PrimitiveOp::Relate => Some(ParamType::Relation),
            PrimitiveOp::FilterSize => Some(ParamType::Size),
            PrimitiveOp::FilterColor => Some(ParamType::Color),
            PrimitiveOp::FilterMaterial => Some(ParamType::Material),
            PrimitiveOp::FilterShape => Some(ParamType::Shape),
            _ => None,
        }
    }

    /// Concrete node kind for a parameterless op.
    pub fn plain_kind(&self) -> Option<NodeKind> {
        match self {
            PrimitiveOp::Scene => Some(NodeKind::Scene),
            PrimitiveOp::Unique => Some(NodeKind::Unique),
            PrimitiveOp::Count => Some(NodeKind::Count),
            PrimitiveOp::Exist => Some(NodeKind::Exist),
            PrimitiveOp::SameSize => Some(NodeKind::SameSize),
            PrimitiveOp::SameColor => Some(NodeKind::SameColor),
            PrimitiveOp::SameMaterial => Some(NodeKind::SameMaterial),
            PrimitiveOp::SameShape => Some(NodeKind::SameShape),
            PrimitiveOp::QuerySize => Some(NodeKind::QuerySize),
            PrimitiveOp::QueryColor => Some(NodeKind::QueryColor),
            PrimitiveOp::QueryMaterial => Some(NodeKind::QueryMaterial),
            PrimitiveOp::QueryShape => Some(NodeKind::QueryShape),
            PrimitiveOp::Intersect => Some(NodeKind::Intersect),
            PrimitiveOp::Union => Some(NodeKind::Union),
            PrimitiveOp::EqualInteger => Some(NodeKind::EqualInteger),
            PrimitiveOp::LessThan => Some(NodeKind::LessThan),
            PrimitiveOp::GreaterThan => Some(NodeKind::GreaterThan),
            PrimitiveOp::EqualSize => Some(NodeKind::EqualSize),
            PrimitiveOp::EqualColor => Some(NodeKind::EqualColor),
            PrimitiveOp::EqualMaterial => Some(NodeKind::EqualMaterial),
            PrimitiveOp::EqualShape => Some(NodeKind::EqualShape),
            PrimitiveOp::Relate
            | PrimitiveOp::FilterSize
            | PrimitiveOp::FilterColor
            | PrimitiveOp::FilterMaterial
            | PrimitiveOp::FilterShape => None,
        }
    }

    /// Concrete node kind for a parametrized op bound to `val`.
    pub fn with_value(&self, val: &SlotValue) -> Option<NodeKind> {
        match (self, val) {
            (PrimitiveOp::Relate, SlotValue::Relation(v)) => Some(NodeKind::Relate(*v)),
            (PrimitiveOp::FilterSize, SlotValue::Size(v)) => Some(NodeKind::FilterSize(*v)),
            (PrimitiveOp::FilterColor, SlotValue::Color(v)) => Some(NodeKind::FilterColor(*v)),
            (PrimitiveOp::FilterMaterial, SlotValue::Material(v)) => Some(NodeKind::FilterMaterial(*v)),
            (PrimitiveOp::FilterShape, SlotValue::Shape(v)) => Some(NodeKind::FilterShape(*v)),
            _ => None,
        }
    }

    pub fn output_type(&self) -> OutputType {
        match self {
            PrimitiveOp::Scene
            | PrimitiveOp::Relate
            | PrimitiveOp::FilterSize
            | PrimitiveOp::FilterColor
            | PrimitiveOp::FilterMaterial
            | PrimitiveOp::FilterShape
            | PrimitiveOp::SameSize
            | PrimitiveOp::SameColor
            | PrimitiveOp::SameMaterial
            | PrimitiveOp::SameShape
            | PrimitiveOp::Intersect
            | PrimitiveOp::Union => OutputType::ObjectSet,
            PrimitiveOp::Unique => OutputType::Object,
            PrimitiveOp::Count => OutputType::Integer,
            PrimitiveOp::Exist
            | PrimitiveOp::EqualInteger
            | PrimitiveOp::LessThan
            | PrimitiveOp::GreaterThan
            | PrimitiveOp::EqualSize
            | PrimitiveOp::EqualColor
            | PrimitiveOp::EqualMaterial
            | PrimitiveOp::EqualShape => OutputType::Bool,
            PrimitiveOp::QuerySize => OutputType::Size,
            PrimitiveOp::QueryColor => OutputType::Color,
            PrimitiveOp::QueryMaterial => OutputType::Material,
            PrimitiveOp::QueryShape => OutputType::Shape,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateNodeKind {
    Composite(CompositeKind),
    Primitive(PrimitiveOp),
}

impl TemplateNodeKind {
    pub fn parse(s: &str) -> Option<Self> {
        use CompositeKind as C;
        use PrimitiveOp as P;
        let kind = match s {
            "filter" => Self::Composite(C::Filter),
            "filter_unique" => Self::Composite(C::FilterUnique),
            "filter_count" => Self::Composite(C::FilterCount),
            "filter_exist" => Self::Composite(C::FilterExist),
            "relate_filter" => Self::Composite(C::RelateFilter),
            "relate_filter_unique" => Self::Composite(C::RelateFilterUnique),
            "relate_filter_count" => Self::Composite(C::RelateFilterCount),
            "relate_filter_exist" => Self::Composite(C::RelateFilterExist),
            "scene" => Self::Primitive(P::Scene),
            "unique" => Self::Primitive(P::Unique),
            "count" => Self::Primitive(P::Count),
            "exist" => Self::Primitive(P::Exist),
            "relate" => Self::Primitive(P::Relate),
            "filter_size" => Self::Primitive(P::FilterSize),
            "filter_color" => Self::Primitive(P::FilterColor),
            "filter_material" => Self::Primitive(P::FilterMaterial),
            "filter_shape" => Self::Primitive(P::FilterShape),
            "same_size" => Self::Primitive(P::SameSize),
            "same_color" => Self::Primitive(P::SameColor),
            "same_material" => Self::Primitive(P::SameMaterial),
            "same_shape" => Self::Primitive(P::SameShape),
            "query_size" => Self::Primitive(P::QuerySize),
            "query_color" => Self::Primitive(P::QueryColor),
            "query_material" => Self::Primitive(P::QueryMaterial),
            "query_shape" => Self::Primitive(P::QueryShape),
            "intersect" => Self::Primitive(P::Intersect),
            "union" => Self::Primitive(P::Union),
            "equal_integer" => Self::Primitive(P::EqualInteger),
            "less_than" => Self::Primitive(P::LessThan),
            "greater_than" => Self::Primitive(P::GreaterThan),
            "equal_size" => Self::Primitive(P::EqualSize),
            "equal_color" => Self::Primitive(P::EqualColor),
            "equal_material" => Self::Primitive(P::EqualMaterial),
            "equal_shape" => Self::Primitive(P::EqualShape),
            _ => return None,
        };
        Some(kind)
    }

    pub fn output_type(&self) -> OutputType {
        match self {
            TemplateNodeKind::Composite(c) => c.output_type(),
            TemplateNodeKind::Primitive(p) => p.output_type(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TemplateNode {
    pub kind: TemplateNodeKind,
    pub inputs: Vec<usize>,
    pub side_inputs: Vec<String>,
}

/// An abstract question blueprint: node sequence, typed parameters,
/// constraints, and one or more text surface forms.
#[derive(Debug, Clone)]
pub struct Template {
    pub text: Vec<String>,
    pub nodes: Vec<TemplateNode>,
    pub params: Vec<Param>,
    pub constraints: Vec<Constraint>,
}

/// Templates are keyed by (file stem, index within file).
pub type TemplateKey = (String, usize);

impl Template {
    pub fn param_type(&self, name: &str) -> Option<ParamType> {
        self.params.iter().find(|p| p.name == name).map(|p| p.ty)
    }

    pub fn final_output_type(&self) -> OutputType {
        // validate() guarantees nodes is non-empty
        self.nodes.last().unwrap().kind.output_type()
    }

    /// Every answer value a completed instantiation can produce. Used to
    /// pre-populate the answer-count table.
    pub fn answer_domain(&self) -> Vec<Answer> {
        match self.final_output_type() {
            OutputType::Bool => vec![Answer::Bool(false), Answer::Bool(true)],
            OutputType::Integer => (0..=10).map(Answer::Int).collect(),
            OutputType::Size => Size::ALL.iter().map(|&v| Answer::Size(v)).collect(),
            OutputType::Color => Color::ALL.iter().map(|&v| Answer::Color(v)).collect(),
            OutputType::Material => Material::ALL.iter().map(|&v| Answer::Material(v)).collect(),
            OutputType::Shape => Shape::ALL.iter().map(|&v| Answer::Shape(v)).collect(),
            OutputType::ObjectSet | OutputType::Object => vec![],
        }
    }

    /// Whether the template carries a bare `relate` node, which forces a
    /// degeneracy check on every completed instantiation.
    pub fn has_bare_relate(&self) -> bool {
        self.nodes
            .iter()
            .any(|n| n.kind == TemplateNodeKind::Primitive(PrimitiveOp::Relate))
    }

    /// Fail-fast structural checks. A template failing any of these is a
    /// broken offline artifact, not a recoverable input.
    pub fn validate(&self) -> Result<()> {
        let err = |msg: String| Err(QuesynthError::Template(msg));

        if self.nodes.is_empty() {
            return err("template has no nodes".into());
        }
        let first = &self.nodes[0];
        match first.kind {
            TemplateNodeKind::Primitive(op) if op.plain_kind().is_some() => {
                if !first.inputs.is_empty() || !first.side_inputs.is_empty() {
                    return err("first node must be a plain source node".into());
                }
            }
            _ => return err("first node must be a plain source node".into()),
        }

        for (idx, node) in self.nodes.iter().enumerate() {
            if node.inputs.iter().any(|&i| i >= idx) {
                return err(format!("node {idx} references a node at or after itself"));
            }
            for name in &node.side_inputs {
                if self.param_type(name).is_none() {
                    return err(format!("node {idx} references undeclared parameter {name}"));
                }
            }
            match node.kind {
                TemplateNodeKind::Composite(kind) => {
                    let expected: &[ParamType] = if kind.is_relate() {
                        &[
                            ParamType::Relation,
                            ParamType::Size,
                            ParamType::Color,
                            ParamType::Material,
                            ParamType::Shape,
                        ]
                    } else {
                        &[ParamType::Size, ParamType::Color, ParamType::Material, ParamType::Shape]
                    };
                    let actual: Vec<_> = node
                        .side_inputs
                        .iter()
                        .filter_map(|n| self.param_type(n))
                        .collect();
                    if actual != expected {
                        return err(format!("node {idx} has the wrong side-input signature"));
                    }
                    if node.inputs.len() != 1 {
                        return err(format!("node {idx} must take exactly one input"));
                    }
                }
                TemplateNodeKind::Primitive(op) => match op.param_type() {
                    Some(ty) => {
                        if node.side_inputs.len() != 1 {
                            return err(format!("node {idx} must take exactly one side input"));
                        }
                        if self.param_type(&node.side_inputs[0]) != Some(ty) {
                            return err(format!("node {idx} side input has the wrong type"));
                        }
                    }
                    None => {
                        if !node.side_inputs.is_empty() {
                            return err(format!("node {idx} takes no side inputs"));
                        }
                    }
                },
            }
        }

        for constraint in &self.constraints {
            match constraint {
                Constraint::Neq(a, b) => {
                    let (ta, tb) = (self.param_type(a), self.param_type(b));
                    if ta.is_none() || tb.is_none() {
                        return err("NEQ constraint references undeclared parameters".into());
                    }
                    if ta != tb {
                        return err("NEQ constraint parameters differ in type".into());
                    }
                }
                Constraint::Null(p) => {
                    if self.param_type(p).is_none() {
                        return err(format!("NULL constraint references undeclared parameter {p}"));
                    }
                }
                Constraint::OutNeq(i, j) => {
                    if *i >= self.nodes.len() || *j >= self.nodes.len() {
                        return err("OUT_NEQ constraint references a node out of range".into());
                    }
                }
            }
        }

        if self.answer_domain().is_empty() {
            return err("final node does not produce a scalar answer".into());
        }
        if self.text.is_empty() {
            return err("template has no text forms".into());
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct RawNode {
    #[serde(rename = "type")]
    ty: String,
    #[serde(default)]
    inputs: Vec<usize>,
    #[serde(default)]
    side_inputs: Vec<String>,
}

#[derive(Deserialize)]
struct RawParam {
    name: String,
    #[serde(rename = "type")]
    ty: String,
}

#[derive(Deserialize)]
struct RawConstraint {
    #[serde(rename = "type")]
    ty: String,
    params: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct RawTemplate {
    text: Vec<String>,
    nodes: Vec<RawNode>,
    #[serde(default)]
    params: Vec<RawParam>,
    #[serde(default)]
    constraints: Vec<RawConstraint>,
}

impl TryFrom<RawTemplate> for Template {
    type Error = QuesynthError;

    fn try_from(raw: RawTemplate) -> Result<Template> {
        let nodes = raw
            .nodes
            .into_iter()
            .map(|n| {
                let kind = TemplateNodeKind::parse(&n.ty)
                    .ok_or_else(|| QuesynthError::Template(format!("unrecognized node type \"{}\"", n.ty)))?;
                Ok(TemplateNode {
                    kind,
                    inputs: n.inputs,
                    side_inputs: n.side_inputs,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let params = raw
            .params
            .into_iter()
            .map(|p| {
                let ty = ParamType::parse(&p.ty)
                    .ok_or_else(|| QuesynthError::Template(format!("unrecognized param type \"{}\"", p.ty)))?;
                Ok(Param { name: p.name, ty })
            })
            .collect::<Result<Vec<_>>>()?;

        let constraints = raw
            .constraints
            .into_iter()
            .map(|c| parse_constraint(c))
            .collect::<Result<Vec<_>>>()?;

        let template = Template {
            text: raw.text,
            nodes,
            params,
            constraints,
        };
        template.validate()?;
        Ok(template)
    }
}

fn parse_constraint(raw: RawConstraint) -> Result<Constraint> {
    let as_str = |v: &serde_json::Value| v.as_str().map(str::to_string);
    let as_idx = |v: &serde_json::Value| v.as_u64().map(|n| n as usize);
    match raw.ty.as_str() {
        "NEQ" => match raw.params.as_slice() {
            [a, b] => match (as_str(a), as_str(b)) {
                (Some(a), Some(b)) => Ok(Constraint::Neq(a, b)),
                _ => Err(QuesynthError::Template("NEQ constraint params must be names".into())),
            },
            _ => Err(QuesynthError::Template("NEQ constraint takes two params".into())),
        },
        "NULL" => match raw.params.as_slice() {
            [p] => as_str(p)
                .map(Constraint::Null)
                .ok_or_else(|| QuesynthError::Template("NULL constraint param must be a name".into())),
            _ => Err(QuesynthError::Template("NULL constraint takes one param".into())),
        },
        "OUT_NEQ" => match raw.params.as_slice() {
            [a, b] => match (as_idx(a), as_idx(b)) {
                (Some(a), Some(b)) => Ok(Constraint::OutNeq(a, b)),
                _ => Err(QuesynthError::Template("OUT_NEQ constraint params must be node indices".into())),
            },
            _ => Err(QuesynthError::Template("OUT_NEQ constraint takes two params".into())),
        },
        other => Err(QuesynthError::Template(format!(
            "unrecognized constraint type \"{other}\""
        ))),
    }
}

pub fn parse_templates(json: &str) -> Result<Vec<Template>> {
    let raw: Vec<RawTemplate> = serde_json::from_str(json)?;
    raw.into_iter().map(Template::try_from).collect()
}

/// Load every `*.json` template file in a directory, keyed by
/// (file stem, index within file). Files load in name order.
pub fn load_templates(dir: &Path) -> Result<BTreeMap<TemplateKey, Template>> {
    let mut templates = BTreeMap::new();
    let mut entries: Vec<_> = fs::read_dir(dir)?
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .map(|e| e.path())
        .filter(|p| p.extension().map_or(false, |ext| ext == "json"))
        .collect();
    entries.sort();
    for path in entries {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let json = fs::read_to_string(&path)?;
        for (idx, template) in parse_templates(&json)?.into_iter().enumerate() {
            templates.insert((stem.clone(), idx), template);
        }
    }
    Ok(templates)
}
