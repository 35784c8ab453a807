use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::scene::{Color, Material, Relation, Shape, Size};

/// One primitive operation of a functional program. Side values (the
/// concrete color, relation, ...) are carried inside the kind variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Scene,
    FilterSize(Size),
    FilterColor(Color),
    FilterMaterial(Material),
    FilterShape(Shape),
    Unique,
    Relate(Relation),
    SameSize,
    SameColor,
    SameMaterial,
    SameShape,
    Count,
    Exist,
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

/// What a node evaluates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    ObjectSet,
    Object,
    Integer,
    Bool,
    Size,
    Color,
    Material,
    Shape,
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Scene => "scene",
            NodeKind::FilterSize(_) => "filter_size",
            NodeKind::FilterColor(_) => "filter_color",
            NodeKind::FilterMaterial(_) => "filter_material",
            NodeKind::FilterShape(_) => "filter_shape",
            NodeKind::Unique => "unique",
            NodeKind::Relate(_) => "relate",
            NodeKind::SameSize => "same_size",
            NodeKind::SameColor => "same_color",
            NodeKind::SameMaterial => "same_material",
            NodeKind::SameShape => "same_shape",
            NodeKind::Count => "count",
            NodeKind::Exist => "exist",
            NodeKind::QuerySize => "query_size",
            NodeKind::QueryColor => "query_color",
            NodeKind::QueryMaterial => "query_material",
            NodeKind::QueryShape => "query_shape",
            NodeKind::Intersect => "intersect",
            NodeKind::Union => "union",
            NodeKind::EqualInteger => "equal_integer",
            NodeKind::LessThan => "less_than",
            NodeKind::GreaterThan => "greater_than",
            NodeKind::EqualSize => "equal_size",
            NodeKind::EqualColor => "equal_color",
            NodeKind::EqualMaterial => "equal_material",
            NodeKind::EqualShape => "equal_shape",
        }
    }

    /// The bound side value, as it appears in the serialized program.
    pub fn side_value(&self) -> Option<&'static str> {
        match self {
            NodeKind::FilterSize(v) => Some(v.as_str()),
            NodeKind::FilterColor(v) => Some(v.as_str()),
            NodeKind::FilterMaterial(v) => Some(v.as_str()),
            NodeKind::FilterShape(v) => Some(v.as_str()),
            NodeKind::Relate(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn output_type(&self) -> OutputType {
        match self {
            NodeKind::Scene
            | NodeKind::FilterSize(_)
            | NodeKind::FilterColor(_)
            | NodeKind::FilterMaterial(_)
            | NodeKind::FilterShape(_)
            | NodeKind::SameSize
            | NodeKind::SameColor
            | NodeKind::SameMaterial
            | NodeKind::SameShape
            | NodeKind::Intersect
            | NodeKind::Union => OutputType::ObjectSet,
            NodeKind::Unique => OutputType::Object,
            NodeKind::Relate(_) => OutputType::ObjectSet,
            NodeKind::Count => OutputType::Integer,
            NodeKind::Exist
            | NodeKind::EqualInteger
            | NodeKind::LessThan
            | NodeKind::GreaterThan
            | NodeKind::EqualSize
            | NodeKind::EqualColor
            | NodeKind::EqualMaterial
            | NodeKind::EqualShape => OutputType::Bool,
            NodeKind::QuerySize => OutputType::Size,
            NodeKind::QueryColor => OutputType::Color,
            NodeKind::QueryMaterial => OutputType::Material,
            NodeKind::QueryShape => OutputType::Shape,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramNode {
    pub kind: NodeKind,
    pub inputs: Vec<usize>,
}

impl ProgramNode {
    pub fn new(kind: NodeKind, inputs: Vec<usize>) -> Self {
        Self { kind, inputs }
    }
}

impl Serialize for ProgramNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let has_side = self.kind.side_value().is_some();
        let mut st = serializer.serialize_struct("ProgramNode", if has_side { 3 } else { 2 })?;
        st.serialize_field("type", self.kind.name())?;
        st.serialize_field("inputs", &self.inputs)?;
        if let Some(val) = self.kind.side_value() {
            st.serialize_field("side_inputs", &[val])?;
        }
        st.end()
    }
}
