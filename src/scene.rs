use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{QuesynthError, Result};

/// The one scene schema this engine understands.
pub const DATASET: &str = "CLEVR-v1.0";

macro_rules! attr_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

attr_enum!(Size {
    Small => "small",
    Large => "large",
});

attr_enum!(Color {
    Gray => "gray",
    Red => "red",
    Blue => "blue",
    Green => "green",
    Brown => "brown",
    Purple => "purple",
    Cyan => "cyan",
    Yellow => "yellow",
});

attr_enum!(Material {
    Rubber => "rubber",
    Metal => "metal",
});

attr_enum!(Shape {
    Cube => "cube",
    Sphere => "sphere",
    Cylinder => "cylinder",
});

attr_enum!(Relation {
    Left => "left",
    Right => "right",
    Front => "front",
    Behind => "behind",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Object {
    pub size: Size,
    pub color: Color,
    pub material: Material,
    pub shape: Shape,
    #[serde(rename = "3d_coords", default)]
    pub coords: [f64; 3],
}

/// One symbolic scene: objects plus directed relationship lists. The entry
/// `relationships[r][i]` lists the ids of objects standing in relation `r`
/// to object `i`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub image_index: usize,
    #[serde(default)]
    pub image_filename: String,
    pub objects: Vec<Object>,
    #[serde(default)]
    pub relationships: BTreeMap<Relation, Vec<Vec<usize>>>,
}

impl Scene {
    pub fn related(&self, relation: Relation, object: usize) -> &[usize] {
        self.relationships
            .get(&relation)
            .and_then(|per_obj| per_obj.get(object))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SceneFile {
    #[serde(default)]
    pub info: SceneInfo,
    pub scenes: Vec<Scene>,
}

/// A conjunctive attribute filter; `None` slots are wildcards. Slot order is
/// size, color, material, shape throughout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FilterKey {
    pub size: Option<Size>,
    pub color: Option<Color>,
    pub material: Option<Material>,
    pub shape: Option<Shape>,
}

impl FilterKey {
    pub fn of_object(obj: &Object) -> Self {
        Self {
            size: Some(obj.size),
            color: Some(obj.color),
            material: Some(obj.material),
            shape: Some(obj.shape),
        }
    }

    /// Keep only the slots whose bit is set; bit order matches slot order.
    pub fn masked(&self, mask: u8) -> Self {
        Self {
            size: if mask & 1 != 0 { self.size } else { None },
            color: if mask & 2 != 0 { self.color } else { None },
            material: if mask & 4 != 0 { self.material } else { None },
            shape: if mask & 8 != 0 { self.shape } else { None },
        }
    }

    pub fn matches(&self, obj: &Object) -> bool {
        self.size.map_or(true, |v| v == obj.size)
            && self.color.map_or(true, |v| v == obj.color)
            && self.material.map_or(true, |v| v == obj.material)
            && self.shape.map_or(true, |v| v == obj.shape)
    }
}

pub fn load_scenes(path: &Path) -> Result<SceneFile> {
    let file = File::open(path)?;
    let scene_file: SceneFile = serde_json::from_reader(BufReader::new(file))?;
    if let Some(dataset) = scene_file.info.dataset.as_deref() {
        if dataset != DATASET {
            return Err(QuesynthError::Dataset(dataset.to_string()));
        }
    }
    Ok(scene_file)
}
