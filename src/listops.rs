//! List-transformation questions over a scene's color sequence, read off the
//! objects in left-to-right order. Answers come from applying the named
//! operation and reading out one ordinal position.

use crate::scene::{Color, Scene};

pub const QUERY_COLORS: [Color; 4] = [Color::Red, Color::Gray, Color::Yellow, Color::Cyan];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    First,
    Second,
    Third,
}

impl Position {
    pub const ALL: [Position; 3] = [Position::First, Position::Second, Position::Third];

    pub fn as_str(&self) -> &'static str {
        match self {
            Position::First => "1st",
            Position::Second => "2nd",
            Position::Third => "3rd",
        }
    }

    fn index(&self) -> usize {
        match self {
            Position::First => 0,
            Position::Second => 1,
            Position::Third => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListQuestion {
    Delete(Color, Position),
    Append(Color, Position),
    Reverse(Position),
    Sort(Position),
}

impl ListQuestion {
    /// The query atom naming this question, e.g. `query3(delete,red,1st)`.
    pub fn atom_text(&self) -> String {
        match self {
            ListQuestion::Delete(color, pos) => {
                format!("query3(delete,{},{})", color.as_str(), pos.as_str())
            }
            ListQuestion::Append(color, pos) => {
                format!("query3(append,{},{})", color.as_str(), pos.as_str())
            }
            ListQuestion::Reverse(pos) => format!("query2(reverse,{})", pos.as_str()),
            ListQuestion::Sort(pos) => format!("query2(sort,{})", pos.as_str()),
        }
    }
}

/// The scene's colors in ascending x order.
pub fn scene_colors(scene: &Scene) -> Vec<Color> {
    let mut objs: Vec<_> = scene.objects.iter().collect();
    objs.sort_by(|a, b| a.coords[0].partial_cmp(&b.coords[0]).unwrap_or(std::cmp::Ordering::Equal));
    objs.into_iter().map(|o| o.color).collect()
}

/// Remove the first occurrence of `color`, keeping the rest in order.
pub fn delete_first(color: Color, colors: &[Color]) -> Vec<Color> {
    let mut deleted = false;
    colors
        .iter()
        .filter(|&&c| {
            if c == color && !deleted {
                deleted = true;
                false
            } else {
                true
            }
        })
        .copied()
        .collect()
}

/// Prepend `color` to the sequence.
pub fn append_front(color: Color, colors: &[Color]) -> Vec<Color> {
    let mut result = Vec::with_capacity(colors.len() + 1);
    result.push(color);
    result.extend_from_slice(colors);
    result
}

pub fn reverse(colors: &[Color]) -> Vec<Color> {
    colors.iter().rev().copied().collect()
}

/// Lexicographic by color name.
pub fn sort_colors(colors: &[Color]) -> Vec<Color> {
    let mut result = colors.to_vec();
    result.sort_by_key(|c| c.as_str());
    result
}

pub fn object_by_position(colors: &[Color], pos: Position) -> Option<Color> {
    colors.get(pos.index()).copied()
}

fn answer_for(question: ListQuestion, colors: &[Color]) -> Option<Color> {
    match question {
        ListQuestion::Delete(color, pos) => {
            // deletions are only asked about colors actually present, and
            // never about the last remaining slot
            if !colors.contains(&color) || pos == Position::Third {
                return None;
            }
            object_by_position(&delete_first(color, colors), pos)
        }
        ListQuestion::Append(color, pos) => object_by_position(&append_front(color, colors), pos),
        ListQuestion::Reverse(pos) => object_by_position(&reverse(colors), pos),
        ListQuestion::Sort(pos) => object_by_position(&sort_colors(colors), pos),
    }
}

/// Every valid list question for the scene, with its answer.
pub fn questions_for_scene(scene: &Scene) -> Vec<(ListQuestion, Color)> {
    let colors = scene_colors(scene);
    let mut questions = Vec::new();
    for color in QUERY_COLORS {
        for pos in Position::ALL {
            questions.push(ListQuestion::Delete(color, pos));
        }
    }
    for color in QUERY_COLORS {
        for pos in Position::ALL {
            questions.push(ListQuestion::Append(color, pos));
        }
    }
    for pos in Position::ALL {
        questions.push(ListQuestion::Reverse(pos));
        questions.push(ListQuestion::Sort(pos));
    }
    questions
        .into_iter()
        .filter_map(|q| answer_for(q, &colors).map(|a| (q, a)))
        .collect()
}
