use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use lazy_static::lazy_static;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;

use crate::error::Result;
use crate::template::SlotValue;

lazy_static! {
    // innermost bracketed span; outer spans resolve on later passes
    static ref OPTIONAL_SPAN: Regex = Regex::new(r"\[([^\[]*)\]").unwrap();
}

/// Phrase → alternative phrasings, substituted per slot with an independent
/// random choice.
pub type Synonyms = BTreeMap<String, Vec<String>>;

pub fn load_synonyms(path: &Path) -> Result<Synonyms> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolve `[...]` spans left to right: each span independently keeps its
/// contents or disappears, with probability one half each.
pub fn resolve_optionals<R: Rng>(text: &str, rng: &mut R) -> String {
    let mut text = text.to_string();
    loop {
        let (range, contents) = match OPTIONAL_SPAN.captures(&text) {
            Some(m) => (
                m.get(0).unwrap().range(),
                m.get(1).unwrap().as_str().to_string(),
            ),
            None => break,
        };
        let keep = rng.gen_bool(0.5);
        text.replace_range(range, if keep { contents.as_str() } else { "" });
    }
    text
}

/// Strip "other"/"another" from comparison questions whose two referents are
/// already distinguishable by some attribute pair.
pub fn other_heuristic(text: String, vals: &BTreeMap<String, SlotValue>) -> String {
    if !text.contains(" other ") && !text.contains(" another ") {
        return text;
    }
    const TARGET_KEYS: [&str; 8] = ["<Z>", "<C>", "<M>", "<S>", "<Z2>", "<C2>", "<M2>", "<S2>"];
    if vals.len() != TARGET_KEYS.len() || !TARGET_KEYS.iter().all(|k| vals.contains_key(*k)) {
        return text;
    }
    const KEY_PAIRS: [(&str, &str); 4] = [
        ("<Z>", "<Z2>"),
        ("<C>", "<C2>"),
        ("<M>", "<M2>"),
        ("<S>", "<S2>"),
    ];
    let distinguishable = KEY_PAIRS.iter().any(|(k1, k2)| {
        let (v1, v2) = (vals[*k1].phrase(), vals[*k2].phrase());
        !v1.is_empty() && !v2.is_empty() && v1 != v2
    });
    if !distinguishable {
        return text;
    }
    text.replace(" other ", " ").replace(" another ", " a ")
}

/// Turn an accepted instantiation's bindings into final question text: pick
/// one surface form, substitute every slot (through the synonym table when
/// an entry exists), resolve optional spans, then fix up "other" phrasing.
pub fn realize<R: Rng>(
    texts: &[String],
    vals: &BTreeMap<String, SlotValue>,
    synonyms: &Synonyms,
    rng: &mut R,
) -> String {
    let mut text = texts
        .choose(rng)
        .cloned()
        .unwrap_or_default();
    for (name, val) in vals {
        let phrase = val.phrase();
        let phrase = match synonyms.get(phrase) {
            Some(alts) => alts.choose(rng).map(String::as_str).unwrap_or(phrase),
            None => phrase,
        };
        text = text.replace(name.as_str(), phrase);
        text = collapse_whitespace(&text);
    }
    text = resolve_optionals(&text, rng);
    text = collapse_whitespace(&text);
    other_heuristic(text, vals)
}
