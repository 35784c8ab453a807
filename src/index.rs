use std::collections::{BTreeMap, BTreeSet, HashMap};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::scene::{Color, FilterKey, Material, Relation, Scene, Shape, Size};

/// Precomputed mapping from every attribute filter key (each slot either a
/// concrete value or a wildcard) to the ids of matching objects. Pure
/// function of the scene; build once, query many times.
#[derive(Debug, Clone, Default)]
pub struct FilterIndex {
    map: BTreeMap<FilterKey, BTreeSet<usize>>,
}

impl FilterIndex {
    pub fn build(scene: &Scene) -> Self {
        let mut map: BTreeMap<FilterKey, BTreeSet<usize>> = BTreeMap::new();
        for (id, obj) in scene.objects.iter().enumerate() {
            let full = FilterKey::of_object(obj);
            for mask in 0..16u8 {
                map.entry(full.masked(mask)).or_default().insert(id);
            }
        }
        Self { map }
    }

    pub fn matching(&self, key: &FilterKey) -> Option<&BTreeSet<usize>> {
        self.map.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = (&FilterKey, &BTreeSet<usize>)> {
        self.map.iter()
    }

    /// Restrict every key of the index to a candidate id set. Keys whose
    /// intersection is empty are kept: they are legitimate zero-match
    /// options for counting and existence questions.
    pub fn options_within(&self, candidates: &[usize]) -> BTreeMap<FilterKey, Vec<usize>> {
        let candidates: BTreeSet<usize> = candidates.iter().copied().collect();
        self.map
            .iter()
            .map(|(key, ids)| {
                let hits = ids.intersection(&candidates).copied().collect();
                (*key, hits)
            })
            .collect()
    }
}

/// Side-cache of filter indices keyed by scene identity, so repeated
/// template runs over one scene reuse a single index without touching the
/// scene value.
#[derive(Debug, Default)]
pub struct FilterIndexCache {
    entries: HashMap<usize, FilterIndex>,
}

impl FilterIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(&mut self, scene: &Scene) -> &FilterIndex {
        self.entries
            .entry(scene.image_index)
            .or_insert_with(|| FilterIndex::build(scene))
    }
}

/// Extend an option map with filter keys that match nothing, drawn uniformly
/// from the per-slot domains (wildcard included). Bounded retries keep this
/// terminating when the key space is nearly saturated.
pub fn add_empty_options<R: Rng>(
    options: &mut BTreeMap<FilterKey, Vec<usize>>,
    num_to_add: usize,
    rng: &mut R,
) {
    let mut remaining = num_to_add;
    let mut attempts = 64 * num_to_add.max(1);
    while remaining > 0 && attempts > 0 {
        attempts -= 1;
        let key = random_key(rng);
        if options.contains_key(&key) {
            continue;
        }
        options.insert(key, vec![]);
        remaining -= 1;
    }
}

fn random_key<R: Rng>(rng: &mut R) -> FilterKey {
    fn pick<T: Copy, R: Rng>(all: &[T], rng: &mut R) -> Option<T> {
        // one extra slot plays the wildcard
        let idx = rng.gen_range(0..=all.len());
        all.get(idx).copied()
    }
    FilterKey {
        size: pick(Size::ALL, rng),
        color: pick(Color::ALL, rng),
        material: pick(Material::ALL, rng),
        shape: pick(Shape::ALL, rng),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RelateFilterConfig {
    /// Keep only (relation, key) pairs whose intersection is a singleton.
    pub require_unique: bool,
    /// Keep pairs whose intersection is empty.
    pub include_empty: bool,
    /// Target fraction of trivial pairs among the returned options.
    pub trivial_frac: f64,
}

impl Default for RelateFilterConfig {
    fn default() -> Self {
        Self {
            require_unique: false,
            include_empty: false,
            trivial_frac: 0.1,
        }
    }
}

/// For an anchor object, every (relationship, filter key) combination with
/// the ids it selects. A combination is trivial when relating adds no
/// selectivity (the intersection equals the full filtered set); trivial
/// combinations are subsampled to `trivial_frac` of the output.
pub fn relate_filter_options<R: Rng>(
    scene: &Scene,
    index: &FilterIndex,
    anchor: usize,
    cfg: &RelateFilterConfig,
    rng: &mut R,
) -> Vec<((Relation, FilterKey), Vec<usize>)> {
    let mut options: Vec<((Relation, FilterKey), Vec<usize>)> = Vec::new();
    let mut trivial: Vec<((Relation, FilterKey), Vec<usize>)> = Vec::new();

    for (&relation, per_obj) in &scene.relationships {
        let related: BTreeSet<usize> = per_obj
            .get(anchor)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        for (key, filtered) in index.keys() {
            let hits: Vec<usize> = related.intersection(filtered).copied().collect();
            let is_trivial = hits.len() == filtered.len();
            if cfg.require_unique && hits.len() != 1 {
                continue;
            }
            if !cfg.include_empty && hits.is_empty() {
                continue;
            }
            if is_trivial {
                trivial.push(((relation, *key), hits));
            } else {
                options.push(((relation, *key), hits));
            }
        }
    }

    let num_trivial = if cfg.trivial_frac >= 1.0 {
        trivial.len()
    } else {
        let n = options.len() as f64;
        (n * cfg.trivial_frac / (1.0 - cfg.trivial_frac)).round() as usize
    };
    trivial.shuffle(rng);
    options.extend(trivial.into_iter().take(num_trivial));
    options
}
