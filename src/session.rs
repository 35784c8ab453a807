use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use log::{debug, info};
use rand::Rng;
use serde::Serialize;

use crate::error::Result;
use crate::eval::Answer;
use crate::index::FilterIndexCache;
use crate::program::ProgramNode;
use crate::realize::{realize, Synonyms};
use crate::scene::{SceneFile, SceneInfo};
use crate::search::{
    answer_counts_for, AnswerCounts, RejectionThresholds, SearchConfig, TemplateDfs,
};
use crate::template::{Template, TemplateKey};

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// First scene to process.
    pub scene_start_idx: usize,
    /// Number of scenes to process; zero means all remaining.
    pub num_scenes: usize,
    /// Distinct templates to instantiate per scene.
    pub templates_per_image: usize,
    /// Accepted instantiations per (scene, template).
    pub instances_per_template: usize,
    /// Scenes between count resets. Higher values flatten the template and
    /// answer distributions at the cost of longer runs.
    pub reset_counts_every: usize,
    pub thresholds: RejectionThresholds,
    pub trivial_frac: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scene_start_idx: 0,
            num_scenes: 0,
            templates_per_image: 10,
            instances_per_template: 1,
            reset_counts_every: 250,
            thresholds: RejectionThresholds::default(),
            trivial_frac: 0.1,
        }
    }
}

/// One output record of the generated dataset.
#[derive(Debug, Clone, Serialize)]
pub struct Question {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split: Option<String>,
    pub image_filename: String,
    pub image_index: usize,
    pub image: String,
    pub question: String,
    pub program: Vec<ProgramNode>,
    pub answer: Answer,
    pub question_index: usize,
}

#[derive(Debug, Serialize)]
pub struct QuestionFile {
    pub info: SceneInfo,
    pub questions: Vec<Question>,
}

type CountTables = (BTreeMap<TemplateKey, usize>, BTreeMap<TemplateKey, AnswerCounts>);

fn reset_counts(templates: &BTreeMap<TemplateKey, Template>) -> CountTables {
    let usage = templates.keys().map(|k| (k.clone(), 0)).collect();
    let answers = templates
        .iter()
        .map(|(k, t)| (k.clone(), answer_counts_for(t)))
        .collect();
    (usage, answers)
}

fn image_stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string())
}

/// Generate questions for every selected scene. Per scene, templates run in
/// ascending order of how often they have produced questions so far, which
/// keeps the template distribution flat across the stream.
pub fn generate<R: Rng>(
    scene_file: &SceneFile,
    templates: &BTreeMap<TemplateKey, Template>,
    synonyms: &Synonyms,
    cfg: &SessionConfig,
    rng: &mut R,
) -> QuestionFile {
    let total = scene_file.scenes.len();
    let begin = cfg.scene_start_idx.min(total);
    let end = if cfg.num_scenes > 0 {
        (begin + cfg.num_scenes).min(total)
    } else {
        total
    };
    let scenes = &scene_file.scenes[begin..end];

    let search_cfg = SearchConfig {
        max_instances: cfg.instances_per_template,
        thresholds: cfg.thresholds,
        trivial_frac: cfg.trivial_frac,
    };

    let mut cache = FilterIndexCache::new();
    let (mut template_counts, mut template_answer_counts) = reset_counts(templates);
    let mut questions: Vec<Question> = Vec::new();

    for (i, scene) in scenes.iter().enumerate() {
        info!("scene {} ({}/{})", scene.image_filename, i + 1, scenes.len());
        if cfg.reset_counts_every > 0 && i % cfg.reset_counts_every == 0 {
            debug!("resetting counts");
            (template_counts, template_answer_counts) = reset_counts(templates);
        }
        let index = cache.get_or_build(scene);

        let mut ordered: Vec<&TemplateKey> = templates.keys().collect();
        ordered.sort_by_key(|k| template_counts[*k]);

        let mut num_instantiated = 0;
        for key in ordered {
            let template = &templates[key];
            debug!("trying template {}:{}", key.0, key.1);
            let counts = template_answer_counts
                .get_mut(key)
                .expect("count tables cover every template");
            let accepted =
                TemplateDfs::new(scene, index, template, &search_cfg, counts, rng).run();
            let got_any = !accepted.is_empty();
            for inst in accepted {
                let text = realize(&template.text, &inst.vals, synonyms, rng);
                questions.push(Question {
                    split: scene_file.info.split.clone(),
                    image_filename: scene.image_filename.clone(),
                    image_index: scene.image_index,
                    image: image_stem(&scene.image_filename),
                    question: text,
                    program: inst.nodes,
                    answer: inst.answer,
                    question_index: questions.len(),
                });
            }
            if got_any {
                num_instantiated += 1;
                *template_counts
                    .get_mut(key)
                    .expect("count tables cover every template") += 1;
            }
            if num_instantiated >= cfg.templates_per_image {
                break;
            }
        }
    }

    QuestionFile {
        info: scene_file.info.clone(),
        questions,
    }
}

pub fn write_questions(path: &Path, file: &QuestionFile) -> Result<()> {
    info!("writing output to {}", path.display());
    let out = File::create(path)?;
    serde_json::to_writer(BufWriter::new(out), file)?;
    Ok(())
}
