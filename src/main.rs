use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;

use quesynth::error::Result;
use quesynth::realize::load_synonyms;
use quesynth::scene::load_scenes;
use quesynth::session::{generate, write_questions, SessionConfig};
use quesynth::template::load_templates;

/// Generate questions, functional programs, and answers for symbolic scenes.
#[derive(Parser)]
struct Args {
    /// JSON file with ground-truth scene descriptions.
    #[arg(long, default_value = "scenes.json")]
    input_scene_file: PathBuf,
    /// Directory of JSON question templates.
    #[arg(long, default_value = "templates")]
    template_dir: PathBuf,
    /// JSON file defining synonyms for parameter values.
    #[arg(long, default_value = "synonyms.json")]
    synonyms_json: PathBuf,
    /// Output file for the generated questions.
    #[arg(long, default_value = "questions.json")]
    output_questions_file: PathBuf,
    /// Scene to start at; lets generation split across workers.
    #[arg(long, default_value_t = 0)]
    scene_start_idx: usize,
    /// Scenes to process; zero processes everything from the start index.
    #[arg(long, default_value_t = 0)]
    num_scenes: usize,
    /// Distinct templates to instantiate per scene.
    #[arg(long, default_value_t = 10)]
    templates_per_image: usize,
    /// Instantiations per template per scene.
    #[arg(long, default_value_t = 1)]
    instances_per_template: usize,
    /// Scenes between template/answer count resets.
    #[arg(long, default_value_t = 250)]
    reset_counts_every: usize,
    /// Seed for the random source; unseeded runs are not reproducible.
    #[arg(long)]
    seed: Option<u64>,
}

fn run(args: &Args) -> Result<()> {
    let scenes = load_scenes(&args.input_scene_file)?;
    let templates = load_templates(&args.template_dir)?;
    info!("read {} templates from disk", templates.len());
    let synonyms = load_synonyms(&args.synonyms_json)?;

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let cfg = SessionConfig {
        scene_start_idx: args.scene_start_idx,
        num_scenes: args.num_scenes,
        templates_per_image: args.templates_per_image,
        instances_per_template: args.instances_per_template,
        reset_counts_every: args.reset_counts_every,
        ..SessionConfig::default()
    };

    let output = generate(&scenes, &templates, &synonyms, &cfg, &mut rng);
    info!("generated {} questions", output.questions.len());
    write_questions(&args.output_questions_file, &output)
}

fn main() -> ExitCode {
    colog::init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
