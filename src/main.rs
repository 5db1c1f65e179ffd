use std::path::PathBuf;

use aicover_models::catalog::ModelDescriptor;
use aicover_models::core::app_state::AppState;
use aicover_models::core::events::LogProgress;
use aicover_models::core::settings::SettingsManager;
use aicover_models::models::{CancelToken, PackageSource};
use aicover_models::pipeline::{
    CommandPipeline, CoverParams, CoverRequest, OutputFormat, PitchDetection,
};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::metadata::LevelFilter;

#[derive(clap::Parser, Debug)]
#[clap(version, about)]
struct ClapArgs {
    /// Model store directory, overriding the configured one.
    #[clap(long, global = true)]
    models_dir: Option<PathBuf>,
    /// Settings file to use instead of the platform default.
    #[clap(long, global = true)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: SubCommands,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommands {
    /// List installed voice models
    #[clap(alias = "ls")]
    List,
    /// Print details of one installed model as JSON
    Show { name: String },
    /// Download a zipped model package and install it under NAME
    #[clap(alias = "dl")]
    Download { url: String, name: String },
    /// Install a zipped model package from the local disk under NAME
    Upload { zip: PathBuf, name: String },
    /// Browse the public model index
    Catalog(CatalogCommand),
    /// Install a model from the public model index
    Install {
        model: String,
        /// Install under a different name.
        #[clap(long = "as")]
        rename: Option<String>,
    },
    /// Generate a cover of SONG sung by MODEL
    #[clap(arg_required_else_help(true))]
    Cover(CoverCommand),
}

#[derive(clap::Args, Debug)]
struct CatalogCommand {
    /// Only show models carrying this tag. Repeatable.
    #[clap(long = "tag")]
    tags: Vec<String>,
    /// Case-insensitive search over name, description, credit and tags.
    #[clap(long, short, default_value = "")]
    query: String,
    /// Hide models that are already installed.
    #[clap(long)]
    available: bool,
}

#[derive(clap::Args, Debug)]
struct CoverCommand {
    /// YouTube link or path to a local audio file.
    song: String,
    /// Installed voice model to sing with.
    model: String,
    /// Vocal pitch change in octaves.
    #[clap(long, default_value_t = 0, allow_negative_numbers = true)]
    pitch: i32,
    /// Pitch change of vocals and instrumentals in semitones.
    #[clap(long, default_value_t = 0, allow_negative_numbers = true)]
    pitch_all: i32,
    #[clap(long)]
    keep_files: bool,
    #[clap(long, default_value_t = 0, allow_negative_numbers = true)]
    main_gain: i32,
    #[clap(long, default_value_t = 0, allow_negative_numbers = true)]
    backup_gain: i32,
    #[clap(long, default_value_t = 0, allow_negative_numbers = true)]
    inst_gain: i32,
    #[clap(long, default_value_t = 0.5)]
    index_rate: f32,
    #[clap(long, default_value_t = 3)]
    filter_radius: u32,
    #[clap(long, default_value_t = 0.25)]
    rms_mix_rate: f32,
    #[clap(long, default_value_t = 0.33)]
    protect: f32,
    /// rmvpe or mangio-crepe.
    #[clap(long, default_value = "rmvpe")]
    f0_method: PitchDetection,
    #[clap(long, default_value_t = 128)]
    crepe_hop_length: u32,
    #[clap(long, default_value_t = 0.15)]
    reverb_room_size: f32,
    #[clap(long, default_value_t = 0.2)]
    reverb_wet: f32,
    #[clap(long, default_value_t = 0.8)]
    reverb_dry: f32,
    #[clap(long, default_value_t = 0.7)]
    reverb_damping: f32,
    /// mp3 or wav.
    #[clap(long, default_value = "mp3")]
    output_format: OutputFormat,
}

impl CoverCommand {
    fn into_request(self) -> CoverRequest {
        CoverRequest {
            song: self.song,
            model: self.model,
            params: CoverParams {
                pitch: self.pitch,
                pitch_all: self.pitch_all,
                keep_files: self.keep_files,
                main_gain: self.main_gain,
                backup_gain: self.backup_gain,
                inst_gain: self.inst_gain,
                index_rate: self.index_rate,
                filter_radius: self.filter_radius,
                rms_mix_rate: self.rms_mix_rate,
                protect: self.protect,
                f0_method: self.f0_method,
                crepe_hop_length: self.crepe_hop_length,
                reverb_room_size: self.reverb_room_size,
                reverb_wet: self.reverb_wet,
                reverb_dry: self.reverb_dry,
                reverb_damping: self.reverb_damping,
                output_format: self.output_format,
            },
        }
    }
}

fn setup_logging() {
    let filter = std::env::var("AICOVER_LOG")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(LevelFilter::INFO);

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .compact()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn print_descriptors(models: &[ModelDescriptor]) {
    for model in models {
        println!("{}\t[{}]\t{}", model.name, model.tags.join(", "), model.description);
    }
}

fn install(state: &AppState, source: PackageSource, name: &str) -> Result<()> {
    let entry = state.install(&source, name, &LogProgress, &CancelToken::new())?;
    println!("{}", entry.dir.display());
    Ok(())
}

fn main() -> Result<()> {
    let args = ClapArgs::parse();
    setup_logging();

    let settings = match args.config {
        Some(path) => SettingsManager::open(path)?,
        None => SettingsManager::new()?,
    };
    if let Some(dir) = args.models_dir {
        settings.override_with(|settings| settings.models_dir = Some(dir));
    }
    let state = AppState::new(settings)?;

    match args.command {
        SubCommands::List => {
            for name in state.installed_models() {
                println!("{name}");
            }
        }
        SubCommands::Show { name } => {
            let entry = state
                .store()
                .entry(&name)?
                .with_context(|| format!("voice model `{name}` is not installed"))?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        SubCommands::Download { url, name } => install(&state, PackageSource::Url(url), &name)?,
        SubCommands::Upload { zip, name } => install(&state, PackageSource::Local(zip), &name)?,
        SubCommands::Catalog(command) => {
            state.load_catalog()?;
            let mut models = state.filter_catalog(&command.tags, &command.query)?;
            if command.available {
                let installed = state.installed_models();
                models.retain(|model| !installed.contains(&model.name));
            }
            print_descriptors(&models);
        }
        SubCommands::Install { model, rename } => {
            state.load_catalog()?;
            let entry = state.install_from_catalog(
                &model,
                rename.as_deref(),
                &LogProgress,
                &CancelToken::new(),
            )?;
            println!("{}", entry.dir.display());
        }
        SubCommands::Cover(command) => {
            let pipeline = CommandPipeline::from_settings(&state.settings_manager().read().pipeline)?;
            let output = state.generate_cover(&command.into_request(), &pipeline)?;
            println!("{}", output.display());
        }
    }

    Ok(())
}
