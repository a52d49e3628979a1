use lesionscope::cli::{Cli, Commands, ConfigAction, DatasetAction};
use lesionscope::config::Config;
use lesionscope::error::{LesionError, Result};
use lesionscope::pipeline::{ImageInput, LesionPipeline, PipelineOptions};
use lesionscope::storage::{open_dataset, IncrementalStore};
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;

fn main() {
    let cli = Cli::parse_args();

    // Logs go to stderr; stdout carries the JSON reports
    init_logging(cli.verbose);

    let outcome = match cli.command {
        Commands::Classify {
            image,
            explain,
            narrative,
            save,
            profile,
        } => cmd_classify(
            cli.config,
            profile,
            &image,
            PipelineOptions {
                explain,
                narrative,
                save,
            },
        ),
        Commands::Health { profile } => cmd_health(cli.config, profile),
        Commands::Dataset { action } => cmd_dataset(cli.config, action),
        Commands::Config { action } => cmd_config(cli.config, action),
    };

    if let Err(e) = outcome {
        print_failure(&e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if verbose {
        "lesionscope=debug"
    } else {
        "lesionscope=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_failure(error: &LesionError) {
    tracing::error!("{}", error);
    let body = serde_json::json!({
        "success": false,
        "error": {
            "type": error.kind(),
            "message": error.to_string(),
        }
    });
    println!("{}", body);
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| LesionError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })?;
    println!("{}", json);
    Ok(())
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| LesionError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn read_input(image: &str) -> Result<ImageInput> {
    if image == "-" {
        let mut payload = String::new();
        std::io::stdin()
            .read_to_string(&mut payload)
            .map_err(|e| LesionError::Io {
                source: e,
                context: "Failed to read image from stdin".to_string(),
            })?;
        ImageInput::from_base64(&payload)
    } else {
        ImageInput::from_path(&PathBuf::from(image))
    }
}

fn cmd_classify(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    image: &str,
    options: PipelineOptions,
) -> Result<()> {
    let config = load_config(config_path, profile)?;
    let input = read_input(image)?;
    tracing::debug!("Classifying {}", input.describe());

    let pipeline = LesionPipeline::from_config(&config)?;
    let report = runtime()?.block_on(pipeline.run(input, options))?;

    print_json(&report)
}

fn cmd_health(config_path: Option<PathBuf>, profile: Option<String>) -> Result<()> {
    let config = load_config(config_path, profile)?;
    let report = LesionPipeline::check_health(&config);
    print_json(&report)?;

    if !report.is_healthy() {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_dataset(config_path: Option<PathBuf>, action: DatasetAction) -> Result<()> {
    let config = load_config(config_path, None)?;
    let store = open_dataset(&config.dataset)?.ok_or_else(|| {
        LesionError::Config("Dataset store is disabled in configuration".to_string())
    })?;

    match action {
        DatasetAction::Stats => print_json(&store.statistics()?),
        DatasetAction::Info => print_json(&store.info()?),
        DatasetAction::Reset { yes } => cmd_dataset_reset(&store, yes),
    }
}

fn cmd_dataset_reset(store: &IncrementalStore, yes: bool) -> Result<()> {
    if !yes {
        let statistics = store.statistics()?;
        eprintln!(
            "⚠ This deletes {} stored images under {}",
            statistics.total,
            store.root().display()
        );
        eprintln!("Re-run with --yes to confirm");
        return Ok(());
    }

    let summary = store.reset()?;
    print_json(&summary)
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, None)?;
            print_json(&config)?;
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| LesionError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'lesionscope config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        return Ok(config);
    }

    if let Some(profile) = profile {
        Config::load_with_profile(&path, &profile)
    } else {
        Config::load(&path)
    }
}
