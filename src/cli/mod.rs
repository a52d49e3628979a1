//! CLI command definitions and parsing
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "lesionscope",
    version,
    author = "neur0map",
    about = "Educational skin-lesion classifier with visual explanations and multimodal analysis",
    long_about = "lesionscope classifies dermoscopic images as benign or malignant, renders a Grad-CAM \
                  attention overlay, asks remote multimodal models for a written report (falling back to \
                  a local report when none answers), and grows its own training set from classified images. \
                  It is a study aid, not a diagnostic device."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/lesionscope/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify an image and print the JSON report
    Classify {
        /// Image path, or "-" to read a base64 payload (optionally a data URL) from stdin
        image: String,

        /// Render the Grad-CAM overlay
        #[arg(long, action = ArgAction::Set, default_value_t = true, value_name = "BOOL")]
        explain: bool,

        /// Request the written analysis from the provider cascade
        #[arg(long, action = ArgAction::Set, default_value_t = true, value_name = "BOOL")]
        narrative: bool,

        /// Store the image in the incremental dataset
        #[arg(long, action = ArgAction::Set, default_value_t = true, value_name = "BOOL")]
        save: bool,

        /// Profile to use (e.g., "offline", "fast")
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Load the model and report component readiness
    Health {
        /// Profile to use
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Inspect or reset the incremental dataset
    Dataset {
        #[command(subcommand)]
        action: DatasetAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum DatasetAction {
    /// Per-class sample counts
    Stats,

    /// Store location, counts and training readiness
    Info,

    /// Delete every stored image and metadata record
    Reset {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_classify_flags() {
        let cli = Cli::try_parse_from(["lesionscope", "classify", "lesion.png"]).unwrap();
        match cli.command {
            Commands::Classify {
                image,
                explain,
                narrative,
                save,
                profile,
            } => {
                assert_eq!(image, "lesion.png");
                assert!(explain && narrative && save);
                assert!(profile.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }

        let cli = Cli::try_parse_from([
            "lesionscope",
            "--verbose",
            "classify",
            "-",
            "--narrative",
            "false",
            "--save",
            "false",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Classify {
                explain,
                narrative,
                save,
                ..
            } => {
                assert!(explain);
                assert!(!narrative);
                assert!(!save);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_dataset_reset_flag() {
        let cli = Cli::try_parse_from(["lesionscope", "dataset", "reset", "--yes"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Dataset {
                action: DatasetAction::Reset { yes: true }
            }
        ));
    }
}
