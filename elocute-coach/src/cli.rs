use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "elocute")]
#[command(about = "Live spoken pronunciation coach", long_about = None)]
pub struct Cli {
    /// Settings file (TOML)
    #[arg(short, long, global = true, default_value = "elocute.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Practise sentences with the coach until Ctrl-C
    Practice {
        /// Sentence to practise (repeatable; overrides the settings file)
        #[arg(short, long = "sentence")]
        sentences: Vec<String>,

        /// Prebuilt voice name
        #[arg(long)]
        voice: Option<String>,

        /// Live model identifier
        #[arg(long)]
        model: Option<String>,
    },

    /// Print the resolved settings (the API key is never shown)
    CheckConfig,
}
