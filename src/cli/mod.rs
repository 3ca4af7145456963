use clap::Parser;
use std::path::PathBuf;

use crate::config::Config;

pub mod discovery;

#[derive(Parser, Debug)]
#[command(
    name = "tubescribe",
    about = "Tubescribe - Batch-transcribe YouTube videos listed in a table file",
    version,
    long_about = "Downloads the audio of every pending row in a table (column 1: name, column 2: URL), transcribes it with a remote speech-to-text service and marks the row done. Re-running resumes where the previous run stopped."
)]
pub struct Cli {
    /// Table file to process (auto-discovered in the current directory if omitted)
    #[arg(value_name = "TABLE")]
    pub table: Option<PathBuf>,

    /// Configuration file (defaults to ./config.yaml or the user config directory)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory for transcripts
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Directory for temporary audio files
    #[arg(long, value_name = "DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Transcription service API key
    #[arg(long, env = "LEMONFOX_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Keep downloaded audio after transcription
    #[arg(long)]
    pub keep_audio: bool,

    /// Show the effective configuration and exit
    #[arg(long)]
    pub show_config: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    /// Command-line values take precedence over the config file
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(dir) = &self.output_dir {
            config.app.output_dir = dir.clone();
        }
        if let Some(dir) = &self.temp_dir {
            config.app.temp_dir = dir.clone();
        }
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            config.transcription.api_key = key.clone();
        }
        if self.keep_audio {
            config.app.keep_audio = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_positional_table_is_optional() {
        let cli = Cli::try_parse_from(["tubescribe"]).unwrap();
        assert!(cli.table.is_none());

        let cli = Cli::try_parse_from(["tubescribe", "videos.csv", "--quiet"]).unwrap();
        assert_eq!(cli.table, Some(PathBuf::from("videos.csv")));
        assert!(cli.quiet);

        assert!(Cli::try_parse_from(["tubescribe", "a.csv", "b.csv"]).is_err());
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::try_parse_from([
            "tubescribe",
            "--output-dir",
            "out",
            "--temp-dir",
            "tmp",
            "--api-key",
            "k",
            "--keep-audio",
        ])
        .unwrap();

        let mut config = Config::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.app.output_dir, PathBuf::from("out"));
        assert_eq!(config.app.temp_dir, PathBuf::from("tmp"));
        assert_eq!(config.transcription.api_key, "k");
        assert!(config.app.keep_audio);
    }
}
