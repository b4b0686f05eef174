use clap::builder::RangedU64ValueParser;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::ConvertConfig;

#[derive(Parser, Debug)]
#[command(
    name = "inostar",
    about = "This command line converts inoreader's exported starred.json into .html files",
    version,
    long_about = "Converts every item of an exported starred.json into a standalone .html file. With --offline, remote images are mirrored into a local directory and the HTML is pointed at the local copies."
)]
pub struct ConvertCommand {
    /// Exported starred.json files
    #[arg(value_name = "starred.json")]
    pub json: Vec<PathBuf>,

    /// Download remote images and replace html references
    #[arg(short = 'e', long)]
    pub offline: bool,

    /// Verbose printing
    #[arg(short, long)]
    pub verbose: bool,

    /// Directory that mirrored images are saved into
    #[arg(long, default_value = "images")]
    pub images_dir: PathBuf,

    /// Maximum concurrent image downloads per item
    #[arg(short = 'c', long, default_value = "3", value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    pub max_concurrent: usize,

    /// Timeout for each image download in seconds
    #[arg(long, default_value = "120", value_parser = RangedU64ValueParser::<u64>::new().range(1..))]
    pub timeout: u64,

    /// Do not re-fetch full articles for known excerpt-only sites
    #[arg(long)]
    pub no_site_rules: bool,

    /// Show about
    #[arg(long)]
    pub about: bool,
}

impl ConvertCommand {
    pub fn into_config(self) -> (ConvertConfig, Vec<PathBuf>) {
        let config = ConvertConfig {
            images_dir: self.images_dir,
            offline: self.offline,
            verbose: self.verbose,
            max_concurrent: self.max_concurrent,
            fetch_timeout: Duration::from_secs(self.timeout),
            site_rules: !self.no_site_rules,
            ..ConvertConfig::default()
        };
        (config, self.json)
    }
}
