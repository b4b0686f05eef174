use anyhow::Result;
use clap::Parser;
use colored::*;
use tracing_subscriber::EnvFilter;

use inostar::{ConvertCommand, Converter};

#[tokio::main]
async fn main() -> Result<()> {
    let args = ConvertCommand::parse();

    if args.about {
        println!("Visit https://github.com/gonejack/inostar");
        return Ok(());
    }

    let default_level = if args.verbose { "inostar=debug" } else { "inostar=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let (config, paths) = args.into_config();
    if config.offline {
        println!("📁 Images directory: {:?}", config.images_dir);
        println!("⚡ Max concurrent downloads: {}", config.max_concurrent);
    }

    let converter = Converter::new(config)?;
    let summary = converter.execute(&paths).await?;

    println!(
        "📊 Items converted: {}, failed: {}",
        summary.items_converted.to_string().green(),
        summary.items_failed.to_string().red()
    );
    if summary.images_downloaded + summary.images_skipped + summary.images_failed > 0 {
        println!(
            "🖼️  Images downloaded: {}, skipped: {}, failed: {}",
            summary.images_downloaded.to_string().green(),
            summary.images_skipped.to_string().blue(),
            summary.images_failed.to_string().red()
        );
    }

    if summary.files_failed > 0 {
        anyhow::bail!("{} json file(s) could not be read", summary.files_failed);
    }

    println!("✅ Conversion completed successfully!");
    Ok(())
}
