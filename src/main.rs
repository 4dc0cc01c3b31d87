use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use dotenvy::dotenv;
use tracing::{error, info};

mod config;
mod download;
mod error;
mod llm;
mod media;
mod state;
mod utils;

use config::Config;
use download::{save_download, DownloadPayload};
use llm::GeminiClient;
use state::Session;
use utils::logging::init_logging;

#[derive(Debug, PartialEq, Eq)]
struct RunArgs {
    target: PathBuf,
    user: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    count: usize,
}

fn usage() -> &'static str {
    "Usage: creaura --target <image> [--user <image>] [--out <dir>] [--count <n>]"
}

fn parse_args(args: &[String]) -> anyhow::Result<RunArgs> {
    let mut target: Option<PathBuf> = None;
    let mut user: Option<PathBuf> = None;
    let mut output_dir: Option<PathBuf> = None;
    let mut count = 1usize;

    let mut index = 1;
    while index < args.len() {
        match args[index].as_str() {
            "--target" | "-t" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --target"))?;
                target = Some(PathBuf::from(value));
            }
            "--user" | "-u" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --user"))?;
                user = Some(PathBuf::from(value));
            }
            "--out" | "-o" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --out"))?;
                output_dir = Some(PathBuf::from(value));
            }
            "--count" | "-n" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --count"))?;
                count = value
                    .parse::<usize>()
                    .map_err(|_| anyhow!("Invalid --count value: {value}"))?
                    .max(1);
            }
            "--help" | "-h" => {
                return Err(anyhow!(usage()));
            }
            other => {
                return Err(anyhow!("Unknown argument: {other}\n{}", usage()));
            }
        }
        index += 1;
    }

    let target = target.ok_or_else(|| anyhow!("--target is required\n{}", usage()))?;
    Ok(RunArgs {
        target,
        user,
        output_dir,
        count,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args: Vec<String> = std::env::args().collect();
    let run_args = parse_args(&args)?;

    let config = Config::load().context("Cannot start without a Gemini API key")?;
    let _guards = init_logging(&config);
    info!(
        "Starting Creaura (analysis model {}, image model {})",
        config.analysis_model, config.image_model
    );

    let client = Arc::new(GeminiClient::new(&config)?);
    let session = Session::new(client.clone(), client);

    if let Err(err) = session.upload_target(&run_args.target).await {
        error!("Style analysis failed: {err}");
        return Err(anyhow!(err));
    }
    let snapshot = session.snapshot();
    if let Some(description) = snapshot.style_description.as_deref() {
        println!("Style description:\n{description}\n");
    }

    let Some(user) = run_args.user else {
        return Ok(());
    };
    session.upload_user(user)?;
    if !session.snapshot().can_generate() {
        return Err(anyhow!("Session is not ready to generate"));
    }

    let output_dir = run_args.output_dir.unwrap_or(config.output_dir.clone());
    let mut failures = 0usize;
    for attempt in 1..=run_args.count {
        println!("{} ({attempt}/{})", session.status().button_label(), run_args.count);
        match session.generate().await {
            Ok(image) => {
                let path = save_download(
                    &output_dir,
                    &config.download_prefix,
                    image.id,
                    DownloadPayload::DataUri(image.data_uri()),
                )
                .await?;
                println!("Saved {}", path.display());
            }
            Err(err) => {
                failures += 1;
                eprintln!("{err}");
            }
        }
    }

    let history = session.snapshot().history;
    info!(
        "Session finished: {} image(s) generated, {} failure(s)",
        history.len(),
        failures
    );
    if history.is_empty() {
        return Err(anyhow!("No image was generated"));
    }
    Ok(())
}
