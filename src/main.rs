use std::panic;

use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

use grader::config::GraderConfig;
use grader::jobs::{Grader, Job, JobError};

/// Reads one JSON job from stdin and prints the JSON result on stdout.
#[tokio::main]
async fn main() -> Result<(), JobError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    set_panic_hook();

    let config = GraderConfig::from_env()?;
    tracing::debug!("Configuration: {:?}", config);
    let grader = Grader::from_config(&config);

    let mut raw = String::new();
    tokio::io::stdin().read_to_string(&mut raw).await?;
    let job = Job::from_json(&raw)?;

    let response = grader.execute(job).await;
    println!("{response}");

    Ok(())
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
