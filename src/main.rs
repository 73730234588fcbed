use anyhow::Result;
use clap::Parser;

use livescribe::audio::device::list_input_devices;
use livescribe::cli::{Cli, Commands};
use livescribe::config::Config;
use livescribe::output;
use livescribe::pipeline::Pipeline;
use livescribe::types::PipelineEvent;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Devices) => {
            for (i, name) in list_input_devices()?.iter().enumerate() {
                println!("#{} {}", i, name);
            }
            Ok(())
        }
        None => run(cli).await,
    }
}

async fn run(cli: Cli) -> Result<()> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(Config::default_path);
    let config = cli.apply_to(Config::load_or_default(&path).with_env_overrides());

    let (mut events, handle) = Pipeline::new(config).start()?;

    // Ctrl-C requests a clean stop; the pipeline closes the event channel
    // after emitting its shutdown notification.
    let ctrl_c_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_handle.stop();
        }
    });

    let json = cli.json;
    while let Some(event) = events.recv().await {
        if json {
            println!("{}", event.to_json());
        } else {
            output::render(&event);
        }
        if matches!(&event, PipelineEvent::Info { text } if text == "pipeline_stopped") {
            break;
        }
    }

    Ok(())
}
