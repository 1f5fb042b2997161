use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tether::{EngineHandle, EngineNotification, TetherBuilder};
use tether_cli::{input::HELP, Config, Input, Renderer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load().context("Failed to load configuration")?;
    init_logging(&config);

    tracing::info!(ws_url = %config.engine.ws_url, api_url = %config.engine.api_url, "Starting Tether");

    let engine = TetherBuilder::new().config(config.engine.clone()).build()?;

    let printer = tokio::spawn(print_notifications(
        engine.subscribe(),
        Renderer::new(config.ui.show_thinking),
    ));

    if let Err(e) = engine.fetch_models().await {
        tracing::warn!("Failed to fetch models: {}", e);
    }

    if let Some(id) = std::env::args().nth(1) {
        if let Err(e) = engine.select_conversation(id.as_str()).await {
            eprintln!("[cannot open {}: {}]", id, e);
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = match Input::parse(&line) {
            Ok(input) => input,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        if input == Input::Quit {
            break;
        }
        if let Err(e) = run(&engine, input).await {
            eprintln!("[{}]", e);
        }
    }

    engine.shutdown().await?;
    printer.abort();
    tracing::info!("Tether stopped");
    Ok(())
}

async fn run(engine: &EngineHandle, input: Input) -> anyhow::Result<()> {
    match input {
        Input::Open(id) => engine.select_conversation(id).await?,
        Input::New(text) => {
            engine.start_new_conversation(text, None).await?;
        }
        Input::List => {
            engine.refresh_conversations().await?;
        }
        Input::Models => {
            engine.fetch_models().await?;
        }
        Input::Model(model) => engine.set_selected_model(model).await?,
        Input::Status => {
            let snapshot = engine.snapshot().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Input::Help => println!("{}", HELP),
        Input::Say(text) => engine.send_message(text).await?,
        Input::Quit | Input::Empty => {}
    }
    Ok(())
}

async fn print_notifications(
    mut notifications: broadcast::Receiver<EngineNotification>,
    mut renderer: Renderer,
) {
    let mut stdout = tokio::io::stdout();

    loop {
        match notifications.recv().await {
            Ok(notification) => {
                if let Some(text) = renderer.render(&notification) {
                    if stdout.write_all(text.as_bytes()).await.is_err() {
                        break;
                    }
                    let _ = stdout.flush().await;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Notification printer lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // stdout belongs to the conversation
    match config.logging.format.as_str() {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
    }
}
