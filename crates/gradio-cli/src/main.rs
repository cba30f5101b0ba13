use clap::{ArgAction, Parser, Subcommand};
use gradio_client::{
    Argument, BoxError, Client, ClientError, ClientOptions, Endpoint, EndpointSelector,
    LifecycleEvent,
};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gradio-cli")]
#[command(about = "Call the endpoints of a remote Gradio app")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the endpoints advertised by the server config.
    Endpoints(ConnectArgs),
    /// Submit one call and print its output.
    Predict(PredictArgs),
}

#[derive(clap::Args, Debug)]
struct ConnectArgs {
    #[arg(long)]
    src: String,
    /// Overrides HF_TOKEN from the environment.
    #[arg(long)]
    hf_token: Option<String>,
    /// Zero waits forever.
    #[arg(long)]
    read_timeout_secs: Option<u64>,
}

#[derive(clap::Args, Debug)]
struct PredictArgs {
    #[command(flatten)]
    connect: ConnectArgs,
    #[arg(long)]
    api_name: Option<String>,
    #[arg(long)]
    fn_index: Option<usize>,
    /// JSON value, plain string, or `@path` for a file.
    #[arg(long = "arg")]
    args: Vec<String>,
    #[arg(long, action = ArgAction::SetTrue)]
    raw: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    events: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Endpoints(args) => endpoints_command(args).await,
        Commands::Predict(args) => predict_command(args).await,
    };

    match result {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(exit_status(&error))
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn endpoints_command(args: ConnectArgs) -> Result<ExitCode, ClientError> {
    let client = Client::connect(client_options(&args)).await?;
    for endpoint in client.endpoints().iter() {
        println!(
            "{}\t{}\t{}",
            endpoint.index,
            endpoint.api_name.as_deref().unwrap_or("-"),
            route_label(endpoint)
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn route_label(endpoint: &Endpoint) -> &'static str {
    if !endpoint.backend_fn {
        "frontend"
    } else if endpoint.skips_queue {
        "direct"
    } else {
        "queue"
    }
}

async fn predict_command(args: PredictArgs) -> Result<ExitCode, ClientError> {
    let selector = EndpointSelector::from_parts(args.api_name.as_deref(), args.fn_index)?;
    let arguments: Vec<Argument> = args.args.iter().map(|raw| parse_argument(raw)).collect();
    tracing::debug!(?selector, arguments = arguments.len(), "predict");

    let mut client = Client::connect(client_options(&args.connect)).await?;
    if args.events {
        client.subscribe_all(Arc::new(print_event));
    }

    let output = if args.raw {
        client.predict_raw(selector, arguments).await?
    } else {
        serde_json::to_value(client.predict(selector, arguments).await?)?
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(ExitCode::SUCCESS)
}

fn client_options(args: &ConnectArgs) -> ClientOptions {
    let mut options = ClientOptions::from_env(args.src.clone());
    if let Some(token) = &args.hf_token {
        options = options.with_hf_token(token.clone());
    }
    if let Some(secs) = args.read_timeout_secs {
        options = options.with_read_timeout((secs > 0).then(|| Duration::from_secs(secs)));
    }
    options
}

fn parse_argument(raw: &str) -> Argument {
    if let Some(path) = raw.strip_prefix('@') {
        return Argument::file(PathBuf::from(path));
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => Argument::Value(value),
        Err(_) => Argument::Value(Value::String(raw.to_string())),
    }
}

fn print_event(event: &LifecycleEvent) -> Result<(), BoxError> {
    eprintln!("{}", serde_json::to_string(event)?);
    Ok(())
}

/// Queue-full exits with 3 so scripts can retry; everything else is 1.
fn exit_status(error: &ClientError) -> u8 {
    if error.is_queue_full() { 3 } else { 1 }
}
