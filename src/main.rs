use clap::Parser;
use codellama_instruct::app::{self, LoopExit};
use codellama_instruct::cli::Cli;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // stdout carries the conversation, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    llama_cpp_2::send_logs_to_tracing(llama_cpp_2::LogOptions::default().with_logs_enabled(verbose));
}

/// First Ctrl-C requests shutdown, the second one exits immediately
fn spawn_ctrl_c_handler(cancel: Arc<AtomicBool>) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for Ctrl-C: {}", e);
                return;
            }
            if cancel.swap(true, Ordering::SeqCst) {
                std::process::exit(130);
            }
            eprintln!("\nStopping... press Ctrl-C again to quit immediately.");
        }
    });
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cancel = Arc::new(AtomicBool::new(false));
    spawn_ctrl_c_handler(cancel.clone());

    match app::run(cli, cancel).await {
        Ok(LoopExit::Cancelled) => {
            tracing::info!("Cancelled");
            ExitCode::SUCCESS
        }
        Ok(LoopExit::EndOfInput) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
