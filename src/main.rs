//! ontario-law-rag CLI 진입점

use std::process::ExitCode;

use clap::Parser;
use ontario_law_rag::error::ValidationError;

fn main() -> ExitCode {
    // 로깅 초기화
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // CLI 실행
    let cli = ontario_law_rag::cli::Cli::parse();

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(anyhow::Error::from)
        .and_then(|rt| rt.block_on(ontario_law_rag::cli::run(cli)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<ValidationError>() {
            Some(v) => {
                eprintln!("invalid request: {}", v);
                ExitCode::from(2)
            }
            None => {
                eprintln!("internal error: {:#}", e);
                ExitCode::FAILURE
            }
        },
    }
}
