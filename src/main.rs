mod ai;
mod app;
mod config;
mod conversations;
mod error;
mod gateway;
mod identity;
mod prompting;
mod reconcile;
mod responder;
mod store;
#[cfg(test)]
mod testing;
mod transfer;
mod types;
mod webhook;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = app::run().await {
        tracing::error!("server exited: {err}");
        std::process::exit(1);
    }
}
