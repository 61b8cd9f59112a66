/// Postline - multi-account social post scheduler
///
/// Binary entrypoint: one process runs the HTTP API, the due-work leaser
/// and the lease watchdog.
use postline::{config::ServerConfig, context::AppContext, scheduler, server, SchedResult};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> SchedResult<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "postline=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    print_banner();

    // Load configuration
    let config = ServerConfig::from_env()?;

    // Create application context
    let ctx = AppContext::new(config).await?;
    let ctx = Arc::new(ctx);

    // Start the publishing engine loops
    let sched = Arc::new(scheduler::Scheduler::new(Arc::clone(&ctx)));
    Arc::clone(&sched).start();

    // Stop leasing new work on Ctrl-C; in-flight leases are reclaimed by
    // the watchdog on the next start
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            sched.shutdown();
        }
    });

    // Start server
    server::serve((*ctx).clone()).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
    ____             __  ___
   / __ \____  _____/ /_/ (_)___  ___
  / /_/ / __ \/ ___/ __/ / / __ \/ _ \
 / ____/ /_/ (__  ) /_/ / / / / /  __/
/_/    \____/____/\__/_/_/_/ /_/\___/

        Post scheduling engine v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
