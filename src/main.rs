//! Service skeleton entry point.

use clap::Parser;
use tokio::signal;

use service_skeleton::config::Environment;
use service_skeleton::Application;

// High-performance memory allocator for non-MSVC targets
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Backend service skeleton.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Runtime environment
    #[arg(long, value_enum, env = "APP_ENV", default_value_t = Environment::Dev)]
    env: Environment,
}

fn main() {
    let cli = Cli::parse();

    let mut app = Application::new();
    if let Err(e) = app.load_configuration(cli.env) {
        // Logging may not be installed yet.
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(1);
    }

    let workers = match app.config() {
        Ok(config) => config.max_workers,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to build the tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let code = runtime.block_on(run(app));
    std::process::exit(code);
}

/// Initializes, runs and tears down the application. Returns the exit code.
async fn run(mut app: Application) -> i32 {
    if let Err(e) = app.initialize_services().await {
        tracing::error!("Failed to initialize services: {}", e);
        app.cleanup().await;
        return 1;
    }

    let code = tokio::select! {
        result = app.run() => match result {
            Ok(summary) => {
                tracing::info!(?summary, "Application finished");
                0
            }
            Err(e) => {
                tracing::error!("Application failed: {}", e);
                1
            }
        },
        () = shutdown_signal() => 0,
    };

    app.shutdown().await;
    app.cleanup().await;
    code
}

/// Handles shutdown signals for graceful termination.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        },
    }
}
