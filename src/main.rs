//! dynaconn - Main entry point.
//!
//! Command line front end for the instance registry.

use dynaconn::config::{Command, Config, parse_assignment};
use dynaconn::models::{InstanceConfig, Section};
use dynaconn::InstanceRegistry;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // Logs go to stderr so command output stays pipeable.
    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run(registry: &InstanceRegistry, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::List => {
            for name in registry.list_names().await {
                println!("{}", name);
            }
        }
        Command::Add {
            name,
            source,
            username,
            password,
            host,
            port,
            base,
            overwrite,
        } => {
            let section = InstanceConfig::network(source, username, password, host, port, base)
                .to_section();
            registry.add_instance(&name, &section, overwrite).await?;
            println!("Added '{}'", name);
        }
        Command::Update { name, assignments } => {
            let section = assignments
                .iter()
                .map(|s| parse_assignment(s))
                .collect::<Result<Section, String>>()?;
            registry.update_instance(&name, &section).await?;
            println!("Updated '{}'", name);
        }
        Command::Remove { name } => {
            registry.remove_instance(&name).await?;
            println!("Removed '{}'", name);
        }
        Command::Ping { name } => {
            if registry.ping(&name).await? {
                println!("{}: ok", name);
            } else {
                return Err(format!("{}: unreachable", name).into());
            }
        }
        Command::Tables { name } => {
            let models = registry.models(&name).await?;
            for (table, model) in models.iter() {
                println!("{}\t{}\t{}", table, model.type_name(), model.columns().len());
            }
        }
        Command::Rows { name, table } => {
            let model = registry.get_db_instance(&name, &table).await?;
            let handle = registry.get_handle(&name).await?;
            let rows = handle.read_all(&model).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    info!(
        config = %config.config_path.display(),
        "Starting dynaconn v{}",
        env!("CARGO_PKG_VERSION")
    );

    let registry = InstanceRegistry::open(config.registry_options()).await?;
    let result = run(&registry, config.command.clone()).await;
    registry.close().await;

    if let Err(e) = result {
        error!(error = %e, "Command failed");
        return Err(e);
    }
    Ok(())
}
