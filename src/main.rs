use anyhow::Result;
use clap::Parser;
use newsletter_analyst::auth;
use newsletter_analyst::cli::{self, Cli, Commands};
use newsletter_analyst::config::Config;
use newsletter_analyst::error::NewsletterError;
use newsletter_analyst::pipeline::{self, Pipeline, RunReport};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Exit with proper code on error
    match run().await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("\nFor help, run: newsletter-analyst --help");
            process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default_directives = if verbose {
        "newsletter_analyst=debug,info"
    } else {
        "newsletter_analyst=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(false)
        .with_line_number(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Returns whether the command succeeded
async fn run() -> Result<bool> {
    // Install default crypto provider for rustls
    // On non-Windows platforms, use aws-lc-rs; on Windows, use ring
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    match &cli.command {
        Commands::Run => {
            let pipeline = build_pipeline(&cli).await?;
            let result = pipeline::analyze_newsletter(&pipeline).await;

            println!("success: {}", result.success);
            println!("message: {}", result.message);
            Ok(result.success)
        }

        Commands::Launch => {
            let pipeline = Arc::new(build_pipeline(&cli).await?);
            let task = pipeline::launch_newsletter_analysis(pipeline);
            println!("Launched background task {}", task.id());

            match task.wait().await {
                Ok(RunReport::Delivered(delivery)) => {
                    println!(
                        "Task finished: report {} sent for newsletter {}",
                        delivery.report_message_id, delivery.newsletter_id
                    );
                    Ok(true)
                }
                Ok(RunReport::NothingToDo) => {
                    println!("Task finished: no unread newsletter, nothing to do");
                    Ok(true)
                }
                // already logged by the task runner
                Err(e) => {
                    println!("Task failed at {} stage: {}", e.stage(), e);
                    Ok(false)
                }
            }
        }

        Commands::Authorize {
            client_secrets,
            port,
            claim,
        } => {
            let config = Config::load(&cli.config).await?;
            let scopes = auth::consent_scopes(*claim || config.fetch.claim_after_fetch);

            tracing::info!("Starting OAuth consent flow with {:?}", client_secrets);
            let refresh_token = auth::authorize_installed_app(client_secrets, *port, &scopes).await?;

            println!("Authorization complete.");
            println!("Store this value as the google_refresh_token secret:");
            println!("{}", refresh_token);
            Ok(true)
        }

        Commands::CheckConfig => {
            let store = cli::load_secret_store(&cli.secrets).await?;

            println!("Secrets:");
            for status in cli::secret_report(&store) {
                let state = match (&status.preview, status.configured) {
                    (Some(preview), _) => format!("set ({})", preview),
                    (None, true) => "set".to_string(),
                    (None, false) => "missing".to_string(),
                };
                println!("  {:<24} {}", status.key, state);
            }

            let missing = cli::missing_required_secrets(&store);
            let mut ok = missing.is_empty();
            if !ok {
                println!("\nRequired secrets missing: {}", missing.join(", "));
            }

            match Config::load(&cli.config).await {
                Ok(config) => {
                    println!("\nConfiguration {:?} is valid", cli.config);
                    println!("  model: {}", config.analysis.model);
                    println!("  body preference: {:?}", config.fetch.body_preference);
                    println!("  claim after fetch: {}", config.fetch.claim_after_fetch);
                }
                Err(e) => {
                    println!("\nConfiguration {:?} is invalid: {}", cli.config, e);
                    ok = false;
                }
            }

            Ok(ok)
        }

        Commands::InitConfig { output, force } => {
            let output = output.clone().unwrap_or_else(|| cli.config.clone());
            tracing::info!("Generating example configuration file");

            if output.exists() && !*force {
                return Err(NewsletterError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(&output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nSecrets are not read from this file. Provide them in {:?}", cli.secrets);
            println!("or as NEWSLETTER_* environment variables.");
            Ok(true)
        }
    }
}

async fn build_pipeline(args: &Cli) -> Result<Pipeline> {
    let config = Config::load(&args.config).await?;
    let store = cli::load_secret_store(&args.secrets).await?;
    Ok(Pipeline::from_secrets(&config, Arc::new(store))?)
}
