use clap::{Parser, Subcommand, ValueEnum};
use identity_service::{
    config::IdentityConfig,
    db::create_pool,
    models::PersonalAccessToken,
    services::Database,
    IdentityServices,
};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "identity-admin")]
#[command(version, about = "Personal access token administration", long_about = None)]
struct Cli {
    /// Output format
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// List personal access tokens of a tenant, or of one user in it
    List {
        #[arg(long)]
        tenant: i64,
        #[arg(long)]
        user: Option<i64>,
    },
    /// Revoke a token by id
    Revoke { token_id: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "identity-admin failed");
        eprintln!("error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let config = IdentityConfig::from_env()?;
    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    let pool = create_pool(&config.database)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
    let db = Database::new(pool);
    db.health_check().await?;
    let services = IdentityServices::new(&db, &config);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Command::List { tenant, user } => {
            let tokens = match user {
                Some(user) => {
                    services
                        .personal_access_tokens
                        .get_user_tokens(tenant, user, &cancel)
                        .await?
                }
                None => {
                    services
                        .personal_access_tokens
                        .get_tokens(tenant, &cancel)
                        .await?
                }
            };
            print_tokens(&tokens, cli.format)?;
        }
        Command::Revoke { token_id } => {
            let revoked = services
                .personal_access_tokens
                .revoke_token(&token_id, &cancel)
                .await?;
            if !revoked {
                return Err(AppError::NotFound(anyhow::anyhow!(
                    "Token {} was not revoked",
                    token_id
                )));
            }
            println!("revoked {}", token_id);
        }
    }
    Ok(())
}

fn print_tokens(tokens: &[PersonalAccessToken], format: OutputFormat) -> Result<(), AppError> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(tokens)
                .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;
            println!("{}", json);
        }
        OutputFormat::Text => {
            for token in tokens {
                let expiry = token
                    .token_expiry
                    .map(|e| e.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    token.token_id, token.tenant_id, token.user_id, token.name, expiry, token.description
                );
            }
        }
    }
    Ok(())
}
