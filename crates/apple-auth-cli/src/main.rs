//! Operator CLI for Sign in with Apple.
//!
//! Mints client secrets, verifies identity tokens and drives the provider's
//! token, revocation and user migration endpoints. Configuration comes from
//! the environment (see [`config::CliConfig`]); logs go to stderr so stdout
//! stays pipeable.

mod config;

use anyhow::Context;
use apple_auth::secret::{ExposeSecret, SecretString};
use apple_auth::{generate_client_assertion, AppleIdClient, ClientAssertion, ProviderGateway};
use chrono::Utc;
use clap::{Parser, Subcommand};
use config::CliConfig;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "apple-auth")]
#[command(version, about = "Sign in with Apple operator tool", long_about = None)]
#[command(after_help = "\
Environment:
  APPLE_KEY_ID, APPLE_CLIENT_ID, APPLE_TEAM_ID, APPLE_PRIVATE_KEY_PATH (required)
  APPLE_BASE_URL, APPLE_REDIRECT_URI, APPLE_CLOCK_SKEW_SECONDS (optional)
  RUST_LOG (log filter, default apple_auth=info)")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Print a freshly signed client secret
    ClientSecret,

    /// List the provider's current signing key ids
    Keys,

    /// Verify an identity token and print its claims
    Verify { id_token: String },

    /// Exchange an authorization code (web flow when APPLE_REDIRECT_URI is set)
    ValidateCode { code: String },

    /// Validate a refresh token
    Refresh { refresh_token: String },

    /// Revoke a refresh token
    Revoke { refresh_token: String },

    /// Generate transfer identifiers for users moving to another team
    Migrate {
        recipient_team_id: String,

        #[arg(required = true)]
        subs: Vec<String>,
    },

    /// Exchange transfer identifiers received from another team
    Exchange {
        #[arg(required = true)]
        transfer_subs: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "apple_auth=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = CliConfig::from_env().map_err(|e| {
        error!(target: "apple_auth.cli", error = %e, "Failed to load configuration");
        e
    })?;
    info!(
        target: "apple_auth.cli",
        client_id = %config.client_id,
        base_url = %config.base_url,
        "Loaded configuration"
    );

    run(cli.command, &config).await
}

async fn run(command: Command, config: &CliConfig) -> anyhow::Result<()> {
    match command {
        Command::ClientSecret => {
            let assertion = mint_assertion(config)?;
            println!("{}", assertion.token().expose_secret());
            eprintln!("expires at {}", assertion.expires_at().to_rfc3339());
        }
        Command::Keys => {
            let client = AppleIdClient::new(config.client_config())
                .await
                .context("failed to fetch signing keys")?;
            let snapshot = client.current_keys();
            for kid in snapshot.key_ids() {
                println!("{kid}");
            }
            client.close().await;
        }
        Command::Verify { id_token } => {
            let client = AppleIdClient::new(config.client_config())
                .await
                .context("failed to fetch signing keys")?;
            let result = client.verify(&id_token);
            client.close().await;
            print_claims(&result.context("identity token rejected")?);
        }
        Command::ValidateCode { code } => {
            let assertion = mint_assertion(config)?;
            let gateway = gateway(config)?;
            let response = match &config.redirect_uri {
                Some(redirect_uri) => {
                    gateway
                        .validate_web_token(&config.client_id, assertion.token(), &code, redirect_uri)
                        .await
                }
                None => {
                    gateway
                        .validate_app_token(&config.client_id, assertion.token(), &code)
                        .await
                }
            }
            .context("authorization code rejected")?;

            if let Some(refresh_token) = &response.refresh_token {
                println!("refresh_token: {}", refresh_token.expose_secret());
            }
            if let Some(expires_in) = response.expires_in {
                println!("expires_in: {expires_in}");
            }
            if let Some(id_token) = &response.id_token {
                let client = AppleIdClient::new(config.client_config())
                    .await
                    .context("failed to fetch signing keys")?;
                let result = client.verify(id_token.expose_secret());
                client.close().await;
                print_claims(&result.context("returned identity token rejected")?);
            }
        }
        Command::Refresh { refresh_token } => {
            let assertion = mint_assertion(config)?;
            let response = gateway(config)?
                .validate_refresh_token(
                    &config.client_id,
                    assertion.token(),
                    &SecretString::from(refresh_token),
                )
                .await
                .context("refresh token rejected")?;
            println!(
                "valid, access token expires in {}s",
                response.expires_in.unwrap_or_default()
            );
        }
        Command::Revoke { refresh_token } => {
            let assertion = mint_assertion(config)?;
            gateway(config)?
                .revoke_refresh_token(
                    &config.client_id,
                    assertion.token(),
                    &SecretString::from(refresh_token),
                )
                .await
                .context("revocation failed")?;
            println!("revoked");
        }
        Command::Migrate {
            recipient_team_id,
            subs,
        } => {
            let assertion = mint_assertion(config)?;
            let gateway = gateway(config)?;
            let access_token = migration_access_token(&gateway, config, &assertion).await?;
            for sub in &subs {
                let transfer_sub = gateway
                    .generate_transfer_sub(
                        &config.client_id,
                        assertion.token(),
                        &access_token,
                        sub,
                        &recipient_team_id,
                    )
                    .await
                    .with_context(|| format!("failed to generate transfer identifier for {sub}"))?;
                println!("{sub}\t{transfer_sub}");
            }
        }
        Command::Exchange { transfer_subs } => {
            let assertion = mint_assertion(config)?;
            let gateway = gateway(config)?;
            let access_token = migration_access_token(&gateway, config, &assertion).await?;
            for transfer_sub in &transfer_subs {
                let exchanged = gateway
                    .exchange_identifier(
                        &config.client_id,
                        assertion.token(),
                        &access_token,
                        transfer_sub,
                    )
                    .await
                    .with_context(|| format!("failed to exchange {transfer_sub}"))?;
                println!(
                    "{transfer_sub}\t{}\t{}",
                    exchanged.sub,
                    exchanged.email.as_deref().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}

fn mint_assertion(config: &CliConfig) -> anyhow::Result<ClientAssertion> {
    let credential = config.load_credential()?;
    let assertion = generate_client_assertion(&credential, Utc::now())
        .context("failed to sign client secret")?;
    info!(
        target: "apple_auth.cli",
        key_id = %credential.key_id,
        expires_at = %assertion.expires_at(),
        "Client secret generated"
    );
    Ok(assertion)
}

fn gateway(config: &CliConfig) -> anyhow::Result<ProviderGateway> {
    ProviderGateway::new(config.client_config().gateway_config())
        .context("failed to build HTTP client")
}

async fn migration_access_token(
    gateway: &ProviderGateway,
    config: &CliConfig,
    assertion: &ClientAssertion,
) -> anyhow::Result<SecretString> {
    gateway
        .obtain_migration_access_token(&config.client_id, assertion.token())
        .await
        .context("failed to obtain migration access token")?
        .access_token
        .context("provider returned no migration access token")
}

fn print_claims(claims: &apple_auth::VerifiedClaims) {
    println!("iss: {}", claims.iss);
    println!("aud: {}", claims.aud);
    println!("sub: {}", claims.sub);
    println!("iat: {}", claims.iat);
    println!("exp: {}", claims.exp);
    if let Some(email) = claims.verified_email() {
        println!("email: {email}");
    }
    if let Some(private) = claims.is_private_email {
        println!("is_private_email: {private}");
    }
    if let Some(status) = claims.real_user_status {
        println!("real_user_status: {status}");
    }
}
