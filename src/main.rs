//! Command-line front end for ADRoster.
//!
//! Subcommands map one-to-one onto the library services: permission check,
//! roster synchronization, password reset, credential management and roster
//! listing.

use adroster::config::AppSettings;
use adroster::core::{
    validate_credentials, AggregatePolicy, CredentialStore, PasswordResetService,
    PermissionVerifier, RosterStore, SecretVault, SynchronizationCoordinator,
};
use adroster::logger::{FileLogSink, LogSink, MemoryLogSink, TeeLogSink};
use adroster::models::{Credential, GroupSet, ProgressReport, SecureString, UserRecord, Username};
use adroster::platform::LdapDirectory;
use adroster::store::{JsonCredentialStore, JsonRosterStore};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "adroster",
    version,
    about = "Reset-permission checks and roster synchronization for Active Directory"
)]
struct Cli {
    /// Data directory (credentials, roster, logs)
    #[arg(long, global = true, env = "ADROSTER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Use LDAPS (port 636 unless --port is given)
    #[arg(long, global = true)]
    ldaps: bool,

    #[arg(long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check whether an account can reset passwords in the given groups.
    Check {
        #[arg(short, long)]
        domain: String,

        #[arg(short, long)]
        username: String,

        #[arg(short, long, env = "ADROSTER_PASSWORD", hide_env_values = true)]
        password: String,

        /// Target group (repeatable)
        #[arg(short, long = "group", required = true)]
        groups: Vec<String>,

        /// "strict" or "per-group"
        #[arg(long)]
        policy: Option<AggregatePolicy>,

        #[arg(long)]
        sample_size: Option<usize>,

        /// Seed for member sampling, for reproducible runs
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Fetch every configured group roster and save the merged user list.
    Sync {
        /// Per-group fetch timeout in seconds
        #[arg(long)]
        task_timeout: Option<u64>,
    },

    /// Reset an account to the temporary password of a date.
    Reset {
        #[arg(short, long)]
        domain: String,

        #[arg(short, long)]
        account: String,

        /// Date used for the temporary password (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Show when an account's password was last set.
    LastSet {
        #[arg(short, long)]
        domain: String,

        #[arg(short, long)]
        account: String,
    },

    /// Manage stored administrative credentials.
    Credentials {
        #[command(subcommand)]
        action: CredentialAction,
    },

    /// List the synchronized roster.
    Users {
        /// Case-insensitive match on account or display name
        #[arg(short, long)]
        filter: Option<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum CredentialAction {
    /// Add or replace a credential.
    Add {
        #[arg(short, long)]
        domain: String,

        #[arg(short, long)]
        username: String,

        #[arg(short, long, env = "ADROSTER_PASSWORD", hide_env_values = true)]
        password: String,

        /// Group to synchronize with this credential (repeatable)
        #[arg(short, long = "group")]
        groups: Vec<String>,

        /// Store without a test bind
        #[arg(long, default_value_t = false)]
        no_verify: bool,
    },
    /// List stored credentials (secrets are never shown).
    List,
    /// Remove every stored credential.
    Clear,
}

struct App {
    settings: AppSettings,
    log: Arc<dyn LogSink>,
    errors: Arc<MemoryLogSink>,
    provider: Arc<LdapDirectory>,
    credentials: Arc<dyn CredentialStore>,
    roster: Arc<dyn RosterStore>,
}

impl App {
    fn new(settings: AppSettings) -> Self {
        let errors = Arc::new(MemoryLogSink::new());
        let file: Arc<dyn LogSink> = Arc::new(FileLogSink::new(
            settings.log_dir(),
            settings.verbose_logging,
        ));
        let log: Arc<dyn LogSink> = Arc::new(TeeLogSink::new(vec![
            file,
            errors.clone() as Arc<dyn LogSink>,
        ]));

        let provider = Arc::new(LdapDirectory::new(settings.ldap.clone(), log.clone()));
        let credentials: Arc<dyn CredentialStore> = Arc::new(JsonCredentialStore::new(
            settings.credentials_path(),
            secret_vault(&settings),
            log.clone(),
        ));
        let roster: Arc<dyn RosterStore> =
            Arc::new(JsonRosterStore::new(settings.user_list_path(), log.clone()));

        App {
            settings,
            log,
            errors,
            provider,
            credentials,
            roster,
        }
    }
}

#[cfg(windows)]
fn secret_vault(_settings: &AppSettings) -> Arc<dyn SecretVault> {
    Arc::new(adroster::platform::WindowsCredentialManager::new())
}

#[cfg(not(windows))]
fn secret_vault(settings: &AppSettings) -> Arc<dyn SecretVault> {
    Arc::new(adroster::store::FileSecretVault::new(settings.secrets_path()))
}

fn target_user(domain: &str, account: &str) -> UserRecord {
    UserRecord {
        domain: domain.trim().to_string(),
        account_name: account.trim().to_string(),
        ..Default::default()
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut settings = AppSettings::from_env()?;
    if let Some(dir) = cli.data_dir {
        settings = AppSettings {
            data_dir: dir,
            ..settings
        };
    }
    if cli.ldaps {
        settings.ldap.use_ldaps = true;
        settings.ldap.port = adroster::constants::LDAPS_PORT;
    }
    if let Some(port) = cli.port {
        settings.ldap.port = port;
    }

    let app = App::new(settings);
    tracing::debug!(data_dir = %app.settings.data_dir.display(), "settings loaded");

    match cli.command {
        Commands::Check {
            domain,
            username,
            password,
            groups,
            policy,
            sample_size,
            seed,
        } => {
            let mut options = app.settings.permission.clone();
            if let Some(policy) = policy {
                options.policy = policy;
            }
            if let Some(size) = sample_size {
                options.sample_size = size.max(1);
            }
            options.seed = seed.or(options.seed);

            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            let printer = tokio::spawn(async move {
                while let Some(line) = rx.recv().await {
                    eprintln!("{}", line);
                }
            });

            let verifier = PermissionVerifier::new(app.provider.clone(), app.log.clone())
                .with_options(options)
                .with_output(tx);
            let secret = SecureString::new(password);
            let result = verifier
                .run_permission_check(&domain, &username, &secret, &groups)
                .await;
            drop(verifier);
            let _ = printer.await;

            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.is_successful {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Sync { task_timeout } => {
            let mut options = app.settings.sync.clone();
            if let Some(secs) = task_timeout {
                options.task_timeout = (secs > 0).then(|| std::time::Duration::from_secs(secs));
            }

            let coordinator = SynchronizationCoordinator::new(
                app.provider.clone(),
                app.credentials.clone(),
                app.roster.clone(),
                app.log.clone(),
            )
            .with_options(options);

            let progress = |r: &ProgressReport| eprintln!("[{:>3}%] {}", r.percent, r.activity);
            let users = coordinator.sync(&progress).await;
            println!("{} unique users", users.len());

            if app.errors.has_errors() {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Reset {
            domain,
            account,
            date,
        } => {
            let service = PasswordResetService::new(
                app.provider.clone(),
                app.credentials.clone(),
                app.log.clone(),
                app.settings.temp_password_prefix.clone(),
            );
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            let password = service.reset(&target_user(&domain, &account), date).await?;
            println!(
                "Temporary password for {}\\{}: {}",
                domain,
                account,
                password.as_str()
            );
            println!("The user must change it at next logon.");
        }

        Commands::LastSet { domain, account } => {
            let service = PasswordResetService::new(
                app.provider.clone(),
                app.credentials.clone(),
                app.log.clone(),
                app.settings.temp_password_prefix.clone(),
            );
            match service
                .last_password_set(&target_user(&domain, &account))
                .await?
            {
                Some(at) => println!("{}", at.with_timezone(&Local).format("%d.%m.%Y %H:%M")),
                None => println!("never (or change required at next logon)"),
            }
        }

        Commands::Credentials { action } => match action {
            CredentialAction::Add {
                domain,
                username,
                password,
                groups,
                no_verify,
            } => {
                let credential = Credential::new(
                    domain,
                    Username::new(username)?,
                    SecureString::new(password),
                    groups.iter().collect::<GroupSet>(),
                );
                if no_verify {
                    adroster::core::validate_credentials_basic(&credential)?;
                } else {
                    validate_credentials(app.provider.as_ref(), &credential).await?;
                }

                let profile = credential.profile();
                let mut stored = app.credentials.load().await?;
                stored.retain(|c| c.profile() != profile);
                stored.push(credential);
                app.credentials.save(&stored).await?;
                println!("Stored {} credential(s).", stored.len());
            }
            CredentialAction::List => {
                for credential in app.credentials.load().await? {
                    let groups: Vec<&str> =
                        credential.groups().iter().map(String::as_str).collect();
                    println!(
                        "{}\\{}  [{}]{}",
                        credential.domain(),
                        credential.username(),
                        groups.join(", "),
                        if credential.secret().is_empty() {
                            "  (no password stored)"
                        } else {
                            ""
                        }
                    );
                }
            }
            CredentialAction::Clear => {
                app.credentials.clear().await?;
                println!("All credentials removed.");
            }
        },

        Commands::Users { filter, json } => {
            let needle = filter.map(|f| f.trim().to_lowercase());
            let users: Vec<UserRecord> = app
                .roster
                .load_roster()
                .await?
                .into_iter()
                .filter(|u| match &needle {
                    Some(n) => {
                        u.account_name.to_lowercase().contains(n)
                            || u.display_name.to_lowercase().contains(n)
                    }
                    None => true,
                })
                .collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&users)?);
            } else {
                for user in &users {
                    println!("{}", user);
                }
                eprintln!("{} user(s)", users.len());
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
