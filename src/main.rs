use clap::{Arg, ArgAction, ArgMatches, Command};
use log::{error, LevelFilter};
use serde::Serialize;
use std::error::Error;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;

use fount_auth::auth::jwt::{email_from_token, is_token_expired, user_sub_from_token};
use fount_auth::auth::{AuthResponse, AuthService, CognitoClient, TokenRecord, TokenStore};
use fount_auth::config::{AppConfig, StorageBackend};
use fount_auth::handoff::{DynamoHandoffStore, HandoffFlow, HandoffGrant};
use fount_auth::session::{SessionManager, SessionState};
use fount_auth::storage::{FileStore, KeyValueStore, KeyringStore, MemoryStore};
use fount_auth::utils::io::{prompt, prompt_secret, prompt_with_confirmation, read_line};
use fount_auth::utils::logging::initialize_logging;
use fount_auth::utils::time::{format_duration, format_timestamp_millis};

/// What sign-in and refresh report back; the tokens themselves stay in storage
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionSummary {
    expires_at: Option<u64>,
    sub: Option<String>,
    email: Option<String>,
}

impl From<&TokenRecord> for SessionSummary {
    fn from(tokens: &TokenRecord) -> Self {
        Self {
            expires_at: tokens.expires_at,
            sub: user_sub_from_token(&tokens.id_token),
            email: email_from_token(&tokens.id_token),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HandoffOutput {
    #[serde(flatten)]
    grant: HandoffGrant,
    redirect_url: String,
}

fn cli() -> Command {
    let email = || {
        Arg::new("email")
            .long("email")
            .help("Account email address")
            .required(true)
    };
    let code = || {
        Arg::new("code")
            .long("code")
            .help("Verification code from the email")
            .required(true)
    };

    Command::new("fount-auth")
        .about("Sign in to Fount and hand the session to the desktop app")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .help("JSON configuration file"),
        )
        .arg(
            Arg::new("store")
                .long("store")
                .global(true)
                .value_name("BACKEND")
                .value_parser(["file", "keyring", "memory"])
                .help("Where tokens are kept"),
        )
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .global(true)
                .value_name("DIR")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Directory for the file token store"),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .global(true)
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Append logs to this file instead of stderr"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Debug logging"),
        )
        .subcommand(Command::new("sign-up").about("Create an account").arg(email()))
        .subcommand(
            Command::new("confirm-sign-up")
                .about("Confirm a new account")
                .arg(email())
                .arg(code()),
        )
        .subcommand(Command::new("sign-in").about("Sign in with email and password").arg(email()))
        .subcommand(
            Command::new("forgot-password")
                .about("Send a password reset code")
                .arg(email()),
        )
        .subcommand(
            Command::new("confirm-forgot-password")
                .about("Set a new password with a reset code")
                .arg(email())
                .arg(code()),
        )
        .subcommand(Command::new("change-password").about("Change the signed-in user's password"))
        .subcommand(Command::new("sign-out").about("Sign out everywhere and forget local tokens"))
        .subcommand(
            Command::new("delete-account")
                .about("Delete the signed-in account")
                .arg(
                    Arg::new("yes")
                        .long("yes")
                        .action(ArgAction::SetTrue)
                        .help("Skip the confirmation prompt"),
                ),
        )
        .subcommand(Command::new("refresh").about("Refresh the stored tokens now"))
        .subcommand(Command::new("status").about("Show the stored session"))
        .subcommand(Command::new("whoami").about("Show the signed-in user"))
        .subcommand(Command::new("watch").about("Keep tokens fresh until Enter is pressed"))
        .subcommand(
            Command::new("handoff")
                .about("Complete a desktop sign-in and print the redirect URL")
                .arg(
                    Arg::new("session")
                        .long("session")
                        .help("Session id from the desktop app")
                        .required(true),
                )
                .arg(
                    Arg::new("email")
                        .long("email")
                        .help("Sign in with this account first"),
                ),
        )
}

fn load_config(matches: &ArgMatches) -> Result<AppConfig, Box<dyn Error>> {
    let mut config = AppConfig::load(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;
    if let Some(store) = matches.get_one::<String>("store") {
        config.storage = store.parse()?;
    }
    if let Some(dir) = matches.get_one::<PathBuf>("data-dir") {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

fn build_backend(config: &AppConfig) -> Arc<dyn KeyValueStore> {
    match config.storage {
        StorageBackend::File => Arc::new(FileStore::new(&config.data_dir)),
        StorageBackend::Keyring => Arc::new(KeyringStore::new()),
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
    }
}

fn print_response<T: Serialize>(response: &AuthResponse<T>) -> Result<i32, Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(if response.success { 0 } else { 1 })
}

fn respond<T: Serialize, E: Display>(result: Result<T, E>) -> Result<i32, Box<dyn Error>> {
    print_response(&AuthResponse::<T>::from(result))
}

fn show_status(manager: &SessionManager) {
    let tokens = manager.auth().token_store();
    match manager.state() {
        SessionState::Unauthenticated => println!("Not signed in"),
        state => {
            println!("Session: {:?}", state);
            if let Some(expires_at) = tokens.get().and_then(|t| t.expires_at) {
                println!("Access token expires: {}", format_timestamp_millis(expires_at));
                println!(
                    "Time remaining: {}",
                    format_duration(tokens.time_until_expiration())
                );
            }
            if let Some(id_token) = tokens.id_token() {
                if is_token_expired(&id_token, tokens.clock().now_millis()) {
                    println!("ID token has expired; run `refresh` before a desktop handoff");
                }
            }
        }
    }
}

fn run(matches: &ArgMatches) -> Result<i32, Box<dyn Error>> {
    let config = load_config(matches)?;
    config.log_warnings();

    let tokens = Arc::new(TokenStore::new(build_backend(&config)));
    let provider = Arc::new(CognitoClient::from_config(&config)?);
    let auth = Arc::new(AuthService::new(provider, tokens));
    let manager = SessionManager::new(auth.clone());

    let (name, sub) = matches
        .subcommand()
        .ok_or("a subcommand is required")?;
    let email = || {
        sub.get_one::<String>("email")
            .cloned()
            .unwrap_or_default()
    };
    let code = || sub.get_one::<String>("code").cloned().unwrap_or_default();

    match name {
        "sign-up" => {
            let password = prompt_secret("Password")?;
            respond(auth.sign_up(&email(), &password))
        }
        "confirm-sign-up" => respond(auth.confirm_sign_up(&email(), &code())),
        "sign-in" => {
            let password = prompt_secret("Password")?;
            respond(auth.sign_in(&email(), &password).map(|t| SessionSummary::from(&t)))
        }
        "forgot-password" => respond(auth.forgot_password(&email())),
        "confirm-forgot-password" => {
            let password = prompt_secret("New password")?;
            respond(auth.confirm_forgot_password(&email(), &code(), &password))
        }
        "change-password" => {
            let previous = prompt_secret("Current password")?;
            let proposed = prompt_secret("New password")?;
            respond(auth.change_password(&previous, &proposed))
        }
        "sign-out" => respond(auth.sign_out()),
        "delete-account" => {
            if !sub.get_flag("yes")
                && !prompt_with_confirmation(
                    "This permanently deletes your account.",
                    "Continue?",
                )?
            {
                println!("Cancelled");
                return Ok(1);
            }
            respond(auth.delete_account())
        }
        "refresh" => {
            respond(auth.refresh_tokens().map(|t| SessionSummary::from(&t)))
        }
        "status" => {
            show_status(&manager);
            Ok(0)
        }
        "whoami" => match auth.current_user() {
            Some(user) => {
                println!("{}", user.email.as_deref().unwrap_or(&user.sub));
                Ok(0)
            }
            None => {
                println!("Not signed in");
                Ok(1)
            }
        },
        "watch" => {
            if !manager.restore_session() {
                println!("Not signed in");
                return Ok(1);
            }
            let handle = manager.setup_auto_token_refresh();
            println!("Keeping the session fresh. Press Enter to stop.");
            read_line()?;
            handle.cancel();
            show_status(&manager);
            Ok(0)
        }
        "handoff" => {
            let session_id = sub
                .get_one::<String>("session")
                .cloned()
                .unwrap_or_default();

            if let Some(email) = sub.get_one::<String>("email") {
                let password = prompt_secret("Password")?;
                if let Err(e) = auth.sign_in(email, &password) {
                    return print_response(&AuthResponse::<()>::failure(e.to_string()));
                }
            } else if !manager.restore_session() {
                let email = prompt("Email")?;
                let password = prompt_secret("Password")?;
                if let Err(e) = auth.sign_in(&email, &password) {
                    return print_response(&AuthResponse::<()>::failure(e.to_string()));
                }
            }

            let Some(tokens) = auth.token_store().get() else {
                return print_response(&AuthResponse::<()>::failure("Not signed in"));
            };
            let flow = HandoffFlow::new(Arc::new(DynamoHandoffStore::from_config(&config)?));
            let result = flow.complete_flow(&session_id, &tokens).and_then(|grant| {
                let redirect_url = grant.redirect_url()?.to_string();
                Ok(HandoffOutput {
                    grant,
                    redirect_url,
                })
            });
            respond(result)
        }
        other => Err(format!("unknown command {}", other).into()),
    }
}

fn main() {
    let matches = cli().get_matches();

    let level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    if let Err(e) = initialize_logging(level, matches.get_one::<PathBuf>("log-file").map(PathBuf::as_path)) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let code = match run(&matches) {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            2
        }
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        cli().debug_assert();
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let matches = cli()
            .try_get_matches_from([
                "fount-auth",
                "handoff",
                "--session",
                "sess-1",
                "--store",
                "memory",
            ])
            .unwrap();
        let config = load_config(&matches).unwrap();
        assert_eq!(config.storage, StorageBackend::Memory);

        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "handoff");
        assert_eq!(sub.get_one::<String>("session").unwrap(), "sess-1");
    }

    #[test]
    fn test_email_is_required() {
        assert!(cli().try_get_matches_from(["fount-auth", "sign-in"]).is_err());
    }
}
