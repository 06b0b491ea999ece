mod cli;
mod config;
mod output;

use std::io::{self, IsTerminal, Read};
use std::path::Path;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
#[cfg(feature = "colored-output")]
use colored::*;
use shiftsync::driver::webdriver::WebDriverFactory;
use shiftsync::{
    Credentials, FileSessionStore, MemorySessionStore, RetrievalError, RetrievalRequest,
    ScheduleRetriever, SessionCookies, SessionStore,
};
use tracing::{debug, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::cli::{Args, Commands, FetchArgs, OutputFormat};
use crate::config::AppConfig;
use crate::output::OutputManager;

#[tokio::main]
async fn main() {
    // A missing .env is fine; credentials may come from flags or the environment.
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let output_format = args.command.output();

    if let Err(e) = run(args).await {
        match output_format {
            Some(OutputFormat::Json) => println!("{}", error_json(&e)),
            _ => {
                error!("Application error: {:#}", e);
                #[cfg(feature = "colored-output")]
                {
                    eprintln!("{} {:#}", "Error:".red().bold(), e);
                    if let Some(hint) = error_hint(&e) {
                        eprintln!("{} {}", "Hint:".yellow(), hint);
                    }
                }
                #[cfg(not(feature = "colored-output"))]
                {
                    eprintln!("Error: {:#}", e);
                    if let Some(hint) = error_hint(&e) {
                        eprintln!("Hint: {}", hint);
                    }
                }
            }
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet);

    match args.command {
        Commands::Fetch(fetch_args) => {
            let config = AppConfig::load(args.config.as_deref())?;
            fetch(config, fetch_args).await?;
        }

        Commands::Config { show } => {
            let config = AppConfig::load(args.config.as_deref())?;
            if show {
                println!("{}", config.show()?);
            } else {
                let path = args.config.or_else(AppConfig::default_path);
                match path {
                    Some(path) => println!("Configuration file: {}", path.display()),
                    None => println!("No configuration directory on this platform"),
                }
                println!("Use --show to display the effective configuration");
            }
        }

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Args::command();
            let bin_name = cmd.get_name().to_string();
            generate(shell, &mut cmd, bin_name, &mut io::stdout());
        }
    }

    Ok(())
}

async fn fetch(config: AppConfig, args: FetchArgs) -> Result<()> {
    let credentials = Credentials::new(
        args.identifier.unwrap_or_default(),
        args.secret.unwrap_or_default(),
    )?;

    let mut request = RetrievalRequest::new(credentials);
    if let Some(path) = &args.cookies {
        let host = config.portal.portal_host()?;
        request = request.with_cookies(read_cookies(path, &host)?);
    }
    if let Some(period) = args.period {
        request = request.with_period(period);
    }

    let store: Arc<dyn SessionStore> = if args.no_store {
        Arc::new(MemorySessionStore::new())
    } else {
        let dir = config.session_dir();
        debug!(dir = %dir.display(), "Using session store");
        Arc::new(FileSessionStore::new(dir))
    };

    let factory = WebDriverFactory::new(&config.webdriver_url).headless(config.headless);
    let retriever = ScheduleRetriever::new(config.portal.clone(), Arc::new(factory), store)?;

    let result = retriever.retrieve(request).await?;
    info!(shifts = result.shifts.len(), "Fetched schedule");

    if let Some(path) = &args.save_cookies {
        let json = serde_json::to_string_pretty(&result.refreshed_cookies)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write cookies to {}", path.display()))?;
    }

    let colored = args.output == OutputFormat::Pretty && io::stdout().is_terminal();
    let rendered = OutputManager::new(colored).format_result(&result, args.output)?;
    println!("{}", rendered);
    Ok(())
}

/// Read a cookie jar saved by `--save-cookies`, or a `Cookie` header line.
fn read_cookies(path: &Path, host: &str) -> Result<SessionCookies> {
    let content = if path == Path::new("-") {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read cookies from {}", path.display()))?
    };

    let content = content.trim();
    if content.starts_with('[') {
        serde_json::from_str(content).context("invalid cookie JSON")
    } else {
        Ok(SessionCookies::parse_header(content, host))
    }
}

fn error_json(error: &anyhow::Error) -> serde_json::Value {
    let retrieval = error.downcast_ref::<RetrievalError>();
    serde_json::json!({
        "status": "error",
        "code": retrieval.map(RetrievalError::code).unwrap_or("cli"),
        "message": format!("{:#}", error),
        "retryable": retrieval.is_some_and(RetrievalError::is_retryable),
        "relogin": retrieval.is_some_and(RetrievalError::requires_relogin),
    })
}

fn error_hint(error: &anyhow::Error) -> Option<&'static str> {
    let error = error.downcast_ref::<RetrievalError>()?;
    if error.requires_relogin() {
        Some("check the identifier and secret before trying again")
    } else if error.is_retryable() {
        Some("the portal may be slow or busy; running the command again can succeed")
    } else {
        None
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("shiftsync=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shiftsync=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(verbose)
                .with_level(true),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_cookies_from_header_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");
        std::fs::write(&path, "PORTALSESSION=abc; theme=dark\n").unwrap();

        let cookies = read_cookies(&path, "schedule.example.org").unwrap();
        assert_eq!(cookies.len(), 2);
        assert_eq!(
            cookies.find_by_name("PORTALSESSION").unwrap().domain,
            "schedule.example.org"
        );
    }

    #[test]
    fn test_read_cookies_from_saved_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        let saved: SessionCookies =
            SessionCookies::parse_header("PORTALSESSION=abc", "schedule.example.org");
        std::fs::write(&path, serde_json::to_string(&saved).unwrap()).unwrap();

        assert_eq!(read_cookies(&path, "ignored").unwrap(), saved);
    }

    #[test]
    fn test_error_json_of_retrieval_errors() {
        let error = anyhow::Error::new(RetrievalError::ScheduleNotFound);
        let json = error_json(&error);
        assert_eq!(json["status"], "error");
        assert_eq!(json["code"], "schedule-not-found");
        assert_eq!(json["retryable"], false);
        assert_eq!(json["relogin"], false);

        let error = anyhow::Error::new(RetrievalError::login_flow("IdentifierForm"));
        let json = error_json(&error);
        assert_eq!(json["code"], "login-flow");
        assert_eq!(json["retryable"], true);

        let error = anyhow::Error::new(RetrievalError::InvalidCredentials("bad code".into()));
        let json = error_json(&error);
        assert_eq!(json["code"], "invalid-credentials");
        assert_eq!(json["relogin"], true);
        assert_eq!(json["retryable"], false);

        let json = error_json(&anyhow::anyhow!("boom"));
        assert_eq!(json["code"], "cli");
        assert_eq!(json["message"], "boom");
        assert_eq!(json["retryable"], false);
    }

    #[test]
    fn test_error_hints() {
        let relogin = anyhow::Error::new(RetrievalError::InvalidCredentials("bad code".into()));
        assert!(error_hint(&relogin).unwrap().contains("identifier and secret"));

        let retryable = anyhow::Error::new(RetrievalError::internal("retrieval timed out"));
        assert!(error_hint(&retryable).unwrap().contains("again"));

        assert!(error_hint(&anyhow::Error::new(RetrievalError::ScheduleNotFound)).is_none());
        assert!(error_hint(&anyhow::anyhow!("boom")).is_none());
    }
}
