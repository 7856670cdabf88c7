//! Run a CL command or list objects on an IBM i host
//!
//! Connection settings come from the client configuration file; the password
//! is read from `HOSTSERVER_PASSWORD` unless a profile token is configured.

use std::ops::ControlFlow;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};

use hostserver::config::{default_config_path, load_config};
use hostserver::handshake::CredentialProvider;
use hostserver::list::{ListDriver, ObjectEntryFormat, ObjectListRequest};
use hostserver::{ClientConfig, HostConnection, PasswordCredential, ProfileTokenCredential};

enum Action {
    Command(String),
    ListObjects { library: String, name: String, object_type: String },
}

struct Options {
    config_path: PathBuf,
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    tls: Option<bool>,
    action: Action,
}

fn print_help() {
    println!("rmtcmd - run commands on an IBM i host server");
    println!();
    println!("Usage: rmtcmd [OPTIONS] <command text>");
    println!("       rmtcmd [OPTIONS] --list <library> [name] [type]");
    println!();
    println!("Options:");
    println!("  --config <path>                   Configuration file (default: {})", default_config_path().display());
    println!("  --server <host> or -s <host>      Override the configured host");
    println!("  --port <port> or -p <port>        Override the configured port");
    println!("  --user <profile> or -u <profile>  Override the configured user profile");
    println!("  --ssl | --no-ssl                  Force TLS on or off");
    println!("  --list <library> [name] [type]    List objects instead of running a command");
    println!("  --help or -h                      Show this help message");
    println!();
    println!("The password is read from HOSTSERVER_PASSWORD.");
    println!();
    println!("Example:");
    println!("  HOSTSERVER_PASSWORD=secret rmtcmd -s myibmi -u dave CRTLIB LIB(SCRATCH)");
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut config_path = default_config_path();
    let mut host = None;
    let mut port = None;
    let mut user = None;
    let mut tls = None;
    let mut rest = Vec::new();
    let mut list = false;

    let mut i = 0;
    while i < args.len() {
        let value = |i: usize| args.get(i + 1).cloned().ok_or_else(|| anyhow!("{} requires a value", args[i]));
        match args[i].as_str() {
            "--config" => {
                config_path = PathBuf::from(value(i)?);
                i += 1;
            }
            "--server" | "-s" => {
                host = Some(value(i)?);
                i += 1;
            }
            "--port" | "-p" => {
                port = Some(value(i)?.parse::<u16>().context("--port requires a numeric value")?);
                i += 1;
            }
            "--user" | "-u" => {
                user = Some(value(i)?);
                i += 1;
            }
            "--ssl" => tls = Some(true),
            "--no-ssl" => tls = Some(false),
            "--list" => list = true,
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => rest.push(other.to_string()),
        }
        i += 1;
    }

    let action = if list {
        let mut parts = rest.into_iter();
        let library = parts.next().ok_or_else(|| anyhow!("--list requires a library"))?;
        Action::ListObjects {
            library,
            name: parts.next().unwrap_or_else(|| "*ALL".to_string()),
            object_type: parts.next().unwrap_or_else(|| "*ALL".to_string()),
        }
    } else if rest.is_empty() {
        bail!("no command given (try --help)");
    } else {
        Action::Command(rest.join(" "))
    };

    Ok(Options { config_path, host, port, user, tls, action })
}

fn credential(config: &ClientConfig) -> Result<Box<dyn CredentialProvider>> {
    if let Some(token) = config.profile_token_bytes()? {
        return Ok(Box::new(ProfileTokenCredential::new(token)));
    }
    let user = config.user.clone().ok_or_else(|| anyhow!("no user profile configured (use --user)"))?;
    let password = std::env::var("HOSTSERVER_PASSWORD").context("HOSTSERVER_PASSWORD is not set")?;
    Ok(Box::new(PasswordCredential::new(user, password)))
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = parse_args(&args)?;

    let mut config = load_config(&options.config_path)
        .with_context(|| format!("loading {}", options.config_path.display()))?;
    if let Some(host) = options.host {
        config.host = host;
    }
    if let Some(port) = options.port {
        config = config.with_port(port);
    }
    if let Some(tls) = options.tls {
        config = config.with_tls(tls);
    }
    if options.user.is_some() {
        config.user = options.user;
    }

    let credential = credential(&config)?;
    let mut connection = HostConnection::connect(&config, credential.as_ref())
        .with_context(|| format!("connecting to {}:{}", config.host, config.port))?;

    let succeeded = match options.action {
        Action::Command(text) => {
            let result = connection.execute(&text)?;
            for message in result.messages() {
                println!("{message}");
            }
            result.succeeded()
        }
        Action::ListObjects { library, name, object_type } => {
            let request = ObjectListRequest::new(name, library, object_type);
            let summary = ListDriver::from_config(&config).run(&mut connection, &request, &ObjectEntryFormat, |entry| {
                println!("{:<10} {:<10} {:<10}", entry.library, entry.name, entry.object_type);
                ControlFlow::Continue(())
            })?;
            println!("{} objects", summary.delivered);
            true
        }
    };

    connection.close();
    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}
