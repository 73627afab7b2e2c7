// src/bin/nila-statement.rs

//! Builds a software statement and prints it as a compact JWS.

use clap::Parser;
use dialoguer::Password;
use nila_dcr::generator::{encode_unsigned, StatementBuilder, StatementSigner};
use nila_dcr::error::NilaDcrError;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "nila-statement")]
#[command(about = "Build and optionally sign a software statement for dynamic client registration")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// The client's home URI. Its host must match the redirect URI host.
    client_uri: String,

    /// Human readable application name
    #[arg(long)]
    client_name: String,

    /// The single redirect URI to register
    #[arg(long)]
    redirect_uri: String,

    /// Software ID; a random UUID is generated when omitted
    #[arg(long)]
    software_id: Option<Uuid>,

    /// Extra claim as NAME=VALUE. VALUE is read as JSON when it parses, else as a string.
    #[arg(long = "claim", value_parser = parse_claim)]
    claims: Vec<(String, Value)>,

    /// RSA private key PEM. Signs with RS256 and sets iss to the client URI.
    #[arg(long, env = "NILA_STATEMENT_KEY")]
    key: Option<PathBuf>,

    /// Passphrase for an encrypted PKCS#8 key. Prompted for when the key needs one.
    #[arg(long, env = "NILA_STATEMENT_PASSPHRASE", hide_env_values = true, requires = "key")]
    passphrase: Option<String>,
}

fn parse_claim(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))?;
    if name.is_empty() {
        return Err("claim name may not be empty".to_string());
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

fn prompt_passphrase(path: &Path) -> Result<String, NilaDcrError> {
    Password::new()
        .with_prompt(format!("Passphrase for {}", path.display()))
        .interact()
        .map_err(|e| NilaDcrError::InvalidKeyFormat(format!("Failed to read passphrase: {}", e)))
}

fn run(cli: Cli) -> Result<String, NilaDcrError> {
    let mut builder = StatementBuilder::new(&cli.client_uri)
        .client_name(&cli.client_name)
        .redirect_uri(&cli.redirect_uri);
    if let Some(software_id) = cli.software_id {
        builder = builder.software_id(software_id);
    }
    for (name, value) in cli.claims {
        builder = builder.claim(&name, value);
    }

    match cli.key {
        Some(path) => {
            let passphrase = cli.passphrase;
            let signer = StatementSigner::from_pem_file_with_passphrase(&path, || match passphrase {
                Some(passphrase) => Ok(passphrase),
                None => prompt_passphrase(&path),
            })?;
            let statement = builder.issuer(&cli.client_uri).build()?;
            debug!(kid = %signer.kid(), "Signing with RS256");
            signer.sign(&statement)
        }
        None => {
            let statement = builder.build()?;
            debug!("No key given. Emitting an unsigned statement.");
            encode_unsigned(&statement)
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(Cli::parse()) {
        Ok(token) => println!("{}", token),
        Err(e) => {
            error!(error = %e, "Failed to build software statement");
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_values_prefer_json() {
        assert_eq!(parse_claim("exp=1700000000").unwrap(), ("exp".to_string(), Value::from(1_700_000_000)));
        assert_eq!(parse_claim("logo_uri=https://a.example/l.png").unwrap().1, Value::from("https://a.example/l.png"));
        assert_eq!(parse_claim("note=a=b").unwrap().1, Value::from("a=b"));
        assert!(parse_claim("novalue").is_err());
        assert!(parse_claim("=x").is_err());
    }

    #[test]
    fn signs_with_encrypted_key_and_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("key.pem");
        std::fs::write(&key, include_str!("../../tests/fixtures/rsa_private_key_encrypted.pem")).unwrap();
        let args = |passphrase: &str| {
            Cli::try_parse_from([
                "nila-statement",
                "https://a.example/app",
                "--client-name",
                "Example App",
                "--redirect-uri",
                "https://a.example/cb",
                "--key",
                key.to_str().unwrap(),
                "--passphrase",
                passphrase,
            ])
            .unwrap()
        };

        let token = run(args("correct-horse")).unwrap();
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(
            nila_dcr::jwt::get_claim(&token, "iss").unwrap(),
            Some(Value::from("https://a.example/app"))
        );

        assert!(matches!(run(args("wrong")), Err(NilaDcrError::InvalidKeyFormat(_))));
    }

    #[test]
    fn cli_shape() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
