// SPDX-License-Identifier:

//! Host-side client: asks the enclave for one attestation document, saves it
//! and prints a summary. `inspect` decodes a previously saved document.

use anyhow::{Context, Result, anyhow, bail, ensure};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::{info, warn};
use nsm_attest_common::DEFAULT_VSOCK_PORT;
use nsm_attest_common::document;
use nsm_attest_common::types::{Request, Response};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

mod dial;
mod public_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Strategy {
    /// Let the enclave decide.
    Auto,
    /// Ask for the nsm-cli helper.
    Cli,
    /// Ask for direct device access.
    Device,
}

#[derive(Debug, Parser)]
#[command(name = "nsm-attest-client")]
struct Args {
    /// Enclave CID to connect to.
    #[arg(long, default_value_t = 16)]
    cid: u32,

    /// Enclave vsock port.
    #[arg(long, default_value_t = DEFAULT_VSOCK_PORT)]
    port: u32,

    #[arg(long, value_enum, default_value_t = Strategy::Auto)]
    strategy: Strategy,

    #[arg(long)]
    nonce: Option<String>,

    #[arg(long)]
    user_data: Option<String>,

    /// Public key file, PEM or DER.
    #[arg(long)]
    public_key: Option<PathBuf>,

    /// Where to save the raw document. Empty to skip.
    #[arg(long, default_value = "attestation_doc.bin")]
    output: String,

    /// Path inside the enclave to save the document to.
    #[arg(long)]
    enclave_output: Option<String>,

    /// Ask the enclave to decode the document.
    #[arg(long)]
    parse: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Decode a saved attestation document instead of requesting one.
    Inspect {
        file: PathBuf,

        /// Show the COSE envelope: headers, payload size and signature.
        #[arg(long, conflicts_with = "debug")]
        raw: bool,

        /// Show the CBOR structure.
        #[arg(long)]
        debug: bool,
    },
}

fn build_request(args: &Args) -> Result<Request> {
    let public_key = match &args.public_key {
        Some(path) => Some(B64.encode(public_key::load_der(path)?)),
        None => None,
    };

    Ok(Request {
        use_cli: match args.strategy {
            Strategy::Auto => None,
            Strategy::Cli => Some(true),
            Strategy::Device => Some(false),
        },
        nonce: args.nonce.clone(),
        output_file: args.enclave_output.clone(),
        parse: args.parse.then_some(true),
        user_data: args.user_data.clone(),
        public_key,
    })
}

/// Save, summarise and optionally print the decoded document. A failed save
/// is only logged.
fn handle_response(
    response: Response,
    output: &str,
    parse: bool,
    out: &mut impl Write,
) -> Result<()> {
    let attested = response.into_result().map_err(|message| anyhow!(message))?;
    let doc = B64
        .decode(&attested.document)
        .context("document in response is not valid base64")?;

    if !output.is_empty() {
        match document::persist(&doc, output) {
            Ok(()) => writeln!(out, "saved attestation document to {output}")?,
            Err(e) => warn!("failed to write {output}: {e}"),
        }
    }

    let form = document::to_display_form(&doc);
    writeln!(out, "attestation document: {}", form.summary)?;

    if parse {
        match attested.parsed_doc.or(form.parsed) {
            Some(parsed) => writeln!(out, "{}", serde_json::to_string_pretty(&parsed)?)?,
            None => writeln!(out, "attestation document could not be decoded")?,
        }
    }

    Ok(())
}

fn inspect(file: &Path, raw: bool, debug: bool, out: &mut impl Write) -> Result<()> {
    let doc = fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;

    if debug {
        match document::describe_structure(&doc) {
            Some(outline) => write!(out, "{outline}")?,
            None => bail!("{} is not a CBOR document", file.display()),
        }
        return Ok(());
    }

    let view = if raw {
        document::envelope_view(&doc)
    } else {
        document::parse_document(&doc)
    };
    match view {
        Some(view) => writeln!(out, "{}", serde_json::to_string_pretty(&view)?)?,
        None => bail!("{} is not an attestation document", file.display()),
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut stdout = io::stdout().lock();

    if let Some(Command::Inspect { file, raw, debug }) = &args.command {
        return inspect(file, *raw, *debug, &mut stdout);
    }

    ensure!(args.cid != 0, "--cid must be a non-zero enclave CID");

    let request = build_request(&args)?;
    let mut stream = dial::connect(args.cid, args.port)?;
    info!("connected to enclave cid={} port={}", args.cid, args.port);

    let response = dial::exchange(&mut stream, &request)?;
    drop(stream);

    handle_response(response, &args.output, args.parse, &mut stdout)
}
