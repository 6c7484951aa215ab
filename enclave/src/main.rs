// SPDX-License-Identifier:

//! Vsock server inside the enclave. Answers each connection with one signed
//! attestation document from the security module. With `--once` it acquires a
//! single document locally instead.

use anyhow::{Result, ensure};
use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use nsm_attest_common::{DEFAULT_VSOCK_PORT, MAX_REQUEST_SIZE};
use nsm_attest_enclave::acquire::{Acquirer, AttestationRequest, NsmCli, NsmDevice, Strategy};
use nsm_attest_enclave::config::{Config, DEFAULT_DEVICE_PATH, DEFAULT_HELPER};
use nsm_attest_enclave::{oneshot, server};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "nsm-attest-enclave")]
struct Args {
    /// Vsock port to listen on.
    #[arg(long, default_value_t = DEFAULT_VSOCK_PORT)]
    vsock_port: u32,

    /// Security module device.
    #[arg(long, default_value = DEFAULT_DEVICE_PATH)]
    device: PathBuf,

    /// Helper program used for CLI requests.
    #[arg(long, default_value = DEFAULT_HELPER)]
    helper: PathBuf,

    /// Request buffer size in bytes.
    #[arg(long, default_value_t = MAX_REQUEST_SIZE)]
    max_request_size: usize,

    /// Acquire one document, save and print it, then exit.
    #[arg(long)]
    once: bool,

    /// Use the helper instead of the device (with --once).
    #[arg(long, requires = "once")]
    cli: bool,

    #[arg(long, requires = "once")]
    nonce: Option<String>,

    #[arg(long, requires = "once")]
    user_data: Option<String>,

    /// Where to save the document (with --once). Empty to skip.
    #[arg(long, requires = "once", default_value = "attestation_doc.bin")]
    output: String,

    /// Print the decoded document (with --once).
    #[arg(long, requires = "once")]
    parse: bool,
}

impl Args {
    fn once_request(&self) -> AttestationRequest {
        AttestationRequest {
            user_data: self.user_data.clone().map(String::into_bytes).unwrap_or_default(),
            public_key: Vec::new(),
            nonce: self.nonce.clone().map(String::into_bytes).unwrap_or_default(),
            strategy: if self.cli {
                Strategy::Cli
            } else {
                Strategy::DirectDevice
            },
            output_path: (!self.output.is_empty()).then(|| PathBuf::from(&self.output)),
            want_parsed: self.parse,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    ensure!(args.max_request_size > 0, "--max-request-size must be positive");

    let config = Config {
        vsock_port: args.vsock_port,
        device_path: args.device.clone(),
        helper_program: args.helper.clone(),
        max_request_size: args.max_request_size,
    };

    if !config.device_path.exists() {
        warn!(
            "{} not found; not running inside an enclave? Device requests will fail",
            config.device_path.display()
        );
    }
    info!(
        "device={} helper={}",
        config.device_path.display(),
        config.helper_program.display()
    );

    let acquirer = Acquirer::new(
        NsmCli::new(&config.helper_program),
        NsmDevice::new(&config.device_path),
    );

    if args.once {
        return oneshot::run_once(&acquirer, &args.once_request(), &mut io::stdout().lock());
    }
    server::serve(Arc::new(config), Arc::new(acquirer))
}
