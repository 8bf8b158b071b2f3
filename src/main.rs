#![forbid(unsafe_code)]
#![deny(clippy::all, clippy::pedantic)]
// p, q, n, e, d and friends are the textbook names
#![allow(clippy::many_single_char_names, clippy::similar_names)]

mod config;
mod consecutive_primes;
mod curve;
mod digit_product;
mod distinct_key_xor;
mod gf2;
mod hash_chain_xor;
mod keystream_shift;
mod known_header;
mod lcg_modp_oracle;
mod linear_keystream;
mod nonce_reuse;
mod number;
mod passphrase_cbc;
mod phi_leak;
mod quartic_mitm;
mod sampled_xor;
mod shamir_odd;
mod shared;
mod sign_oracle;
mod singular_curve;
mod sqrt_leak;
mod substitution;
mod syndrome;
mod xoshiro_ecdsa;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(about = "Solvers for a collection of CTF crypto challenges")]
struct Cli {
    /// Directory holding the `<task>.json` challenge files and their attachments
    #[arg(long, env = "CTF_RESOURCES", default_value = "resources")]
    resources: PathBuf,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    /// Challenge to solve; every offline challenge with a resource file when omitted
    #[arg(value_enum)]
    task: Option<Task>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Task {
    KeystreamShift,
    XoshiroEcdsa,
    SingularCurve,
    ShamirOdd,
    DistinctKeyXor,
    LinearKeystream,
    ConsecutivePrimes,
    PhiLeak,
    SqrtLeak,
    QuarticMitm,
    DigitProduct,
    Substitution,
    PassphraseCbc,
    NonceReuse,
    KnownHeader,
    HashChainXor,
    SampledXor,
    Syndrome,
    LcgModpOracle,
    SignOracle,
}

impl Task {
    fn name(self) -> &'static str {
        match self {
            Task::KeystreamShift => keystream_shift::TASK,
            Task::XoshiroEcdsa => xoshiro_ecdsa::TASK,
            Task::SingularCurve => singular_curve::TASK,
            Task::ShamirOdd => shamir_odd::TASK,
            Task::DistinctKeyXor => distinct_key_xor::TASK,
            Task::LinearKeystream => linear_keystream::TASK,
            Task::ConsecutivePrimes => consecutive_primes::TASK,
            Task::PhiLeak => phi_leak::TASK,
            Task::SqrtLeak => sqrt_leak::TASK,
            Task::QuarticMitm => quartic_mitm::TASK,
            Task::DigitProduct => digit_product::TASK,
            Task::Substitution => substitution::TASK,
            Task::PassphraseCbc => passphrase_cbc::TASK,
            Task::NonceReuse => nonce_reuse::TASK,
            Task::KnownHeader => known_header::TASK,
            Task::HashChainXor => hash_chain_xor::TASK,
            Task::SampledXor => sampled_xor::TASK,
            Task::Syndrome => syndrome::TASK,
            Task::LcgModpOracle => lcg_modp_oracle::TASK,
            Task::SignOracle => sign_oracle::TASK,
        }
    }

    fn needs_network(self) -> bool {
        matches!(
            self,
            Task::KeystreamShift
                | Task::ShamirOdd
                | Task::DistinctKeyXor
                | Task::Syndrome
                | Task::LcgModpOracle
                | Task::SignOracle
        )
    }

    fn run(self, resources: &Path) -> Result<()> {
        match self {
            Task::KeystreamShift => keystream_shift::run(resources),
            Task::XoshiroEcdsa => xoshiro_ecdsa::run(resources),
            Task::SingularCurve => singular_curve::run(resources),
            Task::ShamirOdd => shamir_odd::run(resources),
            Task::DistinctKeyXor => distinct_key_xor::run(resources),
            Task::LinearKeystream => linear_keystream::run(resources),
            Task::ConsecutivePrimes => consecutive_primes::run(resources),
            Task::PhiLeak => phi_leak::run(resources),
            Task::SqrtLeak => sqrt_leak::run(resources),
            Task::QuarticMitm => quartic_mitm::run(resources),
            Task::DigitProduct => digit_product::run(resources),
            Task::Substitution => substitution::run(resources),
            Task::PassphraseCbc => passphrase_cbc::run(resources),
            Task::NonceReuse => nonce_reuse::run(resources),
            Task::KnownHeader => known_header::run(resources),
            Task::HashChainXor => hash_chain_xor::run(resources),
            Task::SampledXor => sampled_xor::run(resources),
            Task::Syndrome => syndrome::run(resources),
            Task::LcgModpOracle => lcg_modp_oracle::run(resources),
            Task::SignOracle => sign_oracle::run(resources),
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Some(task) = cli.task {
        return task
            .run(&cli.resources)
            .with_context(|| format!("Unable to solve {}", task.name()));
    }

    let mut failed = 0;
    for &task in Task::value_variants() {
        if task.needs_network() {
            continue;
        }
        if !config::exists(&cli.resources, task.name()) {
            warn!("No resource file for {}, skipping", task.name());
            continue;
        }
        info!("Solving {}", task.name());
        if let Err(e) = task.run(&cli.resources) {
            error!("{} failed: {:#}", task.name(), e);
            failed += 1;
        }
    }

    if failed > 0 {
        anyhow::bail!("{} challenge(s) failed", failed);
    }
    Ok(())
}
