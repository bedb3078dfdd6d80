//! Mobile TSS CLI
//!
//! Runs every party of a committee in one process, joined by a loopback
//! network, to exercise keygen, keysign and reshare end to end.

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::{Parser, Subcommand, ValueEnum};
use mobile_tss_core::{
    FileStateStore, KeygenRequest, KeysignRequest, KeysignResponse, LocalStateAccessor,
    LoopbackNetwork, MemoryStateStore, ReshareRequest, ServiceConfig, TssScheme, TssService,
    committee::Committee, get_derived_pub_key, get_threshold,
};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "mobile-tss")]
#[command(about = "Mobile TSS simulation CLI", version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Keep each party's state in `<dir>/<party>` instead of memory
    #[arg(long, global = true, env = "MOBILE_TSS_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Bit size of each Paillier prime
    #[arg(long, global = true, env = "MOBILE_TSS_PAILLIER_BITS", default_value = "1024")]
    paillier_bits: usize,

    /// Fail a round that waits longer than this many seconds
    #[arg(long, global = true, env = "MOBILE_TSS_ROUND_TIMEOUT")]
    round_timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Scheme {
    Ecdsa,
    Eddsa,
}

impl From<Scheme> for TssScheme {
    fn from(scheme: Scheme) -> Self {
        match scheme {
            Scheme::Ecdsa => TssScheme::Ecdsa,
            Scheme::Eddsa => TssScheme::Eddsa,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a key across a local committee
    Keygen {
        #[arg(short, long, value_enum, default_value = "ecdsa")]
        scheme: Scheme,

        /// Comma-separated committee
        #[arg(short, long, default_value = "alice,bob,carol")]
        parties: String,

        /// 32-byte hex chain code, random when omitted
        #[arg(long)]
        chain_code: Option<String>,
    },

    /// Sign a message, generating a key first unless `--pub-key` is given
    Keysign {
        #[arg(short, long, value_enum, default_value = "ecdsa")]
        scheme: Scheme,

        /// Keygen committee
        #[arg(short, long, default_value = "alice,bob,carol")]
        parties: String,

        /// Signing committee, defaults to the first threshold + 1 parties
        #[arg(long)]
        signers: Option<String>,

        /// Existing key held in `--state-dir`
        #[arg(long, requires = "state_dir")]
        pub_key: Option<String>,

        /// Message text; ECDSA signs its SHA-256 digest
        #[arg(short, long, default_value = "hello")]
        message: String,

        /// BIP32 path for ECDSA keys
        #[arg(long, default_value = "")]
        derive_path: String,
    },

    /// Generate a key, move it to a new committee and sign with it
    Reshare {
        #[arg(short, long, value_enum, default_value = "ecdsa")]
        scheme: Scheme,

        #[arg(short, long, default_value = "alice,bob,carol")]
        parties: String,

        #[arg(long, default_value = "bob,carol,dave")]
        new_parties: String,
    },

    /// Print the threshold for a committee size
    Threshold { n: i64 },

    /// Derive a child public key
    Derive {
        #[arg(long)]
        pub_key: String,

        #[arg(long, default_value = "")]
        chain_code: String,

        #[arg(long)]
        path: String,

        #[arg(long)]
        eddsa: bool,
    },

    /// Show version and defaults
    Info,
}

/// All parties of one simulation
struct Simulation {
    network: Arc<LoopbackNetwork>,
    services: BTreeMap<String, Arc<TssService>>,
    config: ServiceConfig,
    state_dir: Option<PathBuf>,
}

impl Simulation {
    fn new(cli: &Cli) -> Result<Self> {
        let mut config = ServiceConfig::default().with_paillier_prime_bits(cli.paillier_bits);
        if let Some(secs) = cli.round_timeout {
            config = config.with_round_timeout(Duration::from_secs(secs));
        }
        config.validate()?;
        Ok(Self {
            network: LoopbackNetwork::new(),
            services: BTreeMap::new(),
            config,
            state_dir: cli.state_dir.clone(),
        })
    }

    /// Service for `party`, created on first use
    fn service(&mut self, party: &str) -> Result<Arc<TssService>> {
        if let Some(service) = self.services.get(party) {
            return Ok(Arc::clone(service));
        }

        let accessor: Arc<dyn LocalStateAccessor> = match &self.state_dir {
            Some(dir) => Arc::new(FileStateStore::new(dir.join(party))?),
            None => Arc::new(MemoryStateStore::new()),
        };
        let service = Arc::new(TssService::with_config(
            self.network.clone(),
            accessor,
            self.config.clone(),
        )?);
        self.network.register(party, &service);
        self.services.insert(party.to_string(), Arc::clone(&service));
        Ok(service)
    }

    async fn keygen(&mut self, scheme: TssScheme, parties: &str, chain_code: &str) -> Result<String> {
        let committee = Committee::parse(parties)?;
        info!(%scheme, committee = %committee, "Running keygen");

        let mut handles = Vec::new();
        for party in committee.parties() {
            let service = self.service(party)?;
            let request = KeygenRequest {
                local_party_id: party.clone(),
                all_parties: committee.to_string(),
                chain_code_hex: chain_code.to_string(),
            };
            handles.push(tokio::spawn(async move {
                match scheme {
                    TssScheme::Ecdsa => service.keygen_ecdsa(&request).await,
                    TssScheme::Eddsa => service.keygen_eddsa(&request).await,
                }
            }));
        }

        let mut pub_key = None;
        for handle in handles {
            let response = handle.await??;
            match &pub_key {
                None => pub_key = Some(response.pub_key),
                Some(key) if *key != response.pub_key => bail!("parties disagree on the public key"),
                Some(_) => {}
            }
        }
        pub_key.context("empty committee")
    }

    async fn keysign(
        &mut self,
        scheme: TssScheme,
        pub_key: &str,
        signers: &str,
        message: &[u8],
        derive_path: &str,
    ) -> Result<KeysignResponse> {
        let committee = Committee::parse(signers)?;
        info!(%scheme, signers = %committee, "Running keysign");

        let mut handles = Vec::new();
        for party in committee.parties() {
            let service = self.service(party)?;
            let request = KeysignRequest {
                pub_key: pub_key.to_string(),
                message_to_sign: STANDARD.encode(message),
                keysign_committee_keys: committee.to_string(),
                local_party_key: party.clone(),
                derive_path: derive_path.to_string(),
            };
            handles.push(tokio::spawn(async move {
                match scheme {
                    TssScheme::Ecdsa => service.keysign_ecdsa(&request).await,
                    TssScheme::Eddsa => service.keysign_eddsa(&request).await,
                }
            }));
        }

        let mut responses = Vec::new();
        for handle in handles {
            responses.push(handle.await??);
        }
        if responses.windows(2).any(|w| w[0] != w[1]) {
            bail!("signers produced different signatures");
        }
        responses.pop().context("empty signing committee")
    }

    async fn reshare(
        &mut self,
        scheme: TssScheme,
        pub_key: &str,
        old: &str,
        new: &str,
        chain_code: &str,
    ) -> Result<String> {
        let old = Committee::parse(old)?;
        let new = Committee::parse(new)?;
        info!(%scheme, old = %old, new = %new, "Running reshare");

        let mut handles = Vec::new();
        for party in old.union(&new) {
            let service = self.service(&party)?;
            let request = ReshareRequest {
                pub_key: pub_key.to_string(),
                local_party_id: party,
                old_parties: old.to_string(),
                new_parties: new.to_string(),
                chain_code_hex: chain_code.to_string(),
                reshare_prefix: String::new(),
                new_reshare_prefix: String::new(),
            };
            handles.push(tokio::spawn(async move {
                match scheme {
                    TssScheme::Ecdsa => service.reshare_ecdsa(&request).await,
                    TssScheme::Eddsa => service.reshare_eddsa(&request).await,
                }
            }));
        }

        let mut prefix = String::new();
        for handle in handles {
            let response = handle.await??;
            if response.pub_key != pub_key {
                bail!("reshare changed the public key");
            }
            prefix = response.reshare_prefix;
        }
        Ok(prefix)
    }
}

/// First `threshold + 1` members of `parties`
fn default_signers(parties: &str) -> Result<String> {
    let committee = Committee::parse(parties)?;
    let quorum = committee.threshold() + 1;
    Ok(committee.parties()[..quorum].join(","))
}

/// Bytes handed to the signers: the SHA-256 digest for ECDSA, raw text for EdDSA
fn signing_payload(scheme: TssScheme, message: &str) -> Vec<u8> {
    match scheme {
        TssScheme::Ecdsa => Sha256::digest(message.as_bytes()).to_vec(),
        TssScheme::Eddsa => message.as_bytes().to_vec(),
    }
}

fn random_chain_code() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    match &cli.command {
        Commands::Keygen {
            scheme,
            parties,
            chain_code,
        } => {
            let scheme = TssScheme::from(*scheme);
            let chain_code = chain_code.clone().unwrap_or_else(random_chain_code);
            let mut simulation = Simulation::new(&cli)?;
            let pub_key = simulation.keygen(scheme, parties, &chain_code).await?;
            print_json(&serde_json::json!({
                "scheme": scheme.to_string(),
                "pub_key": pub_key,
                "chain_code": chain_code,
                "parties": Committee::parse(parties)?.parties(),
            }))?;
        }
        Commands::Keysign {
            scheme,
            parties,
            signers,
            pub_key,
            message,
            derive_path,
        } => {
            let scheme = TssScheme::from(*scheme);
            let mut simulation = Simulation::new(&cli)?;
            let pub_key = match pub_key {
                Some(key) => key.clone(),
                None => simulation.keygen(scheme, parties, &random_chain_code()).await?,
            };
            let signers = match signers {
                Some(signers) => signers.clone(),
                None => default_signers(parties)?,
            };
            let payload = signing_payload(scheme, message);
            let response = simulation
                .keysign(scheme, &pub_key, &signers, &payload, derive_path)
                .await?;
            print_json(&serde_json::json!({
                "pub_key": pub_key,
                "signers": signers,
                "response": response,
            }))?;
        }
        Commands::Reshare {
            scheme,
            parties,
            new_parties,
        } => {
            let scheme = TssScheme::from(*scheme);
            let chain_code = random_chain_code();
            let mut simulation = Simulation::new(&cli)?;
            let pub_key = simulation.keygen(scheme, parties, &chain_code).await?;
            let prefix = simulation
                .reshare(scheme, &pub_key, parties, new_parties, &chain_code)
                .await?;

            let signers = default_signers(new_parties)?;
            let payload = signing_payload(scheme, "signed after reshare");
            let response = simulation
                .keysign(scheme, &pub_key, &signers, &payload, "")
                .await?;
            print_json(&serde_json::json!({
                "pub_key": pub_key,
                "reshare_prefix": prefix,
                "new_parties": Committee::parse(new_parties)?.parties(),
                "signers": signers,
                "response": response,
            }))?;
        }
        Commands::Threshold { n } => {
            println!("{}", get_threshold(*n)?);
        }
        Commands::Derive {
            pub_key,
            chain_code,
            path,
            eddsa,
        } => {
            println!("{}", get_derived_pub_key(pub_key, chain_code, path, *eddsa)?);
        }
        Commands::Info => {
            println!("Mobile TSS v{}", mobile_tss_core::VERSION);
            println!();
            println!("Schemes:");
            println!("  - ECDSA over secp256k1 (BIP32 non-hardened derivation)");
            println!("  - EdDSA over Ed25519");
            println!();
            println!("Thresholds:");
            for n in 2..=5 {
                println!("  {} parties: any {} can sign", n, get_threshold(n)? + 1);
            }
        }
    }

    Ok(())
}
