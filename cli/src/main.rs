//! `pcr-predict` — the command-line front end anchoring the core library's
//! contracts (§6). Argument parsing and file I/O live here; every TPM and
//! cryptographic operation is delegated to `pcrpredict_core`.

use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};

use pcrpredict_core::config::Config;
use pcrpredict_core::envelope::policy_program::{PolicyInstruction, PolicyProgram};
use pcrpredict_core::envelope::{self, EnvelopePolicy, NamedPolicy, SealedSecret};
use pcrpredict_core::eventlog::EventLogReader;
use pcrpredict_core::pcrspec::{parse_algorithm, parse_pcr_spec};
use pcrpredict_core::platform::TargetPlatform;
use pcrpredict_core::rehash::providers::FilesystemProvider;
use pcrpredict_core::rehash::RehashContext;
use pcrpredict_core::rsakey::RsaKey;
use pcrpredict_core::tpm::TpmContext;
use pcrpredict_core::{policy, predict, seal, unseal};

#[derive(Parser)]
#[command(name = "pcr-predict")]
#[command(about = "Predicts post-boot TPM PCR values and builds TPM2 policies around them", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seals a secret under a PCR policy for a predicted future boot.
    SealSecret {
        #[arg(long)]
        algo: String,
        #[arg(long)]
        pcrs: String,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value = "legacy")]
        target_platform: String,
    },

    /// Unseals a secret previously sealed under a PCR policy.
    UnsealSecret {
        #[arg(long)]
        algo: String,
        #[arg(long)]
        pcrs: String,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },

    /// Builds and uses PCR policies authorized by a signing key.
    AuthorizedPolicy {
        #[command(subcommand)]
        action: AuthorizedPolicyAction,
    },

    /// Signs a pcr-policy digest, producing a legacy `TPMT_SIGNATURE` file.
    SignPolicy {
        #[arg(long)]
        algo: String,
        #[arg(long)]
        pcrs: String,
        #[arg(long)]
        private_key: PathBuf,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        name: Option<String>,
    },

    /// Signs a pcr-policy digest and appends/merges it into a systemd
    /// pcrlock-style JSON file.
    PolicySignSystemd {
        #[arg(long)]
        algo: String,
        #[arg(long)]
        pcrs: String,
        #[arg(long)]
        private_key: PathBuf,
        #[arg(long)]
        public_key: PathBuf,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum AuthorizedPolicyAction {
    /// Computes an authorized-policy digest for a public key.
    Create {
        #[arg(long)]
        algo: String,
        #[arg(long)]
        pcrs: String,
        #[arg(long)]
        public_key: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Seals a secret under an authorized policy with one or more named,
    /// pre-signed policy entries.
    SealSecret {
        #[arg(long)]
        algo: String,
        #[arg(long)]
        pcrs: String,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        public_key: PathBuf,
        #[arg(long)]
        signed_policy: PathBuf,
        #[arg(long)]
        name: Option<String>,
    },
    /// Unseals a secret sealed under an authorized policy.
    UnsealSecret {
        #[arg(long)]
        algo: String,
        #[arg(long)]
        pcrs: String,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env().init();

    let cli = Cli::parse();
    match cli.command {
        Commands::SealSecret { algo, pcrs, input, output, target_platform } => {
            seal_secret_cmd(&algo, &pcrs, &input, &output, &target_platform)
        }
        Commands::UnsealSecret { algo, pcrs, input, output } => unseal_secret_cmd(&algo, &pcrs, &input, &output),
        Commands::AuthorizedPolicy { action } => match action {
            AuthorizedPolicyAction::Create { algo, pcrs, public_key, output } => {
                authorized_policy_create_cmd(&algo, &pcrs, &public_key, &output)
            }
            AuthorizedPolicyAction::SealSecret { algo, pcrs, input, output, public_key, signed_policy, name } => {
                authorized_policy_seal_secret_cmd(&algo, &pcrs, &input, &output, &public_key, &signed_policy, name)
            }
            AuthorizedPolicyAction::UnsealSecret { algo, pcrs, input, output } => {
                unseal_secret_cmd(&algo, &pcrs, &input, &output)
            }
        },
        Commands::SignPolicy { algo, pcrs, private_key, input, output, name } => {
            sign_policy_cmd(&algo, &pcrs, &private_key, &input, &output, name)
        }
        Commands::PolicySignSystemd { algo, pcrs, private_key, public_key, input, output } => {
            policy_sign_systemd_cmd(&algo, &pcrs, &private_key, &public_key, &input, &output)
        }
    }
}

fn predict_bank(
    algo: &str,
    pcrs: &str,
    cfg: &Config,
) -> Result<pcrpredict_core::PcrBank> {
    let alg = parse_algorithm(algo)?;
    let mask = parse_pcr_spec(pcrs)?;
    let mut reader = EventLogReader::open(&cfg.event_log_path)
        .map_err(|e| anyhow!("opening event log at {}: {e}", cfg.event_log_path.display()))?;
    let ctx = RehashContext::new(alg);
    let provider = FilesystemProvider::new(PathBuf::from("/"), PathBuf::from("/boot/efi"));
    let bank = predict::predict(&mut reader, alg, mask, &ctx, &provider, 0)?;
    Ok(bank)
}

fn valid_pcr_list(mask: u32) -> Vec<u32> {
    (0u32..pcrpredict_core::pcrspec::PCR_COUNT).filter(|p| mask & (1 << p) != 0).collect()
}

fn seal_secret_cmd(algo: &str, pcrs: &str, input: &PathBuf, output: &PathBuf, target_platform: &str) -> Result<()> {
    let cfg = Config::from_env();
    let platform = TargetPlatform::parse(target_platform).ok_or_else(|| anyhow!("unknown target platform {target_platform:?}"))?;

    let bank = predict_bank(algo, pcrs, &cfg)?;
    let mut ctx = TpmContext::open(cfg.tcti.as_deref()).map_err(|e| anyhow!(e))?;
    let pcr_digest = policy::pcr_policy(&mut ctx, &bank).map_err(|e| anyhow!("{e}"))?;

    let secret_bytes = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let (public, private) = seal::seal_secret(&mut ctx, &secret_bytes, &pcr_digest).map_err(|e| anyhow!("{e}"))?;

    let selection = valid_pcr_list(bank.valid_mask());
    let program: PolicyProgram = vec![PolicyInstruction::PolicyPcr { pcr_selection: selection }];
    let sealed = SealedSecret { public, private, policy: EnvelopePolicy::Pcr(program) };

    let encoded = platform.write_sealed_secret(&sealed).map_err(|e| anyhow!("{e}"))?;
    write_atomically(output, &encoded)?;
    Ok(())
}

fn unseal_secret_cmd(algo: &str, pcrs: &str, input: &PathBuf, output: &PathBuf) -> Result<()> {
    let cfg = Config::from_env();
    let alg = parse_algorithm(algo)?;
    let mask = parse_pcr_spec(pcrs)?;
    let pcr_list: Vec<u8> = valid_pcr_list(mask).into_iter().map(|p| p as u8).collect();

    let bytes = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let sealed = decode_any_envelope(&bytes)?;

    let mut ctx = TpmContext::open(cfg.tcti.as_deref()).map_err(|e| anyhow!(e))?;
    let hashing_alg = alg.to_hashing_algorithm().map_err(|e| anyhow!(e))?;
    let plaintext = unseal::unseal(&mut ctx, &sealed, hashing_alg, &pcr_list).map_err(|e| anyhow!("{e}"))?;

    unseal::write_secret_erasing(output, plaintext).with_context(|| format!("writing {}", output.display()))?;
    Ok(())
}

/// Legacy envelopes have no header; tpm2-key-file envelopes are ASN.1 DER
/// starting with a `SEQUENCE` tag (`0x30`). `unseal-secret` takes no
/// `--target-platform` flag (§6), so the format is sniffed from content.
fn decode_any_envelope(bytes: &[u8]) -> Result<SealedSecret> {
    if bytes.first() == Some(&0x30) {
        if let Ok(sealed) = TargetPlatform::Tpm2KeyFile.read_sealed_secret(bytes) {
            return Ok(sealed);
        }
    }
    TargetPlatform::LegacyGrub
        .read_sealed_secret(bytes)
        .map_err(|e| anyhow!("could not decode sealed-secret envelope: {e}"))
}

fn authorized_policy_create_cmd(algo: &str, pcrs: &str, public_key: &PathBuf, output: &PathBuf) -> Result<()> {
    let cfg = Config::from_env();
    let bank = predict_bank(algo, pcrs, &cfg)?;
    let mut ctx = TpmContext::open(cfg.tcti.as_deref()).map_err(|e| anyhow!(e))?;
    let pcr_digest = policy::pcr_policy(&mut ctx, &bank).map_err(|e| anyhow!("{e}"))?;

    let pubkey = RsaKey::load_public(public_key).map_err(|e| anyhow!(e))?;
    let authorized_digest = policy::authorized_policy(&mut ctx, &pcr_digest, &pubkey).map_err(|e| anyhow!("{e}"))?;

    write_atomically(output, &authorized_digest)?;
    Ok(())
}

fn authorized_policy_seal_secret_cmd(
    algo: &str,
    pcrs: &str,
    input: &PathBuf,
    output: &PathBuf,
    public_key: &PathBuf,
    signed_policy: &PathBuf,
    name: Option<String>,
) -> Result<()> {
    let cfg = Config::from_env();
    let bank = predict_bank(algo, pcrs, &cfg)?;
    let mut ctx = TpmContext::open(cfg.tcti.as_deref()).map_err(|e| anyhow!(e))?;
    let pcr_digest = policy::pcr_policy(&mut ctx, &bank).map_err(|e| anyhow!("{e}"))?;

    let pubkey = RsaKey::load_public(public_key).map_err(|e| anyhow!(e))?;
    let authorized_digest = policy::authorized_policy(&mut ctx, &pcr_digest, &pubkey).map_err(|e| anyhow!("{e}"))?;

    let secret_bytes = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let (public, private) = seal::seal_secret(&mut ctx, &secret_bytes, &authorized_digest).map_err(|e| anyhow!("{e}"))?;

    let pubkey_public = pubkey.to_tpm_public().map_err(|e| anyhow!(e))?;
    let pubkey_public_bytes = {
        use tss_esapi::traits::Marshall;
        pubkey_public.marshall().map_err(|e| anyhow!("{e}"))?
    };
    let signature = fs::read(signed_policy).with_context(|| format!("reading {}", signed_policy.display()))?;

    let program: PolicyProgram = vec![PolicyInstruction::PolicyAuthorize {
        public: pubkey_public_bytes,
        policy_ref: Vec::new(),
        signature,
    }];
    let sealed = SealedSecret {
        public,
        private,
        policy: EnvelopePolicy::AuthPolicy(vec![NamedPolicy { name, program }]),
    };

    let encoded = TargetPlatform::Tpm2KeyFile.write_sealed_secret(&sealed).map_err(|e| anyhow!("{e}"))?;
    write_atomically(output, &encoded)?;
    Ok(())
}

fn sign_policy_cmd(
    algo: &str,
    pcrs: &str,
    private_key: &PathBuf,
    input: &PathBuf,
    output: &PathBuf,
    _name: Option<String>,
) -> Result<()> {
    // algo/pcrs are accepted for contract symmetry with the other commands
    // (§6) even though the legacy signed-policy file carries neither.
    let alg = parse_algorithm(algo)?;
    let _ = parse_pcr_spec(pcrs)?;

    let privkey = RsaKey::load_private(private_key).map_err(|e| anyhow!(e))?;
    let pcr_digest = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let raw_signature = policy::sign(&pcr_digest, &privkey).map_err(|e| anyhow!("{e}"))?;
    let tpm_signature = policy::wrap_signature(&raw_signature).map_err(|e| anyhow!("{e}"))?;

    let marshalled = TargetPlatform::LegacyGrub
        .write_signed_policy(&tpm_signature, alg, &[], &[], &pcr_digest, None)
        .map_err(|e| anyhow!("{e}"))?;

    write_atomically(output, &marshalled)?;
    Ok(())
}

fn policy_sign_systemd_cmd(
    algo: &str,
    pcrs: &str,
    private_key: &PathBuf,
    public_key: &PathBuf,
    input: &PathBuf,
    output: &PathBuf,
) -> Result<()> {
    let alg = parse_algorithm(algo)?;
    let mask = parse_pcr_spec(pcrs)?;
    let pcr_list = valid_pcr_list(mask);

    let privkey = RsaKey::load_private(private_key).map_err(|e| anyhow!(e))?;
    let pubkey = RsaKey::load_public(public_key).map_err(|e| anyhow!(e))?;
    let pcr_digest = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let signature = policy::sign(&pcr_digest, &privkey).map_err(|e| anyhow!("{e}"))?;

    let pubkey_public = pubkey.to_tpm_public().map_err(|e| anyhow!(e))?;
    let fingerprint = {
        use tss_esapi::traits::Marshall;
        let bytes = pubkey_public.marshall().map_err(|e| anyhow!("{e}"))?;
        pcrpredict_core::hash::hash_one(alg, &bytes)
    };

    let mut doc = if output.exists() {
        envelope::systemd_json::SystemdPolicyDoc::parse(&fs::read(output)?)?
    } else {
        envelope::systemd_json::SystemdPolicyDoc::new()
    };
    doc.upsert(alg, pcr_list, &fingerprint, &pcr_digest, &signature);

    let json = doc.to_json()?;
    write_atomically(output, &json)?;
    Ok(())
}

/// Writes `bytes` to `path` via a temp file + rename, so a failure never
/// leaves a partial output file in place (§7 "output files are written only
/// after complete success").
fn write_atomically(path: &PathBuf, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
    let tmp = dir.join(format!(".{}.tmp", path.file_name().and_then(|n| n.to_str()).unwrap_or("pcr-predict-out")));
    fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;
    Ok(())
}
