use clap::{Parser, Subcommand};
use regq_core::{
    constants::DEFAULT_PATIENT_DATA_DIR, payload_keys_from_env_value,
    preferred_identifier_type_from_env_value, CoreConfig, FileLedgerStore, FilePatientStore,
    Lookups, PatientStore, QueueEntry, ReferenceData, RegistrationHandler,
    RegistrationLedgerStore, TemporaryId,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "regq")]
#[command(about = "Queued patient registration CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a registration payload without storing anything
    Validate {
        /// Path to the JSON payload
        payload: PathBuf,
        /// Queue entry id used in logs (generated when omitted)
        #[arg(long)]
        uuid: Option<String>,
    },
    /// Validate a registration payload and commit it
    Process {
        /// Path to the JSON payload
        payload: PathBuf,
        /// Queue entry id used in logs (generated when omitted)
        #[arg(long)]
        uuid: Option<String>,
    },
    /// List stored patients
    List,
    /// Show the id assigned to a temporary id
    Ledger {
        /// Temporary id supplied by the registering client
        temporary_id: String,
    },
}

/// Configuration from `REGQ_PATIENT_DATA_DIR`, `REGQ_PAYLOAD_KEYS` and
/// `REGQ_PREFERRED_IDENTIFIER_TYPE`.
fn core_config() -> anyhow::Result<Arc<CoreConfig>> {
    let patient_data_dir = std::env::var("REGQ_PATIENT_DATA_DIR")
        .unwrap_or_else(|_| DEFAULT_PATIENT_DATA_DIR.into());
    Ok(Arc::new(CoreConfig::new(
        PathBuf::from(patient_data_dir),
        payload_keys_from_env_value(std::env::var("REGQ_PAYLOAD_KEYS").ok())?,
        preferred_identifier_type_from_env_value(
            std::env::var("REGQ_PREFERRED_IDENTIFIER_TYPE").ok(),
        ),
    )?))
}

fn handler(cfg: Arc<CoreConfig>) -> anyhow::Result<RegistrationHandler> {
    let reference_data = std::env::var("REGQ_REFERENCE_DATA")
        .map_err(|_| anyhow::anyhow!("REGQ_REFERENCE_DATA must point to a reference-data file"))?;
    let data = ReferenceData::load(&PathBuf::from(reference_data))?;
    Ok(RegistrationHandler::with_file_stores(
        cfg,
        Lookups::from_reference_data(Arc::new(data)),
    ))
}

fn queue_entry(payload: &Path, uuid: Option<String>) -> anyhow::Result<QueueEntry> {
    let text = std::fs::read_to_string(payload)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", payload.display()))?;
    let uuid = uuid.unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    Ok(QueueEntry::registration(uuid, text))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("regq_core=warn".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Validate { payload, uuid }) => {
            let entry = queue_entry(&payload, uuid)?;
            match handler(core_config()?)?.validate(&entry) {
                Ok(validated) => {
                    println!("Valid registration for: {}", validated.record.full_name());
                }
                Err(report) => {
                    eprintln!("{report}");
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::Process { payload, uuid }) => {
            let entry = queue_entry(&payload, uuid)?;
            match handler(core_config()?)?.process(&entry) {
                Ok(outcome) => println!(
                    "{}: temporary id {} -> patient {}",
                    outcome.state(),
                    outcome.temporary_id(),
                    outcome.assigned_id()
                ),
                Err(report) => {
                    eprintln!("{report}");
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::List) => {
            let cfg = core_config()?;
            let patients = FilePatientStore::new(cfg.patients_dir()).list()?;
            if patients.is_empty() {
                println!("No patients found.");
            } else {
                for patient in patients {
                    println!(
                        "ID: {}, Name: {}, Identifier: {}, Created: {}",
                        patient.id,
                        patient.record.full_name(),
                        patient
                            .record
                            .preferred_identifier()
                            .map(|i| i.value.as_str())
                            .unwrap_or("-"),
                        patient.created_at.to_rfc3339()
                    );
                }
            }
        }
        Some(Commands::Ledger { temporary_id }) => {
            let cfg = core_config()?;
            let temporary_id = TemporaryId::new(&temporary_id)?;
            match FileLedgerStore::new(cfg.ledger_dir()).get(&temporary_id)? {
                Some(assigned_id) => println!("{temporary_id} -> {assigned_id}"),
                None => println!("No ledger entry for {temporary_id}."),
            }
        }
        None => {
            println!("Use 'regq --help' for commands");
        }
    }

    Ok(())
}
