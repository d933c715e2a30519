//! Prints a permission ledger directory as JSON.
//!
//! Usage: `cargo run --bin ledger-inspect -- <ledger-dir>`

use std::path::PathBuf;
use std::process::ExitCode;

use permission_wizard::utils::time::now_rfc3339;
use permission_wizard::{FileLedger, LedgerStore};

#[tokio::main]
async fn main() -> ExitCode {
    let Some(root) = std::env::args().nth(1).map(PathBuf::from) else {
        eprintln!("usage: ledger-inspect <ledger-dir>");
        return ExitCode::from(2);
    };

    let ledger = FileLedger::new(root.clone());
    let phase = match ledger.get_wizard_phase().await {
        Ok(phase) => phase,
        Err(error) => {
            eprintln!("failed to read wizard phase in {}: {}", root.display(), error);
            return ExitCode::FAILURE;
        }
    };
    let records = match ledger.records().await {
        Ok(records) => records,
        Err(error) => {
            eprintln!("failed to read records in {}: {}", root.display(), error);
            return ExitCode::FAILURE;
        }
    };

    let report = serde_json::json!({
        "ledger": root.display().to_string(),
        "phase": phase,
        "records": records,
        "generated_at": now_rfc3339(),
    });
    match serde_json::to_string_pretty(&report) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("failed to serialize ledger: {}", error);
            ExitCode::FAILURE
        }
    }
}
