use std::path::Path;

use tracing::debug;

use crate::error::ContractError;
use crate::raw::RawContract;
use crate::validate::{convert_contract, Contract};

/// Walk `dir` and load every `*.contract.yml` found, recursing into
/// subdirectories. Returns an error if the directory is unreadable or no
/// contract file exists anywhere under it — an empty subscription set is
/// always a deployment mistake.
pub fn load_contracts(dir: &Path) -> Result<Vec<Contract>, ContractError> {
    let mut contracts = Vec::new();
    collect_contracts(dir, &mut contracts)?;
    if contracts.is_empty() {
        return Err(ContractError::Empty(dir.display().to_string()));
    }
    Ok(contracts)
}

fn collect_contracts(dir: &Path, out: &mut Vec<Contract>) -> Result<(), ContractError> {
    let entries = std::fs::read_dir(dir).map_err(|e| ContractError::Io {
        path: dir.display().to_string(),
        source: e,
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ContractError::Io {
            path: dir.display().to_string(),
            source: e,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_contracts(&path, out)?;
            continue;
        }
        let is_contract = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(".contract.yml") || n.ends_with(".contract.yaml"));
        if !is_contract {
            continue;
        }

        debug!("loading contract from {}", path.display());
        let content = std::fs::read_to_string(&path).map_err(|e| ContractError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let raw: RawContract =
            serde_yaml::from_str(&content).map_err(|e| ContractError::YamlParse {
                path: path.display().to_string(),
                source: e,
            })?;
        out.push(convert_contract(raw, &path)?);
    }

    Ok(())
}
