use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};
use pg_compiler::{compile, load_lists, parse_filter_list, DirectorySource, LoadSummary};
use pg_core::{
    DomainSettingsTable, FilterList, FilterListRegistry, GlobalSettings, ListKind, RequestType,
    SuffixList,
};

pub struct CompiledFile {
    pub name: String,
    pub list: FilterList,
    pub skipped: Vec<(usize, String)>,
    pub total_ms: f64,
}

/// Compile one list file. The list is named after the file stem, or after
/// the matching `ListKind` when the file uses a known name.
pub fn compile_file(path: &str) -> Result<CompiledFile, String> {
    let content = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;

    let stem = Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = ListKind::from_file_stem(&stem)
        .map(|kind| kind.display_name().to_string())
        .unwrap_or(stem);

    let start = Instant::now();
    let list = compile(&name, &content).map_err(|e| format!("Failed to compile '{}': {}", path, e))?;
    let total_ms = start.elapsed().as_secs_f64() * 1000.0;
    debug!("Compiled {name} from {path} in {total_ms:.2}ms");

    let skipped = parse_filter_list(&content)
        .skipped
        .into_iter()
        .map(|s| (s.line, format!("{}: {}", s.text, s.error)))
        .collect();

    Ok(CompiledFile {
        name,
        list,
        skipped,
        total_ms,
    })
}

pub struct RegistryInputs<'a> {
    pub lists_dir: &'a str,
    pub settings: Option<&'a str>,
    pub globals: Option<&'a str>,
    pub psl: Option<&'a str>,
}

/// Build a registry from files on disk and wait for the lists to load.
pub async fn load_registry(inputs: RegistryInputs<'_>) -> Result<(Arc<FilterListRegistry>, LoadSummary), String> {
    let registry = Arc::new(FilterListRegistry::default());

    if let Some(path) = inputs.psl {
        let text = read(path)?;
        let suffixes = SuffixList::from_psl_text(&text).map_err(|e| format!("Invalid PSL '{}': {}", path, e))?;
        info!("Using public suffix list from {path}");
        registry.set_suffix_list(suffixes);
    }
    if let Some(path) = inputs.globals {
        registry.set_globals(read_globals(path)?);
    }
    if let Some(path) = inputs.settings {
        let table = read_settings(path)?;
        info!("Loaded {} domain settings from {path}", table.len());
        registry.reload_domain_settings(table);
    }

    let source = Arc::new(DirectorySource::new(inputs.lists_dir));
    let summary = load_lists(Arc::clone(&registry), source)
        .await
        .map_err(|e| e.to_string())?;

    Ok((registry, summary))
}

pub fn read_settings(path: &str) -> Result<DomainSettingsTable, String> {
    DomainSettingsTable::from_json(&read(path)?).map_err(|e| format!("Invalid settings '{}': {}", path, e))
}

pub fn read_globals(path: &str) -> Result<GlobalSettings, String> {
    GlobalSettings::from_json(&read(path)?).map_err(|e| format!("Invalid globals '{}': {}", path, e))
}

fn read(path: &str) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))
}

/// `script=https://...` or `script https://...`
pub fn parse_request_spec(spec: &str) -> Result<(RequestType, String), String> {
    let spec = spec.trim();
    let (ty, url) = spec
        .split_once('=')
        .filter(|(ty, _)| !ty.contains(':'))
        .or_else(|| spec.split_once(char::is_whitespace))
        .ok_or_else(|| format!("Expected <type>=<url>, got '{}'", spec))?;

    let request_type =
        RequestType::from_type_name(ty.trim()).ok_or_else(|| format!("Unknown request type '{}'", ty.trim()))?;
    Ok((request_type, url.trim().to_string()))
}

/// One request per line; blank lines and `#` comments are skipped.
pub fn read_requests_file(path: &str) -> Result<Vec<(RequestType, String)>, String> {
    read(path)?
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty() && !line.trim_start().starts_with('#'))
        .map(|(idx, line)| parse_request_spec(line).map_err(|e| format!("{}:{}: {}", path, idx + 1, e)))
        .collect()
}
