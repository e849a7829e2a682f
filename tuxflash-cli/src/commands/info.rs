//! Firmware info command implementation.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;
use tuxflash::{PreparedJob, ProgramJob};

use crate::config::Config;

/// Info command implementation.
pub(crate) fn cmd_info(config: &Config, file: &Path, json: bool) -> Result<()> {
    let page_size = config.session_config().page_size;
    let prepared = ProgramJob::classify(file)
        .and_then(|job| job.prepare(page_size))
        .with_context(|| format!("Cannot use {}", file.display()))?;
    let pages = prepared.image.hex().pages(page_size)?.len();

    if json {
        let info = info_json(&prepared, page_size, pages);
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    let hex = prepared.image.hex();
    eprintln!("{}", style("Firmware Information").bold().underlined());
    eprintln!("  File:        {}", style(file.display()).cyan());
    eprintln!("  Routing:     {}", prepared.job.kind);
    eprintln!("  Target:      {} {}", prepared.cpu, prepared.memory);
    match prepared.bootloader_address {
        Some(address) => eprintln!("  Bootloader:  {address:#04x}"),
        None => eprintln!("  Bootloader:  external DFU programmer"),
    }
    match prepared.image.version() {
        Some(version) => eprintln!("  Version:     {version}"),
        None => eprintln!("  Version:     {}", style("none").dim()),
    }
    eprintln!("  Records:     {}", hex.records().len());
    eprintln!("  Data bytes:  {}", hex.data_len());
    eprintln!("  Pages:       {pages} x {page_size} bytes");
    if !hex.has_end_of_file() {
        eprintln!("  {}", style("No end-of-file record").yellow());
    }

    Ok(())
}

fn info_json(prepared: &PreparedJob, page_size: usize, pages: usize) -> serde_json::Value {
    let hex = prepared.image.hex();
    let version = prepared.image.version().map(|v| {
        serde_json::json!({
            "cpu_number": v.cpu_number,
            "major": v.major,
            "minor": v.minor,
            "update": v.update,
            "text": v.to_string(),
        })
    });

    serde_json::json!({
        "file": prepared.path().display().to_string(),
        "kind": prepared.job.kind.to_string(),
        "cpu": prepared.cpu.to_string(),
        "memory": prepared.memory.to_string(),
        "bootloader_address": prepared.bootloader_address.map(|a| format!("{a:#04x}")),
        "version": version,
        "records": hex.records().len(),
        "data_bytes": hex.data_len(),
        "end_of_file": hex.has_end_of_file(),
        "page_size": page_size,
        "pages": pages,
    })
}
