//! Main entry point for the zipglot CLI application.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::fs;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use zipglot::catalog::{self, COMBINATIONS, CombinationDescriptor, FileType, STUB_TEMPLATES};
use zipglot::cli::{Cli, Command, PayloadArgs, StubSource, select_names};
use zipglot::inspect::{self, ArchiveEntryDescriptor};
use zipglot::{edit, payload, polyglot};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        "zipglot=debug"
    } else if cli.quiet {
        "zipglot=error"
    } else {
        "zipglot=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Command::BuildPayload { payload } => build_payload(&payload),
        Command::CreateZip { payload } => create_zip(&payload),
        Command::WriteAppend { primary, payload } => write_append(&primary, &payload),
        Command::WriteStub {
            stub,
            encoding,
            zip_sibling,
            payload,
        } => write_stub(&stub, encoding, zip_sibling, &payload),
        Command::ListEntries { long, archive } => list_entries(&archive, long),
        Command::Extract {
            archive,
            destination,
            names,
        } => extract(&archive, &destination, &names),
        Command::DeleteEntries { archive, names } => delete_entries(&archive, &names),
        Command::Locate { archive } => locate(&archive),
        Command::Combinations { file_type } => combinations(file_type.as_deref()),
        Command::Templates { name } => templates(name.as_deref()),
    }
}

fn build_payload(args: &PayloadArgs) -> Result<()> {
    let built = payload::build(&args.payload_entries()).context("Failed to build payload")?;
    polyglot::write_zip_only(&built, &args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    println!("Wrote {} ({})", args.output.display(), format_size(built.len() as u64));
    Ok(())
}

fn create_zip(args: &PayloadArgs) -> Result<()> {
    let entries = args.payload_entries();
    payload::create_zip(&entries, &args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    println!("Wrote {} ({} entries)", args.output.display(), entries.len());
    Ok(())
}

fn write_append(primary: &Path, args: &PayloadArgs) -> Result<()> {
    let built = payload::build(&args.payload_entries()).context("Failed to build payload")?;
    let total = polyglot::write_append(primary, &built, &args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    println!(
        "Wrote {} ({}; archive starts at byte {})",
        args.output.display(),
        format_size(total),
        total - built.len() as u64
    );
    Ok(())
}

fn write_stub(
    source: &StubSource,
    encoding: &'static encoding_rs::Encoding,
    zip_sibling: bool,
    args: &PayloadArgs,
) -> Result<()> {
    let text = match (&source.stub, &source.template) {
        (Some(path), _) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read stub {}", path.display()))?,
        (None, Some(name)) => match catalog::stub_template(name) {
            Some(text) => text.to_string(),
            None => bail!("Unknown template '{name}' (see `zipglot templates`)"),
        },
        (None, None) => bail!("No stub given"),
    };

    let built = payload::build(&args.payload_entries()).context("Failed to build payload")?;
    let report = polyglot::write_stub(&text, &built, &args.output, encoding)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    println!(
        "Wrote {} ({}; archive starts at byte {})",
        args.output.display(),
        format_size(report.bytes_written),
        report.stub_len
    );
    if report.replaced_chars > 0 {
        eprintln!(
            "Warning: {} character(s) not representable in {} were written as '?'",
            report.replaced_chars,
            encoding.name()
        );
    }

    if zip_sibling {
        let sibling = polyglot::copy_zip_sibling(&args.output)
            .with_context(|| format!("Failed to copy {}", args.output.display()))?;
        println!("Copied to {}", sibling.display());
    }
    Ok(())
}

fn list_entries(archive: &Path, verbose: bool) -> Result<()> {
    let entries = inspect::list_entries(archive)
        .with_context(|| format!("Failed to read {}", archive.display()))?;

    if !verbose {
        for entry in &entries {
            println!("{}", entry.name);
        }
        return Ok(());
    }

    println!(
        "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
        "Length", "Size", "Cmpr", "Date", "Time"
    );
    println!("{}", "-".repeat(70));

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in &entries {
        let (date, time) = match entry.last_modified {
            Some(stamp) => (
                stamp.format("%Y-%m-%d").to_string(),
                stamp.format("%H:%M").to_string(),
            ),
            None => ("-".to_string(), "-".to_string()),
        };
        println!(
            "{:>10}  {:>10}  {:>4}%  {:>10}  {:>5}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            entry.compression_ratio_percent(),
            date,
            time,
            entry.name
        );

        if !entry.is_directory {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    println!("{}", "-".repeat(70));
    let totals = ArchiveEntryDescriptor {
        name: String::new(),
        uncompressed_size: total_uncompressed,
        compressed_size: total_compressed,
        last_modified: None,
        is_directory: false,
    };
    println!(
        "{:>10}  {:>10}  {:>4}%  {:>17}  {} files",
        total_uncompressed,
        total_compressed,
        totals.compression_ratio_percent(),
        "",
        file_count
    );

    Ok(())
}

fn entry_names(archive: &Path) -> Result<Vec<String>> {
    Ok(inspect::list_entries(archive)
        .with_context(|| format!("Failed to read {}", archive.display()))?
        .into_iter()
        .map(|e| e.name)
        .collect())
}

fn extract(archive: &Path, destination: &Path, patterns: &[String]) -> Result<()> {
    let available = entry_names(archive)?;
    let names = if patterns.is_empty() {
        available
    } else {
        select_names(patterns, &available)
    };

    let report = inspect::extract(archive, &names, destination)
        .with_context(|| format!("Failed to extract {}", archive.display()))?;

    for failure in &report.failures {
        eprintln!("  skipped: {} ({})", failure.name, failure.error);
    }
    println!(
        "Extracted {} entries to {}",
        report.extracted,
        destination.display()
    );
    if !report.failures.is_empty() {
        bail!("{} entries could not be extracted", report.failures.len());
    }
    Ok(())
}

fn delete_entries(archive: &Path, patterns: &[String]) -> Result<()> {
    let available = entry_names(archive)?;
    let names = select_names(patterns, &available);

    let summary = edit::delete_entries(archive, &names)
        .with_context(|| format!("Failed to edit {}", archive.display()))?;
    if summary.rewritten {
        println!(
            "Deleted {} entries ({} kept)",
            summary.removed, summary.kept
        );
    } else {
        println!("No matching entries; {} unchanged", archive.display());
    }
    Ok(())
}

fn locate(archive: &Path) -> Result<()> {
    let layout = inspect::locate_archive(archive)
        .with_context(|| format!("Failed to read {}", archive.display()))?;
    println!("Archive offset:     {}", layout.archive_offset);
    println!("Central directory:  {} ({} bytes)", layout.cd_offset, layout.cd_size);
    println!("End of directory:   {}", layout.eocd_offset);
    println!("Entries:            {}", layout.total_entries);
    if layout.archive_offset > 0 {
        println!(
            "Prefix:             {} ({})",
            format_size(layout.archive_offset),
            FileType::detect(archive)
        );
    }
    Ok(())
}

fn combinations(file_type: Option<&str>) -> Result<()> {
    let shown: Vec<&CombinationDescriptor> = match file_type {
        Some(name) => {
            let ty: FileType = name.parse().map_err(anyhow::Error::msg)?;
            match catalog::find_combination_for_type(ty) {
                Some(combo) => vec![combo],
                None => bail!("No known combination with a {ty} primary"),
            }
        }
        None => COMBINATIONS.iter().collect(),
    };

    for combo in shown {
        let secondaries: Vec<_> = combo.secondaries.iter().map(FileType::name).collect();
        println!(
            "{:<30}  {:<10}  {:<8}  {}",
            combo.label,
            combo.strategy.label(),
            combo.primary.name(),
            secondaries.join(", ")
        );
    }
    Ok(())
}

fn templates(name: Option<&str>) -> Result<()> {
    match name {
        Some(name) => match catalog::stub_template(name) {
            Some(text) => print!("{text}"),
            None => bail!("Unknown template '{name}'"),
        },
        None => {
            for (label, _) in STUB_TEMPLATES {
                println!("{label}");
            }
        }
    }
    Ok(())
}

/// Format a byte size into a human-readable string.
///
/// ```ignore
/// assert_eq!(format_size(500), "500 bytes");
/// assert_eq!(format_size(1536), "1.50 KB");
/// ```
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
