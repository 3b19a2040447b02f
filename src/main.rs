//! Main entry point for the ziparc CLI application.
//!
//! Each invocation opens one archive, applies one command and closes the
//! archive, which writes any changes back to disk.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::io::{self, Write};
use std::path::Path;

use ziparc::cli::{AddArgs, Command};
use ziparc::zip::ErrorCode;
use ziparc::{Archive, Cli, Origin, Stat, flags};

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let archive = Archive::open(&cli.archive, cli.open_flags())
        .with_context(|| format!("cannot open {}", cli.archive.display()))?;

    run(&archive, &cli)?;

    // Explicit close so that write errors are reported instead of discarded
    archive
        .close()
        .with_context(|| format!("cannot write {}", cli.archive.display()))?;
    Ok(())
}

fn run(archive: &Archive, cli: &Cli) -> Result<()> {
    let lookup = cli.lookup_flags();
    match &cli.command {
        Command::List { verbose, patterns } => list_entries(archive, *verbose, patterns),
        Command::Cat { names } => {
            let mut stdout = io::stdout().lock();
            for name in names {
                let mut file = archive
                    .open_file(name.as_str(), lookup)
                    .with_context(|| format!("cannot open entry {}", name))?;
                io::copy(&mut file, &mut stdout)?;
                file.close()?;
            }
            stdout.flush()?;
            Ok(())
        }
        Command::Add(args) => add_entry(archive, args, lookup),
        Command::Mkdir { name } => {
            archive.add_directory(name)?;
            Ok(())
        }
        Command::Rm { names } => {
            for name in names {
                let index = archive.name_locate(name, lookup)?;
                archive.delete(index)?;
            }
            Ok(())
        }
        Command::Mv { from, to } => {
            let index = archive.name_locate(from, lookup)?;
            archive.rename(index, to)?;
            Ok(())
        }
        Command::Comment { set } => {
            match set {
                Some(text) if text.is_empty() => archive.set_comment(None)?,
                Some(text) => archive.set_comment(Some(text))?,
                None => {
                    if let Some(comment) = archive.comment(0)? {
                        println!("{}", comment);
                    }
                }
            }
            Ok(())
        }
        Command::Copy {
            other,
            entry,
            rename,
            recompress,
        } => {
            let origin = Archive::open(other, 0)
                .with_context(|| format!("cannot open {}", other.display()))?;
            let index = origin.name_locate(entry, lookup)?;
            let source = archive.source(Origin::Entry {
                archive: &origin,
                index,
                flags: if *recompress { flags::FL_RECOMPRESS } else { 0 },
                start: 0,
                len: -1,
            })?;
            let name = rename.as_deref().unwrap_or(entry);
            put(archive, name, &source, lookup)?;
            // The origin stays pinned by `archive` until it is written
            Ok(())
        }
    }
}

fn add_entry(archive: &Archive, args: &AddArgs, lookup: u32) -> Result<()> {
    let origin = match (&args.file, &args.text) {
        (Some(path), None) => Origin::path(path),
        (None, Some(text)) => Origin::buffer(text.as_str()),
        _ => bail!("give exactly one of --file and --text"),
    };
    let source = archive.source(origin)?;
    put(archive, &args.name, &source, lookup)
}

/// Replace the entry called `name` if there is one, add it otherwise.
fn put(archive: &Archive, name: &str, source: &ziparc::Source, lookup: u32) -> Result<()> {
    match archive.name_locate(name, lookup) {
        Ok(index) => {
            archive.replace(index, source)?;
        }
        Err(ziparc::Error::NotFound(_)) => {
            archive.add(name, source)?;
        }
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

/// List entries in the archive.
///
/// The verbose format is a table with sizes, compression ratio and
/// modification time, followed by a totals line.
fn list_entries(archive: &Archive, verbose: bool, patterns: &[String]) -> Result<()> {
    let mut entries: Vec<Stat> = Vec::new();
    for index in 1..=archive.num_files()? {
        match archive.stat(index, 0) {
            Ok(stat) => entries.push(stat),
            Err(err) if err.code() == Some(ErrorCode::Deleted) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    entries.retain(|e| patterns.is_empty() || patterns.iter().any(|p| matches(p, &e.name)));

    if verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
            "Length", "Size", "Cmpr", "Date", "Time"
        );
        println!("{}", "-".repeat(70));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in &entries {
        if !verbose {
            println!("{}", entry.name);
            continue;
        }

        let compressed = entry.compressed_size.unwrap_or(entry.size);
        let when = chrono::DateTime::from_timestamp(entry.mtime, 0)
            .map(|t| t.format("%Y-%m-%d  %H:%M").to_string())
            .unwrap_or_else(|| format!("{:>17}", "?"));
        println!(
            "{:>10}  {:>10}  {}  {}  {}",
            entry.size,
            compressed,
            ratio(compressed, entry.size),
            when,
            entry.name
        );

        if !entry.name.ends_with('/') {
            total_uncompressed += entry.size;
            total_compressed += compressed;
            file_count += 1;
        }
    }

    if verbose {
        println!("{}", "-".repeat(70));
        println!(
            "{:>10}  {:>10}  {}  {:>17}  {} files",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            file_count
        );
        eprintln!(
            "\n{}: {} in, {} stored",
            archive.path().display(),
            format_size(total_uncompressed),
            format_size(total_compressed)
        );
    }

    Ok(())
}

/// Space saved as a right-aligned percentage.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 && compressed <= uncompressed {
        format!("{:>4}%", 100 - (compressed * 100 / uncompressed))
    } else {
        "  0%".to_string()
    }
}

/// Match a pattern against the full name, or against the base name when the
/// pattern has no wildcards.
fn matches(pattern: &str, name: &str) -> bool {
    if pattern.contains('*') || pattern.contains('?') {
        return glob_match(pattern, name);
    }
    let basename = Path::new(name)
        .file_name()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    name == pattern || basename == pattern
}

/// Glob matching with `*` (any run of characters) and `?` (one character).
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_chars: Vec<char> = pattern.chars().collect();
    let text_chars: Vec<char> = text.chars().collect();

    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if *p == *t => do_match(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    do_match(&pattern_chars, &text_chars)
}

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
