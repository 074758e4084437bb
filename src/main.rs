//! `sealzip` command line tool.
//!
//! Lists, tests and extracts archives from the local filesystem or from
//! remote HTTP URLs, verifying CRC-32 and SHA-256 on the way.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use sealzip::hash::to_hex;
use sealzip::zip::{ensure_no_symlink_parents, safe_join};
use sealzip::{
    Cli, CodecQueue, HttpRangeReader, LocalFileReader, RESERVED_METADATA_NAMES, ReadAt,
    ZipEntry, ZipExtractor,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if !cli.is_http_url() {
        let reader = LocalFileReader::new(Path::new(&cli.file))
            .with_context(|| format!("cannot open {}", cli.file))?;
        let reader = Arc::new(reader);
        let outcome = run(reader.clone(), &cli).await;
        reader.close().await?;
        return outcome;
    }

    let reader = Arc::new(HttpRangeReader::new(cli.file.clone()).await?);
    run(reader.clone(), &cli).await?;
    if !cli.is_quiet() {
        eprintln!(
            "\nTotal bytes transferred: {}",
            format_size(reader.transferred_bytes())
        );
    }
    Ok(())
}

/// Load the archive and run the mode selected by the flags: list (`-l`,
/// `-v`), test (`-t`) or extract. `-m` prints the Merkle root first.
async fn run<R: ReadAt>(reader: Arc<R>, cli: &Cli) -> Result<()> {
    let extractor = ZipExtractor::new(reader, CodecQueue::shared(), cli.extract_options())
        .await
        .with_context(|| format!("cannot read archive {}", cli.file))?;

    if cli.merkle {
        match extractor.archive().merkle_root(RESERVED_METADATA_NAMES) {
            Ok(Some(root)) => println!("Merkle root: {}", to_hex(&root)),
            Ok(None) => println!("Merkle root: (no file entries)"),
            Err(e) => println!("Merkle root: unavailable ({e})"),
        }
    }

    if cli.list || cli.verbose {
        print_listing(extractor.list_files()?, cli.verbose);
        return Ok(());
    }

    let selected: Vec<&ZipEntry> = extractor
        .list_files()?
        .iter()
        .filter(|e| !e.is_directory() && is_selected(e, cli))
        .collect();

    if cli.test {
        return test_entries(&extractor, &selected, cli).await;
    }

    let banners = cli.pipe && selected.len() > 1;
    for entry in selected {
        if cli.pipe {
            pipe_entry(&extractor, entry, banners).await?;
        } else {
            extract_entry(&extractor, entry, cli).await?;
        }
    }
    Ok(())
}

/// Positional names (exact path, basename or glob) and `-x` exclusions.
fn is_selected(entry: &ZipEntry, cli: &Cli) -> bool {
    let name = entry.file_name.as_str();
    let basename = Path::new(name)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(name);

    let wanted = cli.files.is_empty()
        || cli.files.iter().any(|f| {
            if has_glob_chars(f) {
                glob_match(f, name)
            } else {
                name == f || basename == f
            }
        });
    let excluded = cli
        .exclude
        .iter()
        .any(|x| name.contains(x.as_str()) || glob_match(x, name));
    wanted && !excluded
}

/// Percentage saved by compression, as unzip prints it.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed == 0 {
        return "  0%".to_string();
    }
    let saved = 100 - (compressed.saturating_mul(100) / uncompressed) as i64;
    format!("{saved:>4}%")
}

fn print_listing(entries: &[ZipEntry], verbose: bool) {
    if !verbose {
        for entry in entries {
            println!("{}", entry.file_name);
        }
        return;
    }

    let rule = "-".repeat(78);
    println!(
        "{:>10}  {:>10}  {:>7}  {:>5}  {:>10}  {:>5}  Name",
        "Length", "Size", "Method", "Cmpr", "Date", "Time"
    );
    println!("{rule}");

    let (mut length, mut size, mut files) = (0u64, 0u64, 0usize);
    for entry in entries {
        let (year, month, day) = entry.mod_date();
        let (hour, minute, _) = entry.mod_time();
        println!(
            "{:>10}  {:>10}  {:>7}  {}  {year:04}-{month:02}-{day:02}  {hour:02}:{minute:02}  {}{}",
            entry.uncompressed_size,
            entry.compressed_size,
            entry.compression_method.to_string(),
            ratio(entry.compressed_size, entry.uncompressed_size),
            entry.file_name,
            if entry.is_encrypted() { "*" } else { "" },
        );
        if !entry.is_directory() {
            length += entry.uncompressed_size;
            size += entry.compressed_size;
            files += 1;
        }
    }

    println!("{rule}");
    println!(
        "{length:>10}  {size:>10}  {:>7}  {}  {:>17}  {files} files",
        "",
        ratio(size, length),
        ""
    );
}

/// Decompress and verify each entry without writing anything.
async fn test_entries<R: ReadAt>(
    extractor: &ZipExtractor<R>,
    entries: &[&ZipEntry],
    cli: &Cli,
) -> Result<()> {
    let mut failures = 0usize;
    for entry in entries {
        match extractor.test_entry(entry).await {
            Ok(_) if !cli.is_quiet() => println!("    testing: {:<40} OK", entry.file_name),
            Ok(_) => {}
            Err(e) => {
                failures += 1;
                eprintln!("    testing: {:<40} {e}", entry.file_name);
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} entries failed verification", entries.len());
    }
    if !cli.is_very_quiet() {
        println!("No errors detected in {}", cli.file);
    }
    Ok(())
}

async fn pipe_entry<R: ReadAt>(extractor: &ZipExtractor<R>, entry: &ZipEntry, banner: bool) -> Result<()> {
    if banner {
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(format!("--- {} ---\n", entry.file_name).as_bytes())
            .await?;
        stdout.flush().await?;
    }
    extractor.extract_to_stdout(entry).await?;
    Ok(())
}

/// Where `entry` lands under `-d` (default: current directory) and `-j`.
fn output_path(entry: &ZipEntry, cli: &Cli) -> Result<PathBuf> {
    let base = PathBuf::from(cli.extract_dir.as_deref().unwrap_or("."));
    if !cli.junk_paths {
        return Ok(safe_join(&base, &entry.file_name)?);
    }
    match Path::new(&entry.file_name).file_name() {
        Some(name) => Ok(base.join(name)),
        None => bail!("entry '{}' has no file name", entry.file_name),
    }
}

/// Extract one entry to disk, honouring `-n` and `-o` for existing files.
async fn extract_entry<R: ReadAt>(extractor: &ZipExtractor<R>, entry: &ZipEntry, cli: &Cli) -> Result<()> {
    let path = output_path(entry, cli)?;
    let base = Path::new(cli.extract_dir.as_deref().unwrap_or("."));
    ensure_no_symlink_parents(base, &path)
        .await
        .with_context(|| format!("refusing to extract {}", entry.file_name))?;

    if tokio::fs::symlink_metadata(&path).await.is_ok() && (cli.never_overwrite || !cli.overwrite) {
        if !cli.is_quiet() {
            let hint = if cli.never_overwrite { "file exists" } else { "use -o to overwrite" };
            eprintln!("Skipping: {} ({hint})", entry.file_name);
        }
        return Ok(());
    }

    if !cli.is_quiet() {
        println!("  extracting: {}", entry.file_name);
    }
    extractor
        .extract_to_file(entry, &path)
        .await
        .with_context(|| format!("failed to extract {}", entry.file_name))
}

fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

/// `*` matches any run of characters (including `/`), `?` exactly one.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    // position after the last `*` and the text index it was matched against
    let mut star: Option<(usize, usize)> = None;
    let (mut p, mut t) = (0, 0);
    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p + 1, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some((after, matched)) => {
                    p = after;
                    t = matched + 1;
                    star = Some((after, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

fn format_size(size: u64) -> String {
    const UNITS: [&str; 3] = ["KB", "MB", "GB"];
    if size < 1024 {
        return format!("{size} bytes");
    }
    let mut value = size as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_patterns() {
        assert!(glob_match("*.txt", "readme.txt"));
        assert!(glob_match("file?.dat", "file1.dat"));
        assert!(glob_match("notes/*", "notes/a/b.txt"));
        assert!(!glob_match("*.txt", "readme.md"));
        assert!(has_glob_chars("a*") && !has_glob_chars("plain"));
    }

    #[test]
    fn ratio_matches_unzip() {
        assert_eq!(ratio(25, 100), "  75%");
        assert_eq!(ratio(0, 0), "  0%");
        assert_eq!(ratio(120, 100), " -20%");
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(500), "500 bytes");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
    }
}
