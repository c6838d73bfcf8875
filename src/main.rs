use clap::{Parser, Subcommand};
use drpvault::checksum::extension_name;
use drpvault::codec::{get_codec, CodecId};
use drpvault::dump::{self, BatchReport, ExtractOptions};
use drpvault::DrpArchive;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "drpvault", about = "Extract and repack DRPF archives and save vaults")]
struct Cli {
    /// Block codec for compressed entries: zstd (default) or lz4
    #[arg(short, long, global = true, default_value = "zstd")]
    codec: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decrypt and extract one archive, or every *.drp under a directory
    Archive {
        input: PathBuf,
        /// Output root (defaults to the input's directory)
        dest:  Option<PathBuf>,
    },
    /// Decrypt and extract every slot of a save vault directory
    Save {
        input: PathBuf,
        /// Output root (defaults to the vault directory)
        dest:  Option<PathBuf>,
        /// Write entries.json with per-entry checksum status
        #[arg(long)]
        manifest: bool,
        /// Write {vault}.dec, the whole slot decrypted
        #[arg(long)]
        decrypted_image: bool,
    },
    /// Replace entries of an archive from a file or a directory of files
    Replace {
        archive:     PathBuf,
        replacement: PathBuf,
        /// Write here instead of overwriting the archive
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show archive header fields and entries
    Info {
        input: PathBuf,
    },
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let codec = get_codec(parse_codec(&cli.codec))?;

    let ok = match cli.command {

        // ── Archive ──────────────────────────────────────────────────────────
        Commands::Archive { input, dest } => {
            if input.is_dir() {
                let dest = dest.unwrap_or_else(|| input.clone());
                summarize(&dump::extract_all_archives(&input, &dest, codec.as_ref())?)
            } else {
                let dest = dest.unwrap_or_else(|| parent_dir(&input));
                let out = dump::extract_archive(&input, &dest, codec.as_ref())?;
                info!("Extracted to {}", out.display());
                true
            }
        }

        // ── Save ─────────────────────────────────────────────────────────────
        Commands::Save { input, dest, manifest, decrypted_image } => {
            let dest = dest.unwrap_or_else(|| input.clone());
            let options = ExtractOptions { manifest, decrypted_image };
            summarize(&dump::extract_save_dir(&input, &dest, options)?)
        }

        // ── Replace ──────────────────────────────────────────────────────────
        Commands::Replace { archive, replacement, output } => {
            let report = dump::replace_in_archive(&archive, &replacement, output.as_deref(), codec.as_ref())?;
            for path in &report.unmatched {
                warn!("not replaced: {}", path.display());
            }
            report.unmatched.is_empty()
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let ar = DrpArchive::open(&input, codec.as_ref())?;
            println!("── DRPF Archive ─────────────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  Encrypted      {}", ar.is_encrypted());
            println!("  Files          {}", ar.file_count());
            println!("  Header seed    {:08x}", ar.header_seed()?);
            println!("  Footer         {} B", ar.footer().len());
            println!();
            println!("{:<40} {:>10} {:>12} {:>12}  Comp", "Name", "Ext", "Size", "Stored");
            for entry in ar.entries() {
                let h = entry.header();
                println!("{:<40} {:>10} {:>12} {:>12}  {}",
                    entry.full_name(), extension_name(entry.extension()),
                    h.decompressed_size, h.compressed_size,
                    if entry.is_compressed() { "yes" } else { "no" });
            }
            true
        }
    };

    info!("Done!");
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn parse_codec(s: &str) -> CodecId {
    CodecId::from_name(s).unwrap_or_else(|| {
        warn!("Unknown codec '{}', defaulting to zstd", s);
        CodecId::Zstd
    })
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn summarize(report: &BatchReport) -> bool {
    info!("{} succeeded, {} failed", report.succeeded.len(), report.failed.len());
    for (path, err) in &report.failed {
        eprintln!("  failed  {}: {}", path.display(), err);
    }
    report.is_success()
}
