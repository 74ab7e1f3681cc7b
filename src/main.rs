use std::cell::Cell;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use bindelta::batch::{batch_diff, batch_patch, BatchOptions};
use bindelta::{
    apply_patch, create_diff, get_patch_info, verify_patch, ApplyOptions, DeltaError,
    DiffOptions, JobStats, Progress,
};

#[derive(Parser)]
#[command(name = "bindelta", version = "1.0.0", about = "Block-based binary diff/patch for large archives")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a patch: old + new -> patch
    Diff {
        old:   PathBuf,
        new:   PathBuf,
        patch: PathBuf,
        /// Worker threads (0 = auto)
        #[arg(short, long, default_value = "0")]
        threads: usize,
        /// Block size in MiB
        #[arg(short, long, default_value = "64")]
        block_size: u32,
        /// LZ4 level: 1-3 fast, 4-12 high compression
        #[arg(short, long, default_value = "1")]
        compress: i32,
        /// Skip SHA-256 digests (header digests are zeroed)
        #[arg(long)]
        no_verify: bool,
        /// Render a progress bar
        #[arg(long)]
        progress: bool,
    },
    /// Apply a patch: old + patch -> new
    Patch {
        old:   PathBuf,
        patch: PathBuf,
        new:   PathBuf,
        #[arg(short, long, default_value = "0")]
        threads: usize,
        /// Skip SHA-256 verification of old and produced files
        #[arg(long)]
        no_verify: bool,
        #[arg(long)]
        progress: bool,
    },
    /// Check that a patch's declared sizes match the given files
    Verify {
        old:   PathBuf,
        new:   PathBuf,
        patch: PathBuf,
    },
    /// Show patch metadata
    Info {
        patch: PathBuf,
    },
    /// Diff every matching file pair between two directories
    BatchDiff {
        old_dir:   PathBuf,
        new_dir:   PathBuf,
        patch_dir: PathBuf,
        /// File extension to pair on
        #[arg(short, long, default_value = "pak")]
        extension: String,
        #[arg(short, long, default_value = "0")]
        threads: usize,
        #[arg(short, long, default_value = "64")]
        block_size: u32,
        #[arg(short, long, default_value = "1")]
        compress: i32,
    },
    /// Apply every patch in a directory to its counterpart
    BatchPatch {
        old_dir:   PathBuf,
        patch_dir: PathBuf,
        out_dir:   PathBuf,
        #[arg(short, long, default_value = "0")]
        threads: usize,
    },
}

// ── Console progress ─────────────────────────────────────────────────────────

/// 40-column bar in the style of `[=======>      ] 42% matching`.
struct ConsoleProgress {
    last_line_len: Cell<usize>,
}

impl ConsoleProgress {
    fn new() -> Self {
        Self { last_line_len: Cell::new(0) }
    }
}

impl Progress for ConsoleProgress {
    fn on_progress(&self, percent: f32, stage: &str) {
        const WIDTH: usize = 40;
        let filled = (WIDTH as f32 * percent) as usize;
        let mut bar = String::with_capacity(WIDTH + 24);
        for i in 0..WIDTH {
            bar.push(if i < filled {
                '='
            } else if i == filled {
                '>'
            } else {
                ' '
            });
        }
        let line = format!("  [{bar}] {:3}% {stage}", (percent * 100.0) as u32);
        // Pad over the previous line so stage-name changes leave no tail.
        let pad = self.last_line_len.get().saturating_sub(line.len());
        print!("\r{line}{}", " ".repeat(pad));
        self.last_line_len.set(line.len());
        use std::io::Write;
        let _ = std::io::stdout().flush();
    }

    fn on_complete(&self, outcome: &Result<JobStats, DeltaError>) {
        println!();
        if let Ok(stats) = outcome {
            println!("  ✓ done in {}", format_duration(stats.elapsed_seconds));
            println!("    processed {}", format_size(stats.bytes_processed));
        }
    }
}

// ── Entry point ──────────────────────────────────────────────────────────────

fn main() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {

        // ── Diff ─────────────────────────────────────────────────────────────
        Commands::Diff { old, new, patch, threads, block_size, compress, no_verify, progress } => {
            let options = DiffOptions {
                block_size:        block_size.clamp(1, 4095) * 1024 * 1024,
                compression_level: compress,
                num_threads:       threads,
                verify:            !no_verify,
                cancel:            None,
            };
            println!("Creating patch:");
            println!("  old:   {}", old.display());
            println!("  new:   {}", new.display());
            println!("  patch: {}", patch.display());

            let console = ConsoleProgress::new();
            let sink: Option<&dyn Progress> = if progress { Some(&console) } else { None };
            let stats = create_diff(&old, &new, &patch, &options, sink)?;

            if !progress {
                println!("  ✓ done in {}", format_duration(stats.elapsed_seconds));
            }
            let info = get_patch_info(&patch)?;
            println!("  patch size: {} ({} blocks)", format_size(info.patch_size), info.num_blocks);
        }

        // ── Patch ────────────────────────────────────────────────────────────
        Commands::Patch { old, patch, new, threads, no_verify, progress } => {
            let options = ApplyOptions {
                verify:      !no_verify,
                num_threads: threads,
                cancel:      None,
            };
            println!("Applying patch:");
            println!("  old:   {}", old.display());
            println!("  patch: {}", patch.display());
            println!("  new:   {}", new.display());

            let console = ConsoleProgress::new();
            let sink: Option<&dyn Progress> = if progress { Some(&console) } else { None };
            let stats = apply_patch(&old, &patch, &new, &options, sink)?;

            if !progress {
                println!("  ✓ done in {} ({})", format_duration(stats.elapsed_seconds),
                         format_size(stats.bytes_processed));
            }
        }

        // ── Verify ───────────────────────────────────────────────────────────
        Commands::Verify { old, new, patch } => {
            verify_patch(&old, &new, &patch)?;
            println!("✓ patch sizes match {} and {}", old.display(), new.display());
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { patch } => {
            let info = get_patch_info(&patch)?;
            println!("── Patch ────────────────────────────────────────────────");
            println!("  Path        {}", patch.display());
            println!("  Version     {}", info.version);
            println!("  Block size  {}", format_size(info.block_size as u64));
            println!("  Old size    {}", format_size(info.old_size));
            println!("  New size    {}", format_size(info.new_size));
            println!("  Blocks      {}", info.num_blocks);
            println!("  Patch size  {}", format_size(info.patch_size));
            println!("  Old SHA-256 {}", info.old_sha256_hex);
            println!("  New SHA-256 {}", info.new_sha256_hex);
        }

        // ── Batch diff ───────────────────────────────────────────────────────
        Commands::BatchDiff { old_dir, new_dir, patch_dir, extension, threads, block_size, compress } => {
            let options = BatchOptions {
                extension,
                diff: DiffOptions {
                    block_size:        block_size.clamp(1, 4095) * 1024 * 1024,
                    compression_level: compress,
                    num_threads:       threads,
                    ..DiffOptions::default()
                },
                ..BatchOptions::default()
            };
            let report = batch_diff(&old_dir, &new_dir, &patch_dir, &options, None)?;
            print_batch_report("diffed", &report);
            if !report.all_ok() {
                std::process::exit(1);
            }
        }

        // ── Batch patch ──────────────────────────────────────────────────────
        Commands::BatchPatch { old_dir, patch_dir, out_dir, threads } => {
            let options = BatchOptions {
                apply: ApplyOptions {
                    num_threads: threads,
                    ..ApplyOptions::default()
                },
                ..BatchOptions::default()
            };
            let report = batch_patch(&old_dir, &patch_dir, &out_dir, &options, None)?;
            print_batch_report("patched", &report);
            if !report.all_ok() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn print_batch_report(verb: &str, report: &bindelta::BatchReport) {
    println!("{} file(s) {verb}, {} skipped", report.processed, report.skipped.len());
    for path in &report.skipped {
        println!("  - skipped {} (no counterpart)", path.display());
    }
    for (path, err) in &report.failures {
        eprintln!("  ✗ {}: {err}", path.display());
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

fn format_duration(seconds: f64) -> String {
    if seconds < 1.0 {
        format!("{:.0} ms", seconds * 1000.0)
    } else if seconds < 60.0 {
        format!("{seconds:.2} s")
    } else {
        format!("{}m {:.0}s", (seconds / 60.0) as u64, seconds % 60.0)
    }
}
