use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::PathBuf;

use anyhow::Context;
use cabfile::{Cabinet, CompressionType, FileEntry, FolderEntry};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(about = "Lists and extracts files from CAB archives")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Concatenates and prints files from the cabinet
    Cat {
        cab: PathBuf,
        files: Vec<String>,
    },
    /// Extracts all files in the cabinet into a directory
    Extract {
        cab: PathBuf,
        /// Output directory (defaults to the current directory)
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
    /// Lists files in the cabinet
    Ls {
        cab: PathBuf,
        /// Lists in long format
        #[arg(short)]
        long: bool,
    },
}

fn main() -> anyhow::Result<()> {
    match Args::parse().command {
        Command::Cat { cab, files } => {
            let mut cabinet = open_cab(&cab)?;
            for filename in files {
                let mut file_reader = cabinet
                    .read_file(&filename)
                    .with_context(|| format!("failed to read {:?}", filename))?;
                io::copy(&mut file_reader, &mut io::stdout())?;
            }
        }
        Command::Extract { cab, out } => {
            let mut cabinet = open_cab(&cab)?;
            cabinet.extract_all(|file| {
                // Cabinet paths are backslash-separated; keep only the last
                // component rather than trusting them as local paths.
                let name = file.name().rsplit('\\').next().unwrap();
                let path = out.join(name);
                println!("{}", path.display());
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                File::create(path)
            })?;
        }
        Command::Ls { cab, long } => {
            let cabinet = open_cab(&cab)?;
            for (index, folder) in cabinet.folder_entries().enumerate() {
                for file in folder.file_entries() {
                    list_file(index, folder, file, long);
                }
            }
        }
    }
    Ok(())
}

fn list_file(
    folder_index: usize,
    folder: &FolderEntry,
    file: &FileEntry,
    long: bool,
) {
    if !long {
        println!("{}", file.name());
        return;
    }
    let ctype = match folder.compression_type() {
        CompressionType::None => "None".to_string(),
        CompressionType::MsZip => "MsZip".to_string(),
        CompressionType::Quantum(v, m) => format!("Q{}/{}", v, m),
        CompressionType::Lzx(w) => format!("Lzx{:?}", w),
    };
    let file_size = if file.uncompressed_size() >= 100_000_000 {
        format!("{} MB", file.uncompressed_size() / (1 << 20))
    } else if file.uncompressed_size() >= 1_000_000 {
        format!("{} kB", file.uncompressed_size() / (1 << 10))
    } else {
        format!("{} B ", file.uncompressed_size())
    };
    println!(
        "{}{}{}{}{}{} {:>2} {:<5} {:>10} {} {}",
        if file.is_read_only() { 'R' } else { '-' },
        if file.is_hidden() { 'H' } else { '-' },
        if file.is_system() { 'S' } else { '-' },
        if file.is_archive() { 'A' } else { '-' },
        if file.is_exec() { 'E' } else { '-' },
        if file.is_name_utf() { 'U' } else { '-' },
        folder_index,
        ctype,
        file_size,
        file.datetime()
            .map(|dt| dt.to_string())
            .unwrap_or_else(|| "invalid datetime".to_string()),
        file.name()
    );
}

fn open_cab(path: &PathBuf) -> anyhow::Result<Cabinet<BufReader<File>>> {
    Cabinet::open(path)
        .with_context(|| format!("failed to open cabinet {:?}", path))
}
