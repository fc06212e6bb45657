use ameba_lvgl_port::romfs::{Dirent, Romfs, RomfsBuilder, DEFAULT_MOUNT_ADDR};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "mkromfs")]
#[command(about = "Build and inspect ROMFS asset images", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pack a directory into an image
    Build {
        /// Asset directory
        dir: PathBuf,

        /// Output image
        #[arg(short, long, default_value = "romfs.bin")]
        output: PathBuf,

        /// Flash address the image will be mapped at
        #[arg(short, long, value_parser = parse_addr, default_value = "0x00703000")]
        base: u32,
    },
    /// Print the tree stored in an image
    List {
        image: PathBuf,

        #[arg(short, long, value_parser = parse_addr, default_value = "0x00703000")]
        base: u32,
    },
}

fn parse_addr(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", s, e))
}

fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Build { dir, output, base } => build(&dir, &output, base),
        Command::List { image, base } => list(&image, base),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "❌".red(), e);
        std::process::exit(1);
    }
}

fn build(dir: &Path, output: &Path, base: u32) -> Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("asset directory not found: {}", dir.display());
    }

    println!("{} Packing {}", "📦".blue(), dir.display());
    let builder = RomfsBuilder::from_dir(dir, base)?;
    let image = builder.build()?;
    fs::write(output, &image).with_context(|| format!("writing {}", output.display()))?;

    println!("{}Files: {}", "   ".dimmed(), builder.file_count());
    println!(
        "{}Image: {} bytes ({:.2} KB) at 0x{:08x}",
        "   ".dimmed(),
        image.len(),
        image.len() as f64 / 1024.0,
        base
    );
    if base != DEFAULT_MOUNT_ADDR {
        println!(
            "{}{}",
            "   ".dimmed(),
            format!("note: firmware mounts at 0x{:08x} by default", DEFAULT_MOUNT_ADDR).yellow()
        );
    }
    println!("{} Wrote {}", "✅".green(), output.display());
    Ok(())
}

fn list(path: &Path, base: u32) -> Result<()> {
    let image = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let romfs = Romfs::mount(&image, base)?;

    println!("{}", "/".blue().bold());
    let (files, bytes) = walk(&romfs, &romfs.root()?, 1)?;
    println!("\n{} files, {} bytes", files, bytes);
    Ok(())
}

/// Print `dir` recursively from its child records; returns (file count, total bytes)
fn walk(romfs: &Romfs<'_>, dir: &Dirent, depth: usize) -> Result<(usize, u64)> {
    let indent = "  ".repeat(depth);
    let (mut files, mut bytes) = (0, 0u64);
    for index in 0..dir.size {
        let child = romfs.child(dir, index)?;
        if !child.is_valid() {
            anyhow::bail!("corrupt record {} at depth {}", index, depth);
        }
        let name = String::from_utf8_lossy(romfs.name(&child)?).into_owned();
        if child.is_dir() {
            println!("{}{}/", indent, name.blue().bold());
            let (f, b) = walk(romfs, &child, depth + 1)?;
            files += f;
            bytes += b;
        } else {
            println!("{}{} {}", indent, name, format!("({} bytes)", child.size).dimmed());
            files += 1;
            bytes += child.size as u64;
        }
    }
    Ok((files, bytes))
}
