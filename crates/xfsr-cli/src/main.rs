#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::env;
use std::io::Write;
use std::path::Path;
use xfsr::{BmbtIrec, DirFormat, EntryType, InodeAttr, InodeNumber, MountOptions, Volume};

/// Bytes copied per read by `cat`.
const CAT_CHUNK: u32 = 1 << 20;

#[derive(Debug, Serialize)]
struct InspectOutput {
    version: u16,
    label: String,
    block_size: u32,
    dblocks: u64,
    ag_count: u32,
    ag_blocks: u32,
    inode_size: u16,
    dir_block_size: u32,
    root_ino: InodeNumber,
    v5: bool,
    ftype: bool,
}

#[derive(Debug, Serialize)]
struct LsEntry {
    name: String,
    ino: InodeNumber,
    entry_type: EntryType,
}

#[derive(Debug, Serialize)]
struct StatOutput {
    path: String,
    #[serde(flatten)]
    attr: InodeAttr,
    dir_format: Option<DirFormat>,
}

struct Args {
    image: String,
    path: Option<String>,
    json: bool,
    skip_validation: bool,
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_usage();
        return Ok(());
    };
    if matches!(command.as_str(), "--help" | "-h" | "help") {
        print_usage();
        return Ok(());
    }
    let parsed = parse_args(&command, args.collect())?;

    match command.as_str() {
        "inspect" => inspect(&parsed),
        "ls" => ls(&parsed),
        "cat" => cat(&parsed),
        "stat" => stat(&parsed),
        "bmap" => bmap(&parsed),
        "readlink" => readlink(&parsed),
        _ => {
            print_usage();
            bail!("unknown command: {command}")
        }
    }
}

fn parse_args(command: &str, raw: Vec<String>) -> Result<Args> {
    let mut positional = Vec::new();
    let mut json = false;
    let mut skip_validation = false;
    for arg in raw {
        match arg.as_str() {
            "--json" => json = true,
            "--skip-validation" => skip_validation = true,
            flag if flag.starts_with("--") => bail!("unknown flag: {flag}"),
            _ => positional.push(arg),
        }
    }
    let mut positional = positional.into_iter();
    let Some(image) = positional.next() else {
        bail!("{command} requires an image path");
    };
    let path = positional.next();
    if let Some(extra) = positional.next() {
        bail!("unexpected argument: {extra}");
    }
    Ok(Args {
        image,
        path,
        json,
        skip_validation,
    })
}

fn print_usage() {
    println!("xfsr\n");
    println!("USAGE:");
    println!("  xfsr inspect <image> [--json]");
    println!("  xfsr ls <image> [path] [--json]");
    println!("  xfsr cat <image> <path>");
    println!("  xfsr stat <image> <path> [--json]");
    println!("  xfsr bmap <image> <path> [--json]");
    println!("  xfsr readlink <image> <path>");
    println!();
    println!("All commands accept --skip-validation to mount a superblock that fails checks.");
}

fn open(args: &Args) -> Result<Volume> {
    let options = MountOptions {
        skip_validation: args.skip_validation,
        ..MountOptions::default()
    };
    Volume::open_with_options(Path::new(&args.image), &options)
        .with_context(|| format!("failed to mount XFS image: {}", args.image))
}

fn resolve(vol: &Volume, args: &Args) -> Result<(String, InodeNumber)> {
    let path = args.path.clone().unwrap_or_else(|| "/".to_owned());
    let (ino, _) = vol
        .resolve_path(&path)
        .with_context(|| format!("failed to resolve {path}"))?;
    Ok((path, ino))
}

fn required_path(args: &Args, command: &str) -> Result<()> {
    if args.path.is_none() {
        bail!("{command} requires a path inside the image");
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serialize output")?
    );
    Ok(())
}

fn inspect(args: &Args) -> Result<()> {
    let vol = open(args)?;
    let sb = vol.superblock();
    let geo = vol.geometry();
    let output = InspectOutput {
        version: sb.version(),
        label: sb.fname.clone(),
        block_size: geo.block_size,
        dblocks: geo.dblocks,
        ag_count: geo.ag_count,
        ag_blocks: geo.ag_blocks,
        inode_size: geo.inode_size,
        dir_block_size: geo.dir_block_size,
        root_ino: geo.root_ino,
        v5: geo.is_v5,
        ftype: geo.has_ftype,
    };

    if args.json {
        return print_json(&output);
    }
    println!("XFS Inspector");
    println!("version: {}", output.version);
    println!("label: {}", output.label);
    println!("block_size: {}", output.block_size);
    println!("dblocks: {}", output.dblocks);
    println!("ag_count: {}", output.ag_count);
    println!("ag_blocks: {}", output.ag_blocks);
    println!("inode_size: {}", output.inode_size);
    println!("dir_block_size: {}", output.dir_block_size);
    println!("root_ino: {}", output.root_ino);
    println!("v5: {}", output.v5);
    println!("ftype: {}", output.ftype);
    Ok(())
}

fn ls(args: &Args) -> Result<()> {
    let vol = open(args)?;
    let (path, ino) = resolve(&vol, args)?;
    let entries: Vec<LsEntry> = vol
        .read_dir_all(ino)
        .with_context(|| format!("failed to list {path}"))?
        .into_iter()
        .map(|e| LsEntry {
            name: e.name_str().into_owned(),
            ino: e.ino,
            entry_type: e.entry_type,
        })
        .collect();

    if args.json {
        return print_json(&entries);
    }
    for entry in &entries {
        println!(
            "{:>12} {:<8} {}",
            entry.ino.0,
            type_label(entry.entry_type),
            entry.name
        );
    }
    Ok(())
}

fn type_label(ty: EntryType) -> &'static str {
    match ty {
        EntryType::RegularFile => "file",
        EntryType::Directory => "dir",
        EntryType::Symlink => "symlink",
        EntryType::CharDevice => "chardev",
        EntryType::BlockDevice => "blkdev",
        EntryType::Fifo => "fifo",
        EntryType::Socket => "socket",
        EntryType::Unknown => "unknown",
    }
}

fn cat(args: &Args) -> Result<()> {
    required_path(args, "cat")?;
    let vol = open(args)?;
    let (path, ino) = resolve(&vol, args)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut offset = 0_u64;
    loop {
        let chunk = vol
            .read_file(ino, offset, CAT_CHUNK)
            .with_context(|| format!("failed to read {path} at offset {offset}"))?;
        if chunk.is_empty() {
            break;
        }
        out.write_all(&chunk).context("write to stdout")?;
        offset += chunk.len() as u64;
    }
    out.flush().context("flush stdout")?;
    Ok(())
}

fn stat(args: &Args) -> Result<()> {
    required_path(args, "stat")?;
    let vol = open(args)?;
    let (path, ino) = resolve(&vol, args)?;
    let attr = vol.getattr(ino).with_context(|| format!("failed to stat {path}"))?;
    let dir_format = match attr.kind {
        xfsr::FileType::Directory => Some(vol.dir_format(ino)?),
        _ => None,
    };
    let output = StatOutput {
        path,
        attr,
        dir_format,
    };

    if args.json {
        return print_json(&output);
    }
    println!("path: {}", output.path);
    println!("ino: {}", output.attr.ino);
    println!("kind: {:?}", output.attr.kind);
    println!("perm: {:o}", output.attr.perm);
    println!("size: {}", output.attr.size);
    println!("blocks: {}", output.attr.blocks);
    println!("nlink: {}", output.attr.nlink);
    println!("uid: {}", output.attr.uid);
    println!("gid: {}", output.attr.gid);
    if output.attr.rdev != 0 {
        println!("rdev: {}:{}", output.attr.rdev >> 8, output.attr.rdev & 0xff);
    }
    if let Some(format) = output.dir_format {
        println!("dir_format: {format:?}");
    }
    Ok(())
}

fn bmap(args: &Args) -> Result<()> {
    required_path(args, "bmap")?;
    let vol = open(args)?;
    let (path, ino) = resolve(&vol, args)?;
    let extents: Vec<BmbtIrec> = vol
        .extents(ino)
        .with_context(|| format!("failed to map {path}"))?;

    if args.json {
        return print_json(&extents);
    }
    for rec in &extents {
        println!(
            "[{}..{}]: fsblock {} ({} blocks){}",
            rec.startoff.0,
            rec.end().saturating_sub(1),
            rec.startblock.0,
            rec.blockcount,
            if rec.unwritten { " unwritten" } else { "" }
        );
    }
    Ok(())
}

fn readlink(args: &Args) -> Result<()> {
    required_path(args, "readlink")?;
    let vol = open(args)?;
    let (path, ino) = resolve(&vol, args)?;
    let target = vol
        .read_link(ino)
        .with_context(|| format!("failed to read link {path}"))?;
    println!("{}", String::from_utf8_lossy(&target));
    Ok(())
}
