#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use std::env;
use std::fs;
use std::path::Path;
use xfsr_harness::{ImageOptions, build_sample_image, validate_superblock_fixture};

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let cmd = args.first().map(String::as_str);

    match cmd {
        Some("check-fixtures") => {
            for name in ["xfs_superblock_v5.json", "xfs_superblock_v4.json"] {
                let path = Path::new("conformance/fixtures").join(name);
                let sb = validate_superblock_fixture(&path)?;
                println!(
                    "{name}: version={} block_size={} ag_count={} root_ino={}",
                    sb.version(),
                    sb.block_size,
                    sb.ag_count,
                    sb.root_ino
                );
            }
            Ok(())
        }
        Some("gen-sample") => {
            let out = args.get(1).context("usage: xfsr-harness gen-sample <out> [--v4]")?;
            let opts = if args.iter().any(|a| a == "--v4") {
                ImageOptions::v4()
            } else {
                ImageOptions::default()
            };
            let (image, inodes) = build_sample_image(opts)?;
            fs::write(out, &image).with_context(|| format!("failed to write {out}"))?;
            println!("wrote {} bytes to {out} (root inode {})", image.len(), inodes.root);
            Ok(())
        }
        _ => {
            bail!("usage: xfsr-harness <check-fixtures|gen-sample <out> [--v4]>");
        }
    }
}
