//! `obmm`: command-line interface for OBMM shared memory.
//!
//! ```text
//! USAGE:
//!   obmm controllers                          List UB bus controllers
//!   obmm resolve <eid>                        Controller owning an EID
//!   obmm export --eid <eid> --size <bytes>..  Export local memory
//!   obmm unexport <mem-id>                    Withdraw an export
//!   obmm import <mem-id> --scna <cna>         Import an exported region
//!   obmm unimport <mem-id>                    Release an import
//!   obmm query-pa <mem-id> [offset]           Physical address in a region
//!   obmm query-memid <pa>                     Region backing a physical address
//!   obmm ownership <shm-dev> <start> <end> <none|read|rw>
//! ```
//!
//! Descriptors of exported regions are written to the descriptor directory
//! (`/tmp/memlink` unless overridden) and read back by `import`.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use obmm_driver::{
    Eid, ExportFlags, ImportFlags, MemDesc, Obmm, ObmmConfig, Ownership, UbcTree, UnexportFlags,
    UnimportFlags,
};
use std::fs::OpenOptions;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "obmm", about = "OBMM shared-memory CLI", version)]
struct Cli {
    #[command(flatten)]
    paths: PathArgs,

    #[command(subcommand)]
    command: Cmd,
}

/// Overrides for `OBMM_SYSFS_ROOT`, `OBMM_DEV_PATH` and `OBMM_DESC_DIR`.
#[derive(Args)]
struct PathArgs {
    /// Sysfs root holding ub_bus_controller* directories.
    #[arg(long, global = true)]
    sysfs_root: Option<PathBuf>,
    /// OBMM control device.
    #[arg(long, global = true)]
    device: Option<PathBuf>,
    /// Directory for memory descriptor JSON files.
    #[arg(long, global = true)]
    desc_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Cmd {
    /// List UB bus controllers and their attributes.
    Controllers,
    /// Show the controller owning an EID.
    Resolve {
        /// EID, as `hi:lo` or a single integer (hex with 0x).
        eid: Eid,
    },
    /// Export local memory to a remote endpoint.
    Export {
        /// Destination EID.
        #[arg(long)]
        eid: Eid,
        /// Source EID recorded in the descriptor for the importer.
        #[arg(long)]
        seid: Option<Eid>,
        /// Bytes per local NUMA node, in node order.
        #[arg(long = "size", required = true, value_parser = parse_u64)]
        sizes: Vec<u64>,
        /// Allow the importer to mmap the region.
        #[arg(long)]
        allow_mmap: bool,
        /// Allow the importer to online the region as a NUMA node.
        #[arg(long)]
        remote_numa: bool,
    },
    /// Withdraw an export.
    Unexport {
        /// Memory id returned by export.
        #[arg(value_parser = parse_u64)]
        mem_id: u64,
        /// Tear down while importers remain.
        #[arg(long)]
        force: bool,
    },
    /// Import a region from its stored descriptor.
    Import {
        /// Memory id the exporter stored the descriptor under.
        #[arg(value_parser = parse_u64)]
        mem_id: u64,
        /// Source channel adapter.
        #[arg(long, value_parser = parse_u32)]
        scna: Option<u32>,
        /// Destination channel adapter.
        #[arg(long, value_parser = parse_u32)]
        dcna: Option<u32>,
        /// NUMA node hint.
        #[arg(long, allow_negative_numbers = true)]
        numa: Option<i32>,
        /// Distance of the remote NUMA node.
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        base_dist: i32,
        /// Online the region as a remote NUMA node.
        #[arg(long)]
        numa_remote: bool,
        /// Import into a declared pre-import window.
        #[arg(long)]
        preimport: bool,
        /// Allow mmap of the imported region.
        #[arg(long)]
        allow_mmap: bool,
    },
    /// Release an import.
    Unimport {
        /// Memory id returned by import.
        #[arg(value_parser = parse_u64)]
        mem_id: u64,
        /// Tear down while mappings remain.
        #[arg(long)]
        force: bool,
    },
    /// Physical address at an offset within a region.
    QueryPa {
        /// Memory id.
        #[arg(value_parser = parse_u64)]
        mem_id: u64,
        /// Offset within the region.
        #[arg(value_parser = parse_u64, default_value = "0")]
        offset: u64,
    },
    /// Region and offset backing a physical address.
    QueryMemid {
        /// Physical address.
        #[arg(value_parser = parse_u64)]
        pa: u64,
    },
    /// Change access ownership of a range of an shm device.
    Ownership {
        /// Shm device, e.g. /dev/obmm_shmdev0.
        shm_dev: PathBuf,
        /// Range start.
        #[arg(value_parser = parse_u64)]
        start: u64,
        /// Range end.
        #[arg(value_parser = parse_u64)]
        end: u64,
        /// none, read or rw.
        ownership: Ownership,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let obmm = Obmm::new(cli.paths.config());

    match cli.command {
        Cmd::Controllers => cmd_controllers(&obmm),
        Cmd::Resolve { eid } => cmd_resolve(&obmm, eid)?,
        Cmd::Export {
            eid,
            seid,
            sizes,
            allow_mmap,
            remote_numa,
        } => {
            let mut flags = ExportFlags::empty();
            flags.set(ExportFlags::ALLOW_MMAP, allow_mmap);
            flags.set(ExportFlags::REMOTE_NUMA, remote_numa);
            cmd_export(&obmm, eid, seid, &sizes, flags)?;
        }
        Cmd::Unexport { mem_id, force } => {
            let flags = if force {
                UnexportFlags::FORCE
            } else {
                UnexportFlags::empty()
            };
            obmm.unexport(mem_id, flags)
                .with_context(|| format!("unexport {mem_id}"))?;
            println!("Unexported {mem_id}");
        }
        Cmd::Import {
            mem_id,
            scna,
            dcna,
            numa,
            base_dist,
            numa_remote,
            preimport,
            allow_mmap,
        } => {
            let mut flags = ImportFlags::empty();
            flags.set(ImportFlags::NUMA_REMOTE, numa_remote);
            flags.set(ImportFlags::PREIMPORT, preimport);
            flags.set(ImportFlags::ALLOW_MMAP, allow_mmap);
            cmd_import(&obmm, mem_id, scna, dcna, numa, base_dist, flags)?;
        }
        Cmd::Unimport { mem_id, force } => {
            let flags = if force {
                UnimportFlags::FORCE
            } else {
                UnimportFlags::empty()
            };
            obmm.unimport(mem_id, flags)
                .with_context(|| format!("unimport {mem_id}"))?;
            println!("Unimported {mem_id}");
        }
        Cmd::QueryPa { mem_id, offset } => {
            let pa = obmm
                .query_pa_by_memid(mem_id, offset)
                .with_context(|| format!("query pa of {mem_id}+{offset:#x}"))?;
            println!("{pa:#x}");
        }
        Cmd::QueryMemid { pa } => {
            let (mem_id, offset) = obmm
                .query_memid_by_pa(pa)
                .with_context(|| format!("query mem_id of {pa:#x}"))?;
            println!("mem_id {mem_id} offset {offset:#x}");
        }
        Cmd::Ownership {
            shm_dev,
            start,
            end,
            ownership,
        } => {
            let dev = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&shm_dev)
                .with_context(|| format!("open {}", shm_dev.display()))?;
            obmm.set_ownership(&dev, start, end, ownership)
                .with_context(|| format!("set {start:#x}..{end:#x} to {ownership}"))?;
            println!("{} {start:#x}..{end:#x}: {ownership}", shm_dev.display());
        }
    }

    Ok(())
}

impl PathArgs {
    fn config(&self) -> ObmmConfig {
        let mut config = ObmmConfig::from_env();
        if let Some(root) = &self.sysfs_root {
            config = config.with_sysfs_root(root);
        }
        if let Some(dev) = &self.device {
            config = config.with_device_path(dev);
        }
        if let Some(dir) = &self.desc_dir {
            config = config.with_desc_dir(dir);
        }
        config
    }
}

fn cmd_controllers(obmm: &Obmm) {
    let tree = UbcTree::new(&obmm.config().sysfs_root);
    let controllers = tree.controllers();

    println!("UB bus controllers: {}", controllers.len());
    println!();

    let show = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());
    for c in controllers {
        println!("[{}] {}", c.index, c.path.display());
        println!("     eid          {}", show(c.eid.map(|e| e.to_string())));
        println!("     ummu_map     {}", show(c.ummu_mapping.map(|v| v.to_string())));
        println!("     numa         {}", show(c.numa_id.map(|v| v.to_string())));
        println!("     primary_cna  {}", show(c.primary_cna.map(|v| format!("{v:#x}"))));
        println!();
    }
}

fn cmd_resolve(obmm: &Obmm, eid: Eid) -> Result<()> {
    let tree = UbcTree::new(&obmm.config().sysfs_root);
    let ctl = tree
        .find_controller(&eid)
        .with_context(|| format!("resolve {eid}"))?;

    println!("EID          : {eid}");
    println!("Controller   : {} ({})", ctl.index, ctl.path.display());
    match tree.controller_node(&eid) {
        Ok(node) => {
            println!("UMMU mapping : {}", node.ummu_mapping);
            println!("NUMA node    : {}", node.numa_id);
        }
        Err(e) => println!("UMMU / NUMA  : ({e})"),
    }
    match tree.primary_cna(&eid) {
        Ok(cna) => println!("Primary CNA  : {cna:#x}"),
        Err(e) => println!("Primary CNA  : ({e})"),
    }
    Ok(())
}

fn cmd_export(
    obmm: &Obmm,
    eid: Eid,
    seid: Option<Eid>,
    sizes: &[u64],
    flags: ExportFlags,
) -> Result<()> {
    let mut desc = MemDesc::new(eid);
    if let Some(seid) = seid {
        desc.seid = seid;
    }

    let mem_id = obmm
        .export(sizes, flags, &mut desc)
        .with_context(|| format!("export to {eid}"))?;
    let path = desc
        .save(&obmm.config().desc_dir, mem_id)
        .context("store descriptor")?;

    println!("mem_id     : {mem_id}");
    println!("uba        : {:#x}", desc.addr);
    println!("length     : {:#x}", desc.length);
    println!("tokenid    : {}", desc.tokenid);
    println!("descriptor : {}", path.display());
    Ok(())
}

fn cmd_import(
    obmm: &Obmm,
    mem_id: u64,
    scna: Option<u32>,
    dcna: Option<u32>,
    numa: Option<i32>,
    base_dist: i32,
    flags: ImportFlags,
) -> Result<()> {
    let dir = &obmm.config().desc_dir;
    let mut desc = MemDesc::load(dir, mem_id).with_context(|| {
        format!(
            "load {}",
            MemDesc::file_path(dir, mem_id).display()
        )
    })?;
    if let Some(scna) = scna {
        desc.scna = scna;
    }
    if let Some(dcna) = dcna {
        desc.dcna = dcna;
    }

    let imported = obmm
        .import(&desc, flags, base_dist, numa)
        .with_context(|| format!("import {mem_id} from {}", desc.seid))?;

    println!("mem_id : {}", imported.mem_id);
    println!("numa   : {}", imported.numa_id);
    Ok(())
}

fn parse_u64(s: &str) -> Result<u64, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

fn parse_u32(s: &str) -> Result<u32, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
}
