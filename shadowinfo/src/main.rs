mod filetime;


use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use shadowms::{FileSource, OpenOptions, Store, Volume, check_volume_signature};

use crate::filetime::format_filetime;


/// Default location of the shadow-copy volume header within an NTFS volume.
const DEFAULT_HEADER_OFFSET: u64 = 0x1E00;


#[derive(Parser)]
enum ProgMode {
    /// Show the volume header and the stores in the catalog.
    Info(InputArgs),

    /// List the block descriptors of one store.
    Blocks(StoreArgs),

    /// Write the reconstructed image of one store to a file.
    Export(ExportArgs),
}

#[derive(Parser)]
struct InputArgs {
    pub input_file: PathBuf,

    /// Offset of the shadow-copy volume header within the input file.
    #[arg(long, default_value_t = DEFAULT_HEADER_OFFSET)]
    pub header_offset: u64,

    /// Emit per-range read resolution traces.
    #[arg(long)]
    pub verbose_resolution: bool,
}

#[derive(Parser)]
struct StoreArgs {
    pub input_file: PathBuf,
    pub store_index: usize,

    #[arg(long, default_value_t = DEFAULT_HEADER_OFFSET)]
    pub header_offset: u64,

    #[arg(long)]
    pub verbose_resolution: bool,
}

#[derive(Parser)]
struct ExportArgs {
    pub input_file: PathBuf,
    pub store_index: usize,
    pub output_file: PathBuf,

    #[arg(long, default_value_t = DEFAULT_HEADER_OFFSET)]
    pub header_offset: u64,

    #[arg(long)]
    pub verbose_resolution: bool,
}


fn open_volume(input_file: &PathBuf, header_offset: u64, verbose_resolution: bool) -> Volume {
    let source = FileSource::open(input_file)
        .expect("failed to open input file");
    if !check_volume_signature(&source, header_offset).expect("failed to probe input file") {
        eprintln!("no shadow-copy volume header at offset {:#x}", header_offset);
        std::process::exit(1);
    }
    let options = OpenOptions {
        verbose_diagnostics: verbose_resolution,
        ..OpenOptions::default()
    };
    Volume::open(source, header_offset, options)
        .expect("failed to open shadow-copy volume")
}

fn open_store(volume: &Volume, store_index: usize) -> Store {
    if store_index >= volume.store_count() {
        eprintln!(
            "store {} does not exist; the volume has {} store(s)",
            store_index,
            volume.store_count(),
        );
        std::process::exit(1);
    }
    volume.store(store_index).expect("failed to open store")
}

fn print_store(store: &Store) {
    println!("Store {}:", store.index());
    println!("    identifier          : {}", store.identifier());
    println!("    creation time       : {}", format_filetime(store.creation_time()));
    println!("    volume size         : {} bytes", store.volume_size());
    println!("    has in-volume data  : {}", store.has_in_volume_data());
    if let Some(copy_identifier) = store.copy_identifier() {
        println!("    copy identifier     : {}", copy_identifier);
    }
    if let Some(copy_set_identifier) = store.copy_set_identifier() {
        println!("    copy set identifier : {}", copy_set_identifier);
    }
    if let Some(attribute_flags) = store.attribute_flags() {
        println!("    attribute flags     : {:#010x} ({:?})", attribute_flags.bits(), attribute_flags);
    }
    if let Some(operating_machine) = store.operating_machine() {
        println!("    operating machine   : {}", operating_machine);
    }
    if let Some(service_machine) = store.service_machine() {
        println!("    service machine     : {}", service_machine);
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mode = ProgMode::parse();
    match mode {
        ProgMode::Info(args) => {
            let volume = open_volume(&args.input_file, args.header_offset, args.verbose_resolution);
            let header = volume.header();
            println!("Shadow-copy volume:");
            println!("    version                 : {}", header.version);
            println!("    catalog offset          : {:#x}", header.catalog_offset);
            println!("    maximum size            : {} bytes", header.maximum_size);
            println!("    volume identifier       : {}", header.volume_identifier);
            println!("    store volume identifier : {}", header.store_volume_identifier);
            println!("    volume size             : {} bytes", volume.size());
            println!("    number of stores        : {}", volume.store_count());
            println!();

            for store_index in 0..volume.store_count() {
                let store = volume.store(store_index)
                    .expect("failed to open store");
                print_store(&store);
                println!();
            }
        },
        ProgMode::Blocks(args) => {
            let volume = open_volume(&args.input_file, args.header_offset, args.verbose_resolution);
            let store = open_store(&volume, args.store_index);
            let block_count = store.block_count()
                .expect("failed to load store block descriptors");

            println!("Store {} has {} block descriptor(s):", args.store_index, block_count);
            for block_index in 0..block_count {
                let block = store.block(block_index)
                    .expect("failed to get block descriptor");
                println!(
                    "    {:6}: original {:#014x} relative {:#014x} offset {:#014x} flags {:#010x} bitmap {:#010x}",
                    block_index,
                    block.original_offset,
                    block.relative_offset,
                    block.offset,
                    block.flags.bits(),
                    block.bitmap,
                );
            }
        },
        ProgMode::Export(args) => {
            let volume = open_volume(&args.input_file, args.header_offset, args.verbose_resolution);
            let store = open_store(&volume, args.store_index);
            let mut output = File::create(&args.output_file)
                .expect("failed to create output file");

            let mut buf = vec![0u8; 0x4000];
            let mut exported = 0u64;
            loop {
                let read = store.read_buffer(&mut buf)
                    .expect("failed to read from store");
                if read == 0 {
                    break;
                }
                output.write_all(&buf[..read])
                    .expect("failed to write output file");
                exported += read as u64;
            }
            println!("exported {} bytes from store {}", exported, args.store_index);
        },
    }
}
