use clap::Parser;
use log::{error, info};
use psys_commons::{status, PsysError, PsysResult};
use psys_dynamic::{
    enqueue::RecordingQueue, process_group::process_group_sizeof, Generation, KernelBitmap,
    ProtocolVersion,
};
use psys_tool::{
    config::PsysConfig,
    session::{group_param, load_manifest, run_session, SessionOptions, Stage},
};
use std::{path::PathBuf, process};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Protocol {
    Legacy,
    Ppg,
}

#[derive(Parser, Debug)]
#[command(name = "psys_tool")]
#[command(about = "Instantiate a program group manifest as a process group and drive it")]
struct Args {
    /// Program group manifest (JSON)
    manifest: PathBuf,

    /// Hardware generation, overrides the config file
    #[arg(long)]
    generation: Option<String>,

    /// Kernels to enable, comma separated, all manifest kernels if omitted
    #[arg(long, value_delimiter = ',')]
    kernels: Vec<u8>,

    /// Fragments per frame, overrides the config file
    #[arg(long)]
    fragments: Option<u16>,

    #[arg(long, value_enum, default_value = "legacy")]
    protocol: Protocol,

    /// State to drive the group to
    #[arg(long, value_enum, default_value = "running")]
    until: Stage,

    /// Only report the arena size of the group
    #[arg(long)]
    size_only: bool,
}

fn run(args: &Args, mut config: PsysConfig) -> PsysResult<()> {
    if let Some(generation) = &args.generation {
        config.generation = generation.parse::<Generation>()?;
    }
    if let Some(fragments) = args.fragments {
        config.fragment_count = fragments;
    }
    let manifest = load_manifest(&args.manifest)?;
    let options = SessionOptions {
        kernels: if args.kernels.is_empty() {
            None
        } else {
            Some(KernelBitmap::from_kernels(&args.kernels))
        },
        protocol: match args.protocol {
            Protocol::Legacy => ProtocolVersion::Legacy,
            Protocol::Ppg => ProtocolVersion::Ppg,
        },
        until: args.until,
    };

    if args.size_only {
        let param = group_param(&config, &manifest, &options);
        let size = process_group_sizeof(config.generation.model(), &manifest, &param)?;
        println!("process group {}: {} bytes", manifest.program_group_id, size);
        return Ok(());
    }

    let mut queue = RecordingQueue::new();
    let group = run_session(&config, &manifest, &options, &mut queue)?;
    if group.state() != options.until.state() {
        return Err(PsysError::InvalidState);
    }
    print!("{}", group);
    for (queue_id, token, late_binding, bytes) in queue.entries.iter() {
        println!(
            "enqueued buffer set on queue {} for token {:#x} ({} bytes{})",
            queue_id,
            token,
            bytes.len(),
            if *late_binding { ", late binding" } else { "" }
        );
    }
    if !group.is_valid(&manifest) {
        return Err(PsysError::InvalidState);
    }
    println!("valid: true");
    return Ok(());
}

fn main() -> () {
    let args = Args::parse();

    // check if there is a configuration file
    let config = PsysConfig::get_config();

    let default_level = match &config {
        Ok(config) => config.log_level.to_string(),
        Err(_) => String::from("warn"),
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let result = config.and_then(|config| {
        info!("config: {:?}", config);
        run(&args, config)
    });
    if let Err(err) = &result {
        error!("psys_tool failed: {:?}", err);
        eprintln!("error: {:?} (status {})", err, status(&result));
        process::exit(1);
    }
}
